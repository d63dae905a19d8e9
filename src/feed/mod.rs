//! Feed sources: the data types that flow through the monitor and the
//! capability that turns one feed address into a batch of items.
//!
//! - [`types`] - `SourceDescriptor`, `RawItem`, `Article`
//! - [`fetcher`] - the [`SourceFetcher`] trait and its HTTP implementation
//! - [`parser`] - RSS/Atom parsing via the `feed-rs` crate
//!
//! # Example
//!
//! ```ignore
//! use feedwatch::feed::{HttpFetcher, SourceDescriptor, SourceFetcher};
//!
//! let fetcher = HttpFetcher::new()?;
//! let source = SourceDescriptor::new("https://example.com/rss", "Example", "#ff8700");
//! let items = fetcher.fetch(&source).await?;
//! ```

mod fetcher;
mod parser;
mod types;

pub use fetcher::{FetchError, HttpFetcher, SourceFetcher};
pub use parser::parse_feed;
pub use types::{Article, RawItem, SourceDescriptor};
