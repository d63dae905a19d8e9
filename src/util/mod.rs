//! Small helpers shared by config loading and output.
//!
//! - **URL validation**: feed addresses must be public http(s) URLs
//! - **Text**: flatten feed-supplied strings for single-line terminal output

mod feed_url;
mod text;

pub use self::feed_url::{validate_feed_url, UrlValidationError};
pub use self::text::{fit_width, single_line};
