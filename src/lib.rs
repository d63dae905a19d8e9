//! Poll a set of RSS/Atom feeds on an interval, fetch them in parallel over
//! a bounded worker pool, and stream the new articles, newest first, to a
//! consumer.
//!
//! - [`feed`] - source descriptors, items, and the fetch capability
//! - [`monitor`] - scheduler, worker pool, cycle coordinator, dispatcher
//! - [`working_set`] - consumer-side dedup and time ordering
//! - [`config`] - TOML config file and command-line overrides

pub mod config;
pub mod feed;
pub mod monitor;
pub mod util;
pub mod working_set;

pub use feed::{Article, HttpFetcher, RawItem, SourceDescriptor, SourceFetcher};
pub use monitor::{Consumer, Generation, Monitor, MonitorConfig, MonitorError, RecencyWindow};
pub use working_set::WorkingSet;
