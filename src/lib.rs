pub mod assembler;
pub mod config;
pub mod coordinates;
pub mod error;
pub mod feed;
pub mod fetch;
pub mod gtfs;
pub mod input;
pub mod normalize;
pub mod output;
pub mod parser;
pub mod registry;
pub mod reports;
pub mod scrape;
pub mod snapshot;
pub mod stats;
pub mod timing;

pub use error::FeedError;
pub use feed::{GtfsFeed, build_feed};
pub use input::load_raw_dir;
