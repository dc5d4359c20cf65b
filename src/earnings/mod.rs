pub mod client;
pub mod sync;

pub use client::{EarningsClient, FeedMetadata, FeedPage, FeedPayment, FeedQuery, FeedSource, FeedTx};
pub use sync::FeedIndexer;
