//! Feed download.
//!
//! - [`fetcher`] - Single HTTP GET against the feed endpoint, with fixed
//!   query parameters and headers, returning the raw body
//! - [`summary`] - Line and header counts of a downloaded body, for logs
//!
//! The CSV content itself is never parsed or validated here; the body is
//! stored exactly as received.

mod fetcher;
mod summary;

pub use fetcher::{
    build_client, feed_request_url, fetch_feed, redact_url, FetchError, FetchedFeed,
};
pub use summary::FeedSummary;
