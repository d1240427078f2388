//! Feed retrieval and parsing.
//!
//! - [`parser`] - tolerant RSS/Atom parsing into [`NormalizedFeed`]
//! - [`sanitize`](fn@sanitize) - ingest-time stripping of scripts and event handlers
//! - [`FeedClient`] - HTTP fetch with timeout, size cap and URL policy, plus
//!   feed-link discovery from HTML pages
//!
//! # Example
//!
//! ```no_run
//! use feedloom::feed::{FeedClient, FeedClientOptions};
//!
//! # async fn demo() -> Result<(), feedloom::feed::FetchError> {
//! let client = FeedClient::new(FeedClientOptions::default())?;
//! let feed = client.fetch("https://example.com/feed.xml").await?;
//! println!("{}: {} entries", feed.title, feed.entries.len());
//! # Ok(())
//! # }
//! ```

mod discovery;
mod fetcher;
pub mod parser;
mod sanitize;

pub use fetcher::{FeedClient, FeedClientOptions, FetchError, DEFAULT_MAX_BODY_BYTES, DEFAULT_TIMEOUT};
pub use parser::{
    parse_feed, parse_feed_at, FeedFormat, NormalizedEntry, NormalizedFeed, ParseError,
    UNKNOWN_FEED_TITLE,
};
pub use sanitize::sanitize;
