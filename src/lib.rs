//! RSS/Atom ingestion core.
//!
//! - [`feed`] - parsing, fetching and feed discovery
//! - [`storage`] - tuple-keyed record store with secondary indexes
//! - [`ingest`] - per-feed updates, the polling scheduler and subscriptions
//! - [`config`] - TOML configuration

pub mod config;
pub mod feed;
pub mod ingest;
pub mod storage;
pub mod util;
