//! Turning known feeds into stored articles.
//!
//! - [`Ingestor`] - update one feed, or every feed in a pass
//! - [`Scheduler`] - background task running a pass per interval
//! - [`Subscriptions`] - on-demand subscribe/unsubscribe and discovery

mod scheduler;
mod subscribe;
mod updater;

pub use scheduler::{Scheduler, SchedulerStatus, DEFAULT_POLL_INTERVAL};
pub use subscribe::{SubscribeError, Subscriptions};
pub use updater::{IngestError, Ingestor, PassReport, DEFAULT_INTER_FEED_DELAY};
