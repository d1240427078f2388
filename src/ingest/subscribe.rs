//! On-demand subscription surface.

use thiserror::Error;

use super::updater::Ingestor;
use crate::feed::FetchError;
use crate::storage::{DatabaseError, Feed, FeedId, FeedInsert, NewFeed, Subscription};
use crate::util::UrlValidationError;

/// Errors surfaced to on-demand callers; the messages are user-facing.
#[derive(Debug, Error)]
pub enum SubscribeError {
    #[error("Invalid URL format: {0}")]
    InvalidUrl(#[source] UrlValidationError),

    #[error("Invalid RSS feed: {0}")]
    Fetch(#[source] FetchError),

    #[error("Failed to subscribe to feed: {0}")]
    Store(#[from] DatabaseError),

    #[error("Already subscribed to this feed")]
    AlreadySubscribed,

    #[error("Not subscribed to this feed")]
    NotSubscribed,

    #[error("Feed not found")]
    FeedNotFound,
}

impl From<FetchError> for SubscribeError {
    fn from(e: FetchError) -> Self {
        match e {
            FetchError::InvalidUrl(inner) => SubscribeError::InvalidUrl(inner),
            other => SubscribeError::Fetch(other),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Subscriptions {
    ingestor: Ingestor,
}

impl Subscriptions {
    pub fn new(ingestor: Ingestor) -> Self {
        Self { ingestor }
    }

    /// Resolve a feed URL to a stored Feed, creating it on first use.
    ///
    /// A known URL returns the stored feed without any network access.
    /// Otherwise the feed is fetched and parsed synchronously, created, and
    /// its current entries are stored right away.
    pub async fn subscribe(&self, feed_url: &str) -> Result<Feed, SubscribeError> {
        let url = self.ingestor.client().check_url(feed_url.trim())?;
        let db = self.ingestor.database();

        if let Some(existing) = db.get_feed_by_url(url.as_str()).await? {
            return Ok(existing);
        }

        let parsed = self.ingestor.client().fetch(url.as_str()).await?;
        let insert = db
            .create_feed(NewFeed {
                url: url.to_string(),
                title: parsed.title,
                description: parsed.description,
                link: parsed.link,
            })
            .await?;

        let feed = match insert {
            FeedInsert::Created(feed) => feed,
            // Another caller created it between our lookup and write
            FeedInsert::Existing(feed) => return Ok(feed),
        };

        let stored = self.ingestor.store_entries(&feed, parsed.entries).await?;
        let feed = Feed {
            last_fetched: Some(chrono::Utc::now()),
            ..feed
        };
        db.update_feed(&feed).await?;

        tracing::info!(feed_id = %feed.id, url = %feed.url, articles = stored, "Subscribed to new feed");
        Ok(feed)
    }

    /// Subscribe a user to a feed URL.
    ///
    /// # Errors
    ///
    /// [`SubscribeError::AlreadySubscribed`] if the user already follows the feed.
    pub async fn subscribe_user(&self, user_id: &str, feed_url: &str) -> Result<(Feed, Subscription), SubscribeError> {
        let feed = self.subscribe(feed_url).await?;
        let db = self.ingestor.database();

        if db.get_subscription(user_id, feed.id).await?.is_some() {
            return Err(SubscribeError::AlreadySubscribed);
        }
        match db.create_subscription(user_id, feed.id).await? {
            Some(subscription) => {
                tracing::info!(user_id = %user_id, feed_id = %feed.id, "User subscribed");
                Ok((feed, subscription))
            }
            None => Err(SubscribeError::AlreadySubscribed),
        }
    }

    pub async fn unsubscribe_user(&self, user_id: &str, feed_id: FeedId) -> Result<(), SubscribeError> {
        let db = self.ingestor.database();
        if db.get_feed(feed_id).await?.is_none() {
            return Err(SubscribeError::FeedNotFound);
        }
        if !db.delete_subscription(user_id, feed_id).await? {
            return Err(SubscribeError::NotSubscribed);
        }
        tracing::info!(user_id = %user_id, feed_id = %feed_id, "User unsubscribed");
        Ok(())
    }

    /// Feed URLs advertised by or conventionally placed under a web page.
    pub async fn discover_feeds(&self, page_url: &str) -> Result<Vec<String>, SubscribeError> {
        Ok(self.ingestor.client().discover(page_url.trim()).await?)
    }
}
