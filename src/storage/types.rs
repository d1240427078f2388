use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::feed::NormalizedEntry;

pub type FeedId = Uuid;
pub type ArticleId = Uuid;
pub type ReplyId = Uuid;

// ============================================================================
// Error Types
// ============================================================================

/// Database-specific errors with user-friendly messages
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Another process holds the database lock
    #[error("Another feedloom process appears to be using the database. Please stop it and try again.")]
    InstanceLocked,

    /// Migration failed
    #[error("Database migration failed: {0}")]
    Migration(String),

    /// A stored value or key could not be (de)serialized
    #[error("Corrupt or unserializable record: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A write would break a store invariant (dangling reference, id/url change)
    #[error("Store invariant violated: {0}")]
    Invariant(String),

    /// Generic database error
    #[error("Database error: {0}")]
    Other(#[from] sqlx::Error),
}

impl DatabaseError {
    /// Maps an error raised while opening the database.
    ///
    /// Lock errors at this point mean another process holds the file. Once
    /// open, a busy error comes from this process's own writers and stays
    /// `Other`.
    pub(crate) fn on_open(err: sqlx::Error) -> Self {
        if is_lock_error(&err) {
            DatabaseError::InstanceLocked
        } else {
            DatabaseError::Other(err)
        }
    }
}

/// SQLITE_BUSY (5), SQLITE_LOCKED (6), SQLITE_CANTOPEN (14)
fn is_lock_error(err: &sqlx::Error) -> bool {
    let error_string = err.to_string().to_lowercase();
    error_string.contains("database is locked")
        || error_string.contains("database table is locked")
        || error_string.contains("sqlite_busy")
        || error_string.contains("sqlite_locked")
        || error_string.contains("unable to open database file")
}

// ============================================================================
// Entities
// ============================================================================

/// A syndication source, unique by `url`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feed {
    pub id: FeedId,
    pub url: String,
    pub title: String,
    pub description: String,
    /// Site link declared by the feed itself, empty if none
    pub link: String,
    pub last_fetched: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Fields supplied when creating a [`Feed`]; id and timestamps are assigned by the store.
#[derive(Debug, Clone, PartialEq)]
pub struct NewFeed {
    pub url: String,
    pub title: String,
    pub description: String,
    pub link: String,
}

/// One ingested entry. Immutable once stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Article {
    pub id: ArticleId,
    pub feed_id: FeedId,
    pub title: String,
    /// Sanitized HTML
    pub content: String,
    pub url: String,
    pub published_at: DateTime<Utc>,
    /// Natural key, unique per feed
    pub guid: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewArticle {
    pub feed_id: FeedId,
    pub title: String,
    pub content: String,
    pub url: String,
    pub published_at: DateTime<Utc>,
    pub guid: String,
}

impl NewArticle {
    pub fn from_entry(feed_id: FeedId, entry: NormalizedEntry) -> Self {
        Self {
            feed_id,
            title: entry.title,
            content: entry.content,
            url: entry.url,
            published_at: entry.published_at,
            guid: entry.guid,
        }
    }
}

/// Outcome of [`Database::create_article`](super::Database::create_article).
#[derive(Debug, Clone, PartialEq)]
pub enum ArticleInsert {
    Created(Article),
    /// An article with the same feed and GUID already existed; nothing was written
    Duplicate(Article),
}

impl ArticleInsert {
    pub fn is_created(&self) -> bool {
        matches!(self, ArticleInsert::Created(_))
    }

    pub fn article(&self) -> &Article {
        match self {
            ArticleInsert::Created(a) | ArticleInsert::Duplicate(a) => a,
        }
    }
}

/// Outcome of [`Database::create_feed`](super::Database::create_feed).
#[derive(Debug, Clone, PartialEq)]
pub enum FeedInsert {
    Created(Feed),
    /// The URL was already known; the stored feed is returned unchanged
    Existing(Feed),
}

impl FeedInsert {
    pub fn into_feed(self) -> Feed {
        match self {
            FeedInsert::Created(f) | FeedInsert::Existing(f) => f,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    pub user_id: String,
    pub feed_id: FeedId,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Like {
    pub user_id: String,
    pub article_id: ArticleId,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Retweet {
    pub user_id: String,
    pub article_id: ArticleId,
    pub comment: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reply {
    pub id: ReplyId,
    pub user_id: String,
    pub article_id: ArticleId,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// Index Consistency Report
// ============================================================================

/// Result of comparing every primary record with the index entries it implies.
#[derive(Debug, Default)]
pub struct ConsistencyReport {
    /// Number of primary records scanned
    pub primary_records: usize,
    /// Number of index entries present in the store
    pub index_entries: usize,
    /// Index keys a primary record implies but the store lacks
    pub missing: Vec<String>,
    /// Index keys present whose value disagrees with the primary record
    pub mismatched: Vec<String>,
    /// Index keys present with no primary record behind them
    pub orphaned: Vec<String>,
    /// Primary keys whose feed or article reference points nowhere
    pub dangling: Vec<String>,
    /// Keys whose stored value could not be decoded
    pub undecodable: Vec<String>,
}

impl ConsistencyReport {
    pub fn is_consistent(&self) -> bool {
        self.missing.is_empty()
            && self.mismatched.is_empty()
            && self.orphaned.is_empty()
            && self.dangling.is_empty()
            && self.undecodable.is_empty()
    }
}
