use chrono::Utc;
use uuid::Uuid;

use super::kv::Record;
use super::schema::Database;
use super::types::{DatabaseError, Feed, FeedId, FeedInsert, NewFeed};

pub(crate) const FEED: &str = "feed";
pub(crate) const FEED_BY_URL: &str = "feed_by_url";

impl Record for Feed {
    const NAMESPACE: &'static str = FEED;

    fn primary_key(&self) -> Vec<String> {
        vec![FEED.to_owned(), self.id.to_string()]
    }

    fn index_keys(&self) -> Vec<Vec<String>> {
        vec![vec![FEED_BY_URL.to_owned(), self.url.clone()]]
    }
}

impl Database {
    // ========================================================================
    // Feed Operations
    // ========================================================================

    /// Create a feed unless one with the same URL already exists.
    ///
    /// The URL index key is written with a conditional insert, so two callers
    /// racing on the same URL end up with one feed and both get it back.
    pub async fn create_feed(&self, new: NewFeed) -> Result<FeedInsert, DatabaseError> {
        if let Some(existing) = self.get_feed_by_url(&new.url).await? {
            return Ok(FeedInsert::Existing(existing));
        }

        let feed = Feed {
            id: Uuid::new_v4(),
            url: new.url,
            title: new.title,
            description: new.description,
            link: new.link,
            last_fetched: None,
            created_at: Utc::now(),
        };

        let mut write = self.atomic();
        write.insert_record(&feed)?;
        if write.commit().await? {
            tracing::info!(feed_id = %feed.id, url = %feed.url, "Feed created");
            return Ok(FeedInsert::Created(feed));
        }

        // Lost the race: someone else created this URL between our read and write
        match self.get_feed_by_url(&feed.url).await? {
            Some(existing) => Ok(FeedInsert::Existing(existing)),
            None => Err(DatabaseError::Invariant(format!(
                "feed URL {} was claimed but has no record",
                feed.url
            ))),
        }
    }

    pub async fn get_feed(&self, id: FeedId) -> Result<Option<Feed>, DatabaseError> {
        self.get_record(&[&id.to_string()]).await
    }

    pub async fn get_feed_by_url(&self, url: &str) -> Result<Option<Feed>, DatabaseError> {
        self.get(&[FEED_BY_URL, url]).await
    }

    /// All feeds, oldest first
    pub async fn list_feeds(&self) -> Result<Vec<Feed>, DatabaseError> {
        let mut feeds: Vec<Feed> = self.list_values(&[FEED]).await?;
        feeds.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.url.cmp(&b.url)));
        Ok(feeds)
    }

    /// Overwrite a feed's record and its URL index entry in one commit.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError::Invariant` if the feed does not exist or if
    /// `feed.url` differs from the stored URL (id and url are immutable).
    pub async fn update_feed(&self, feed: &Feed) -> Result<(), DatabaseError> {
        let stored = self
            .get_feed(feed.id)
            .await?
            .ok_or_else(|| DatabaseError::Invariant(format!("feed {} does not exist", feed.id)))?;

        if stored.url != feed.url {
            return Err(DatabaseError::Invariant(format!(
                "feed {} URL cannot change ({} -> {})",
                feed.id, stored.url, feed.url
            )));
        }

        let mut write = self.atomic();
        write.set_record(feed)?;
        write.commit().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    async fn test_db() -> Database {
        Database::open(":memory:").await.unwrap()
    }

    fn new_feed(url: &str) -> NewFeed {
        NewFeed {
            url: url.to_owned(),
            title: "Example".to_owned(),
            description: "About things".to_owned(),
            link: "https://example.com".to_owned(),
        }
    }

    #[tokio::test]
    async fn test_create_and_get_feed() {
        let db = test_db().await;
        let feed = db
            .create_feed(new_feed("https://example.com/feed.xml"))
            .await
            .unwrap()
            .into_feed();

        assert_eq!(feed.title, "Example");
        assert_eq!(feed.last_fetched, None);
        assert_eq!(db.get_feed(feed.id).await.unwrap(), Some(feed.clone()));
        assert_eq!(
            db.get_feed_by_url("https://example.com/feed.xml").await.unwrap(),
            Some(feed)
        );
    }

    #[tokio::test]
    async fn test_get_missing_feed() {
        let db = test_db().await;
        assert_eq!(db.get_feed(Uuid::new_v4()).await.unwrap(), None);
        assert_eq!(db.get_feed_by_url("https://nowhere.example").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_create_feed_same_url_returns_existing() {
        let db = test_db().await;
        let first = db.create_feed(new_feed("https://a.example/rss")).await.unwrap();
        let second = db.create_feed(new_feed("https://a.example/rss")).await.unwrap();

        let FeedInsert::Created(first) = first else {
            panic!("first insert should create");
        };
        assert_eq!(second, FeedInsert::Existing(first));
        assert_eq!(db.list_feeds().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_create_feed_yields_one_record() {
        let db = test_db().await;
        let url = "https://race.example/feed";

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let db = db.clone();
                tokio::spawn(async move { db.create_feed(new_feed(url)).await.unwrap().into_feed() })
            })
            .collect();

        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap().id);
        }
        ids.dedup();
        assert_eq!(ids.len(), 1);
        assert_eq!(db.list_feeds().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_list_feeds_ordered_by_creation() {
        let db = test_db().await;
        for url in ["https://b.example/rss", "https://a.example/rss", "https://c.example/rss"] {
            db.create_feed(new_feed(url)).await.unwrap();
        }
        let urls: Vec<_> = db.list_feeds().await.unwrap().into_iter().map(|f| f.url).collect();
        assert_eq!(
            urls,
            vec!["https://b.example/rss", "https://a.example/rss", "https://c.example/rss"]
        );
    }

    #[tokio::test]
    async fn test_update_feed_overwrites_all_views() {
        let db = test_db().await;
        let mut feed = db
            .create_feed(new_feed("https://example.com/feed.xml"))
            .await
            .unwrap()
            .into_feed();

        feed.title = "Renamed".to_owned();
        feed.last_fetched = Some(Utc::now());
        db.update_feed(&feed).await.unwrap();

        assert_eq!(db.get_feed(feed.id).await.unwrap(), Some(feed.clone()));
        assert_eq!(db.get_feed_by_url(&feed.url).await.unwrap(), Some(feed));
    }

    #[tokio::test]
    async fn test_update_feed_rejects_url_change() {
        let db = test_db().await;
        let mut feed = db
            .create_feed(new_feed("https://example.com/feed.xml"))
            .await
            .unwrap()
            .into_feed();

        feed.url = "https://elsewhere.example/feed.xml".to_owned();
        let result = db.update_feed(&feed).await;
        assert!(matches!(result, Err(DatabaseError::Invariant(_))));
        assert_eq!(db.get_feed_by_url("https://elsewhere.example/feed.xml").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_update_missing_feed_is_invariant_error() {
        let db = test_db().await;
        let feed = Feed {
            id: Uuid::new_v4(),
            url: "https://ghost.example".to_owned(),
            title: String::new(),
            description: String::new(),
            link: String::new(),
            last_fetched: None,
            created_at: Utc::now(),
        };
        assert!(matches!(db.update_feed(&feed).await, Err(DatabaseError::Invariant(_))));
    }
}
