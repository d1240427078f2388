use std::time::Duration;
use thiserror::Error;

use crate::feed::{FeedClient, FetchError, NormalizedEntry, NormalizedFeed, UNKNOWN_FEED_TITLE};
use crate::storage::{ArticleInsert, Database, DatabaseError, Feed, FeedId, NewArticle};

pub const DEFAULT_INTER_FEED_DELAY: Duration = Duration::from_secs(1);

/// Failure to update one feed. Never aborts a pass.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Feed not found: {0}")]
    FeedNotFound(FeedId),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Store(#[from] DatabaseError),
}

/// Outcome of one walk over every known feed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PassReport {
    /// Feeds attempted
    pub feeds: usize,
    /// Feeds fetched and stored successfully
    pub updated: usize,
    /// Feeds whose update failed, with the error message
    pub failed: Vec<(FeedId, String)>,
    pub new_articles: usize,
}

/// Fetches feeds and persists their new entries.
///
/// Holds cheap clones of the store and the HTTP client, so it can be handed
/// to a background task and to on-demand callers at the same time.
#[derive(Debug, Clone)]
pub struct Ingestor {
    db: Database,
    client: FeedClient,
    inter_feed_delay: Duration,
}

impl Ingestor {
    pub fn new(db: Database, client: FeedClient) -> Self {
        Self {
            db,
            client,
            inter_feed_delay: DEFAULT_INTER_FEED_DELAY,
        }
    }

    /// Pause between consecutive feeds within a pass.
    pub fn with_inter_feed_delay(mut self, delay: Duration) -> Self {
        self.inter_feed_delay = delay;
        self
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn client(&self) -> &FeedClient {
        &self.client
    }

    /// Fetch one feed, store entries not seen before, and refresh its metadata.
    ///
    /// Returns the number of new articles. The feed's title, description and
    /// link are overwritten with the fetched values (keeping the stored value
    /// where the fetched one is blank) and `last_fetched` is set, even when no
    /// entry was new. If the fetch fails nothing is written.
    ///
    /// # Errors
    ///
    /// - [`IngestError::FeedNotFound`] - no feed with this id
    /// - [`IngestError::Fetch`] - network, HTTP or parse failure
    /// - [`IngestError::Store`] - the store rejected a write
    pub async fn update_feed(&self, feed_id: FeedId) -> Result<usize, IngestError> {
        let feed = self
            .db
            .get_feed(feed_id)
            .await?
            .ok_or(IngestError::FeedNotFound(feed_id))?;

        let parsed = self.client.fetch(&feed.url).await?;
        let NormalizedFeed {
            title,
            description,
            link,
            entries,
            ..
        } = parsed;

        let new_articles = self.store_entries(&feed, entries).await?;

        let refreshed = Feed {
            title: if title.trim().is_empty() || title == UNKNOWN_FEED_TITLE {
                feed.title.clone()
            } else {
                title
            },
            description: prefer_fresh(description, &feed.description),
            link: prefer_fresh(link, &feed.link),
            last_fetched: Some(chrono::Utc::now()),
            ..feed
        };
        self.db.update_feed(&refreshed).await?;

        tracing::info!(
            feed_id = %refreshed.id,
            title = %refreshed.title,
            new_articles = new_articles,
            "Feed updated"
        );
        Ok(new_articles)
    }

    /// Persist entries whose GUID is not yet known for `feed`.
    pub(crate) async fn store_entries(&self, feed: &Feed, entries: Vec<NormalizedEntry>) -> Result<usize, DatabaseError> {
        let mut created = 0;
        for entry in entries {
            // Cheap skip before building the conditional write
            if self.db.get_article_by_guid(feed.id, &entry.guid).await?.is_some() {
                tracing::debug!(feed_id = %feed.id, guid = %entry.guid, "Entry already stored");
                continue;
            }

            match self.db.create_article(NewArticle::from_entry(feed.id, entry)).await? {
                ArticleInsert::Created(_) => created += 1,
                ArticleInsert::Duplicate(existing) => {
                    tracing::debug!(
                        feed_id = %feed.id,
                        guid = %existing.guid,
                        "Entry stored concurrently by another writer"
                    );
                }
            }
        }
        Ok(created)
    }

    /// Update every known feed in turn.
    ///
    /// Feeds are processed sequentially with the inter-feed delay between
    /// them. A failing feed is logged and recorded in the report; the pass
    /// continues with the next one.
    ///
    /// # Errors
    ///
    /// Only listing the feeds can fail the pass as a whole.
    pub async fn run_pass(&self) -> Result<PassReport, DatabaseError> {
        let feeds = self.db.list_feeds().await?;
        tracing::info!(feeds = feeds.len(), "Starting feed update pass");

        let mut report = PassReport {
            feeds: feeds.len(),
            ..PassReport::default()
        };

        for (i, feed) in feeds.iter().enumerate() {
            if i > 0 && !self.inter_feed_delay.is_zero() {
                tokio::time::sleep(self.inter_feed_delay).await;
            }

            match self.update_feed(feed.id).await {
                Ok(count) => {
                    report.updated += 1;
                    report.new_articles += count;
                }
                Err(e) => {
                    tracing::warn!(feed_id = %feed.id, url = %feed.url, error = %e, "Feed update failed");
                    report.failed.push((feed.id, e.to_string()));
                }
            }
        }

        tracing::info!(
            feeds = report.feeds,
            updated = report.updated,
            failed = report.failed.len(),
            new_articles = report.new_articles,
            "Feed update pass complete"
        );
        Ok(report)
    }
}

fn prefer_fresh(fresh: String, stored: &str) -> String {
    if fresh.trim().is_empty() {
        stored.to_owned()
    } else {
        fresh
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::FeedClientOptions;
    use crate::storage::NewFeed;
    use crate::util::HostPolicy;
    use pretty_assertions::assert_eq;
    use uuid::Uuid;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn rss(title: &str, items: &[(&str, &str)]) -> String {
        let items: String = items
            .iter()
            .map(|(guid, item_title)| {
                format!(
                    "<item><title>{item_title}</title><link>http://x/{guid}</link><guid>{guid}</guid>\
                     <pubDate>Mon, 01 Jan 2024 00:00:00 GMT</pubDate></item>"
                )
            })
            .collect();
        format!(
            "<?xml version=\"1.0\"?><rss version=\"2.0\"><channel><title>{title}</title>\
             <description>About</description><link>http://x/</link>{items}</channel></rss>"
        )
    }

    fn rss_response(body: String) -> ResponseTemplate {
        ResponseTemplate::new(200)
            .insert_header("content-type", "application/rss+xml")
            .set_body_string(body)
    }

    fn test_client(timeout: Duration) -> FeedClient {
        FeedClient::new(FeedClientOptions {
            timeout,
            host_policy: HostPolicy::AllowPrivate,
            ..FeedClientOptions::default()
        })
        .unwrap()
    }

    async fn ingestor() -> Ingestor {
        let db = Database::open(":memory:").await.unwrap();
        Ingestor::new(db, test_client(Duration::from_secs(5))).with_inter_feed_delay(Duration::ZERO)
    }

    async fn add_feed(ingestor: &Ingestor, url: String) -> Feed {
        ingestor
            .database()
            .create_feed(NewFeed {
                url,
                title: "Stored title".to_owned(),
                description: "Stored description".to_owned(),
                link: String::new(),
            })
            .await
            .unwrap()
            .into_feed()
    }

    #[tokio::test]
    async fn test_reingesting_unchanged_feed_adds_nothing() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/feed.xml"))
            .respond_with(rss_response(rss("T", &[("g1", "A"), ("g2", "B")])))
            .mount(&server)
            .await;

        let ingestor = ingestor().await;
        let feed = add_feed(&ingestor, format!("{}/feed.xml", server.uri())).await;

        assert_eq!(ingestor.update_feed(feed.id).await.unwrap(), 2);
        assert_eq!(ingestor.update_feed(feed.id).await.unwrap(), 0);
        assert_eq!(ingestor.database().count_articles_for_feed(feed.id).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_changed_title_for_same_guid_is_not_duplicated() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/feed.xml"))
            .respond_with(rss_response(rss("T", &[("g1", "Original")])))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/feed.xml"))
            .respond_with(rss_response(rss("T", &[("g1", "Edited")])))
            .mount(&server)
            .await;

        let ingestor = ingestor().await;
        let feed = add_feed(&ingestor, format!("{}/feed.xml", server.uri())).await;

        assert_eq!(ingestor.update_feed(feed.id).await.unwrap(), 1);
        assert_eq!(ingestor.update_feed(feed.id).await.unwrap(), 0);

        let articles = ingestor.database().list_articles_for_feed(feed.id).await.unwrap();
        assert_eq!(articles.len(), 1);
        assert_eq!(articles[0].title, "Original");
    }

    #[tokio::test]
    async fn test_update_refreshes_metadata_and_last_fetched() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/feed.xml"))
            .respond_with(rss_response(
                "<rss><channel><title>Fresh title</title></channel></rss>".to_owned(),
            ))
            .mount(&server)
            .await;

        let ingestor = ingestor().await;
        let feed = add_feed(&ingestor, format!("{}/feed.xml", server.uri())).await;
        assert!(feed.last_fetched.is_none());

        assert_eq!(ingestor.update_feed(feed.id).await.unwrap(), 0);

        let stored = ingestor.database().get_feed(feed.id).await.unwrap().unwrap();
        assert_eq!(stored.title, "Fresh title");
        // blank description in the fetched feed keeps the stored one
        assert_eq!(stored.description, "Stored description");
        assert!(stored.last_fetched.is_some());
    }

    #[tokio::test]
    async fn test_failed_fetch_leaves_feed_untouched() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let ingestor = ingestor().await;
        let feed = add_feed(&ingestor, format!("{}/feed.xml", server.uri())).await;

        let err = ingestor.update_feed(feed.id).await.unwrap_err();
        assert!(matches!(err, IngestError::Fetch(FetchError::HttpStatus(500))));
        assert_eq!(ingestor.database().get_feed(feed.id).await.unwrap(), Some(feed));
    }

    #[tokio::test]
    async fn test_update_unknown_feed() {
        let ingestor = ingestor().await;
        let id = Uuid::new_v4();
        assert!(matches!(
            ingestor.update_feed(id).await,
            Err(IngestError::FeedNotFound(missing)) if missing == id
        ));
    }

    #[tokio::test]
    async fn test_pass_continues_past_timed_out_feed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/one.xml"))
            .respond_with(rss_response(rss("One", &[("1a", "A")])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/two.xml"))
            .respond_with(rss_response(rss("Two", &[("2a", "A")])).set_delay(Duration::from_secs(2)))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/three.xml"))
            .respond_with(rss_response(rss("Three", &[("3a", "A"), ("3b", "B")])))
            .mount(&server)
            .await;

        let db = Database::open(":memory:").await.unwrap();
        let ingestor =
            Ingestor::new(db, test_client(Duration::from_millis(200))).with_inter_feed_delay(Duration::ZERO);
        let _one = add_feed(&ingestor, format!("{}/one.xml", server.uri())).await;
        let two = add_feed(&ingestor, format!("{}/two.xml", server.uri())).await;
        let three = add_feed(&ingestor, format!("{}/three.xml", server.uri())).await;

        let report = ingestor.run_pass().await.unwrap();
        assert_eq!(report.feeds, 3);
        assert_eq!(report.updated, 2);
        assert_eq!(report.new_articles, 3);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, two.id);
        assert_eq!(report.failed[0].1, FetchError::Timeout.to_string());

        assert_eq!(ingestor.database().count_articles_for_feed(three.id).await.unwrap(), 2);
        assert!(ingestor.database().get_feed(two.id).await.unwrap().unwrap().last_fetched.is_none());
    }

    #[tokio::test]
    async fn test_pass_over_empty_store() {
        let ingestor = ingestor().await;
        assert_eq!(ingestor.run_pass().await.unwrap(), PassReport::default());
    }
}
