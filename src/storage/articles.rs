use chrono::Utc;
use uuid::Uuid;

use super::kv::Record;
use super::schema::Database;
use super::types::{Article, ArticleId, ArticleInsert, DatabaseError, FeedId, NewArticle};

pub(crate) const ARTICLE: &str = "article";
pub(crate) const ARTICLE_BY_GUID: &str = "article_by_guid";
pub(crate) const FEED_ARTICLES: &str = "feed_articles";

impl Record for Article {
    const NAMESPACE: &'static str = ARTICLE;

    fn primary_key(&self) -> Vec<String> {
        vec![ARTICLE.to_owned(), self.id.to_string()]
    }

    fn index_keys(&self) -> Vec<Vec<String>> {
        let feed_id = self.feed_id.to_string();
        vec![
            vec![ARTICLE_BY_GUID.to_owned(), feed_id.clone(), self.guid.clone()],
            vec![FEED_ARTICLES.to_owned(), feed_id, self.id.to_string()],
        ]
    }
}

/// Most recent first; ties broken by id so listings are stable.
fn sort_recent_first(articles: &mut [Article]) {
    articles.sort_by(|a, b| {
        b.published_at
            .cmp(&a.published_at)
            .then_with(|| a.id.cmp(&b.id))
    });
}

impl Database {
    // ========================================================================
    // Article Operations
    // ========================================================================

    /// Store a new article unless its GUID is already known for the feed.
    ///
    /// All three views (by id, by GUID, by feed) are written in one commit,
    /// conditional on the GUID key being absent. Two writers ingesting the
    /// same entry concurrently therefore produce exactly one record; the
    /// loser gets `ArticleInsert::Duplicate` with the winner's article.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError::Invariant` if `new.feed_id` names no feed.
    pub async fn create_article(&self, new: NewArticle) -> Result<ArticleInsert, DatabaseError> {
        if self.get_feed(new.feed_id).await?.is_none() {
            return Err(DatabaseError::Invariant(format!(
                "article references unknown feed {}",
                new.feed_id
            )));
        }

        let article = Article {
            id: Uuid::new_v4(),
            feed_id: new.feed_id,
            title: new.title,
            content: new.content,
            url: new.url,
            published_at: new.published_at,
            guid: new.guid,
            created_at: Utc::now(),
        };

        let mut write = self.atomic();
        write.insert_record(&article)?;
        if write.commit().await? {
            return Ok(ArticleInsert::Created(article));
        }

        match self.get_article_by_guid(article.feed_id, &article.guid).await? {
            Some(existing) => Ok(ArticleInsert::Duplicate(existing)),
            None => Err(DatabaseError::Invariant(format!(
                "GUID {:?} of feed {} was claimed but has no record",
                article.guid, article.feed_id
            ))),
        }
    }

    pub async fn get_article(&self, id: ArticleId) -> Result<Option<Article>, DatabaseError> {
        self.get_record(&[&id.to_string()]).await
    }

    pub async fn get_article_by_guid(&self, feed_id: FeedId, guid: &str) -> Result<Option<Article>, DatabaseError> {
        let feed_id = feed_id.to_string();
        self.get(&[ARTICLE_BY_GUID, feed_id.as_str(), guid]).await
    }

    /// Articles of one feed, most recently published first
    pub async fn list_articles_for_feed(&self, feed_id: FeedId) -> Result<Vec<Article>, DatabaseError> {
        let feed_id = feed_id.to_string();
        let mut articles: Vec<Article> = self.list_values(&[FEED_ARTICLES, feed_id.as_str()]).await?;
        sort_recent_first(&mut articles);
        Ok(articles)
    }

    pub async fn count_articles_for_feed(&self, feed_id: FeedId) -> Result<usize, DatabaseError> {
        let feed_id = feed_id.to_string();
        self.count_prefix(&[FEED_ARTICLES, feed_id.as_str()]).await
    }

    /// The `limit` most recently published articles across all feeds
    pub async fn recent_articles(&self, limit: usize) -> Result<Vec<Article>, DatabaseError> {
        let mut articles: Vec<Article> = self.list_values(&[ARTICLE]).await?;
        sort_recent_first(&mut articles);
        articles.truncate(limit);
        Ok(articles)
    }
}
