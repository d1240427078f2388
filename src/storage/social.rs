//! Per-user reactions to articles: likes, retweets and replies.
//!
//! The records themselves come from the web layer; the store keeps them
//! reachable both from the user side and from the article side.

use chrono::Utc;
use uuid::Uuid;

use super::kv::Record;
use super::schema::Database;
use super::types::{ArticleId, DatabaseError, Like, Reply, ReplyId, Retweet};

pub(crate) const LIKE: &str = "like";
pub(crate) const ARTICLE_LIKES: &str = "article_likes";
pub(crate) const RETWEET: &str = "retweet";
pub(crate) const ARTICLE_RETWEETS: &str = "article_retweets";
pub(crate) const REPLY: &str = "reply";
pub(crate) const ARTICLE_REPLIES: &str = "article_replies";

impl Record for Like {
    const NAMESPACE: &'static str = LIKE;

    fn primary_key(&self) -> Vec<String> {
        vec![LIKE.to_owned(), self.user_id.clone(), self.article_id.to_string()]
    }

    fn index_keys(&self) -> Vec<Vec<String>> {
        vec![vec![ARTICLE_LIKES.to_owned(), self.article_id.to_string(), self.user_id.clone()]]
    }
}

impl Record for Retweet {
    const NAMESPACE: &'static str = RETWEET;

    fn primary_key(&self) -> Vec<String> {
        vec![RETWEET.to_owned(), self.user_id.clone(), self.article_id.to_string()]
    }

    fn index_keys(&self) -> Vec<Vec<String>> {
        vec![vec![ARTICLE_RETWEETS.to_owned(), self.article_id.to_string(), self.user_id.clone()]]
    }
}

impl Record for Reply {
    const NAMESPACE: &'static str = REPLY;

    fn primary_key(&self) -> Vec<String> {
        vec![REPLY.to_owned(), self.id.to_string()]
    }

    fn index_keys(&self) -> Vec<Vec<String>> {
        vec![vec![ARTICLE_REPLIES.to_owned(), self.article_id.to_string(), self.id.to_string()]]
    }
}

impl Database {
    async fn require_article(&self, article_id: ArticleId) -> Result<(), DatabaseError> {
        match self.get_article(article_id).await? {
            Some(_) => Ok(()),
            None => Err(DatabaseError::Invariant(format!("unknown article {article_id}"))),
        }
    }

    // ========================================================================
    // Likes
    // ========================================================================

    /// Returns `None` if the user already liked the article.
    pub async fn like_article(&self, user_id: &str, article_id: ArticleId) -> Result<Option<Like>, DatabaseError> {
        self.require_article(article_id).await?;
        let like = Like {
            user_id: user_id.to_owned(),
            article_id,
            created_at: Utc::now(),
        };
        let mut write = self.atomic();
        write.insert_record(&like)?;
        Ok(write.commit().await?.then_some(like))
    }

    pub async fn unlike_article(&self, user_id: &str, article_id: ArticleId) -> Result<bool, DatabaseError> {
        let Some(like) = self.get_like(user_id, article_id).await? else {
            return Ok(false);
        };
        let mut write = self.atomic();
        write.delete_record(&like)?;
        write.commit().await
    }

    pub async fn get_like(&self, user_id: &str, article_id: ArticleId) -> Result<Option<Like>, DatabaseError> {
        let article_id = article_id.to_string();
        self.get_record(&[user_id, article_id.as_str()]).await
    }

    pub async fn list_likes_for_article(&self, article_id: ArticleId) -> Result<Vec<Like>, DatabaseError> {
        let article_id = article_id.to_string();
        self.list_values(&[ARTICLE_LIKES, article_id.as_str()]).await
    }

    // ========================================================================
    // Retweets
    // ========================================================================

    /// Returns `None` if the user already retweeted the article.
    pub async fn retweet_article(
        &self,
        user_id: &str,
        article_id: ArticleId,
        comment: Option<String>,
    ) -> Result<Option<Retweet>, DatabaseError> {
        self.require_article(article_id).await?;
        let retweet = Retweet {
            user_id: user_id.to_owned(),
            article_id,
            comment: comment.filter(|c| !c.trim().is_empty()),
            created_at: Utc::now(),
        };
        let mut write = self.atomic();
        write.insert_record(&retweet)?;
        Ok(write.commit().await?.then_some(retweet))
    }

    pub async fn unretweet_article(&self, user_id: &str, article_id: ArticleId) -> Result<bool, DatabaseError> {
        let Some(retweet) = self.get_retweet(user_id, article_id).await? else {
            return Ok(false);
        };
        let mut write = self.atomic();
        write.delete_record(&retweet)?;
        write.commit().await
    }

    pub async fn get_retweet(&self, user_id: &str, article_id: ArticleId) -> Result<Option<Retweet>, DatabaseError> {
        let article_id = article_id.to_string();
        self.get_record(&[user_id, article_id.as_str()]).await
    }

    pub async fn list_retweets_for_article(&self, article_id: ArticleId) -> Result<Vec<Retweet>, DatabaseError> {
        let article_id = article_id.to_string();
        self.list_values(&[ARTICLE_RETWEETS, article_id.as_str()]).await
    }

    // ========================================================================
    // Replies
    // ========================================================================

    pub async fn create_reply(&self, user_id: &str, article_id: ArticleId, content: &str) -> Result<Reply, DatabaseError> {
        self.require_article(article_id).await?;
        let reply = Reply {
            id: Uuid::new_v4(),
            user_id: user_id.to_owned(),
            article_id,
            content: content.to_owned(),
            created_at: Utc::now(),
        };
        let mut write = self.atomic();
        write.insert_record(&reply)?;
        if !write.commit().await? {
            return Err(DatabaseError::Invariant(format!("reply id {} collided", reply.id)));
        }
        Ok(reply)
    }

    pub async fn delete_reply(&self, id: ReplyId) -> Result<bool, DatabaseError> {
        let Some(reply) = self.get_reply(id).await? else {
            return Ok(false);
        };
        let mut write = self.atomic();
        write.delete_record(&reply)?;
        write.commit().await
    }

    pub async fn get_reply(&self, id: ReplyId) -> Result<Option<Reply>, DatabaseError> {
        self.get_record(&[&id.to_string()]).await
    }

    /// Replies to one article in the order they were written
    pub async fn list_replies_for_article(&self, article_id: ArticleId) -> Result<Vec<Reply>, DatabaseError> {
        let article_id = article_id.to_string();
        let mut replies: Vec<Reply> = self.list_values(&[ARTICLE_REPLIES, article_id.as_str()]).await?;
        replies.sort_by_key(|r| r.created_at);
        Ok(replies)
    }
}
