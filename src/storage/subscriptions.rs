use chrono::Utc;

use super::kv::Record;
use super::schema::Database;
use super::types::{DatabaseError, FeedId, Subscription};

pub(crate) const SUBSCRIPTION: &str = "subscription";
pub(crate) const FEED_SUBSCRIBERS: &str = "feed_subscribers";

impl Record for Subscription {
    const NAMESPACE: &'static str = SUBSCRIPTION;

    fn primary_key(&self) -> Vec<String> {
        vec![SUBSCRIPTION.to_owned(), self.user_id.clone(), self.feed_id.to_string()]
    }

    fn index_keys(&self) -> Vec<Vec<String>> {
        vec![vec![FEED_SUBSCRIBERS.to_owned(), self.feed_id.to_string(), self.user_id.clone()]]
    }
}

impl Database {
    // ========================================================================
    // Subscription Operations
    // ========================================================================

    /// Subscribe `user_id` to a feed.
    ///
    /// Returns `None` if the subscription already exists.
    pub async fn create_subscription(&self, user_id: &str, feed_id: FeedId) -> Result<Option<Subscription>, DatabaseError> {
        if self.get_feed(feed_id).await?.is_none() {
            return Err(DatabaseError::Invariant(format!(
                "subscription references unknown feed {feed_id}"
            )));
        }

        let subscription = Subscription {
            user_id: user_id.to_owned(),
            feed_id,
            created_at: Utc::now(),
        };

        let mut write = self.atomic();
        write.insert_record(&subscription)?;
        Ok(write.commit().await?.then_some(subscription))
    }

    /// Remove a subscription. Returns `false` if there was none.
    pub async fn delete_subscription(&self, user_id: &str, feed_id: FeedId) -> Result<bool, DatabaseError> {
        let Some(subscription) = self.get_subscription(user_id, feed_id).await? else {
            return Ok(false);
        };

        let mut write = self.atomic();
        write.delete_record(&subscription)?;
        write.commit().await?;
        Ok(true)
    }

    pub async fn get_subscription(&self, user_id: &str, feed_id: FeedId) -> Result<Option<Subscription>, DatabaseError> {
        let feed_id = feed_id.to_string();
        self.get_record(&[user_id, feed_id.as_str()]).await
    }

    /// Subscriptions held by one user, oldest first
    pub async fn list_subscriptions_for_user(&self, user_id: &str) -> Result<Vec<Subscription>, DatabaseError> {
        let mut subscriptions: Vec<Subscription> = self.list_values(&[SUBSCRIPTION, user_id]).await?;
        subscriptions.sort_by_key(|s| s.created_at);
        Ok(subscriptions)
    }

    /// Users subscribed to one feed, oldest first
    pub async fn list_subscribers(&self, feed_id: FeedId) -> Result<Vec<Subscription>, DatabaseError> {
        let feed_id = feed_id.to_string();
        let mut subscriptions: Vec<Subscription> = self.list_values(&[FEED_SUBSCRIBERS, feed_id.as_str()]).await?;
        subscriptions.sort_by_key(|s| s.created_at);
        Ok(subscriptions)
    }
}
