use serde_json::Value;
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

use super::articles::ARTICLE;
use super::feeds::FEED;
use super::kv::{decode_key, encode_key, Record};
use super::schema::Database;
use super::social::{LIKE, REPLY, RETWEET};
use super::subscriptions::SUBSCRIPTION;
use super::types::{Article, ConsistencyReport, DatabaseError, Feed, Like, Reply, Retweet, Subscription};

enum Parent {
    Feed(Uuid),
    Article(Uuid),
}

/// Decodes a primary record, checks it sits under its own key, and records
/// the index entries it implies.
fn expect_indexes<R: Record>(
    key: &str,
    value: &str,
    expected: &mut HashMap<String, Value>,
) -> Result<(R, bool), DatabaseError> {
    let record: R = serde_json::from_str(value)?;
    let json = serde_json::to_value(&record)?;
    for index_key in record.index_keys() {
        expected.insert(encode_key(&index_key)?, json.clone());
    }
    let well_placed = encode_key(&record.primary_key())? == key;
    Ok((record, well_placed))
}

impl Database {
    /// Compare every primary record with the index entries it implies.
    ///
    /// Scans the whole store once and reports:
    /// - index entries that should exist but do not (missing)
    /// - index entries whose value differs from the primary record (mismatched)
    /// - index entries with no primary record behind them (orphaned)
    /// - records whose parent feed or article does not exist (dangling)
    ///
    /// Writes go through atomic commits, so a non-empty report points at
    /// external tampering or a bug rather than an interrupted write.
    pub async fn check_consistency(&self) -> Result<ConsistencyReport, DatabaseError> {
        let rows = self.scan_all().await?;

        let mut report = ConsistencyReport::default();
        let mut expected: HashMap<String, Value> = HashMap::new();
        let mut feeds = HashSet::new();
        let mut articles = HashSet::new();
        let mut references = Vec::new();
        let mut index_rows = Vec::new();

        for (key, value) in &rows {
            let Ok(parts) = decode_key(key) else {
                report.undecodable.push(key.clone());
                continue;
            };

            let decoded = match parts.first().map(String::as_str) {
                Some(FEED) => expect_indexes::<Feed>(key, value, &mut expected).map(|(f, ok)| {
                    feeds.insert(f.id);
                    (None, ok)
                }),
                Some(ARTICLE) => expect_indexes::<Article>(key, value, &mut expected).map(|(a, ok)| {
                    articles.insert(a.id);
                    (Some(Parent::Feed(a.feed_id)), ok)
                }),
                Some(SUBSCRIPTION) => expect_indexes::<Subscription>(key, value, &mut expected)
                    .map(|(s, ok)| (Some(Parent::Feed(s.feed_id)), ok)),
                Some(LIKE) => expect_indexes::<Like>(key, value, &mut expected)
                    .map(|(l, ok)| (Some(Parent::Article(l.article_id)), ok)),
                Some(RETWEET) => expect_indexes::<Retweet>(key, value, &mut expected)
                    .map(|(r, ok)| (Some(Parent::Article(r.article_id)), ok)),
                Some(REPLY) => expect_indexes::<Reply>(key, value, &mut expected)
                    .map(|(r, ok)| (Some(Parent::Article(r.article_id)), ok)),
                _ => {
                    index_rows.push((key, value));
                    continue;
                }
            };

            match decoded {
                Ok((parent, well_placed)) => {
                    report.primary_records += 1;
                    if !well_placed {
                        report.mismatched.push(key.clone());
                    }
                    if let Some(parent) = parent {
                        references.push((key, parent));
                    }
                }
                Err(_) => report.undecodable.push(key.clone()),
            }
        }

        report.index_entries = index_rows.len();
        for (key, value) in index_rows {
            match expected.remove(key.as_str()) {
                None => report.orphaned.push(key.clone()),
                Some(want) => match serde_json::from_str::<Value>(value) {
                    Ok(got) if got == want => {}
                    Ok(_) => report.mismatched.push(key.clone()),
                    Err(_) => report.undecodable.push(key.clone()),
                },
            }
        }

        report.missing = expected.into_keys().collect();
        report.missing.sort();

        for (key, parent) in references {
            let resolved = match parent {
                Parent::Feed(id) => feeds.contains(&id),
                Parent::Article(id) => articles.contains(&id),
            };
            if !resolved {
                report.dangling.push(key.clone());
            }
        }

        tracing::debug!(
            primary = report.primary_records,
            index = report.index_entries,
            missing = report.missing.len(),
            mismatched = report.mismatched.len(),
            orphaned = report.orphaned.len(),
            dangling = report.dangling.len(),
            undecodable = report.undecodable.len(),
            is_consistent = report.is_consistent(),
            "Index consistency check"
        );

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{NewArticle, NewFeed};
    use chrono::Utc;

    async fn populated_db() -> (Database, Feed, Article) {
        let db = Database::open(":memory:").await.unwrap();
        let feed = db
            .create_feed(NewFeed {
                url: "https://example.com/rss".to_owned(),
                title: "F".to_owned(),
                description: String::new(),
                link: String::new(),
            })
            .await
            .unwrap()
            .into_feed();
        let article = db
            .create_article(NewArticle {
                feed_id: feed.id,
                title: "A".to_owned(),
                content: String::new(),
                url: "https://example.com/a".to_owned(),
                published_at: Utc::now(),
                guid: "a".to_owned(),
            })
            .await
            .unwrap()
            .article()
            .clone();
        db.create_subscription("alice", feed.id).await.unwrap();
        db.like_article("alice", article.id).await.unwrap();
        db.create_reply("alice", article.id, "hi").await.unwrap();
        (db, feed, article)
    }

    #[tokio::test]
    async fn test_consistency_empty() {
        let db = Database::open(":memory:").await.unwrap();
        let report = db.check_consistency().await.unwrap();
        assert!(report.is_consistent());
        assert_eq!(report.primary_records, 0);
        assert_eq!(report.index_entries, 0);
    }

    #[tokio::test]
    async fn test_consistency_after_normal_writes() {
        let (db, _, _) = populated_db().await;
        let report = db.check_consistency().await.unwrap();
        assert!(report.is_consistent(), "{report:?}");
        // feed, article, subscription, like, reply
        assert_eq!(report.primary_records, 5);
        // feed_by_url, article_by_guid, feed_articles, feed_subscribers, article_likes, article_replies
        assert_eq!(report.index_entries, 6);
    }

    #[tokio::test]
    async fn test_detects_missing_index_entry() {
        let (db, feed, article) = populated_db().await;
        let mut write = db.atomic();
        write
            .delete(&["article_by_guid", feed.id.to_string().as_str(), article.guid.as_str()])
            .unwrap();
        write.commit().await.unwrap();

        let report = db.check_consistency().await.unwrap();
        assert!(!report.is_consistent());
        assert_eq!(report.missing.len(), 1);
    }

    #[tokio::test]
    async fn test_detects_mismatched_and_orphaned_entries() {
        let (db, feed, _) = populated_db().await;

        let mut stale = feed.clone();
        stale.title = "Stale".to_owned();
        let mut write = db.atomic();
        write.set(&["feed_by_url", feed.url.as_str()], &stale).unwrap();
        write.set(&["feed_by_url", "https://gone.example"], &stale).unwrap();
        write.commit().await.unwrap();

        let report = db.check_consistency().await.unwrap();
        assert_eq!(report.mismatched.len(), 1);
        assert_eq!(report.orphaned.len(), 1);
        assert!(report.missing.is_empty());
    }

    #[tokio::test]
    async fn test_detects_dangling_reference() {
        let (db, feed, _) = populated_db().await;
        let mut write = db.atomic();
        write.delete_record(&feed).unwrap();
        write.commit().await.unwrap();

        let report = db.check_consistency().await.unwrap();
        // the article and the subscription both point at the removed feed
        assert_eq!(report.dangling.len(), 2);
    }
}
