mod articles;
mod consistency;
mod feeds;
mod kv;
mod schema;
mod social;
mod subscriptions;
mod types;

pub use kv::AtomicWrite;
pub use schema::Database;
pub use types::{
    Article, ArticleId, ArticleInsert, ConsistencyReport, DatabaseError, Feed, FeedId, FeedInsert, Like,
    NewArticle, NewFeed, Reply, ReplyId, Retweet, Subscription,
};
