//! Tuple-keyed JSON records on top of the `kv` table.
//!
//! A key is a tuple of strings, stored as its JSON array encoding
//! (`["feed_articles","<feed id>","<article id>"]`). All children of a
//! parent tuple share the encoded prefix `["feed_articles","<feed id>",`,
//! and because `-` sorts immediately after `,` the children occupy the
//! half-open range `[prefix, prefix with its final ',' replaced by '-')`.

use serde::{de::DeserializeOwned, Serialize};

use super::schema::Database;
use super::types::DatabaseError;

/// A stored entity: one primary record plus the index entries derived from it.
///
/// Every index entry holds a full copy of the entity, so a lookup through any
/// index needs a single read.
pub(crate) trait Record: Serialize + DeserializeOwned {
    /// First key part of the primary record, also used to recognise it when scanning.
    const NAMESPACE: &'static str;

    fn primary_key(&self) -> Vec<String>;

    fn index_keys(&self) -> Vec<Vec<String>>;
}

pub(crate) fn encode_key<S: AsRef<str>>(parts: &[S]) -> Result<String, DatabaseError> {
    let parts: Vec<&str> = parts.iter().map(|p| p.as_ref()).collect();
    Ok(serde_json::to_string(&parts)?)
}

pub(crate) fn decode_key(encoded: &str) -> Result<Vec<String>, DatabaseError> {
    Ok(serde_json::from_str(encoded)?)
}

/// `[lower, upper)` bounds of every key strictly under `parent`.
pub(crate) fn prefix_range<S: AsRef<str>>(parent: &[S]) -> Result<(String, String), DatabaseError> {
    let encoded = encode_key(parent)?;
    // `["a","b"]` -> `["a","b",`
    let lower = match encoded.strip_suffix(']') {
        Some(open) if open.len() > 1 => format!("{open},"),
        _ => String::from("["),
    };
    let upper = match lower.strip_suffix(',') {
        Some(stem) => format!("{stem}-"),
        // `[` -> `\` covers every array key
        None => String::from("\\"),
    };
    Ok((lower, upper))
}

enum Op {
    Insert { key: String, value: String },
    Set { key: String, value: String },
    Delete { key: String },
}

/// A batch of writes committed in one SQLite transaction.
///
/// `insert` is conditional: if any inserted key already exists, the whole
/// batch is rolled back and [`commit`](Self::commit) returns `Ok(false)`.
#[must_use = "an AtomicWrite does nothing until committed"]
pub struct AtomicWrite<'a> {
    db: &'a Database,
    ops: Vec<Op>,
}

impl<'a> AtomicWrite<'a> {
    pub(crate) fn new(db: &'a Database) -> Self {
        Self { db, ops: Vec::new() }
    }

    /// Writes `value` under `key`, failing the batch if the key exists.
    pub fn insert<S: AsRef<str>, T: Serialize + ?Sized>(&mut self, key: &[S], value: &T) -> Result<&mut Self, DatabaseError> {
        self.ops.push(Op::Insert {
            key: encode_key(key)?,
            value: serde_json::to_string(value)?,
        });
        Ok(self)
    }

    /// Writes `value` under `key`, replacing any previous value.
    pub fn set<S: AsRef<str>, T: Serialize + ?Sized>(&mut self, key: &[S], value: &T) -> Result<&mut Self, DatabaseError> {
        self.ops.push(Op::Set {
            key: encode_key(key)?,
            value: serde_json::to_string(value)?,
        });
        Ok(self)
    }

    pub fn delete<S: AsRef<str>>(&mut self, key: &[S]) -> Result<&mut Self, DatabaseError> {
        self.ops.push(Op::Delete { key: encode_key(key)? });
        Ok(self)
    }

    /// Queues the primary record and every index entry of `record`.
    pub(crate) fn insert_record<R: Record>(&mut self, record: &R) -> Result<&mut Self, DatabaseError> {
        self.insert(&record.primary_key(), record)?;
        for key in record.index_keys() {
            self.insert(&key, record)?;
        }
        Ok(self)
    }

    /// Overwrites the primary record and every index entry of `record`.
    pub(crate) fn set_record<R: Record>(&mut self, record: &R) -> Result<&mut Self, DatabaseError> {
        self.set(&record.primary_key(), record)?;
        for key in record.index_keys() {
            self.set(&key, record)?;
        }
        Ok(self)
    }

    pub(crate) fn delete_record<R: Record>(&mut self, record: &R) -> Result<&mut Self, DatabaseError> {
        self.delete(&record.primary_key())?;
        for key in record.index_keys() {
            self.delete(&key)?;
        }
        Ok(self)
    }

    /// Applies the batch. Returns `Ok(false)` if a conditional insert found
    /// its key taken, in which case nothing was written.
    pub async fn commit(self) -> Result<bool, DatabaseError> {
        let mut tx = self.db.pool.begin().await.map_err(DatabaseError::Other)?;

        // Conditional inserts run first so a lost race touches nothing else
        let (inserts, rest): (Vec<_>, Vec<_>) =
            self.ops.into_iter().partition(|op| matches!(op, Op::Insert { .. }));

        for op in inserts.into_iter().chain(rest) {
            match op {
                Op::Insert { key, value } => {
                    let result = sqlx::query("INSERT INTO kv (key, value) VALUES (?, ?) ON CONFLICT(key) DO NOTHING")
                        .bind(key.as_str())
                        .bind(value)
                        .execute(&mut *tx)
                        .await
                        .map_err(DatabaseError::Other)?;
                    if result.rows_affected() == 0 {
                        tx.rollback().await.map_err(DatabaseError::Other)?;
                        tracing::debug!(key = %key, "Conditional insert lost, batch rolled back");
                        return Ok(false);
                    }
                }
                Op::Set { key, value } => {
                    sqlx::query("INSERT INTO kv (key, value) VALUES (?, ?) ON CONFLICT(key) DO UPDATE SET value = excluded.value")
                        .bind(key)
                        .bind(value)
                        .execute(&mut *tx)
                        .await
                        .map_err(DatabaseError::Other)?;
                }
                Op::Delete { key } => {
                    sqlx::query("DELETE FROM kv WHERE key = ?")
                        .bind(key)
                        .execute(&mut *tx)
                        .await
                        .map_err(DatabaseError::Other)?;
                }
            }
        }

        tx.commit().await.map_err(DatabaseError::Other)?;
        Ok(true)
    }
}

impl Database {
    /// Starts a batch of writes to be committed atomically.
    pub fn atomic(&self) -> AtomicWrite<'_> {
        AtomicWrite::new(self)
    }

    /// Reads and decodes the value stored under `key`.
    pub async fn get<S: AsRef<str>, T: DeserializeOwned>(&self, key: &[S]) -> Result<Option<T>, DatabaseError> {
        let row: Option<(String,)> = sqlx::query_as("SELECT value FROM kv WHERE key = ?")
            .bind(encode_key(key)?)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::Other)?;

        row.map(|(value,)| serde_json::from_str(&value))
            .transpose()
            .map_err(DatabaseError::from)
    }

    /// Lists every record whose key extends `parent`, in key order.
    pub async fn list_prefix<S: AsRef<str>, T: DeserializeOwned>(&self, parent: &[S]) -> Result<Vec<(Vec<String>, T)>, DatabaseError> {
        let (lower, upper) = prefix_range(parent)?;
        let rows: Vec<(String, String)> =
            sqlx::query_as("SELECT key, value FROM kv WHERE key >= ? AND key < ? ORDER BY key")
                .bind(lower)
                .bind(upper)
                .fetch_all(&self.pool)
                .await
                .map_err(DatabaseError::Other)?;

        rows.into_iter()
            .map(|(key, value)| -> Result<_, DatabaseError> {
                Ok((decode_key(&key)?, serde_json::from_str(&value)?))
            })
            .collect()
    }

    /// Counts the keys under `parent` without decoding values.
    pub async fn count_prefix<S: AsRef<str>>(&self, parent: &[S]) -> Result<usize, DatabaseError> {
        let (lower, upper) = prefix_range(parent)?;
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM kv WHERE key >= ? AND key < ?")
            .bind(lower)
            .bind(upper)
            .fetch_one(&self.pool)
            .await
            .map_err(DatabaseError::Other)?;
        Ok(usize::try_from(count.0).unwrap_or_default())
    }

    /// Every raw `(key, value)` row, in key order.
    pub(crate) async fn scan_all(&self) -> Result<Vec<(String, String)>, DatabaseError> {
        sqlx::query_as("SELECT key, value FROM kv ORDER BY key")
            .fetch_all(&self.pool)
            .await
            .map_err(DatabaseError::Other)
    }

    /// Loads a record through its primary namespace.
    pub(crate) async fn get_record<R: Record>(&self, id_parts: &[&str]) -> Result<Option<R>, DatabaseError> {
        let mut key = vec![R::NAMESPACE];
        key.extend_from_slice(id_parts);
        self.get(key.as_slice()).await
    }

    /// Values under `parent`, discarding keys.
    pub(crate) async fn list_values<T: DeserializeOwned>(&self, parent: &[&str]) -> Result<Vec<T>, DatabaseError> {
        Ok(self
            .list_prefix(parent)
            .await?
            .into_iter()
            .map(|(_, value)| value)
            .collect())
    }
}
