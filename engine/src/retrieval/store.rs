//! Local vector index over rusqlite + sqlite-vec.
//!
//! A collection is a pair of tables: `{name}_passages` holds the payload,
//! `{name}_vec` is a vec0 virtual table holding the embeddings (cosine
//! metric). Rows are joined by rowid.
//!
//! All [`VecStore`] methods are synchronous — async callers go through the
//! [`VectorIndex`] handle, which routes every call over
//! `tokio::task::spawn_blocking`.

use std::sync::{Arc, Mutex, Once};

use rusqlite::{Connection, OptionalExtension};
use zerocopy::AsBytes;

use shared_types::RetrievedPassage;

#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("invalid collection name: {0}")]
    InvalidCollection(String),

    #[error("index task failed: {0}")]
    Task(String),
}

/// Payload stored alongside each embedded passage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassagePayload {
    pub title: String,
    pub content: String,
    pub media_url: Option<String>,
    pub category: String,
}

/// Register sqlite-vec as an auto-loaded extension for every new connection.
fn register_sqlite_vec() {
    static REGISTER: Once = Once::new();
    REGISTER.call_once(|| unsafe {
        rusqlite::ffi::sqlite3_auto_extension(Some(std::mem::transmute(
            sqlite_vec::sqlite3_vec_init as *const (),
        )));
    });
}

/// Collection names end up in DDL, so restrict them to a safe identifier set.
fn validate_collection(name: &str) -> Result<(), IndexError> {
    let ok = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
    if ok {
        Ok(())
    } else {
        Err(IndexError::InvalidCollection(name.to_string()))
    }
}

// ============================================================================
// Store
// ============================================================================

/// Thin wrapper around a rusqlite Connection with the sqlite-vec extension.
pub struct VecStore {
    conn: Connection,
}

impl VecStore {
    /// Open (or create) the store at the given SQLite path.
    /// Use `":memory:"` for in-process test stores.
    pub fn open(path: &str) -> Result<Self, IndexError> {
        register_sqlite_vec();

        let conn = if path == ":memory:" {
            Connection::open_in_memory()?
        } else {
            Connection::open(path)?
        };

        // WAL mode so concurrent readers never block on the seeding writer.
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;

        Ok(VecStore { conn })
    }

    /// Whether the named collection has been created (i.e. seeded) already.
    pub fn collection_exists(&self, name: &str) -> Result<bool, IndexError> {
        validate_collection(name)?;
        let found: Option<i64> = self
            .conn
            .query_row(
                "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1 LIMIT 1",
                rusqlite::params![format!("{name}_vec")],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Create the payload + embedding tables for a collection.
    pub fn create_collection(&self, name: &str, dimension: usize) -> Result<(), IndexError> {
        validate_collection(name)?;
        self.conn.execute_batch(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {name}_passages (
                rowid INTEGER PRIMARY KEY AUTOINCREMENT,
                passage_id TEXT NOT NULL UNIQUE,
                title TEXT NOT NULL,
                content TEXT NOT NULL,
                media_url TEXT,
                category TEXT NOT NULL
            );
            CREATE VIRTUAL TABLE IF NOT EXISTS {name}_vec USING vec0(
                embedding float[{dimension}] distance_metric=cosine
            );
            "#
        ))?;
        Ok(())
    }

    /// Insert or replace one passage and its embedding, keyed by passage id.
    pub fn upsert(
        &self,
        name: &str,
        passage_id: &str,
        vector: &[f32],
        payload: &PassagePayload,
    ) -> Result<(), IndexError> {
        validate_collection(name)?;

        let existing: Option<i64> = self
            .conn
            .query_row(
                &format!("SELECT rowid FROM {name}_passages WHERE passage_id = ?1"),
                rusqlite::params![passage_id],
                |row| row.get(0),
            )
            .optional()?;

        let rowid = match existing {
            Some(rowid) => {
                self.conn.execute(
                    &format!(
                        "UPDATE {name}_passages
                         SET title = ?1, content = ?2, media_url = ?3, category = ?4
                         WHERE rowid = ?5"
                    ),
                    rusqlite::params![
                        payload.title,
                        payload.content,
                        payload.media_url,
                        payload.category,
                        rowid
                    ],
                )?;
                // vec0 has no ON CONFLICT; replace the embedding explicitly.
                self.conn.execute(
                    &format!("DELETE FROM {name}_vec WHERE rowid = ?1"),
                    rusqlite::params![rowid],
                )?;
                rowid
            }
            None => {
                self.conn.execute(
                    &format!(
                        "INSERT INTO {name}_passages(passage_id, title, content, media_url, category)
                         VALUES (?1, ?2, ?3, ?4, ?5)"
                    ),
                    rusqlite::params![
                        passage_id,
                        payload.title,
                        payload.content,
                        payload.media_url,
                        payload.category
                    ],
                )?;
                self.conn.last_insert_rowid()
            }
        };

        self.conn.execute(
            &format!("INSERT INTO {name}_vec(rowid, embedding) VALUES (?1, ?2)"),
            rusqlite::params![rowid, vector.as_bytes()],
        )?;

        Ok(())
    }

    /// Whether a passage with this id exists in the collection.
    pub fn passage_exists(&self, name: &str, passage_id: &str) -> Result<bool, IndexError> {
        validate_collection(name)?;
        let found: Option<i64> = self
            .conn
            .query_row(
                &format!("SELECT 1 FROM {name}_passages WHERE passage_id = ?1 LIMIT 1"),
                rusqlite::params![passage_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// KNN search — returns up to `k` passages by ascending cosine distance,
    /// with ranks assigned in result order. An empty collection returns an
    /// empty list, not an error.
    pub fn query(
        &self,
        name: &str,
        vector: &[f32],
        k: usize,
    ) -> Result<Vec<RetrievedPassage>, IndexError> {
        validate_collection(name)?;

        let sql = format!(
            "SELECT p.title, p.content, p.media_url, v.distance
             FROM (
                 SELECT rowid, distance FROM {name}_vec
                 WHERE embedding MATCH ?1 AND k = ?2
                 ORDER BY distance
             ) v
             JOIN {name}_passages p ON p.rowid = v.rowid
             ORDER BY v.distance"
        );

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(
            rusqlite::params![vector.as_bytes(), k as i64],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, f64>(3)?,
                ))
            },
        )?;

        let mut passages = Vec::new();
        for row in rows {
            let (title, body, media_url, distance) = row?;
            let rank = passages.len();
            passages.push(RetrievedPassage {
                title,
                body,
                media_url: media_url.filter(|url| !url.is_empty()),
                distance: distance as f32,
                rank,
            });
        }
        Ok(passages)
    }
}

// ============================================================================
// Async handle
// ============================================================================

/// Cloneable async handle over a shared [`VecStore`].
///
/// The store is append/read-shared across all concurrent turns; every call
/// runs inside `spawn_blocking` so index I/O never stalls unrelated turns.
#[derive(Clone)]
pub struct VectorIndex {
    inner: Arc<Mutex<VecStore>>,
}

impl VectorIndex {
    pub fn open(path: &str) -> Result<Self, IndexError> {
        Ok(Self {
            inner: Arc::new(Mutex::new(VecStore::open(path)?)),
        })
    }

    pub fn in_memory() -> Result<Self, IndexError> {
        Self::open(":memory:")
    }

    async fn with_store<T, F>(&self, f: F) -> Result<T, IndexError>
    where
        T: Send + 'static,
        F: FnOnce(&VecStore) -> Result<T, IndexError> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || {
            let guard = inner.lock().expect("vector store lock poisoned");
            f(&guard)
        })
        .await
        .map_err(|e| IndexError::Task(e.to_string()))?
    }

    pub async fn collection_exists(&self, name: &str) -> Result<bool, IndexError> {
        let name = name.to_string();
        self.with_store(move |store| store.collection_exists(&name))
            .await
    }

    pub async fn create_collection(&self, name: &str, dimension: usize) -> Result<(), IndexError> {
        let name = name.to_string();
        self.with_store(move |store| store.create_collection(&name, dimension))
            .await
    }

    pub async fn upsert(
        &self,
        name: &str,
        passage_id: &str,
        vector: Vec<f32>,
        payload: PassagePayload,
    ) -> Result<(), IndexError> {
        let name = name.to_string();
        let passage_id = passage_id.to_string();
        self.with_store(move |store| store.upsert(&name, &passage_id, &vector, &payload))
            .await
    }

    pub async fn passage_exists(&self, name: &str, passage_id: &str) -> Result<bool, IndexError> {
        let name = name.to_string();
        let passage_id = passage_id.to_string();
        self.with_store(move |store| store.passage_exists(&name, &passage_id))
            .await
    }

    pub async fn query(
        &self,
        name: &str,
        vector: Vec<f32>,
        k: usize,
    ) -> Result<Vec<RetrievedPassage>, IndexError> {
        let name = name.to_string();
        self.with_store(move |store| store.query(&name, &vector, k))
            .await
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(title: &str, media_url: Option<&str>) -> PassagePayload {
        PassagePayload {
            title: title.to_string(),
            content: format!("corps de {title}"),
            media_url: media_url.map(str::to_string),
            category: "test".to_string(),
        }
    }

    #[test]
    fn test_collection_lifecycle() {
        let store = VecStore::open(":memory:").expect("open");
        assert!(!store.collection_exists("fitness").unwrap());
        store.create_collection("fitness", 4).unwrap();
        assert!(store.collection_exists("fitness").unwrap());
    }

    #[test]
    fn test_collection_name_is_validated() {
        let store = VecStore::open(":memory:").expect("open");
        let err = store.create_collection("fitness; DROP TABLE x", 4);
        assert!(matches!(err, Err(IndexError::InvalidCollection(_))));
    }

    #[test]
    fn test_query_orders_by_distance_with_unique_ranks() {
        let store = VecStore::open(":memory:").expect("open");
        store.create_collection("fitness", 4).unwrap();

        store
            .upsert("fitness", "a", &[1.0, 0.0, 0.0, 0.0], &payload("exact", None))
            .unwrap();
        store
            .upsert("fitness", "b", &[0.9, 0.1, 0.0, 0.0], &payload("close", None))
            .unwrap();
        store
            .upsert("fitness", "c", &[0.0, 1.0, 0.0, 0.0], &payload("far", None))
            .unwrap();

        let hits = store.query("fitness", &[1.0, 0.0, 0.0, 0.0], 5).unwrap();
        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0].title, "exact");
        assert_eq!(hits[1].title, "close");
        assert_eq!(hits[2].title, "far");

        for (i, hit) in hits.iter().enumerate() {
            assert_eq!(hit.rank, i);
        }
        assert!(hits[0].distance <= hits[1].distance);
        assert!(hits[1].distance < hits[2].distance);
    }

    #[test]
    fn test_query_empty_collection_returns_no_rows() {
        let store = VecStore::open(":memory:").expect("open");
        store.create_collection("fitness", 4).unwrap();
        let hits = store.query("fitness", &[1.0, 0.0, 0.0, 0.0], 5).unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn test_upsert_replaces_existing_passage() {
        let store = VecStore::open(":memory:").expect("open");
        store.create_collection("fitness", 4).unwrap();

        store
            .upsert("fitness", "a", &[1.0, 0.0, 0.0, 0.0], &payload("v1", None))
            .unwrap();
        store
            .upsert(
                "fitness",
                "a",
                &[0.0, 1.0, 0.0, 0.0],
                &payload("v2", Some("https://youtube.com/watch?v=x")),
            )
            .unwrap();

        let hits = store.query("fitness", &[0.0, 1.0, 0.0, 0.0], 5).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].title, "v2");
        assert_eq!(
            hits[0].media_url.as_deref(),
            Some("https://youtube.com/watch?v=x")
        );
    }

    #[test]
    fn test_empty_media_url_becomes_none() {
        let store = VecStore::open(":memory:").expect("open");
        store.create_collection("fitness", 4).unwrap();
        store
            .upsert("fitness", "a", &[1.0, 0.0, 0.0, 0.0], &payload("t", Some("")))
            .unwrap();

        let hits = store.query("fitness", &[1.0, 0.0, 0.0, 0.0], 5).unwrap();
        assert_eq!(hits[0].media_url, None);
    }

    #[tokio::test]
    async fn test_async_handle_round_trip() {
        let index = VectorIndex::in_memory().expect("open");
        index.create_collection("fitness", 4).await.unwrap();
        index
            .upsert(
                "fitness",
                "general_0",
                vec![1.0, 0.0, 0.0, 0.0],
                payload("async", None),
            )
            .await
            .unwrap();

        assert!(index.passage_exists("fitness", "general_0").await.unwrap());
        let hits = index
            .query("fitness", vec![1.0, 0.0, 0.0, 0.0], 5)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
    }
}
