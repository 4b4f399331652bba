//! SQLite-backed corpus store.
//!
//! Documents and chunks live in one database; embeddings are stored as
//! little-endian f32 BLOBs and searched by brute-force cosine similarity.
//! Chunk inserts for a document share one transaction and deletes cascade
//! through a foreign key, so searches never observe a torn chunk list.

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use uuid::Uuid;

use super::store::{ChunkHit, CorpusStore, DocumentRecord, NewChunk, SourceCategory, StoredChunk};
use crate::config::AppPaths;
use crate::errors::ApiError;
use crate::vector_math;

const DIM_META_KEY: &str = "embedding_dim";

pub struct SqliteCorpusStore {
    pool: SqlitePool,
    #[allow(dead_code)]
    db_path: PathBuf,
}

impl SqliteCorpusStore {
    pub async fn new(paths: &AppPaths) -> Result<Self, ApiError> {
        Self::with_path(paths.corpus_db_path.clone()).await
    }

    pub async fn with_path(db_path: PathBuf) -> Result<Self, ApiError> {
        let options = SqliteConnectOptions::new()
            .filename(&db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(ApiError::persistence)?;

        let store = Self { pool, db_path };
        store.init_schema().await?;
        Ok(store)
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn init_schema(&self) -> Result<(), ApiError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS documents (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL CHECK(length(trim(title)) > 0),
                category TEXT NOT NULL CHECK(category IN ('upload', 'web')),
                tags TEXT NOT NULL DEFAULT '[]',
                created_at TEXT NOT NULL DEFAULT (STRFTIME('%Y-%m-%dT%H:%M:%fZ', 'now'))
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(ApiError::persistence)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS chunks (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                document_id TEXT NOT NULL,
                content TEXT NOT NULL,
                start_offset INTEGER NOT NULL DEFAULT 0,
                embedding BLOB NOT NULL,
                FOREIGN KEY (document_id) REFERENCES documents(id) ON DELETE CASCADE
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(ApiError::persistence)?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_document ON chunks(document_id)")
            .execute(&self.pool)
            .await
            .map_err(ApiError::persistence)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS corpus_meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (STRFTIME('%Y-%m-%dT%H:%M:%fZ', 'now'))
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(ApiError::persistence)?;

        Ok(())
    }

    fn serialize_embedding(embedding: &[f32]) -> Vec<u8> {
        embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
    }

    fn deserialize_embedding(bytes: &[u8]) -> Vec<f32> {
        bytes
            .chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect()
    }

    /// The first inserted embedding pins the index dimensionality; every
    /// later insert must match it.
    async fn ensure_dimension(
        tx: &mut Transaction<'_, Sqlite>,
        dim: usize,
    ) -> Result<(), ApiError> {
        if dim == 0 {
            return Err(ApiError::BadRequest(
                "embedding vector must not be empty".to_string(),
            ));
        }

        let stored: Option<String> =
            sqlx::query_scalar("SELECT value FROM corpus_meta WHERE key = ?1")
                .bind(DIM_META_KEY)
                .fetch_optional(&mut **tx)
                .await
                .map_err(ApiError::persistence)?;

        match stored.and_then(|v| v.parse::<usize>().ok()) {
            Some(expected) if expected != dim => Err(ApiError::BadRequest(format!(
                "embedding dimension mismatch: index holds {expected}, got {dim}"
            ))),
            Some(_) => Ok(()),
            None => {
                sqlx::query(
                    "INSERT OR REPLACE INTO corpus_meta (key, value, updated_at)
                     VALUES (?1, ?2, STRFTIME('%Y-%m-%dT%H:%M:%fZ', 'now'))",
                )
                .bind(DIM_META_KEY)
                .bind(dim.to_string())
                .execute(&mut **tx)
                .await
                .map_err(ApiError::persistence)?;
                Ok(())
            }
        }
    }

    fn document_from_row(row: &sqlx::sqlite::SqliteRow) -> DocumentRecord {
        let tags_raw: String = row.get("tags");
        let tags = serde_json::from_str(&tags_raw).unwrap_or_default();
        let category: String = row.get("category");

        DocumentRecord {
            id: row.get("id"),
            title: row.get("title"),
            category: SourceCategory::parse(&category),
            tags,
            created_at: row.get("created_at"),
        }
    }

    fn chunk_from_row(row: &sqlx::sqlite::SqliteRow) -> StoredChunk {
        let start_offset: i64 = row.get("start_offset");
        StoredChunk {
            id: row.get("id"),
            document_id: row.get("document_id"),
            text: row.get("content"),
            start_offset: start_offset.max(0) as usize,
        }
    }
}

#[async_trait]
impl CorpusStore for SqliteCorpusStore {
    async fn create_document(
        &self,
        title: &str,
        category: SourceCategory,
        tags: &[String],
    ) -> Result<DocumentRecord, ApiError> {
        let id = Uuid::new_v4().to_string();
        let tags_json = serde_json::to_string(tags).map_err(ApiError::internal)?;
        let created_at = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);

        sqlx::query(
            "INSERT INTO documents (id, title, category, tags, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(&id)
        .bind(title)
        .bind(category.as_str())
        .bind(&tags_json)
        .bind(&created_at)
        .execute(&self.pool)
        .await
        .map_err(ApiError::persistence)?;

        self.get_document(&id)
            .await?
            .ok_or_else(|| ApiError::Persistence("document vanished after insert".to_string()))
    }

    async fn get_document(&self, document_id: &str) -> Result<Option<DocumentRecord>, ApiError> {
        let row = sqlx::query(
            "SELECT id, title, category, tags, created_at FROM documents WHERE id = ?1",
        )
        .bind(document_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(ApiError::persistence)?;

        Ok(row.as_ref().map(Self::document_from_row))
    }

    async fn list_documents(&self) -> Result<Vec<DocumentRecord>, ApiError> {
        let rows = sqlx::query(
            "SELECT id, title, category, tags, created_at
             FROM documents
             ORDER BY created_at DESC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(ApiError::persistence)?;

        Ok(rows.iter().map(Self::document_from_row).collect())
    }

    async fn rename_document(&self, document_id: &str, title: &str) -> Result<bool, ApiError> {
        if title.trim().is_empty() {
            return Err(ApiError::BadRequest("title must not be empty".to_string()));
        }

        let result = sqlx::query("UPDATE documents SET title = ?1 WHERE id = ?2")
            .bind(title.trim())
            .bind(document_id)
            .execute(&self.pool)
            .await
            .map_err(ApiError::persistence)?;

        Ok(result.rows_affected() > 0)
    }

    async fn set_document_tags(
        &self,
        document_id: &str,
        tags: &[String],
    ) -> Result<bool, ApiError> {
        let tags_json = serde_json::to_string(tags).map_err(ApiError::internal)?;

        let result = sqlx::query("UPDATE documents SET tags = ?1 WHERE id = ?2")
            .bind(&tags_json)
            .bind(document_id)
            .execute(&self.pool)
            .await
            .map_err(ApiError::persistence)?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete_document(&self, document_id: &str) -> Result<bool, ApiError> {
        // Chunks go with the document via ON DELETE CASCADE, inside the
        // same implicit transaction.
        let result = sqlx::query("DELETE FROM documents WHERE id = ?1")
            .bind(document_id)
            .execute(&self.pool)
            .await
            .map_err(ApiError::persistence)?;

        Ok(result.rows_affected() > 0)
    }

    async fn insert_chunks(
        &self,
        document_id: &str,
        chunks: Vec<NewChunk>,
    ) -> Result<(), ApiError> {
        if chunks.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await.map_err(ApiError::persistence)?;

        for chunk in &chunks {
            Self::ensure_dimension(&mut tx, chunk.embedding.len()).await?;
            let blob = Self::serialize_embedding(&chunk.embedding);

            sqlx::query(
                "INSERT INTO chunks (document_id, content, start_offset, embedding)
                 VALUES (?1, ?2, ?3, ?4)",
            )
            .bind(document_id)
            .bind(&chunk.text)
            .bind(chunk.start_offset as i64)
            .bind(&blob)
            .execute(&mut *tx)
            .await
            .map_err(ApiError::persistence)?;
        }

        tx.commit().await.map_err(ApiError::persistence)?;
        Ok(())
    }

    async fn chunk_count(&self, document_id: Option<&str>) -> Result<usize, ApiError> {
        let count: i64 = if let Some(document_id) = document_id {
            sqlx::query_scalar("SELECT COUNT(*) FROM chunks WHERE document_id = ?1")
                .bind(document_id)
                .fetch_one(&self.pool)
                .await
                .map_err(ApiError::persistence)?
        } else {
            sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
                .fetch_one(&self.pool)
                .await
                .map_err(ApiError::persistence)?
        };

        Ok(count as usize)
    }

    async fn search(
        &self,
        query_embedding: &[f32],
        k: usize,
        document_id: Option<&str>,
    ) -> Result<Vec<ChunkHit>, ApiError> {
        // Insertion order (id ASC) feeds the stable sort below, which is
        // what breaks score ties.
        let rows = if let Some(document_id) = document_id {
            sqlx::query(
                "SELECT id, document_id, content, start_offset, embedding
                 FROM chunks
                 WHERE document_id = ?1
                 ORDER BY id ASC",
            )
            .bind(document_id)
            .fetch_all(&self.pool)
            .await
            .map_err(ApiError::persistence)?
        } else {
            sqlx::query(
                "SELECT id, document_id, content, start_offset, embedding
                 FROM chunks
                 ORDER BY id ASC",
            )
            .fetch_all(&self.pool)
            .await
            .map_err(ApiError::persistence)?
        };

        let mut chunks = Vec::with_capacity(rows.len());
        let mut embeddings = Vec::with_capacity(rows.len());
        for row in &rows {
            let embedding_bytes: Vec<u8> = row.get("embedding");
            embeddings.push(Self::deserialize_embedding(&embedding_bytes));
            chunks.push(Self::chunk_from_row(row));
        }

        let ranked = vector_math::rank_descending_by_cosine(query_embedding, &embeddings);
        Ok(ranked
            .into_iter()
            .take(k)
            .map(|(idx, score)| ChunkHit {
                chunk: chunks[idx].clone(),
                score,
            })
            .collect())
    }

    async fn fetch_chunk_texts(
        &self,
        document_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<String>, ApiError> {
        let rows = if let Some(document_id) = document_id {
            sqlx::query(
                "SELECT content FROM chunks WHERE document_id = ?1 ORDER BY id ASC LIMIT ?2",
            )
            .bind(document_id)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(ApiError::persistence)?
        } else {
            sqlx::query("SELECT content FROM chunks ORDER BY id ASC LIMIT ?1")
                .bind(limit as i64)
                .fetch_all(&self.pool)
                .await
                .map_err(ApiError::persistence)?
        };

        Ok(rows.iter().map(|row| row.get("content")).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_store() -> SqliteCorpusStore {
        let tmp = std::env::temp_dir().join(format!("corpora-test-{}.db", Uuid::new_v4()));
        SqliteCorpusStore::with_path(tmp).await.unwrap()
    }

    fn chunk(text: &str, offset: usize, embedding: Vec<f32>) -> NewChunk {
        NewChunk {
            text: text.to_string(),
            start_offset: offset,
            embedding,
        }
    }

    async fn seeded_document(store: &SqliteCorpusStore) -> DocumentRecord {
        let doc = store
            .create_document("Physics notes", SourceCategory::Upload, &[])
            .await
            .unwrap();
        store
            .insert_chunks(
                &doc.id,
                vec![
                    chunk("gravity pulls", 0, vec![1.0, 0.0, 0.0]),
                    chunk("light bends", 10, vec![0.0, 1.0, 0.0]),
                    chunk("time dilates", 20, vec![0.7, 0.7, 0.0]),
                ],
            )
            .await
            .unwrap();
        doc
    }

    #[tokio::test]
    async fn search_returns_all_chunks_when_k_exceeds_count() {
        let store = test_store().await;
        let doc = seeded_document(&store).await;

        let hits = store
            .search(&[1.0, 0.0, 0.0], 5, Some(&doc.id))
            .await
            .unwrap();

        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0].chunk.text, "gravity pulls");
        assert!(hits[0].score >= hits[1].score);
        assert!(hits[1].score >= hits[2].score);
    }

    #[tokio::test]
    async fn scoped_search_ignores_other_documents() {
        let store = test_store().await;
        let _doc = seeded_document(&store).await;

        let other = store
            .create_document("Cooking", SourceCategory::Web, &["web".to_string()])
            .await
            .unwrap();
        store
            .insert_chunks(&other.id, vec![chunk("salt to taste", 0, vec![1.0, 0.0, 0.0])])
            .await
            .unwrap();

        let scoped = store
            .search(&[1.0, 0.0, 0.0], 10, Some(&other.id))
            .await
            .unwrap();
        assert_eq!(scoped.len(), 1);
        assert_eq!(scoped[0].chunk.document_id, other.id);

        let all = store.search(&[1.0, 0.0, 0.0], 10, None).await.unwrap();
        assert_eq!(all.len(), 4);
    }

    #[tokio::test]
    async fn score_ties_resolve_by_insertion_order() {
        let store = test_store().await;
        let doc = store
            .create_document("Ties", SourceCategory::Upload, &[])
            .await
            .unwrap();
        // Parallel embeddings: identical cosine scores.
        store
            .insert_chunks(
                &doc.id,
                vec![
                    chunk("first", 0, vec![2.0, 0.0]),
                    chunk("second", 5, vec![1.0, 0.0]),
                    chunk("third", 10, vec![4.0, 0.0]),
                ],
            )
            .await
            .unwrap();

        let hits = store.search(&[1.0, 0.0], 3, Some(&doc.id)).await.unwrap();
        let texts: Vec<&str> = hits.iter().map(|h| h.chunk.text.as_str()).collect();
        assert_eq!(texts, vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn dimension_mismatch_is_rejected() {
        let store = test_store().await;
        let doc = store
            .create_document("Dims", SourceCategory::Upload, &[])
            .await
            .unwrap();

        store
            .insert_chunks(&doc.id, vec![chunk("a", 0, vec![1.0, 0.0, 0.0])])
            .await
            .unwrap();

        let err = store
            .insert_chunks(&doc.id, vec![chunk("b", 1, vec![1.0, 0.0])])
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));

        // The failed transaction must not have left a partial chunk behind.
        assert_eq!(store.chunk_count(Some(&doc.id)).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn delete_document_cascades_to_chunks() {
        let store = test_store().await;
        let doc = seeded_document(&store).await;

        assert!(store.delete_document(&doc.id).await.unwrap());
        assert_eq!(store.chunk_count(Some(&doc.id)).await.unwrap(), 0);

        let hits = store
            .search(&[1.0, 0.0, 0.0], 5, Some(&doc.id))
            .await
            .unwrap();
        assert!(hits.is_empty());

        // Idempotent at the store level.
        assert!(!store.delete_document(&doc.id).await.unwrap());
    }

    #[tokio::test]
    async fn empty_corpus_search_returns_empty() {
        let store = test_store().await;
        let hits = store.search(&[1.0, 0.0], 5, None).await.unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn rename_and_tags_update_rows() {
        let store = test_store().await;
        let doc = store
            .create_document("Old title", SourceCategory::Upload, &[])
            .await
            .unwrap();

        assert!(store.rename_document(&doc.id, "New title").await.unwrap());
        assert!(store
            .set_document_tags(&doc.id, &["physics".to_string(), "notes".to_string()])
            .await
            .unwrap());

        let reloaded = store.get_document(&doc.id).await.unwrap().unwrap();
        assert_eq!(reloaded.title, "New title");
        assert_eq!(reloaded.tags, vec!["physics", "notes"]);

        assert!(!store.rename_document("missing", "X").await.unwrap());
    }

    #[tokio::test]
    async fn fetch_chunk_texts_respects_limit_and_order() {
        let store = test_store().await;
        let doc = seeded_document(&store).await;

        let texts = store.fetch_chunk_texts(Some(&doc.id), 2).await.unwrap();
        assert_eq!(texts, vec!["gravity pulls", "light bends"]);
    }
}
