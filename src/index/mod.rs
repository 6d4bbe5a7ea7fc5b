//! Semantic index service — the single writer over the HNSW graph and the
//! persistent embedding table.
//!
//! All operations serialize through one async lock. Embeddings are
//! computed *before* the lock is taken, so the high-latency model call
//! never blocks other index traffic; only the graph mutation and the
//! SQLite row write run inside the critical section. The graph itself is
//! never persisted — it is rebuilt from the table on open.

pub mod hnsw;

use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::embedding::EmbeddingProvider;
use hnsw::{HnswIndex, SearchHit};

/// Half-life of the recency decay used by time-weighted search.
const HALF_LIFE_MS: f64 = 30.0 * 24.0 * 3600.0 * 1000.0;

/// Index stats surfaced through the tool layer.
#[derive(Debug, Clone, serde::Serialize)]
pub struct IndexStats {
    pub indexed_files: usize,
    pub index_size: usize,
}

pub struct IndexService {
    embedder: Arc<dyn EmbeddingProvider>,
    inner: Mutex<Inner>,
}

struct Inner {
    conn: Connection,
    index: HnswIndex,
}

impl IndexService {
    /// Open the embedding table at `db_path` and rebuild the graph from
    /// it. The rebuild completes before any request is served; rows that
    /// fail to load are logged and skipped.
    pub fn open(db_path: impl AsRef<Path>, embedder: Arc<dyn EmbeddingProvider>) -> Result<Self> {
        let path = db_path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create directory {}", parent.display()))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open embedding database at {}", path.display()))?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "busy_timeout", "5000")?;
        Self::from_connection(conn, embedder)
    }

    /// In-memory variant for tests.
    pub fn open_in_memory(embedder: Arc<dyn EmbeddingProvider>) -> Result<Self> {
        let conn = Connection::open_in_memory().context("failed to open in-memory database")?;
        Self::from_connection(conn, embedder)
    }

    fn from_connection(conn: Connection, embedder: Arc<dyn EmbeddingProvider>) -> Result<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS embeddings (
                path TEXT PRIMARY KEY,
                embedding TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            );",
        )
        .context("failed to initialize embeddings table")?;

        let index = rebuild_index(&conn, embedder.dimensions())?;
        tracing::info!(
            indexed = index.size(),
            dimensions = index.dimensions(),
            "vector index ready"
        );
        Ok(Self {
            embedder,
            inner: Mutex::new(Inner { conn, index }),
        })
    }

    /// Embed `content` and upsert it under `id`, write-through to the
    /// persistent table and the graph.
    pub async fn update(&self, id: &str, content: &str) -> Result<()> {
        let embedding = self
            .embedder
            .embed(content)
            .await
            .context("Indexing failed")?;
        let now_ms = Utc::now().timestamp_millis();

        let mut inner = self.inner.lock().await;
        let vector_json = serde_json::to_string(&embedding.vector)?;
        inner.conn.execute(
            "INSERT INTO embeddings (path, embedding, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(path) DO UPDATE SET embedding = ?2, updated_at = ?3",
            params![id, vector_json, now_ms],
        )?;
        // Delete-then-insert keeps the graph invariants when the id is
        // already present.
        inner.index.delete(id);
        inner.index.insert(id, embedding.vector)?;
        tracing::debug!(id = %id, "index updated");
        Ok(())
    }

    /// Remove `id` from the table and the graph. Unknown ids are a no-op.
    pub async fn delete(&self, id: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner
            .conn
            .execute("DELETE FROM embeddings WHERE path = ?1", params![id])?;
        inner.index.delete(id);
        tracing::debug!(id = %id, "index entry deleted");
        Ok(())
    }

    /// Semantic search. With `time_weight`, over-fetches 3k candidates and
    /// re-ranks by `score * (0.3 + 0.7 * 0.5^(age / 30d))`.
    pub async fn search(&self, query: &str, k: usize, time_weight: bool) -> Result<Vec<SearchHit>> {
        let embedding = self
            .embedder
            .embed(query)
            .await
            .context("Search failed")?;

        let inner = self.inner.lock().await;
        let fetch = if time_weight { k * 3 } else { k };
        let hits = inner.index.search(&embedding.vector, fetch, None);
        if !time_weight {
            return Ok(hits);
        }

        let now_ms = Utc::now().timestamp_millis();
        let mut adjusted: Vec<SearchHit> = hits
            .into_iter()
            .map(|hit| {
                // Unknown timestamps count as fresh (age = 0).
                let age_ms = updated_at_ms(&inner.conn, &hit.id)
                    .map(|ts| (now_ms - ts).max(0))
                    .unwrap_or(0);
                let decay = 0.5f64.powf(age_ms as f64 / HALF_LIFE_MS);
                SearchHit {
                    id: hit.id,
                    score: (hit.score as f64 * (0.3 + 0.7 * decay)) as f32,
                }
            })
            .collect();
        adjusted.sort_by(|a, b| b.score.total_cmp(&a.score));
        adjusted.truncate(k);
        Ok(adjusted)
    }

    pub async fn stats(&self) -> Result<IndexStats> {
        let inner = self.inner.lock().await;
        let indexed_files: usize =
            inner
                .conn
                .query_row("SELECT COUNT(*) FROM embeddings", [], |row| {
                    row.get::<_, i64>(0)
                })? as usize;
        Ok(IndexStats {
            indexed_files,
            index_size: inner.index.size(),
        })
    }
}

fn updated_at_ms(conn: &Connection, id: &str) -> Option<i64> {
    conn.query_row(
        "SELECT updated_at FROM embeddings WHERE path = ?1",
        params![id],
        |row| row.get(0),
    )
    .optional()
    .ok()
    .flatten()
}

/// Rebuild a fresh graph from every persisted row. Individual bad rows
/// are skipped, not fatal.
fn rebuild_index(conn: &Connection, dimensions: usize) -> Result<HnswIndex> {
    let mut index = HnswIndex::new(dimensions);
    let mut stmt = conn.prepare("SELECT path, embedding FROM embeddings")?;
    let rows = stmt.query_map([], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
    })?;

    for row in rows {
        let (path, vector_json) = match row {
            Ok(pair) => pair,
            Err(err) => {
                tracing::warn!(error = %err, "skipping unreadable embedding row");
                continue;
            }
        };
        let vector: Vec<f32> = match serde_json::from_str(&vector_json) {
            Ok(v) => v,
            Err(err) => {
                tracing::warn!(path = %path, error = %err, "skipping undecodable embedding");
                continue;
            }
        };
        if let Err(err) = index.insert(&path, vector) {
            tracing::warn!(path = %path, error = %err, "skipping embedding on rebuild");
        }
    }
    Ok(index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::deterministic::DeterministicEmbedder;

    fn test_service() -> IndexService {
        let embedder = Arc::new(DeterministicEmbedder::new(64));
        IndexService::open_in_memory(embedder).unwrap()
    }

    #[tokio::test]
    async fn update_then_search_returns_id_with_top_score() {
        let service = test_service();
        service
            .update("memory/a.md", "durable object memory limits")
            .await
            .unwrap();

        let hits = service
            .search("durable object memory limits", 1, false)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "memory/a.md");
        assert!(hits[0].score > 0.99);
    }

    #[tokio::test]
    async fn search_empty_index_returns_empty() {
        let service = test_service();
        let hits = service.search("anything", 5, false).await.unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn delete_removes_from_table_and_graph() {
        let service = test_service();
        service.update("gone.md", "some text").await.unwrap();
        service.delete("gone.md").await.unwrap();

        let stats = service.stats().await.unwrap();
        assert_eq!(stats.indexed_files, 0);
        assert_eq!(stats.index_size, 0);
        // Deleting again is a no-op
        service.delete("gone.md").await.unwrap();
    }

    #[tokio::test]
    async fn repeated_update_keeps_one_entry() {
        let service = test_service();
        service.update("p.md", "first draft").await.unwrap();
        service.update("p.md", "second draft").await.unwrap();

        let stats = service.stats().await.unwrap();
        assert_eq!(stats.indexed_files, 1);
        assert_eq!(stats.index_size, 1);

        let hits = service.search("second draft", 1, false).await.unwrap();
        assert_eq!(hits[0].id, "p.md");
        assert!(hits[0].score > 0.99);
    }

    #[tokio::test]
    async fn warm_rebuild_restores_search() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("embeddings.db");
        let embedder = Arc::new(DeterministicEmbedder::new(64));

        {
            let service = IndexService::open(&db_path, embedder.clone()).unwrap();
            service.update("a.md", "alpha content").await.unwrap();
            service.update("b.md", "beta content").await.unwrap();
        }

        // Fresh service, same table: graph rebuilt from rows
        let service = IndexService::open(&db_path, embedder).unwrap();
        let stats = service.stats().await.unwrap();
        assert_eq!(stats.index_size, 2);

        let hits = service.search("alpha content", 1, false).await.unwrap();
        assert_eq!(hits[0].id, "a.md");
    }

    #[tokio::test]
    async fn time_weight_prefers_recent_among_equals() {
        let service = test_service();
        // Identical content, so identical embeddings and identical raw scores
        service.update("old.md", "the same note").await.unwrap();
        service.update("new.md", "the same note").await.unwrap();

        // Backdate old.md by 90 days
        {
            let inner = service.inner.lock().await;
            let old_ms = Utc::now().timestamp_millis() - 90 * 24 * 3600 * 1000;
            inner
                .conn
                .execute(
                    "UPDATE embeddings SET updated_at = ?1 WHERE path = 'old.md'",
                    params![old_ms],
                )
                .unwrap();
        }

        let weighted = service.search("the same note", 2, true).await.unwrap();
        assert_eq!(weighted[0].id, "new.md");
        assert_eq!(weighted[1].id, "old.md");
        assert!(weighted[0].score > weighted[1].score);

        let plain = service.search("the same note", 2, false).await.unwrap();
        assert!((plain[0].score - plain[1].score).abs() < 1e-6);
    }

    #[tokio::test]
    async fn stats_counts_rows_and_nodes() {
        let service = test_service();
        for i in 0..5 {
            service
                .update(&format!("f{i}.md"), &format!("content {i}"))
                .await
                .unwrap();
        }
        let stats = service.stats().await.unwrap();
        assert_eq!(stats.indexed_files, 5);
        assert_eq!(stats.index_size, 5);
    }
}
