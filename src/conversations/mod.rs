//! Conversation indexing — content-hash-driven incremental ingestion of
//! chat sessions into searchable exchanges.
//!
//! The index blob at `conversations/index.json` holds every exchange plus
//! a per-session content hash; a session whose payload hash is unchanged
//! is skipped wholesale. Changed sessions are re-extracted: their old
//! exchanges leave the semantic index, the new ones are embedded, and the
//! raw payload is retained for later expansion.

pub mod extract;

use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::index::IndexService;
use crate::store::ObjectStore;
pub use extract::{extract_exchanges, Exchange, Session};

pub const CONVERSATION_INDEX_KEY: &str = "conversations/index.json";

fn session_key(session_id: &str) -> String {
    format!("conversations/sessions/{session_id}.json")
}

fn exchange_key(exchange_id: &str) -> String {
    format!("conversations/exchanges/{exchange_id}.txt")
}

/// Persisted conversation index.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationIndex {
    #[serde(default)]
    pub exchanges: Vec<Exchange>,
    #[serde(default)]
    pub session_hashes: BTreeMap<String, u32>,
    #[serde(default)]
    pub last_updated: Option<String>,
}

/// Per-call ingestion counts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IndexReport {
    pub added: usize,
    pub updated: usize,
    pub unchanged: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConversationStats {
    pub indexed_exchanges: usize,
    pub sessions: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<String>,
}

/// A search hit over indexed exchanges.
#[derive(Debug, Clone, Serialize)]
pub struct ConversationHit {
    pub id: String,
    pub score: f32,
    pub text: String,
}

pub struct ConversationIndexer {
    store: Arc<dyn ObjectStore>,
    index: Arc<IndexService>,
    /// Serializes index-blob rewrites.
    lock: Mutex<()>,
}

impl ConversationIndexer {
    pub fn new(store: Arc<dyn ObjectStore>, index: Arc<IndexService>) -> Self {
        Self {
            store,
            index,
            lock: Mutex::new(()),
        }
    }

    /// Ingest a batch of raw session payloads. Unchanged sessions (by
    /// content hash) are untouched; changed ones are fully re-extracted.
    /// Idempotent for identical payloads.
    pub async fn index_sessions(&self, payloads: &[serde_json::Value]) -> Result<IndexReport> {
        let _guard = self.lock.lock().await;
        let mut index = self.load().await?;
        let mut report = IndexReport::default();
        let now = Utc::now().to_rfc3339();
        let mut dirty = false;

        for payload in payloads {
            let session: Session = serde_json::from_value(payload.clone())
                .context("invalid session payload")?;
            let raw = serde_json::to_string(payload)?;
            let hash = content_hash32(&raw);

            if index.session_hashes.get(&session.session_id) == Some(&hash) {
                report.unchanged += 1;
                continue;
            }
            let existed = index.session_hashes.contains_key(&session.session_id);

            // Retire the session's previous exchanges before re-adding.
            let (stale, kept): (Vec<Exchange>, Vec<Exchange>) = index
                .exchanges
                .drain(..)
                .partition(|e| e.session_id == session.session_id);
            index.exchanges = kept;
            for exchange in stale {
                let key = exchange_key(&exchange.id);
                self.index.delete(&key).await?;
                let _ = self.store.delete(&key).await;
            }

            let exchanges = extract_exchanges(&session, &now);
            for exchange in &exchanges {
                let key = exchange_key(&exchange.id);
                let text = exchange.embedding_text();
                self.store.write(&key, &text).await?;
                self.index.update(&key, &text).await?;
            }
            tracing::info!(
                session = %session.session_id,
                exchanges = exchanges.len(),
                "session indexed"
            );
            index.exchanges.extend(exchanges);

            // Keep the raw payload for expand_conversation.
            self.store.write(&session_key(&session.session_id), &raw).await?;

            index.session_hashes.insert(session.session_id.clone(), hash);
            if existed {
                report.updated += 1;
            } else {
                report.added += 1;
            }
            dirty = true;
        }

        if dirty {
            index.last_updated = Some(now);
            self.persist(&index).await?;
        }
        Ok(report)
    }

    /// Search indexed exchanges, hydrating the embedded text of each hit.
    pub async fn search(&self, query: &str, limit: usize) -> Result<Vec<ConversationHit>> {
        // Over-fetch: memory files share the semantic index with exchanges.
        let hits = self.index.search(query, limit * 3 + 10, false).await?;
        let mut out = Vec::new();
        for hit in hits {
            if !hit.id.starts_with("conversations/exchanges/") {
                continue;
            }
            let text = self
                .store
                .read(&hit.id)
                .await?
                .map(|f| f.content)
                .unwrap_or_default();
            out.push(ConversationHit {
                id: hit.id,
                score: hit.score,
                text,
            });
            if out.len() >= limit {
                break;
            }
        }
        Ok(out)
    }

    /// Re-parse a session's exchanges. With an `exchange_id`, returns a
    /// ±2-exchange window around it; otherwise all of them. Falls back to
    /// the index blob when the raw session is gone.
    pub async fn expand(
        &self,
        session_id: &str,
        exchange_id: Option<&str>,
    ) -> Result<Vec<Exchange>> {
        let exchanges = match self.store.read(&session_key(session_id)).await? {
            Some(file) => {
                let session: Session = serde_json::from_str(&file.content)
                    .context("failed to parse stored session")?;
                extract_exchanges(&session, &Utc::now().to_rfc3339())
            }
            None => self
                .load()
                .await?
                .exchanges
                .into_iter()
                .filter(|e| e.session_id == session_id)
                .collect(),
        };

        let Some(target) = exchange_id else {
            return Ok(exchanges);
        };
        let Some(pos) = exchanges.iter().position(|e| e.id == target) else {
            return Ok(Vec::new());
        };
        let start = pos.saturating_sub(2);
        let end = (pos + 3).min(exchanges.len());
        Ok(exchanges[start..end].to_vec())
    }

    pub async fn stats(&self) -> Result<ConversationStats> {
        let index = self.load().await?;
        Ok(ConversationStats {
            indexed_exchanges: index.exchanges.len(),
            sessions: index.session_hashes.len(),
            last_updated: index.last_updated,
        })
    }

    async fn load(&self) -> Result<ConversationIndex> {
        match self.store.read(CONVERSATION_INDEX_KEY).await? {
            Some(file) => serde_json::from_str(&file.content)
                .context("failed to parse conversation index"),
            None => Ok(ConversationIndex::default()),
        }
    }

    async fn persist(&self, index: &ConversationIndex) -> Result<()> {
        let json = serde_json::to_string_pretty(index)?;
        self.store.write(CONVERSATION_INDEX_KEY, &json).await?;
        Ok(())
    }
}

/// Deterministic 32-bit rolling hash over the UTF-8 bytes of a payload.
pub(crate) fn content_hash32(text: &str) -> u32 {
    let mut hash: u32 = 0;
    for byte in text.bytes() {
        hash = hash.wrapping_mul(31).wrapping_add(byte as u32);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_deterministic_and_content_sensitive() {
        assert_eq!(content_hash32("abc"), content_hash32("abc"));
        assert_ne!(content_hash32("abc"), content_hash32("abd"));
        assert_eq!(content_hash32(""), 0);
    }

    #[test]
    fn index_blob_round_trips() {
        let index = ConversationIndex {
            exchanges: vec![Exchange {
                id: "s1-0".into(),
                session_id: "s1".into(),
                project: "p".into(),
                user_prompt: "hello there".into(),
                assistant_response: "hi".into(),
                timestamp: "2026-08-01T00:00:00Z".into(),
                message_index: 0,
            }],
            session_hashes: BTreeMap::from([("s1".to_string(), 42u32)]),
            last_updated: Some("2026-08-01T00:00:00Z".into()),
        };
        let json = serde_json::to_string(&index).unwrap();
        assert!(json.contains("\"sessionHashes\""));
        assert!(json.contains("\"userPrompt\""));
        let back: ConversationIndex = serde_json::from_str(&json).unwrap();
        assert_eq!(back.exchanges, index.exchanges);
        assert_eq!(back.session_hashes, index.session_hashes);
    }
}
