#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Mutex;

use mnemo::conversations::ConversationIndexer;
use mnemo::embedding::deterministic::DeterministicEmbedder;
use mnemo::index::IndexService;
use mnemo::llm::{ChatMessage, ChatModel, ChatOutcome, ModelTier, ToolCall, ToolDef};
use mnemo::reflection::staging::ReflectionStaging;
use mnemo::reminders::ReminderScheduler;
use mnemo::sandbox::Sandbox;
use mnemo::store::fs::FsStore;
use mnemo::store::ObjectStore;
use mnemo::tools::ToolContext;

/// A fully wired test deployment on a temp directory, with deterministic
/// embeddings so no model calls leave the process.
pub struct TestEnv {
    // Held so the directory outlives the components using it.
    _dir: tempfile::TempDir,
    pub store: Arc<dyn ObjectStore>,
    pub index: Arc<IndexService>,
    pub context: ToolContext,
}

pub fn test_env() -> TestEnv {
    let dir = tempfile::tempdir().unwrap();
    let store: Arc<dyn ObjectStore> = Arc::new(FsStore::open(dir.path(), 10).unwrap());
    let index = Arc::new(
        IndexService::open(
            dir.path().join("embeddings.db"),
            Arc::new(DeterministicEmbedder::new(64)),
        )
        .unwrap(),
    );
    let context = ToolContext {
        store: store.clone(),
        index: index.clone(),
        reminders: Arc::new(ReminderScheduler::new(store.clone())),
        conversations: Arc::new(ConversationIndexer::new(store.clone(), index.clone())),
        sandbox: Arc::new(Sandbox::new(store.clone())),
        staging: Arc::new(ReflectionStaging::new(store.clone())),
    };
    TestEnv {
        _dir: dir,
        store,
        index,
        context,
    }
}

impl TestEnv {
    /// Rebuild the index service from the same embedding table, as a
    /// process restart would.
    pub fn reopen_index(&self) -> IndexService {
        IndexService::open(
            self._dir.path().join("embeddings.db"),
            Arc::new(DeterministicEmbedder::new(64)),
        )
        .unwrap()
    }
}

/// Chat model fake that replays pre-baked turns per tier, then falls
/// back to a plain-text turn with no tool calls.
pub struct ScriptedModel {
    fast: Mutex<VecDeque<ChatOutcome>>,
    primary: Mutex<VecDeque<ChatOutcome>>,
}

impl ScriptedModel {
    pub fn new(fast: Vec<ChatOutcome>, primary: Vec<ChatOutcome>) -> Self {
        Self {
            fast: Mutex::new(fast.into()),
            primary: Mutex::new(primary.into()),
        }
    }
}

#[async_trait]
impl ChatModel for ScriptedModel {
    async fn complete(
        &self,
        tier: ModelTier,
        _system: &str,
        _messages: &[ChatMessage],
        _tools: &[ToolDef],
    ) -> anyhow::Result<ChatOutcome> {
        let queue = match tier {
            ModelTier::Fast => &self.fast,
            ModelTier::Primary => &self.primary,
        };
        Ok(queue.lock().await.pop_front().unwrap_or(ChatOutcome {
            text: "nothing further".into(),
            tool_calls: Vec::new(),
        }))
    }
}

/// One scripted model turn issuing the given tool calls.
pub fn turn(calls: Vec<(&str, serde_json::Value)>) -> ChatOutcome {
    ChatOutcome {
        text: String::new(),
        tool_calls: calls
            .into_iter()
            .enumerate()
            .map(|(i, (name, arguments))| ToolCall {
                id: format!("call_{i}"),
                name: name.into(),
                arguments,
            })
            .collect(),
    }
}
