//! Tool dispatcher — validates arguments and routes each MCP tool to its
//! owning component.
//!
//! Transport-level failures (unknown tool, schema mismatch) surface as
//! JSON-RPC errors; everything past validation comes back as a tool
//! result, with `is_error` set for not-found and dependency failures.

pub mod catalog;

use anyhow::Result;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::conversations::ConversationIndexer;
use crate::index::IndexService;
use crate::reflection::staging::ReflectionStaging;
use crate::reminders::{ReminderScheduler, ScheduleRequest};
use crate::sandbox::Sandbox;
use crate::store::ObjectStore;

/// Closed set of tools served at `/mcp`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolName {
    Read,
    Write,
    List,
    Search,
    History,
    Rollback,
    Execute,
    SearchConversations,
    IndexConversations,
    ExpandConversation,
    ConversationStats,
    ScheduleReminder,
    ListReminders,
    RemoveReminder,
    CheckReminders,
    ListPendingReflections,
    ApplyReflectionChanges,
    ArchiveReflection,
}

impl std::str::FromStr for ToolName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "read" => Ok(Self::Read),
            "write" => Ok(Self::Write),
            "list" => Ok(Self::List),
            "search" => Ok(Self::Search),
            "history" => Ok(Self::History),
            "rollback" => Ok(Self::Rollback),
            "execute" => Ok(Self::Execute),
            "search_conversations" => Ok(Self::SearchConversations),
            "index_conversations" => Ok(Self::IndexConversations),
            "expand_conversation" => Ok(Self::ExpandConversation),
            "conversation_stats" => Ok(Self::ConversationStats),
            "schedule_reminder" => Ok(Self::ScheduleReminder),
            "list_reminders" => Ok(Self::ListReminders),
            "remove_reminder" => Ok(Self::RemoveReminder),
            "check_reminders" => Ok(Self::CheckReminders),
            "list_pending_reflections" => Ok(Self::ListPendingReflections),
            "apply_reflection_changes" => Ok(Self::ApplyReflectionChanges),
            "archive_reflection" => Ok(Self::ArchiveReflection),
            other => Err(format!("unknown tool: {other}")),
        }
    }
}

/// Outcome of one tool call, ready for the MCP content envelope.
#[derive(Debug)]
pub struct ToolOutcome {
    pub value: Value,
    pub is_error: bool,
}

impl ToolOutcome {
    fn ok(value: Value) -> Self {
        Self {
            value,
            is_error: false,
        }
    }

    fn error(message: impl std::fmt::Display) -> Self {
        Self {
            value: json!({ "error": message.to_string() }),
            is_error: true,
        }
    }
}

/// Dispatcher failures that map to JSON-RPC error codes rather than tool
/// results.
#[derive(Debug)]
pub enum DispatchError {
    UnknownTool(String),
    InvalidArguments(String),
}

/// Shared handles to every component a tool may touch.
#[derive(Clone)]
pub struct ToolContext {
    pub store: Arc<dyn ObjectStore>,
    pub index: Arc<IndexService>,
    pub reminders: Arc<ReminderScheduler>,
    pub conversations: Arc<ConversationIndexer>,
    pub sandbox: Arc<Sandbox>,
    pub staging: Arc<ReflectionStaging>,
}

// ── Per-tool parameter structs ───────────────────────────────────────────

#[derive(Deserialize)]
struct PathParams {
    path: String,
}

#[derive(Deserialize)]
struct WriteParams {
    path: String,
    content: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListParams {
    #[serde(default)]
    path: String,
    #[serde(default)]
    recursive: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchParams {
    query: String,
    #[serde(default)]
    limit: Option<usize>,
    #[serde(default)]
    time_weight: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct HistoryParams {
    path: String,
    #[serde(default)]
    limit: Option<usize>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RollbackParams {
    path: String,
    version_id: String,
}

#[derive(Deserialize)]
struct ExecuteParams {
    script: String,
}

#[derive(Deserialize)]
struct SessionsParams {
    sessions: Vec<Value>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExpandParams {
    session_id: String,
    #[serde(default)]
    exchange_id: Option<String>,
}

#[derive(Deserialize)]
struct IdParams {
    id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApplyParams {
    date: String,
    #[serde(default)]
    edits: Vec<usize>,
    #[serde(default = "default_true")]
    archive: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Deserialize)]
struct DateParams {
    date: String,
}

// ── Dispatch ─────────────────────────────────────────────────────────────

impl ToolContext {
    /// Route one `tools/call` to its component.
    pub async fn dispatch(&self, name: &str, arguments: Value) -> Result<ToolOutcome, DispatchError> {
        let tool: ToolName = name
            .parse()
            .map_err(|_| DispatchError::UnknownTool(name.to_string()))?;
        tracing::debug!(tool = name, "tool call");

        let outcome = match tool {
            ToolName::Read => {
                let params: PathParams = parse_args(arguments)?;
                self.read(&params.path).await
            }
            ToolName::Write => {
                let params: WriteParams = parse_args(arguments)?;
                self.write(&params.path, &params.content).await
            }
            ToolName::List => {
                let params: ListParams = parse_args(arguments)?;
                self.list(&params.path, params.recursive).await
            }
            ToolName::Search => {
                let params: SearchParams = parse_args(arguments)?;
                self.search(&params.query, params.limit.unwrap_or(5), params.time_weight)
                    .await
            }
            ToolName::History => {
                let params: HistoryParams = parse_args(arguments)?;
                self.history(&params.path, params.limit.unwrap_or(10)).await
            }
            ToolName::Rollback => {
                let params: RollbackParams = parse_args(arguments)?;
                self.rollback(&params.path, &params.version_id).await
            }
            ToolName::Execute => {
                let params: ExecuteParams = parse_args(arguments)?;
                self.execute(&params.script).await
            }
            ToolName::SearchConversations => {
                let params: SearchParams = parse_args(arguments)?;
                self.search_conversations(&params.query, params.limit.unwrap_or(5))
                    .await
            }
            ToolName::IndexConversations => {
                let params: SessionsParams = parse_args(arguments)?;
                self.index_conversations(&params.sessions).await
            }
            ToolName::ExpandConversation => {
                let params: ExpandParams = parse_args(arguments)?;
                self.expand_conversation(&params.session_id, params.exchange_id.as_deref())
                    .await
            }
            ToolName::ConversationStats => self.conversation_stats().await,
            ToolName::ScheduleReminder => {
                let request: ScheduleRequest = parse_args(arguments)?;
                self.schedule_reminder(request).await
            }
            ToolName::ListReminders => self.list_reminders().await,
            ToolName::RemoveReminder => {
                let params: IdParams = parse_args(arguments)?;
                self.remove_reminder(&params.id).await
            }
            ToolName::CheckReminders => self.check_reminders().await,
            ToolName::ListPendingReflections => self.list_pending_reflections().await,
            ToolName::ApplyReflectionChanges => {
                let params: ApplyParams = parse_args(arguments)?;
                self.apply_reflection_changes(&params.date, &params.edits, params.archive)
                    .await
            }
            ToolName::ArchiveReflection => {
                let params: DateParams = parse_args(arguments)?;
                self.archive_reflection(&params.date).await
            }
        };
        Ok(outcome)
    }

    // ── Memory files ─────────────────────────────────────────────────────

    async fn read(&self, path: &str) -> ToolOutcome {
        match self.store.read(path).await {
            Ok(Some(file)) => ToolOutcome::ok(json!(file)),
            Ok(None) => ToolOutcome::error(format!("not found: {path}")),
            Err(err) => ToolOutcome::error(err),
        }
    }

    /// Write-through: the file lands in the object store, then the index
    /// row is refreshed so a subsequent search observes the new content.
    async fn write(&self, path: &str, content: &str) -> ToolOutcome {
        let receipt = match self.store.write(path, content).await {
            Ok(receipt) => receipt,
            Err(err) => return ToolOutcome::error(err),
        };
        if let Err(err) = self.index.update(path, content).await {
            return ToolOutcome::error(format!("stored but indexing failed: {err}"));
        }
        ToolOutcome::ok(json!({
            "path": path,
            "size": content.len(),
            "versionId": receipt.version_id,
            "indexed": true,
        }))
    }

    async fn list(&self, path: &str, recursive: bool) -> ToolOutcome {
        match self.store.list(path, recursive).await {
            Ok(rows) => ToolOutcome::ok(json!({ "files": rows })),
            Err(err) => ToolOutcome::error(err),
        }
    }

    async fn search(&self, query: &str, limit: usize, time_weight: bool) -> ToolOutcome {
        match self.index.search(query, limit, time_weight).await {
            Ok(hits) => {
                let results: Vec<Value> = hits
                    .into_iter()
                    .map(|hit| json!({ "path": hit.id, "score": hit.score }))
                    .collect();
                ToolOutcome::ok(json!({ "results": results }))
            }
            Err(err) => ToolOutcome::error(err),
        }
    }

    async fn history(&self, path: &str, limit: usize) -> ToolOutcome {
        match self.store.get_versions(path, limit).await {
            Ok(versions) => ToolOutcome::ok(json!({ "path": path, "versions": versions })),
            Err(err) => ToolOutcome::error(err),
        }
    }

    async fn rollback(&self, path: &str, version_id: &str) -> ToolOutcome {
        let content = match self.store.get_version(path, version_id).await {
            Ok(Some(content)) => content,
            Ok(None) => {
                return ToolOutcome::error(format!("unknown version {version_id} for {path}"))
            }
            Err(err) => return ToolOutcome::error(err),
        };
        if let Err(err) = self.store.write(path, &content).await {
            return ToolOutcome::error(err);
        }
        if let Err(err) = self.index.update(path, &content).await {
            return ToolOutcome::error(format!("restored but indexing failed: {err}"));
        }
        ToolOutcome::ok(json!({ "path": path, "restoredVersion": version_id }))
    }

    // ── Sandbox ──────────────────────────────────────────────────────────

    async fn execute(&self, script: &str) -> ToolOutcome {
        match self.sandbox.execute(script).await {
            Ok(value) => ToolOutcome::ok(json!({ "result": value })),
            Err(err) => ToolOutcome {
                value: json!({ "error": "Execution failed", "details": err.to_string() }),
                is_error: true,
            },
        }
    }

    // ── Conversations ────────────────────────────────────────────────────

    async fn search_conversations(&self, query: &str, limit: usize) -> ToolOutcome {
        match self.conversations.search(query, limit).await {
            Ok(hits) => ToolOutcome::ok(json!({ "results": hits })),
            Err(err) => ToolOutcome::error(err),
        }
    }

    async fn index_conversations(&self, sessions: &[Value]) -> ToolOutcome {
        match self.conversations.index_sessions(sessions).await {
            Ok(report) => ToolOutcome::ok(json!(report)),
            Err(err) => ToolOutcome::error(err),
        }
    }

    async fn expand_conversation(
        &self,
        session_id: &str,
        exchange_id: Option<&str>,
    ) -> ToolOutcome {
        match self.conversations.expand(session_id, exchange_id).await {
            Ok(exchanges) if exchanges.is_empty() => {
                ToolOutcome::error(format!("no exchanges for session {session_id}"))
            }
            Ok(exchanges) => ToolOutcome::ok(json!({ "exchanges": exchanges })),
            Err(err) => ToolOutcome::error(err),
        }
    }

    async fn conversation_stats(&self) -> ToolOutcome {
        match self.conversations.stats().await {
            Ok(stats) => ToolOutcome::ok(json!(stats)),
            Err(err) => ToolOutcome::error(err),
        }
    }

    // ── Reminders ────────────────────────────────────────────────────────

    async fn schedule_reminder(&self, request: ScheduleRequest) -> ToolOutcome {
        match self.reminders.schedule(request).await {
            Ok(reminder) => ToolOutcome::ok(json!(reminder)),
            Err(err) => ToolOutcome::error(err),
        }
    }

    async fn list_reminders(&self) -> ToolOutcome {
        match self.reminders.list().await {
            Ok(reminders) => ToolOutcome::ok(json!({ "reminders": reminders })),
            Err(err) => ToolOutcome::error(err),
        }
    }

    async fn remove_reminder(&self, id: &str) -> ToolOutcome {
        match self.reminders.remove(id).await {
            Ok(true) => ToolOutcome::ok(json!({ "removed": id })),
            Ok(false) => ToolOutcome::error(format!("no reminder with id {id}")),
            Err(err) => ToolOutcome::error(err),
        }
    }

    async fn check_reminders(&self) -> ToolOutcome {
        match self.reminders.check().await {
            Ok(fired) => ToolOutcome::ok(json!({ "fired": fired })),
            Err(err) => ToolOutcome::error(err),
        }
    }

    // ── Reflections ──────────────────────────────────────────────────────

    async fn list_pending_reflections(&self) -> ToolOutcome {
        match self.staging.list_pending().await {
            Ok(pending) => ToolOutcome::ok(json!({ "pending": pending })),
            Err(err) => ToolOutcome::error(err),
        }
    }

    async fn apply_reflection_changes(
        &self,
        date: &str,
        edits: &[usize],
        archive: bool,
    ) -> ToolOutcome {
        match self.staging.apply(&self.index, date, edits, archive).await {
            Ok(report) => ToolOutcome::ok(json!(report)),
            Err(err) => ToolOutcome::error(err),
        }
    }

    async fn archive_reflection(&self, date: &str) -> ToolOutcome {
        match self.staging.archive(date).await {
            Ok(target) => ToolOutcome::ok(json!({ "archived": target })),
            Err(err) => ToolOutcome::error(err),
        }
    }
}

fn parse_args<T: serde::de::DeserializeOwned>(arguments: Value) -> Result<T, DispatchError> {
    serde_json::from_value(arguments).map_err(|err| DispatchError::InvalidArguments(err.to_string()))
}
