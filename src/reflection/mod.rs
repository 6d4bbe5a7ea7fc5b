//! Agentic reflection — the daily self-maintenance pass.
//!
//! Two bounded tool-calling loops run back to back: a quick scan on the
//! fast model applies mechanical fixes and flags anything deeper, then a
//! deep analysis on the primary model investigates the flags and stages
//! edits for human review. Mechanical fixes land immediately (and are
//! re-indexed); everything else waits in a staged document under
//! `memory/reflections/pending/`.

pub mod staging;
pub mod tools;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::index::IndexService;
use crate::llm::{ChatMessage, ChatModel, ModelTier, ToolCall};
use crate::notify::Notifier;
use crate::store::ObjectStore;
use staging::{
    AutoAppliedFix, FlaggedIssue, ProposedEdit, ReflectionStaging, StagedReflection,
};
use tools::{
    deep_analysis_tools, quick_scan_tools, AutoApplyArgs, DeepAnalysisTool, ProposeEditArgs,
    QuickScanTool,
};

/// Marker recording when the last reflection ran.
pub const LAST_REFLECTION_KEY: &str = "memory/meta/last-reflection.json";

const MAX_QUICK_SCAN: u32 = 5;
const MAX_DEEP_ANALYSIS: u32 = 10;

/// Free-form model text standing in for a summary is capped here.
const SUMMARY_FALLBACK_CHARS: usize = 500;

const QUICK_SCAN_SYSTEM: &str = "You are the maintenance pass of a personal memory \
    service. You fix only mechanical problems: typos, stray whitespace, missing \
    trailing newlines, duplicated fragments, and broken formatting. Anything that \
    requires judgment gets flagged for deep analysis instead of fixed.";

const QUICK_SCAN_INSTRUCTIONS: &str = "Scan the memory files for mechanical problems. \
    Use autoApply for safe fixes, flagForDeepAnalysis for anything needing judgment, \
    and call finishQuickScan when done.";

const DEEP_ANALYSIS_SYSTEM: &str = "You are the curator of a personal memory service. \
    You consolidate duplicated knowledge, surface contradictions, and prune stale \
    notes. You never rewrite files directly: propose edits with proposeEdit and let a \
    human review them. Only mechanical cleanups may use autoApply.";

/// What one reflection run produced, including partial state when a
/// phase failed.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReflectionOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub summary: String,
    pub proposed_edits: Vec<ProposedEdit>,
    pub auto_applied_fixes: Vec<AutoAppliedFix>,
    pub flagged_issues: Vec<FlaggedIssue>,
    pub quick_scan_iterations: u32,
    pub deep_analysis_iterations: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub staged_path: Option<String>,
}

#[derive(Default)]
struct RunState {
    auto_applied: Vec<AutoAppliedFix>,
    flagged: Vec<FlaggedIssue>,
    proposed: Vec<ProposedEdit>,
    quick_iterations: u32,
    deep_iterations: u32,
    summary: Option<String>,
}

pub struct ReflectionEngine {
    store: Arc<dyn ObjectStore>,
    index: Arc<IndexService>,
    model: Arc<dyn ChatModel>,
    staging: ReflectionStaging,
    notifier: Arc<Notifier>,
}

impl ReflectionEngine {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        index: Arc<IndexService>,
        model: Arc<dyn ChatModel>,
        notifier: Arc<Notifier>,
    ) -> Self {
        Self {
            staging: ReflectionStaging::new(store.clone()),
            store,
            index,
            model,
            notifier,
        }
    }

    /// Run both phases. A phase failure ends the run with
    /// `success = false` but still stages whatever accumulated and still
    /// writes the last-reflection marker.
    pub async fn run(&self) -> Result<ReflectionOutcome> {
        let mut state = RunState::default();
        let mut error = None;

        if let Err(err) = self.quick_scan(&mut state).await {
            tracing::warn!(error = %err, "quick scan failed");
            error = Some(format!("quick scan failed: {err}"));
        }
        if error.is_none() {
            if let Err(err) = self.deep_analysis(&mut state).await {
                tracing::warn!(error = %err, "deep analysis failed");
                error = Some(format!("deep analysis failed: {err}"));
            }
        }

        let date = Utc::now().format("%Y-%m-%d").to_string();
        let summary = state.summary.clone().unwrap_or_else(|| {
            format!(
                "Reflection ran {} quick-scan and {} deep-analysis iterations: {} \
                 auto-applied fixes, {} proposed edits, {} flagged issues.",
                state.quick_iterations,
                state.deep_iterations,
                state.auto_applied.len(),
                state.proposed.len(),
                state.flagged.len()
            )
        });

        let staged_path = if state.proposed.is_empty() {
            None
        } else {
            let staged = StagedReflection {
                date: date.clone(),
                summary: summary.clone(),
                proposed_edits: state.proposed.clone(),
                auto_applied_fixes: state.auto_applied.clone(),
                flagged_issues: state.flagged.clone(),
                quick_scan_iterations: state.quick_iterations,
                deep_analysis_iterations: state.deep_iterations,
            };
            Some(self.staging.write(&staged).await?)
        };

        let marker = json!({ "timestamp": Utc::now().to_rfc3339(), "date": date });
        self.store
            .write(LAST_REFLECTION_KEY, &marker.to_string())
            .await?;

        let actionable = !state.proposed.is_empty() || !state.auto_applied.is_empty();
        if actionable {
            let note = match &staged_path {
                Some(path) => format!(
                    "Reflection: {} auto-fixes applied, {} edits pending review at {path}",
                    state.auto_applied.len(),
                    state.proposed.len()
                ),
                None => format!(
                    "Reflection: {} auto-fixes applied, nothing pending review",
                    state.auto_applied.len()
                ),
            };
            self.notifier.send(&note).await;
        }

        Ok(ReflectionOutcome {
            success: error.is_none(),
            error,
            summary,
            proposed_edits: state.proposed,
            auto_applied_fixes: state.auto_applied,
            flagged_issues: state.flagged,
            quick_scan_iterations: state.quick_iterations,
            deep_analysis_iterations: state.deep_iterations,
            staged_path,
        })
    }

    // ── Phase A: quick scan ──────────────────────────────────────────────

    async fn quick_scan(&self, state: &mut RunState) -> Result<()> {
        let tools = quick_scan_tools();
        let mut messages = vec![ChatMessage::user(QUICK_SCAN_INSTRUCTIONS)];

        while state.quick_iterations < MAX_QUICK_SCAN {
            let outcome = self
                .model
                .complete(ModelTier::Fast, QUICK_SCAN_SYSTEM, &messages, &tools)
                .await?;
            state.quick_iterations += 1;

            if outcome.tool_calls.is_empty() {
                return Ok(());
            }
            messages.push(ChatMessage::assistant(
                outcome.text.clone(),
                outcome.tool_calls.clone(),
            ));

            let mut finished = false;
            for call in &outcome.tool_calls {
                let result = self.run_quick_tool(call, state, &mut finished).await;
                messages.push(tool_result_message(call, result));
            }
            if finished {
                return Ok(());
            }
        }
        Ok(())
    }

    async fn run_quick_tool(
        &self,
        call: &ToolCall,
        state: &mut RunState,
        finished: &mut bool,
    ) -> Result<Value> {
        match QuickScanTool::parse(call)? {
            QuickScanTool::ListFiles(args) => self.list_files(&args.path, args.recursive).await,
            QuickScanTool::ReadFile(args) => self.read_file(&args.path).await,
            QuickScanTool::AutoApply(args) => self.auto_apply(&args, state).await,
            QuickScanTool::FlagForDeepAnalysis(args) => {
                state.flagged.push(FlaggedIssue {
                    path: args.path,
                    issue: args.issue,
                });
                Ok(json!({ "status": "flagged" }))
            }
            QuickScanTool::FinishQuickScan(args) => {
                *finished = true;
                tracing::info!(
                    auto_applied = args.auto_applied,
                    flagged = args.flagged_for_deep_analysis,
                    "quick scan finished"
                );
                Ok(json!({ "status": "done" }))
            }
        }
    }

    // ── Phase B: deep analysis ───────────────────────────────────────────

    async fn deep_analysis(&self, state: &mut RunState) -> Result<()> {
        let tools = deep_analysis_tools();
        let mut opening = String::from(
            "Analyze the memory files for duplicated, contradictory, or stale \
             knowledge and stage the edits that would clean them up.\n",
        );
        if state.flagged.is_empty() {
            opening.push_str("\nThe quick scan flagged no issues.\n");
        } else {
            opening.push_str("\nThe quick scan flagged these issues:\n");
            for issue in &state.flagged {
                opening.push_str(&format!("- {}: {}\n", issue.path, issue.issue));
            }
        }
        opening.push_str(&format!(
            "\n{} mechanical fixes were already auto-applied.\n",
            state.auto_applied.len()
        ));
        let mut messages = vec![ChatMessage::user(opening)];

        while state.deep_iterations < MAX_DEEP_ANALYSIS {
            let outcome = self
                .model
                .complete(ModelTier::Primary, DEEP_ANALYSIS_SYSTEM, &messages, &tools)
                .await?;
            state.deep_iterations += 1;

            if outcome.tool_calls.is_empty() {
                // The model's own words stand in for a summary.
                state.summary = Some(
                    crate::embedding::truncate_chars(&outcome.text, SUMMARY_FALLBACK_CHARS)
                        .to_string(),
                );
                return Ok(());
            }
            messages.push(ChatMessage::assistant(
                outcome.text.clone(),
                outcome.tool_calls.clone(),
            ));

            let mut finished = false;
            for call in &outcome.tool_calls {
                let result = self.run_deep_tool(call, state, &mut finished).await;
                messages.push(tool_result_message(call, result));
            }
            if finished {
                return Ok(());
            }
        }
        Ok(())
    }

    async fn run_deep_tool(
        &self,
        call: &ToolCall,
        state: &mut RunState,
        finished: &mut bool,
    ) -> Result<Value> {
        match DeepAnalysisTool::parse(call)? {
            DeepAnalysisTool::SearchMemory(args) => {
                let hits = self
                    .index
                    .search(&args.query, args.limit.unwrap_or(5), false)
                    .await?;
                Ok(serde_json::to_value(hits)?)
            }
            DeepAnalysisTool::ReadFile(args) => self.read_file(&args.path).await,
            DeepAnalysisTool::ListFiles(args) => {
                self.list_files(&args.path, args.recursive).await
            }
            DeepAnalysisTool::ProposeEdit(args) => self.propose_edit(&args, state).await,
            DeepAnalysisTool::AutoApply(args) => self.auto_apply(&args, state).await,
            DeepAnalysisTool::FinishReflection(args) => {
                *finished = true;
                state.summary = Some(args.summary);
                Ok(json!({ "status": "done" }))
            }
        }
    }

    // ── Shared tool implementations ──────────────────────────────────────

    async fn list_files(&self, path: &str, recursive: bool) -> Result<Value> {
        let rows = self.store.list(path, recursive).await?;
        Ok(serde_json::to_value(rows)?)
    }

    async fn read_file(&self, path: &str) -> Result<Value> {
        match self.store.read(path).await? {
            Some(file) => Ok(json!({ "path": file.path, "content": file.content })),
            None => bail!("file not found: {path}"),
        }
    }

    /// Execute a mechanical fix. Succeeds only when the change really is
    /// mechanical; the write (and re-index) is skipped when the content
    /// comes out unchanged.
    async fn auto_apply(&self, args: &AutoApplyArgs, state: &mut RunState) -> Result<Value> {
        use staging::FixType;

        let file = self
            .store
            .read(&args.path)
            .await?
            .with_context(|| format!("file not found: {}", args.path))?;
        let content = file.content;

        let updated = match args.fix_type {
            FixType::Typo | FixType::Whitespace | FixType::Formatting => {
                let old = args
                    .old_text
                    .as_deref()
                    .context("oldText is required for this fix type")?;
                let new = args
                    .new_text
                    .as_deref()
                    .context("newText is required for this fix type")?;
                if !content.contains(old) {
                    bail!("oldText not found in {}", args.path);
                }
                content.replacen(old, new, 1)
            }
            FixType::Newline => format!("{}\n", content.trim_end()),
            FixType::Duplicate => {
                let old = args
                    .old_text
                    .as_deref()
                    .context("oldText is required for duplicate fixes")?;
                if !content.contains(old) {
                    bail!("oldText not found in {}", args.path);
                }
                content.replacen(old, args.new_text.as_deref().unwrap_or(""), 1)
            }
        };

        let changed = updated != content;
        if changed {
            self.store.write(&args.path, &updated).await?;
            self.index.update(&args.path, &updated).await?;
        }
        state.auto_applied.push(AutoAppliedFix {
            path: args.path.clone(),
            fix_type: args.fix_type,
            reason: args.reason.clone(),
        });
        tracing::info!(path = %args.path, fix = args.fix_type.as_str(), changed, "auto-fix applied");
        Ok(json!({ "status": "applied", "changed": changed }))
    }

    /// Stage an edit — no file is touched until a human applies it.
    async fn propose_edit(&self, args: &ProposeEditArgs, state: &mut RunState) -> Result<Value> {
        if args.action.needs_content() && args.content.is_none() {
            bail!("content is required for {} edits", args.action.as_str());
        }
        if args.action != staging::EditAction::Create
            && self.store.read(&args.path).await?.is_none()
        {
            bail!("file not found: {}", args.path);
        }
        state.proposed.push(ProposedEdit {
            path: args.path.clone(),
            action: args.action,
            content: args.content.clone(),
            reason: args.reason.clone(),
        });
        Ok(json!({ "status": "staged", "pending": state.proposed.len() }))
    }
}

/// Per-call failures feed the message trail instead of ending the phase.
fn tool_result_message(call: &ToolCall, result: Result<Value>) -> ChatMessage {
    let content = match result {
        Ok(value) => value.to_string(),
        Err(err) => json!({ "error": err.to_string() }).to_string(),
    };
    ChatMessage::tool_result(&call.id, content)
}

/// Date (`YYYY-MM-DD`) of the last completed reflection, if any.
pub async fn last_reflection_date(store: &dyn ObjectStore) -> Option<String> {
    let file = store.read(LAST_REFLECTION_KEY).await.ok()??;
    let marker: Value = serde_json::from_str(&file.content).ok()?;
    marker.get("date")?.as_str().map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WebhookConfig;
    use crate::embedding::deterministic::DeterministicEmbedder;
    use crate::llm::ChatOutcome;
    use crate::store::fs::FsStore;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use tokio::sync::Mutex;

    /// Scripted model: pops pre-baked turns per tier, then falls back to
    /// a plain-text turn with no tool calls.
    struct ScriptedModel {
        fast: Mutex<VecDeque<ChatOutcome>>,
        primary: Mutex<VecDeque<ChatOutcome>>,
    }

    impl ScriptedModel {
        fn new(fast: Vec<ChatOutcome>, primary: Vec<ChatOutcome>) -> Self {
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
            _tools: &[crate::llm::ToolDef],
        ) -> Result<ChatOutcome> {
            let queue = match tier {
                ModelTier::Fast => &self.fast,
                ModelTier::Primary => &self.primary,
            };
            Ok(queue.lock().await.pop_front().unwrap_or(ChatOutcome {
                text: "nothing left to do".into(),
                tool_calls: Vec::new(),
            }))
        }
    }

    fn turn(calls: Vec<(&str, Value)>) -> ChatOutcome {
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

    async fn fixtures(
        fast: Vec<ChatOutcome>,
        primary: Vec<ChatOutcome>,
    ) -> (tempfile::TempDir, Arc<FsStore>, Arc<IndexService>, ReflectionEngine) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FsStore::open(dir.path(), 5).unwrap());
        let index = Arc::new(
            IndexService::open_in_memory(Arc::new(DeterministicEmbedder::new(32))).unwrap(),
        );
        let engine = ReflectionEngine::new(
            store.clone(),
            index.clone(),
            Arc::new(ScriptedModel::new(fast, primary)),
            Arc::new(Notifier::new(&WebhookConfig::default())),
        );
        (dir, store, index, engine)
    }

    #[tokio::test]
    async fn quick_scan_applies_typo_fix() {
        let fast = vec![turn(vec![
            (
                "autoApply",
                json!({
                    "path": "memory/x.md",
                    "fixType": "typo",
                    "oldText": "tset",
                    "newText": "test",
                    "reason": "misspelling"
                }),
            ),
            ("finishQuickScan", json!({"autoApplied": 1, "flaggedForDeepAnalysis": 0})),
        ])];
        let (_dir, store, _index, engine) = fixtures(fast, vec![]).await;
        store.write("memory/x.md", "a tset file").await.unwrap();

        let outcome = engine.run().await.unwrap();

        assert!(outcome.success);
        assert_eq!(outcome.auto_applied_fixes.len(), 1);
        assert_eq!(outcome.quick_scan_iterations, 1);
        let fixed = store.read("memory/x.md").await.unwrap().unwrap();
        assert_eq!(fixed.content, "a test file");
    }

    #[tokio::test]
    async fn auto_apply_rejects_missing_old_text() {
        let fast = vec![
            turn(vec![(
                "autoApply",
                json!({
                    "path": "memory/x.md",
                    "fixType": "typo",
                    "oldText": "absent",
                    "newText": "present",
                    "reason": "r"
                }),
            )]),
            ChatOutcome::default(),
        ];
        let (_dir, store, _index, engine) = fixtures(fast, vec![]).await;
        store.write("memory/x.md", "untouched").await.unwrap();

        let outcome = engine.run().await.unwrap();
        // The failure went into the message trail, not the run status
        assert!(outcome.success);
        assert!(outcome.auto_applied_fixes.is_empty());
        assert_eq!(
            store.read("memory/x.md").await.unwrap().unwrap().content,
            "untouched"
        );
    }

    #[tokio::test]
    async fn newline_fix_normalizes_trailing_whitespace() {
        let fast = vec![turn(vec![
            (
                "autoApply",
                json!({"path": "memory/n.md", "fixType": "newline", "reason": "trailing junk"}),
            ),
            ("finishQuickScan", json!({})),
        ])];
        let (_dir, store, _index, engine) = fixtures(fast, vec![]).await;
        store.write("memory/n.md", "body text   \n\n\n").await.unwrap();

        engine.run().await.unwrap();
        assert_eq!(
            store.read("memory/n.md").await.unwrap().unwrap().content,
            "body text\n"
        );
    }

    #[tokio::test]
    async fn deep_analysis_stages_proposed_edits() {
        let primary = vec![turn(vec![
            (
                "proposeEdit",
                json!({
                    "path": "memory/x.md",
                    "action": "replace",
                    "content": "merged content",
                    "reason": "merge duplicates"
                }),
            ),
            (
                "finishReflection",
                json!({"summary": "done", "proposedChanges": 1, "autoApplied": 0}),
            ),
        ])];
        let (_dir, store, _index, engine) = fixtures(vec![], primary).await;
        store.write("memory/x.md", "original").await.unwrap();

        let outcome = engine.run().await.unwrap();

        assert!(outcome.success);
        assert_eq!(outcome.summary, "done");
        assert_eq!(outcome.proposed_edits.len(), 1);
        // Stage-only: the file is untouched until review
        assert_eq!(
            store.read("memory/x.md").await.unwrap().unwrap().content,
            "original"
        );
        // And a pending document exists at today's date
        let staged = outcome.staged_path.unwrap();
        let doc = store.read(&staged).await.unwrap().unwrap();
        assert!(doc.content.contains("merge duplicates"));
        let parsed = staging::parse_proposed_edits(&doc.content);
        assert_eq!(parsed, outcome.proposed_edits);
    }

    #[tokio::test]
    async fn propose_edit_rejects_missing_target() {
        let primary = vec![
            turn(vec![(
                "proposeEdit",
                json!({
                    "path": "memory/ghost.md",
                    "action": "replace",
                    "content": "text",
                    "reason": "r"
                }),
            )]),
            ChatOutcome::default(),
        ];
        let (_dir, _store, _index, engine) = fixtures(vec![], primary).await;
        let outcome = engine.run().await.unwrap();
        assert!(outcome.proposed_edits.is_empty());
        assert!(outcome.staged_path.is_none());
    }

    #[tokio::test]
    async fn no_tool_calls_uses_model_text_as_summary() {
        let primary = vec![ChatOutcome {
            text: "Everything looks tidy.".into(),
            tool_calls: Vec::new(),
        }];
        let (_dir, _store, _index, engine) = fixtures(vec![], primary).await;
        let outcome = engine.run().await.unwrap();
        assert_eq!(outcome.summary, "Everything looks tidy.");
        assert_eq!(outcome.deep_analysis_iterations, 1);
    }

    #[tokio::test]
    async fn iteration_caps_bound_both_phases() {
        // Every turn lists files, never finishes
        let looping = |n: usize| -> Vec<ChatOutcome> {
            (0..n)
                .map(|_| turn(vec![("listFiles", json!({"path": "memory/"}))]))
                .collect()
        };
        let (_dir, _store, _index, engine) = fixtures(looping(20), looping(20)).await;
        let outcome = engine.run().await.unwrap();
        assert_eq!(outcome.quick_scan_iterations, 5);
        assert_eq!(outcome.deep_analysis_iterations, 10);
        // Cap reached with no summary: one is synthesized
        assert!(outcome.summary.contains("10 deep-analysis iterations"));
    }

    #[tokio::test]
    async fn marker_is_written_even_on_empty_run() {
        let (_dir, store, _index, engine) = fixtures(vec![], vec![]).await;
        engine.run().await.unwrap();
        let date = last_reflection_date(store.as_ref()).await.unwrap();
        assert_eq!(date, Utc::now().format("%Y-%m-%d").to_string());
    }
}
