//! Staged reflection documents.
//!
//! A reflection run that proposes edits produces one deterministic
//! markdown file under `memory/reflections/pending/{date}.md`. The
//! document is immutable once written: a human either applies its edits
//! (parsed back out of the markdown) or archives it.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::index::IndexService;
use crate::store::ObjectStore;

pub const PENDING_PREFIX: &str = "memory/reflections/pending/";
pub const ARCHIVE_PREFIX: &str = "memory/reflections/archive/";

/// Action of a proposed edit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EditAction {
    Replace,
    Append,
    Delete,
    Create,
}

impl EditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Replace => "replace",
            Self::Append => "append",
            Self::Delete => "delete",
            Self::Create => "create",
        }
    }

    /// Whether this action requires a content body.
    pub fn needs_content(&self) -> bool {
        !matches!(self, Self::Delete)
    }
}

impl std::str::FromStr for EditAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "replace" => Ok(Self::Replace),
            "append" => Ok(Self::Append),
            "delete" => Ok(Self::Delete),
            "create" => Ok(Self::Create),
            _ => Err(format!("unknown edit action: {s}")),
        }
    }
}

/// Mechanical fix categories eligible for auto-apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FixType {
    Typo,
    Whitespace,
    Newline,
    Duplicate,
    Formatting,
}

impl FixType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Typo => "typo",
            Self::Whitespace => "whitespace",
            Self::Newline => "newline",
            Self::Duplicate => "duplicate",
            Self::Formatting => "formatting",
        }
    }
}

/// An edit staged for human review. Never touches files until applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposedEdit {
    pub path: String,
    pub action: EditAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    pub reason: String,
}

/// A mechanical fix that already ran.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoAppliedFix {
    pub path: String,
    pub fix_type: FixType,
    pub reason: String,
}

/// An issue the quick scan handed to deep analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlaggedIssue {
    pub path: String,
    pub issue: String,
}

/// Everything one reflection run produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StagedReflection {
    /// `YYYY-MM-DD`
    pub date: String,
    pub summary: String,
    pub proposed_edits: Vec<ProposedEdit>,
    pub auto_applied_fixes: Vec<AutoAppliedFix>,
    pub flagged_issues: Vec<FlaggedIssue>,
    pub quick_scan_iterations: u32,
    pub deep_analysis_iterations: u32,
}

pub fn pending_path(date: &str) -> String {
    format!("{PENDING_PREFIX}{date}.md")
}

pub fn archive_path(date: &str) -> String {
    format!("{ARCHIVE_PREFIX}{date}.md")
}

// ── Document building ────────────────────────────────────────────────────

/// Render the staged reflection as markdown. [`parse_proposed_edits`] on
/// the output yields exactly the input edits.
pub fn build_document(reflection: &StagedReflection) -> String {
    let mut doc = String::new();
    doc.push_str(&format!("# Reflection — {}\n\n", reflection.date));
    doc.push_str(&reflection.summary);
    doc.push_str("\n\n## Statistics\n\n");
    doc.push_str("| Metric | Value |\n|--------|-------|\n");
    doc.push_str(&format!(
        "| Proposed edits | {} |\n",
        reflection.proposed_edits.len()
    ));
    doc.push_str(&format!(
        "| Auto-applied fixes | {} |\n",
        reflection.auto_applied_fixes.len()
    ));
    doc.push_str(&format!(
        "| Flagged issues | {} |\n",
        reflection.flagged_issues.len()
    ));
    doc.push_str(&format!(
        "| Quick-scan iterations | {} |\n",
        reflection.quick_scan_iterations
    ));
    doc.push_str(&format!(
        "| Deep-analysis iterations | {} |\n",
        reflection.deep_analysis_iterations
    ));

    doc.push_str("\n## Auto-Applied Fixes\n\n");
    if reflection.auto_applied_fixes.is_empty() {
        doc.push_str("None.\n");
    } else {
        for fix in &reflection.auto_applied_fixes {
            doc.push_str(&format!(
                "- `{}` ({}): {}\n",
                fix.path,
                fix.fix_type.as_str(),
                fix.reason
            ));
        }
    }

    doc.push_str("\n## Proposed Changes\n\n");
    if reflection.proposed_edits.is_empty() {
        doc.push_str("None.\n");
    } else {
        for (i, edit) in reflection.proposed_edits.iter().enumerate() {
            doc.push_str(&format!(
                "### {}. {} `{}`\n\n",
                i + 1,
                edit.action.as_str(),
                edit.path
            ));
            doc.push_str(&format!("**Reason:** {}\n\n", edit.reason));
            if let Some(content) = &edit.content {
                // The newline before the closing fence is a separator,
                // not part of the content; parsing strips exactly one.
                doc.push_str("**Content:**\n\n```\n");
                doc.push_str(content);
                doc.push_str("\n```\n\n");
            }
        }
    }

    // Issues already covered by a proposed edit are resolved, not open.
    let open_issues: Vec<&FlaggedIssue> = reflection
        .flagged_issues
        .iter()
        .filter(|issue| {
            !reflection
                .proposed_edits
                .iter()
                .any(|edit| edit.path == issue.path)
        })
        .collect();
    doc.push_str("\n## Unresolved Flagged Issues\n\n");
    if open_issues.is_empty() {
        doc.push_str("None.\n");
    } else {
        for issue in open_issues {
            doc.push_str(&format!("- `{}`: {}\n", issue.path, issue.issue));
        }
    }

    doc.push_str("\n## After Review\n\n");
    doc.push_str(
        "Apply selected changes with `apply_reflection_changes` (1-indexed edit \
         numbers), or shelve this document with `archive_reflection`. Applied \
         files are re-indexed automatically.\n",
    );
    doc
}

/// Recover the proposed edits from a staged document.
pub fn parse_proposed_edits(markdown: &str) -> Vec<ProposedEdit> {
    let Some(section_start) = markdown.find("\n## Proposed Changes") else {
        return Vec::new();
    };
    let section = &markdown[section_start..];
    let section_end = section[1..]
        .find("\n## ")
        .map(|i| i + 1)
        .unwrap_or(section.len());
    let section = &section[..section_end];

    let mut edits = Vec::new();
    for block in section.split("\n### ").skip(1) {
        if let Some(edit) = parse_edit_block(block) {
            edits.push(edit);
        }
    }
    edits
}

/// One `### N. action `path`` block with its Reason and Content.
fn parse_edit_block(block: &str) -> Option<ProposedEdit> {
    let header = block.lines().next()?;
    // "N. action `path`"
    let after_number = header.split_once(". ")?.1;
    let (action_str, rest) = after_number.split_once(' ')?;
    let action: EditAction = action_str.parse().ok()?;
    let path = rest.trim().trim_matches('`').to_string();

    let reason = block
        .lines()
        .find_map(|line| line.strip_prefix("**Reason:** "))
        .unwrap_or("")
        .to_string();

    let content = block.find("**Content:**").and_then(|pos| {
        let after = &block[pos..];
        let fence_start = after.find("```\n")? + 4;
        let body = &after[fence_start..];
        let fence_end = body.rfind("\n```")?;
        Some(body[..fence_end].to_string())
    });

    Some(ProposedEdit {
        path,
        action,
        content,
        reason,
    })
}

// ── Store-backed staging operations ──────────────────────────────────────

pub struct ReflectionStaging {
    store: Arc<dyn ObjectStore>,
}

impl ReflectionStaging {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    /// Write the staged document; returns its path.
    pub async fn write(&self, reflection: &StagedReflection) -> Result<String> {
        let path = pending_path(&reflection.date);
        let document = build_document(reflection);
        self.store.write(&path, &document).await?;
        tracing::info!(path = %path, edits = reflection.proposed_edits.len(), "reflection staged");
        Ok(path)
    }

    /// Pending documents, newest date first.
    pub async fn list_pending(&self) -> Result<Vec<String>> {
        let mut paths: Vec<String> = self
            .store
            .list(PENDING_PREFIX, true)
            .await?
            .into_iter()
            .map(|meta| meta.path)
            .collect();
        paths.sort_by(|a, b| b.cmp(a));
        Ok(paths)
    }

    /// Move a pending document to the archive (copy, then delete).
    pub async fn archive(&self, date: &str) -> Result<String> {
        let source = pending_path(date);
        let file = self
            .store
            .read(&source)
            .await?
            .with_context(|| format!("no pending reflection for {date}"))?;
        let target = archive_path(date);
        self.store.write(&target, &file.content).await?;
        self.store.delete(&source).await?;
        tracing::info!(from = %source, to = %target, "reflection archived");
        Ok(target)
    }

    /// Apply proposed edits from the staged document for `date`.
    /// `selection` holds 1-indexed edit numbers; empty means all. The
    /// document is archived only when every parsed edit was applied
    /// without error and `archive_on_success` is set.
    pub async fn apply(
        &self,
        index: &IndexService,
        date: &str,
        selection: &[usize],
        archive_on_success: bool,
    ) -> Result<ApplyReport> {
        let path = pending_path(date);
        let file = self
            .store
            .read(&path)
            .await?
            .with_context(|| format!("no pending reflection for {date}"))?;
        let edits = parse_proposed_edits(&file.content);
        if edits.is_empty() {
            bail!("no proposed edits in {path}");
        }

        let mut report = ApplyReport::default();
        for (i, edit) in edits.iter().enumerate() {
            let number = i + 1;
            if !selection.is_empty() && !selection.contains(&number) {
                report.skipped.push(number);
                continue;
            }
            match self.apply_edit(index, edit).await {
                Ok(()) => report.applied.push(AppliedEdit {
                    number,
                    path: edit.path.clone(),
                    action: edit.action,
                }),
                Err(err) => report.failed.push(FailedEdit {
                    number,
                    path: edit.path.clone(),
                    error: err.to_string(),
                }),
            }
        }

        // Full success means every edit in the document ran clean.
        if archive_on_success && report.failed.is_empty() && report.skipped.is_empty() {
            self.archive(date).await?;
            report.archived = true;
        }
        Ok(report)
    }

    async fn apply_edit(&self, index: &IndexService, edit: &ProposedEdit) -> Result<()> {
        match edit.action {
            EditAction::Create | EditAction::Replace => {
                let content = edit
                    .content
                    .as_deref()
                    .context("edit is missing content")?;
                self.store.write(&edit.path, content).await?;
                index.update(&edit.path, content).await?;
            }
            EditAction::Append => {
                let addition = edit
                    .content
                    .as_deref()
                    .context("edit is missing content")?;
                let existing = self
                    .store
                    .read(&edit.path)
                    .await?
                    .map(|f| f.content)
                    .unwrap_or_default();
                let combined = format!("{existing}{addition}");
                self.store.write(&edit.path, &combined).await?;
                index.update(&edit.path, &combined).await?;
            }
            EditAction::Delete => {
                self.store.delete(&edit.path).await?;
                index.delete(&edit.path).await?;
            }
        }
        Ok(())
    }
}

#[derive(Debug, Default, serde::Serialize)]
pub struct ApplyReport {
    pub applied: Vec<AppliedEdit>,
    pub failed: Vec<FailedEdit>,
    pub skipped: Vec<usize>,
    pub archived: bool,
}

#[derive(Debug, serde::Serialize)]
pub struct AppliedEdit {
    pub number: usize,
    pub path: String,
    pub action: EditAction,
}

#[derive(Debug, serde::Serialize)]
pub struct FailedEdit {
    pub number: usize,
    pub path: String,
    pub error: String,
}
