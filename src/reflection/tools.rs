//! Tool surface exposed to the reflection models.
//!
//! Two closed tool sets — one per phase — with exhaustive parsing from
//! the model's tool calls. Unknown names and malformed arguments come
//! back as parse errors that the controller feeds into the message trail
//! instead of crashing the run.

use anyhow::{anyhow, Result};
use serde::Deserialize;
use serde_json::json;

use super::staging::{EditAction, FixType};
use crate::llm::{ToolCall, ToolDef};

/// Arguments shared by every `autoApply` call.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoApplyArgs {
    pub path: String,
    pub fix_type: FixType,
    #[serde(default)]
    pub old_text: Option<String>,
    #[serde(default)]
    pub new_text: Option<String>,
    pub reason: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposeEditArgs {
    pub path: String,
    pub action: EditAction,
    #[serde(default)]
    pub content: Option<String>,
    pub reason: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListFilesArgs {
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub recursive: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReadFileArgs {
    pub path: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchMemoryArgs {
    pub query: String,
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlagArgs {
    pub path: String,
    pub issue: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinishQuickScanArgs {
    #[serde(default)]
    pub auto_applied: u32,
    #[serde(default)]
    pub flagged_for_deep_analysis: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinishReflectionArgs {
    pub summary: String,
    #[serde(default)]
    pub proposed_changes: u32,
    #[serde(default)]
    pub auto_applied: u32,
}

/// Tool calls available during the quick scan.
#[derive(Debug, Clone)]
pub enum QuickScanTool {
    ListFiles(ListFilesArgs),
    ReadFile(ReadFileArgs),
    AutoApply(AutoApplyArgs),
    FlagForDeepAnalysis(FlagArgs),
    FinishQuickScan(FinishQuickScanArgs),
}

impl QuickScanTool {
    pub fn parse(call: &ToolCall) -> Result<Self> {
        let args = call.arguments.clone();
        match call.name.as_str() {
            "listFiles" => Ok(Self::ListFiles(serde_json::from_value(args)?)),
            "readFile" => Ok(Self::ReadFile(serde_json::from_value(args)?)),
            "autoApply" => Ok(Self::AutoApply(serde_json::from_value(args)?)),
            "flagForDeepAnalysis" => Ok(Self::FlagForDeepAnalysis(serde_json::from_value(args)?)),
            "finishQuickScan" => Ok(Self::FinishQuickScan(serde_json::from_value(args)?)),
            other => Err(anyhow!("unknown quick-scan tool: {other}")),
        }
    }
}

/// Tool calls available during deep analysis.
#[derive(Debug, Clone)]
pub enum DeepAnalysisTool {
    SearchMemory(SearchMemoryArgs),
    ReadFile(ReadFileArgs),
    ListFiles(ListFilesArgs),
    ProposeEdit(ProposeEditArgs),
    AutoApply(AutoApplyArgs),
    FinishReflection(FinishReflectionArgs),
}

impl DeepAnalysisTool {
    pub fn parse(call: &ToolCall) -> Result<Self> {
        let args = call.arguments.clone();
        match call.name.as_str() {
            "searchMemory" => Ok(Self::SearchMemory(serde_json::from_value(args)?)),
            "readFile" => Ok(Self::ReadFile(serde_json::from_value(args)?)),
            "listFiles" => Ok(Self::ListFiles(serde_json::from_value(args)?)),
            "proposeEdit" => Ok(Self::ProposeEdit(serde_json::from_value(args)?)),
            "autoApply" => Ok(Self::AutoApply(serde_json::from_value(args)?)),
            "finishReflection" => Ok(Self::FinishReflection(serde_json::from_value(args)?)),
            other => Err(anyhow!("unknown deep-analysis tool: {other}")),
        }
    }
}

fn list_files_def() -> ToolDef {
    ToolDef {
        name: "listFiles".into(),
        description: "List memory files under a path prefix.".into(),
        input_schema: json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Prefix to list, e.g. memory/" },
                "recursive": { "type": "boolean" }
            }
        }),
    }
}

fn read_file_def() -> ToolDef {
    ToolDef {
        name: "readFile".into(),
        description: "Read one memory file.".into(),
        input_schema: json!({
            "type": "object",
            "properties": { "path": { "type": "string" } },
            "required": ["path"]
        }),
    }
}

fn auto_apply_def() -> ToolDef {
    ToolDef {
        name: "autoApply".into(),
        description: "Apply a mechanical fix immediately. typo/whitespace/formatting \
                      replace oldText with newText; newline normalizes the trailing \
                      newline; duplicate removes the first occurrence of oldText."
            .into(),
        input_schema: json!({
            "type": "object",
            "properties": {
                "path": { "type": "string" },
                "fixType": { "type": "string", "enum": ["typo", "whitespace", "newline", "duplicate", "formatting"] },
                "oldText": { "type": "string" },
                "newText": { "type": "string" },
                "reason": { "type": "string" }
            },
            "required": ["path", "fixType", "reason"]
        }),
    }
}

/// Schema set for the quick-scan phase.
pub fn quick_scan_tools() -> Vec<ToolDef> {
    vec![
        list_files_def(),
        read_file_def(),
        auto_apply_def(),
        ToolDef {
            name: "flagForDeepAnalysis".into(),
            description: "Flag a file whose problem needs more than a mechanical fix.".into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "path": { "type": "string" },
                    "issue": { "type": "string" }
                },
                "required": ["path", "issue"]
            }),
        },
        ToolDef {
            name: "finishQuickScan".into(),
            description: "End the quick scan, reporting how many fixes ran and how many issues were flagged.".into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "autoApplied": { "type": "integer" },
                    "flaggedForDeepAnalysis": { "type": "integer" }
                }
            }),
        },
    ]
}

/// Schema set for the deep-analysis phase.
pub fn deep_analysis_tools() -> Vec<ToolDef> {
    vec![
        ToolDef {
            name: "searchMemory".into(),
            description: "Semantic search over all indexed memory.".into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "query": { "type": "string" },
                    "limit": { "type": "integer" }
                },
                "required": ["query"]
            }),
        },
        read_file_def(),
        list_files_def(),
        ToolDef {
            name: "proposeEdit".into(),
            description: "Stage an edit for human review. Nothing is written until the \
                          review applies it."
                .into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "path": { "type": "string" },
                    "action": { "type": "string", "enum": ["replace", "append", "delete", "create"] },
                    "content": { "type": "string" },
                    "reason": { "type": "string" }
                },
                "required": ["path", "action", "reason"]
            }),
        },
        auto_apply_def(),
        ToolDef {
            name: "finishReflection".into(),
            description: "End the reflection with a summary of what was found and staged.".into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "summary": { "type": "string" },
                    "proposedChanges": { "type": "integer" },
                    "autoApplied": { "type": "integer" }
                },
                "required": ["summary"]
            }),
        },
    ]
}
