//! The `tools/list` catalog: one entry per dispatchable tool.

use serde_json::{json, Value};

/// Tool descriptors in the MCP listing shape
/// (`{name, description, inputSchema}`).
pub fn tool_catalog() -> Vec<Value> {
    vec![
        json!({
            "name": "read",
            "description": "Read a memory file.",
            "inputSchema": {
                "type": "object",
                "properties": { "path": { "type": "string" } },
                "required": ["path"]
            }
        }),
        json!({
            "name": "write",
            "description": "Create or overwrite a memory file and refresh its search index entry.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "path": { "type": "string" },
                    "content": { "type": "string" }
                },
                "required": ["path", "content"]
            }
        }),
        json!({
            "name": "list",
            "description": "List memory files under a prefix. Non-recursive listings include directory rows ending in '/'.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "path": { "type": "string" },
                    "recursive": { "type": "boolean" }
                }
            }
        }),
        json!({
            "name": "search",
            "description": "Semantic search over indexed memory. timeWeight blends cosine similarity with recency.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "query": { "type": "string" },
                    "limit": { "type": "integer" },
                    "timeWeight": { "type": "boolean" }
                },
                "required": ["query"]
            }
        }),
        json!({
            "name": "history",
            "description": "List stored versions of a file, newest first.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "path": { "type": "string" },
                    "limit": { "type": "integer" }
                },
                "required": ["path"]
            }
        }),
        json!({
            "name": "rollback",
            "description": "Restore a file to one of its stored versions.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "path": { "type": "string" },
                    "versionId": { "type": "string" }
                },
                "required": ["path", "versionId"]
            }
        }),
        json!({
            "name": "execute",
            "description": "Run a sandboxed query script over memory. Sources: read \"path\", list [\"prefix\"]. Stages: filter, map, limit, count, sum, first.",
            "inputSchema": {
                "type": "object",
                "properties": { "script": { "type": "string" } },
                "required": ["script"]
            }
        }),
        json!({
            "name": "search_conversations",
            "description": "Semantic search over indexed conversation exchanges.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "query": { "type": "string" },
                    "limit": { "type": "integer" }
                },
                "required": ["query"]
            }
        }),
        json!({
            "name": "index_conversations",
            "description": "Index chat sessions into searchable exchanges. Unchanged sessions are skipped by content hash.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "sessions": { "type": "array", "items": { "type": "object" } }
                },
                "required": ["sessions"]
            }
        }),
        json!({
            "name": "expand_conversation",
            "description": "Return a session's exchanges; with exchangeId, a window of two exchanges around it.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "sessionId": { "type": "string" },
                    "exchangeId": { "type": "string" }
                },
                "required": ["sessionId"]
            }
        }),
        json!({
            "name": "conversation_stats",
            "description": "Counts of indexed sessions and exchanges.",
            "inputSchema": { "type": "object", "properties": {} }
        }),
        json!({
            "name": "schedule_reminder",
            "description": "Create or replace a reminder. type 'once' takes an RFC 3339 instant; type 'cron' a 5-field UTC cron expression.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "id": { "type": "string" },
                    "type": { "type": "string", "enum": ["once", "cron"] },
                    "expression": { "type": "string" },
                    "description": { "type": "string" },
                    "payload": { "type": "object" }
                },
                "required": ["type", "expression", "description"]
            }
        }),
        json!({
            "name": "list_reminders",
            "description": "List all reminders.",
            "inputSchema": { "type": "object", "properties": {} }
        }),
        json!({
            "name": "remove_reminder",
            "description": "Delete a reminder by id.",
            "inputSchema": {
                "type": "object",
                "properties": { "id": { "type": "string" } },
                "required": ["id"]
            }
        }),
        json!({
            "name": "check_reminders",
            "description": "Fire every reminder due now and return them.",
            "inputSchema": { "type": "object", "properties": {} }
        }),
        json!({
            "name": "list_pending_reflections",
            "description": "List staged reflection documents awaiting review, newest first.",
            "inputSchema": { "type": "object", "properties": {} }
        }),
        json!({
            "name": "apply_reflection_changes",
            "description": "Apply proposed edits from a staged reflection (1-indexed numbers; all when omitted) and re-index the touched files.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "date": { "type": "string", "description": "YYYY-MM-DD of the staged document" },
                    "edits": { "type": "array", "items": { "type": "integer" } },
                    "archive": { "type": "boolean" }
                },
                "required": ["date"]
            }
        }),
        json!({
            "name": "archive_reflection",
            "description": "Move a staged reflection to the archive without applying it.",
            "inputSchema": {
                "type": "object",
                "properties": { "date": { "type": "string" } },
                "required": ["date"]
            }
        }),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_matches_dispatchable_tools() {
        let catalog = tool_catalog();
        assert_eq!(catalog.len(), 18);
        for entry in &catalog {
            let name = entry["name"].as_str().unwrap();
            assert!(
                name.parse::<crate::tools::ToolName>().is_ok(),
                "catalog entry {name} is not dispatchable"
            );
            assert!(entry["inputSchema"]["type"] == "object");
            assert!(entry["description"].as_str().unwrap().len() > 10);
        }
    }
}
