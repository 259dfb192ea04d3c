//! Log entry type and the event names the core itself writes

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const CODED_DOCUMENT: &str = "coded_document";
pub const REFLEXIVITY_PROMPT: &str = "reflexivity_prompt";
pub const STAGE_TRANSITION: &str = "stage_transition";
pub const MCP_CALL: &str = "mcp_call";
pub const METHODOLOGICAL_STRAIN: &str = "methodological_strain";
pub const METHODOLOGY_PRESET_APPLIED: &str = "methodology_preset_applied";
pub const RULE_TOGGLED: &str = "rule_toggled";
pub const SATURATION_ASSESSED: &str = "saturation_assessed";
pub const WORKSPACE_BRANCH: &str = "workspace_branch";
pub const TEAM_ACTIVITY: &str = "team_activity";
pub const FRICTION_BYPASSED: &str = "friction_bypassed";

fn default_agent() -> String {
    "system".to_string()
}

/// One line of the structured log
///
/// `content` is event-specific; collaborators may log any event type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub event_type: String,
    #[serde(default = "default_agent")]
    pub agent: String,
    #[serde(default)]
    pub content: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    #[serde(deserialize_with = "crate::domain::timestamp::deserialize")]
    pub timestamp: DateTime<Utc>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl LogEntry {
    pub fn new(event_type: impl Into<String>, content: Value, now: DateTime<Utc>) -> Self {
        Self {
            event_type: event_type.into(),
            agent: default_agent(),
            content,
            metadata: None,
            timestamp: now,
            extra: Map::new(),
        }
    }

    pub fn with_agent(mut self, agent: impl Into<String>) -> Self {
        self.agent = agent.into();
        self
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    fn content_str(&self, key: &str) -> Option<&str> {
        self.content.get(key).and_then(Value::as_str)
    }

    /// Markdown section for the narrative log
    pub fn to_narrative(&self) -> String {
        let ts = self.timestamp.to_rfc3339();
        match self.event_type.as_str() {
            CODED_DOCUMENT => self.coded_document_section(&ts),
            REFLEXIVITY_PROMPT => format!(
                "## [{ts}] Reflexivity Check\n\n**Agent:** {}\n\n**Prompt:** {}\n\n**Researcher Response:**\n> {}\n",
                self.agent,
                self.content_str("prompt").unwrap_or_default(),
                self.content_str("response").unwrap_or_default(),
            ),
            STAGE_TRANSITION => format!(
                "## [{ts}] Stage Transition\n\n**{} -> {}**\n\nInitiated by: {}\n",
                self.content_str("from").unwrap_or("unknown"),
                self.content_str("to").unwrap_or("unknown"),
                self.agent,
            ),
            MCP_CALL => {
                let tool = self.content_str("tool").unwrap_or("unknown");
                let success = self.content.get("success").and_then(Value::as_bool).unwrap_or(false);
                let fallback = self.content.get("fallback_used").and_then(Value::as_bool).unwrap_or(false);
                let mut status = if success { "Success" } else { "Failed" }.to_string();
                if fallback {
                    status.push_str(" (fallback used)");
                }
                format!("## [{ts}] MCP: {tool}\n\n**Status:** {status}\n\n**Agent:** {}\n", self.agent)
            }
            other => {
                let body = serde_json::to_string_pretty(&self.content).unwrap_or_else(|_| self.content.to_string());
                format!("## [{ts}] {other}\n\n**Agent:** {}\n\n```json\n{body}\n```\n", self.agent)
            }
        }
    }

    fn coded_document_section(&self, ts: &str) -> String {
        let doc_id = self.content_str("doc_id").unwrap_or("unknown");
        let codes: Vec<String> = self
            .content
            .get("codes")
            .and_then(Value::as_array)
            .map(|codes| {
                codes
                    .iter()
                    .map(|c| match c.as_str() {
                        Some(s) => format!("- {s}"),
                        None => format!("- {c}"),
                    })
                    .collect()
            })
            .unwrap_or_default();
        let reasoning = self
            .content_str("reasoning_summary")
            .unwrap_or("See the batched reasoning records");

        format!(
            "## [{ts}] Coding: {doc_id}\n\n**Agent:** {}\n\n**Codes applied:**\n{}\n\n**Reasoning:** {reasoning}\n",
            self.agent,
            codes.join("\n"),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn at() -> DateTime<Utc> {
        crate::domain::timestamp::parse("2025-02-01T10:00:00Z").unwrap()
    }

    #[test]
    fn test_agent_defaults_to_system() {
        let entry: LogEntry = serde_json::from_value(json!({
            "event_type": "memo_written",
            "content": {"memo": "m1"},
            "timestamp": "2025-02-01T10:00:00"
        }))
        .unwrap();
        assert_eq!(entry.agent, "system");
        assert_eq!(entry.timestamp, at());
    }

    #[test]
    fn test_coded_document_narrative() {
        let entry = LogEntry::new(
            CODED_DOCUMENT,
            json!({"doc_id": "INT_001", "codes": ["identity_struggle", "workplace_adaptation"]}),
            at(),
        )
        .with_agent("dialogical-coder");

        let md = entry.to_narrative();
        assert!(md.starts_with("## [2025-02-01T10:00:00+00:00] Coding: INT_001"));
        assert!(md.contains("**Agent:** dialogical-coder"));
        assert!(md.contains("- identity_struggle\n- workplace_adaptation"));
    }

    #[test]
    fn test_stage_transition_and_mcp_narrative() {
        let md = LogEntry::new(STAGE_TRANSITION, json!({"from": "stage1", "to": "stage2"}), at()).to_narrative();
        assert!(md.contains("**stage1 -> stage2**"));
        assert!(md.contains("Initiated by: system"));

        let md = LogEntry::new(MCP_CALL, json!({"tool": "sequential-thinking", "success": true, "fallback_used": true}), at())
            .to_narrative();
        assert!(md.contains("**Status:** Success (fallback used)"));
    }

    #[test]
    fn test_generic_narrative_fences_content() {
        let md = LogEntry::new("memo_written", json!({"memo": "m1"}), at()).to_narrative();
        assert!(md.contains("## [2025-02-01T10:00:00+00:00] memo_written"));
        assert!(md.contains("```json\n{\n  \"memo\": \"m1\"\n}\n```"));
    }
}
