//! Shared deterministic types for the diagnosis pipeline.
//!
//! These types define stable contracts between roles. They carry no I/O and
//! must remain deterministic across runs.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Role name of the code-execution gate.
pub const GATE_ROLE: &str = "executor";
/// Sender name of messages originated by the controller loop.
pub const CONTROLLER_ROLE: &str = "controller";
pub const PLANNER_ROLE: &str = "planner";
/// The router that picks the next explorer and task.
pub const ROUTER_ROLE: &str = "investigator";
pub const REASONER_ROLE: &str = "reasoner";

/// Telemetry modality handled by one explorer/generator pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Modality {
    Metric,
    Log,
    Trace,
}

impl Modality {
    pub const ALL: [Modality; 3] = [Modality::Metric, Modality::Log, Modality::Trace];

    pub fn as_str(self) -> &'static str {
        match self {
            Modality::Metric => "metric",
            Modality::Log => "log",
            Modality::Trace => "trace",
        }
    }

    /// Name of the explorer role for this modality (e.g. `metric_explorer`).
    pub fn explorer_name(self) -> String {
        format!("{}_explorer", self.as_str())
    }

    /// Name of the generator role for this modality (e.g. `metric_coder`).
    pub fn coder_name(self) -> String {
        format!("{}_coder", self.as_str())
    }

    /// Resolve an explorer role name back to its modality.
    pub fn from_explorer(name: &str) -> Option<Modality> {
        Self::ALL.into_iter().find(|m| m.explorer_name() == name)
    }

    /// Infer the modality from a role name prefix (`log…`, `metric…`, `trace…`).
    ///
    /// Returns `None` for names that match no known prefix.
    pub fn from_prefix(name: &str) -> Option<Modality> {
        let lowered = name.to_lowercase();
        Self::ALL
            .into_iter()
            .find(|m| lowered.starts_with(m.as_str()))
    }

    /// Value expected in an anomaly event's `data_source` field.
    pub fn data_source(self) -> &'static str {
        match self {
            Modality::Metric => "Metric",
            Modality::Log => "Log",
            Modality::Trace => "Trace",
        }
    }
}

impl fmt::Display for Modality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable message exchanged between roles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub content: String,
    pub sender: String,
    pub recipient: String,
}

impl Message {
    pub fn new(
        sender: impl Into<String>,
        recipient: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            content: content.into(),
            sender: sender.into(),
            recipient: recipient.into(),
        }
    }
}

/// A fenced code block extracted from free text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeBlock {
    /// Language token after the opening fence (may be empty).
    pub language: String,
    pub code: String,
}

impl CodeBlock {
    /// True if the declared language is `python` or `py` (case-insensitive).
    pub fn is_python(&self) -> bool {
        matches!(self.language.to_lowercase().as_str(), "python" | "py")
    }
}

/// Output of one sandbox execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub output: String,
    pub exit_code: i32,
    pub truncated: bool,
}

/// Anomaly record recovered from generated-code output.
///
/// Fields are kept verbatim; unknown keys land in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnomalyEvent {
    pub data_source: Option<String>,
    pub timestamp: Option<String>,
    pub component_id: Option<String>,
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, String>,
}

impl AnomalyEvent {
    /// Build an event from loosely parsed key/value pairs.
    ///
    /// `cmdb_id`, `component_id` and `component` all map to `component_id`
    /// (first one wins, in that order).
    pub fn from_fields(mut fields: BTreeMap<String, String>) -> Self {
        let component_id = ["cmdb_id", "component_id", "component"]
            .iter()
            .find_map(|key| fields.remove(*key));
        Self {
            data_source: fields.remove("data_source"),
            timestamp: fields.remove("timestamp"),
            description: fields.remove("description"),
            component_id,
            extra: fields,
        }
    }
}

/// Artifact stored by the gate once a submission is accepted (or forced).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Artifact {
    /// Generator role that authored the accepted submission.
    pub origin: String,
    /// Final (possibly truncated) execution output, or raw text when the
    /// submission carried no executable code.
    pub output: String,
    /// Code blocks of the accepted submission, when the last block was Python.
    pub code_blocks: Vec<CodeBlock>,
    pub acceptance: Acceptance,
}

/// How the gate reached its acceptance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Acceptance {
    /// Submission contained no Python code; raw text stored.
    NoCode,
    /// Output was too short to judge.
    Trivial,
    /// Passed the quality gate.
    Accepted,
    /// Retry budget exhausted; last output accepted as-is.
    Forced,
}

/// One completed controller round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InvestigationRecord {
    pub round: u32,
    pub explorer: String,
    pub task: String,
    /// Explorer's final answer; `None` when the round produced nothing usable.
    pub result: Option<String>,
}

/// Wall-clock time spent per session stage, in milliseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StageTimings {
    pub plan_ms: u64,
    pub investigate_ms: u64,
    /// Share of `investigate_ms` spent generating and validating code.
    pub coder_ms: u64,
    pub reason_ms: u64,
    pub total_ms: u64,
}

/// Token counters reported by the inference service for one call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

impl TokenUsage {
    pub fn total(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }
}

/// Cumulative call/token counters for one role.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RoleUsage {
    pub calls: u64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

/// Per-role LLM usage, keyed by role name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UsageLedger {
    roles: BTreeMap<String, RoleUsage>,
}

impl UsageLedger {
    /// Record one call for `role`; returns the role's 1-indexed call number.
    pub fn record(&mut self, role: &str, usage: Option<TokenUsage>) -> u64 {
        let entry = self.roles.entry(role.to_string()).or_default();
        entry.calls += 1;
        if let Some(usage) = usage {
            entry.prompt_tokens += usage.prompt_tokens;
            entry.completion_tokens += usage.completion_tokens;
            entry.total_tokens += usage.total();
        }
        entry.calls
    }

    pub fn get(&self, role: &str) -> RoleUsage {
        self.roles.get(role).copied().unwrap_or_default()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &RoleUsage)> {
        self.roles.iter().map(|(name, usage)| (name.as_str(), usage))
    }

    /// Sum over all roles.
    pub fn total(&self) -> RoleUsage {
        self.roles.values().fold(RoleUsage::default(), |acc, u| RoleUsage {
            calls: acc.calls + u.calls,
            prompt_tokens: acc.prompt_tokens + u.prompt_tokens,
            completion_tokens: acc.completion_tokens + u.completion_tokens,
            total_tokens: acc.total_tokens + u.total_tokens,
        })
    }

    /// Fold another ledger's counters into this one.
    pub fn merge(&mut self, other: &UsageLedger) {
        for (name, usage) in &other.roles {
            let entry = self.roles.entry(name.clone()).or_default();
            entry.calls += usage.calls;
            entry.prompt_tokens += usage.prompt_tokens;
            entry.completion_tokens += usage.completion_tokens;
            entry.total_tokens += usage.total_tokens;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn modality_prefix_is_case_insensitive() {
        assert_eq!(Modality::from_prefix("Log_coder"), Some(Modality::Log));
        assert_eq!(Modality::from_prefix("metric_coder"), Some(Modality::Metric));
        assert_eq!(Modality::from_prefix("tracer"), Some(Modality::Trace));
        assert_eq!(Modality::from_prefix("coder"), None);
    }

    #[test]
    fn role_names_follow_modality() {
        assert_eq!(Modality::Trace.explorer_name(), "trace_explorer");
        assert_eq!(Modality::Trace.coder_name(), "trace_coder");
        assert_eq!(
            Modality::from_explorer("log_explorer"),
            Some(Modality::Log)
        );
        assert_eq!(Modality::from_explorer("log_coder"), None);
    }

    #[test]
    fn anomaly_event_maps_component_aliases() {
        let fields: BTreeMap<String, String> = [
            ("data_source", "Metric"),
            ("cmdb_id", "Tomcat01"),
            ("severity", "high"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        let event = AnomalyEvent::from_fields(fields);
        assert_eq!(event.data_source.as_deref(), Some("Metric"));
        assert_eq!(event.component_id.as_deref(), Some("Tomcat01"));
        assert_eq!(event.extra.get("severity").map(String::as_str), Some("high"));
    }

    #[test]
    fn usage_ledger_counts_calls_and_tokens() {
        let mut ledger = UsageLedger::default();
        assert_eq!(ledger.record("log_coder", None), 1);
        assert_eq!(
            ledger.record(
                "log_coder",
                Some(TokenUsage {
                    prompt_tokens: 10,
                    completion_tokens: 5
                })
            ),
            2
        );
        ledger.record("planner", Some(TokenUsage::default()));

        let usage = ledger.get("log_coder");
        assert_eq!(usage.calls, 2);
        assert_eq!(usage.total_tokens, 15);
        assert_eq!(ledger.total().calls, 3);
    }
}
