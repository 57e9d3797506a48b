//! Router decision parsing: strict JSON plus a small set of audited repairs.
//!
//! Decision text is never evaluated. After fence stripping, the text must be
//! a JSON object; the only repairs tried are isolating the outermost `{...}`
//! and, when the text contains no double quotes at all, treating single
//! quotes as double quotes. Every applied repair is reported to the caller.

use anyhow::{Context, Result, anyhow, bail};
use jsonschema::{Draft, Validator};
use serde::Deserialize;
use serde_json::{Value, json};

/// Sentinel the router emits when investigation is done.
pub const COMPLETION_SENTINEL: &str = "INVESTIGATION_COMPLETE";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouterDecision {
    Complete,
    Investigate { explorer: String, task: String },
}

/// A repair step applied before the text parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Repair {
    FenceStripped,
    ObjectIsolated,
    QuotesNormalized,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedDecision {
    pub decision: RouterDecision,
    pub repairs: Vec<Repair>,
}

#[derive(Debug, Deserialize)]
struct DecisionDoc {
    explorer: String,
    task: String,
}

/// Parser bound to the explorer names registered for one session.
pub struct DecisionParser {
    explorers: Vec<String>,
    validator: Validator,
}

impl DecisionParser {
    pub fn new(explorers: &[String]) -> Result<Self> {
        if explorers.is_empty() {
            bail!("decision parser needs at least one explorer");
        }
        let schema = decision_schema(explorers);
        let validator = jsonschema::options()
            .with_draft(Draft::Draft202012)
            .build(&schema)
            .context("compile decision schema")?;
        Ok(Self {
            explorers: explorers.to_vec(),
            validator,
        })
    }

    pub fn explorers(&self) -> &[String] {
        &self.explorers
    }

    /// Parse one router reply.
    pub fn parse(&self, text: &str) -> Result<ParsedDecision> {
        if text.contains(COMPLETION_SENTINEL) {
            return Ok(ParsedDecision {
                decision: RouterDecision::Complete,
                repairs: Vec::new(),
            });
        }

        let mut repairs = Vec::new();
        let stripped = strip_fences(text);
        if stripped.len() != text.trim().len() {
            repairs.push(Repair::FenceStripped);
        }
        let value = parse_with_repairs(stripped, &mut repairs)?;

        let messages: Vec<String> = self
            .validator
            .iter_errors(&value)
            .map(|err| err.to_string())
            .collect();
        if !messages.is_empty() {
            bail!("decision failed schema validation: {}", messages.join("; "));
        }

        let doc: DecisionDoc = serde_json::from_value(value).context("decode decision")?;
        Ok(ParsedDecision {
            decision: RouterDecision::Investigate {
                explorer: doc.explorer,
                task: doc.task,
            },
            repairs,
        })
    }
}

/// Schema for `{"explorer": <registered name>, "task": <non-empty string>}`.
pub fn decision_schema(explorers: &[String]) -> Value {
    json!({
        "$schema": "https://json-schema.org/draft/2020-12/schema",
        "type": "object",
        "required": ["explorer", "task"],
        "properties": {
            "explorer": { "type": "string", "enum": explorers },
            "task": { "type": "string", "minLength": 1 }
        }
    })
}

/// Remove a surrounding ```json / ``` fence, if present.
pub fn strip_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    let rest = rest.strip_suffix("```").unwrap_or(rest);
    rest.trim()
}

fn parse_with_repairs(text: &str, repairs: &mut Vec<Repair>) -> Result<Value> {
    if let Ok(value) = serde_json::from_str::<Value>(text) {
        return Ok(value);
    }

    let isolated = match (text.find('{'), text.rfind('}')) {
        (Some(start), Some(end)) if start < end => &text[start..=end],
        _ => return Err(anyhow!("decision is not a JSON object")),
    };
    if isolated.len() != text.len() {
        repairs.push(Repair::ObjectIsolated);
        if let Ok(value) = serde_json::from_str::<Value>(isolated) {
            return Ok(value);
        }
    }

    if !isolated.contains('"') && isolated.contains('\'') {
        repairs.push(Repair::QuotesNormalized);
        let normalized = isolated.replace('\'', "\"");
        return serde_json::from_str::<Value>(&normalized).context("parse repaired decision");
    }

    serde_json::from_str::<Value>(isolated)
        .map_err(|err| anyhow!("decision is not valid JSON: {err}"))
}
