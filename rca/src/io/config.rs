//! Session configuration stored under `.rca/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::gate::GateLimits;
use crate::core::history::HistoryPolicy;
use crate::core::quality::{Profile, QualityPolicies, QualityPolicy};
use crate::core::types::Modality;

/// Default location of the config file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = ".rca/config.toml";

/// Diagnosis configuration (TOML).
///
/// Missing fields default to the values the pipeline was tuned with.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RcaConfig {
    /// Dataset profile; selects trace event bounds.
    pub profile: Profile,

    /// Wall-clock budget for one whole diagnosis session.
    pub session_timeout_secs: u64,

    /// Router rounds before investigation is force-terminated.
    pub max_rounds: u32,

    /// Rejections per generator before the gate force-accepts.
    pub max_refine_attempts: u32,

    /// Times an explorer's error reply is resubmitted before moving on.
    pub max_error_resubmissions: u32,

    /// Characters of sandbox output kept before head/tail truncation.
    pub max_output_length: usize,

    pub sandbox: SandboxConfig,
    pub models: ModelsConfig,
    pub history: HistoryPolicy,
    pub quality: QualityConfig,
    pub data_description: DataDescriptionConfig,
    pub toolset: ToolsetConfig,
}

impl Default for RcaConfig {
    fn default() -> Self {
        Self {
            profile: Profile::default(),
            session_timeout_secs: 30 * 60,
            max_rounds: 5,
            max_refine_attempts: 3,
            max_error_resubmissions: 3,
            max_output_length: 50_000,
            sandbox: SandboxConfig::default(),
            models: ModelsConfig::default(),
            history: HistoryPolicy::default(),
            quality: QualityConfig::default(),
            data_description: DataDescriptionConfig::default(),
            toolset: ToolsetConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SandboxConfig {
    /// Interpreter command; the snippet path is appended (e.g. `["python3"]`).
    pub command: Vec<String>,
    /// Persistent working directory shared by every block of the session.
    pub workdir: PathBuf,
    /// Per-block execution timeout.
    pub block_timeout_secs: u64,
    /// Truncate captured stdout/stderr beyond this many bytes.
    pub output_limit_bytes: usize,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            command: vec!["python3".to_string()],
            workdir: PathBuf::from(".rca/sandbox"),
            block_timeout_secs: 10 * 60,
            output_limit_bytes: 1_000_000,
        }
    }
}

/// How a model command prints its reply.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplyFormat {
    /// `{"content": "...", "usage": {...}}` on stdout.
    #[default]
    Json,
    /// Raw reply text on stdout; no usage reported.
    Text,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ModelConfig {
    /// Command that reads `{"messages": [...]}` on stdin and prints a reply.
    pub command: Vec<String>,
    pub format: ReplyFormat,
    pub timeout_secs: u64,
    pub output_limit_bytes: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            command: vec!["rca-model".to_string()],
            format: ReplyFormat::default(),
            timeout_secs: 5 * 60,
            output_limit_bytes: 1_000_000,
        }
    }
}

impl ModelConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// `agent` backs planner/router/explorers/reasoner; `coder` backs generators.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ModelsConfig {
    pub agent: ModelConfig,
    pub coder: ModelConfig,
}

/// Field-level overrides applied on top of the profile's policy.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PolicyOverride {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_events: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_events: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_text_len: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_text_len: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refine_rules: Option<String>,
}

impl PolicyOverride {
    fn apply(&self, mut base: QualityPolicy) -> QualityPolicy {
        if let Some(v) = self.min_events {
            base.min_events = v;
        }
        if let Some(v) = self.max_events {
            base.max_events = v;
        }
        if let Some(v) = self.min_text_len {
            base.min_text_len = v;
        }
        if let Some(v) = self.max_text_len {
            base.max_text_len = v;
        }
        if let Some(rules) = &self.refine_rules {
            base.refine_rules = rules.clone();
        }
        base
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct QualityConfig {
    pub log: PolicyOverride,
    pub metric: PolicyOverride,
    pub trace: PolicyOverride,
    pub fallback: PolicyOverride,
}

/// Data-source descriptions handed to each generator with its task.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DataDescriptionConfig {
    pub metric: String,
    pub log: String,
    pub trace: String,
}

impl Default for DataDescriptionConfig {
    fn default() -> Self {
        Self {
            metric: "Metric telemetry: CSV files with columns timestamp, cmdb_id, kpi_name, value."
                .to_string(),
            log: "Log telemetry: CSV files with columns timestamp, cmdb_id, log_name, value."
                .to_string(),
            trace: "Trace telemetry: CSV files with columns timestamp, cmdb_id, parent_id, \
                    span_id, trace_id, duration."
                .to_string(),
        }
    }
}

impl DataDescriptionConfig {
    pub fn for_modality(&self, modality: Modality) -> &str {
        match modality {
            Modality::Metric => &self.metric,
            Modality::Log => &self.log,
            Modality::Trace => &self.trace,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ToolsetConfig {
    /// JSON file that accepted analysis code is appended to.
    pub path: PathBuf,
}

impl Default for ToolsetConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(".rca/toolset.json"),
        }
    }
}

impl RcaConfig {
    pub fn validate(&self) -> Result<()> {
        if self.session_timeout_secs == 0 {
            return Err(anyhow!("session_timeout_secs must be > 0"));
        }
        if self.max_rounds == 0 {
            return Err(anyhow!("max_rounds must be > 0"));
        }
        if self.max_output_length == 0 {
            return Err(anyhow!("max_output_length must be > 0"));
        }
        if self.sandbox.command.is_empty() || self.sandbox.command[0].trim().is_empty() {
            return Err(anyhow!("sandbox.command must be a non-empty array"));
        }
        if self.sandbox.block_timeout_secs == 0 {
            return Err(anyhow!("sandbox.block_timeout_secs must be > 0"));
        }
        if self.sandbox.output_limit_bytes == 0 {
            return Err(anyhow!("sandbox.output_limit_bytes must be > 0"));
        }
        for (label, model) in [("agent", &self.models.agent), ("coder", &self.models.coder)] {
            if model.command.is_empty() || model.command[0].trim().is_empty() {
                return Err(anyhow!("models.{label}.command must be a non-empty array"));
            }
            if model.timeout_secs == 0 {
                return Err(anyhow!("models.{label}.timeout_secs must be > 0"));
            }
            if model.output_limit_bytes == 0 {
                return Err(anyhow!("models.{label}.output_limit_bytes must be > 0"));
            }
        }
        if let HistoryPolicy::Window { max_turns: 0 } = self.history {
            return Err(anyhow!("history.max_turns must be > 0"));
        }
        self.quality_policies().validate()
    }

    pub fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.session_timeout_secs)
    }

    pub fn gate_limits(&self) -> GateLimits {
        GateLimits {
            max_refine_attempts: self.max_refine_attempts,
            max_output_length: self.max_output_length,
        }
    }

    /// Profile defaults with any `[quality.*]` overrides applied.
    pub fn quality_policies(&self) -> QualityPolicies {
        let base = QualityPolicies::for_profile(self.profile);
        QualityPolicies {
            log: self.quality.log.apply(base.log),
            metric: self.quality.metric.apply(base.metric),
            trace: self.quality.trace.apply(base.trace),
            fallback: self.quality.fallback.apply(base.fallback),
        }
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `RcaConfig::default()`.
pub fn load_config(path: &Path) -> Result<RcaConfig> {
    if !path.exists() {
        let cfg = RcaConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: RcaConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &RcaConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
