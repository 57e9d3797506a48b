//! One diagnosis session: plan, investigate, reason.
//!
//! The whole session shares one wall-clock deadline. Any error, including
//! the deadline itself, is converted into a static placeholder result so the
//! caller always gets a well-formed answer.

use std::path::Path;
use std::rc::Rc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{error, info, instrument, warn};

use crate::agents::Runtime;
use crate::agents::assistant::Assistant;
use crate::agents::gate::GateRole;
use crate::agents::generator::Generator;
use crate::controller::{Controller, ControllerLimits, InvestigationStop};
use crate::core::budget::is_deadline;
use crate::core::cancel::{CancellationToken, cancel_after};
use crate::core::gate::GateMachine;
use crate::core::history::Conversation;
use crate::core::protocol::extract_code_blocks;
use crate::core::types::{
    InvestigationRecord, Modality, PLANNER_ROLE, REASONER_ROLE, ROUTER_ROLE, StageTimings,
    UsageLedger,
};
use crate::io::config::RcaConfig;
use crate::io::model::ChatModel;
use crate::io::prompt::{DataSourceEntry, Prompts};
use crate::io::sandbox::Sandbox;
use crate::io::session_log::{SessionPaths, SessionReport, write_session};
use crate::io::toolset::ToolStore;

/// Result substituted when a session fails or runs out of time.
pub const PLACEHOLDER_RESULT: &str =
    r#"{"root_cause_component":"NA","root_cause_reason":"NA","root_cause_time":"NA"}"#;

/// External collaborators a session runs against.
pub struct SessionBackends {
    /// Backs the planner, router, explorers and reasoner.
    pub agent_model: Rc<dyn ChatModel>,
    /// Backs the per-modality generators.
    pub coder_model: Rc<dyn ChatModel>,
    pub sandbox: Box<dyn Sandbox>,
}

#[derive(Debug, Clone)]
pub struct SessionOutcome {
    pub query: String,
    pub started_at: String,
    pub finished_at: String,
    pub final_result: String,
    /// True when `final_result` is [`PLACEHOLDER_RESULT`].
    pub placeholder: bool,
    pub error: Option<String>,
    pub plan: Option<String>,
    pub investigation: Vec<InvestigationRecord>,
    pub stop: Option<InvestigationStop>,
    pub root_cause: Option<String>,
    pub usage: UsageLedger,
    pub timings: StageTimings,
    pub transcripts: Vec<(String, Conversation)>,
}

impl SessionOutcome {
    /// Write `report.json` and every transcript under `dir`.
    pub fn write_report(&self, dir: &Path) -> Result<SessionPaths> {
        let report = SessionReport {
            query: &self.query,
            started_at: self.started_at.clone(),
            finished_at: self.finished_at.clone(),
            plan: self.plan.as_deref(),
            investigation: &self.investigation,
            root_cause: self.root_cause.as_deref(),
            final_result: &self.final_result,
            placeholder: self.placeholder,
            error: self.error.clone(),
            usage: &self.usage,
            timings: self.timings,
        };
        write_session(dir, &report, &self.transcripts)
            .with_context(|| format!("write session report to {}", dir.display()))
    }
}

/// Whatever the stages produced before the session ended.
#[derive(Default)]
struct Progress {
    plan: Option<String>,
    investigation: Vec<InvestigationRecord>,
    stop: Option<InvestigationStop>,
    root_cause: Option<String>,
    usage: UsageLedger,
    timings: StageTimings,
    transcripts: Vec<(String, Conversation)>,
}

/// Run one diagnosis for `query`. Never fails; see [`SessionOutcome::placeholder`].
///
/// `cancel` is cancelled when the session deadline passes, so external
/// calls sharing the token stop promptly.
#[instrument(skip_all, fields(timeout_secs = cfg.session_timeout_secs))]
pub fn run_session(
    cfg: &RcaConfig,
    query: &str,
    backends: SessionBackends,
    cancel: CancellationToken,
) -> SessionOutcome {
    let started = Instant::now();
    let started_at = Utc::now().to_rfc3339();
    let deadline = started + cfg.session_timeout();
    let _watchdog = cancel_after(&cancel, cfg.session_timeout());

    let mut progress = Progress::default();
    let result = diagnose(cfg, query, backends, &cancel, deadline, &mut progress);
    progress.timings.total_ms = millis(started.elapsed());

    let (final_result, placeholder, error) = match result {
        Ok(result) => (result, false, None),
        Err(err) => {
            let detail = format!("{err:#}");
            if is_deadline(&err) || cancel.is_cancelled() {
                warn!(err = %detail, "session deadline reached, using placeholder result");
            } else {
                error!(err = %detail, "diagnosis failed, using placeholder result");
            }
            (PLACEHOLDER_RESULT.to_string(), true, Some(detail))
        }
    };

    log_stats(&progress);
    SessionOutcome {
        query: query.to_string(),
        started_at,
        finished_at: Utc::now().to_rfc3339(),
        final_result,
        placeholder,
        error,
        plan: progress.plan,
        investigation: progress.investigation,
        stop: progress.stop,
        root_cause: progress.root_cause,
        usage: progress.usage,
        timings: progress.timings,
        transcripts: progress.transcripts,
    }
}

fn diagnose(
    cfg: &RcaConfig,
    query: &str,
    backends: SessionBackends,
    cancel: &CancellationToken,
    deadline: Instant,
    progress: &mut Progress,
) -> Result<String> {
    let prompts = Prompts::new()?;
    let agent_model = Rc::clone(&backends.agent_model);
    let agent_timeout = cfg.models.agent.timeout();

    // Planning.
    let stage = Instant::now();
    let mut planner = Assistant::new(
        PLANNER_ROLE,
        prompts.planner_system()?,
        Rc::clone(&agent_model),
        cfg.history,
        agent_timeout,
    );
    let data_sources: Vec<DataSourceEntry> = Modality::ALL
        .into_iter()
        .map(|m| DataSourceEntry {
            modality: m.as_str().to_string(),
            description: cfg.data_description.for_modality(m).to_string(),
        })
        .collect();
    let planned = planner.respond(
        &prompts.planning(query, &data_sources)?,
        &mut progress.usage,
        deadline,
    );
    progress
        .transcripts
        .push((PLANNER_ROLE.to_string(), planner.transcript().clone()));
    progress.timings.plan_ms = millis(stage.elapsed());
    let plan = planned.context("planning stage")?;
    info!(chars = plan.len(), elapsed_ms = progress.timings.plan_ms, "plan ready");
    progress.plan = Some(plan.clone());

    // Investigation.
    let stage = Instant::now();
    let mut controller = build_controller(cfg, &prompts, backends, cancel)?;
    let investigated = controller.investigate(query, &plan, deadline);
    progress.usage.merge(&controller.usage());
    progress.transcripts.extend(controller.transcripts());
    progress.timings.investigate_ms = millis(stage.elapsed());
    progress.timings.coder_ms = millis(controller.coder_time());
    let investigation = investigated.context("investigation stage")?;
    progress.investigation = investigation.records;
    progress.stop = Some(investigation.stop);

    // Reasoning.
    let stage = Instant::now();
    let mut reasoner = Assistant::new(
        REASONER_ROLE,
        prompts.reasoner_system()?,
        agent_model,
        cfg.history,
        agent_timeout,
    );
    let results =
        serde_json::to_string_pretty(&progress.investigation).context("encode investigation")?;
    let reasoned = reasoner.respond(
        &prompts.reasoning(query, &plan, &results)?,
        &mut progress.usage,
        deadline,
    );
    progress
        .transcripts
        .push((REASONER_ROLE.to_string(), reasoner.transcript().clone()));
    progress.timings.reason_ms = millis(stage.elapsed());
    let root_cause = reasoned.context("reasoning stage")?;
    progress.root_cause = Some(root_cause.clone());

    Ok(final_result(&root_cause))
}

fn build_controller<'p>(
    cfg: &RcaConfig,
    prompts: &'p Prompts,
    backends: SessionBackends,
    cancel: &CancellationToken,
) -> Result<Controller<'p>> {
    let agent_timeout = cfg.models.agent.timeout();
    let coder_timeout = cfg.models.coder.timeout();

    let mut runtime = Runtime::new(cancel.clone());
    for modality in Modality::ALL {
        runtime.register(Box::new(Generator::new(
            modality,
            prompts.coder_system(modality)?,
            Rc::clone(&backends.coder_model),
            cfg.history,
            coder_timeout,
        )))?;
    }
    runtime.register(Box::new(GateRole::new(
        GateMachine::new(cfg.gate_limits(), cfg.quality_policies()),
        backends.sandbox,
        cfg.session_timeout(),
    )))?;

    let router = Assistant::new(
        ROUTER_ROLE,
        prompts.router_system()?,
        Rc::clone(&backends.agent_model),
        cfg.history,
        agent_timeout,
    );
    let explorers = Modality::ALL
        .into_iter()
        .map(|modality| {
            Ok(Assistant::new(
                modality.explorer_name(),
                prompts.explorer_system(modality)?,
                Rc::clone(&backends.agent_model),
                cfg.history,
                agent_timeout,
            ))
        })
        .collect::<Result<Vec<_>>>()?;

    Controller::new(
        prompts,
        router,
        explorers,
        runtime,
        ToolStore::new(cfg.toolset.path.clone()),
        cfg.data_description.clone(),
        ControllerLimits::from_config(cfg),
    )
}

/// The body of the first fenced `json` block, else the text as-is.
pub fn final_result(root_cause: &str) -> String {
    extract_code_blocks(root_cause)
        .into_iter()
        .find(|block| block.language.eq_ignore_ascii_case("json"))
        .map(|block| block.code.trim().to_string())
        .unwrap_or_else(|| root_cause.trim().to_string())
}

fn log_stats(progress: &Progress) {
    for (role, usage) in progress.usage.iter() {
        info!(
            role,
            calls = usage.calls,
            prompt_tokens = usage.prompt_tokens,
            completion_tokens = usage.completion_tokens,
            total_tokens = usage.total_tokens,
            "llm usage"
        );
    }
    let total = progress.usage.total();
    let timings = progress.timings;
    info!(
        calls = total.calls,
        total_tokens = total.total_tokens,
        plan_ms = timings.plan_ms,
        investigate_ms = timings.investigate_ms,
        coder_ms = timings.coder_ms,
        reason_ms = timings.reason_ms,
        total_ms = timings.total_ms,
        "session stats"
    );
}

fn millis(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}
