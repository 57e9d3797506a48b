//! Bounded investigation loop.
//!
//! Each round the router picks an explorer and a task (or declares the
//! investigation complete). The explorer either answers from the current
//! toolset or asks for a new tool, in which case the modality's generator and
//! the gate iterate until an artifact is accepted.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow, bail};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::agents::Runtime;
use crate::agents::assistant::Assistant;
use crate::core::blackboard::Blackboard;
use crate::core::budget::is_deadline;
use crate::core::decision::{DecisionParser, RouterDecision};
use crate::core::history::Conversation;
use crate::core::text::clean_execution_output;
use crate::core::types::{
    CONTROLLER_ROLE, GATE_ROLE, InvestigationRecord, Message, Modality, UsageLedger,
};
use crate::io::config::{DataDescriptionConfig, RcaConfig};
use crate::io::prompt::{ExplorerEntry, Prompts, RecordView};
use crate::io::toolset::ToolStore;

/// Explorer reply marker asking for a new generated tool.
pub const NEED_TOOL_GENERATION: &str = "NEED_TOOL_GENERATION";
/// Explorer replies containing this are resubmitted.
const ERROR_MARKER: &str = "Error";
const RESUBMIT_PREFIX: &str = "Tool call failed, please regenerate tool based on error information";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerLimits {
    pub max_rounds: u32,
    pub max_error_resubmissions: u32,
}

impl ControllerLimits {
    pub fn from_config(cfg: &RcaConfig) -> Self {
        Self {
            max_rounds: cfg.max_rounds,
            max_error_resubmissions: cfg.max_error_resubmissions,
        }
    }
}

impl Default for ControllerLimits {
    fn default() -> Self {
        Self {
            max_rounds: 5,
            max_error_resubmissions: 3,
        }
    }
}

/// Why the investigation loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InvestigationStop {
    /// The router replied with the completion sentinel.
    Complete,
    /// `max_rounds` rounds ran without completion.
    RoundLimit,
    /// `max_rounds` consecutive router replies could not be parsed.
    ParseFailures,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Investigation {
    pub records: Vec<InvestigationRecord>,
    pub stop: InvestigationStop,
}

pub struct Controller<'a> {
    prompts: &'a Prompts,
    router: Assistant,
    explorers: BTreeMap<Modality, Assistant>,
    runtime: Runtime,
    toolset: ToolStore,
    parser: DecisionParser,
    /// Explorer tasks and answers; the runtime keeps the coders' board.
    blackboard: Blackboard,
    usage: UsageLedger,
    data_description: DataDescriptionConfig,
    limits: ControllerLimits,
    coder_time: Duration,
}

impl<'a> Controller<'a> {
    /// Wire the router, explorers and a runtime hosting the matching generators.
    ///
    /// Every explorer must be named `<modality>_explorer` and its
    /// `<modality>_coder` must already be registered, along with the gate.
    pub fn new(
        prompts: &'a Prompts,
        router: Assistant,
        explorers: Vec<Assistant>,
        runtime: Runtime,
        toolset: ToolStore,
        data_description: DataDescriptionConfig,
        limits: ControllerLimits,
    ) -> Result<Self> {
        if !runtime.is_registered(GATE_ROLE) {
            bail!("runtime has no {GATE_ROLE} role");
        }
        let mut by_modality = BTreeMap::new();
        for explorer in explorers {
            let modality = Modality::from_explorer(explorer.name())
                .ok_or_else(|| anyhow!("unknown explorer {}", explorer.name()))?;
            if !runtime.is_registered(&modality.coder_name()) {
                bail!("runtime has no {} for {}", modality.coder_name(), explorer.name());
            }
            if by_modality.insert(modality, explorer).is_some() {
                bail!("duplicate explorer for {modality}");
            }
        }
        let names: Vec<String> = by_modality.keys().map(|m| m.explorer_name()).collect();
        let parser = DecisionParser::new(&names)?;

        Ok(Self {
            prompts,
            router,
            explorers: by_modality,
            runtime,
            toolset,
            parser,
            blackboard: Blackboard::new(),
            usage: UsageLedger::default(),
            data_description,
            limits,
            coder_time: Duration::ZERO,
        })
    }

    /// Run router rounds until completion or the round limit.
    #[instrument(skip_all, fields(max_rounds = self.limits.max_rounds))]
    pub fn investigate(&mut self, query: &str, plan: &str, deadline: Instant) -> Result<Investigation> {
        let entries: Vec<ExplorerEntry> = self
            .explorers
            .keys()
            .map(|m| ExplorerEntry::for_modality(*m))
            .collect();
        let mut message = self.prompts.investigation(query, plan)?;
        let mut records: Vec<InvestigationRecord> = Vec::new();
        let mut round = 1u32;
        let mut parse_failures = 0u32;

        let stop = loop {
            if round > self.limits.max_rounds {
                warn!(round, "round limit reached, ending investigation");
                break InvestigationStop::RoundLimit;
            }

            let prompt = self.prompts.router(&message, &entries)?;
            let reply = self.router.respond(&prompt, &mut self.usage, deadline)?;
            let parsed = match self.parser.parse(&reply) {
                Ok(parsed) => {
                    parse_failures = 0;
                    parsed
                }
                Err(err) => {
                    parse_failures += 1;
                    let detail = format!("{err:#}");
                    warn!(round, parse_failures, err = %detail, "unusable router decision");
                    if parse_failures >= self.limits.max_rounds {
                        break InvestigationStop::ParseFailures;
                    }
                    message = self
                        .prompts
                        .router_correction(self.parser.explorers(), Some(detail.as_str()))?;
                    continue;
                }
            };
            if !parsed.repairs.is_empty() {
                debug!(repairs = ?parsed.repairs, "router decision repaired");
            }

            let (explorer, task) = match parsed.decision {
                RouterDecision::Complete => {
                    info!(round, "router declared investigation complete");
                    break InvestigationStop::Complete;
                }
                RouterDecision::Investigate { explorer, task } => (explorer, task),
            };

            info!(round, explorer = %explorer, "dispatching investigation task");
            let result = self.explore(&explorer, &task, deadline)?;
            records.push(InvestigationRecord {
                round,
                explorer,
                task,
                result,
            });

            let views: Vec<RecordView<'_>> = records
                .iter()
                .map(|r| RecordView {
                    round: r.round,
                    explorer: &r.explorer,
                    task: &r.task,
                    result: r.result.as_deref(),
                })
                .collect();
            message = self.prompts.router_update(&views)?;
            round += 1;
        };

        info!(rounds = records.len(), stop = ?stop, "investigation finished");
        Ok(Investigation { records, stop })
    }

    /// Ask one explorer to carry out `task`; `None` if it answered with nothing.
    #[instrument(skip_all, fields(explorer = %explorer_name))]
    pub fn explore(
        &mut self,
        explorer_name: &str,
        task: &str,
        deadline: Instant,
    ) -> Result<Option<String>> {
        let modality = Modality::from_explorer(explorer_name)
            .ok_or_else(|| anyhow!("unknown explorer {explorer_name}"))?;
        let message = self.prompts.explorer_task(task, &self.toolset.listing())?;
        let enriched = self.blackboard.enrich(&message, explorer_name);
        let mut reply = self.ask_explorer(modality, &enriched, deadline)?;

        let mut resubmissions = 0u32;
        while reply.contains(ERROR_MARKER) && resubmissions < self.limits.max_error_resubmissions {
            resubmissions += 1;
            warn!(resubmissions, "explorer reported an error, resubmitting");
            let retry = format!("{RESUBMIT_PREFIX}\n{reply}");
            reply = self.ask_explorer(modality, &retry, deadline)?;
        }

        if reply.contains(NEED_TOOL_GENERATION) {
            let generated = self.generate_tool(modality, task, deadline)?;
            let rendered = serde_json::to_string(&generated).context("encode tool result")?;
            let followup = self.prompts.tool_result(task, &rendered, modality)?;
            reply = self.ask_explorer(modality, &followup, deadline)?;
        }

        self.blackboard.record_task(explorer_name, task);
        self.blackboard.record_response(explorer_name, reply.as_str());
        Ok((!reply.trim().is_empty()).then_some(reply))
    }

    fn ask_explorer(&mut self, modality: Modality, text: &str, deadline: Instant) -> Result<String> {
        let explorer = self
            .explorers
            .get_mut(&modality)
            .ok_or_else(|| anyhow!("no explorer registered for {modality}"))?;
        explorer.respond(text, &mut self.usage, deadline)
    }

    /// Have the modality's generator produce an accepted artifact for `task`.
    ///
    /// Returns the cleaned execution output. Failures other than the session
    /// deadline are logged and yield `None`.
    #[instrument(skip_all, fields(modality = %modality))]
    pub fn generate_tool(
        &mut self,
        modality: Modality,
        task: &str,
        deadline: Instant,
    ) -> Result<Option<String>> {
        let started = Instant::now();
        let outcome = self.run_generator(modality, task, deadline);
        let elapsed = started.elapsed();
        self.coder_time += elapsed;
        debug!(elapsed_ms = elapsed.as_millis() as u64, "tool generation finished");

        match outcome {
            Ok(result) => Ok(result),
            Err(err) if is_deadline(&err) => Err(err),
            Err(err) => {
                let dropped = self.runtime.discard_pending();
                warn!(err = %format!("{err:#}"), dropped, "tool generation failed");
                Ok(None)
            }
        }
    }

    fn run_generator(
        &mut self,
        modality: Modality,
        task: &str,
        deadline: Instant,
    ) -> Result<Option<String>> {
        let coder = modality.coder_name();
        self.runtime.take_artifact();

        let message = self.prompts.generator_task(
            &coder,
            self.data_description.for_modality(modality),
            task,
        )?;
        self.runtime.begin_task(&coder);
        self.runtime
            .send(Message::new(CONTROLLER_ROLE, coder.as_str(), message))?;
        let handled = self.runtime.run_until_idle(deadline)?;

        let Some(artifact) = self.runtime.take_artifact() else {
            warn!(coder = %coder, handled, "generator produced no artifact");
            return Ok(None);
        };
        if !artifact.code_blocks.is_empty() {
            let saved = self
                .toolset
                .append(&artifact.origin, task, &artifact.code_blocks)?;
            info!(coder = %coder, saved, "saved generated tool");
        }

        let cleaned = clean_execution_output(&artifact.output);
        self.runtime
            .blackboard_mut()
            .record_response(&coder, cleaned.as_str());
        info!(
            coder = %coder,
            handled,
            acceptance = ?artifact.acceptance,
            chars = cleaned.len(),
            "tool generated"
        );
        Ok(Some(cleaned))
    }

    pub fn blackboard(&self) -> &Blackboard {
        &self.blackboard
    }

    pub fn toolset(&self) -> &ToolStore {
        &self.toolset
    }

    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    /// Time spent inside tool generation so far.
    pub fn coder_time(&self) -> Duration {
        self.coder_time
    }

    /// Router, explorer and generator usage combined.
    pub fn usage(&self) -> UsageLedger {
        let mut usage = self.usage.clone();
        usage.merge(self.runtime.usage());
        usage
    }

    /// Every transcript held by the controller's roles, by role name.
    pub fn transcripts(&self) -> Vec<(String, Conversation)> {
        let mut transcripts = vec![(
            self.router.name().to_string(),
            self.router.transcript().clone(),
        )];
        transcripts.extend(
            self.explorers
                .values()
                .map(|e| (e.name().to_string(), e.transcript().clone())),
        );
        transcripts.extend(self.runtime.transcripts());
        transcripts
    }
}
