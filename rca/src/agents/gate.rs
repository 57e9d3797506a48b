//! The `executor` role: runs submitted code and enforces the quality gate.

use std::time::Duration;

use anyhow::Result;
use tracing::{debug, info, instrument, warn};

use crate::core::budget::call_budget;
use crate::core::gate::{GateDecision, GateMachine, GateState};
use crate::core::protocol::{extract_code_blocks, python_blocks, split_origin};
use crate::core::types::{Acceptance, Artifact, GATE_ROLE, Message};
use crate::io::sandbox::Sandbox;

use super::{Role, RoleContext};

pub struct GateRole {
    machine: GateMachine,
    sandbox: Box<dyn Sandbox>,
    execution_timeout: Duration,
}

impl GateRole {
    pub fn new(machine: GateMachine, sandbox: Box<dyn Sandbox>, execution_timeout: Duration) -> Self {
        Self {
            machine,
            sandbox,
            execution_timeout,
        }
    }
}

impl Role for GateRole {
    fn name(&self) -> &str {
        GATE_ROLE
    }

    #[instrument(skip_all, fields(from = %message.sender))]
    fn handle(&mut self, message: Message, ctx: &mut RoleContext<'_>) -> Result<()> {
        let (origin, body) = split_origin(&message.content, &message.sender);
        debug!(origin, state = %GateState::Received, "submission received");

        let blocks = extract_code_blocks(body);
        let python = python_blocks(&blocks);
        if python.is_empty() {
            info!(origin, blocks = blocks.len(), "no python code, storing raw text");
            self.machine.reset(origin);
            ctx.store_artifact(Artifact {
                origin: origin.to_string(),
                output: body.to_string(),
                code_blocks: Vec::new(),
                acceptance: Acceptance::NoCode,
            });
            return Ok(());
        }

        debug!(origin, blocks = python.len(), state = %GateState::Executing, "executing");
        let timeout = call_budget(ctx.deadline, self.execution_timeout)?;
        let result = self.sandbox.execute(&python, ctx.cancel, timeout)?;

        debug!(origin, exit_code = result.exit_code, state = %GateState::Evaluating, "evaluating");
        let evaluation = self.machine.evaluate(origin, &result);
        let decision = &evaluation.decision;

        match decision {
            GateDecision::Rejected {
                rejection, attempt, ..
            } => warn!(
                origin,
                reason = rejection.kind(),
                attempt,
                max = self.machine.limits().max_refine_attempts,
                state = %decision.state(),
                "submission rejected"
            ),
            GateDecision::ForceAccepted { .. } => warn!(
                origin,
                state = %decision.state(),
                "retry budget exhausted, accepting last output"
            ),
            GateDecision::Accepted { events, .. } => info!(
                origin,
                events,
                truncated = evaluation.truncated,
                state = %decision.state(),
                "submission accepted"
            ),
            GateDecision::Trivial => info!(origin, state = %decision.state(), "trivial output accepted"),
        }

        if let Some(reply) = decision.reply() {
            ctx.send(origin, reply);
        }

        if decision.is_final() {
            let acceptance = match decision {
                GateDecision::Trivial => Acceptance::Trivial,
                GateDecision::ForceAccepted { .. } => Acceptance::Forced,
                _ => Acceptance::Accepted,
            };
            let code_blocks = if blocks.last().is_some_and(|b| b.is_python()) {
                python
            } else {
                Vec::new()
            };
            ctx.store_artifact(Artifact {
                origin: origin.to_string(),
                output: evaluation.output,
                code_blocks,
                acceptance,
            });
        }
        Ok(())
    }

    fn task_started(&mut self, origin: &str) {
        if self.machine.retry_count(origin) > 0 {
            debug!(origin, "new task, clearing retry budget");
        }
        self.machine.reset(origin);
    }
}
