//! Validation and retry state machine behind the `executor` role.
//!
//! The machine judges one sandbox result per invocation:
//! `RECEIVED -> EXECUTING -> EVALUATING -> {ACCEPTED, REJECTED, FORCE_ACCEPTED}`.
//! Executing is the caller's job; everything here is pure so the retry
//! accounting can be tested without a sandbox.

use std::collections::HashMap;
use std::fmt;

use crate::core::protocol::wrap_success;
use crate::core::quality::{QualityPolicies, QualityPolicy, QualityVerdict};
use crate::core::text::truncate;
use crate::core::types::ExecutionResult;

pub const DEFAULT_MAX_REFINE_ATTEMPTS: u32 = 3;
pub const DEFAULT_MAX_OUTPUT_LENGTH: usize = 50_000;
/// Outputs this short (in characters) are accepted without judgement.
const TRIVIAL_OUTPUT_LEN: usize = 5;

const EXECUTION_GUIDANCE: &str = "When executing, code blocks will be executed sequentially, \
so if you need to install libraries, please install them in the first code block. Most \
standard Python environments do not support direct use of `!pip install` statements. You \
should avoid using this syntax and try to use subprocess to install required Python packages. \
If you are solving an error, you only need to provide the modified code. Please note that \
since all code blocks in your output will be executed to verify correctness, please ensure \
that the content in the output code blocks must be correct and executable. The execution \
failed with the following error:";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    Received,
    Executing,
    Evaluating,
    Accepted,
    Rejected,
    ForceAccepted,
}

impl GateState {
    pub fn as_str(self) -> &'static str {
        match self {
            GateState::Received => "received",
            GateState::Executing => "executing",
            GateState::Evaluating => "evaluating",
            GateState::Accepted => "accepted",
            GateState::Rejected => "rejected",
            GateState::ForceAccepted => "force_accepted",
        }
    }
}

impl fmt::Display for GateState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateLimits {
    pub max_refine_attempts: u32,
    pub max_output_length: usize,
}

impl Default for GateLimits {
    fn default() -> Self {
        Self {
            max_refine_attempts: DEFAULT_MAX_REFINE_ATTEMPTS,
            max_output_length: DEFAULT_MAX_OUTPUT_LENGTH,
        }
    }
}

/// Rejections recorded per submission origin. Missing means zero.
#[derive(Debug, Clone, Default)]
pub struct RetryCounters {
    counts: HashMap<String, u32>,
}

impl RetryCounters {
    pub fn get(&self, origin: &str) -> u32 {
        self.counts.get(origin).copied().unwrap_or(0)
    }

    /// Count one more rejection; returns the new value.
    pub fn increment(&mut self, origin: &str) -> u32 {
        let count = self.counts.entry(origin.to_string()).or_insert(0);
        *count += 1;
        *count
    }

    pub fn reset(&mut self, origin: &str) {
        self.counts.insert(origin.to_string(), 0);
    }
}

/// Why a submission was sent back for regeneration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    ExecutionError { exit_code: i32 },
    TooManyEvents { count: usize, max: usize },
    TooFewEvents { count: usize, min: usize },
    TooMuchText { length: usize },
    TooLittleText { length: usize },
}

impl Rejection {
    pub fn kind(&self) -> &'static str {
        match self {
            Rejection::ExecutionError { .. } => "execution_error",
            Rejection::TooManyEvents { .. } => "too_many_events",
            Rejection::TooFewEvents { .. } => "too_few_events",
            Rejection::TooMuchText { .. } => "too_much_text",
            Rejection::TooLittleText { .. } => "too_little_text",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    /// Output too short to judge; stored without acknowledgement.
    Trivial,
    Accepted {
        events: usize,
        ack: String,
    },
    ForceAccepted {
        ack: String,
    },
    Rejected {
        rejection: Rejection,
        attempt: u32,
        feedback: String,
    },
}

impl GateDecision {
    pub fn state(&self) -> GateState {
        match self {
            GateDecision::Trivial | GateDecision::Accepted { .. } => GateState::Accepted,
            GateDecision::ForceAccepted { .. } => GateState::ForceAccepted,
            GateDecision::Rejected { .. } => GateState::Rejected,
        }
    }

    /// Message to send back to the origin, if any.
    pub fn reply(&self) -> Option<&str> {
        match self {
            GateDecision::Trivial => None,
            GateDecision::Accepted { ack, .. } | GateDecision::ForceAccepted { ack } => Some(ack),
            GateDecision::Rejected { feedback, .. } => Some(feedback),
        }
    }

    pub fn is_final(&self) -> bool {
        !matches!(self, GateDecision::Rejected { .. })
    }
}

/// Judgement over one execution result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Evaluation {
    /// Output after head/tail truncation.
    pub output: String,
    pub truncated: bool,
    pub decision: GateDecision,
}

/// Retry accounting plus policy lookup for every origin.
#[derive(Debug, Clone)]
pub struct GateMachine {
    limits: GateLimits,
    policies: QualityPolicies,
    counters: RetryCounters,
}

impl GateMachine {
    pub fn new(limits: GateLimits, policies: QualityPolicies) -> Self {
        Self {
            limits,
            policies,
            counters: RetryCounters::default(),
        }
    }

    pub fn limits(&self) -> GateLimits {
        self.limits
    }

    pub fn retry_count(&self, origin: &str) -> u32 {
        self.counters.get(origin)
    }

    /// Start a fresh retry budget for `origin`, e.g. when it receives a new task.
    pub fn reset(&mut self, origin: &str) {
        self.counters.reset(origin);
    }

    /// Judge one sandbox result for `origin`, updating its retry counter.
    pub fn evaluate(&mut self, origin: &str, result: &ExecutionResult) -> Evaluation {
        let (output, cut) = truncate(&result.output, self.limits.max_output_length);
        let truncated = cut || result.truncated;

        let decision = if result.output.chars().count() <= TRIVIAL_OUTPUT_LEN {
            self.counters.reset(origin);
            GateDecision::Trivial
        } else if self.counters.get(origin) >= self.limits.max_refine_attempts {
            self.counters.reset(origin);
            GateDecision::ForceAccepted {
                ack: format!(
                    "Maximum retry attempts ({}) reached, will use current result. Execution result:\n{}",
                    self.limits.max_refine_attempts,
                    wrap_success(&output)
                ),
            }
        } else if result.exit_code != 0 {
            let attempt = self.counters.increment(origin);
            let rejection = Rejection::ExecutionError {
                exit_code: result.exit_code,
            };
            GateDecision::Rejected {
                rejection,
                attempt,
                feedback: refinement_feedback(
                    rejection,
                    "",
                    attempt,
                    self.limits.max_refine_attempts,
                    &output,
                ),
            }
        } else {
            let policy = self.policies.select(origin).clone();
            self.judge_quality(origin, &policy, &output, truncated)
        };

        Evaluation {
            output,
            truncated,
            decision,
        }
    }

    fn judge_quality(
        &mut self,
        origin: &str,
        policy: &QualityPolicy,
        output: &str,
        truncated: bool,
    ) -> GateDecision {
        let rejection = match policy.judge(output, truncated) {
            QualityVerdict::Accept { events } => {
                self.counters.reset(origin);
                return GateDecision::Accepted {
                    events,
                    ack: wrap_success(output),
                };
            }
            QualityVerdict::TooManyEvents { count } => Rejection::TooManyEvents {
                count,
                max: policy.max_events,
            },
            QualityVerdict::TooFewEvents { count } => Rejection::TooFewEvents {
                count,
                min: policy.min_events,
            },
            QualityVerdict::TooMuchText { length } => Rejection::TooMuchText { length },
            QualityVerdict::TooLittleText { length } => Rejection::TooLittleText { length },
        };
        let attempt = self.counters.increment(origin);
        let feedback = refinement_feedback(
            rejection,
            &policy.refine_rules,
            attempt,
            self.limits.max_refine_attempts,
            output,
        );
        GateDecision::Rejected {
            rejection,
            attempt,
            feedback,
        }
    }
}

fn refinement_feedback(
    rejection: Rejection,
    rules: &str,
    attempt: u32,
    max_attempts: u32,
    output: &str,
) -> String {
    let headline = match rejection {
        Rejection::TooManyEvents { count, max } => format!(
            "Too many anomaly events detected ({count}), exceeding maximum allowed {max}. \
             Please increase detection threshold, focus only on the most severe anomalies, and \
             consider temporal correlation of related anomalies, grouping related anomalies as \
             single events."
        ),
        Rejection::TooFewEvents { count, min } => format!(
            "Too few anomaly events detected (only {count}), below minimum expected {min}. \
             Please adjust code to discover more anomalies."
        ),
        Rejection::TooMuchText { length } => format!(
            "Too much output content ({length} characters). Please increase detection threshold, \
             focus only on the most severe anomalies, and ensure using standard format to return \
             anomaly_events."
        ),
        Rejection::TooLittleText { length } => format!(
            "Too little output content ({length} characters). Please adjust code to discover more \
             anomalies, and ensure using standard format to return anomaly_events."
        ),
        Rejection::ExecutionError { .. } => return format!("{EXECUTION_GUIDANCE}{output}"),
    };
    format!(
        "{headline} These are the refine principles:{rules}.(Attempt {attempt}/{max_attempts}) \
         Execution result:\n{output}"
    )
}
