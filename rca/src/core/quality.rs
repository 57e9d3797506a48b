//! Modality-keyed acceptance policy applied by the gate.

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};

use crate::core::events::extract_anomaly_events;
use crate::core::text::non_whitespace_len;
use crate::core::types::Modality;

/// Dataset profile; selects the trace event bound.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Profile {
    #[default]
    Bank,
    Market,
    Tele,
}

impl Profile {
    pub fn trace_max_events(self) -> usize {
        match self {
            Profile::Bank => 3,
            Profile::Market => 5,
            Profile::Tele => 15,
        }
    }
}

/// Bounds an execution output must satisfy to be accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityPolicy {
    pub min_events: usize,
    pub max_events: usize,
    /// Lower bound on non-whitespace characters when no events parse.
    pub min_text_len: usize,
    pub max_text_len: usize,
    /// Refinement guidance quoted back to the generator on rejection.
    pub refine_rules: String,
}

impl Default for QualityPolicy {
    fn default() -> Self {
        Self::fallback()
    }
}

impl QualityPolicy {
    pub fn log() -> Self {
        Self {
            min_events: 0,
            max_events: 3,
            min_text_len: 0,
            max_text_len: 600,
            refine_rules: "When too many anomalies are detected, tighten the log count thresholds \
                           so only components with a sharp drop against peers and history remain."
                .to_string(),
        }
    }

    pub fn metric() -> Self {
        Self {
            min_events: 5,
            max_events: 30,
            min_text_len: 500,
            max_text_len: 10_000,
            refine_rules: "When too many anomalies are detected, prioritize metrics most likely to \
                           be root causes and apply stricter stable-phase criteria. If too few are \
                           found, loosen the rules accordingly."
                .to_string(),
        }
    }

    pub fn trace(profile: Profile) -> Self {
        Self {
            min_events: 0,
            max_events: profile.trace_max_events(),
            min_text_len: 0,
            max_text_len: 600,
            refine_rules: "When too many anomalies are detected, raise the latency and status \
                           thresholds to reduce noise."
                .to_string(),
        }
    }

    pub fn fallback() -> Self {
        Self {
            min_events: 0,
            max_events: 1000,
            min_text_len: 0,
            max_text_len: 10_000,
            refine_rules: "No specific refine rules defined for this coder.".to_string(),
        }
    }

    /// Reject bounds that can never be satisfied.
    pub fn validate(&self, label: &str) -> Result<()> {
        if self.min_events > self.max_events {
            bail!(
                "quality.{label}: min_events {} exceeds max_events {}",
                self.min_events,
                self.max_events
            );
        }
        if self.min_text_len > self.max_text_len {
            bail!(
                "quality.{label}: min_text_len {} exceeds max_text_len {}",
                self.min_text_len,
                self.max_text_len
            );
        }
        Ok(())
    }

    /// Judge an exit-0 execution output.
    pub fn judge(&self, output: &str, truncated: bool) -> QualityVerdict {
        let count = extract_anomaly_events(output).len();
        if count > 0 {
            if count > self.max_events || truncated {
                return QualityVerdict::TooManyEvents { count };
            }
            if count < self.min_events {
                return QualityVerdict::TooFewEvents { count };
            }
            return QualityVerdict::Accept { events: count };
        }

        let length = non_whitespace_len(output);
        if length > self.max_text_len || truncated {
            QualityVerdict::TooMuchText { length }
        } else if length < self.min_text_len {
            QualityVerdict::TooLittleText { length }
        } else {
            QualityVerdict::Accept { events: 0 }
        }
    }
}

/// Outcome of applying a [`QualityPolicy`] to one output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QualityVerdict {
    Accept { events: usize },
    TooManyEvents { count: usize },
    TooFewEvents { count: usize },
    TooMuchText { length: usize },
    TooLittleText { length: usize },
}

impl QualityVerdict {
    pub fn is_accept(&self) -> bool {
        matches!(self, QualityVerdict::Accept { .. })
    }
}

/// One policy per modality plus a permissive fallback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityPolicies {
    pub log: QualityPolicy,
    pub metric: QualityPolicy,
    pub trace: QualityPolicy,
    pub fallback: QualityPolicy,
}

impl Default for QualityPolicies {
    fn default() -> Self {
        Self::for_profile(Profile::default())
    }
}

impl QualityPolicies {
    pub fn for_profile(profile: Profile) -> Self {
        Self {
            log: QualityPolicy::log(),
            metric: QualityPolicy::metric(),
            trace: QualityPolicy::trace(profile),
            fallback: QualityPolicy::fallback(),
        }
    }

    /// Policy for a submission origin, chosen by its name prefix.
    pub fn select(&self, origin: &str) -> &QualityPolicy {
        match Modality::from_prefix(origin) {
            Some(Modality::Log) => &self.log,
            Some(Modality::Metric) => &self.metric,
            Some(Modality::Trace) => &self.trace,
            None => &self.fallback,
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.log.validate("log")?;
        self.metric.validate("metric")?;
        self.trace.validate("trace")?;
        self.fallback.validate("fallback")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn events_output(count: usize) -> String {
        let items: Vec<String> = (0..count)
            .map(|i| {
                format!(
                    "{{\"data_source\": \"Metric\", \"cmdb_id\": \"node{i}\", \"description\": \"spike\"}}"
                )
            })
            .collect();
        format!("anomaly_events = [{}]", items.join(", "))
    }

    #[test]
    fn metric_bounds_are_inclusive() {
        let policy = QualityPolicy::metric();
        assert_eq!(
            policy.judge(&events_output(5), false),
            QualityVerdict::Accept { events: 5 }
        );
        assert_eq!(
            policy.judge(&events_output(4), false),
            QualityVerdict::TooFewEvents { count: 4 }
        );
        assert_eq!(
            policy.judge(&events_output(31), false),
            QualityVerdict::TooManyEvents { count: 31 }
        );
        assert_eq!(
            policy.judge(&events_output(30), false),
            QualityVerdict::Accept { events: 30 }
        );
    }

    #[test]
    fn truncated_output_with_events_is_too_many() {
        let policy = QualityPolicy::metric();
        assert_eq!(
            policy.judge(&events_output(6), true),
            QualityVerdict::TooManyEvents { count: 6 }
        );
    }

    #[test]
    fn text_length_fallback_applies_without_events() {
        let policy = QualityPolicy::log();
        let output = "x".repeat(300);
        assert!(policy.judge(&output, false).is_accept());
        assert_eq!(
            policy.judge(&"x ".repeat(601), false),
            QualityVerdict::TooMuchText { length: 601 }
        );
        assert_eq!(
            policy.judge(&output, true),
            QualityVerdict::TooMuchText { length: 300 }
        );
        assert_eq!(
            QualityPolicy::metric().judge("short", false),
            QualityVerdict::TooLittleText { length: 5 }
        );
    }

    #[test]
    fn policy_selection_uses_origin_prefix() {
        let policies = QualityPolicies::for_profile(Profile::Tele);
        assert_eq!(policies.select("metric_coder").min_events, 5);
        assert_eq!(policies.select("LOG_coder").max_events, 3);
        assert_eq!(policies.select("trace_coder").max_events, 15);
        assert_eq!(policies.select("helper").max_events, 1000);
    }

    #[test]
    fn inverted_bounds_fail_validation() {
        let mut policies = QualityPolicies::default();
        policies.metric.min_events = 40;
        let err = policies.validate().expect_err("invalid");
        assert!(err.to_string().contains("quality.metric"));
    }
}
