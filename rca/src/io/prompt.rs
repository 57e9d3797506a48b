//! Prompt rendering for every role and controller message.

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use serde::Serialize;

use crate::core::protocol::wrap_task;
use crate::core::types::Modality;

const TEMPLATES: &[(&str, &str)] = &[
    ("planner_system", include_str!("prompts/planner_system.md")),
    ("planning", include_str!("prompts/planning.md")),
    ("router_system", include_str!("prompts/router_system.md")),
    ("investigation", include_str!("prompts/investigation.md")),
    ("router", include_str!("prompts/router.md")),
    ("router_correction", include_str!("prompts/router_correction.md")),
    ("router_update", include_str!("prompts/router_update.md")),
    ("explorer_system", include_str!("prompts/explorer_system.md")),
    ("explorer_task", include_str!("prompts/explorer_task.md")),
    ("tool_result", include_str!("prompts/tool_result.md")),
    ("coder_system", include_str!("prompts/coder_system.md")),
    ("generator_task", include_str!("prompts/generator_task.md")),
    ("reasoner_system", include_str!("prompts/reasoner_system.md")),
    ("reasoning", include_str!("prompts/reasoning.md")),
];

/// An explorer offered to the router.
#[derive(Debug, Clone, Serialize)]
pub struct ExplorerEntry {
    pub name: String,
    pub description: String,
}

impl ExplorerEntry {
    pub fn for_modality(modality: Modality) -> Self {
        Self {
            name: modality.explorer_name(),
            description: format!("Used for querying and analyzing {modality} data."),
        }
    }
}

/// A modality's data description as shown to the planner.
#[derive(Debug, Clone, Serialize)]
pub struct DataSourceEntry {
    pub modality: String,
    pub description: String,
}

/// One completed investigation step, as rendered for the router.
#[derive(Debug, Clone, Serialize)]
pub struct RecordView<'a> {
    pub round: u32,
    pub explorer: &'a str,
    pub task: &'a str,
    pub result: Option<&'a str>,
}

/// Template engine wrapper around minijinja.
pub struct Prompts {
    env: Environment<'static>,
}

impl Prompts {
    pub fn new() -> Result<Self> {
        let mut env = Environment::new();
        for (name, source) in TEMPLATES {
            env.add_template(name, source)
                .with_context(|| format!("load prompt template {name}"))?;
        }
        Ok(Self { env })
    }

    fn render(&self, name: &str, ctx: minijinja::Value) -> Result<String> {
        let template = self
            .env
            .get_template(name)
            .with_context(|| format!("lookup prompt template {name}"))?;
        template
            .render(ctx)
            .with_context(|| format!("render prompt template {name}"))
    }

    pub fn planner_system(&self) -> Result<String> {
        self.render("planner_system", context! {})
    }

    pub fn planning(&self, query: &str, data_sources: &[DataSourceEntry]) -> Result<String> {
        self.render(
            "planning",
            context! { query => query.trim(), data_sources => data_sources },
        )
    }

    pub fn router_system(&self) -> Result<String> {
        self.render("router_system", context! {})
    }

    /// First router message: query plus diagnosis plan.
    pub fn investigation(&self, query: &str, plan: &str) -> Result<String> {
        self.render(
            "investigation",
            context! { query => query.trim(), plan => plan.trim() },
        )
    }

    /// Wrap a router message with the available explorers and answer format.
    pub fn router(&self, message: &str, explorers: &[ExplorerEntry]) -> Result<String> {
        self.render(
            "router",
            context! { message => message.trim(), explorers => explorers },
        )
    }

    pub fn router_correction(&self, explorer_names: &[String], error: Option<&str>) -> Result<String> {
        self.render(
            "router_correction",
            context! { explorer_names => explorer_names, error => error },
        )
    }

    pub fn router_update(&self, records: &[RecordView<'_>]) -> Result<String> {
        self.render("router_update", context! { records => records })
    }

    pub fn explorer_system(&self, modality: Modality) -> Result<String> {
        self.render("explorer_system", context! { modality => modality.as_str() })
    }

    pub fn explorer_task(&self, task: &str, toolset: &str) -> Result<String> {
        self.render(
            "explorer_task",
            context! { task => task, toolset => (!toolset.trim().is_empty()).then(|| toolset.trim()) },
        )
    }

    pub fn tool_result(&self, task: &str, result: &str, modality: Modality) -> Result<String> {
        self.render(
            "tool_result",
            context! { task => task, result => result, data_source => modality.data_source() },
        )
    }

    pub fn coder_system(&self, modality: Modality) -> Result<String> {
        self.render(
            "coder_system",
            context! { modality => modality.as_str(), data_source => modality.data_source() },
        )
    }

    pub fn generator_task(&self, coder: &str, data_description: &str, task: &str) -> Result<String> {
        self.render(
            "generator_task",
            context! {
                coder => coder,
                data_description => data_description.trim(),
                task => wrap_task(task),
            },
        )
    }

    pub fn reasoner_system(&self) -> Result<String> {
        self.render("reasoner_system", context! {})
    }

    pub fn reasoning(&self, query: &str, plan: &str, results: &str) -> Result<String> {
        self.render(
            "reasoning",
            context! { query => query.trim(), plan => plan.trim(), results => results },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::protocol::extract_task;

    fn prompts() -> Prompts {
        Prompts::new().expect("templates")
    }

    #[test]
    fn every_template_renders() {
        let p = prompts();
        let explorers: Vec<ExplorerEntry> =
            Modality::ALL.into_iter().map(ExplorerEntry::for_modality).collect();
        assert!(p.planner_system().expect("render").contains("planner"));
        assert!(p.router_system().expect("render").contains("INVESTIGATION_COMPLETE"));
        assert!(p.reasoner_system().expect("render").contains("root cause"));
        let router = p.router("msg", &explorers).expect("render");
        assert!(router.contains("- trace_explorer: Used for querying and analyzing trace data."));
        assert!(router.contains("INVESTIGATION_COMPLETE"));
        assert!(p.investigation("q", "plan").expect("render").contains("<diagnosis_plan>\nplan\n"));
        assert!(p.reasoning("q", "plan", "[]").expect("render").contains("root_cause_component"));
    }

    #[test]
    fn correction_lists_names_and_error() {
        let names = vec!["log_explorer".to_string()];
        let text = prompts()
            .router_correction(&names, Some("unknown explorer"))
            .expect("render");
        assert!(text.contains("- log_explorer"));
        assert!(text.contains("Problem: unknown explorer"));

        let text = prompts().router_correction(&names, None).expect("render");
        assert!(!text.contains("Problem:"));
    }

    #[test]
    fn update_renders_null_results() {
        let records = [RecordView {
            round: 1,
            explorer: "metric_explorer",
            task: "cpu",
            result: None,
        }];
        let text = prompts().router_update(&records).expect("render");
        assert!(text.contains("[round 1] metric_explorer"));
        assert!(text.contains("result: null"));
    }

    #[test]
    fn generator_task_embeds_task_tag() {
        let text = prompts()
            .generator_task("log_coder", "logs live in log.csv", "find drops\nin 14:00")
            .expect("render");
        assert!(text.starts_with("[From log_coder]\nlogs live in log.csv\n"));
        assert_eq!(extract_task(&text).as_deref(), Some("find drops\nin 14:00"));
    }

    #[test]
    fn explorer_task_shows_toolset_or_placeholder() {
        let p = prompts();
        assert!(p.explorer_task("t", "").expect("render").contains("(no tools generated yet)"));
        assert!(p.explorer_task("t", "tool-1").expect("render").contains("tool-1"));
        let coder = p.coder_system(Modality::Metric).expect("render");
        assert!(coder.contains("\"data_source\": \"Metric\""));
    }
}
