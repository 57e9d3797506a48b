//! Session artifacts written under the `--out` directory.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;

use crate::core::history::Conversation;
use crate::core::types::{InvestigationRecord, StageTimings, UsageLedger};

/// Everything a finished session reports, persisted as `report.json`.
#[derive(Debug, Clone, Serialize)]
pub struct SessionReport<'a> {
    pub query: &'a str,
    pub started_at: String,
    pub finished_at: String,
    pub plan: Option<&'a str>,
    pub investigation: &'a [InvestigationRecord],
    pub root_cause: Option<&'a str>,
    pub final_result: &'a str,
    pub placeholder: bool,
    /// Why the placeholder was substituted, if it was.
    pub error: Option<String>,
    pub usage: &'a UsageLedger,
    pub timings: StageTimings,
}

#[derive(Debug, Clone)]
pub struct SessionPaths {
    pub dir: PathBuf,
    pub report_path: PathBuf,
    pub transcripts_dir: PathBuf,
}

impl SessionPaths {
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
            report_path: dir.join("report.json"),
            transcripts_dir: dir.join("transcripts"),
        }
    }

    pub fn transcript_path(&self, role: &str) -> PathBuf {
        self.transcripts_dir.join(format!("{role}.json"))
    }
}

pub fn write_session(
    dir: &Path,
    report: &SessionReport<'_>,
    transcripts: &[(String, Conversation)],
) -> Result<SessionPaths> {
    let paths = SessionPaths::new(dir);
    fs::create_dir_all(&paths.transcripts_dir).with_context(|| {
        format!(
            "create transcripts dir {}",
            paths.transcripts_dir.display()
        )
    })?;

    write_json(&paths.report_path, report)?;
    for (role, conversation) in transcripts {
        write_json(&paths.transcript_path(role), conversation.turns())?;
    }
    Ok(paths)
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(value)?;
    buf.push('\n');
    fs::write(path, buf).with_context(|| format!("write {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_paths_are_stable() {
        let paths = SessionPaths::new(Path::new("out"));
        assert!(paths.report_path.ends_with("out/report.json"));
        assert!(
            paths
                .transcript_path("log_coder")
                .ends_with("out/transcripts/log_coder.json")
        );
    }

    #[test]
    fn writes_report_and_transcripts() {
        let temp = tempfile::tempdir().expect("tempdir");
        let records = vec![InvestigationRecord {
            round: 1,
            explorer: "log_explorer".to_string(),
            task: "drops".to_string(),
            result: None,
        }];
        let usage = UsageLedger::default();
        let report = SessionReport {
            query: "why",
            started_at: "t0".to_string(),
            finished_at: "t1".to_string(),
            plan: Some("plan"),
            investigation: &records,
            root_cause: None,
            final_result: "{}",
            placeholder: true,
            error: Some("timeout".to_string()),
            usage: &usage,
            timings: StageTimings::default(),
        };
        let mut conversation = Conversation::new("primer");
        conversation.push_user("task");

        let paths = write_session(
            temp.path(),
            &report,
            &[("log_coder".to_string(), conversation)],
        )
        .expect("write");

        let written: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&paths.report_path).expect("read"))
                .expect("json");
        assert_eq!(written["placeholder"], true);
        assert_eq!(written["investigation"][0]["result"], serde_json::Value::Null);

        let transcript: serde_json::Value = serde_json::from_str(
            &fs::read_to_string(paths.transcript_path("log_coder")).expect("read"),
        )
        .expect("json");
        assert_eq!(transcript[1]["role"], "user");
    }
}
