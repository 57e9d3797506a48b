//! Generated toolset: accepted analysis code persisted as a JSON artifact.
//!
//! The file accumulates across sessions, but only tools accepted during the
//! current session are listed back to explorers.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::core::types::CodeBlock;

/// One persisted code block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolEntry {
    pub origin: String,
    pub task: String,
    pub language: String,
    pub code: String,
    /// RFC 3339 UTC time the tool was accepted.
    pub saved_at: String,
}

pub struct ToolStore {
    path: PathBuf,
    session: Vec<ToolEntry>,
}

impl ToolStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            session: Vec::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Tools accepted during this session, in acceptance order.
    pub fn session_entries(&self) -> &[ToolEntry] {
        &self.session
    }

    /// Append the Python blocks of an accepted submission. Returns how many were saved.
    pub fn append(&mut self, origin: &str, task: &str, blocks: &[CodeBlock]) -> Result<usize> {
        let saved_at = Utc::now().to_rfc3339();
        let new_entries: Vec<ToolEntry> = blocks
            .iter()
            .filter(|b| b.is_python())
            .map(|b| ToolEntry {
                origin: origin.to_string(),
                task: task.to_string(),
                language: b.language.clone(),
                code: b.code.clone(),
                saved_at: saved_at.clone(),
            })
            .collect();
        if new_entries.is_empty() {
            return Ok(0);
        }

        let mut all = load_entries(&self.path);
        all.extend(new_entries.iter().cloned());
        write_entries(&self.path, &all)?;
        debug!(path = %self.path.display(), saved = new_entries.len(), "toolset updated");

        let saved = new_entries.len();
        self.session.extend(new_entries);
        Ok(saved)
    }

    /// Human-readable listing of this session's tools for explorer prompts.
    pub fn listing(&self) -> String {
        self.session
            .iter()
            .enumerate()
            .map(|(i, entry)| {
                format!(
                    "tool_{} (from {}): {}\n```{}\n{}```",
                    i + 1,
                    entry.origin,
                    entry.task.trim(),
                    entry.language,
                    entry.code
                )
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

/// Load persisted entries; a missing or unreadable file counts as empty.
pub fn load_entries(path: &Path) -> Vec<ToolEntry> {
    let Ok(contents) = fs::read_to_string(path) else {
        return Vec::new();
    };
    match serde_json::from_str(&contents) {
        Ok(entries) => entries,
        Err(err) => {
            warn!(path = %path.display(), err = %err, "ignoring corrupt toolset file");
            Vec::new()
        }
    }
}

fn write_entries(path: &Path, entries: &[ToolEntry]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create toolset dir {}", parent.display()))?;
    }
    let mut buf = serde_json::to_string_pretty(entries).context("serialize toolset")?;
    buf.push('\n');
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, buf)
        .with_context(|| format!("write temp toolset {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace toolset {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(language: &str, code: &str) -> CodeBlock {
        CodeBlock {
            language: language.to_string(),
            code: code.to_string(),
        }
    }

    #[test]
    fn append_keeps_only_python_blocks() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("tools").join("toolset.json");
        let mut store = ToolStore::new(&path);
        let saved = store
            .append(
                "metric_coder",
                "cpu spikes",
                &[block("python", "print(1)\n"), block("json", "{}")],
            )
            .expect("append");
        assert_eq!(saved, 1);

        let on_disk = load_entries(&path);
        assert_eq!(on_disk.len(), 1);
        assert_eq!(on_disk[0].origin, "metric_coder");
        assert!(!on_disk[0].saved_at.is_empty());
    }

    #[test]
    fn listing_shows_only_this_session() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("toolset.json");
        ToolStore::new(&path)
            .append("log_coder", "earlier session", &[block("py", "old()\n")])
            .expect("append");

        let mut store = ToolStore::new(&path);
        assert_eq!(store.listing(), "");
        store
            .append("log_coder", "log drops", &[block("python", "new()\n")])
            .expect("append");

        let listing = store.listing();
        assert!(listing.starts_with("tool_1 (from log_coder): log drops\n```python\nnew()\n```"));
        assert!(!listing.contains("old()"));
        assert_eq!(load_entries(&path).len(), 2);
    }

    #[test]
    fn corrupt_file_loads_as_empty() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("toolset.json");
        fs::write(&path, "{not json").expect("write");
        assert!(load_entries(&path).is_empty());

        let mut store = ToolStore::new(&path);
        store
            .append("trace_coder", "latency", &[block("python", "x\n")])
            .expect("append");
        assert_eq!(load_entries(&path).len(), 1);
    }
}
