use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::agent_engine::state::{IterationRecord, SessionReport};
use crate::errors::GuiPilotResult;

/// One line of a session history file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HistoryEntry {
    Iteration(IterationRecord),
    Report(SessionReport),
}

/// Append-only JSONL log of a session.
pub struct SessionHistory {
    pub session_id: String,
    file_path: Option<PathBuf>,
}

impl SessionHistory {
    /// History under `dir`, or under the platform data dir when `dir` is `None`.
    pub fn new(session_id: &str, dir: Option<&Path>) -> GuiPilotResult<Self> {
        let dir = match dir {
            Some(d) => d.to_path_buf(),
            None => data_dir_or_cwd(),
        };
        std::fs::create_dir_all(&dir)?;
        let file_path = dir.join(format!("session_{session_id}.jsonl"));
        tracing::info!(path = %file_path.display(), "session history");
        Ok(Self {
            session_id: session_id.to_string(),
            file_path: Some(file_path),
        })
    }

    /// A history that records nothing.
    pub fn disabled(session_id: &str) -> Self {
        Self {
            session_id: session_id.to_string(),
            file_path: None,
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.file_path.as_deref()
    }

    /// Append one entry to the JSONL file.
    pub fn push(&self, entry: &HistoryEntry) -> GuiPilotResult<()> {
        let Some(path) = &self.file_path else {
            return Ok(());
        };
        let line = serde_json::to_string(entry)?;
        let mut file = std::fs::OpenOptions::new().create(true).append(true).open(path)?;
        writeln!(file, "{}", line)?;
        tracing::debug!(path = %path.display(), "history entry flushed");
        Ok(())
    }
}

/// `<data dir>/guipilot/sessions`, falling back to the current working directory.
fn data_dir_or_cwd() -> PathBuf {
    match dirs::data_local_dir() {
        Some(base) => base.join("guipilot").join("sessions"),
        None => std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::agent_engine::state::Verdict;

    fn record(iteration: u32) -> IterationRecord {
        IterationRecord {
            iteration,
            subtask_id: 1,
            subtask: "open application".into(),
            generation: 1,
            outcomes: vec![],
            verdict: Verdict::Success {
                summary: "opened".into(),
            },
            error_seq: None,
            finished_at: Utc::now(),
        }
    }

    #[test]
    fn entries_are_appended_as_lines() {
        let dir = tempfile::tempdir().unwrap();
        let history = SessionHistory::new("abc", Some(dir.path())).unwrap();
        history.push(&HistoryEntry::Iteration(record(1))).unwrap();
        history.push(&HistoryEntry::Iteration(record(2))).unwrap();

        let content = std::fs::read_to_string(dir.path().join("session_abc.jsonl")).unwrap();
        let lines: Vec<_> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        let second: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second["kind"], "iteration");
        assert_eq!(second["iteration"], 2);
        assert_eq!(second["verdict"]["verdict"], "success");
    }

    #[test]
    fn disabled_history_writes_nothing() {
        let history = SessionHistory::disabled("abc");
        assert!(history.path().is_none());
        history.push(&HistoryEntry::Iteration(record(1))).unwrap();
    }
}
