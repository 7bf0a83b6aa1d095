use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::TaskConfig;
use crate::executor::operations::UiOperation;
use crate::memory::ErrorRecord;
use crate::perception::types::ScreenState;

/// The overall goal of a session. Immutable once the session starts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl Task {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            domain: None,
            id: None,
        }
    }

    pub fn from_config(cfg: &TaskConfig) -> Self {
        Self {
            description: cfg.description.clone(),
            domain: cfg.domain.clone(),
            id: cfg.id.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubtaskStatus {
    Pending,
    Active,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subtask {
    pub id: u32,
    pub description: String,
    pub status: SubtaskStatus,
    /// Number of replans this subtask has gone through.
    pub replans: u32,
}

impl Subtask {
    pub fn pending(id: u32, description: impl Into<String>) -> Self {
        Self {
            id,
            description: description.into(),
            status: SubtaskStatus::Pending,
            replans: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instruction {
    pub text: String,
    /// What the screen should look like once the step is done, when the planner says so.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_hint: Option<String>,
}

impl Instruction {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            target_hint: None,
        }
    }

    /// Planner output of the form `step -> expected state` carries a target hint.
    pub fn parse(raw: &str) -> Self {
        match raw.split_once("->") {
            Some((text, hint)) if !text.trim().is_empty() && !hint.trim().is_empty() => Self {
                text: text.trim().to_string(),
                target_hint: Some(hint.trim().to_string()),
            },
            _ => Self::new(raw.trim()),
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.target_hint {
            Some(hint) => write!(f, "{} (expect: {hint})", self.text),
            None => f.write_str(&self.text),
        }
    }
}

/// One numbered instruction sequence of a subtask. Replanning creates a new generation;
/// earlier generations are kept as history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstructionGeneration {
    pub subtask_id: u32,
    pub number: u32,
    pub instructions: Vec<Instruction>,
    /// Index execution resumes from; everything before it already ran successfully.
    pub resume_at: usize,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Ok,
    Failed,
}

/// Result of applying one instruction, with the screen observed right after.
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub index: usize,
    pub instruction: Instruction,
    pub status: OutcomeStatus,
    pub detail: Option<String>,
    pub operations: Vec<UiOperation>,
    pub screen: Arc<ScreenState>,
}

impl ExecutionOutcome {
    pub fn is_ok(&self) -> bool {
        self.status == OutcomeStatus::Ok
    }

    pub fn summary(&self) -> OutcomeSummary {
        OutcomeSummary {
            index: self.index,
            instruction: self.instruction.text.clone(),
            status: self.status,
            detail: self.detail.clone(),
            operations: self.operations.clone(),
            screen_elements: self.screen.elements.len(),
        }
    }
}

/// Serializable view of an [`ExecutionOutcome`] for history and reports.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutcomeSummary {
    pub index: usize,
    pub instruction: String,
    pub status: OutcomeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub operations: Vec<UiOperation>,
    pub screen_elements: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum Verdict {
    Success { summary: String },
    Failure { observation: String },
}

impl Verdict {
    pub fn is_success(&self) -> bool {
        matches!(self, Verdict::Success { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Fixable with a single corrective step on the current screen.
    Minor,
    /// The current screen no longer allows the plan to continue.
    Major,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnosis {
    pub cause: String,
    /// Reflection's own proposed fix.
    pub fix: Option<String>,
    pub severity: Severity,
    /// Earliest instruction that was reported ok but did not actually take effect.
    pub redo_from: Option<usize>,
    /// Set once the diagnosis was handed to error handling, whatever came back.
    #[serde(default)]
    pub escalated: bool,
    /// Resolution returned by error handling after escalation.
    pub escalated_resolution: Option<String>,
}

impl Diagnosis {
    pub fn new(cause: impl Into<String>) -> Self {
        Self {
            cause: cause.into(),
            fix: None,
            severity: Severity::Unknown,
            redo_from: None,
            escalated: false,
            escalated_resolution: None,
        }
    }

    pub fn with_fix(mut self, fix: impl Into<String>) -> Self {
        self.fix = Some(fix.into());
        self
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn is_confident(&self) -> bool {
        self.fix.is_some() && self.severity != Severity::Unknown
    }

    pub fn was_escalated(&self) -> bool {
        self.escalated || self.escalated_resolution.is_some()
    }

    /// Reflection's fix and error handling's resolution, both kept when present.
    pub fn resolution(&self) -> Option<String> {
        match (&self.fix, &self.escalated_resolution) {
            (Some(fix), Some(escalated)) => Some(format!("{fix}\nError handling: {escalated}")),
            (Some(fix), None) => Some(fix.clone()),
            (None, Some(escalated)) => Some(escalated.clone()),
            (None, None) => None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.fix.is_some() || self.escalated_resolution.is_some()
    }
}

/// One loop iteration: one subtask attempt and what came of it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IterationRecord {
    pub iteration: u32,
    pub subtask_id: u32,
    pub subtask: String,
    pub generation: u32,
    pub outcomes: Vec<OutcomeSummary>,
    pub verdict: Verdict,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_seq: Option<u64>,
    pub finished_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Completed,
    Exhausted,
    Failed,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SessionStatus::Completed => "completed",
            SessionStatus::Exhausted => "exhausted",
            SessionStatus::Failed => "failed",
        })
    }
}

/// Everything a caller needs for post-hoc inspection of a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionReport {
    pub session_id: String,
    pub task: Task,
    pub status: SessionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub iterations: Vec<IterationRecord>,
    pub subtasks: Vec<Subtask>,
    /// Pending subtasks dropped by a review, kept for audit.
    pub retired_subtasks: Vec<Subtask>,
    pub generations: Vec<InstructionGeneration>,
    pub errors: Vec<ErrorRecord>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}
