//! Append-only log of past errors shared by planning and reflection.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::agent_engine::state::{Diagnosis, Instruction, Severity, Subtask};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    /// Position in the store, assigned on append.
    pub seq: u64,
    pub subtask_id: u32,
    pub subtask: String,
    pub instruction_index: usize,
    pub instruction: String,
    pub cause: String,
    pub resolution: Option<String>,
    pub severity: Severity,
    pub escalated: bool,
    pub recorded_at: DateTime<Utc>,
}

impl ErrorRecord {
    pub fn from_diagnosis(subtask: &Subtask, instruction_index: usize, instruction: &Instruction, diagnosis: &Diagnosis) -> Self {
        Self {
            seq: 0,
            subtask_id: subtask.id,
            subtask: subtask.description.clone(),
            instruction_index,
            instruction: instruction.text.clone(),
            cause: diagnosis.cause.clone(),
            resolution: diagnosis.resolution(),
            severity: diagnosis.severity,
            escalated: diagnosis.was_escalated(),
            recorded_at: Utc::now(),
        }
    }
}

/// Records are never modified or removed once appended, and every query sees all of them in
/// insertion order regardless of the subtask they came from.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Vec<ErrorRecord>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a record and return it with its sequence number set.
    pub fn append(&mut self, mut record: ErrorRecord) -> &ErrorRecord {
        record.seq = self.records.len() as u64 + 1;
        tracing::info!(
            seq = record.seq,
            subtask = record.subtask_id,
            instruction = %record.instruction,
            cause = %record.cause,
            "error recorded"
        );
        self.records.push(record);
        &self.records[self.records.len() - 1]
    }

    /// All records, oldest first. `context` only affects logging.
    pub fn query(&self, context: &Subtask) -> &[ErrorRecord] {
        let own = self.records.iter().filter(|r| r.subtask_id == context.id).count();
        tracing::trace!(subtask = context.id, own, total = self.records.len(), "memory query");
        &self.records
    }

    /// How many times this instruction already failed within the subtask.
    pub fn repeat_count(&self, subtask_id: u32, instruction: &str) -> usize {
        self.records
            .iter()
            .filter(|r| r.subtask_id == subtask_id && r.instruction.eq_ignore_ascii_case(instruction.trim()))
            .count()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn snapshot(&self) -> Vec<ErrorRecord> {
        self.records.clone()
    }
}

/// Compact rendering for prompts, most recent last.
pub fn render_errors(records: &[ErrorRecord]) -> String {
    if records.is_empty() {
        return "No previous errors.".to_string();
    }
    records
        .iter()
        .map(|r| {
            format!(
                "#{} [subtask \"{}\"] step {} \"{}\": {} => {}",
                r.seq,
                r.subtask,
                r.instruction_index + 1,
                r.instruction,
                r.cause,
                r.resolution.as_deref().unwrap_or("unresolved")
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(subtask: &Subtask, idx: usize, text: &str, cause: &str) -> ErrorRecord {
        let diagnosis = Diagnosis::new(cause).with_fix("retry differently").with_severity(Severity::Minor);
        ErrorRecord::from_diagnosis(subtask, idx, &Instruction::new(text), &diagnosis)
    }

    #[test]
    fn query_is_global_and_ordered() {
        let open = Subtask::pending(1, "open application");
        let insert = Subtask::pending(2, "insert image");
        let mut store = MemoryStore::new();
        store.append(record(&open, 0, "click icon A", "not visible"));
        store.append(record(&insert, 1, "click Insert", "menu closed"));

        let seen_from_open = store.query(&open);
        assert_eq!(seen_from_open.len(), 2);
        assert_eq!(seen_from_open[0].seq, 1);
        assert_eq!(seen_from_open[1].subtask_id, 2);
        assert_eq!(store.query(&insert), seen_from_open);
    }

    #[test]
    fn earlier_queries_are_prefixes_of_later_ones() {
        let s = Subtask::pending(1, "open");
        let mut store = MemoryStore::new();
        store.append(record(&s, 0, "a", "x"));
        let before = store.snapshot();
        store.append(record(&s, 1, "b", "y"));
        store.append(record(&s, 0, "a", "z"));
        let after = store.query(&s);
        assert_eq!(&after[..before.len()], before.as_slice());
        assert_eq!(after.len(), 3);
    }

    #[test]
    fn repeat_count_matches_subtask_and_instruction() {
        let s1 = Subtask::pending(1, "open");
        let s2 = Subtask::pending(2, "save");
        let mut store = MemoryStore::new();
        store.append(record(&s1, 0, "Click icon A", "x"));
        store.append(record(&s1, 0, "click icon a", "y"));
        store.append(record(&s2, 0, "click icon A", "z"));
        assert_eq!(store.repeat_count(1, "click icon A"), 2);
        assert_eq!(store.repeat_count(2, "click icon A"), 1);
        assert_eq!(store.repeat_count(1, "type text"), 0);
    }

    #[test]
    fn rendering() {
        assert_eq!(render_errors(&[]), "No previous errors.");
        let s = Subtask::pending(1, "open");
        let mut store = MemoryStore::new();
        store.append(record(&s, 0, "click icon A", "icon A not visible"));
        let text = render_errors(store.query(&s));
        assert!(text.starts_with("#1 [subtask \"open\"] step 1 \"click icon A\": icon A not visible"));
    }
}
