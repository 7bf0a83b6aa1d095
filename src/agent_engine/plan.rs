use chrono::Utc;

use crate::agent_engine::state::{Instruction, InstructionGeneration, Subtask, SubtaskStatus};
use crate::config::ReviewPolicy;
use crate::errors::{GuiPilotError, GuiPilotResult};

/// Ordered subtasks of a session plus every instruction generation issued for them.
///
/// At most one subtask is `Active`. Completed and failed subtasks are never modified again;
/// pending subtasks removed by a review move to `retired` instead of being dropped, and those a
/// review keeps word for word keep their id.
#[derive(Debug, Clone, Default)]
pub struct Plan {
    subtasks: Vec<Subtask>,
    retired: Vec<Subtask>,
    generations: Vec<InstructionGeneration>,
    next_id: u32,
}

impl Plan {
    pub fn new(descriptions: Vec<String>) -> GuiPilotResult<Self> {
        let descriptions: Vec<String> = descriptions
            .into_iter()
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty())
            .collect();
        if descriptions.is_empty() {
            return Err(GuiPilotError::Agent("decomposition produced no subtasks".into()));
        }
        let mut plan = Self {
            next_id: 1,
            ..Self::default()
        };
        for d in descriptions {
            plan.push_pending(d);
        }
        Ok(plan)
    }

    fn push_pending(&mut self, description: String) {
        self.subtasks.push(Subtask::pending(self.next_id, description));
        self.next_id += 1;
    }

    pub fn subtasks(&self) -> &[Subtask] {
        &self.subtasks
    }

    pub fn retired(&self) -> &[Subtask] {
        &self.retired
    }

    pub fn generations(&self) -> &[InstructionGeneration] {
        &self.generations
    }

    pub fn active(&self) -> Option<&Subtask> {
        self.subtasks.iter().find(|s| s.status == SubtaskStatus::Active)
    }

    fn active_mut(&mut self) -> Option<&mut Subtask> {
        self.subtasks.iter_mut().find(|s| s.status == SubtaskStatus::Active)
    }

    pub fn active_count(&self) -> usize {
        self.subtasks.iter().filter(|s| s.status == SubtaskStatus::Active).count()
    }

    pub fn pending(&self) -> Vec<Subtask> {
        self.subtasks
            .iter()
            .filter(|s| s.status == SubtaskStatus::Pending)
            .cloned()
            .collect()
    }

    pub fn failed_count(&self) -> usize {
        self.subtasks.iter().filter(|s| s.status == SubtaskStatus::Failed).count()
    }

    /// Activate the first pending subtask. Returns `None` when nothing is pending, or when a
    /// subtask is already active.
    pub fn activate_next(&mut self) -> Option<Subtask> {
        if self.active_count() > 0 {
            tracing::warn!("activate_next called while a subtask is still active");
            return None;
        }
        let next = self
            .subtasks
            .iter_mut()
            .find(|s| s.status == SubtaskStatus::Pending)?;
        next.status = SubtaskStatus::Active;
        Some(next.clone())
    }

    pub fn complete_active(&mut self) -> Option<Subtask> {
        let active = self.active_mut()?;
        active.status = SubtaskStatus::Completed;
        Some(active.clone())
    }

    pub fn fail_active(&mut self) -> Option<Subtask> {
        let active = self.active_mut()?;
        active.status = SubtaskStatus::Failed;
        Some(active.clone())
    }

    /// Count a replan against the active subtask and return the new total.
    pub fn note_replan(&mut self) -> u32 {
        match self.active_mut() {
            Some(active) => {
                active.replans += 1;
                active.replans
            }
            None => 0,
        }
    }

    pub fn push_generation(&mut self, subtask_id: u32, instructions: Vec<Instruction>, resume_at: usize) -> &InstructionGeneration {
        let number = self
            .generations
            .iter()
            .filter(|g| g.subtask_id == subtask_id)
            .count() as u32
            + 1;
        self.generations.push(InstructionGeneration {
            subtask_id,
            number,
            resume_at: resume_at.min(instructions.len()),
            instructions,
            created_at: Utc::now(),
        });
        &self.generations[self.generations.len() - 1]
    }

    /// Latest generation of the given subtask.
    pub fn current_generation(&self, subtask_id: u32) -> Option<&InstructionGeneration> {
        self.generations.iter().rev().find(|g| g.subtask_id == subtask_id)
    }

    /// Apply a review of the not-yet-started subtasks. Only `Pending` entries are touched.
    /// Returns whether the pending list changed.
    pub fn apply_review(&mut self, revised: Vec<String>, policy: ReviewPolicy) -> bool {
        let revised: Vec<String> = revised
            .into_iter()
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty())
            .collect();
        let current: Vec<String> = self.pending().into_iter().map(|s| s.description).collect();
        if revised == current {
            return false;
        }

        match policy {
            ReviewPolicy::Frozen => {
                tracing::debug!("review policy is frozen, pending subtasks unchanged");
                false
            }
            ReviewPolicy::Edit => {
                if revised.len() != current.len() {
                    tracing::warn!(
                        pending = current.len(),
                        revised = revised.len(),
                        "review changed the number of subtasks; edit policy keeps the original list"
                    );
                    return false;
                }
                let mut revised = revised.into_iter();
                for subtask in self.subtasks.iter_mut().filter(|s| s.status == SubtaskStatus::Pending) {
                    if let Some(description) = revised.next() {
                        subtask.description = description;
                    }
                }
                true
            }
            ReviewPolicy::Full => {
                let (pending, kept): (Vec<Subtask>, Vec<Subtask>) = std::mem::take(&mut self.subtasks)
                    .into_iter()
                    .partition(|s| s.status == SubtaskStatus::Pending);
                self.subtasks = kept;
                let mut unclaimed = pending;
                for d in revised {
                    match unclaimed.iter().position(|s| s.description == d) {
                        Some(i) => self.subtasks.push(unclaimed.remove(i)),
                        None => self.push_pending(d),
                    }
                }
                if !unclaimed.is_empty() {
                    tracing::debug!(retired = unclaimed.len(), "review dropped pending subtasks");
                }
                self.retired.extend(unclaimed);
                true
            }
        }
    }
}
