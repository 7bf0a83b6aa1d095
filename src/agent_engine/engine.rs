use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use crate::agent_engine::event_bus::{EventBus, SessionEvent};
use crate::agent_engine::history::{HistoryEntry, SessionHistory};
use crate::agent_engine::loop_control::{retry_call, LoopController, RetryPolicy, StopReason};
use crate::agent_engine::plan::Plan;
use crate::agent_engine::state::{
    ExecutionOutcome, InstructionGeneration, IterationRecord, OutcomeStatus, SessionReport, SessionStatus, Subtask, SubtaskStatus,
    Task, Verdict,
};
use crate::agents::error_handling::{ErrorHandler, LlmErrorHandler};
use crate::agents::planning::{LlmPlanner, Planner, ReplanRequest};
use crate::agents::reflection::{DiagnosisRequest, LlmReflector, Reflection, Reflector};
use crate::config::{AppConfig, MachineConfig, MachineKind, SessionConfig};
use crate::errors::{GuiPilotError, GuiPilotResult};
use crate::executor::action::{ActionExecutor, LlmActionExecutor};
use crate::executor::machine::TargetMachine;
use crate::executor::remote::RemoteMachine;
use crate::llm::client::RoleClient;
use crate::llm::registry::{AgentRole, ProviderRegistry};
use crate::memory::{ErrorRecord, MemoryStore};
use crate::perception::omniparser::OmniParserClient;
use crate::perception::traits::Perceiver;
use crate::perception::types::ScreenState;

/// The role implementations a session runs with.
pub struct Agents {
    pub planner: Arc<dyn Planner>,
    pub executor: Arc<dyn ActionExecutor>,
    pub reflector: Arc<dyn Reflector>,
    pub error_handler: Arc<dyn ErrorHandler>,
    pub perceiver: Arc<dyn Perceiver>,
}

/// How the loop ended when no error cut it short.
enum Finish {
    Completed,
    Stopped(StopReason),
    SubtaskFailed(u32),
}

/// Where a failed subtask attempt went wrong.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FailurePoint {
    /// The executor reported this instruction as failed; the ones before it took effect.
    Instruction(usize),
    /// Every instruction reported ok, verification found the goal unmet.
    GoalUnmet,
}

impl FailurePoint {
    /// Instruction the error is recorded against.
    fn instruction_index(self, executed: usize) -> usize {
        match self {
            FailurePoint::Instruction(i) => i,
            FailurePoint::GoalUnmet => executed.saturating_sub(1),
        }
    }

    /// Number of instructions known to have taken effect.
    fn resume_index(self, executed: usize) -> usize {
        match self {
            FailurePoint::Instruction(i) => i,
            FailurePoint::GoalUnmet => executed,
        }
    }
}

/// Mutable state of one session, owned by the loop.
#[derive(Default)]
struct SessionRun {
    plan: Plan,
    memory: MemoryStore,
    iterations: Vec<IterationRecord>,
}

/// Sequential control loop: perceive, plan, act, reflect, then replan or advance.
pub struct Orchestrator {
    planner: Arc<dyn Planner>,
    executor: Arc<dyn ActionExecutor>,
    reflection: Reflection,
    perceiver: Arc<dyn Perceiver>,
    machine: Arc<dyn TargetMachine>,
    session: SessionConfig,
    retry: RetryPolicy,
    events: EventBus,
    record_history: bool,
}

impl Orchestrator {
    pub fn new(agents: Agents, machine: Arc<dyn TargetMachine>, session: SessionConfig) -> Self {
        let reflection = Reflection::new(agents.reflector, agents.error_handler, session.minor_repeat_limit);
        Self {
            planner: agents.planner,
            executor: agents.executor,
            reflection,
            perceiver: agents.perceiver,
            machine,
            retry: RetryPolicy::from_session(&session),
            session,
            events: EventBus::new(),
            record_history: true,
        }
    }

    /// Wire every role to the reasoning service and the configured perception and machine
    /// backends.
    pub fn from_config(cfg: &AppConfig) -> GuiPilotResult<Self> {
        let registry = ProviderRegistry::from_config(cfg);
        let retry = RetryPolicy::from_session(&cfg.session);
        let client = |role| RoleClient::from_registry(&registry, role, retry.clone());
        let attach = cfg.session.attach_screenshot;

        let machine = build_machine(&cfg.machine, retry.call_timeout)?;
        let agents = Agents {
            planner: Arc::new(LlmPlanner::new(client(AgentRole::Planning)?, attach)),
            executor: Arc::new(LlmActionExecutor::new(
                client(AgentRole::Action)?,
                machine.clone(),
                Duration::from_millis(cfg.machine.settle_ms),
                attach,
            )),
            reflector: Arc::new(LlmReflector::new(client(AgentRole::Reflection)?, attach)),
            error_handler: Arc::new(LlmErrorHandler::new(client(AgentRole::ErrorHandling)?, attach)),
            perceiver: Arc::new(OmniParserClient::new(&cfg.perception)?),
        };
        tracing::info!(
            machine = machine.name(),
            providers = ?registry.list_names(),
            "orchestrator ready"
        );
        Ok(Self::new(agents, machine, cfg.session.clone()))
    }

    /// Do not write a session history file.
    pub fn without_history(mut self) -> Self {
        self.record_history = false;
        self
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub async fn run_session(&mut self, task: Task) -> SessionReport {
        let session_id = uuid::Uuid::new_v4().to_string();
        let started_at = Utc::now();
        let history = self.open_history(&session_id);
        tracing::info!(session = %session_id, task = %task.description, "session started");
        self.events.publish(SessionEvent::SessionStarted {
            session_id: session_id.clone(),
            task: task.description.clone(),
        });

        let mut run = SessionRun::default();
        let outcome = self.drive(&task, &mut run, &history).await;
        let (status, reason) = match outcome {
            Ok(Finish::Completed) => match run.plan.failed_count() {
                0 => (SessionStatus::Completed, None),
                n => (SessionStatus::Failed, Some(format!("{n} subtask(s) failed"))),
            },
            Ok(Finish::Stopped(stop)) => (SessionStatus::Exhausted, Some(stop.to_string())),
            Ok(Finish::SubtaskFailed(id)) => (SessionStatus::Failed, Some(format!("subtask {id} failed"))),
            Err(e @ (GuiPilotError::Exhausted { .. } | GuiPilotError::Timeout(_))) => {
                (SessionStatus::Exhausted, Some(e.to_string()))
            }
            Err(e) => (SessionStatus::Failed, Some(e.to_string())),
        };

        match (&status, &reason) {
            (SessionStatus::Completed, _) => tracing::info!(session = %session_id, "session completed"),
            (_, reason) => tracing::error!(session = %session_id, status = %status, reason = ?reason, "session ended"),
        }

        let report = SessionReport {
            session_id,
            task,
            status,
            reason: reason.clone(),
            iterations: run.iterations,
            subtasks: run.plan.subtasks().to_vec(),
            retired_subtasks: run.plan.retired().to_vec(),
            generations: run.plan.generations().to_vec(),
            errors: run.memory.snapshot(),
            started_at,
            finished_at: Utc::now(),
        };
        if let Err(e) = history.push(&HistoryEntry::Report(report.clone())) {
            tracing::warn!(error = %e, "failed to write session report to history");
        }
        self.events.publish(SessionEvent::SessionFinished { status, reason });
        report
    }

    fn open_history(&self, session_id: &str) -> SessionHistory {
        if !self.record_history {
            return SessionHistory::disabled(session_id);
        }
        SessionHistory::new(session_id, self.session.history_dir.as_deref()).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "session history unavailable, continuing without");
            SessionHistory::disabled(session_id)
        })
    }

    /// Capture and perceive the target machine's screen under the retry budget.
    async fn observe(&self) -> GuiPilotResult<Arc<ScreenState>> {
        let machine = &self.machine;
        let perceiver = &self.perceiver;
        let screen = retry_call("perception", &self.retry, |attempt| async move {
            tracing::debug!(attempt, "observing screen");
            let capture = machine
                .capture()
                .await
                .map_err(|e| GuiPilotError::Perception(format!("capture failed: {e}")))?;
            perceiver.observe(&capture).await
        })
        .await?;
        Ok(Arc::new(screen))
    }

    async fn drive(&mut self, task: &Task, run: &mut SessionRun, history: &SessionHistory) -> GuiPilotResult<Finish> {
        let mut loop_ctrl = LoopController::new(&self.session);
        let mut screen = self.observe().await?;

        run.plan = Plan::new(self.planner.decompose(task, &screen).await?)?;
        let planned: Vec<String> = run.plan.subtasks().iter().map(|s| s.description.clone()).collect();
        tracing::info!(subtasks = ?planned, "plan created");
        self.events.publish(SessionEvent::SubtasksPlanned { subtasks: planned });

        if !self.start_next_subtask(task, run, &screen).await? {
            return Ok(Finish::Completed);
        }

        loop {
            if self.events.stop_requested() {
                return Err(GuiPilotError::Cancelled);
            }
            let iteration = match loop_ctrl.begin_iteration() {
                Ok(n) => n,
                Err(stop) => {
                    tracing::warn!(reason = %stop, "session budget exhausted");
                    return Ok(Finish::Stopped(stop));
                }
            };

            let subtask = run
                .plan
                .active()
                .cloned()
                .ok_or_else(|| GuiPilotError::Agent("no active subtask".into()))?;
            let generation = run
                .plan
                .current_generation(subtask.id)
                .cloned()
                .ok_or_else(|| GuiPilotError::Agent(format!("subtask {} has no instructions", subtask.id)))?;
            tracing::info!(
                iteration,
                subtask = subtask.id,
                generation = generation.number,
                resume_at = generation.resume_at,
                "iteration started"
            );

            let outcomes = self.execute(&subtask, &generation, &mut screen).await?;
            let failed = outcomes.iter().find(|o| !o.is_ok());

            let verdict = match failed {
                Some(outcome) => Verdict::Failure {
                    observation: outcome
                        .detail
                        .clone()
                        .unwrap_or_else(|| "instruction failed".to_string()),
                },
                None => self.reflection.verify(&subtask, &generation.instructions, &screen).await?,
            };
            self.events.publish(SessionEvent::Verified {
                subtask_id: subtask.id,
                success: verdict.is_success(),
            });

            let mut record = IterationRecord {
                iteration,
                subtask_id: subtask.id,
                subtask: subtask.description.clone(),
                generation: generation.number,
                outcomes: outcomes.iter().map(ExecutionOutcome::summary).collect(),
                verdict: verdict.clone(),
                error_seq: None,
                finished_at: Utc::now(),
            };

            if let Verdict::Failure { observation } = &verdict {
                let failure = match failed {
                    Some(outcome) => FailurePoint::Instruction(outcome.index),
                    None => FailurePoint::GoalUnmet,
                };
                let recovered = self
                    .recover(task, run, &subtask, &generation, failure, observation, &screen, &mut record)
                    .await?;
                self.finish_iteration(run, record, history);
                if !recovered {
                    if !self.session.continue_on_subtask_failure {
                        return Ok(Finish::SubtaskFailed(subtask.id));
                    }
                    if !self.start_next_subtask(task, run, &screen).await? {
                        return Ok(Finish::Completed);
                    }
                }
                continue;
            }

            self.finish_iteration(run, record, history);
            let completed = run
                .plan
                .complete_active()
                .ok_or_else(|| GuiPilotError::Agent("no active subtask to complete".into()))?;
            tracing::info!(subtask = completed.id, "subtask completed");
            self.events.publish(SessionEvent::SubtaskFinished {
                subtask_id: completed.id,
                status: SubtaskStatus::Completed,
            });

            let remaining = run.plan.pending();
            let revised = self
                .planner
                .review_and_advance(task, &completed, &remaining, &screen, run.memory.query(&completed))
                .await?;
            if run.plan.apply_review(revised, self.session.review_policy) {
                tracing::info!(
                    pending = ?run.plan.pending().iter().map(|s| s.description.as_str()).collect::<Vec<_>>(),
                    "remaining subtasks revised"
                );
            }

            if !self.start_next_subtask(task, run, &screen).await? {
                return Ok(Finish::Completed);
            }
        }
    }

    /// Apply the generation's instructions from `resume_at`, perceiving after each one and
    /// stopping at the first failure.
    async fn execute(
        &self,
        subtask: &Subtask,
        generation: &InstructionGeneration,
        screen: &mut Arc<ScreenState>,
    ) -> GuiPilotResult<Vec<ExecutionOutcome>> {
        let mut outcomes = Vec::new();
        for (index, instruction) in generation.instructions.iter().enumerate().skip(generation.resume_at) {
            tracing::info!(subtask = subtask.id, index, instruction = %instruction, "applying instruction");
            let report = self.executor.apply(subtask, instruction, screen).await?;
            *screen = self.observe().await?;

            self.events.publish(SessionEvent::InstructionApplied {
                subtask_id: subtask.id,
                index,
                ok: report.status == OutcomeStatus::Ok,
                detail: report.detail.clone(),
            });
            let outcome = ExecutionOutcome {
                index,
                instruction: instruction.clone(),
                status: report.status,
                detail: report.detail,
                operations: report.operations,
                screen: screen.clone(),
            };
            let ok = outcome.is_ok();
            outcomes.push(outcome);
            if !ok {
                tracing::warn!(subtask = subtask.id, index, "instruction failed, halting subtask");
                break;
            }
        }
        Ok(outcomes)
    }

    /// Diagnose a failed attempt, record it, then replan or give the subtask up.
    /// Returns whether the subtask is still active.
    #[allow(clippy::too_many_arguments)]
    async fn recover(
        &self,
        task: &Task,
        run: &mut SessionRun,
        subtask: &Subtask,
        generation: &InstructionGeneration,
        failure: FailurePoint,
        observation: &str,
        screen: &Arc<ScreenState>,
        record: &mut IterationRecord,
    ) -> GuiPilotResult<bool> {
        let executed = generation.instructions.len();
        let failed_at = failure.instruction_index(executed);
        let diagnosis = {
            let request = DiagnosisRequest {
                subtask,
                instructions: &generation.instructions,
                failed_at,
                goal_unmet: failure == FailurePoint::GoalUnmet,
                failure: observation,
                screen,
                past_errors: run.memory.query(subtask),
            };
            self.reflection.diagnose(&request, &run.memory).await?
        };

        let instruction = generation
            .instructions
            .get(failed_at)
            .ok_or_else(|| GuiPilotError::Agent(format!("no instruction at index {failed_at}")))?;
        let seq = run
            .memory
            .append(ErrorRecord::from_diagnosis(subtask, failed_at, instruction, &diagnosis))
            .seq;
        record.error_seq = Some(seq);
        self.events.publish(SessionEvent::ErrorRecorded {
            seq,
            subtask_id: subtask.id,
            cause: diagnosis.cause.clone(),
        });

        let resolution = match diagnosis.resolution() {
            Some(r) if subtask.replans < self.session.max_replans_per_subtask => r,
            Some(_) => {
                tracing::warn!(
                    subtask = subtask.id,
                    replans = subtask.replans,
                    "replan limit reached, giving up on subtask"
                );
                self.fail_active(run);
                return Ok(false);
            }
            None => {
                tracing::warn!(subtask = subtask.id, cause = %diagnosis.cause, "failure could not be resolved");
                self.fail_active(run);
                return Ok(false);
            }
        };

        // Instructions before `keep` took effect and stay as they are.
        let effective = failure.resume_index(executed);
        let keep = diagnosis.redo_from.map_or(effective, |r| r.min(effective));
        let corrected = {
            let request = ReplanRequest {
                subtask,
                prior_instructions: &generation.instructions,
                failed_at: keep,
                diagnosis: &diagnosis,
                resolution: &resolution,
                past_errors: run.memory.query(subtask),
                screen,
            };
            self.planner.replan(task, &request).await?
        };

        let mut instructions = generation.instructions[..keep].to_vec();
        instructions.extend(corrected);
        if instructions.len() == keep {
            return Err(GuiPilotError::Agent(format!("replan of subtask {} produced no instructions", subtask.id)));
        }
        run.plan.note_replan();
        let next = run.plan.push_generation(subtask.id, instructions, keep);
        self.events.publish(SessionEvent::InstructionsIssued {
            subtask_id: subtask.id,
            generation: next.number,
            count: next.instructions.len(),
            resume_at: next.resume_at,
        });
        tracing::info!(
            subtask = subtask.id,
            generation = next.number,
            kept = keep,
            "subtask replanned"
        );
        Ok(true)
    }

    fn fail_active(&self, run: &mut SessionRun) {
        if let Some(failed) = run.plan.fail_active() {
            self.events.publish(SessionEvent::SubtaskFinished {
                subtask_id: failed.id,
                status: SubtaskStatus::Failed,
            });
        }
    }

    fn finish_iteration(&self, run: &mut SessionRun, mut record: IterationRecord, history: &SessionHistory) {
        record.finished_at = Utc::now();
        if let Err(e) = history.push(&HistoryEntry::Iteration(record.clone())) {
            tracing::warn!(error = %e, "failed to append iteration to history");
        }
        run.iterations.push(record);
    }

    /// Activate the next pending subtask and plan its instructions. `false` when none is left.
    async fn start_next_subtask(&self, task: &Task, run: &mut SessionRun, screen: &ScreenState) -> GuiPilotResult<bool> {
        let Some(subtask) = run.plan.activate_next() else {
            return Ok(false);
        };
        tracing::info!(subtask = subtask.id, description = %subtask.description, "subtask started");
        self.events.publish(SessionEvent::SubtaskStarted {
            subtask_id: subtask.id,
            description: subtask.description.clone(),
        });

        let instructions = self
            .planner
            .instruct(task, &subtask, screen, run.memory.query(&subtask))
            .await?;
        if instructions.is_empty() {
            return Err(GuiPilotError::Agent(format!("no instructions for subtask {}", subtask.id)));
        }
        let generation = run.plan.push_generation(subtask.id, instructions, 0);
        self.events.publish(SessionEvent::InstructionsIssued {
            subtask_id: subtask.id,
            generation: generation.number,
            count: generation.instructions.len(),
            resume_at: 0,
        });
        Ok(true)
    }
}

fn build_machine(cfg: &MachineConfig, timeout: Duration) -> GuiPilotResult<Arc<dyn TargetMachine>> {
    match cfg.kind {
        MachineKind::Remote => Ok(Arc::new(RemoteMachine::new(cfg, timeout)?)),
        #[cfg(feature = "desktop")]
        MachineKind::Desktop => Ok(Arc::new(crate::executor::desktop::DesktopMachine::new()?)),
        #[cfg(not(feature = "desktop"))]
        MachineKind::Desktop => Err(GuiPilotError::Config(
            "machine kind 'desktop' requires building with the 'desktop' feature".into(),
        )),
    }
}
