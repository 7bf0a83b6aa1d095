//! Scripted role implementations for driving the orchestrator without any external service.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;

use guipilot::agent_engine::engine::{Agents, Orchestrator};
use guipilot::agent_engine::state::{Diagnosis, Instruction, Severity, Subtask, Task, Verdict};
use guipilot::agents::error_handling::{ErrorContext, ErrorHandler};
use guipilot::agents::planning::{Planner, ReplanRequest};
use guipilot::agents::reflection::{DiagnosisRequest, Reflector};
use guipilot::config::SessionConfig;
use guipilot::errors::{GuiPilotError, GuiPilotResult};
use guipilot::executor::action::{ActionExecutor, ActionReport};
use guipilot::executor::machine::TargetMachine;
use guipilot::executor::operations::UiOperation;
use guipilot::llm::provider::LlmProvider;
use guipilot::llm::types::{CallConfig, ChatMessage, LlmResponse};
use guipilot::memory::ErrorRecord;
use guipilot::perception::screenshot::RawCapture;
use guipilot::perception::traits::Perceiver;
use guipilot::perception::types::{ScreenState, ScreenshotMeta};

pub fn instructions(texts: &[&str]) -> Vec<Instruction> {
    texts.iter().map(|t| Instruction::new(*t)).collect()
}

pub fn texts(instructions: &[Instruction]) -> Vec<String> {
    instructions.iter().map(|i| i.text.clone()).collect()
}

pub fn session_config() -> SessionConfig {
    SessionConfig {
        call_timeout_secs: 5,
        history_dir: None,
        ..SessionConfig::default()
    }
}

/// Screen capture that always returns a blank 1280x720 frame.
pub struct StillMachine;

#[async_trait]
impl TargetMachine for StillMachine {
    fn name(&self) -> &str {
        "still"
    }

    async fn capture(&self) -> GuiPilotResult<RawCapture> {
        Ok(RawCapture {
            image_bytes: Vec::new(),
            meta: ScreenshotMeta::new(1280, 720),
        })
    }

    async fn perform(&self, _op: &UiOperation) -> GuiPilotResult<()> {
        Ok(())
    }
}

/// Perceiver that fails its first `failures` calls.
#[derive(Default)]
pub struct ScriptedPerceiver {
    pub failures: u32,
    pub calls: AtomicU32,
}

impl ScriptedPerceiver {
    pub fn failing(failures: u32) -> Self {
        Self {
            failures,
            calls: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl Perceiver for ScriptedPerceiver {
    async fn observe(&self, capture: &RawCapture) -> GuiPilotResult<ScreenState> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call <= self.failures {
            return Err(GuiPilotError::Perception("parser returned 503".into()));
        }
        Ok(ScreenState {
            elements: Vec::new(),
            description: String::new(),
            annotated_image_base64: None,
            meta: capture.meta,
            captured_at: Utc::now(),
        })
    }
}

/// Reasoning service that always answers without the `RESPONSE:` marker.
#[derive(Default)]
pub struct RamblingProvider {
    pub calls: AtomicU32,
}

#[async_trait]
impl LlmProvider for RamblingProvider {
    fn name(&self) -> &str {
        "rambling"
    }

    async fn chat(&self, _messages: Vec<ChatMessage>, _cfg: &CallConfig) -> GuiPilotResult<LlmResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(LlmResponse {
            content: "First I would look at the desktop, then decide.".into(),
            ..LlmResponse::default()
        })
    }
}

/// What the planner was shown when asked to replan.
#[derive(Debug, Clone)]
pub struct SeenReplan {
    pub subtask_id: u32,
    pub failed_at: usize,
    pub resolution: String,
    pub past_errors: Vec<ErrorRecord>,
}

/// Planner answering from fixed tables. Without a queued replan it repeats the instructions from
/// the failure point on, or turns the resolution into one instruction when nothing failed.
/// Review keeps the remaining subtasks unchanged.
#[derive(Default)]
pub struct ScriptedPlanner {
    pub subtasks: Vec<String>,
    pub instructions: HashMap<String, Vec<Instruction>>,
    pub replans: Mutex<VecDeque<Vec<Instruction>>>,
    pub seen_replans: Mutex<Vec<SeenReplan>>,
    pub reviews: AtomicU32,
}

impl ScriptedPlanner {
    pub fn new(subtasks: &[&str]) -> Self {
        Self {
            subtasks: subtasks.iter().map(|s| s.to_string()).collect(),
            ..Self::default()
        }
    }

    pub fn with_instructions(mut self, subtask: &str, steps: &[&str]) -> Self {
        self.instructions.insert(subtask.to_string(), instructions(steps));
        self
    }

    pub fn with_replan(self, steps: &[&str]) -> Self {
        self.replans.lock().unwrap().push_back(instructions(steps));
        self
    }

    pub fn seen_replans(&self) -> Vec<SeenReplan> {
        self.seen_replans.lock().unwrap().clone()
    }
}

#[async_trait]
impl Planner for ScriptedPlanner {
    async fn decompose(&self, _task: &Task, _screen: &ScreenState) -> GuiPilotResult<Vec<String>> {
        Ok(self.subtasks.clone())
    }

    async fn instruct(
        &self,
        _task: &Task,
        subtask: &Subtask,
        _screen: &ScreenState,
        _past_errors: &[ErrorRecord],
    ) -> GuiPilotResult<Vec<Instruction>> {
        Ok(self
            .instructions
            .get(&subtask.description)
            .cloned()
            .unwrap_or_else(|| vec![Instruction::new(format!("do {}", subtask.description))]))
    }

    async fn replan(&self, _task: &Task, request: &ReplanRequest<'_>) -> GuiPilotResult<Vec<Instruction>> {
        self.seen_replans.lock().unwrap().push(SeenReplan {
            subtask_id: request.subtask.id,
            failed_at: request.failed_at,
            resolution: request.resolution.to_string(),
            past_errors: request.past_errors.to_vec(),
        });
        let next = self.replans.lock().unwrap().pop_front();
        Ok(next.unwrap_or_else(|| match &request.prior_instructions[request.failed_at..] {
            [] => vec![Instruction::new(request.resolution)],
            rest => rest.to_vec(),
        }))
    }

    async fn review_and_advance(
        &self,
        _task: &Task,
        _completed: &Subtask,
        remaining: &[Subtask],
        _screen: &ScreenState,
        _past_errors: &[ErrorRecord],
    ) -> GuiPilotResult<Vec<String>> {
        self.reviews.fetch_add(1, Ordering::SeqCst);
        Ok(remaining.iter().map(|s| s.description.clone()).collect())
    }
}

/// Executor that fails selected instructions a fixed number of times and records every call.
#[derive(Default)]
pub struct ScriptedExecutor {
    pub failures: Mutex<HashMap<String, u32>>,
    pub applied: Mutex<Vec<String>>,
}

impl ScriptedExecutor {
    /// `instruction` fails its next `times` attempts; `u32::MAX` means always.
    pub fn failing(self, instruction: &str, times: u32) -> Self {
        self.failures.lock().unwrap().insert(instruction.to_string(), times);
        self
    }

    pub fn applied(&self) -> Vec<String> {
        self.applied.lock().unwrap().clone()
    }
}

#[async_trait]
impl ActionExecutor for ScriptedExecutor {
    async fn apply(&self, _subtask: &Subtask, instruction: &Instruction, _screen: &ScreenState) -> GuiPilotResult<ActionReport> {
        self.applied.lock().unwrap().push(instruction.text.clone());
        let mut failures = self.failures.lock().unwrap();
        match failures.get_mut(&instruction.text) {
            Some(left) if *left > 0 => {
                if *left != u32::MAX {
                    *left -= 1;
                }
                Ok(ActionReport::failed(format!("{} not found on screen", instruction.text), Vec::new()))
            }
            _ => Ok(ActionReport::ok(vec![UiOperation::Wait { millis: 0 }])),
        }
    }
}

/// Reflector whose verdicts and diagnoses are queued up front. Defaults: success, and a
/// confident minor diagnosis proposing a retry.
#[derive(Default)]
pub struct ScriptedReflector {
    pub verdicts: Mutex<VecDeque<Verdict>>,
    pub diagnoses: Mutex<VecDeque<Diagnosis>>,
    pub verify_calls: AtomicU32,
    pub diagnose_calls: AtomicU32,
}

impl ScriptedReflector {
    pub fn with_verdict(self, verdict: Verdict) -> Self {
        self.verdicts.lock().unwrap().push_back(verdict);
        self
    }

    pub fn with_diagnosis(self, diagnosis: Diagnosis) -> Self {
        self.diagnoses.lock().unwrap().push_back(diagnosis);
        self
    }
}

#[async_trait]
impl Reflector for ScriptedReflector {
    async fn verify(&self, subtask: &Subtask, _instructions: &[Instruction], _screen: &ScreenState) -> GuiPilotResult<Verdict> {
        self.verify_calls.fetch_add(1, Ordering::SeqCst);
        let next = self.verdicts.lock().unwrap().pop_front();
        Ok(next.unwrap_or_else(|| Verdict::Success {
            summary: format!("{} done", subtask.description),
        }))
    }

    async fn diagnose(&self, request: &DiagnosisRequest<'_>) -> GuiPilotResult<Diagnosis> {
        self.diagnose_calls.fetch_add(1, Ordering::SeqCst);
        let next = self.diagnoses.lock().unwrap().pop_front();
        Ok(next.unwrap_or_else(|| {
            Diagnosis::new(request.failure)
                .with_fix("retry the step")
                .with_severity(Severity::Minor)
        }))
    }
}

/// Error handler with a fixed answer.
#[derive(Default)]
pub struct ScriptedErrorHandler {
    pub answer: Option<String>,
    pub calls: AtomicU32,
}

impl ScriptedErrorHandler {
    pub fn answering(answer: &str) -> Self {
        Self {
            answer: Some(answer.to_string()),
            calls: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl ErrorHandler for ScriptedErrorHandler {
    async fn resolve(&self, _diagnosis: &Diagnosis, _context: &ErrorContext<'_>) -> GuiPilotResult<Option<String>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.answer.clone())
    }
}

/// The fakes of one session, kept so tests can inspect them afterwards.
pub struct Harness {
    pub planner: Arc<ScriptedPlanner>,
    pub planner_override: Option<Arc<dyn Planner>>,
    pub executor: Arc<ScriptedExecutor>,
    pub reflector: Arc<ScriptedReflector>,
    pub error_handler: Arc<ScriptedErrorHandler>,
    pub perceiver: Arc<ScriptedPerceiver>,
}

impl Harness {
    pub fn new(planner: ScriptedPlanner) -> Self {
        Self {
            planner: Arc::new(planner),
            planner_override: None,
            executor: Arc::new(ScriptedExecutor::default()),
            reflector: Arc::new(ScriptedReflector::default()),
            error_handler: Arc::new(ScriptedErrorHandler::default()),
            perceiver: Arc::new(ScriptedPerceiver::default()),
        }
    }

    /// Plan with `planner` instead of the scripted one.
    pub fn planned_by(mut self, planner: Arc<dyn Planner>) -> Self {
        self.planner_override = Some(planner);
        self
    }

    pub fn executor(mut self, executor: ScriptedExecutor) -> Self {
        self.executor = Arc::new(executor);
        self
    }

    pub fn reflector(mut self, reflector: ScriptedReflector) -> Self {
        self.reflector = Arc::new(reflector);
        self
    }

    pub fn error_handler(mut self, handler: ScriptedErrorHandler) -> Self {
        self.error_handler = Arc::new(handler);
        self
    }

    pub fn perceiver(mut self, perceiver: ScriptedPerceiver) -> Self {
        self.perceiver = Arc::new(perceiver);
        self
    }

    pub fn orchestrator(&self, session: SessionConfig) -> Orchestrator {
        let agents = Agents {
            planner: self
                .planner_override
                .clone()
                .unwrap_or_else(|| self.planner.clone() as Arc<dyn Planner>),
            executor: self.executor.clone(),
            reflector: self.reflector.clone(),
            error_handler: self.error_handler.clone(),
            perceiver: self.perceiver.clone(),
        };
        Orchestrator::new(agents, Arc::new(StillMachine), session).without_history()
    }
}
