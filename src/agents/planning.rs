use async_trait::async_trait;

use crate::agent_engine::state::{Diagnosis, Instruction, Subtask, Task};
use crate::agents::prompts::{self, ReplanPrompt};
use crate::errors::{GuiPilotError, GuiPilotResult};
use crate::llm::client::RoleClient;
use crate::llm::response::{extract_response, is_done_marker, parse_list, parse_response_list};
use crate::llm::types::ChatMessage;
use crate::memory::ErrorRecord;
use crate::perception::types::ScreenState;

/// Everything planning needs to correct the instructions of a subtask after a failure.
pub struct ReplanRequest<'a> {
    pub subtask: &'a Subtask,
    pub prior_instructions: &'a [Instruction],
    /// Where the corrected instructions start; everything before it took effect. Equal to
    /// `prior_instructions.len()` when all of them took effect but the goal is unmet.
    pub failed_at: usize,
    pub diagnosis: &'a Diagnosis,
    pub resolution: &'a str,
    pub past_errors: &'a [ErrorRecord],
    pub screen: &'a ScreenState,
}

#[async_trait]
pub trait Planner: Send + Sync {
    /// Ordered subtask descriptions for the task; never empty.
    async fn decompose(&self, task: &Task, screen: &ScreenState) -> GuiPilotResult<Vec<String>>;

    async fn instruct(
        &self,
        task: &Task,
        subtask: &Subtask,
        screen: &ScreenState,
        past_errors: &[ErrorRecord],
    ) -> GuiPilotResult<Vec<Instruction>>;

    /// Instructions that replace everything from the failure point on. The caller keeps the
    /// already-executed prefix.
    async fn replan(&self, task: &Task, request: &ReplanRequest<'_>) -> GuiPilotResult<Vec<Instruction>>;

    /// Revised list of the subtasks still to do. Empty means the task is complete.
    async fn review_and_advance(
        &self,
        task: &Task,
        completed: &Subtask,
        remaining: &[Subtask],
        screen: &ScreenState,
        past_errors: &[ErrorRecord],
    ) -> GuiPilotResult<Vec<String>>;
}

fn parse_instructions(text: &str) -> GuiPilotResult<Vec<Instruction>> {
    Ok(parse_response_list(text)?
        .iter()
        .map(|raw| Instruction::parse(raw))
        .collect())
}

fn parse_review(text: &str) -> GuiPilotResult<Vec<String>> {
    let body = extract_response(text)?;
    if is_done_marker(body) {
        return Ok(Vec::new());
    }
    let items = parse_list(body);
    if items.is_empty() {
        return Err(GuiPilotError::MalformedResponse("review returned neither DONE nor subtasks".into()));
    }
    Ok(items)
}

pub struct LlmPlanner {
    client: RoleClient,
    attach_screenshot: bool,
}

impl LlmPlanner {
    pub fn new(client: RoleClient, attach_screenshot: bool) -> Self {
        Self {
            client,
            attach_screenshot,
        }
    }

    fn messages(&self, text: String, screen: &ScreenState) -> Vec<ChatMessage> {
        let user = match screen.image_data_url() {
            Some(url) if self.attach_screenshot => ChatMessage::user_with_image(text, url),
            _ => ChatMessage::user(text),
        };
        vec![ChatMessage::system(prompts::PLANNING_SYSTEM), user]
    }
}

#[async_trait]
impl Planner for LlmPlanner {
    async fn decompose(&self, task: &Task, screen: &ScreenState) -> GuiPilotResult<Vec<String>> {
        let subtasks = self
            .client
            .ask(self.messages(prompts::decompose(task, screen), screen), parse_response_list)
            .await?;
        tracing::info!(count = subtasks.len(), "task decomposed");
        Ok(subtasks)
    }

    async fn instruct(
        &self,
        task: &Task,
        subtask: &Subtask,
        screen: &ScreenState,
        past_errors: &[ErrorRecord],
    ) -> GuiPilotResult<Vec<Instruction>> {
        let text = prompts::instruct(task, subtask, screen, past_errors);
        let instructions = self.client.ask(self.messages(text, screen), parse_instructions).await?;
        tracing::info!(subtask = subtask.id, count = instructions.len(), "instructions planned");
        Ok(instructions)
    }

    async fn replan(&self, task: &Task, request: &ReplanRequest<'_>) -> GuiPilotResult<Vec<Instruction>> {
        let text = prompts::replan(&ReplanPrompt {
            task,
            subtask: request.subtask,
            prior_instructions: request.prior_instructions,
            failed_at: request.failed_at,
            diagnosis: request.diagnosis,
            resolution: request.resolution,
            past_errors: request.past_errors,
            screen: request.screen,
        });
        let instructions = self
            .client
            .ask(self.messages(text, request.screen), parse_instructions)
            .await?;
        tracing::info!(
            subtask = request.subtask.id,
            failed_at = request.failed_at,
            count = instructions.len(),
            "instructions replanned"
        );
        Ok(instructions)
    }

    async fn review_and_advance(
        &self,
        task: &Task,
        completed: &Subtask,
        remaining: &[Subtask],
        screen: &ScreenState,
        past_errors: &[ErrorRecord],
    ) -> GuiPilotResult<Vec<String>> {
        let text = prompts::review(task, completed, remaining, screen, past_errors);
        self.client.ask(self.messages(text, screen), parse_review).await
    }
}
