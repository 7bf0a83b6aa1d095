use async_trait::async_trait;

use crate::agent_engine::state::{Diagnosis, Instruction, Subtask};
use crate::agents::prompts;
use crate::errors::GuiPilotResult;
use crate::llm::client::RoleClient;
use crate::llm::response::extract_response;
use crate::llm::types::ChatMessage;
use crate::memory::ErrorRecord;
use crate::perception::types::ScreenState;

/// What error handling may look at. It never sees the plan and never writes memory.
pub struct ErrorContext<'a> {
    pub subtask: &'a Subtask,
    pub instruction: &'a Instruction,
    pub screen: &'a ScreenState,
    pub past_errors: &'a [ErrorRecord],
}

/// Last resort for diagnoses reflection could not settle. Stateless.
#[async_trait]
pub trait ErrorHandler: Send + Sync {
    /// A resolution strategy, or `None` when the failure cannot be resolved.
    async fn resolve(&self, diagnosis: &Diagnosis, context: &ErrorContext<'_>) -> GuiPilotResult<Option<String>>;
}

fn parse_resolution(text: &str) -> GuiPilotResult<Option<String>> {
    let body = extract_response(text)?;
    if body.to_ascii_uppercase().starts_with("UNRESOLVABLE") {
        return Ok(None);
    }
    Ok(Some(body.to_string()))
}

pub struct LlmErrorHandler {
    client: RoleClient,
    attach_screenshot: bool,
}

impl LlmErrorHandler {
    pub fn new(client: RoleClient, attach_screenshot: bool) -> Self {
        Self {
            client,
            attach_screenshot,
        }
    }
}

#[async_trait]
impl ErrorHandler for LlmErrorHandler {
    async fn resolve(&self, diagnosis: &Diagnosis, context: &ErrorContext<'_>) -> GuiPilotResult<Option<String>> {
        let mut text = prompts::resolve(diagnosis, context.subtask, context.instruction, context.screen);
        if !context.past_errors.is_empty() {
            text.push_str("\n\nPrevious errors in this session:\n");
            text.push_str(&crate::memory::render_errors(context.past_errors));
        }
        let user = match context.screen.image_data_url() {
            Some(url) if self.attach_screenshot => ChatMessage::user_with_image(text, url),
            _ => ChatMessage::user(text),
        };
        let messages = vec![ChatMessage::system(prompts::ERROR_HANDLING_SYSTEM), user];

        let resolution = self.client.ask(messages, parse_resolution).await?;
        match &resolution {
            Some(r) => tracing::info!(subtask = context.subtask.id, resolution = %r, "error handling resolved"),
            None => tracing::warn!(subtask = context.subtask.id, "error handling could not resolve"),
        }
        Ok(resolution)
    }
}
