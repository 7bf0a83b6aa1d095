use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::agent_engine::state::{Instruction, OutcomeStatus, Subtask};
use crate::agents::prompts;
use crate::errors::{GuiPilotError, GuiPilotResult};
use crate::executor::coordinator;
use crate::executor::dispatcher::dispatch;
use crate::executor::machine::TargetMachine;
use crate::executor::operations::{ActionStep, UiOperation};
use crate::llm::client::RoleClient;
use crate::llm::response::{extract_response, is_done_marker, preview, split_labelled};
use crate::llm::types::ChatMessage;
use crate::perception::types::ScreenState;

/// What applying one instruction did. The orchestrator pairs it with the screen observed
/// afterwards to form an `ExecutionOutcome`.
#[derive(Debug, Clone)]
pub struct ActionReport {
    pub status: OutcomeStatus,
    pub detail: Option<String>,
    pub operations: Vec<UiOperation>,
}

impl ActionReport {
    pub fn ok(operations: Vec<UiOperation>) -> Self {
        Self {
            status: OutcomeStatus::Ok,
            detail: None,
            operations,
        }
    }

    pub fn failed(detail: impl Into<String>, operations: Vec<UiOperation>) -> Self {
        Self {
            status: OutcomeStatus::Failed,
            detail: Some(detail.into()),
            operations,
        }
    }
}

/// Applies one instruction to the target machine.
///
/// Execution failures come back as a failed [`ActionReport`]; `Err` is reserved for failures
/// that end the session, such as an exhausted reasoning-service budget.
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    async fn apply(&self, subtask: &Subtask, instruction: &Instruction, screen: &ScreenState) -> GuiPilotResult<ActionReport>;
}

/// Parsed reply of the action role.
#[derive(Debug, Clone, PartialEq)]
pub enum ActionPlan {
    Steps(Vec<ActionStep>),
    Impossible(String),
    Nothing,
}

pub fn parse_action_reply(text: &str) -> GuiPilotResult<ActionPlan> {
    let body = extract_response(text)?;
    if let Some((_, reason)) = split_labelled(body, &["error"]) {
        return Ok(ActionPlan::Impossible(reason.to_string()));
    }
    if is_done_marker(body) {
        return Ok(ActionPlan::Nothing);
    }

    let (start, end) = match (body.find('['), body.rfind(']')) {
        (Some(s), Some(e)) if s < e => (s, e),
        _ => {
            return Err(GuiPilotError::MalformedResponse(format!(
                "expected a JSON array of operations, got: {}",
                preview(body)
            )))
        }
    };
    let steps: Vec<ActionStep> = serde_json::from_str(&body[start..=end])
        .map_err(|e| GuiPilotError::MalformedResponse(format!("operation list: {e}")))?;
    if steps.is_empty() {
        return Ok(ActionPlan::Nothing);
    }
    Ok(ActionPlan::Steps(steps))
}

pub struct LlmActionExecutor {
    client: RoleClient,
    machine: Arc<dyn TargetMachine>,
    settle: Duration,
    attach_screenshot: bool,
}

impl LlmActionExecutor {
    pub fn new(client: RoleClient, machine: Arc<dyn TargetMachine>, settle: Duration, attach_screenshot: bool) -> Self {
        Self {
            client,
            machine,
            settle,
            attach_screenshot,
        }
    }

    fn messages(&self, subtask: &Subtask, instruction: &Instruction, screen: &ScreenState) -> Vec<ChatMessage> {
        let text = prompts::action(subtask, instruction, screen);
        let user = match screen.image_data_url() {
            Some(url) if self.attach_screenshot => ChatMessage::user_with_image(text, url),
            _ => ChatMessage::user(text),
        };
        vec![ChatMessage::system(prompts::ACTION_SYSTEM), user]
    }
}

#[async_trait]
impl ActionExecutor for LlmActionExecutor {
    async fn apply(&self, subtask: &Subtask, instruction: &Instruction, screen: &ScreenState) -> GuiPilotResult<ActionReport> {
        let plan = self
            .client
            .ask(self.messages(subtask, instruction, screen), parse_action_reply)
            .await?;

        let steps = match plan {
            ActionPlan::Steps(steps) => steps,
            ActionPlan::Impossible(reason) => {
                tracing::info!(instruction = %instruction.text, reason = %reason, "action role declined instruction");
                return Ok(ActionReport::failed(reason, vec![]));
            }
            ActionPlan::Nothing => {
                tracing::info!(instruction = %instruction.text, "nothing to do for instruction");
                return Ok(ActionReport::ok(vec![]));
            }
        };

        let mut ops = Vec::new();
        for step in &steps {
            match coordinator::resolve(step, screen) {
                Ok(resolved) => ops.extend(resolved),
                Err(reason) => return Ok(ActionReport::failed(reason, vec![])),
            }
        }

        let result = dispatch(self.machine.as_ref(), ops).await;
        if let Some(failure) = result.failure {
            return Ok(ActionReport::failed(failure, result.performed));
        }
        tracing::info!(
            instruction = %instruction.text,
            operations = result.performed.len(),
            "instruction applied"
        );
        tokio::time::sleep(self.settle).await;
        Ok(ActionReport::ok(result.performed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reply_with_operations() {
        let plan = parse_action_reply(
            "The Writer icon is marker 4.\nRESPONSE: [{\"op\": \"double_click\", \"element\": 4}]",
        )
        .unwrap();
        assert_eq!(plan, ActionPlan::Steps(vec![ActionStep::DoubleClick { element: 4 }]));
    }

    #[test]
    fn reply_in_code_fence() {
        let plan = parse_action_reply("RESPONSE: ```json\n[{\"op\": \"press\", \"key\": \"enter\"}]\n```").unwrap();
        assert_eq!(plan, ActionPlan::Steps(vec![ActionStep::Press { key: "enter".into() }]));
    }

    #[test]
    fn declined_and_noop_replies() {
        assert_eq!(
            parse_action_reply("RESPONSE: error: no search bar on screen").unwrap(),
            ActionPlan::Impossible("no search bar on screen".into())
        );
        assert_eq!(parse_action_reply("RESPONSE: done").unwrap(), ActionPlan::Nothing);
        assert_eq!(parse_action_reply("RESPONSE: []").unwrap(), ActionPlan::Nothing);
    }

    #[test]
    fn garbage_is_malformed() {
        assert!(matches!(
            parse_action_reply("RESPONSE: click the thing"),
            Err(GuiPilotError::MalformedResponse(_))
        ));
        assert!(matches!(
            parse_action_reply("RESPONSE: [{\"op\": \"fly\"}]"),
            Err(GuiPilotError::MalformedResponse(_))
        ));
    }
}
