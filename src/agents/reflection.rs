use std::sync::Arc;

use async_trait::async_trait;

use crate::agent_engine::state::{Diagnosis, Instruction, Severity, Subtask, Verdict};
use crate::agents::error_handling::{ErrorContext, ErrorHandler};
use crate::agents::prompts::{self, DiagnosePrompt};
use crate::errors::{GuiPilotError, GuiPilotResult};
use crate::llm::client::RoleClient;
use crate::llm::response::{extract_response, parse_yes_no, preview, split_labelled};
use crate::llm::types::ChatMessage;
use crate::memory::{ErrorRecord, MemoryStore};
use crate::perception::types::ScreenState;

/// Input for diagnosing one failed subtask attempt.
pub struct DiagnosisRequest<'a> {
    pub subtask: &'a Subtask,
    pub instructions: &'a [Instruction],
    /// Index of the failing instruction; the last one when `goal_unmet`.
    pub failed_at: usize,
    /// Every instruction reported done and verification found the goal unmet.
    pub goal_unmet: bool,
    /// Executor failure detail or the verifier's observation.
    pub failure: &'a str,
    pub screen: &'a ScreenState,
    pub past_errors: &'a [ErrorRecord],
}

impl DiagnosisRequest<'_> {
    pub fn failing_instruction(&self) -> Option<&Instruction> {
        self.instructions.get(self.failed_at)
    }
}

#[async_trait]
pub trait Reflector: Send + Sync {
    async fn verify(&self, subtask: &Subtask, instructions: &[Instruction], screen: &ScreenState) -> GuiPilotResult<Verdict>;

    async fn diagnose(&self, request: &DiagnosisRequest<'_>) -> GuiPilotResult<Diagnosis>;
}

/// Verification plus diagnosis with escalation to error handling.
///
/// A diagnosis is escalated when the reflector is not confident, or when the same instruction
/// of the same subtask already failed `minor_repeat_limit` times; the latter is also promoted
/// to major.
pub struct Reflection {
    reflector: Arc<dyn Reflector>,
    error_handler: Arc<dyn ErrorHandler>,
    minor_repeat_limit: usize,
}

impl Reflection {
    pub fn new(reflector: Arc<dyn Reflector>, error_handler: Arc<dyn ErrorHandler>, minor_repeat_limit: usize) -> Self {
        Self {
            reflector,
            error_handler,
            minor_repeat_limit,
        }
    }

    pub async fn verify(&self, subtask: &Subtask, instructions: &[Instruction], screen: &ScreenState) -> GuiPilotResult<Verdict> {
        let verdict = self.reflector.verify(subtask, instructions, screen).await?;
        tracing::info!(subtask = subtask.id, success = verdict.is_success(), "subtask verified");
        Ok(verdict)
    }

    pub async fn diagnose(&self, request: &DiagnosisRequest<'_>, memory: &MemoryStore) -> GuiPilotResult<Diagnosis> {
        let mut diagnosis = self.reflector.diagnose(request).await?;
        let instruction = request
            .failing_instruction()
            .ok_or_else(|| GuiPilotError::Agent(format!("no instruction at index {}", request.failed_at)))?;

        let repeats = memory.repeat_count(request.subtask.id, &instruction.text);
        let repeated = self.minor_repeat_limit > 0 && repeats >= self.minor_repeat_limit;
        if repeated {
            tracing::warn!(
                subtask = request.subtask.id,
                instruction = %instruction.text,
                repeats,
                "same mistake repeated, promoting to major"
            );
            diagnosis.severity = Severity::Major;
        }

        if repeated || !diagnosis.is_confident() {
            diagnosis.escalated = true;
            let context = ErrorContext {
                subtask: request.subtask,
                instruction,
                screen: request.screen,
                past_errors: request.past_errors,
            };
            diagnosis.escalated_resolution = self.error_handler.resolve(&diagnosis, &context).await?;
        }

        tracing::info!(
            subtask = request.subtask.id,
            failed_at = request.failed_at,
            severity = ?diagnosis.severity,
            escalated = diagnosis.was_escalated(),
            resolved = diagnosis.is_resolved(),
            cause = %diagnosis.cause,
            "failure diagnosed"
        );
        Ok(diagnosis)
    }
}

fn parse_verdict(text: &str) -> GuiPilotResult<Verdict> {
    let success = parse_yes_no(text)?;
    let body = extract_response(text)?;
    let rest = body
        .trim_start_matches(|c: char| c.is_alphabetic())
        .trim_start_matches(|c: char| c.is_whitespace() || matches!(c, '-' | ':' | ',' | '.'))
        .trim();
    let note = if rest.is_empty() {
        let reasoning = text.rfind("RESPONSE").map(|i| &text[..i]).unwrap_or(text).trim();
        preview(reasoning)
    } else {
        rest.to_string()
    };
    Ok(if success {
        Verdict::Success { summary: note }
    } else {
        Verdict::Failure { observation: note }
    })
}

fn parse_severity(s: &str) -> Severity {
    match s.trim().to_ascii_lowercase().as_str() {
        "minor" => Severity::Minor,
        "major" => Severity::Major,
        _ => Severity::Unknown,
    }
}

fn none_marker(s: &str) -> bool {
    let s = s.trim().trim_end_matches('.');
    s.is_empty() || s.eq_ignore_ascii_case("none") || s.eq_ignore_ascii_case("n/a")
}

fn parse_diagnosis(text: &str) -> GuiPilotResult<Diagnosis> {
    let body = extract_response(text)?;

    // Short form: `Minor: <fix>` / `Major: <fix>`.
    if let Some((label, fix)) = split_labelled(body, &["minor", "major"]) {
        if !body.contains('\n') {
            let mut d = Diagnosis::new(fix).with_severity(parse_severity(&label));
            if !none_marker(fix) {
                d.fix = Some(fix.to_string());
            }
            return Ok(d);
        }
    }

    let mut severity = Severity::Unknown;
    let mut cause = None;
    let mut fix = None;
    let mut redo_from = None;
    for line in body.lines() {
        let Some((label, value)) = split_labelled(line, &["severity", "cause", "fix", "redo_from"]) else {
            continue;
        };
        match label.as_str() {
            "severity" => severity = parse_severity(value),
            "cause" if !value.is_empty() => cause = Some(value.to_string()),
            "fix" if !none_marker(value) => fix = Some(value.to_string()),
            "redo_from" if !none_marker(value) => {
                redo_from = value
                    .trim_matches(|c: char| !c.is_ascii_digit())
                    .parse::<usize>()
                    .ok()
                    .filter(|n| *n >= 1)
                    .map(|n| n - 1);
            }
            _ => {}
        }
    }

    let cause = cause.ok_or_else(|| GuiPilotError::MalformedResponse(format!("diagnosis without CAUSE: {}", preview(body))))?;
    Ok(Diagnosis {
        cause,
        fix,
        severity,
        redo_from,
        escalated: false,
        escalated_resolution: None,
    })
}

pub struct LlmReflector {
    client: RoleClient,
    attach_screenshot: bool,
}

impl LlmReflector {
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
        vec![ChatMessage::system(prompts::REFLECTION_SYSTEM), user]
    }
}

#[async_trait]
impl Reflector for LlmReflector {
    async fn verify(&self, subtask: &Subtask, instructions: &[Instruction], screen: &ScreenState) -> GuiPilotResult<Verdict> {
        let text = prompts::verify(subtask, instructions, screen);
        self.client.ask(self.messages(text, screen), parse_verdict).await
    }

    async fn diagnose(&self, request: &DiagnosisRequest<'_>) -> GuiPilotResult<Diagnosis> {
        let text = prompts::diagnose(&DiagnosePrompt {
            subtask: request.subtask,
            instructions: request.instructions,
            failed_at: request.failed_at,
            goal_unmet: request.goal_unmet,
            failure: request.failure,
            screen: request.screen,
            past_errors: request.past_errors,
        });
        self.client.ask(self.messages(text, request.screen), parse_diagnosis).await
    }
}
