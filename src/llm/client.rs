use std::sync::Arc;

use crate::agent_engine::loop_control::{retry_call, RetryPolicy};
use crate::errors::GuiPilotResult;
use crate::llm::provider::LlmProvider;
use crate::llm::registry::{AgentRole, ProviderRegistry};
use crate::llm::response::preview;
use crate::llm::types::{CallConfig, ChatMessage};

/// One role's handle on the reasoning service: provider, model settings and retry budget.
///
/// A reply that fails to parse is retried with the same request, exactly like a transport
/// failure; both count against the same attempt budget.
#[derive(Clone)]
pub struct RoleClient {
    role: AgentRole,
    provider: Arc<dyn LlmProvider>,
    cfg: CallConfig,
    retry: RetryPolicy,
}

impl RoleClient {
    pub fn new(role: AgentRole, provider: Arc<dyn LlmProvider>, cfg: CallConfig, retry: RetryPolicy) -> Self {
        Self { role, provider, cfg, retry }
    }

    pub fn from_registry(registry: &ProviderRegistry, role: AgentRole, retry: RetryPolicy) -> GuiPilotResult<Self> {
        let (provider, cfg) = registry.call_config_for_role(role)?;
        Ok(Self::new(role, provider, cfg, retry))
    }

    pub fn role(&self) -> AgentRole {
        self.role
    }

    pub async fn ask<T, F>(&self, messages: Vec<ChatMessage>, parse: F) -> GuiPilotResult<T>
    where
        T: Send,
        F: Fn(&str) -> GuiPilotResult<T> + Send + Sync,
    {
        let what = format!("{} reasoning call", self.role);
        let provider = &self.provider;
        let cfg = &self.cfg;
        let messages = &messages;
        let parse = &parse;
        let role = self.role;

        retry_call(&what, &self.retry, |attempt| async move {
            tracing::debug!(role = %role, attempt, "asking reasoning service");
            let response = provider.chat(messages.clone(), cfg).await?;
            tracing::debug!(role = %role, reply = %preview(&response.content), "reasoning reply");
            parse(&response.content)
        })
        .await
    }
}
