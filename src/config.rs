use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::errors::{GuiPilotError, GuiPilotResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub llm: LlmConfig,
    #[serde(default)]
    pub perception: PerceptionConfig,
    #[serde(default)]
    pub machine: MachineConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub task: TaskConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LlmConfig {
    pub active_provider: String,
    pub providers: HashMap<String, ProviderEntry>,
    /// Role-to-model mapping. If a role is absent, falls back to active_provider defaults.
    #[serde(default)]
    pub roles: RolesConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderEntry {
    pub display_name: String,
    /// Full chat-completions URL.
    pub api_base: String,
    /// Default model for this provider (used as fallback when no role config exists).
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    /// Optional API key stored in config.toml (falls back to env var GUIPILOT_<ID>_API_KEY).
    #[serde(default)]
    pub api_key: Option<String>,
}

/// Maps agent roles to specific provider+model combinations.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RolesConfig {
    /// Decomposes the task, writes instruction lists, replans.
    pub planning: Option<RoleEntry>,
    /// Turns one instruction into primitive UI operations.
    pub action: Option<RoleEntry>,
    /// Verifies subtask completion and diagnoses failures.
    pub reflection: Option<RoleEntry>,
    /// Resolves diagnoses the reflection role could not.
    pub error_handling: Option<RoleEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleEntry {
    /// Must match a key under [llm.providers.*].
    pub provider: String,
    /// Model name sent to the API.
    pub model: String,
    /// Use SSE streaming.
    #[serde(default)]
    pub stream: bool,
    /// Overrides the provider-level temperature for this role.
    pub temperature: Option<f64>,
}

fn default_temperature() -> f64 {
    0.1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerceptionConfig {
    /// Base URL of the grounding service; `/parse/` is appended.
    pub endpoint: String,
    #[serde(default = "default_perception_timeout")]
    pub timeout_secs: u64,
}

fn default_perception_timeout() -> u64 {
    60
}

impl Default for PerceptionConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:8000".into(),
            timeout_secs: default_perception_timeout(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MachineKind {
    /// VM controller reachable over HTTP (`/screenshot`, `/execute`).
    #[default]
    Remote,
    /// The local desktop; requires the `desktop` feature.
    Desktop,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MachineConfig {
    #[serde(default)]
    pub kind: MachineKind,
    #[serde(default = "default_machine_endpoint")]
    pub endpoint: String,
    /// Pause after each applied instruction before the screen is captured again.
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,
}

fn default_machine_endpoint() -> String {
    "http://127.0.0.1:5000".into()
}

fn default_settle_ms() -> u64 {
    500
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            kind: MachineKind::default(),
            endpoint: default_machine_endpoint(),
            settle_ms: default_settle_ms(),
        }
    }
}

/// How much `review_and_advance` may change the not-yet-started subtasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ReviewPolicy {
    /// Pending subtasks are never touched.
    Frozen,
    /// Pending descriptions may be rewritten; count and order stay fixed.
    Edit,
    /// Pending list may be replaced wholesale (insert, modify, remove, reorder).
    #[default]
    Full,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    /// Attempts per external call (perception, reasoning) before the session is exhausted.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_call_timeout")]
    pub call_timeout_secs: u64,
    /// 0 disables the wall-clock budget.
    #[serde(default)]
    pub max_duration_minutes: u32,
    #[serde(default = "default_max_replans")]
    pub max_replans_per_subtask: u32,
    /// Same instruction failing this many times in a subtask counts as a major error.
    #[serde(default = "default_minor_repeat_limit")]
    pub minor_repeat_limit: usize,
    #[serde(default)]
    pub continue_on_subtask_failure: bool,
    #[serde(default)]
    pub review_policy: ReviewPolicy,
    /// Send the annotated screenshot to the reasoning service alongside the element list.
    #[serde(default = "default_true")]
    pub attach_screenshot: bool,
    /// Directory for JSONL session history; platform data dir when unset.
    #[serde(default)]
    pub history_dir: Option<PathBuf>,
}

fn default_max_iterations() -> u32 {
    15
}

fn default_max_retries() -> u32 {
    3
}

fn default_call_timeout() -> u64 {
    120
}

fn default_max_replans() -> u32 {
    5
}

fn default_minor_repeat_limit() -> usize {
    2
}

fn default_true() -> bool {
    true
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            max_retries: default_max_retries(),
            call_timeout_secs: default_call_timeout(),
            max_duration_minutes: 0,
            max_replans_per_subtask: default_max_replans(),
            minor_repeat_limit: default_minor_repeat_limit(),
            continue_on_subtask_failure: false,
            review_policy: ReviewPolicy::default(),
            attach_screenshot: true,
            history_dir: None,
        }
    }
}

/// Task description and benchmark metadata.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TaskConfig {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub id: Option<String>,
}

impl AppConfig {
    pub fn from_toml_str(content: &str) -> GuiPilotResult<Self> {
        let config: AppConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> GuiPilotResult<()> {
        if !self.llm.providers.contains_key(&self.llm.active_provider) {
            return Err(GuiPilotError::Config(format!(
                "active provider '{}' is not defined under [llm.providers]",
                self.llm.active_provider
            )));
        }
        let roles = [
            ("planning", &self.llm.roles.planning),
            ("action", &self.llm.roles.action),
            ("reflection", &self.llm.roles.reflection),
            ("error_handling", &self.llm.roles.error_handling),
        ];
        for (role, entry) in roles {
            if let Some(entry) = entry {
                if !self.llm.providers.contains_key(&entry.provider) {
                    return Err(GuiPilotError::Config(format!(
                        "role '{role}' references unknown provider '{}'",
                        entry.provider
                    )));
                }
            }
        }
        if self.session.max_iterations == 0 {
            return Err(GuiPilotError::Config("session.max_iterations must be > 0".into()));
        }
        if self.session.max_retries == 0 {
            return Err(GuiPilotError::Config("session.max_retries must be > 0".into()));
        }
        Ok(())
    }
}

fn resolve_config_path() -> GuiPilotResult<PathBuf> {
    if let Ok(exe) = std::env::current_exe() {
        if let Some(parent) = exe.parent() {
            let candidate = parent.join("config.toml");
            if candidate.exists() {
                tracing::debug!(path = %candidate.display(), "config found next to executable");
                return Ok(candidate);
            }
        }
    }

    let cwd = std::env::current_dir()?;
    let candidate = cwd.join("config.toml");
    if candidate.exists() {
        tracing::debug!(path = %candidate.display(), "config found in working directory");
        return Ok(candidate);
    }

    Err(GuiPilotError::Config(
        "config.toml not found next to executable or in working directory".into(),
    ))
}

/// Load the config from `path`, or from the default lookup locations when `None`.
pub fn load_config(path: Option<&Path>) -> GuiPilotResult<AppConfig> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => resolve_config_path()?,
    };
    let content = std::fs::read_to_string(&path)?;
    let config = AppConfig::from_toml_str(&content)?;
    tracing::info!(path = %path.display(), provider = %config.llm.active_provider, "config loaded");
    Ok(config)
}

pub fn save_config(config: &AppConfig, path: &Path) -> GuiPilotResult<()> {
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    tracing::info!(path = %path.display(), "config saved");
    Ok(())
}
