use thiserror::Error;

#[derive(Debug, Error)]
pub enum GuiPilotError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("LLM provider error: {0}")]
    LlmProvider(String),

    #[error("SSE parsing error: {0}")]
    SseParsing(String),

    /// The reasoning service answered, but not in the shape the role expects.
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("Perception error: {0}")]
    Perception(String),

    #[error("Executor error: {0}")]
    Executor(String),

    #[error("Target machine error: {0}")]
    Machine(String),

    #[error("Call timed out after {0}s")]
    Timeout(u64),

    #[error("{what} failed after {attempts} attempts: {last_error}")]
    Exhausted {
        what: String,
        attempts: u32,
        last_error: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("TOML deserialize error: {0}")]
    TomlDe(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    #[error("Agent error: {0}")]
    Agent(String),

    #[error("Task cancelled")]
    Cancelled,
}

impl GuiPilotError {
    /// Transient-infrastructure and malformed-response failures may be retried at the call site.
    /// Everything else is either fatal or handled by replanning.
    pub fn is_retryable(&self) -> bool {
        match self {
            GuiPilotError::LlmProvider(_)
            | GuiPilotError::SseParsing(_)
            | GuiPilotError::MalformedResponse(_)
            | GuiPilotError::Perception(_)
            | GuiPilotError::Timeout(_)
            | GuiPilotError::Http(_)
            | GuiPilotError::Json(_) => true,
            GuiPilotError::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::Interrupted
            ),
            _ => false,
        }
    }
}

impl serde::Serialize for GuiPilotError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::ser::Serializer,
    {
        serializer.serialize_str(self.to_string().as_str())
    }
}

pub type GuiPilotResult<T> = Result<T, GuiPilotError>;
