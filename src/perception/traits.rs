use async_trait::async_trait;

use crate::errors::GuiPilotResult;
use crate::perception::screenshot::RawCapture;
use crate::perception::types::ScreenState;

/// Turns a raw capture into a normalized [`ScreenState`]. Implementations hold no per-session
/// state; every failure is retryable by the caller.
#[async_trait]
pub trait Perceiver: Send + Sync {
    async fn observe(&self, capture: &RawCapture) -> GuiPilotResult<ScreenState>;
}
