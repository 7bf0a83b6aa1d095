use async_trait::async_trait;

use crate::errors::GuiPilotResult;
use crate::executor::operations::UiOperation;
use crate::perception::screenshot::RawCapture;

/// The environment under automation. Only the action executor drives `perform`.
#[async_trait]
pub trait TargetMachine: Send + Sync {
    fn name(&self) -> &str;

    async fn capture(&self) -> GuiPilotResult<RawCapture>;

    async fn perform(&self, op: &UiOperation) -> GuiPilotResult<()>;
}
