use std::sync::Mutex;

use async_trait::async_trait;
use enigo::{Enigo, Settings};

use crate::errors::{GuiPilotError, GuiPilotResult};
use crate::executor::input;
use crate::executor::machine::TargetMachine;
use crate::executor::operations::UiOperation;
use crate::perception::screenshot::{capture_primary, RawCapture};

/// The local desktop: xcap for capture, enigo for input.
pub struct DesktopMachine {
    enigo: Mutex<Enigo>,
}

impl DesktopMachine {
    pub fn new() -> GuiPilotResult<Self> {
        let enigo = Enigo::new(&Settings::default())
            .map_err(|e| GuiPilotError::Machine(format!("input backend: {e:?}")))?;
        Ok(Self {
            enigo: Mutex::new(enigo),
        })
    }
}

#[async_trait]
impl TargetMachine for DesktopMachine {
    fn name(&self) -> &str {
        "desktop"
    }

    async fn capture(&self) -> GuiPilotResult<RawCapture> {
        capture_primary().await
    }

    async fn perform(&self, op: &UiOperation) -> GuiPilotResult<()> {
        let mut enigo = self
            .enigo
            .lock()
            .map_err(|_| GuiPilotError::Machine("input backend lock poisoned".into()))?;
        input::apply(&mut enigo, op)
    }
}
