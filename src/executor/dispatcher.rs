use std::time::Duration;

use crate::executor::machine::TargetMachine;
use crate::executor::operations::UiOperation;

/// What happened when a batch of operations was sent to the machine.
#[derive(Debug, Clone, Default)]
pub struct DispatchResult {
    /// Operations that took effect, in order.
    pub performed: Vec<UiOperation>,
    pub failure: Option<String>,
}

/// Perform `ops` in order, stopping at the first one the machine rejects.
/// Waits are served locally and never reach the machine.
pub async fn dispatch(machine: &dyn TargetMachine, ops: Vec<UiOperation>) -> DispatchResult {
    let mut result = DispatchResult::default();
    for op in ops {
        if let UiOperation::Wait { millis } = op {
            tokio::time::sleep(Duration::from_millis(millis)).await;
            result.performed.push(op);
            continue;
        }
        tracing::debug!(machine = machine.name(), op = %op, "performing");
        match machine.perform(&op).await {
            Ok(()) => result.performed.push(op),
            Err(e) => {
                tracing::warn!(machine = machine.name(), op = %op, error = %e, "operation failed");
                result.failure = Some(format!("{op} failed: {e}"));
                break;
            }
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::errors::{GuiPilotError, GuiPilotResult};
    use crate::perception::screenshot::RawCapture;

    /// Rejects every operation after `fail_after` successes.
    struct Flaky {
        fail_after: usize,
        seen: Mutex<Vec<UiOperation>>,
    }

    #[async_trait]
    impl TargetMachine for Flaky {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn capture(&self) -> GuiPilotResult<RawCapture> {
            Err(GuiPilotError::Machine("no screen".into()))
        }

        async fn perform(&self, op: &UiOperation) -> GuiPilotResult<()> {
            let mut seen = self.seen.lock().unwrap();
            if seen.len() >= self.fail_after {
                return Err(GuiPilotError::Machine("rejected".into()));
            }
            seen.push(op.clone());
            Ok(())
        }
    }

    #[tokio::test]
    async fn stops_at_first_failure() {
        let machine = Flaky {
            fail_after: 1,
            seen: Mutex::new(vec![]),
        };
        let ops = vec![
            UiOperation::Click { x: 1, y: 1 },
            UiOperation::Wait { millis: 1 },
            UiOperation::Press { key: "enter".into() },
            UiOperation::Click { x: 2, y: 2 },
        ];
        let result = dispatch(&machine, ops).await;
        assert_eq!(result.performed.len(), 2);
        assert!(result.failure.unwrap().starts_with("press(enter) failed"));
        assert_eq!(machine.seen.lock().unwrap().len(), 1);
    }
}
