//! Target machine reached through a VM controller over HTTP.
//!
//! The controller exposes `GET /screenshot` (encoded image body) and `POST /execute`, which
//! runs a command inside the VM. Operations are rendered as one-line pyautogui programs.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::config::MachineConfig;
use crate::errors::{GuiPilotError, GuiPilotResult};
use crate::executor::machine::TargetMachine;
use crate::executor::operations::UiOperation;
use crate::perception::screenshot::{image_dimensions, RawCapture};
use crate::perception::types::ScreenshotMeta;

pub struct RemoteMachine {
    endpoint: String,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct ExecuteResponse {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    returncode: Option<i32>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

impl RemoteMachine {
    pub fn new(cfg: &MachineConfig, timeout: Duration) -> GuiPilotResult<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            endpoint: cfg.endpoint.trim_end_matches('/').to_string(),
            client,
        })
    }
}

#[async_trait]
impl TargetMachine for RemoteMachine {
    fn name(&self) -> &str {
        "remote"
    }

    async fn capture(&self) -> GuiPilotResult<RawCapture> {
        let url = format!("{}/screenshot", self.endpoint);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| GuiPilotError::Machine(format!("GET {url}: {e}")))?;
        if !response.status().is_success() {
            return Err(GuiPilotError::Machine(format!("GET {url}: {}", response.status())));
        }
        let bytes = response.bytes().await?.to_vec();
        let (width, height) = image_dimensions(&bytes)
            .map_err(|e| GuiPilotError::Machine(format!("GET {url}: unreadable screenshot: {e}")))?;
        tracing::debug!(width, height, bytes = bytes.len(), "remote screenshot");
        Ok(RawCapture {
            image_bytes: bytes,
            meta: ScreenshotMeta::new(width, height),
        })
    }

    async fn perform(&self, op: &UiOperation) -> GuiPilotResult<()> {
        let script = render_pyautogui(op)?;
        let url = format!("{}/execute", self.endpoint);
        let body = serde_json::json!({
            "command": ["python3", "-c", script],
            "shell": false,
        });
        tracing::debug!(url = %url, script = %script, "remote execute");

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| GuiPilotError::Machine(format!("POST {url}: {e}")))?;
        if !response.status().is_success() {
            let status = response.status();
            let err_body = response.text().await.unwrap_or_default();
            return Err(GuiPilotError::Machine(format!("{status}: {err_body}")));
        }

        let result: ExecuteResponse = response.json().await?;
        let failed = result.returncode.is_some_and(|c| c != 0)
            || result.status.as_deref().is_some_and(|s| s != "success");
        if failed {
            let reason = result
                .error
                .filter(|e| !e.trim().is_empty())
                .or(result.message)
                .unwrap_or_else(|| "command failed".into());
            return Err(GuiPilotError::Machine(reason.trim().to_string()));
        }
        Ok(())
    }
}

/// Python string literal for `s`. JSON string escapes are valid Python escapes.
fn py_str(s: &str) -> GuiPilotResult<String> {
    Ok(serde_json::to_string(s)?)
}

fn render_pyautogui(op: &UiOperation) -> GuiPilotResult<String> {
    let line = match op {
        UiOperation::Click { x, y } => format!("pyautogui.click({x}, {y})"),
        UiOperation::DoubleClick { x, y } => format!("pyautogui.doubleClick({x}, {y})"),
        UiOperation::RightClick { x, y } => format!("pyautogui.rightClick({x}, {y})"),
        UiOperation::Drag { from, to } => format!(
            "pyautogui.moveTo({}, {}); pyautogui.dragTo({}, {}, duration=0.5, button='left')",
            from.0, from.1, to.0, to.1
        ),
        UiOperation::TypeText { text } => format!("pyautogui.typewrite({}, interval=0.02)", py_str(text)?),
        UiOperation::Press { key } => format!("pyautogui.press({})", py_str(key)?),
        UiOperation::Hotkey { keys } => {
            let keys = keys.iter().map(|k| py_str(k)).collect::<GuiPilotResult<Vec<_>>>()?;
            format!("pyautogui.hotkey({})", keys.join(", "))
        }
        UiOperation::Scroll { amount, at: Some((x, y)) } => format!("pyautogui.scroll({amount}, x={x}, y={y})"),
        UiOperation::Scroll { amount, at: None } => format!("pyautogui.scroll({amount})"),
        UiOperation::Wait { millis } => format!("import time; time.sleep({})", *millis as f64 / 1000.0),
    };
    Ok(format!("import pyautogui; pyautogui.FAILSAFE = False; {line}"))
}
