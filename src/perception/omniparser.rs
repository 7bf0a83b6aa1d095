use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::config::PerceptionConfig;
use crate::errors::{GuiPilotError, GuiPilotResult};
use crate::perception::pipeline::{normalize, RawElement};
use crate::perception::screenshot::RawCapture;
use crate::perception::traits::Perceiver;
use crate::perception::types::{ElementType, ScreenState};

/// Client for an OmniParser-style grounding server.
pub struct OmniParserClient {
    endpoint: String,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct ParseResponse {
    #[serde(default)]
    som_image_base64: Option<String>,
    parsed_content_list: Vec<ParsedItem>,
}

#[derive(Debug, Deserialize)]
struct ParsedItem {
    #[serde(rename = "type", default)]
    kind: String,
    bbox: [f32; 4],
    #[serde(default)]
    interactivity: bool,
    #[serde(default)]
    content: Option<String>,
}

impl OmniParserClient {
    pub fn new(cfg: &PerceptionConfig) -> GuiPilotResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs.max(1)))
            .build()?;
        Ok(Self {
            endpoint: cfg.endpoint.trim_end_matches('/').to_string(),
            client,
        })
    }

    fn parse_url(&self) -> String {
        format!("{}/parse/", self.endpoint)
    }
}

fn into_screen_state(parsed: ParseResponse, capture: &RawCapture) -> ScreenState {
    let raw = parsed
        .parsed_content_list
        .into_iter()
        .map(|item| RawElement {
            kind: ElementType::from_service(&item.kind),
            bbox: item.bbox,
            interactive: item.interactivity,
            content: item.content,
        })
        .collect();
    normalize(raw, capture.meta, parsed.som_image_base64)
}

#[async_trait]
impl Perceiver for OmniParserClient {
    async fn observe(&self, capture: &RawCapture) -> GuiPilotResult<ScreenState> {
        let url = self.parse_url();
        tracing::debug!(url = %url, bytes = capture.image_bytes.len(), "sending screenshot to grounding service");

        let body = serde_json::json!({ "base64_image": capture.to_base64() });
        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| GuiPilotError::Perception(format!("request to {url}: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let err_body = response.text().await.unwrap_or_default();
            return Err(GuiPilotError::Perception(format!("{status}: {err_body}")));
        }

        let parsed: ParseResponse = response
            .json()
            .await
            .map_err(|e| GuiPilotError::Perception(format!("unexpected response shape: {e}")))?;
        let state = into_screen_state(parsed, capture);
        tracing::info!(elements = state.elements.len(), "screen observed");
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::perception::types::ScreenshotMeta;

    #[test]
    fn service_payload_is_normalized() {
        let json = r#"{
            "som_image_base64": "iVBORw0KGgo=",
            "parsed_content_list": [
                {"type": "text", "bbox": [0.0, 0.0, 0.2, 0.05], "interactivity": false, "content": "Untitled - Writer"},
                {"type": "icon", "bbox": [0.4, 0.5, 0.45, 0.55], "interactivity": true, "content": "Insert Image"}
            ]
        }"#;
        let parsed: ParseResponse = serde_json::from_str(json).unwrap();
        let capture = RawCapture {
            image_bytes: vec![],
            meta: ScreenshotMeta::new(1920, 1080),
        };
        let state = into_screen_state(parsed, &capture);
        assert_eq!(state.elements.len(), 2);
        assert_eq!(state.elements[1].index, 2);
        assert_eq!(state.elements[1].kind, ElementType::Icon);
        assert!(state.elements[1].interactive);
        assert_eq!(state.meta.physical_width, 1920);
        assert!(state.image_data_url().unwrap().ends_with("iVBORw0KGgo="));
    }

    #[test]
    fn trailing_slash_is_dropped() {
        let client = OmniParserClient::new(&PerceptionConfig {
            endpoint: "http://parser:8000/".into(),
            timeout_secs: 5,
        })
        .unwrap();
        assert_eq!(client.parse_url(), "http://parser:8000/parse/");
    }
}
