use async_trait::async_trait;
use futures_util::StreamExt;

use crate::errors::{GuiPilotError, GuiPilotResult};
use crate::llm::provider::LlmProvider;
use crate::llm::sse_parser::{self, LineBuffer};
use crate::llm::types::{CallConfig, ChatMessage, LlmResponse, StreamChunkKind};

pub struct OpenAiCompatibleProvider {
    id: String,
    api_base: String,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAiCompatibleProvider {
    pub fn new(id: String, api_base: String, api_key: String) -> Self {
        Self {
            id,
            api_base,
            api_key,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl LlmProvider for OpenAiCompatibleProvider {
    fn name(&self) -> &str {
        &self.id
    }

    async fn chat(&self, messages: Vec<ChatMessage>, cfg: &CallConfig) -> GuiPilotResult<LlmResponse> {
        let body = serde_json::json!({
            "model": cfg.model,
            "messages": &messages,
            "stream": cfg.stream,
            "temperature": cfg.temperature,
        });

        tracing::debug!(
            provider = %self.id,
            model = %cfg.model,
            stream = cfg.stream,
            "sending LLM request"
        );
        tracing::trace!(body = %sanitize_for_log(&body), "request body (base64 omitted)");

        let mut request = self.client.post(&self.api_base).json(&body);
        if !self.api_key.is_empty() {
            request = request.bearer_auth(&self.api_key);
        }
        let response = request.send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let err_body = response.text().await.unwrap_or_default();
            return Err(GuiPilotError::LlmProvider(format!("{}: {}", status, err_body)));
        }

        if cfg.stream {
            self.handle_stream(response).await
        } else {
            self.handle_json(response).await
        }
    }
}

impl OpenAiCompatibleProvider {
    /// Accumulate an SSE stream into a single response.
    async fn handle_stream(&self, response: reqwest::Response) -> GuiPilotResult<LlmResponse> {
        let mut byte_stream = response.bytes_stream();
        let mut lines = LineBuffer::default();
        let mut resp = LlmResponse::default();

        'stream: while let Some(result) = byte_stream.next().await {
            let bytes = result?;
            for line in lines.push(&bytes) {
                if accumulate(&mut resp, &line) {
                    break 'stream;
                }
            }
        }
        if let Some(line) = lines.finish() {
            accumulate(&mut resp, &line);
        }

        tracing::info!(
            provider = %self.id,
            content_len = resp.content.len(),
            reasoning_len = resp.reasoning.len(),
            "LLM stream complete"
        );
        Ok(resp)
    }

    /// Handle a non-streaming JSON response.
    async fn handle_json(&self, response: reqwest::Response) -> GuiPilotResult<LlmResponse> {
        let json: serde_json::Value = response.json().await?;
        let content = json["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| {
                GuiPilotError::MalformedResponse("completion carries no message content".into())
            })?
            .to_string();
        let reasoning = json["choices"][0]["message"]["reasoning_content"]
            .as_str()
            .unwrap_or("")
            .to_string();

        tracing::info!(
            provider = %self.id,
            content_len = content.len(),
            "LLM JSON response received"
        );
        Ok(LlmResponse { content, reasoning })
    }
}

/// Fold one SSE line into `resp`. Returns true once the stream signalled completion.
fn accumulate(resp: &mut LlmResponse, line: &str) -> bool {
    match sse_parser::parse_sse_line(line) {
        Ok(Some(chunk)) => match chunk.kind {
            StreamChunkKind::Reasoning => resp.reasoning.push_str(&chunk.content),
            StreamChunkKind::Content => resp.content.push_str(&chunk.content),
            StreamChunkKind::Done => return true,
        },
        Ok(None) => {}
        Err(e) => tracing::debug!("SSE parse skipped: {e}"),
    }
    false
}

/// Clone the body replacing inline image payloads, so logs stay readable.
fn sanitize_for_log(body: &serde_json::Value) -> String {
    let mut log_body = body.clone();
    if let Some(msgs) = log_body.get_mut("messages").and_then(|m| m.as_array_mut()) {
        for msg in msgs {
            let Some(parts) = msg.get_mut("content").and_then(|c| c.as_array_mut()) else {
                continue;
            };
            for part in parts {
                if part.get("type").and_then(|t| t.as_str()) != Some("image_url") {
                    continue;
                }
                if let Some(url) = part.get_mut("image_url").and_then(|i| i.get_mut("url")) {
                    *url = serde_json::Value::String("<omitted_base64_image>".to_string());
                }
            }
        }
    }
    serde_json::to_string(&log_body).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_payloads_are_elided_from_logs() {
        let messages = vec![
            ChatMessage::system("be precise"),
            ChatMessage::user_with_image("what is on screen?", "data:image/png;base64,AAAA".into()),
        ];
        let body = serde_json::json!({ "model": "m", "messages": messages });
        let logged = sanitize_for_log(&body);
        assert!(logged.contains("<omitted_base64_image>"));
        assert!(!logged.contains("AAAA"));
        assert!(logged.contains("what is on screen?"));
    }

    #[test]
    fn chunked_stream_keeps_accents() {
        let stream = concat!(
            "data: {\"choices\":[{\"delta\":{\"reasoning_content\":\"mirando\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"RESPONSE: Pulsa \"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"éxito\"}}]}\n\n",
            "data: [DONE]\n\n",
        )
        .as_bytes();
        let mut lines = LineBuffer::default();
        let mut resp = LlmResponse::default();
        let mut done = false;
        // One byte per chunk splits every multi-byte character.
        for chunk in stream.chunks(1) {
            for line in lines.push(chunk) {
                done |= accumulate(&mut resp, &line);
            }
        }
        assert!(done);
        assert_eq!(resp.content, "RESPONSE: Pulsa éxito");
        assert_eq!(resp.reasoning, "mirando");
    }
}
