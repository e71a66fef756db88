//! Feishu (Lark) channel: event parsing and the outbound `Messenger`.

use std::time::{Duration, Instant};

use orchestrator_core::error::{OrchestratorError, Result};
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::messenger::Messenger;

#[derive(Debug, Clone)]
pub struct FeishuAppCredentials {
    pub app_id: String,
    pub app_secret: String,
    pub enabled: bool,
}

#[derive(Debug, Clone)]
pub struct FeishuRequirement {
    pub user_id: String,
    pub chat_id: String,
    pub message_id: String,
    pub text: String,
}

/// Extracts `{user_id, chat_id, message_id, text}` from a Feishu
/// `im.message.receive_v1` event payload.
pub fn parse_requirement_event(payload: &Value) -> Result<FeishuRequirement> {
    let event = payload.get("event").ok_or_else(|| {
        OrchestratorError::agent_invocation("feishu event payload missing 'event'")
    })?;

    let message = event.get("message").ok_or_else(|| {
        OrchestratorError::agent_invocation("feishu event missing 'event.message'")
    })?;
    let message_id = message
        .get("message_id")
        .and_then(Value::as_str)
        .ok_or_else(|| OrchestratorError::agent_invocation("feishu event missing message_id"))?
        .to_string();
    let chat_id = message
        .get("chat_id")
        .and_then(Value::as_str)
        .ok_or_else(|| OrchestratorError::agent_invocation("feishu event missing chat_id"))?
        .to_string();

    let text = extract_text(message.get("content"))
        .ok_or_else(|| OrchestratorError::agent_invocation("feishu event missing message text"))?;

    let sender = event.get("sender").ok_or_else(|| {
        OrchestratorError::agent_invocation("feishu event missing 'event.sender'")
    })?;
    let user_id = sender
        .get("sender_id")
        .and_then(|id| id.get("open_id"))
        .or_else(|| sender.get("open_id"))
        .and_then(Value::as_str)
        .ok_or_else(|| OrchestratorError::agent_invocation("feishu event missing sender open_id"))?
        .to_string();

    Ok(FeishuRequirement {
        user_id,
        chat_id,
        message_id,
        text,
    })
}

fn extract_text(content: Option<&Value>) -> Option<String> {
    let content = content?;
    let parsed: Value = match content {
        Value::String(raw) => serde_json::from_str(raw).ok()?,
        other => other.clone(),
    };
    parsed.get("text").and_then(Value::as_str).map(str::to_string)
}

const TENANT_TOKEN_URL: &str = "https://open.feishu.cn/open-apis/auth/v3/tenant_access_token/internal";
const SEND_MESSAGE_URL: &str = "https://open.feishu.cn/open-apis/im/v1/messages?receive_id_type=chat_id";

pub struct FeishuMessenger {
    credentials: FeishuAppCredentials,
    client: reqwest::Client,
    cached_token: Mutex<Option<(String, Instant)>>,
}

impl FeishuMessenger {
    pub fn new(credentials: FeishuAppCredentials) -> Self {
        Self {
            credentials,
            client: reqwest::Client::new(),
            cached_token: Mutex::new(None),
        }
    }

    async fn tenant_access_token(&self) -> Result<String> {
        let mut cached = self.cached_token.lock().await;
        if let Some((token, fetched_at)) = cached.as_ref() {
            if fetched_at.elapsed() < Duration::from_secs(60 * 30) {
                return Ok(token.clone());
            }
        }

        let response = self
            .client
            .post(TENANT_TOKEN_URL)
            .json(&serde_json::json!({
                "app_id": self.credentials.app_id,
                "app_secret": self.credentials.app_secret,
            }))
            .send()
            .await
            .map_err(|err| OrchestratorError::agent_invocation(format!("tenant token request failed: {err}")))?
            .json::<Value>()
            .await
            .map_err(|err| OrchestratorError::agent_invocation(format!("tenant token response invalid: {err}")))?;

        let token = response
            .get("tenant_access_token")
            .and_then(Value::as_str)
            .ok_or_else(|| OrchestratorError::agent_invocation("tenant token missing from response"))?
            .to_string();

        *cached = Some((token.clone(), Instant::now()));
        Ok(token)
    }
}

#[derive(Deserialize)]
struct SendResponse {
    code: i64,
    #[serde(default)]
    msg: String,
}

#[async_trait::async_trait]
impl Messenger for FeishuMessenger {
    async fn send_text(&self, chat_id: &str, text: &str) -> Result<()> {
        if !self.credentials.enabled {
            return Ok(());
        }
        let token = self.tenant_access_token().await?;
        let body = serde_json::json!({
            "receive_id": chat_id,
            "msg_type": "text",
            "content": serde_json::to_string(&serde_json::json!({ "text": text })).unwrap(),
        });

        let response: SendResponse = self
            .client
            .post(SEND_MESSAGE_URL)
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .map_err(|err| OrchestratorError::agent_invocation(format!("send message request failed: {err}")))?
            .json()
            .await
            .map_err(|err| OrchestratorError::agent_invocation(format!("send message response invalid: {err}")))?;

        if response.code != 0 {
            return Err(OrchestratorError::agent_invocation(format!(
                "feishu send failed: {} ({})",
                response.msg, response.code
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_requirement_with_string_content() {
        let payload = json!({
            "event": {
                "message": {
                    "message_id": "m1",
                    "chat_id": "c1",
                    "content": "{\"text\":\"同意开始\"}",
                },
                "sender": { "sender_id": { "open_id": "u1" } },
            },
        });
        let requirement = parse_requirement_event(&payload).unwrap();
        assert_eq!(requirement.text, "同意开始");
        assert_eq!(requirement.user_id, "u1");
    }

    #[test]
    fn parses_requirement_with_object_content_and_flat_sender() {
        let payload = json!({
            "event": {
                "message": {
                    "message_id": "m1",
                    "chat_id": "c1",
                    "content": { "text": "cancel that" },
                },
                "sender": { "open_id": "u1" },
            },
        });
        let requirement = parse_requirement_event(&payload).unwrap();
        assert_eq!(requirement.text, "cancel that");
    }

    #[test]
    fn missing_sender_is_rejected() {
        let payload = json!({
            "event": {
                "message": { "message_id": "m1", "chat_id": "c1", "content": "{\"text\":\"hi\"}" },
            },
        });
        assert!(parse_requirement_event(&payload).is_err());
    }
}
