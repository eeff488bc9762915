//! OpenRouter chat-completions adapter.
//!
//! OpenRouter speaks the OpenAI-compatible chat schema, so this adapter
//! maps [`Message`] and [`ToolDefinition`] onto that wire format and back.
//! Tool parameter schemas pass through untouched.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::chat::{ChatProvider, ChatRequest, ChatResponse};
use crate::error::{Error, Result};
use crate::message::{Message, ToolCall};
use crate::tool::ToolDefinition;
use crate::usage::TokenUsage;

const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";

/// [`ChatProvider`] over the OpenRouter HTTP API.
#[derive(Debug, Clone)]
pub struct OpenRouterProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl OpenRouterProvider {
    /// Create a provider with the default endpoint.
    #[must_use]
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_owned(),
        }
    }

    /// Override the endpoint (proxies, test servers).
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn wire_request(request: &ChatRequest) -> WireRequest {
        WireRequest {
            model: request.model.clone(),
            messages: request.messages.iter().map(wire_message).collect(),
            tools: request
                .tools
                .as_ref()
                .map(|tools| tools.iter().map(wire_tool).collect()),
        }
    }
}

#[async_trait]
impl ChatProvider for OpenRouterProvider {
    async fn chat(
        &self,
        cancel: &CancellationToken,
        request: &ChatRequest,
    ) -> Result<ChatResponse> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = Self::wire_request(request);

        let send = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send();
        let response = tokio::select! {
            () = cancel.cancelled() => return Err(Error::Cancelled),
            response = send => response?,
        };

        let status = response.status();
        let payload = tokio::select! {
            () = cancel.cancelled() => return Err(Error::Cancelled),
            payload = response.text() => payload?,
        };
        if !status.is_success() {
            return Err(Error::Api(format!(
                "openrouter returned {status}: {payload}"
            )));
        }

        let wire: WireResponse = serde_json::from_str(&payload)?;
        let choice = wire
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| Error::Api("response carried no choices".to_owned()))?;

        let tool_calls: Option<Vec<ToolCall>> = choice.message.tool_calls.map(|calls| {
            calls
                .into_iter()
                .map(|c| ToolCall::new(c.id, c.function.name, c.function.arguments))
                .collect()
        });
        let message = match tool_calls {
            Some(calls) if !calls.is_empty() => Message::assistant_tool_calls(calls),
            _ => Message::assistant(choice.message.content.unwrap_or_default()),
        };

        let usage = wire
            .usage
            .map(|u| TokenUsage::new(u.prompt_tokens, u.completion_tokens))
            .unwrap_or_default();
        Ok(ChatResponse::new(message, usage))
    }
}

fn wire_message(message: &Message) -> WireMessage {
    WireMessage {
        role: message.role.as_str(),
        content: message.content.clone(),
        tool_calls: message.tool_calls.as_ref().map(|calls| {
            calls
                .iter()
                .map(|c| WireToolCall {
                    id: c.id.clone(),
                    kind: "function".to_owned(),
                    function: WireFunction {
                        name: c.name.clone(),
                        arguments: c.arguments.clone(),
                    },
                })
                .collect()
        }),
        tool_call_id: message.tool_call_id.clone(),
    }
}

fn wire_tool(definition: &ToolDefinition) -> WireTool {
    WireTool {
        kind: "function".to_owned(),
        function: WireToolSchema {
            name: definition.name.clone(),
            description: definition.description.clone(),
            parameters: definition.parameters.clone(),
        },
    }
}

#[derive(Debug, Serialize)]
struct WireRequest {
    model: String,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<WireTool>>,
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<WireToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireToolCall {
    id: String,
    #[serde(rename = "type")]
    kind: String,
    function: WireFunction,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Debug, Serialize)]
struct WireTool {
    #[serde(rename = "type")]
    kind: String,
    function: WireToolSchema,
}

#[derive(Debug, Serialize)]
struct WireToolSchema {
    name: String,
    description: String,
    parameters: Value,
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    #[serde(default)]
    choices: Vec<WireChoice>,
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct WireChoice {
    message: WireIncoming,
}

#[derive(Debug, Deserialize)]
struct WireIncoming {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<WireToolCall>>,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::ToolResult;

    #[test]
    fn request_serialization_shape() {
        let request = ChatRequest::new(
            "anthropic/claude-sonnet-4.5",
            vec![
                Message::system("sys"),
                Message::user("hi"),
                Message::assistant_tool_calls(vec![ToolCall::new(
                    "c1",
                    "read",
                    r#"{"path":"a.rs"}"#,
                )]),
                Message::tool(&ToolResult::ok("c1", "data")),
            ],
        )
        .tools(vec![ToolDefinition::new(
            "read",
            "Read a file.",
            serde_json::json!({"type": "object"}),
        )]);

        let wire = OpenRouterProvider::wire_request(&request);
        let json = serde_json::to_value(&wire).expect("serialize");

        assert_eq!(json["model"], "anthropic/claude-sonnet-4.5");
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][2]["tool_calls"][0]["id"], "c1");
        assert_eq!(
            json["messages"][2]["tool_calls"][0]["function"]["arguments"],
            r#"{"path":"a.rs"}"#
        );
        assert_eq!(json["messages"][3]["role"], "tool");
        assert_eq!(json["messages"][3]["tool_call_id"], "c1");
        assert_eq!(json["tools"][0]["type"], "function");
        assert_eq!(json["tools"][0]["function"]["name"], "read");
    }

    #[test]
    fn response_parsing_tool_calls() {
        let payload = r#"{
            "choices": [{
                "message": {
                    "content": null,
                    "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": {"name": "grep", "arguments": "{\"pattern\":\"x\"}"}
                    }]
                }
            }],
            "usage": {"prompt_tokens": 12, "completion_tokens": 3, "total_tokens": 15}
        }"#;
        let wire: WireResponse = serde_json::from_str(payload).expect("parse");
        assert_eq!(wire.choices.len(), 1);
        let calls = wire.choices[0].message.tool_calls.as_ref().expect("calls");
        assert_eq!(calls[0].function.name, "grep");
        assert_eq!(wire.usage.as_ref().expect("usage").prompt_tokens, 12);
    }
}
