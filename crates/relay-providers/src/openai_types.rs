//! OpenAI-compatible chat completion request and response types.
//!
//! DeepSeek and OpenAI share this wire format, so one set of serde types
//! covers both.

use relay_core::Message;
use serde::{Deserialize, Serialize};

use crate::provider::ToolSchema;

/// Request sent to `POST {base_url}/chat/completions`.
#[derive(Debug, Serialize)]
pub struct ChatCompletionRequest<'a> {
    pub model: &'a str,
    pub messages: &'a [Message],
    pub temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ApiTool<'a>>,
}

/// Tool definition in the request.
#[derive(Debug, Serialize)]
pub struct ApiTool<'a> {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub function: ApiFunction<'a>,
}

#[derive(Debug, Serialize)]
pub struct ApiFunction<'a> {
    pub name: &'a str,
    pub description: &'a str,
    pub parameters: &'a serde_json::Value,
}

impl<'a> From<&'a ToolSchema> for ApiTool<'a> {
    fn from(tool: &'a ToolSchema) -> Self {
        Self {
            kind: "function",
            function: ApiFunction {
                name: &tool.name,
                description: &tool.description,
                parameters: &tool.parameters,
            },
        }
    }
}

/// Response body. Some gateways answer 200 with only an `error` object.
#[derive(Debug, Deserialize)]
pub struct ChatCompletionResponse {
    #[serde(default)]
    pub choices: Vec<Choice>,
    #[serde(default)]
    pub usage: Option<ApiUsage>,
    #[serde(default)]
    pub error: Option<ApiErrorBody>,
}

#[derive(Debug, Deserialize)]
pub struct Choice {
    pub message: ChoiceMessage,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ChoiceMessage {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub tool_calls: Option<serde_json::Value>,
}

/// Token usage information from the response.
#[derive(Debug, Deserialize, Clone)]
pub struct ApiUsage {
    #[serde(default)]
    pub prompt_tokens: u32,
    #[serde(default)]
    pub completion_tokens: u32,
}

/// Error object returned by the API.
#[derive(Debug, Deserialize)]
pub struct ApiErrorBody {
    pub message: String,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
}

/// Error envelope used in non-2xx bodies.
#[derive(Debug, Deserialize)]
pub struct ApiErrorEnvelope {
    pub error: ApiErrorBody,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_omits_empty_tools() {
        let messages = vec![Message::user("hi")];
        let request = ChatCompletionRequest {
            model: "deepseek-chat",
            messages: &messages,
            temperature: 0.7,
            max_tokens: None,
            tools: vec![],
        };
        let value = serde_json::to_value(&request).unwrap();
        assert!(value.get("tools").is_none());
        assert!(value.get("max_tokens").is_none());
        assert_eq!(value["messages"][0]["role"], "user");
    }

    #[test]
    fn test_tool_is_wrapped_as_function() {
        let tool = ToolSchema::new("read_file", "Read a file", json!({"type": "object"}));
        let value = serde_json::to_value(ApiTool::from(&tool)).unwrap();
        assert_eq!(value["type"], "function");
        assert_eq!(value["function"]["name"], "read_file");
        assert_eq!(value["function"]["parameters"]["type"], "object");
    }

    #[test]
    fn test_response_with_null_content() {
        let body = json!({
            "choices": [{
                "message": {"role": "assistant", "content": null, "tool_calls": [{"id": "call_1"}]},
                "finish_reason": "tool_calls"
            }]
        });
        let response: ChatCompletionResponse = serde_json::from_value(body).unwrap();
        assert!(response.choices[0].message.content.is_none());
        assert!(response.choices[0].message.tool_calls.is_some());
    }
}
