//! OpenRouter chat-completions client.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

const OPENROUTER_API_URL: &str = "https://openrouter.ai/api/v1/chat/completions";

pub struct Client {
    api_key: String,
    http: reqwest::Client,
    url: String,
}

#[derive(Debug, Clone)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// A finished completion.
#[derive(Debug, Clone)]
pub struct Completion {
    pub content: String,
    /// Prompt plus completion tokens, 0 when the API omits usage.
    pub total_tokens: u32,
}

#[derive(Serialize)]
struct ApiRequest<'a> {
    model: &'a str,
    messages: Vec<ApiMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Serialize)]
struct ApiMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ApiResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    #[serde(default)]
    total_tokens: u32,
}

impl Client {
    pub fn new(api_key: String) -> Result<Self, Error> {
        Self::with_url(api_key, OPENROUTER_API_URL.to_string())
    }

    /// Client against a different endpoint (OpenRouter-compatible proxies).
    pub fn with_url(api_key: String, url: String) -> Result<Self, Error> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;
        Ok(Self { api_key, http, url })
    }

    pub async fn chat(
        &self,
        model: &str,
        messages: &[Message],
        max_tokens: u32,
        temperature: f32,
    ) -> Result<Completion, Error> {
        let request = ApiRequest {
            model,
            messages: messages
                .iter()
                .map(|m| ApiMessage { role: m.role.as_str(), content: &m.content })
                .collect(),
            max_tokens,
            temperature,
        };

        debug!("OpenRouter request: model={model}, {} messages", messages.len());

        let response = self
            .http
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .header("content-type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::Timeout
                } else {
                    Error::Http(e.to_string())
                }
            })?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Api { status, body });
        }

        let api_response: ApiResponse = response
            .json()
            .await
            .map_err(|e| Error::Parse(e.to_string()))?;

        parse_completion(api_response)
    }
}

fn parse_completion(response: ApiResponse) -> Result<Completion, Error> {
    let content = response
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .filter(|c| !c.trim().is_empty())
        .ok_or(Error::Empty)?;
    Ok(Completion {
        content,
        total_tokens: response.usage.map_or(0, |u| u.total_tokens),
    })
}

#[derive(Debug)]
pub enum Error {
    Http(String),
    Timeout,
    Api { status: u16, body: String },
    Parse(String),
    Empty,
}

impl Error {
    /// Text safe to show the user in place of an answer.
    pub fn user_message(&self) -> &'static str {
        match self {
            Error::Api { status: 404, .. } => {
                "⚠️ The AI model is temporarily unavailable. Please try again in a moment."
            }
            Error::Api { body, .. } if body.to_lowercase().contains("not found") => {
                "⚠️ The AI model is temporarily unavailable. Please try again in a moment."
            }
            Error::Api { status: 401, .. } => {
                "⚠️ Authentication with the AI service failed. Please contact the bot owner."
            }
            Error::Api { status: 429, .. } => {
                "⚠️ The AI service is receiving too many requests. Please wait a minute and try again."
            }
            Error::Timeout => "⚠️ The request timed out. Please try a shorter question.",
            _ => "⚠️ Sorry, I couldn't process that request. Please try again.",
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Http(e) => write!(f, "HTTP error: {e}"),
            Error::Timeout => write!(f, "request timed out"),
            Error::Api { status, body } => write!(f, "API error: {status}: {body}"),
            Error::Parse(e) => write!(f, "Parse error: {e}"),
            Error::Empty => write!(f, "Empty response"),
        }
    }
}

impl std::error::Error for Error {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_serialization() {
        let messages = [Message::system("be brief"), Message::user("hi")];
        let request = ApiRequest {
            model: "perplexity/sonar-pro",
            messages: messages
                .iter()
                .map(|m| ApiMessage { role: m.role.as_str(), content: &m.content })
                .collect(),
            max_tokens: 800,
            temperature: 0.7,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["model"], "perplexity/sonar-pro");
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][1]["content"], "hi");
        assert_eq!(json["max_tokens"], 800);
    }

    #[test]
    fn test_parse_completion() {
        let raw = r#"{
            "choices": [{"message": {"role": "assistant", "content": "Focus on retention."}}],
            "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15}
        }"#;
        let response: ApiResponse = serde_json::from_str(raw).unwrap();
        let completion = parse_completion(response).unwrap();
        assert_eq!(completion.content, "Focus on retention.");
        assert_eq!(completion.total_tokens, 15);
    }

    #[test]
    fn test_parse_completion_without_usage() {
        let raw = r#"{"choices": [{"message": {"content": "ok"}}]}"#;
        let response: ApiResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parse_completion(response).unwrap().total_tokens, 0);
    }

    #[test]
    fn test_empty_choices_is_error() {
        let response: ApiResponse = serde_json::from_str(r#"{"choices": []}"#).unwrap();
        assert!(matches!(parse_completion(response), Err(Error::Empty)));

        let response: ApiResponse =
            serde_json::from_str(r#"{"choices": [{"message": {"content": "  "}}]}"#).unwrap();
        assert!(matches!(parse_completion(response), Err(Error::Empty)));
    }

    #[test]
    fn test_user_messages() {
        let not_found = Error::Api { status: 400, body: "Model Not Found".into() };
        assert!(not_found.user_message().contains("temporarily unavailable"));
        assert!(Error::Api { status: 404, body: String::new() }.user_message().contains("unavailable"));
        assert!(Error::Api { status: 401, body: String::new() }.user_message().contains("Authentication"));
        assert!(Error::Api { status: 429, body: String::new() }.user_message().contains("too many requests"));
        assert!(Error::Timeout.user_message().contains("timed out"));
        assert!(Error::Empty.user_message().contains("Sorry"));
    }
}
