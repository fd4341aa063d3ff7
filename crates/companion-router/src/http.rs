//! HTTP chat adapter.
//!
//! Speaks the **OpenAI Chat Completions** dialect (and every compatible
//! endpoint such as OpenRouter, DeepSeek or vLLM) and the **Gemini
//! `generateContent`** dialect, and classifies every failure into a
//! [`CallErrorKind`] so the router can fail over uniformly.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use reqwest::StatusCode;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde_json::{Value, json};

use crate::adapter::{ChatAdapter, ChatPayload, ChatReply, MessageRole, ProviderCallError};
use crate::error::{Result, RouterError};
use crate::profile::{ProviderProfile, WireFormat};

/// Header carrying the Gemini API key.
const GOOG_API_KEY: &str = "x-goog-api-key";

/// How much of an error body is kept in diagnostics.
const ERROR_BODY_PREVIEW: usize = 300;

// ---------------------------------------------------------------------------
// Adapter
// ---------------------------------------------------------------------------

/// [`ChatAdapter`] over `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpChatAdapter {
    http: reqwest::Client,
    debug: bool,
}

impl HttpChatAdapter {
    /// Create an adapter.  With `debug` on, response previews are logged at
    /// debug level.
    pub fn new(debug: bool) -> Result<Self> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| RouterError::HttpClient {
                reason: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self { http, debug })
    }

    async fn send(
        &self,
        profile: &ProviderProfile,
        url: &str,
        headers: HeaderMap,
        body: &Value,
        timeout: Duration,
    ) -> std::result::Result<Value, ProviderCallError> {
        tracing::debug!(
            provider = %profile.id,
            model = %profile.model,
            wire = ?profile.wire,
            timeout_ms = timeout.as_millis() as u64,
            "sending chat request"
        );

        let resp = self
            .http
            .post(url)
            .headers(headers)
            .timeout(timeout)
            .json(body)
            .send()
            .await
            .map_err(classify_transport_error)?;

        let status = resp.status();
        let text = resp.text().await.map_err(classify_transport_error)?;

        if self.debug {
            tracing::debug!(
                provider = %profile.id,
                status = status.as_u16(),
                body = %preview(&text),
                "chat response received"
            );
        }

        if !status.is_success() {
            return Err(classify_status(status, &text));
        }

        serde_json::from_str(&text)
            .map_err(|e| ProviderCallError::malformed(format!("invalid JSON response: {e}")))
    }

    // -- OpenAI --------------------------------------------------------------

    async fn call_openai(
        &self,
        profile: &ProviderProfile,
        payload: &ChatPayload,
        timeout: Duration,
    ) -> std::result::Result<ChatReply, ProviderCallError> {
        let url = format!("{}/chat/completions", profile.endpoint.trim_end_matches('/'));

        let mut headers = HeaderMap::new();
        if !profile.api_key.is_empty() {
            let auth_value = format!("Bearer {}", profile.api_key);
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&auth_value).map_err(|e| {
                    ProviderCallError::auth(format!("invalid authorization header: {e}"))
                })?,
            );
        }
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let body = build_openai_body(profile, payload);
        let v = self.send(profile, &url, headers, &body, timeout).await?;
        parse_openai_text(&v).map(ChatReply::new)
    }

    // -- Gemini --------------------------------------------------------------

    async fn call_gemini(
        &self,
        profile: &ProviderProfile,
        payload: &ChatPayload,
        timeout: Duration,
    ) -> std::result::Result<ChatReply, ProviderCallError> {
        let url = format!(
            "{}/v1/models/{}:generateContent",
            profile.endpoint.trim_end_matches('/'),
            profile.model,
        );

        let mut headers = HeaderMap::new();
        if !profile.api_key.is_empty() {
            headers.insert(
                GOOG_API_KEY,
                HeaderValue::from_str(&profile.api_key).map_err(|e| {
                    ProviderCallError::auth(format!("invalid API key header: {e}"))
                })?,
            );
        }
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let body = build_gemini_body(profile, payload);
        let v = self.send(profile, &url, headers, &body, timeout).await?;
        parse_gemini_text(&v).map(ChatReply::new)
    }
}

#[async_trait]
impl ChatAdapter for HttpChatAdapter {
    async fn call(
        &self,
        profile: &ProviderProfile,
        payload: &ChatPayload,
        timeout: Duration,
    ) -> std::result::Result<ChatReply, ProviderCallError> {
        match profile.wire {
            WireFormat::OpenAi => self.call_openai(profile, payload, timeout).await,
            WireFormat::Gemini => self.call_gemini(profile, payload, timeout).await,
        }
    }
}

// ===========================================================================
// Classification
// ===========================================================================

/// Map a non-success HTTP status to an error kind.
fn classify_status(status: StatusCode, body: &str) -> ProviderCallError {
    let message = format!("API returned {status}: {}", preview(body));
    match status.as_u16() {
        401 | 403 => ProviderCallError::auth(message),
        402 | 429 => ProviderCallError::rate_limited(message),
        408 | 504 => ProviderCallError::timeout(message),
        _ => ProviderCallError::server(message),
    }
}

/// The request URL is stripped first so endpoint credentials never reach
/// error text or logs.
fn classify_transport_error(err: reqwest::Error) -> ProviderCallError {
    let err = err.without_url();
    if err.is_timeout() {
        ProviderCallError::timeout(err.to_string())
    } else if err.is_decode() {
        ProviderCallError::malformed(err.to_string())
    } else {
        ProviderCallError::server(err.to_string())
    }
}

fn preview(text: &str) -> String {
    text.chars().take(ERROR_BODY_PREVIEW).collect()
}

// ===========================================================================
// OpenAI format conversion
// ===========================================================================

/// Build the JSON body for the OpenAI Chat Completions API.  An attached
/// image is added to the last user message as a data-URL part.
pub fn build_openai_body(profile: &ProviderProfile, payload: &ChatPayload) -> Value {
    let last_user = payload
        .messages
        .iter()
        .rposition(|m| m.role == MessageRole::User);

    let messages: Vec<Value> = payload
        .messages
        .iter()
        .enumerate()
        .map(|(i, m)| match (&payload.image, Some(i) == last_user) {
            (Some(image), true) => json!({
                "role": m.role.as_str(),
                "content": [
                    { "type": "text", "text": m.content },
                    {
                        "type": "image_url",
                        "image_url": {
                            "url": format!(
                                "data:{};base64,{}",
                                image.mime_type,
                                BASE64.encode(&image.data)
                            ),
                        },
                    },
                ],
            }),
            _ => json!({ "role": m.role.as_str(), "content": m.content }),
        })
        .collect();

    json!({
        "model": profile.model,
        "messages": messages,
        "temperature": profile.temperature,
        "max_tokens": profile.max_tokens,
    })
}

/// Extract the assistant text from a Chat Completions response.
pub fn parse_openai_text(v: &Value) -> std::result::Result<String, ProviderCallError> {
    let content = &v["choices"][0]["message"]["content"];
    if content.is_null() {
        return Err(ProviderCallError::malformed(
            "missing `choices[0].message.content` in response",
        ));
    }

    // Some compatible servers return content as an array of parts.
    let text = match content {
        Value::String(s) => s.clone(),
        Value::Array(parts) => parts
            .iter()
            .filter_map(|p| p["text"].as_str())
            .collect::<Vec<_>>()
            .join(""),
        _ => String::new(),
    };

    non_empty(text)
}

// ===========================================================================
// Gemini format conversion
// ===========================================================================

/// Build the JSON body for Gemini `generateContent`.  Gemini gets the whole
/// conversation flattened into one prompt.
pub fn build_gemini_body(profile: &ProviderProfile, payload: &ChatPayload) -> Value {
    let mut parts = vec![json!({ "text": payload.flattened() })];
    if let Some(image) = &payload.image {
        parts.push(json!({
            "inline_data": {
                "mime_type": image.mime_type,
                "data": BASE64.encode(&image.data),
            }
        }));
    }

    json!({
        "contents": [{ "parts": parts }],
        "generationConfig": {
            "temperature": profile.temperature,
            "maxOutputTokens": profile.max_tokens,
        },
    })
}

/// Extract the first non-empty text part of the first candidate.
pub fn parse_gemini_text(v: &Value) -> std::result::Result<String, ProviderCallError> {
    let content = &v["candidates"][0]["content"];
    let parts = match content {
        Value::Object(_) => content["parts"].as_array(),
        Value::Array(_) => content.as_array(),
        _ => None,
    };

    let text = parts
        .into_iter()
        .flatten()
        .filter_map(|p| p["text"].as_str())
        .find(|t| !t.trim().is_empty())
        .unwrap_or_default()
        .to_owned();

    non_empty(text)
}

fn non_empty(text: String) -> std::result::Result<String, ProviderCallError> {
    if text.trim().is_empty() {
        Err(ProviderCallError::malformed(
            "provider responded without any usable text",
        ))
    } else {
        Ok(text)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
