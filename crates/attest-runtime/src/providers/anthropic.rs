//! Anthropic Claude backend.
//!
//! Documents go through the Files API (beta) once; each requirement is a
//! Messages API call whose user turn carries a `document` block pointing at
//! the uploaded file.
//!
//! ## Security
//!
//! The API key is held in an [`ApiCredential`] and only exposed when the
//! request headers are built.

use async_trait::async_trait;
use attest_core::ProviderKind;
use reqwest::multipart;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use std::time::Duration;

use super::{
    factory::ProviderFactory,
    http,
    secrets::{self, ApiCredential},
    ProviderError, ProviderResponse, ReasoningProvider, TokenUsage, UploadedDocument,
};
use crate::document::DocumentPayload;
use crate::prompts::RequirementPrompt;

pub const ANTHROPIC_API_KEY_ENV: &str = "ANTHROPIC_API_KEY";
pub const CLAUDE_MODEL_ENV: &str = "CLAUDE_VISION_MODEL";
pub const DEFAULT_CLAUDE_MODEL: &str = "claude-sonnet-4-5";
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const FILES_BETA: &str = "files-api-2025-04-14";

/// Anthropic Claude backend.
pub struct ClaudeProvider {
    credential: ApiCredential,
    model: String,
    base_url: String,
    max_tokens: u32,
    timeout: Duration,
    client: reqwest::Client,
}

impl std::fmt::Debug for ClaudeProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClaudeProvider")
            .field("credential", &self.credential)
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl ClaudeProvider {
    /// Build from JSON settings (`api_key`, `model`, `base_url`, `max_tokens`,
    /// `timeout_secs`) with environment fallbacks.
    pub fn from_config(config: &JsonValue) -> Result<Self, ProviderError> {
        let lookup = |var: &str| std::env::var(var).ok();
        let credential = ApiCredential::resolve(
            config,
            "api_key",
            &[ANTHROPIC_API_KEY_ENV],
            "Anthropic API key",
        )?;
        let timeout = Duration::from_secs(config["timeout_secs"].as_u64().unwrap_or(300));

        Ok(Self {
            credential,
            model: secrets::setting(config, "model", CLAUDE_MODEL_ENV, DEFAULT_CLAUDE_MODEL, lookup),
            base_url: config["base_url"]
                .as_str()
                .unwrap_or(DEFAULT_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            max_tokens: config["max_tokens"].as_u64().unwrap_or(4096) as u32,
            timeout,
            client: http::build_client(timeout)?,
        })
    }

    fn authed(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        request
            .header("x-api-key", self.credential.expose())
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("anthropic-beta", FILES_BETA)
    }
}

#[derive(Debug, Deserialize)]
struct FileObject {
    id: String,
}

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    system: &'a str,
    messages: Vec<Message<'a>>,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'static str,
    content: Vec<ContentBlock<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock<'a> {
    Document { source: FileSource<'a> },
    Text { text: &'a str },
}

#[derive(Debug, Serialize)]
struct FileSource<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    file_id: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ResponseBlock>,
    model: String,
    usage: Usage,
}

#[derive(Debug, Deserialize)]
struct ResponseBlock {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    input_tokens: u64,
    output_tokens: u64,
}

#[async_trait]
impl ReasoningProvider for ClaudeProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Claude
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn upload_document(
        &self,
        document: &DocumentPayload,
    ) -> Result<UploadedDocument, ProviderError> {
        let part = http::document_part(document)?;
        let form = multipart::Form::new().part("file", part);

        let response = self
            .authed(self.client.post(format!("{}/files", self.base_url)))
            .multipart(form)
            .send()
            .await
            .map_err(|e| http::transport_error(e, self.timeout))?;
        let file: FileObject = http::check_status(response)
            .await?
            .json()
            .await
            .map_err(|e| ProviderError::MalformedResponse(e.to_string()))?;

        Ok(UploadedDocument {
            provider: ProviderKind::Claude,
            file_id: file.id,
            mime_type: document.mime_type().to_string(),
            content_hash: document.content_hash().to_string(),
        })
    }

    async fn evaluate_requirement(
        &self,
        document: &UploadedDocument,
        prompt: &RequirementPrompt,
    ) -> Result<ProviderResponse, ProviderError> {
        let request = MessagesRequest {
            model: &self.model,
            max_tokens: self.max_tokens,
            system: &prompt.system,
            messages: vec![Message {
                role: "user",
                content: vec![
                    ContentBlock::Document {
                        source: FileSource {
                            kind: "file",
                            file_id: &document.file_id,
                        },
                    },
                    ContentBlock::Text { text: &prompt.user },
                ],
            }],
        };

        let response = self
            .authed(self.client.post(format!("{}/messages", self.base_url)))
            .json(&request)
            .send()
            .await
            .map_err(|e| http::transport_error(e, self.timeout))?;
        let body: MessagesResponse = http::check_status(response)
            .await?
            .json()
            .await
            .map_err(|e| ProviderError::MalformedResponse(e.to_string()))?;

        let text = body
            .content
            .into_iter()
            .filter_map(|block| block.text)
            .collect::<Vec<_>>()
            .join("");

        Ok(ProviderResponse {
            text,
            usage: TokenUsage {
                input_tokens: body.usage.input_tokens,
                output_tokens: body.usage.output_tokens,
            },
            model: body.model,
        })
    }
}

/// Factory for [`ClaudeProvider`].
pub struct ClaudeProviderFactory;

impl ProviderFactory for ClaudeProviderFactory {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Claude
    }

    fn create(&self, config: &JsonValue) -> Result<Arc<dyn ReasoningProvider>, ProviderError> {
        Ok(Arc::new(ClaudeProvider::from_config(config)?))
    }

    fn validate_config(&self, config: &JsonValue) -> Result<(), ProviderError> {
        ApiCredential::resolve(config, "api_key", &[ANTHROPIC_API_KEY_ENV], "Anthropic API key")
            .map(|_| ())
    }

    fn default_config(&self) -> JsonValue {
        serde_json::json!({
            "model": DEFAULT_CLAUDE_MODEL,
            "base_url": DEFAULT_BASE_URL,
            "max_tokens": 4096,
            "timeout_secs": 300,
        })
    }

    fn description(&self) -> &'static str {
        "Anthropic Claude (Files API + Messages API)"
    }
}
