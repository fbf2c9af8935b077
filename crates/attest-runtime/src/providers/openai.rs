//! OpenAI backend.
//!
//! Uploads with `purpose=user_data` through the Files API, then asks each
//! requirement through the Responses API with an `input_file` part.

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

pub const OPENAI_API_KEY_ENV: &str = "OPENAI_API_KEY";
pub const OPENAI_MODEL_ENV: &str = "OPENAI_VISION_MODEL";
pub const OPENAI_REASONING_EFFORT_ENV: &str = "VISION_REASONING_EFFORT";
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-5";
const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// OpenAI Responses API backend.
pub struct OpenAiProvider {
    credential: ApiCredential,
    model: String,
    reasoning_effort: String,
    base_url: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl std::fmt::Debug for OpenAiProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiProvider")
            .field("credential", &self.credential)
            .field("model", &self.model)
            .field("reasoning_effort", &self.reasoning_effort)
            .finish()
    }
}

impl OpenAiProvider {
    /// Build from JSON settings (`api_key`, `model`, `reasoning_effort`,
    /// `base_url`, `timeout_secs`) with environment fallbacks.
    ///
    /// The model falls back to `OPENAI_VISION_MODEL`, then `OPENAI_MODEL`.
    pub fn from_config(config: &JsonValue) -> Result<Self, ProviderError> {
        let lookup = |var: &str| std::env::var(var).ok();
        let credential =
            ApiCredential::resolve(config, "api_key", &[OPENAI_API_KEY_ENV], "OpenAI API key")?;
        let timeout = Duration::from_secs(config["timeout_secs"].as_u64().unwrap_or(300));
        let generic_model = secrets::setting(config, "model", "OPENAI_MODEL", DEFAULT_OPENAI_MODEL, lookup);

        Ok(Self {
            credential,
            model: secrets::setting(config, "model", OPENAI_MODEL_ENV, &generic_model, lookup),
            reasoning_effort: secrets::setting(
                config,
                "reasoning_effort",
                OPENAI_REASONING_EFFORT_ENV,
                "medium",
                lookup,
            ),
            base_url: config["base_url"]
                .as_str()
                .unwrap_or(DEFAULT_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            timeout,
            client: http::build_client(timeout)?,
        })
    }
}

#[derive(Debug, Deserialize)]
struct FileObject {
    id: String,
}

#[derive(Debug, Serialize)]
struct ResponsesRequest<'a> {
    model: &'a str,
    instructions: &'a str,
    reasoning: Reasoning<'a>,
    input: Vec<InputMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct Reasoning<'a> {
    effort: &'a str,
}

#[derive(Debug, Serialize)]
struct InputMessage<'a> {
    role: &'static str,
    content: Vec<InputPart<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum InputPart<'a> {
    InputText { text: &'a str },
    InputFile { file_id: &'a str },
}

#[derive(Debug, Deserialize)]
struct ResponsesResponse {
    #[serde(default)]
    output_text: Option<String>,
    #[serde(default)]
    output: Vec<OutputItem>,
    #[serde(default)]
    model: String,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct OutputItem {
    #[serde(default)]
    content: Vec<OutputChunk>,
}

#[derive(Debug, Deserialize)]
struct OutputChunk {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    input_tokens: u64,
    output_tokens: u64,
}

impl ResponsesResponse {
    /// `output_text` when present, else the joined `output_text` chunks.
    fn text(&self) -> String {
        if let Some(text) = self.output_text.as_ref().filter(|t| !t.is_empty()) {
            return text.clone();
        }
        self.output
            .iter()
            .flat_map(|item| item.content.iter())
            .filter(|chunk| chunk.kind == "output_text" || chunk.kind == "text")
            .filter_map(|chunk| chunk.text.as_deref())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[async_trait]
impl ReasoningProvider for OpenAiProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::OpenAi
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn upload_document(
        &self,
        document: &DocumentPayload,
    ) -> Result<UploadedDocument, ProviderError> {
        let part = http::document_part(document)?;
        let form = multipart::Form::new()
            .text("purpose", "user_data")
            .part("file", part);

        let response = self
            .client
            .post(format!("{}/files", self.base_url))
            .bearer_auth(self.credential.expose())
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
            provider: ProviderKind::OpenAi,
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
        let request = ResponsesRequest {
            model: &self.model,
            instructions: &prompt.system,
            reasoning: Reasoning {
                effort: &self.reasoning_effort,
            },
            input: vec![InputMessage {
                role: "user",
                content: vec![
                    InputPart::InputText { text: &prompt.user },
                    InputPart::InputFile {
                        file_id: &document.file_id,
                    },
                ],
            }],
        };

        let response = self
            .client
            .post(format!("{}/responses", self.base_url))
            .bearer_auth(self.credential.expose())
            .json(&request)
            .send()
            .await
            .map_err(|e| http::transport_error(e, self.timeout))?;
        let body: ResponsesResponse = http::check_status(response)
            .await?
            .json()
            .await
            .map_err(|e| ProviderError::MalformedResponse(e.to_string()))?;

        let usage = body
            .usage
            .as_ref()
            .map(|u| TokenUsage {
                input_tokens: u.input_tokens,
                output_tokens: u.output_tokens,
            })
            .unwrap_or_default();

        Ok(ProviderResponse {
            text: body.text(),
            usage,
            model: body.model,
        })
    }
}

/// Factory for [`OpenAiProvider`].
pub struct OpenAiProviderFactory;

impl ProviderFactory for OpenAiProviderFactory {
    fn kind(&self) -> ProviderKind {
        ProviderKind::OpenAi
    }

    fn create(&self, config: &JsonValue) -> Result<Arc<dyn ReasoningProvider>, ProviderError> {
        Ok(Arc::new(OpenAiProvider::from_config(config)?))
    }

    fn validate_config(&self, config: &JsonValue) -> Result<(), ProviderError> {
        ApiCredential::resolve(config, "api_key", &[OPENAI_API_KEY_ENV], "OpenAI API key").map(|_| ())
    }

    fn default_config(&self) -> JsonValue {
        serde_json::json!({
            "model": DEFAULT_OPENAI_MODEL,
            "reasoning_effort": "medium",
            "base_url": DEFAULT_BASE_URL,
            "timeout_secs": 300,
        })
    }

    fn description(&self) -> &'static str {
        "OpenAI (Files API + Responses API)"
    }
}
