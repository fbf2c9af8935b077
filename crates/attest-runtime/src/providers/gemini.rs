//! Google Gemini backend.
//!
//! Uses the resumable Files upload (start, then upload+finalize) and
//! `generateContent` with a `file_data` part referencing the file URI.

use async_trait::async_trait;
use attest_core::ProviderKind;
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

pub const GEMINI_API_KEY_ENVS: [&str; 2] = ["GEMINI_API_KEY", "GOOGLE_API_KEY"];
pub const GEMINI_MODEL_ENV: &str = "GEMINI_VISION_MODEL";
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.5-pro";
const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// Google Gemini backend.
pub struct GeminiProvider {
    credential: ApiCredential,
    model: String,
    base_url: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl std::fmt::Debug for GeminiProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiProvider")
            .field("credential", &self.credential)
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl GeminiProvider {
    /// Build from JSON settings (`api_key`, `model`, `base_url`,
    /// `timeout_secs`) with environment fallbacks.
    pub fn from_config(config: &JsonValue) -> Result<Self, ProviderError> {
        let lookup = |var: &str| std::env::var(var).ok();
        let credential =
            ApiCredential::resolve(config, "api_key", &GEMINI_API_KEY_ENVS, "Gemini API key")?;
        let timeout = Duration::from_secs(config["timeout_secs"].as_u64().unwrap_or(300));

        Ok(Self {
            credential,
            model: secrets::setting(config, "model", GEMINI_MODEL_ENV, DEFAULT_GEMINI_MODEL, lookup),
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

#[derive(Debug, Serialize)]
struct StartUpload<'a> {
    file: DisplayName<'a>,
}

#[derive(Debug, Serialize)]
struct DisplayName<'a> {
    display_name: &'a str,
}

#[derive(Debug, Deserialize)]
struct UploadResult {
    file: FileMeta,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileMeta {
    uri: String,
    #[serde(default)]
    mime_type: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    system_instruction: Content<'a>,
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'static str>,
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum Part<'a> {
    File { file_data: FileData<'a> },
    Text { text: &'a str },
}

#[derive(Debug, Serialize)]
struct FileData<'a> {
    mime_type: &'a str,
    file_uri: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_mime_type: &'static str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    usage_metadata: Option<UsageMetadata>,
    #[serde(default)]
    model_version: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u64,
    #[serde(default)]
    candidates_token_count: u64,
}

#[async_trait]
impl ReasoningProvider for GeminiProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Gemini
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn upload_document(
        &self,
        document: &DocumentPayload,
    ) -> Result<UploadedDocument, ProviderError> {
        let start = self
            .client
            .post(format!("{}/upload/v1beta/files", self.base_url))
            .header("x-goog-api-key", self.credential.expose())
            .header("X-Goog-Upload-Protocol", "resumable")
            .header("X-Goog-Upload-Command", "start")
            .header("X-Goog-Upload-Header-Content-Length", document.len().to_string())
            .header("X-Goog-Upload-Header-Content-Type", document.mime_type())
            .json(&StartUpload {
                file: DisplayName {
                    display_name: document.name(),
                },
            })
            .send()
            .await
            .map_err(|e| http::transport_error(e, self.timeout))?;
        let start = http::check_status(start).await?;
        let upload_url = start
            .headers()
            .get("x-goog-upload-url")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| ProviderError::MalformedResponse("missing x-goog-upload-url".to_string()))?
            .to_string();

        let finished = self
            .client
            .post(upload_url)
            .header("X-Goog-Upload-Offset", "0")
            .header("X-Goog-Upload-Command", "upload, finalize")
            .body(document.bytes().to_vec())
            .send()
            .await
            .map_err(|e| http::transport_error(e, self.timeout))?;
        let result: UploadResult = http::check_status(finished)
            .await?
            .json()
            .await
            .map_err(|e| ProviderError::MalformedResponse(e.to_string()))?;

        Ok(UploadedDocument {
            provider: ProviderKind::Gemini,
            file_id: result.file.uri,
            mime_type: result
                .file
                .mime_type
                .unwrap_or_else(|| document.mime_type().to_string()),
            content_hash: document.content_hash().to_string(),
        })
    }

    async fn evaluate_requirement(
        &self,
        document: &UploadedDocument,
        prompt: &RequirementPrompt,
    ) -> Result<ProviderResponse, ProviderError> {
        let request = GenerateRequest {
            system_instruction: Content {
                role: None,
                parts: vec![Part::Text {
                    text: &prompt.system,
                }],
            },
            contents: vec![Content {
                role: Some("user"),
                parts: vec![
                    Part::File {
                        file_data: FileData {
                            mime_type: &document.mime_type,
                            file_uri: &document.file_id,
                        },
                    },
                    Part::Text { text: &prompt.user },
                ],
            }],
            generation_config: GenerationConfig {
                response_mime_type: "application/json",
            },
        };

        let response = self
            .client
            .post(format!(
                "{}/v1beta/models/{}:generateContent",
                self.base_url, self.model
            ))
            .header("x-goog-api-key", self.credential.expose())
            .json(&request)
            .send()
            .await
            .map_err(|e| http::transport_error(e, self.timeout))?;
        let body: GenerateResponse = http::check_status(response)
            .await?
            .json()
            .await
            .map_err(|e| ProviderError::MalformedResponse(e.to_string()))?;

        let text = body
            .candidates
            .iter()
            .filter_map(|c| c.content.as_ref())
            .flat_map(|c| c.parts.iter())
            .filter_map(|p| p.text.as_deref())
            .collect::<Vec<_>>()
            .join("");
        let usage = body
            .usage_metadata
            .as_ref()
            .map(|u| TokenUsage {
                input_tokens: u.prompt_token_count,
                output_tokens: u.candidates_token_count,
            })
            .unwrap_or_default();

        Ok(ProviderResponse {
            text,
            usage,
            model: body.model_version.unwrap_or_else(|| self.model.clone()),
        })
    }
}

/// Factory for [`GeminiProvider`].
pub struct GeminiProviderFactory;

impl ProviderFactory for GeminiProviderFactory {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Gemini
    }

    fn create(&self, config: &JsonValue) -> Result<Arc<dyn ReasoningProvider>, ProviderError> {
        Ok(Arc::new(GeminiProvider::from_config(config)?))
    }

    fn validate_config(&self, config: &JsonValue) -> Result<(), ProviderError> {
        ApiCredential::resolve(config, "api_key", &GEMINI_API_KEY_ENVS, "Gemini API key").map(|_| ())
    }

    fn default_config(&self) -> JsonValue {
        serde_json::json!({
            "model": DEFAULT_GEMINI_MODEL,
            "base_url": DEFAULT_BASE_URL,
            "timeout_secs": 300,
        })
    }

    fn description(&self) -> &'static str {
        "Google Gemini (resumable Files upload + generateContent)"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_request_shape() {
        let request = GenerateRequest {
            system_instruction: Content {
                role: None,
                parts: vec![Part::Text { text: "sys" }],
            },
            contents: vec![Content {
                role: Some("user"),
                parts: vec![
                    Part::File {
                        file_data: FileData {
                            mime_type: "application/pdf",
                            file_uri: "https://files/abc",
                        },
                    },
                    Part::Text { text: "question" },
                ],
            }],
            generation_config: GenerationConfig {
                response_mime_type: "application/json",
            },
        };
        let json = serde_json::to_value(&request).unwrap();
        assert!(json["systemInstruction"].get("role").is_none());
        assert_eq!(json["contents"][0]["parts"][0]["file_data"]["file_uri"], "https://files/abc");
        assert_eq!(json["contents"][0]["parts"][1]["text"], "question");
        assert_eq!(json["generationConfig"]["responseMimeType"], "application/json");
    }

    #[test]
    fn test_response_usage_parsing() {
        let body: GenerateResponse = serde_json::from_value(serde_json::json!({
            "candidates": [{"content": {"parts": [{"text": "{\"status\":"}, {"text": "\"PASS\"}"}]}}],
            "usageMetadata": {"promptTokenCount": 1200, "candidatesTokenCount": 80},
            "modelVersion": "gemini-2.5-pro"
        }))
        .unwrap();
        assert_eq!(body.candidates.len(), 1);
        assert_eq!(body.usage_metadata.unwrap().prompt_token_count, 1200);
    }
}
