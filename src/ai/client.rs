use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;

use crate::config::GeminiConfig;

use super::inference::{extract_text, GenerateContentRequest, GenerateContentResponse};

#[derive(Debug, Error)]
pub enum GeminiError {
    #[error("GEMINI_API_KEY must be configured for moderation calls")]
    MissingApiKey,
    #[error("transport error: {0}")]
    Transport(reqwest::Error),
    #[error("Gemini API error ({status}): {message}")]
    Status { status: u16, message: String },
    #[error("Gemini response could not be decoded: {0}")]
    Decode(String),
    #[error("Gemini response contained no text (the prompt may have been blocked)")]
    EmptyResponse,
}

impl GeminiError {
    /// Rate limits, server errors and network trouble may clear up on retry.
    pub fn is_transient(&self) -> bool {
        match self {
            GeminiError::Transport(_) => true,
            GeminiError::Status { status, .. } => *status == 429 || *status >= 500,
            GeminiError::MissingApiKey | GeminiError::Decode(_) | GeminiError::EmptyResponse => {
                false
            }
        }
    }
}

/// Request URLs never reach error messages, which are relayed to the admin
/// chat and the log file.
impl From<reqwest::Error> for GeminiError {
    fn from(err: reqwest::Error) -> Self {
        GeminiError::Transport(err.without_url())
    }
}

#[derive(Debug, Deserialize)]
struct GeminiErrorDetail {
    message: String,
}

#[derive(Debug, Deserialize)]
struct GeminiErrorResponse {
    error: GeminiErrorDetail,
}

const API_KEY_HEADER: &str = "x-goog-api-key";

#[derive(Clone)]
pub struct GeminiClient {
    http: Client,
    config: GeminiConfig,
}

impl GeminiClient {
    pub fn new(http: Client, config: GeminiConfig) -> Self {
        Self { http, config }
    }

    /// Sends one `generateContent` call and returns the model's text reply.
    pub async fn generate(&self, request: &GenerateContentRequest) -> Result<String, GeminiError> {
        let api_key = self
            .config
            .api_key
            .as_ref()
            .ok_or(GeminiError::MissingApiKey)?;

        tracing::debug!(target: "gemini", model = %self.config.model, "sending generateContent request");

        let response = self
            .http
            .post(self.endpoint())
            .header(API_KEY_HEADER, api_key)
            .json(request)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            let message = serde_json::from_str::<GeminiErrorResponse>(&body)
                .map(|parsed| parsed.error.message)
                .unwrap_or(body);
            return Err(GeminiError::Status {
                status: status.as_u16(),
                message,
            });
        }

        let completion: GenerateContentResponse =
            serde_json::from_str(&body).map_err(|err| GeminiError::Decode(err.to_string()))?;
        extract_text(completion).ok_or(GeminiError::EmptyResponse)
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/models/{}:generateContent",
            self.config.api_base, self.config.model
        )
    }
}
