use crate::providers::traits::{GenerationError, GenerationService, ImageRequest, TextRequest};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub struct OpenAiProvider {
    base_url: String,
    credential: Option<String>,
    organization: Option<String>,
    client: Client,
}

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    temperature: f64,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Serialize)]
struct ImageGenerationRequest<'a> {
    prompt: &'a str,
    n: u32,
    size: &'a str,
}

#[derive(Debug, Deserialize)]
struct ImageGenerationResponse {
    #[serde(default)]
    data: Vec<ImageData>,
}

#[derive(Debug, Deserialize)]
struct ImageData {
    #[serde(default)]
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

/// Longest raw body echoed back when the service's error is not JSON.
const MAX_RAW_ERROR_CHARS: usize = 200;

impl OpenAiProvider {
    pub fn new(credential: Option<&str>) -> Self {
        Self::with_base_url(None, credential)
    }

    /// Create a provider with an optional custom base URL.
    /// Defaults to `https://api.openai.com/v1` when `base_url` is `None`.
    pub fn with_base_url(base_url: Option<&str>, credential: Option<&str>) -> Self {
        Self {
            base_url: base_url
                .map(|u| u.trim_end_matches('/').to_string())
                .unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
            credential: credential.map(ToString::to_string),
            organization: None,
            client: build_client(Duration::from_secs(120)),
        }
    }

    pub fn with_organization(mut self, organization: Option<&str>) -> Self {
        self.organization = organization
            .filter(|o| !o.is_empty())
            .map(ToString::to_string);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.client = build_client(timeout);
        self
    }

    fn credential(&self) -> Result<&str, GenerationError> {
        self.credential
            .as_deref()
            .filter(|c| !c.is_empty())
            .ok_or_else(|| {
                GenerationError::MissingCredential(
                    "OpenAI API key not set. Set OPENAI_KEY or edit config.toml.".into(),
                )
            })
    }

    fn post(&self, path: &str, credential: &str) -> reqwest::RequestBuilder {
        let mut request = self
            .client
            .post(format!("{}/{path}", self.base_url))
            .header("Authorization", format!("Bearer {credential}"));
        if let Some(org) = &self.organization {
            request = request.header("OpenAI-Organization", org);
        }
        request
    }
}

fn build_client(timeout: Duration) -> Client {
    Client::builder()
        .timeout(timeout)
        .connect_timeout(Duration::from_secs(10))
        .build()
        .unwrap_or_else(|e| {
            tracing::warn!("Failed to build OpenAI HTTP client with timeouts: {e}");
            Client::new()
        })
}

/// Turn a non-success response into the service's own error message.
async fn api_error(response: reqwest::Response) -> GenerationError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorEnvelope>(&body)
        .map(|e| e.error.message)
        .unwrap_or_else(|_| {
            let trimmed = body.trim();
            if trimmed.is_empty() {
                format!("HTTP {status}")
            } else {
                trimmed.chars().take(MAX_RAW_ERROR_CHARS).collect()
            }
        });
    GenerationError::Api {
        status: status.as_u16(),
        message,
    }
}

#[async_trait]
impl GenerationService for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    async fn complete(&self, request: &TextRequest) -> Result<Vec<String>, GenerationError> {
        let credential = self.credential()?;
        let body = CompletionRequest {
            model: &request.model,
            prompt: &request.prompt,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        };

        let response = self.post("completions", credential).json(&body).send().await?;
        if !response.status().is_success() {
            return Err(api_error(response).await);
        }

        let completion: CompletionResponse = response.json().await?;
        if completion.choices.is_empty() {
            return Err(GenerationError::EmptyResponse(
                "No completion returned by OpenAI".into(),
            ));
        }
        Ok(completion.choices.into_iter().map(|c| c.text).collect())
    }

    async fn generate_image(&self, request: &ImageRequest) -> Result<Vec<String>, GenerationError> {
        let credential = self.credential()?;
        let body = ImageGenerationRequest {
            prompt: &request.prompt,
            n: request.count,
            size: &request.size,
        };

        let response = self
            .post("images/generations", credential)
            .json(&body)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(api_error(response).await);
        }

        let images: ImageGenerationResponse = response.json().await?;
        let urls: Vec<String> = images.data.into_iter().filter_map(|d| d.url).collect();
        if urls.is_empty() {
            return Err(GenerationError::EmptyResponse(
                "No image URL returned by OpenAI".into(),
            ));
        }
        Ok(urls)
    }

    async fn warmup(&self) -> anyhow::Result<()> {
        if let Ok(credential) = self.credential() {
            self.client
                .get(format!("{}/models", self.base_url))
                .header("Authorization", format!("Bearer {credential}"))
                .send()
                .await?
                .error_for_status()?;
        }
        Ok(())
    }
}
