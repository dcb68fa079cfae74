use async_trait::async_trait;

/// Text completion request.
#[derive(Debug, Clone, PartialEq)]
pub struct TextRequest {
    pub model: String,
    pub prompt: String,
    pub temperature: f64,
    pub max_tokens: u32,
}

/// Image generation request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRequest {
    pub prompt: String,
    pub count: u32,
    pub size: String,
}

#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("{0}")]
    MissingCredential(String),
    /// The service answered with an error body. `message` is the service's own text.
    #[error("{message}")]
    Api { status: u16, message: String },
    #[error("{0}")]
    Http(#[from] reqwest::Error),
    #[error("{0}")]
    EmptyResponse(String),
}

impl GenerationError {
    /// Text shown to the chat user after the failure marker.
    pub fn user_message(&self) -> String {
        self.to_string()
    }
}

#[async_trait]
pub trait GenerationService: Send + Sync {
    fn name(&self) -> &str;

    /// All returned choices, in order.
    async fn complete(&self, request: &TextRequest) -> Result<Vec<String>, GenerationError>;

    /// Generated image URLs, in order.
    async fn generate_image(&self, request: &ImageRequest) -> Result<Vec<String>, GenerationError>;

    /// Warm up the HTTP connection pool. No-op by default.
    async fn warmup(&self) -> anyhow::Result<()> {
        Ok(())
    }
}
