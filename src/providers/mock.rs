//! Scripted generation service for unit tests.

use super::traits::{GenerationError, GenerationService, ImageRequest, TextRequest};
use async_trait::async_trait;
use parking_lot::Mutex;

#[derive(Default)]
pub struct ScriptedService {
    fail_with: Option<String>,
    texts: Vec<String>,
    urls: Vec<String>,
    seen_text: Mutex<Vec<TextRequest>>,
    seen_image: Mutex<Vec<ImageRequest>>,
}

impl ScriptedService {
    pub fn replying(texts: &[&str], urls: &[&str]) -> Self {
        Self {
            texts: texts.iter().map(ToString::to_string).collect(),
            urls: urls.iter().map(ToString::to_string).collect(),
            ..Self::default()
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            fail_with: Some(message.to_string()),
            ..Self::default()
        }
    }

    pub fn text_requests(&self) -> Vec<TextRequest> {
        self.seen_text.lock().clone()
    }

    pub fn image_requests(&self) -> Vec<ImageRequest> {
        self.seen_image.lock().clone()
    }

    fn outcome(&self, status: u16, ok: &[String]) -> Result<Vec<String>, GenerationError> {
        match &self.fail_with {
            Some(message) => Err(GenerationError::Api {
                status,
                message: message.clone(),
            }),
            None => Ok(ok.to_vec()),
        }
    }
}

#[async_trait]
impl GenerationService for ScriptedService {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: &TextRequest) -> Result<Vec<String>, GenerationError> {
        self.seen_text.lock().push(request.clone());
        self.outcome(429, &self.texts)
    }

    async fn generate_image(&self, request: &ImageRequest) -> Result<Vec<String>, GenerationError> {
        self.seen_image.lock().push(request.clone());
        self.outcome(400, &self.urls)
    }
}
