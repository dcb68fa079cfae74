#[cfg(test)]
pub(crate) mod mock;
pub mod openai;
pub mod traits;

pub use traits::{GenerationError, GenerationService, ImageRequest, TextRequest};

use crate::config::GenerationConfig;
use std::sync::Arc;
use std::time::Duration;

/// Prefix of every reply that reports a generation failure.
pub const FAILURE_MARKER: &str = "❌";

/// Whether a reply produced by [`GenerationClient`] reports a failure.
pub fn is_failure(reply: &str) -> bool {
    reply.starts_with(FAILURE_MARKER)
}

fn failure_reply(error: &GenerationError) -> String {
    format!("{FAILURE_MARKER} OpenAI Response Error: {}", error.user_message())
}

/// Fixed request parameters for both operations.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationSettings {
    pub text_model: String,
    pub temperature: f64,
    pub max_tokens: u32,
    pub image_size: String,
    pub image_count: u32,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self::from(&GenerationConfig::default())
    }
}

impl From<&GenerationConfig> for GenerationSettings {
    fn from(config: &GenerationConfig) -> Self {
        Self {
            text_model: config.text_model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            image_size: config.image_size.clone(),
            image_count: config.image_count.max(1),
        }
    }
}

/// Turns service calls into reply text. Never fails: errors become a reply
/// starting with [`FAILURE_MARKER`].
#[derive(Clone)]
pub struct GenerationClient {
    service: Arc<dyn GenerationService>,
    settings: GenerationSettings,
}

impl GenerationClient {
    pub fn new(service: Arc<dyn GenerationService>, settings: GenerationSettings) -> Self {
        Self { service, settings }
    }

    /// `🤖\n <all choices joined, trimmed>`.
    pub async fn complete_text(&self, prompt: &str) -> String {
        let request = TextRequest {
            model: self.settings.text_model.clone(),
            prompt: prompt.to_string(),
            temperature: self.settings.temperature,
            max_tokens: self.settings.max_tokens,
        };
        match self.service.complete(&request).await {
            Ok(choices) => format!("🤖\n {}", choices.concat().trim()),
            Err(e) => {
                tracing::warn!("Text generation via {} failed: {e}", self.service.name());
                failure_reply(&e)
            }
        }
    }

    /// URL of the first generated image.
    pub async fn complete_image(&self, prompt: &str) -> String {
        let request = ImageRequest {
            prompt: prompt.to_string(),
            count: self.settings.image_count,
            size: self.settings.image_size.clone(),
        };
        match self.service.generate_image(&request).await {
            Ok(urls) => match urls.into_iter().next() {
                Some(url) => url,
                None => failure_reply(&GenerationError::EmptyResponse(
                    "No image URL returned by OpenAI".into(),
                )),
            },
            Err(e) => {
                tracing::warn!("Image generation via {} failed: {e}", self.service.name());
                failure_reply(&e)
            }
        }
    }
}

/// Factory: build the generation service from config.
pub fn create_service(config: &GenerationConfig) -> Arc<dyn GenerationService> {
    if config.api_key.as_deref().is_none_or(str::is_empty) {
        tracing::warn!("No OpenAI API key configured; commands will reply with an error");
    }
    Arc::new(
        openai::OpenAiProvider::with_base_url(Some(&config.base_url), config.api_key.as_deref())
            .with_organization(config.organization.as_deref())
            .with_timeout(Duration::from_secs(config.request_timeout_secs.max(1))),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use mock::ScriptedService;

    fn client(service: ScriptedService) -> (GenerationClient, Arc<ScriptedService>) {
        let service = Arc::new(service);
        (
            GenerationClient::new(service.clone(), GenerationSettings::default()),
            service,
        )
    }

    #[tokio::test]
    async fn text_reply_joins_and_trims_choices() {
        let (client, service) = client(ScriptedService::replying(&["\n\nHello", " there\n"], &[]));
        assert_eq!(client.complete_text("hi").await, "🤖\n Hello there");

        let seen = service.text_requests()[0].clone();
        assert_eq!(seen.model, "text-davinci-003");
        assert_eq!(seen.max_tokens, 4000);
        assert_eq!(seen.prompt, "hi");
    }

    #[tokio::test]
    async fn text_failure_becomes_marked_reply() {
        let (client, _) = client(ScriptedService::failing("quota exceeded"));
        let reply = client.complete_text("hi").await;
        assert!(is_failure(&reply));
        assert_eq!(reply, "❌ OpenAI Response Error: quota exceeded");
    }

    #[tokio::test]
    async fn image_reply_is_first_url() {
        let (client, service) = client(ScriptedService::replying(
            &[],
            &["https://img/1.png", "https://img/2.png"],
        ));
        assert_eq!(client.complete_image("a cat").await, "https://img/1.png");
        let seen = service.image_requests()[0].clone();
        assert_eq!(seen.count, 1);
        assert_eq!(seen.size, "1024x1024");
    }

    #[tokio::test]
    async fn image_without_urls_is_a_failure() {
        let (client, _) = client(ScriptedService::replying(&[], &[]));
        assert!(is_failure(&client.complete_image("a cat").await));
    }

    #[tokio::test]
    async fn image_failure_becomes_marked_reply() {
        let (client, _) = client(ScriptedService::failing("safety system"));
        let reply = client.complete_image("a cat").await;
        assert!(is_failure(&reply));
        assert!(reply.contains("safety system"));
    }

    #[test]
    fn settings_never_request_zero_images() {
        let config = GenerationConfig {
            image_count: 0,
            ..GenerationConfig::default()
        };
        assert_eq!(GenerationSettings::from(&config).image_count, 1);
    }

    #[test]
    fn factory_builds_openai_service() {
        assert_eq!(create_service(&GenerationConfig::default()).name(), "openai");
    }
}
