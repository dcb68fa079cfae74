use anyhow::{Context, Result};
use directories::UserDirs;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

// ── Top-level config ──────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    /// Path to config.toml - computed from home, not serialized
    #[serde(skip)]
    pub config_path: PathBuf,

    #[serde(default)]
    pub generation: GenerationConfig,

    #[serde(default)]
    pub session: SessionConfig,

    #[serde(default)]
    pub presence: PresenceConfig,

    #[serde(default)]
    pub reliability: ReliabilityConfig,

    #[serde(default)]
    pub commands: CommandsConfig,
}

// ── Generation service ────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GenerationConfig {
    /// API key. Prefer the OPENAI_KEY environment variable.
    #[serde(default)]
    pub api_key: Option<String>,
    /// Optional OpenAI organization id
    #[serde(default)]
    pub organization: Option<String>,
    /// Base URL of an OpenAI-compatible API
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_text_model")]
    pub text_model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_image_size")]
    pub image_size: String,
    #[serde(default = "default_image_count")]
    pub image_count: u32,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".into()
}

fn default_text_model() -> String {
    "text-davinci-003".into()
}

fn default_temperature() -> f64 {
    1.0
}

fn default_max_tokens() -> u32 {
    4000
}

fn default_image_size() -> String {
    "1024x1024".into()
}

fn default_image_count() -> u32 {
    1
}

fn default_request_timeout_secs() -> u64 {
    120
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            organization: None,
            base_url: default_base_url(),
            text_model: default_text_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            image_size: default_image_size(),
            image_count: default_image_count(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

// ── Session ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionConfig {
    /// Transport to connect with ("console")
    #[serde(default = "default_transport")]
    pub transport: String,
    /// SQLite database holding the device credentials
    #[serde(default = "default_credentials_path")]
    pub credentials_path: PathBuf,
}

fn default_transport() -> String {
    "console".into()
}

fn wabot_dir() -> PathBuf {
    UserDirs::new()
        .map_or_else(|| PathBuf::from("."), |u| u.home_dir().to_path_buf())
        .join(".wabot")
}

fn default_credentials_path() -> PathBuf {
    wabot_dir().join("auth_info").join("session.db")
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            transport: default_transport(),
            credentials_path: default_credentials_path(),
        }
    }
}

// ── Presence ─────────────────────────────────────────────────────

/// Pauses of the typing choreography before each reply.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PresenceConfig {
    #[serde(default = "default_subscribe_delay_ms")]
    pub subscribe_delay_ms: u64,
    #[serde(default = "default_composing_delay_ms")]
    pub composing_delay_ms: u64,
}

fn default_subscribe_delay_ms() -> u64 {
    500
}

fn default_composing_delay_ms() -> u64 {
    2000
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            subscribe_delay_ms: default_subscribe_delay_ms(),
            composing_delay_ms: default_composing_delay_ms(),
        }
    }
}

// ── Reliability ──────────────────────────────────────────────────

/// Backoff between failed connect attempts. The first reconnect after a
/// dropped connection is always immediate.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReliabilityConfig {
    #[serde(default = "default_reconnect_initial_backoff_ms")]
    pub reconnect_initial_backoff_ms: u64,
    #[serde(default = "default_reconnect_max_backoff_ms")]
    pub reconnect_max_backoff_ms: u64,
}

fn default_reconnect_initial_backoff_ms() -> u64 {
    1000
}

fn default_reconnect_max_backoff_ms() -> u64 {
    30_000
}

impl Default for ReliabilityConfig {
    fn default() -> Self {
        Self {
            reconnect_initial_backoff_ms: default_reconnect_initial_backoff_ms(),
            reconnect_max_backoff_ms: default_reconnect_max_backoff_ms(),
        }
    }
}

// ── Commands ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommandsConfig {
    /// Token that asks for a text completion
    #[serde(default = "default_text_command")]
    pub text_command: String,
    /// Token that asks for an image
    #[serde(default = "default_image_command")]
    pub image_command: String,
}

fn default_text_command() -> String {
    "/ia".into()
}

fn default_image_command() -> String {
    "/img".into()
}

impl Default for CommandsConfig {
    fn default() -> Self {
        Self {
            text_command: default_text_command(),
            image_command: default_image_command(),
        }
    }
}

// ── Config impl ──────────────────────────────────────────────────

impl Default for Config {
    fn default() -> Self {
        Self {
            config_path: wabot_dir().join("config.toml"),
            generation: GenerationConfig::default(),
            session: SessionConfig::default(),
            presence: PresenceConfig::default(),
            reliability: ReliabilityConfig::default(),
            commands: CommandsConfig::default(),
        }
    }
}

impl Config {
    pub fn load_or_init() -> Result<Self> {
        let home = UserDirs::new()
            .map(|u| u.home_dir().to_path_buf())
            .context("Could not find home directory")?;
        Self::load_or_init_at(&home.join(".wabot").join("config.toml"))
    }

    /// Load `config_path`, writing defaults there first if it does not exist.
    pub fn load_or_init_at(config_path: &Path) -> Result<Self> {
        let mut config = if config_path.exists() {
            let contents = fs::read_to_string(config_path).context("Failed to read config file")?;
            let mut config: Config =
                toml::from_str(&contents).context("Failed to parse config file")?;
            config.config_path = config_path.to_path_buf();
            config
        } else {
            let config = Config {
                config_path: config_path.to_path_buf(),
                ..Config::default()
            };
            config.save()?;
            config
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides to config
    pub fn apply_env_overrides(&mut self) {
        // API Key: OPENAI_KEY or OPENAI_API_KEY
        if let Ok(key) = std::env::var("OPENAI_KEY").or_else(|_| std::env::var("OPENAI_API_KEY")) {
            if !key.is_empty() {
                self.generation.api_key = Some(key);
            }
        }

        // Organization: ORGANIZATION_ID or OPENAI_ORGANIZATION
        if let Ok(org) =
            std::env::var("ORGANIZATION_ID").or_else(|_| std::env::var("OPENAI_ORGANIZATION"))
        {
            if !org.is_empty() {
                self.generation.organization = Some(org);
            }
        }

        if let Ok(model) = std::env::var("WABOT_TEXT_MODEL") {
            if !model.is_empty() {
                self.generation.text_model = model;
            }
        }

        if let Ok(path) = std::env::var("WABOT_SESSION_PATH") {
            if !path.is_empty() {
                self.session.credentials_path = PathBuf::from(path);
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=2.0).contains(&self.generation.temperature) {
            anyhow::bail!(
                "generation.temperature must be between 0.0 and 2.0, got {}",
                self.generation.temperature
            );
        }
        if self.generation.image_count == 0 {
            anyhow::bail!("generation.image_count must be at least 1");
        }
        let text = self.commands.text_command.trim();
        let image = self.commands.image_command.trim();
        if text.is_empty() || image.is_empty() {
            anyhow::bail!("command tokens must not be empty");
        }
        if text.contains(char::is_whitespace) || image.contains(char::is_whitespace) {
            anyhow::bail!("command tokens must be a single word");
        }
        if text == image {
            anyhow::bail!("text and image commands must differ (both are `{text}`)");
        }
        Ok(())
    }

    /// Where the running daemon writes its health snapshot.
    pub fn state_file_path(&self) -> PathBuf {
        self.config_path
            .parent()
            .map_or_else(|| PathBuf::from("."), PathBuf::from)
            .join("daemon_state.json")
    }

    pub fn save(&self) -> Result<()> {
        let toml_str = toml::to_string_pretty(self).context("Failed to serialize config")?;

        let parent_dir = self
            .config_path
            .parent()
            .context("Config path must have a parent directory")?;
        fs::create_dir_all(parent_dir).with_context(|| {
            format!(
                "Failed to create config directory: {}",
                parent_dir.display()
            )
        })?;

        let file_name = self
            .config_path
            .file_name()
            .and_then(|v| v.to_str())
            .unwrap_or("config.toml");
        let temp_path = parent_dir.join(format!(".{file_name}.tmp-{}", uuid::Uuid::new_v4()));

        let mut temp_file = OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&temp_path)
            .with_context(|| {
                format!(
                    "Failed to create temporary config file: {}",
                    temp_path.display()
                )
            })?;
        temp_file
            .write_all(toml_str.as_bytes())
            .context("Failed to write temporary config contents")?;
        temp_file
            .sync_all()
            .context("Failed to fsync temporary config file")?;
        drop(temp_file);

        if let Err(e) = fs::rename(&temp_path, &self.config_path) {
            let _ = fs::remove_file(&temp_path);
            anyhow::bail!("Failed to atomically replace config file: {e}");
        }

        sync_directory(parent_dir)
    }
}

#[cfg(unix)]
fn sync_directory(path: &Path) -> Result<()> {
    let dir = File::open(path)
        .with_context(|| format!("Failed to open directory for fsync: {}", path.display()))?;
    dir.sync_all()
        .with_context(|| format!("Failed to fsync directory metadata: {}", path.display()))?;
    Ok(())
}

#[cfg(not(unix))]
fn sync_directory(_path: &Path) -> Result<()> {
    Ok(())
}
