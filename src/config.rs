use anyhow::Result;
use serde::Deserialize;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use crate::error::BridgeError;
use crate::session::{AudioFormat, Modality};

pub const DEFAULT_BASE_URL: &str = "wss://api.openai.com/v1/realtime";
pub const DEFAULT_MODEL: &str = "gpt-4o-realtime-preview-2024-10-01";
pub const DEFAULT_VOICE: &str = "alloy";

pub const DEFAULT_PROMPT: &str = "You are a helpful assistant providing real-time responses to the user's questions.
IMPORTANT: Do not respond until the user has asked a complete question or given a command.
Listen carefully to the user's voice input and only reply when they have finished speaking.
Keep your answers concise and relevant.";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub audio: AudioConfig,
    pub session: SessionSettings,
    pub transport: TransportConfig,
    pub supervisor: SupervisorConfig,
    pub prompt: PromptConfig,
    pub http: HttpConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Case-insensitive substring of the preferred capture device name
    pub preferred_device: String,
    pub sample_rate: u32,
    pub channels: u16,
    /// Samples per channel in one frame
    pub frame_size: usize,
    /// Pause between frame reads
    pub frame_interval_ms: u64,
    /// Pause after a failed frame read before retrying
    pub read_error_pause_ms: u64,
    /// Give up on the device after this many consecutive read failures.
    /// Unset means retry forever.
    pub max_consecutive_read_errors: Option<u32>,
    /// Longest a device read may wait for a full frame
    pub read_timeout_ms: u64,
    /// Use a WAV file instead of a capture device
    pub wav_path: Option<String>,
    /// Restart the WAV file when it runs out
    pub wav_loop: bool,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            preferred_device: "BlackHole 16ch".to_string(),
            sample_rate: 24000, // Realtime API expects 24kHz PCM16
            channels: 1,        // Mono
            frame_size: 1024,
            frame_interval_ms: 10,
            read_error_pause_ms: 500,
            max_consecutive_read_errors: None,
            read_timeout_ms: 2000,
            wav_path: None,
            wav_loop: false,
        }
    }
}

impl AudioConfig {
    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms)
    }

    pub fn read_error_pause(&self) -> Duration {
        Duration::from_millis(self.read_error_pause_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

/// Tunables forwarded into every `session.update`
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    pub modalities: Vec<Modality>,
    pub temperature: f32,
    pub input_audio_format: AudioFormat,
    pub output_audio_format: AudioFormat,
    pub vad_threshold: f32,
    pub prefix_padding_ms: u32,
    pub silence_duration_ms: u32,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            modalities: vec![Modality::Text],
            temperature: 0.6,
            input_audio_format: AudioFormat::Pcm16,
            output_audio_format: AudioFormat::Pcm16,
            vad_threshold: 0.6,
            prefix_padding_ms: 300,
            silence_duration_ms: 600,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Validate the server certificate and host name during the TLS handshake
    pub verify_tls: bool,
    pub connect_timeout_secs: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            verify_tls: true,
            connect_timeout_secs: 15,
        }
    }
}

impl TransportConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// How often the stop-watch and backoff sleeps look at the run flag
    pub stop_poll_ms: u64,
    /// Backoff after the connection was closed
    pub closed_backoff_ms: u64,
    /// Backoff after any other failure
    pub error_backoff_ms: u64,
    /// How long `stop()` waits for the worker to wind down
    pub drain_timeout_ms: u64,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            stop_poll_ms: 200,
            closed_backoff_ms: 3000,
            error_backoff_ms: 2000,
            drain_timeout_ms: 1000,
        }
    }
}

impl SupervisorConfig {
    pub fn stop_poll(&self) -> Duration {
        Duration::from_millis(self.stop_poll_ms)
    }

    pub fn closed_backoff(&self) -> Duration {
        Duration::from_millis(self.closed_backoff_ms)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_millis(self.error_backoff_ms)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PromptConfig {
    pub path: String,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            path: "prompt.txt".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub bind: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: 8787,
        }
    }
}

impl Config {
    /// Load defaults, then `path` (any format the config crate knows, optional),
    /// then `LOQA_BRIDGE__SECTION__KEY` environment overrides.
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(
                config::Environment::with_prefix("LOQA_BRIDGE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that can't produce an audio frame
    pub fn validate(&self) -> Result<()> {
        if self.audio.sample_rate == 0 {
            anyhow::bail!("audio.sample_rate must be greater than zero");
        }
        if self.audio.channels == 0 {
            anyhow::bail!("audio.channels must be greater than zero");
        }
        if self.audio.frame_size == 0 {
            anyhow::bail!("audio.frame_size must be greater than zero");
        }
        Ok(())
    }
}

/// Where to connect and with which credentials
#[derive(Clone, Deserialize)]
pub struct EndpointParams {
    pub base_url: String,
    pub model: String,
    pub voice: String,
    pub api_key: String,
}

impl fmt::Debug for EndpointParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EndpointParams")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("voice", &self.voice)
            .field("api_key", &"<redacted>")
            .finish()
    }
}

impl EndpointParams {
    /// Read `OPENAI_API_KEY`, `OPENAI_MODEL`, `OPENAI_BASE_URL` and `OPENAI_VOICE`
    pub fn from_env() -> Result<Self, BridgeError> {
        let settings = config::Config::builder()
            .set_default("base_url", DEFAULT_BASE_URL)
            .and_then(|b| b.set_default("model", DEFAULT_MODEL))
            .and_then(|b| b.set_default("voice", DEFAULT_VOICE))
            .and_then(|b| b.set_default("api_key", ""))
            .map_err(|e| BridgeError::Config(e.to_string()))?
            .add_source(config::Environment::with_prefix("OPENAI"))
            .build()
            .map_err(|e| BridgeError::Config(e.to_string()))?;

        settings
            .try_deserialize()
            .map_err(|e| BridgeError::Config(e.to_string()))
    }

    pub fn validate(&self) -> Result<(), BridgeError> {
        if self.api_key.trim().is_empty() {
            return Err(BridgeError::Config(
                "OpenAI API key is missing. Please set the OPENAI_API_KEY environment variable."
                    .to_string(),
            ));
        }
        if self.base_url.trim().is_empty() {
            return Err(BridgeError::Config("realtime base URL is empty".to_string()));
        }
        if self.model.trim().is_empty() {
            return Err(BridgeError::Config("realtime model is empty".to_string()));
        }
        Ok(())
    }

    /// Keys that don't look like `sk-...` still get a chance to connect
    pub fn key_looks_unusual(&self) -> bool {
        !self.api_key.starts_with("sk-") || self.api_key.len() < 20
    }

    /// WebSocket URL with the model query parameter
    pub fn realtime_url(&self) -> String {
        let base = self.base_url.trim();
        let separator = if base.contains('?') { '&' } else { '?' };
        format!("{}{}model={}", base, separator, self.model.trim())
    }

    /// REST model listing next to the realtime endpoint, used to check the key
    pub fn models_url(&self) -> Result<String, BridgeError> {
        let base = self.base_url.trim();
        let base = base.split('?').next().unwrap_or(base).trim_end_matches('/');

        let rest = if let Some(rest) = base.strip_prefix("wss://") {
            format!("https://{rest}")
        } else if let Some(rest) = base.strip_prefix("ws://") {
            format!("http://{rest}")
        } else if base.starts_with("https://") || base.starts_with("http://") {
            base.to_string()
        } else {
            return Err(BridgeError::Config(format!(
                "unsupported realtime URL scheme: {base}"
            )));
        };

        Ok(match rest.strip_suffix("/realtime") {
            Some(prefix) => format!("{prefix}/models"),
            None => format!("{rest}/models"),
        })
    }
}

/// Source of per-attempt connection parameters and instructions
pub trait ConfigProvider: Send + Sync {
    /// Current instruction text; read fresh for every connection attempt
    fn load_instructions(&self) -> String;

    fn load_endpoint_params(&self) -> Result<EndpointParams, BridgeError>;

    /// Replace the instruction text used from the next attempt on
    fn save_instructions(&self, _text: &str) -> Result<(), BridgeError> {
        Err(BridgeError::Config("instructions are read-only".to_string()))
    }
}

/// Instructions from a prompt file, endpoint from `OPENAI_*` variables
pub struct EnvConfigProvider {
    prompt_path: PathBuf,
}

impl EnvConfigProvider {
    pub fn new(prompt_path: impl Into<PathBuf>) -> Self {
        Self {
            prompt_path: prompt_path.into(),
        }
    }

    pub fn prompt_path(&self) -> &Path {
        &self.prompt_path
    }
}

impl ConfigProvider for EnvConfigProvider {
    fn load_instructions(&self) -> String {
        load_prompt(&self.prompt_path)
    }

    fn load_endpoint_params(&self) -> Result<EndpointParams, BridgeError> {
        EndpointParams::from_env()
    }

    fn save_instructions(&self, text: &str) -> Result<(), BridgeError> {
        save_prompt(&self.prompt_path, text)
    }
}

/// Read the prompt file. Missing or empty files fall back to the default prompt,
/// and a missing file is created with it so there is something to edit.
pub fn load_prompt(path: &Path) -> String {
    if path.exists() {
        match fs::read_to_string(path) {
            Ok(text) => {
                let prompt = text.trim();
                if !prompt.is_empty() {
                    return prompt.to_string();
                }
            }
            Err(e) => warn!("Error reading prompt file {}: {}", path.display(), e),
        }
        return DEFAULT_PROMPT.to_string();
    }

    let created = path
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .map(fs::create_dir_all)
        .unwrap_or(Ok(()))
        .and_then(|_| fs::write(path, DEFAULT_PROMPT));
    match created {
        Ok(()) => info!("Created default prompt file at {}", path.display()),
        Err(e) => warn!("Error creating prompt file {}: {}", path.display(), e),
    }

    DEFAULT_PROMPT.to_string()
}

/// Write the prompt file as given, creating its directory if needed
pub fn save_prompt(path: &Path, text: &str) -> Result<(), BridgeError> {
    if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        fs::create_dir_all(dir)
            .map_err(|e| BridgeError::Config(format!("creating {}: {e}", dir.display())))?;
    }
    fs::write(path, text)
        .map_err(|e| BridgeError::Config(format!("writing {}: {e}", path.display())))?;
    info!("Saved prompt to {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn endpoint(api_key: &str) -> EndpointParams {
        EndpointParams {
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            voice: DEFAULT_VOICE.to_string(),
            api_key: api_key.to_string(),
        }
    }

    #[test]
    fn test_defaults_match_realtime_api() {
        let config = Config::default();
        assert_eq!(config.audio.sample_rate, 24000);
        assert_eq!(config.audio.channels, 1);
        assert_eq!(config.audio.frame_size, 1024);
        assert!(config.transport.verify_tls);
        assert_eq!(config.supervisor.closed_backoff(), Duration::from_secs(3));
        assert_eq!(config.supervisor.error_backoff(), Duration::from_secs(2));
    }

    #[test]
    fn test_load_reads_toml_overrides() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("bridge.toml");
        fs::write(
            &path,
            "[audio]\npreferred_device = \"Loopback\"\nframe_size = 512\n\n[transport]\nverify_tls = false\n",
        )?;

        let config = Config::load(path.to_str().unwrap())?;
        assert_eq!(config.audio.preferred_device, "Loopback");
        assert_eq!(config.audio.frame_size, 512);
        assert_eq!(config.audio.sample_rate, 24000);
        assert!(!config.transport.verify_tls);
        Ok(())
    }

    #[test]
    fn test_load_without_file_uses_defaults() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("missing");
        let config = Config::load(path.to_str().unwrap())?;
        assert_eq!(config.prompt.path, "prompt.txt");
        Ok(())
    }

    #[test]
    fn test_load_rejects_zero_frame_size() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("bridge.toml");
        fs::write(&path, "[audio]\nframe_size = 0\n")?;

        let err = Config::load(path.to_str().unwrap()).unwrap_err();
        assert!(err.to_string().contains("frame_size"));
        Ok(())
    }

    #[test]
    fn test_validate_rejects_zero_channels() {
        let mut config = Config::default();
        config.audio.channels = 0;
        assert!(config.validate().is_err());
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_models_url_sits_next_to_realtime() -> Result<()> {
        let mut params = endpoint("sk-0123456789abcdefghij");
        assert_eq!(params.models_url()?, "https://api.openai.com/v1/models");

        params.base_url = "ws://127.0.0.1:9000/v1/realtime?region=eu".to_string();
        assert_eq!(params.models_url()?, "http://127.0.0.1:9000/v1/models");

        params.base_url = "ftp://example.com".to_string();
        assert!(matches!(params.models_url(), Err(BridgeError::Config(_))));
        Ok(())
    }

    #[test]
    fn test_realtime_url_appends_model() {
        let mut params = endpoint("sk-0123456789abcdefghij");
        assert_eq!(
            params.realtime_url(),
            "wss://api.openai.com/v1/realtime?model=gpt-4o-realtime-preview-2024-10-01"
        );

        params.base_url = "wss://proxy.local/rt?region=eu".to_string();
        params.model = "m".to_string();
        assert_eq!(params.realtime_url(), "wss://proxy.local/rt?region=eu&model=m");
    }

    #[test]
    fn test_validate_rejects_blank_key() {
        assert!(matches!(
            endpoint("   ").validate(),
            Err(BridgeError::Config(_))
        ));
        assert!(endpoint("sk-0123456789abcdefghij").validate().is_ok());
    }

    #[test]
    fn test_unusual_key_detection() {
        assert!(endpoint("abc").key_looks_unusual());
        assert!(endpoint("sk-short").key_looks_unusual());
        assert!(!endpoint("sk-0123456789abcdefghij").key_looks_unusual());
    }

    #[test]
    fn test_debug_redacts_api_key() {
        let rendered = format!("{:?}", endpoint("sk-secret-value-123456"));
        assert!(!rendered.contains("sk-secret"));
    }

    #[test]
    fn test_missing_prompt_file_is_created_with_default() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("nested").join("prompt.txt");

        let prompt = load_prompt(&path);
        assert_eq!(prompt, DEFAULT_PROMPT);
        assert_eq!(fs::read_to_string(&path)?, DEFAULT_PROMPT);
        Ok(())
    }

    #[test]
    fn test_prompt_file_is_trimmed_and_empty_falls_back() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("prompt.txt");

        fs::write(&path, "  Answer in French.\n")?;
        assert_eq!(load_prompt(&path), "Answer in French.");

        fs::write(&path, "\n\n")?;
        assert_eq!(load_prompt(&path), DEFAULT_PROMPT);
        Ok(())
    }

    #[test]
    fn test_saved_prompt_is_used_by_next_load() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("prompts").join("prompt.txt");
        let provider = EnvConfigProvider::new(&path);

        provider.save_instructions("Only answer questions about the roadmap.")?;
        assert_eq!(
            provider.load_instructions(),
            "Only answer questions about the roadmap."
        );
        Ok(())
    }

    #[test]
    fn test_provider_rereads_prompt_each_call() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("prompt.txt");
        let provider = EnvConfigProvider::new(&path);

        fs::write(&path, "first")?;
        assert_eq!(provider.load_instructions(), "first");
        fs::write(&path, "second")?;
        assert_eq!(provider.load_instructions(), "second");
        Ok(())
    }
}
