use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::config::SessionSettings;
use crate::error::BridgeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Modality {
    Text,
    Audio,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AudioFormat {
    #[serde(rename = "pcm16")]
    Pcm16,
    #[serde(rename = "g711_ulaw")]
    G711Ulaw,
    #[serde(rename = "g711_alaw")]
    G711Alaw,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VadMode {
    ServerVad,
}

/// Server-side turn detection parameters, forwarded as-is
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VadConfig {
    #[serde(rename = "type")]
    pub mode: VadMode,
    /// Activation threshold (0.0 to 1.0)
    pub threshold: f32,
    /// Audio kept before detected speech
    pub prefix_padding_ms: u32,
    /// Silence that ends a turn
    pub silence_duration_ms: u32,
}

/// Parameters sent in `session.update` for one connection attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    pub modalities: BTreeSet<Modality>,
    pub instructions: String,
    pub voice: String,
    pub input_audio_format: AudioFormat,
    pub output_audio_format: AudioFormat,
    pub turn_detection: VadConfig,
    pub temperature: f32,
}

impl SessionConfig {
    /// Build a fresh config from tunables plus the instructions and voice that are
    /// current right now.
    pub fn build(
        settings: &SessionSettings,
        instructions: String,
        voice: String,
    ) -> Result<Self, BridgeError> {
        if !(0.0..=1.0).contains(&settings.vad_threshold) {
            return Err(BridgeError::Config(format!(
                "VAD threshold must be within [0, 1], got {}",
                settings.vad_threshold
            )));
        }

        let modalities: BTreeSet<Modality> = settings.modalities.iter().copied().collect();
        if modalities.is_empty() {
            return Err(BridgeError::Config(
                "at least one session modality is required".to_string(),
            ));
        }

        Ok(Self {
            modalities,
            instructions,
            voice,
            input_audio_format: settings.input_audio_format,
            output_audio_format: settings.output_audio_format,
            turn_detection: VadConfig {
                mode: VadMode::ServerVad,
                threshold: settings.vad_threshold,
                prefix_padding_ms: settings.prefix_padding_ms,
                silence_duration_ms: settings.silence_duration_ms,
            },
            temperature: settings.temperature,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_serializes_to_wire_shape() {
        let config = SessionConfig::build(
            &SessionSettings::default(),
            "Be brief.".to_string(),
            "alloy".to_string(),
        )
        .unwrap();

        let value = serde_json::to_value(&config).unwrap();
        assert_eq!(
            value,
            json!({
                "modalities": ["text"],
                "instructions": "Be brief.",
                "voice": "alloy",
                "input_audio_format": "pcm16",
                "output_audio_format": "pcm16",
                "turn_detection": {
                    "type": "server_vad",
                    "threshold": 0.6f32,
                    "prefix_padding_ms": 300,
                    "silence_duration_ms": 600
                },
                "temperature": 0.6f32
            })
        );
    }

    #[test]
    fn test_duplicate_modalities_collapse() {
        let settings = SessionSettings {
            modalities: vec![Modality::Audio, Modality::Text, Modality::Audio],
            ..SessionSettings::default()
        };
        let config = SessionConfig::build(&settings, String::new(), "alloy".into()).unwrap();
        assert_eq!(config.modalities.len(), 2);
    }

    #[test]
    fn test_threshold_out_of_range_is_config_error() {
        let settings = SessionSettings {
            vad_threshold: 1.5,
            ..SessionSettings::default()
        };
        let result = SessionConfig::build(&settings, String::new(), "alloy".into());
        assert!(matches!(result, Err(BridgeError::Config(_))));
    }

    #[test]
    fn test_empty_modalities_rejected() {
        let settings = SessionSettings {
            modalities: Vec::new(),
            ..SessionSettings::default()
        };
        assert!(SessionConfig::build(&settings, String::new(), "alloy".into()).is_err());
    }
}
