use tracing::{info, warn};

use crate::config::AudioConfig;
use crate::error::BridgeError;
use crate::status::StatusSink;

/// One entry from a backend's device enumeration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Backend-specific index, passed back to `open_input_stream`
    pub index: usize,
    pub name: String,
    pub max_input_channels: u16,
    pub max_output_channels: u16,
}

impl DeviceInfo {
    pub fn is_input(&self) -> bool {
        self.max_input_channels > 0
    }

    /// One-line listing, e.g. `Device 2: BlackHole 16ch (input, output)`
    pub fn describe(&self) -> String {
        let mut roles = Vec::new();
        if self.max_input_channels > 0 {
            roles.push("input");
        }
        if self.max_output_channels > 0 {
            roles.push("output");
        }
        format!("Device {}: {} ({})", self.index, self.name, roles.join(", "))
    }
}

/// Shape of the frames an input stream yields (16-bit PCM, interleaved)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamParams {
    pub sample_rate: u32,
    pub channels: u16,
    /// Samples per channel in one frame
    pub frame_size: usize,
}

impl StreamParams {
    /// Size of one frame in bytes
    pub fn frame_bytes(&self) -> usize {
        self.frame_size * self.channels as usize * 2
    }
}

impl From<&AudioConfig> for StreamParams {
    fn from(config: &AudioConfig) -> Self {
        Self {
            sample_rate: config.sample_rate,
            channels: config.channels,
            frame_size: config.frame_size,
        }
    }
}

/// Audio capture backend
///
/// Implementations:
/// - `CpalAudioSource`: host capture devices (feature `cpal`)
/// - `WavFileSource`: a WAV file posing as a single input device
pub trait AudioSource: Send + Sync {
    /// Backend name for logging
    fn name(&self) -> &str;

    fn list_devices(&self) -> Result<Vec<DeviceInfo>, BridgeError>;

    fn default_input_device(&self) -> Result<Option<DeviceInfo>, BridgeError>;

    fn open_input_stream(
        &self,
        device_index: usize,
        params: StreamParams,
    ) -> Result<Box<dyn InputStream>, BridgeError>;
}

/// An open capture stream. Reads block until a whole frame is available.
pub trait InputStream: Send {
    /// Next frame as PCM16LE bytes
    fn read_frame(&mut self) -> Result<Vec<u8>, BridgeError>;

    /// Release the device. Calling it again is a no-op.
    fn close(&mut self);
}

/// Outcome of matching the preferred device name
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceChoice {
    Preferred(DeviceInfo),
    Fallback(DeviceInfo),
}

impl DeviceChoice {
    pub fn device(&self) -> &DeviceInfo {
        match self {
            DeviceChoice::Preferred(device) | DeviceChoice::Fallback(device) => device,
        }
    }
}

/// Pick the first input-capable device whose name contains `preferred`
/// (case-insensitive), else the default input device.
pub fn select_input_device(
    devices: &[DeviceInfo],
    preferred: &str,
    default: Option<DeviceInfo>,
) -> Result<DeviceChoice, BridgeError> {
    let needle = preferred.to_lowercase();
    if !needle.is_empty() {
        if let Some(device) = devices
            .iter()
            .find(|d| d.is_input() && d.name.to_lowercase().contains(&needle))
        {
            return Ok(DeviceChoice::Preferred(device.clone()));
        }
    }

    default
        .map(DeviceChoice::Fallback)
        .ok_or_else(|| BridgeError::AudioDevice("no input device available".to_string()))
}

/// Choose a device from `devices`, report the choice, and open it
pub fn open_input(
    source: &dyn AudioSource,
    devices: &[DeviceInfo],
    preferred: &str,
    params: StreamParams,
    status: &StatusSink,
) -> Result<(DeviceInfo, Box<dyn InputStream>), BridgeError> {
    let default = match source.default_input_device() {
        Ok(default) => default,
        Err(e) => {
            warn!("Default input device lookup failed: {}", e);
            status.line(format!("⚠️ Could not query default input device: {}", e));
            None
        }
    };

    let choice = select_input_device(devices, preferred, default)?;
    match &choice {
        DeviceChoice::Preferred(device) => {
            status.line(format!("✅ Using {} as input device", device.name));
        }
        DeviceChoice::Fallback(device) => {
            status.line(format!(
                "⚠️ {} not found, using default input device: {}",
                preferred, device.name
            ));
        }
    }

    let device = choice.device().clone();
    let stream = source.open_input_stream(device.index, params)?;

    info!(
        "Audio capture opened on {} via {} ({}Hz, {} channels, {} samples/frame)",
        device.name,
        source.name(),
        params.sample_rate,
        params.channels,
        params.frame_size
    );
    status.line("🎤 Audio capture initialized successfully");

    Ok((device, stream))
}

/// Interleaved i16 samples to little-endian bytes
pub fn samples_to_le_bytes(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}
