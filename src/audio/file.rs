use anyhow::{Context, Result};
use hound::WavReader;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::info;

use super::backend::{samples_to_le_bytes, AudioSource, DeviceInfo, InputStream, StreamParams};
use crate::error::BridgeError;

pub struct AudioFile {
    pub path: String,
    pub duration_seconds: f64,
    pub sample_rate: u32,
    pub channels: u16,
    pub samples: Vec<i16>,
}

impl AudioFile {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening audio file: {}", path.display());

        let reader = WavReader::open(path).context("Failed to open WAV file")?;

        let spec = reader.spec();
        let samples: Vec<i16> = reader
            .into_samples::<i16>()
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to read audio samples")?;

        let duration_seconds =
            samples.len() as f64 / (spec.sample_rate as f64 * spec.channels as f64);

        info!(
            "Audio file loaded: {:.1}s, {}Hz, {} channels, {} samples",
            duration_seconds,
            spec.sample_rate,
            spec.channels,
            samples.len()
        );

        Ok(Self {
            path: path.display().to_string(),
            duration_seconds,
            sample_rate: spec.sample_rate,
            channels: spec.channels,
            samples,
        })
    }
}

/// A WAV file presented as a one-device capture backend
///
/// Frames are paced to real time so the backend sees audio at the rate a
/// microphone would produce it.
pub struct WavFileSource {
    path: PathBuf,
    looping: bool,
    paced: bool,
}

impl WavFileSource {
    pub fn new(path: impl Into<PathBuf>, looping: bool) -> Self {
        Self {
            path: path.into(),
            looping,
            paced: true,
        }
    }

    /// Hand out frames as fast as they are read
    pub fn unpaced(mut self) -> Self {
        self.paced = false;
        self
    }

    fn device(&self) -> DeviceInfo {
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.display().to_string());
        DeviceInfo {
            index: 0,
            name: format!("WAV file: {}", name),
            max_input_channels: 1,
            max_output_channels: 0,
        }
    }
}

impl AudioSource for WavFileSource {
    fn name(&self) -> &str {
        "WAV file"
    }

    fn list_devices(&self) -> Result<Vec<DeviceInfo>, BridgeError> {
        Ok(vec![self.device()])
    }

    fn default_input_device(&self) -> Result<Option<DeviceInfo>, BridgeError> {
        Ok(Some(self.device()))
    }

    fn open_input_stream(
        &self,
        device_index: usize,
        params: StreamParams,
    ) -> Result<Box<dyn InputStream>, BridgeError> {
        if device_index != 0 {
            return Err(BridgeError::AudioDevice(format!(
                "no device with index {device_index}"
            )));
        }

        let audio =
            AudioFile::open(&self.path).map_err(|e| BridgeError::AudioDevice(format!("{e:#}")))?;

        // No resampling: the file has to match what the backend expects
        if audio.sample_rate != params.sample_rate || audio.channels != params.channels {
            return Err(BridgeError::AudioDevice(format!(
                "{} is {}Hz {}ch, expected {}Hz {}ch",
                audio.path, audio.sample_rate, audio.channels, params.sample_rate, params.channels
            )));
        }
        if audio.samples.is_empty() {
            return Err(BridgeError::AudioDevice(format!("{} has no samples", audio.path)));
        }

        let frame_samples = params.frame_size * params.channels as usize;
        if frame_samples == 0 {
            return Err(BridgeError::AudioDevice(format!(
                "frame size {} with {} channels yields empty frames",
                params.frame_size, params.channels
            )));
        }
        let frame_duration =
            Duration::from_secs_f64(params.frame_size as f64 / params.sample_rate as f64);

        Ok(Box::new(WavInputStream {
            samples: audio.samples,
            position: 0,
            frame_samples,
            frame_duration,
            looping: self.looping,
            paced: self.paced,
            next_due: None,
            closed: false,
        }))
    }
}

struct WavInputStream {
    samples: Vec<i16>,
    position: usize,
    frame_samples: usize,
    frame_duration: Duration,
    looping: bool,
    paced: bool,
    next_due: Option<Instant>,
    closed: bool,
}

impl WavInputStream {
    fn pace(&mut self) {
        let now = Instant::now();
        let due = self.next_due.unwrap_or(now);
        if due > now {
            std::thread::sleep(due - now);
        }
        self.next_due = Some(due.max(now) + self.frame_duration);
    }
}

impl InputStream for WavInputStream {
    fn read_frame(&mut self) -> Result<Vec<u8>, BridgeError> {
        if self.closed {
            return Err(BridgeError::AudioRead("stream is closed".to_string()));
        }
        if self.position >= self.samples.len() {
            if !self.looping {
                return Err(BridgeError::InputExhausted);
            }
            self.position = 0;
        }

        if self.paced {
            self.pace();
        }

        let end = (self.position + self.frame_samples).min(self.samples.len());
        let mut frame = self.samples[self.position..end].to_vec();
        // Zero-pad the tail so every frame has the same size
        frame.resize(self.frame_samples, 0);
        self.position = end;

        Ok(samples_to_le_bytes(&frame))
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            info!("WAV input stream closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_wav(path: &Path, sample_rate: u32, samples: &[i16]) {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for &s in samples {
            writer.write_sample(s).unwrap();
        }
        writer.finalize().unwrap();
    }

    fn params(frame_size: usize) -> StreamParams {
        StreamParams {
            sample_rate: 24000,
            channels: 1,
            frame_size,
        }
    }

    #[test]
    fn test_frames_are_fixed_size_and_padded() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("speech.wav");
        write_wav(&path, 24000, &[1, 2, 3, 4, 5]);

        let source = WavFileSource::new(&path, false).unpaced();
        let mut stream = source.open_input_stream(0, params(4))?;

        assert_eq!(stream.read_frame()?, samples_to_le_bytes(&[1, 2, 3, 4]));
        assert_eq!(stream.read_frame()?, samples_to_le_bytes(&[5, 0, 0, 0]));
        assert!(matches!(stream.read_frame(), Err(BridgeError::InputExhausted)));
        // Stays exhausted rather than wrapping around
        assert!(matches!(stream.read_frame(), Err(BridgeError::InputExhausted)));
        Ok(())
    }

    #[test]
    fn test_zero_frame_size_is_rejected() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("speech.wav");
        write_wav(&path, 24000, &[1, 2, 3, 4]);

        let source = WavFileSource::new(&path, false).unpaced();
        let result = source.open_input_stream(0, params(0));
        assert!(matches!(result, Err(BridgeError::AudioDevice(_))));
        Ok(())
    }

    #[test]
    fn test_looping_restarts_from_beginning() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("loop.wav");
        write_wav(&path, 24000, &[7, 8]);

        let source = WavFileSource::new(&path, true).unpaced();
        let mut stream = source.open_input_stream(0, params(2))?;

        assert_eq!(stream.read_frame()?, samples_to_le_bytes(&[7, 8]));
        assert_eq!(stream.read_frame()?, samples_to_le_bytes(&[7, 8]));
        Ok(())
    }

    #[test]
    fn test_sample_rate_mismatch_is_device_error() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("16k.wav");
        write_wav(&path, 16000, &[0; 32]);

        let source = WavFileSource::new(&path, false);
        let result = source.open_input_stream(0, params(4));
        assert!(matches!(result, Err(BridgeError::AudioDevice(_))));
        Ok(())
    }

    #[test]
    fn test_lists_single_input_device_named_after_file() {
        let source = WavFileSource::new("/tmp/meeting.wav", false);
        let devices = source.list_devices().unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].name, "WAV file: meeting.wav");
        assert!(devices[0].is_input());
    }

    #[test]
    fn test_read_after_close_fails() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("speech.wav");
        write_wav(&path, 24000, &[1; 8]);

        let source = WavFileSource::new(&path, false).unpaced();
        let mut stream = source.open_input_stream(0, params(4))?;
        stream.close();
        stream.close();
        assert!(stream.read_frame().is_err());
        Ok(())
    }
}
