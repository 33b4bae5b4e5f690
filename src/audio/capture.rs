// Host capture devices through cpal
//
// cpal streams are not Send, so each open stream lives on its own thread that
// owns it until close. The data callback copies samples into a ring buffer and
// `read_frame` pulls whole frames out of the other end.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, StreamConfig};
use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::{HeapCons, HeapRb};
use std::sync::mpsc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

use super::backend::{samples_to_le_bytes, AudioSource, DeviceInfo, InputStream, StreamParams};
use crate::error::BridgeError;

/// Frames of headroom kept in the ring buffer before samples are dropped
const BUFFERED_FRAMES: usize = 16;
const READ_POLL: Duration = Duration::from_millis(2);

pub struct CpalAudioSource {
    host: cpal::Host,
    read_timeout: Duration,
}

impl CpalAudioSource {
    pub fn new(read_timeout: Duration) -> Self {
        let host = cpal::default_host();
        info!("cpal host: {:?}", host.id());
        Self { host, read_timeout }
    }

    fn device_at(&self, index: usize) -> Result<cpal::Device, BridgeError> {
        self.host
            .devices()
            .map_err(device_error)?
            .nth(index)
            .ok_or_else(|| BridgeError::AudioDevice(format!("no device with index {index}")))
    }
}

fn device_error(e: impl std::fmt::Display) -> BridgeError {
    BridgeError::AudioDevice(e.to_string())
}

fn max_channels<I>(configs: Result<I, cpal::SupportedStreamConfigsError>) -> u16
where
    I: Iterator<Item = cpal::SupportedStreamConfigRange>,
{
    configs
        .map(|range| range.map(|c| c.channels()).max().unwrap_or(0))
        .unwrap_or(0)
}

impl AudioSource for CpalAudioSource {
    fn name(&self) -> &str {
        "cpal"
    }

    fn list_devices(&self) -> Result<Vec<DeviceInfo>, BridgeError> {
        let devices = self.host.devices().map_err(device_error)?;
        Ok(devices
            .enumerate()
            .map(|(index, device)| DeviceInfo {
                index,
                name: device.name().unwrap_or_else(|_| format!("device {index}")),
                max_input_channels: max_channels(device.supported_input_configs()),
                max_output_channels: max_channels(device.supported_output_configs()),
            })
            .collect())
    }

    fn default_input_device(&self) -> Result<Option<DeviceInfo>, BridgeError> {
        let Some(default) = self.host.default_input_device() else {
            return Ok(None);
        };
        let default_name = default.name().map_err(device_error)?;

        // Report it with its enumeration index so it can be reopened by index
        Ok(self
            .list_devices()?
            .into_iter()
            .find(|d| d.is_input() && d.name == default_name))
    }

    fn open_input_stream(
        &self,
        device_index: usize,
        params: StreamParams,
    ) -> Result<Box<dyn InputStream>, BridgeError> {
        let device = self.device_at(device_index)?;
        let sample_format = device
            .default_input_config()
            .map_err(device_error)?
            .sample_format();

        let frame_samples = params.frame_size * params.channels as usize;
        if frame_samples == 0 {
            return Err(BridgeError::AudioDevice(format!(
                "frame size {} with {} channels yields empty frames",
                params.frame_size, params.channels
            )));
        }
        let (producer, consumer) = HeapRb::<i16>::new(frame_samples * BUFFERED_FRAMES).split();

        let (ready_tx, ready_rx) = mpsc::sync_channel::<Result<(), BridgeError>>(1);
        let (stop_tx, stop_rx) = mpsc::channel::<()>();

        let thread = std::thread::Builder::new()
            .name("audio-capture".to_string())
            .spawn(move || {
                let config = StreamConfig {
                    channels: params.channels,
                    sample_rate: cpal::SampleRate(params.sample_rate),
                    buffer_size: cpal::BufferSize::Default,
                };
                match build_stream(&device, &config, sample_format, producer) {
                    Ok(stream) => {
                        let _ = ready_tx.send(Ok(()));
                        // Hold the stream until the reader hangs up
                        let _ = stop_rx.recv();
                        drop(stream);
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                    }
                }
            })
            .map_err(device_error)?;

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let _ = thread.join();
                return Err(e);
            }
            Err(_) => {
                let _ = thread.join();
                return Err(BridgeError::AudioDevice(
                    "capture thread exited before the stream started".to_string(),
                ));
            }
        }

        Ok(Box::new(CpalInputStream {
            consumer,
            frame_samples,
            read_timeout: self.read_timeout,
            stop_tx: Some(stop_tx),
            thread: Some(thread),
        }))
    }
}

fn build_stream(
    device: &cpal::Device,
    config: &StreamConfig,
    sample_format: SampleFormat,
    mut producer: ringbuf::HeapProd<i16>,
) -> Result<cpal::Stream, BridgeError> {
    let on_error = |e: cpal::StreamError| error!("Audio stream error: {}", e);

    let stream = match sample_format {
        SampleFormat::I16 => device.build_input_stream(
            config,
            move |data: &[i16], _: &cpal::InputCallbackInfo| {
                // Overflow drops the newest samples rather than blocking the callback
                producer.push_slice(data);
            },
            on_error,
            None,
        ),
        SampleFormat::F32 => device.build_input_stream(
            config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                for &sample in data {
                    let value = (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
                    if producer.try_push(value).is_err() {
                        break;
                    }
                }
            },
            on_error,
            None,
        ),
        other => {
            return Err(BridgeError::AudioDevice(format!(
                "unsupported sample format {other:?}"
            )))
        }
    }
    .map_err(device_error)?;

    stream.play().map_err(device_error)?;
    Ok(stream)
}

struct CpalInputStream {
    consumer: HeapCons<i16>,
    frame_samples: usize,
    read_timeout: Duration,
    stop_tx: Option<mpsc::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl InputStream for CpalInputStream {
    fn read_frame(&mut self) -> Result<Vec<u8>, BridgeError> {
        if self.stop_tx.is_none() {
            return Err(BridgeError::AudioRead("stream is closed".to_string()));
        }

        let deadline = Instant::now() + self.read_timeout;
        while self.consumer.occupied_len() < self.frame_samples {
            if Instant::now() >= deadline {
                return Err(BridgeError::AudioRead(format!(
                    "no full frame within {:?}",
                    self.read_timeout
                )));
            }
            std::thread::sleep(READ_POLL);
        }

        let mut frame = vec![0i16; self.frame_samples];
        let read = self.consumer.pop_slice(&mut frame);
        frame.truncate(read);
        Ok(samples_to_le_bytes(&frame))
    }

    fn close(&mut self) {
        // Dropping the sender wakes the capture thread, which drops the stream
        if self.stop_tx.take().is_none() {
            return;
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("Audio capture thread panicked");
            }
        }
        info!("cpal input stream closed");
    }
}

impl Drop for CpalInputStream {
    fn drop(&mut self) {
        self.close();
    }
}
