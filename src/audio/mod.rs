pub mod backend;
pub mod file;

#[cfg(feature = "cpal")]
pub mod capture;

pub use backend::{
    open_input, samples_to_le_bytes, select_input_device, AudioSource, DeviceChoice, DeviceInfo,
    InputStream, StreamParams,
};
pub use file::{AudioFile, WavFileSource};

#[cfg(feature = "cpal")]
pub use capture::CpalAudioSource;
