//! Microphone capture: hardware input behind a small seam, a live amplitude meter for
//! voice-activity feedback, and encoding of one recording into a base64 payload.

pub mod analysis;
pub mod capture;
pub mod encoder;
pub mod error;
pub mod input;
pub mod resample;

// Hardware capture is only wired up on the desktop targets we ship.
#[cfg(any(windows, target_os = "macos"))]
pub mod cpal_input;

pub use analysis::{AnalyserWindow, FrameAnalysis, analyse_window, compute_levels};
pub use capture::{CapturePipeline, CaptureState, EncodedAudio};
pub use encoder::{
    AudioEncoder, EncoderOutput, EncoderRegistry, EncoderSession, WAV_MIME, WavEncoder,
};
pub use error::CaptureError;
pub use input::{AudioSource, InputStream, SampleSink, StreamFormat};

#[cfg(any(windows, target_os = "macos"))]
pub use cpal_input::{CpalSource, list_input_device_names};
