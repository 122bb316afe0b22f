use std::io::Cursor;
use std::sync::Arc;

use crate::error::CaptureError;
use crate::input::StreamFormat;
use crate::resample::resample_mono_f32;

pub const WAV_MIME: &str = "audio/wav";

/// A container/codec the pipeline can record into.
pub trait AudioEncoder: Send + Sync {
    fn mime_type(&self) -> &str;

    /// Queried at selection time, every time a recording starts.
    fn is_supported(&self) -> bool;

    fn begin(&self, format: StreamFormat) -> Result<Box<dyn EncoderSession>, CaptureError>;
}

/// Encoder state for one recording. Chunks accumulate until `finish`.
pub trait EncoderSession: Send {
    fn push(&mut self, samples: &[f32]);

    fn finish(self: Box<Self>) -> Result<EncoderOutput, CaptureError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncoderOutput {
    pub bytes: Vec<u8>,
    pub duration_ms: u64,
}

/// 16-bit PCM mono WAV, optionally resampled before writing.
#[derive(Debug, Clone, Default)]
pub struct WavEncoder {
    pub target_sample_rate_hz: Option<u32>,
}

impl WavEncoder {
    pub fn new(target_sample_rate_hz: Option<u32>) -> Self {
        Self {
            target_sample_rate_hz,
        }
    }
}

impl AudioEncoder for WavEncoder {
    fn mime_type(&self) -> &str {
        WAV_MIME
    }

    fn is_supported(&self) -> bool {
        true
    }

    fn begin(&self, format: StreamFormat) -> Result<Box<dyn EncoderSession>, CaptureError> {
        if format.sample_rate_hz == 0 {
            return Err(CaptureError::Encode("input sample rate is zero".into()));
        }
        Ok(Box::new(WavSession {
            input_rate_hz: format.sample_rate_hz,
            target_rate_hz: self.target_sample_rate_hz,
            chunks: Vec::new(),
        }))
    }
}

struct WavSession {
    input_rate_hz: u32,
    target_rate_hz: Option<u32>,
    chunks: Vec<Vec<f32>>,
}

impl EncoderSession for WavSession {
    fn push(&mut self, samples: &[f32]) {
        if !samples.is_empty() {
            self.chunks.push(samples.to_vec());
        }
    }

    fn finish(self: Box<Self>) -> Result<EncoderOutput, CaptureError> {
        let samples: Vec<f32> = self.chunks.concat();
        let duration_ms = samples.len() as u64 * 1000 / self.input_rate_hz as u64;

        let out_rate = self.target_rate_hz.unwrap_or(self.input_rate_hz);
        let samples = resample_mono_f32(&samples, self.input_rate_hz, out_rate)?;

        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: out_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };

        let mut bytes = Vec::new();
        {
            let mut writer = hound::WavWriter::new(Cursor::new(&mut bytes), spec)?;
            for s in samples {
                let v = (s.clamp(-1.0, 1.0) * i16::MAX as f32).round() as i16;
                writer.write_sample(v)?;
            }
            writer.finalize()?;
        }

        Ok(EncoderOutput { bytes, duration_ms })
    }
}

/// Registered encoders in platform-default order.
#[derive(Clone, Default)]
pub struct EncoderRegistry {
    encoders: Vec<Arc<dyn AudioEncoder>>,
}

impl EncoderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the built-in WAV encoder.
    pub fn with_defaults(target_sample_rate_hz: Option<u32>) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(WavEncoder::new(target_sample_rate_hz)));
        registry
    }

    pub fn register(&mut self, encoder: Arc<dyn AudioEncoder>) {
        self.encoders.push(encoder);
    }

    pub fn supported_mime_types(&self) -> Vec<String> {
        self.encoders
            .iter()
            .filter(|e| e.is_supported())
            .map(|e| e.mime_type().to_string())
            .collect()
    }

    /// First supported entry of `preference`, else the first supported encoder.
    pub fn select(&self, preference: &[String]) -> Result<Arc<dyn AudioEncoder>, CaptureError> {
        for wanted in preference {
            let wanted = wanted.trim();
            if let Some(enc) = self
                .encoders
                .iter()
                .find(|e| e.mime_type().eq_ignore_ascii_case(wanted) && e.is_supported())
            {
                return Ok(enc.clone());
            }
        }

        self.encoders
            .iter()
            .find(|e| e.is_supported())
            .cloned()
            .ok_or(CaptureError::NoSupportedEncoder)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NamedEncoder {
        mime: &'static str,
        supported: bool,
    }

    impl AudioEncoder for NamedEncoder {
        fn mime_type(&self) -> &str {
            self.mime
        }

        fn is_supported(&self) -> bool {
            self.supported
        }

        fn begin(&self, format: StreamFormat) -> Result<Box<dyn EncoderSession>, CaptureError> {
            WavEncoder::default().begin(format)
        }
    }

    fn prefs() -> Vec<String> {
        vec!["audio/webm;codecs=opus".into(), "audio/webm".into()]
    }

    #[test]
    fn picks_first_supported_preference() {
        let mut reg = EncoderRegistry::with_defaults(None);
        reg.register(Arc::new(NamedEncoder {
            mime: "audio/webm;codecs=opus",
            supported: false,
        }));
        reg.register(Arc::new(NamedEncoder {
            mime: "audio/webm",
            supported: true,
        }));

        assert_eq!(reg.select(&prefs()).unwrap().mime_type(), "audio/webm");
    }

    #[test]
    fn falls_back_to_platform_default() {
        let reg = EncoderRegistry::with_defaults(Some(16_000));
        assert_eq!(reg.select(&prefs()).unwrap().mime_type(), WAV_MIME);
        assert_eq!(reg.supported_mime_types(), vec![WAV_MIME.to_string()]);
    }

    #[test]
    fn nothing_supported_is_an_error() {
        let mut reg = EncoderRegistry::new();
        reg.register(Arc::new(NamedEncoder {
            mime: "audio/webm",
            supported: false,
        }));
        assert!(matches!(
            reg.select(&prefs()),
            Err(CaptureError::NoSupportedEncoder)
        ));
    }

    #[test]
    fn empty_recording_is_a_valid_wav() {
        let session = WavEncoder::new(Some(16_000))
            .begin(StreamFormat {
                sample_rate_hz: 48_000,
            })
            .unwrap();
        let out = session.finish().unwrap();
        assert_eq!(out.duration_ms, 0);
        assert_eq!(&out.bytes[..4], b"RIFF");

        let reader = hound::WavReader::new(Cursor::new(out.bytes)).unwrap();
        assert_eq!(reader.spec().sample_rate, 16_000);
        assert_eq!(reader.len(), 0);
    }

    #[test]
    fn chunks_are_concatenated_in_order() {
        let mut session = WavEncoder::new(None)
            .begin(StreamFormat {
                sample_rate_hz: 16_000,
            })
            .unwrap();
        session.push(&[0.5; 800]);
        session.push(&[]);
        session.push(&[-0.5; 800]);
        let out = session.finish().unwrap();
        assert_eq!(out.duration_ms, 100);

        let mut reader = hound::WavReader::new(Cursor::new(out.bytes)).unwrap();
        let samples: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(samples.len(), 1600);
        assert!(samples[0] > 0);
        assert!(samples[1599] < 0);
    }

    #[test]
    fn zero_rate_stream_is_rejected() {
        assert!(
            WavEncoder::default()
                .begin(StreamFormat { sample_rate_hz: 0 })
                .is_err()
        );
    }
}
