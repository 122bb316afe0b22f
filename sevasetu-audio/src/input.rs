use std::sync::Arc;

use async_trait::async_trait;

use crate::error::CaptureError;

/// Receives mono f32 samples in [-1, 1] as the hardware delivers them.
///
/// Called from the audio thread; implementations must not block.
pub type SampleSink = Arc<dyn Fn(&[f32]) + Send + Sync + 'static>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamFormat {
    pub sample_rate_hz: u32,
}

/// A live hardware input stream. Samples flow into the sink passed to
/// [`AudioSource::acquire`] until `release` is called.
pub trait InputStream: Send {
    fn format(&self) -> StreamFormat;

    /// Stops the stream and gives the device back. Calling it twice is a no-op.
    fn release(&mut self);
}

#[async_trait]
pub trait AudioSource: Send + Sync {
    async fn acquire(&self, sink: SampleSink) -> Result<Box<dyn InputStream>, CaptureError>;
}
