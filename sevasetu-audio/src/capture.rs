//! Record→stop lifecycle on top of an [`AudioSource`].
//!
//! While recording, every hardware chunk feeds both the analyser window and the
//! encoder. A meter task samples the window once per frame and publishes a
//! [`FrameAnalysis`] on a watch channel. Stopping releases the hardware and cancels the
//! meter before the recording is encoded, so an encoding failure cannot leak the
//! microphone.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use sevasetu_core::CaptureSettings;

use crate::analysis::{AnalyserWindow, FrameAnalysis, analyse_window};
use crate::encoder::{EncoderRegistry, EncoderSession};
use crate::error::CaptureError;
use crate::input::{AudioSource, InputStream, SampleSink};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedAudio {
    /// Standard base64 of the whole container.
    pub base64: String,
    pub mime_type: String,
    pub byte_len: usize,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    Idle,
    Starting,
    Recording,
}

type CompletionHandler = Arc<dyn Fn(&EncodedAudio) + Send + Sync + 'static>;

fn lock<T: ?Sized>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

/// Where hardware chunks go. Chunks that arrive between `acquire` and `begin` are
/// held until the encoder session exists.
enum EncoderSlot {
    Pending(Vec<Vec<f32>>),
    Active(Box<dyn EncoderSession>),
    Finished,
}

struct Shared {
    window: Mutex<AnalyserWindow>,
    encoder: Mutex<EncoderSlot>,
}

impl Shared {
    fn new(fft_size: usize) -> Self {
        Self {
            window: Mutex::new(AnalyserWindow::new(fft_size)),
            encoder: Mutex::new(EncoderSlot::Pending(Vec::new())),
        }
    }

    fn ingest(&self, samples: &[f32]) {
        lock(&self.window).push(samples);
        match &mut *lock(&self.encoder) {
            EncoderSlot::Pending(early) => early.push(samples.to_vec()),
            EncoderSlot::Active(enc) => enc.push(samples),
            EncoderSlot::Finished => {}
        }
    }

    fn install(&self, mut session: Box<dyn EncoderSession>) {
        let mut slot = lock(&self.encoder);
        if let EncoderSlot::Pending(early) = &*slot {
            for chunk in early {
                session.push(chunk);
            }
        }
        *slot = EncoderSlot::Active(session);
    }

    fn take_encoder(&self) -> Option<Box<dyn EncoderSession>> {
        match std::mem::replace(&mut *lock(&self.encoder), EncoderSlot::Finished) {
            EncoderSlot::Active(session) => Some(session),
            EncoderSlot::Pending(_) | EncoderSlot::Finished => None,
        }
    }

    fn snapshot(&self) -> Vec<f32> {
        lock(&self.window).snapshot()
    }
}

/// One acquired stream plus its analysis and encoding state.
///
/// Dropping it releases the hardware and stops the meter.
struct CaptureSession {
    stream: Option<Box<dyn InputStream>>,
    meter: Option<JoinHandle<()>>,
    shared: Arc<Shared>,
    mime_type: String,
    started_at: Instant,
}

impl CaptureSession {
    fn teardown(&mut self) {
        if let Some(meter) = self.meter.take() {
            meter.abort();
        }
        if let Some(mut stream) = self.stream.take() {
            stream.release();
        }
    }

    fn finish(mut self) -> Result<EncodedAudio, CaptureError> {
        self.teardown();

        let session = self
            .shared
            .take_encoder()
            .ok_or_else(|| CaptureError::Encode("encoder already finalized".into()))?;
        let out = session.finish()?;

        log::info!(
            "Capture finished: {} bytes of {} after {:?}",
            out.bytes.len(),
            self.mime_type,
            self.started_at.elapsed()
        );

        Ok(EncodedAudio {
            base64: STANDARD.encode(&out.bytes),
            mime_type: self.mime_type.clone(),
            byte_len: out.bytes.len(),
            duration_ms: out.duration_ms,
        })
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[derive(Default)]
struct PipelineState {
    disabled: bool,
    starting: bool,
    session: Option<CaptureSession>,
}

pub struct CapturePipeline {
    source: Arc<dyn AudioSource>,
    encoders: EncoderRegistry,
    settings: CaptureSettings,
    state: Mutex<PipelineState>,
    meter_tx: watch::Sender<FrameAnalysis>,
    on_complete: Mutex<Option<CompletionHandler>>,
}

impl CapturePipeline {
    pub fn new(source: Arc<dyn AudioSource>, settings: CaptureSettings) -> Self {
        let encoders = EncoderRegistry::with_defaults(settings.target_sample_rate_hz);
        Self::with_encoders(source, encoders, settings)
    }

    pub fn with_encoders(
        source: Arc<dyn AudioSource>,
        encoders: EncoderRegistry,
        settings: CaptureSettings,
    ) -> Self {
        let (meter_tx, _) = watch::channel(FrameAnalysis::default());
        Self {
            source,
            encoders,
            settings,
            state: Mutex::new(PipelineState::default()),
            meter_tx,
            on_complete: Mutex::new(None),
        }
    }

    /// Called with every finished recording, after the hardware has been released.
    pub fn set_completion_handler<F>(&self, handler: F)
    where
        F: Fn(&EncodedAudio) + Send + Sync + 'static,
    {
        *lock(&self.on_complete) = Some(Arc::new(handler));
    }

    pub fn state(&self) -> CaptureState {
        let st = lock(&self.state);
        if st.session.is_some() {
            CaptureState::Recording
        } else if st.starting {
            CaptureState::Starting
        } else {
            CaptureState::Idle
        }
    }

    pub fn is_recording(&self) -> bool {
        self.state() == CaptureState::Recording
    }

    /// Live voice-activity signal; resets to silence when recording ends.
    pub fn meter(&self) -> watch::Receiver<FrameAnalysis> {
        self.meter_tx.subscribe()
    }

    /// One analysis pass over the current window, for hosts that drive their own
    /// frame callback instead of watching [`Self::meter`].
    pub fn analyse_now(&self) -> Option<FrameAnalysis> {
        let st = lock(&self.state);
        let session = st.session.as_ref()?;
        Some(analyse_window(
            &session.shared.snapshot(),
            self.settings.voice_threshold,
            self.settings.waveform_points,
        ))
    }

    /// Disabling cancels any recording in progress; see [`Self::cancel`].
    pub fn set_disabled(&self, disabled: bool) {
        lock(&self.state).disabled = disabled;
        if disabled {
            self.cancel();
        }
    }

    pub fn is_disabled(&self) -> bool {
        lock(&self.state).disabled
    }

    /// Acquires the microphone and starts recording.
    ///
    /// Device and permission failures are returned to the caller as-is.
    pub async fn start(&self) -> Result<(), CaptureError> {
        {
            let mut st = lock(&self.state);
            if st.disabled {
                return Err(CaptureError::Disabled);
            }
            if st.session.is_some() || st.starting {
                return Err(CaptureError::AlreadyRecording);
            }
            st.starting = true;
        }
        let _starting = StartingGuard(&self.state);

        let encoder = self.encoders.select(&self.settings.mime_preference)?;

        let shared = Arc::new(Shared::new(self.settings.fft_size));
        let sink_shared = shared.clone();
        let sink: SampleSink = Arc::new(move |samples: &[f32]| sink_shared.ingest(samples));

        let stream = self.source.acquire(sink).await?;
        let format = stream.format();

        let mut session = CaptureSession {
            stream: Some(stream),
            meter: None,
            shared: shared.clone(),
            mime_type: encoder.mime_type().to_string(),
            started_at: Instant::now(),
        };

        // On error `session` drops here and releases the stream.
        shared.install(encoder.begin(format)?);

        session.meter = Some(tokio::spawn(run_meter(
            shared,
            self.meter_tx.clone(),
            Duration::from_millis(self.settings.frame_interval_ms.max(1)),
            self.settings.voice_threshold,
            self.settings.waveform_points,
        )));

        let mut st = lock(&self.state);
        if st.disabled {
            drop(st);
            drop(session);
            self.meter_tx.send_replace(FrameAnalysis::default());
            return Err(CaptureError::Disabled);
        }

        log::info!(
            "Capture started: {} Hz input, encoding as {}",
            format.sample_rate_hz,
            session.mime_type
        );
        st.session = Some(session);
        Ok(())
    }

    /// Ends the recording and hands the encoded artifact to the completion handler.
    ///
    /// Returns `Ok(None)` without touching the handler when nothing is recording.
    ///
    /// Releasing the hardware is synchronous: the CPAL backend joins its worker
    /// thread, which can take up to one 50 ms poll. Async callers on a busy runtime
    /// may want to run this under `tokio::task::spawn_blocking`.
    pub fn stop(&self) -> Result<Option<EncodedAudio>, CaptureError> {
        let Some(session) = lock(&self.state).session.take() else {
            return Ok(None);
        };

        let result = session.finish();
        self.meter_tx.send_replace(FrameAnalysis::default());
        let encoded = result?;

        let handler = lock(&self.on_complete).clone();
        if let Some(handler) = handler {
            handler(&encoded);
        }
        Ok(Some(encoded))
    }

    /// Drops the current recording, if any, without encoding it. Blocks on hardware
    /// release the same way [`Self::stop`] does.
    pub fn cancel(&self) {
        let session = lock(&self.state).session.take();
        if let Some(session) = session {
            drop(session);
            self.meter_tx.send_replace(FrameAnalysis::default());
            log::info!("Capture cancelled");
        }
    }
}

struct StartingGuard<'a>(&'a Mutex<PipelineState>);

impl Drop for StartingGuard<'_> {
    fn drop(&mut self) {
        lock(self.0).starting = false;
    }
}

async fn run_meter(
    shared: Arc<Shared>,
    tx: watch::Sender<FrameAnalysis>,
    period: Duration,
    voice_threshold: f32,
    waveform_points: usize,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;
        let window = shared.snapshot();
        let frame = analyse_window(&window, voice_threshold, waveform_points);
        tx.send_if_modified(|current| {
            if *current == frame {
                false
            } else {
                *current = frame;
                true
            }
        });
    }
}
