//
// CPAL-backed microphone input.
//
// Supported platforms:
// - Windows
// - macOS
//
// The CPAL stream is not `Send` everywhere, so it lives on a dedicated worker thread
// for its whole life. The audio callback only down-mixes and forwards; the worker
// drains chunks into the sink.

use std::sync::mpsc;
use std::time::Duration;

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, Sample, SampleFormat, SizedSample, Stream};

use crate::error::CaptureError;
use crate::input::{AudioSource, InputStream, SampleSink, StreamFormat};

const WORKER_STARTUP_TIMEOUT: Duration = Duration::from_secs(2);

pub fn list_input_device_names() -> Result<Vec<String>, CaptureError> {
    let host = cpal::default_host();
    let devices = host
        .input_devices()
        .map_err(|e| CaptureError::DeviceUnavailable(e.to_string()))?;

    let mut out = Vec::new();
    for dev in devices {
        if let Ok(name) = dev.name() {
            out.push(name);
        }
    }
    out.sort();
    out.dedup();
    Ok(out)
}

/// Default (or named) system microphone.
#[derive(Debug, Clone, Default)]
pub struct CpalSource {
    device_name: Option<String>,
}

impl CpalSource {
    pub fn new(device_name: Option<String>) -> Self {
        Self { device_name }
    }
}

#[async_trait]
impl AudioSource for CpalSource {
    async fn acquire(&self, sink: SampleSink) -> Result<Box<dyn InputStream>, CaptureError> {
        let name = self.device_name.clone();
        // Opening blocks until the worker reports back.
        let stream = tokio::task::spawn_blocking(move || CpalStream::open(name.as_deref(), sink))
            .await
            .map_err(|e| CaptureError::Worker(e.to_string()))??;
        Ok(Box::new(stream))
    }
}

fn pick_device(device_name: Option<&str>) -> Result<Device, CaptureError> {
    let host = cpal::default_host();

    if let Some(needle) = device_name.map(str::trim).filter(|n| !n.is_empty()) {
        if let Ok(devices) = host.input_devices() {
            for dev in devices {
                if dev.name().is_ok_and(|name| name == needle) {
                    log::info!("Using input device: {needle}");
                    return Ok(dev);
                }
            }
        }
        log::warn!("Preferred input device not found, falling back to default: {needle}");
    }

    host.default_input_device()
        .ok_or(CaptureError::NoInputDevice)
}

enum WorkerMsg {
    Ready,
    Error(CaptureError),
}

struct CpalStream {
    shutdown_tx: Option<mpsc::Sender<()>>,
    worker_handle: Option<std::thread::JoinHandle<()>>,
    sample_rate_hz: u32,
}

impl CpalStream {
    fn open(device_name: Option<&str>, sink: SampleSink) -> Result<Self, CaptureError> {
        let device = pick_device(device_name)?;
        let default_cfg = device.default_input_config().map_err(map_config_error)?;
        let sample_rate_hz = default_cfg.sample_rate().0;

        let (chunk_tx, chunk_rx) = mpsc::channel::<Vec<f32>>();
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let (worker_tx, worker_rx) = mpsc::channel::<WorkerMsg>();

        let worker_handle = std::thread::spawn(move || {
            let config: cpal::StreamConfig = default_cfg.clone().into();
            let channels = default_cfg.channels() as usize;

            let stream = match default_cfg.sample_format() {
                SampleFormat::I16 => build_input_stream::<i16>(&device, &config, channels, chunk_tx),
                SampleFormat::U16 => build_input_stream::<u16>(&device, &config, channels, chunk_tx),
                SampleFormat::I8 => build_input_stream::<i8>(&device, &config, channels, chunk_tx),
                SampleFormat::U8 => build_input_stream::<u8>(&device, &config, channels, chunk_tx),
                SampleFormat::I32 => build_input_stream::<i32>(&device, &config, channels, chunk_tx),
                SampleFormat::U32 => build_input_stream::<u32>(&device, &config, channels, chunk_tx),
                SampleFormat::F64 => build_input_stream::<f64>(&device, &config, channels, chunk_tx),
                _ => build_input_stream::<f32>(&device, &config, channels, chunk_tx),
            };

            let stream: Stream = match stream {
                Ok(s) => s,
                Err(e) => {
                    log::error!("Audio stream build failed: {e}");
                    let _ = worker_tx.send(WorkerMsg::Error(map_build_error(e)));
                    return;
                }
            };

            if let Err(e) = stream.play() {
                log::error!("Audio stream play failed: {e}");
                let _ = worker_tx.send(WorkerMsg::Error(map_play_error(e)));
                return;
            }

            let _ = worker_tx.send(WorkerMsg::Ready);

            run_consumer(chunk_rx, shutdown_rx, sink);
            drop(stream);
        });

        // Block briefly until the worker has either started the stream or failed.
        match worker_rx.recv_timeout(WORKER_STARTUP_TIMEOUT) {
            Ok(WorkerMsg::Ready) => {}
            Ok(WorkerMsg::Error(e)) => return Err(e),
            Err(mpsc::RecvTimeoutError::Timeout) => {
                drop(shutdown_tx);
                return Err(CaptureError::WorkerTimeout);
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => return Err(CaptureError::Channel),
        }

        Ok(Self {
            shutdown_tx: Some(shutdown_tx),
            worker_handle: Some(worker_handle),
            sample_rate_hz,
        })
    }
}

impl InputStream for CpalStream {
    fn format(&self) -> StreamFormat {
        StreamFormat {
            sample_rate_hz: self.sample_rate_hz,
        }
    }

    fn release(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(h) = self.worker_handle.take() {
            let _ = h.join();
        }
    }
}

impl Drop for CpalStream {
    fn drop(&mut self) {
        self.release();
    }
}

fn is_permission_message(msg: &str) -> bool {
    let msg = msg.to_lowercase();
    msg.contains("permission") || msg.contains("access is denied") || msg.contains("not authorized")
}

fn map_config_error(e: cpal::DefaultStreamConfigError) -> CaptureError {
    match e {
        cpal::DefaultStreamConfigError::DeviceNotAvailable => {
            CaptureError::DeviceUnavailable("device not available".into())
        }
        other if is_permission_message(&other.to_string()) => CaptureError::PermissionDenied,
        other => CaptureError::DeviceUnavailable(other.to_string()),
    }
}

fn map_build_error(e: cpal::BuildStreamError) -> CaptureError {
    match e {
        cpal::BuildStreamError::DeviceNotAvailable => {
            CaptureError::DeviceUnavailable("device not available".into())
        }
        other if is_permission_message(&other.to_string()) => CaptureError::PermissionDenied,
        other => CaptureError::Worker(format!("build stream: {other}")),
    }
}

fn map_play_error(e: cpal::PlayStreamError) -> CaptureError {
    match e {
        cpal::PlayStreamError::DeviceNotAvailable => {
            CaptureError::DeviceUnavailable("device not available".into())
        }
        other if is_permission_message(&other.to_string()) => CaptureError::PermissionDenied,
        other => CaptureError::Worker(format!("play stream: {other}")),
    }
}

fn build_input_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    channels: usize,
    chunk_tx: mpsc::Sender<Vec<f32>>,
) -> Result<Stream, cpal::BuildStreamError>
where
    T: Sample + SizedSample + Send + 'static,
    f32: cpal::FromSample<T>,
{
    let cb = move |data: &[T], _: &cpal::InputCallbackInfo| {
        let mono: Vec<f32> = if channels <= 1 {
            data.iter().map(|&s| s.to_sample::<f32>()).collect()
        } else {
            data.chunks_exact(channels)
                .map(|frame| {
                    frame.iter().map(|&s| s.to_sample::<f32>()).sum::<f32>() / channels as f32
                })
                .collect()
        };

        let _ = chunk_tx.send(mono);
    };

    device.build_input_stream(
        config,
        cb,
        |err| {
            // These errors are crucial to debug "recording started but silent".
            log::error!("Audio stream error: {err}");
        },
        None,
    )
}

fn run_consumer(chunk_rx: mpsc::Receiver<Vec<f32>>, shutdown_rx: mpsc::Receiver<()>, sink: SampleSink) {
    loop {
        // A dropped sender counts as shutdown too.
        match shutdown_rx.try_recv() {
            Ok(()) | Err(mpsc::TryRecvError::Disconnected) => return,
            Err(mpsc::TryRecvError::Empty) => {}
        }

        match chunk_rx.recv_timeout(Duration::from_millis(50)) {
            Ok(samples) => sink(&samples),
            Err(mpsc::RecvTimeoutError::Timeout) => continue,
            Err(mpsc::RecvTimeoutError::Disconnected) => return,
        }
    }
}
