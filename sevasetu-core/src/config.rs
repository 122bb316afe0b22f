use serde::{Deserialize, Serialize};

/// Environment variable that overrides [`AppSettings::ws_url`].
pub const WS_URL_ENV: &str = "SEVASETU_WS_URL";

pub const DEFAULT_WS_URL: &str = "ws://localhost:8000/ws";
pub const DEFAULT_LANGUAGE: &str = "Marathi";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    pub ws_url: String,
    pub language: String,
    pub reconnect_delay_ms: u64,
    pub connect_timeout_ms: u64,
    /// How many characters of an outbound frame go into the `ws_send` diagnostic.
    pub send_preview_chars: usize,
    pub diagnostic_capacity: usize,
    pub timeline_capacity: usize,
    pub capture: CaptureSettings,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            ws_url: DEFAULT_WS_URL.into(),
            language: DEFAULT_LANGUAGE.into(),
            reconnect_delay_ms: 1_200,
            connect_timeout_ms: 10_000,
            send_preview_chars: 200,
            diagnostic_capacity: 200,
            timeline_capacity: 60,
            capture: CaptureSettings::default(),
        }
    }
}

impl AppSettings {
    /// Applies overrides from a variable lookup (normally `std::env::var`).
    pub fn with_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(WS_URL_ENV).filter(|s| !s.trim().is_empty()) {
            self.ws_url = url.trim().to_string();
        }
        self
    }

    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|k| std::env::var(k).ok())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureSettings {
    /// Analyser window length in samples.
    pub fft_size: usize,
    /// Peak deviation (normalized [-1, 1]) above which voice is considered present.
    pub voice_threshold: f32,
    pub frame_interval_ms: u64,
    pub waveform_points: usize,
    /// Ordered container/codec preference; the platform default is used after the list.
    pub mime_preference: Vec<String>,
    pub target_sample_rate_hz: Option<u32>,
    pub microphone_device: Option<String>,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            fft_size: 2048,
            voice_threshold: 0.05,
            frame_interval_ms: 16,
            waveform_points: 128,
            mime_preference: vec!["audio/webm;codecs=opus".into(), "audio/webm".into()],
            target_sample_rate_hz: Some(16_000),
            microphone_device: None,
        }
    }
}
