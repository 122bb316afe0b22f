#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("microphone permission denied")]
    PermissionDenied,

    #[error("no input device found")]
    NoInputDevice,

    #[error("input device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("already recording")]
    AlreadyRecording,

    #[error("capture is disabled")]
    Disabled,

    #[error("no supported audio encoder")]
    NoSupportedEncoder,

    #[error("failed to encode audio: {0}")]
    Encode(String),

    #[error("failed to resample: {0}")]
    Resample(#[from] anyhow::Error),

    #[error("audio worker failed: {0}")]
    Worker(String),

    #[error("audio worker startup timeout")]
    WorkerTimeout,

    #[error("internal channel error")]
    Channel,
}

impl CaptureError {
    /// Errors that need the user to fix something (grant access, plug a mic in)
    /// before a retry can succeed.
    pub fn needs_user_action(&self) -> bool {
        matches!(
            self,
            CaptureError::PermissionDenied
                | CaptureError::NoInputDevice
                | CaptureError::DeviceUnavailable(_)
        )
    }
}

impl From<hound::Error> for CaptureError {
    fn from(e: hound::Error) -> Self {
        CaptureError::Encode(e.to_string())
    }
}
