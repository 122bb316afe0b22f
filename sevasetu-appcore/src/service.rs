use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::json;
use tokio::sync::watch;

use sevasetu_audio::{AudioSource, CaptureError, CapturePipeline, EncodedAudio, FrameAnalysis};
use sevasetu_core::{
    AppSettings, Conversation, ConversationChange, DiagnosticEntry, DiagnosticLevel,
    DiagnosticLog, SessionId, TimelineEvent, TtsClip, Turn,
};
use sevasetu_runtime::{ConfigStore, LocalStorage, load_or_create_session_id};
use sevasetu_transport::{AgentClient, ClientConfig, ConnectionState, Subscription};

use crate::playback::{AudioPlayer, decode_clip};

#[cfg(windows)]
const MIC_BLOCKED: &str =
    "Microphone access appears blocked. Check Windows Settings > Privacy & security > Microphone.";

#[cfg(target_os = "macos")]
const MIC_BLOCKED: &str =
    "Microphone access appears blocked. Check System Settings > Privacy & Security > Microphone.";

#[cfg(not(any(windows, target_os = "macos")))]
const MIC_BLOCKED: &str = "Microphone access appears blocked. Allow microphone access and try again.";

pub fn user_facing_audio_error(e: &CaptureError) -> String {
    // Keep messages actionable and short; details are in logs.
    match e {
        CaptureError::NoInputDevice | CaptureError::DeviceUnavailable(_) => {
            "No microphone detected. Check your mic and choose the device in settings.".into()
        }
        CaptureError::PermissionDenied => MIC_BLOCKED.into(),
        CaptureError::AlreadyRecording => "Already listening.".into(),
        CaptureError::Disabled => "Voice input is turned off right now.".into(),
        _ => "Audio recording failed. Check logs for details.".into(),
    }
}

/// Read-only copy of everything a UI renders.
#[derive(Debug, Clone)]
pub struct ServiceSnapshot {
    pub session_id: SessionId,
    pub connection: ConnectionState,
    pub recording: bool,
    pub speaking: bool,
    pub turns: Vec<Turn>,
    pub interim: String,
    pub timeline: Vec<TimelineEvent>,
    pub diagnostics: Vec<DiagnosticEntry>,
}

struct UiState {
    conversation: Conversation,
    diagnostics: DiagnosticLog,
    speaking: bool,
}

fn lock(m: &Mutex<UiState>) -> MutexGuard<'_, UiState> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

/// Wires one capture pipeline, one agent connection and the conversation log together.
pub struct AssistantService {
    client: AgentClient,
    capture: Arc<CapturePipeline>,
    player: Arc<dyn AudioPlayer>,
    state: Arc<Mutex<UiState>>,
    subscriptions: Vec<Subscription>,
}

impl AssistantService {
    pub fn new(
        settings: &AppSettings,
        session_id: SessionId,
        source: Arc<dyn AudioSource>,
        player: Arc<dyn AudioPlayer>,
    ) -> anyhow::Result<Self> {
        let config = ClientConfig::from_settings(settings)?;
        let client = AgentClient::new(config, session_id);

        let state = Arc::new(Mutex::new(UiState {
            conversation: Conversation::new(settings.timeline_capacity),
            diagnostics: DiagnosticLog::with_capacity(settings.diagnostic_capacity),
            speaking: false,
        }));

        let diag_state = state.clone();
        let diag_sub = client.on_diagnostic(move |entry| {
            lock(&diag_state).diagnostics.push(entry.clone());
        });

        // Breaks the client -> handler -> client cycle on drop via `subscriptions`.
        let msg_state = state.clone();
        let msg_client = client.clone();
        let msg_player = player.clone();
        let msg_sub = client.on_message(move |msg| {
            let change = lock(&msg_state).conversation.apply(msg);
            if let ConversationChange::AssistantReplied { tts: Some(clip) } = change {
                play_reply(&msg_client, msg_player.as_ref(), &msg_state, &clip);
            }
        });

        let capture = Arc::new(CapturePipeline::new(source, settings.capture.clone()));
        let send_client = client.clone();
        capture.set_completion_handler(move |audio: &EncodedAudio| {
            send_client.send_audio(&audio.base64, &audio.mime_type);
        });

        Ok(Self {
            client,
            capture,
            player,
            state,
            subscriptions: vec![diag_sub, msg_sub],
        })
    }

    /// Loads settings and the persisted session id from disk, then builds the service.
    pub fn from_paths(
        settings_path: PathBuf,
        storage_path: PathBuf,
        source: Arc<dyn AudioSource>,
        player: Arc<dyn AudioPlayer>,
    ) -> anyhow::Result<Self> {
        let settings = ConfigStore::at_path(settings_path)
            .load_or_default()?
            .with_env_overrides();
        let session_id = load_or_create_session_id(&LocalStorage::at_path(storage_path));
        Self::new(&settings, session_id, source, player)
    }

    pub fn client(&self) -> &AgentClient {
        &self.client
    }

    pub fn session_id(&self) -> &SessionId {
        self.client.session_id()
    }

    /// Opens the agent connection. Must be called from within a Tokio runtime.
    pub fn start(&self) {
        self.client.connect();
    }

    pub fn shutdown(&self) {
        self.capture.cancel();
        self.player.stop();
        lock(&self.state).speaking = false;
        self.client.disconnect();
    }

    pub async fn start_recording(&self) -> Result<(), CaptureError> {
        self.capture.start().await.inspect_err(|e| {
            log::warn!("Capture start failed: {e}");
            self.client.emit_diagnostic(
                DiagnosticLevel::Error,
                "capture_error",
                "Microphone capture failed",
                Some(json!({ "error": e.to_string() })),
            );
        })
    }

    /// Stops capture; the encoded recording is sent to the agent before this returns.
    /// Blocks briefly while the microphone is released, like [`CapturePipeline::stop`].
    pub fn stop_recording(&self) -> Result<Option<EncodedAudio>, CaptureError> {
        self.capture.stop()
    }

    pub fn cancel_recording(&self) {
        self.capture.cancel();
    }

    pub fn set_capture_disabled(&self, disabled: bool) {
        self.capture.set_disabled(disabled);
    }

    pub fn meter(&self) -> watch::Receiver<FrameAnalysis> {
        self.capture.meter()
    }

    pub fn playback_finished(&self) {
        lock(&self.state).speaking = false;
    }

    pub fn clear_diagnostics(&self) {
        lock(&self.state).diagnostics.clear();
    }

    pub fn snapshot(&self) -> ServiceSnapshot {
        let st = lock(&self.state);
        ServiceSnapshot {
            session_id: self.client.session_id().clone(),
            connection: self.client.state(),
            recording: self.capture.is_recording(),
            speaking: st.speaking,
            turns: st.conversation.turns().to_vec(),
            interim: st.conversation.interim().to_string(),
            timeline: st.conversation.timeline().cloned().collect(),
            diagnostics: st.diagnostics.iter().cloned().collect(),
        }
    }
}

impl Drop for AssistantService {
    fn drop(&mut self) {
        for sub in &self.subscriptions {
            sub.unsubscribe();
        }
        self.capture.cancel();
        self.client.disconnect();
    }
}

fn play_reply(client: &AgentClient, player: &dyn AudioPlayer, state: &Mutex<UiState>, clip: &TtsClip) {
    player.stop();
    lock(state).speaking = false;

    let played = decode_clip(clip).and_then(|decoded| player.play(&decoded));
    match played {
        Ok(started) => lock(state).speaking = started,
        Err(e) => client.emit_diagnostic(
            DiagnosticLevel::Warn,
            "tts_playback_blocked",
            "TTS playback blocked",
            Some(json!({ "error": format!("{e:#}"), "mimeType": clip.mime_type })),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audio_errors_map_to_short_messages() {
        assert!(user_facing_audio_error(&CaptureError::NoInputDevice).contains("No microphone"));
        assert!(user_facing_audio_error(&CaptureError::PermissionDenied).contains("blocked"));
        assert_eq!(
            user_facing_audio_error(&CaptureError::Encode("boom".into())),
            "Audio recording failed. Check logs for details."
        );
    }
}
