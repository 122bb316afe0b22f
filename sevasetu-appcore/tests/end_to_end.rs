use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

use sevasetu_appcore::{AssistantService, AudioPlayer, DecodedClip, NoopPlayer};
use sevasetu_audio::{AudioSource, CaptureError, InputStream, SampleSink, StreamFormat};
use sevasetu_core::{AppSettings, DiagnosticLevel, Role, SessionId};
use sevasetu_transport::ConnectionState;

#[derive(Default)]
struct FakeMic {
    sink: Mutex<Option<SampleSink>>,
    deny: bool,
}

impl FakeMic {
    fn feed(&self, samples: &[f32]) {
        let sink = self.sink.lock().unwrap().clone();
        if let Some(sink) = sink {
            sink(samples);
        }
    }
}

struct FakeStream;

impl InputStream for FakeStream {
    fn format(&self) -> StreamFormat {
        StreamFormat {
            sample_rate_hz: 16_000,
        }
    }

    fn release(&mut self) {}
}

#[async_trait]
impl AudioSource for FakeMic {
    async fn acquire(&self, sink: SampleSink) -> Result<Box<dyn InputStream>, CaptureError> {
        if self.deny {
            return Err(CaptureError::PermissionDenied);
        }
        *self.sink.lock().unwrap() = Some(sink);
        Ok(Box::new(FakeStream))
    }
}

#[derive(Default)]
struct RecordingPlayer {
    clips: Mutex<Vec<DecodedClip>>,
    stops: Mutex<usize>,
}

impl AudioPlayer for RecordingPlayer {
    fn play(&self, clip: &DecodedClip) -> anyhow::Result<bool> {
        self.clips.lock().unwrap().push(clip.clone());
        Ok(true)
    }

    fn stop(&self) {
        *self.stops.lock().unwrap() += 1;
    }
}

/// Scripted agent: after `hello` it sends `script`, then forwards every frame it
/// receives (including the hello) to the returned channel.
async fn spawn_agent(script: Vec<Value>) -> (SocketAddr, mpsc::UnboundedReceiver<Value>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();

        if let Some(Ok(Message::Text(hello))) = ws.next().await {
            let _ = tx.send(serde_json::from_str::<Value>(hello.as_str()).unwrap());
        }
        for frame in script {
            ws.send(Message::Text(frame.to_string().into())).await.unwrap();
        }
        while let Some(Ok(msg)) = ws.next().await {
            if let Message::Text(t) = msg {
                let _ = tx.send(serde_json::from_str::<Value>(t.as_str()).unwrap());
            }
        }
    });

    (addr, rx)
}

fn settings_for(addr: SocketAddr) -> AppSettings {
    AppSettings {
        ws_url: format!("ws://{addr}/ws"),
        reconnect_delay_ms: 100,
        ..AppSettings::default()
    }
}

fn session() -> SessionId {
    SessionId::parse("sess_e2e00001").unwrap()
}

async fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    for _ in 0..300 {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cond()
}

#[tokio::test]
async fn reply_flow_builds_one_user_and_one_assistant_turn() {
    let transcript = "मला शिष्यवृत्ती हवी आहे";
    let tts = STANDARD.encode(b"RIFF\x24\x00\x00\x00WAVE");
    let (addr, mut frames) = spawn_agent(vec![
        json!({"type": "hello_ack"}),
        json!({"type": "stt_result", "text": transcript, "confidence": 0.92}),
        json!({"type": "stt_result", "text": transcript, "confidence": 0.95}),
        json!({"type": "agent_event", "event": "AGENT_START"}),
        json!({
            "type": "assistant_message",
            "text": "तुम्ही पात्र असू शकता.",
            "ui": {
                "cards": [{"scheme_id": "sch-001", "title": "Scholarship"}],
                "ui_intent": "chat"
            },
            "ttsAudioB64": tts,
            "ttsMime": "audio/wav"
        }),
    ])
    .await;

    let player = Arc::new(RecordingPlayer::default());
    let service = AssistantService::new(
        &settings_for(addr),
        session(),
        Arc::new(FakeMic::default()),
        player.clone(),
    )
    .unwrap();
    service.start();

    let hello = tokio::time::timeout(Duration::from_secs(2), frames.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(hello["type"], "hello");
    assert_eq!(hello["sessionId"], "sess_e2e00001");

    assert!(wait_until(|| service.snapshot().turns.len() == 2).await);

    let snap = service.snapshot();
    assert_eq!(snap.connection, ConnectionState::Open);
    assert_eq!(snap.turns[0].role, Role::User);
    assert_eq!(snap.turns[0].text, transcript);
    assert_eq!(snap.turns[1].role, Role::Assistant);
    assert_eq!(snap.turns[1].cards.len(), 1);
    assert_eq!(snap.turns[1].cards[0].title(), Some("Scholarship"));
    assert!(snap.interim.is_empty());
    assert!(snap.speaking);
    assert!(snap.diagnostics.iter().any(|d| d.event == "ws_open"));

    let clips = player.clips.lock().unwrap().clone();
    assert_eq!(clips.len(), 1);
    assert_eq!(&clips[0].bytes[..4], b"RIFF");

    service.playback_finished();
    assert!(!service.snapshot().speaking);

    service.shutdown();
    assert_eq!(service.snapshot().connection, ConnectionState::Disconnected);
}

#[tokio::test]
async fn silent_player_never_reports_speaking() {
    let tts = STANDARD.encode(b"RIFF\x24\x00\x00\x00WAVE");
    let (addr, _frames) = spawn_agent(vec![json!({
        "type": "assistant_message",
        "text": "नमस्कार",
        "ttsAudioB64": tts,
        "ttsMime": "audio/wav"
    })])
    .await;

    let service = AssistantService::new(
        &settings_for(addr),
        session(),
        Arc::new(FakeMic::default()),
        Arc::new(NoopPlayer),
    )
    .unwrap();
    service.start();

    assert!(wait_until(|| service.snapshot().turns.len() == 1).await);
    let snap = service.snapshot();
    assert!(!snap.speaking);
    assert!(!snap.diagnostics.iter().any(|d| d.event == "tts_playback_blocked"));
}

#[tokio::test]
async fn undecodable_speech_is_reported_without_dropping_the_session() {
    let (addr, _frames) = spawn_agent(vec![json!({
        "type": "assistant_message",
        "text": "नमस्कार",
        "ttsAudioB64": "%%% not base64 %%%"
    })])
    .await;

    let service = AssistantService::new(
        &settings_for(addr),
        session(),
        Arc::new(FakeMic::default()),
        Arc::new(NoopPlayer),
    )
    .unwrap();
    service.start();

    assert!(wait_until(|| service.snapshot().turns.len() == 1).await);
    assert!(
        wait_until(|| service
            .snapshot()
            .diagnostics
            .iter()
            .any(|d| d.event == "tts_playback_blocked" && d.level == DiagnosticLevel::Warn))
        .await
    );

    let snap = service.snapshot();
    assert!(!snap.speaking);
    assert_eq!(snap.connection, ConnectionState::Open);
}

#[tokio::test]
async fn finished_recording_is_sent_as_an_audio_frame() {
    let (addr, mut frames) = spawn_agent(vec![json!({"type": "hello_ack"})]).await;
    let mic = Arc::new(FakeMic::default());
    let service = AssistantService::new(
        &settings_for(addr),
        session(),
        mic.clone(),
        Arc::new(NoopPlayer),
    )
    .unwrap();
    service.start();
    assert!(wait_until(|| service.snapshot().connection == ConnectionState::Open).await);
    let _hello = frames.recv().await.unwrap();

    service.start_recording().await.unwrap();
    assert!(service.snapshot().recording);
    mic.feed(&[0.2; 1600]);
    let audio = service.stop_recording().unwrap().unwrap();
    assert!(!service.snapshot().recording);

    let frame = tokio::time::timeout(Duration::from_secs(2), frames.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(frame["type"], "audio");
    assert_eq!(frame["mimeType"], "audio/wav");
    assert_eq!(frame["sessionId"], "sess_e2e00001");
    assert_eq!(frame["data"], audio.base64.as_str());

    let snap = service.snapshot();
    let sent = snap
        .diagnostics
        .iter()
        .find(|d| d.event == "audio_send")
        .unwrap();
    assert_eq!(sent.payload.as_ref().unwrap()["mimeType"], "audio/wav");
}

#[tokio::test]
async fn microphone_denial_reaches_the_caller() {
    let mic = Arc::new(FakeMic {
        deny: true,
        ..FakeMic::default()
    });
    let service = AssistantService::new(
        &AppSettings::default(),
        session(),
        mic,
        Arc::new(NoopPlayer),
    )
    .unwrap();

    let err = service.start_recording().await.unwrap_err();
    assert!(matches!(err, CaptureError::PermissionDenied));
    assert!(
        service
            .snapshot()
            .diagnostics
            .iter()
            .any(|d| d.event == "capture_error")
    );
}

#[tokio::test]
async fn session_id_survives_a_restart() {
    let dir = tempfile::tempdir().unwrap();
    let settings = dir.path().join("settings.json");
    let storage = dir.path().join("storage.json");

    let first = AssistantService::from_paths(
        settings.clone(),
        storage.clone(),
        Arc::new(FakeMic::default()),
        Arc::new(NoopPlayer),
    )
    .unwrap();
    let id = first.session_id().clone();
    drop(first);

    let second = AssistantService::from_paths(
        settings,
        storage,
        Arc::new(FakeMic::default()),
        Arc::new(NoopPlayer),
    )
    .unwrap();
    assert_eq!(second.session_id(), &id);
}
