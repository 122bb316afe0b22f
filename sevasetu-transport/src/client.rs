//! Persistent duplex connection to the welfare-scheme agent.
//!
//! One `AgentClient` owns at most one live WebSocket. Inbound text frames are parsed and
//! fanned out to message subscribers in arrival order; transport-internal facts go to a
//! separate diagnostic stream. Any unexpected close schedules exactly one reconnect.

use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use anyhow::{Context, anyhow};
use futures_util::{Sink, SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use url::Url;

use sevasetu_core::{
    AppSettings, DiagnosticEntry, DiagnosticLevel, InboundMessage, OutboundMessage, SessionId,
};

use crate::bus::{Registry, Subscription};

const WS_SEND_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub ws_url: Url,
    /// Sent in `hello`; fixed for the lifetime of the client.
    pub language: String,
    pub reconnect_delay: Duration,
    pub connect_timeout: Duration,
    pub send_preview_chars: usize,
}

impl ClientConfig {
    pub fn from_settings(settings: &AppSettings) -> anyhow::Result<Self> {
        let ws_url = Url::parse(settings.ws_url.trim())
            .with_context(|| format!("parse agent websocket url: {}", settings.ws_url))?;
        match ws_url.scheme() {
            "ws" | "wss" => {}
            other => return Err(anyhow!("unsupported websocket scheme: {other}")),
        }

        Ok(Self {
            ws_url,
            language: settings.language.clone(),
            reconnect_delay: Duration::from_millis(settings.reconnect_delay_ms),
            connect_timeout: Duration::from_millis(settings.connect_timeout_ms),
            send_preview_chars: settings.send_preview_chars,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Open,
    Closing,
}

impl ConnectionState {
    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Open => "open",
            ConnectionState::Closing => "closing",
        }
    }
}

type MessageHandler = dyn Fn(&InboundMessage) + Send + Sync;
type DiagnosticHandler = dyn Fn(&DiagnosticEntry) + Send + Sync;

/// Cheap to clone; all clones share one connection. Dropping the last clone closes
/// the socket and cancels any pending reconnect.
#[derive(Clone)]
pub struct AgentClient {
    inner: Arc<Inner>,
}

struct Inner {
    config: ClientConfig,
    session_id: SessionId,
    messages: Registry<MessageHandler>,
    diagnostics: Registry<DiagnosticHandler>,
    slot: Mutex<Slot>,
    state_tx: watch::Sender<ConnectionState>,
}

#[derive(Default)]
struct Slot {
    next_generation: u64,
    conn: Option<Connection>,
    reconnect: Option<JoinHandle<()>>,
    // Bumped whenever a scheduled reconnect is superseded or cancelled.
    reconnect_epoch: u64,
}

struct Connection {
    generation: u64,
    outbound: Option<mpsc::UnboundedSender<Message>>,
    task: Option<JoinHandle<()>>,
}

impl AgentClient {
    pub fn new(config: ClientConfig, session_id: SessionId) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            inner: Arc::new(Inner {
                config,
                session_id,
                messages: Registry::new(),
                diagnostics: Registry::new(),
                slot: Mutex::new(Slot::default()),
                state_tx,
            }),
        }
    }

    pub fn session_id(&self) -> &SessionId {
        &self.inner.session_id
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state_tx.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    /// Opens the connection unless one already exists. Must be called from within a
    /// Tokio runtime.
    pub fn connect(&self) {
        self.inner.connect();
    }

    /// Tears the connection down. No message subscriber is invoked for frames that
    /// arrive after this returns, and no reconnect is attempted.
    pub fn disconnect(&self) {
        self.inner.disconnect();
    }

    /// Fire-and-forget: when the socket is not open the message is dropped and a
    /// `ws_send_skipped` warning is emitted instead.
    pub fn send(&self, msg: &OutboundMessage) {
        self.inner.send(msg);
    }

    pub fn send_audio(&self, data_b64: &str, mime_type: &str) {
        self.inner.emit(
            DiagnosticLevel::Info,
            "audio_send",
            "Audio captured",
            Some(json!({
                "sessionId": self.inner.session_id.as_str(),
                "bytes": data_b64.len(),
                "mimeType": mime_type,
            })),
        );
        self.inner.send(&OutboundMessage::Audio {
            data: data_b64.to_string(),
            mime_type: mime_type.to_string(),
            session_id: self.inner.session_id.clone(),
        });
    }

    pub fn on_message<F>(&self, cb: F) -> Subscription
    where
        F: Fn(&InboundMessage) + Send + Sync + 'static,
    {
        self.inner.messages.register(Arc::new(cb))
    }

    pub fn on_diagnostic<F>(&self, cb: F) -> Subscription
    where
        F: Fn(&DiagnosticEntry) + Send + Sync + 'static,
    {
        self.inner.diagnostics.register(Arc::new(cb))
    }

    /// Publishes a consumer-side fact on the same diagnostic stream.
    pub fn emit_diagnostic(
        &self,
        level: DiagnosticLevel,
        event: &str,
        message: &str,
        payload: Option<Value>,
    ) {
        self.inner.emit(level, event, message, payload);
    }
}

impl Inner {
    fn lock_slot(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    fn connect(self: &Arc<Self>) {
        let generation = {
            let mut slot = self.lock_slot();
            if slot.conn.is_some() {
                return;
            }
            if let Some(pending) = slot.reconnect.take() {
                pending.abort();
            }
            slot.reconnect_epoch += 1;
            self.reserve_connection(&mut slot)
        };
        self.launch(generation);
    }

    /// Runs a scheduled reconnect unless `disconnect()` or a newer schedule has
    /// bumped the epoch since it was spawned.
    fn reconnect(self: &Arc<Self>, epoch: u64) {
        let generation = {
            let mut slot = self.lock_slot();
            if slot.reconnect_epoch != epoch || slot.conn.is_some() {
                return;
            }
            slot.reconnect = None;
            self.reserve_connection(&mut slot)
        };
        self.launch(generation);
    }

    fn reserve_connection(&self, slot: &mut Slot) -> u64 {
        let generation = slot.next_generation;
        slot.next_generation += 1;
        slot.conn = Some(Connection {
            generation,
            outbound: None,
            task: None,
        });
        self.state_tx.send_replace(ConnectionState::Connecting);
        generation
    }

    fn launch(self: &Arc<Self>, generation: u64) {
        self.emit(
            DiagnosticLevel::Info,
            "ws_connect",
            "Connecting to WebSocket",
            Some(json!({ "url": self.config.ws_url.as_str() })),
        );

        // A diagnostic subscriber may have disconnected us in the meantime.
        let mut slot = self.lock_slot();
        if let Some(conn) = slot.conn.as_mut().filter(|c| c.generation == generation) {
            let task = tokio::spawn(run_connection(
                Arc::downgrade(self),
                generation,
                self.config.clone(),
            ));
            conn.task = Some(task);
        }
    }

    fn disconnect(&self) {
        let (had_conn, close_failed) = {
            let mut slot = self.lock_slot();
            slot.reconnect_epoch += 1;
            let cancelled_reconnect = match slot.reconnect.take() {
                Some(pending) => {
                    pending.abort();
                    true
                }
                None => false,
            };

            match slot.conn.take() {
                Some(mut conn) => {
                    self.state_tx.send_replace(ConnectionState::Closing);
                    // Stop the reader first so no handler runs for later frames.
                    if let Some(task) = conn.task.take() {
                        task.abort();
                    }
                    // Dropping the sender after queueing Close lets the writer flush and exit.
                    let close_failed = conn
                        .outbound
                        .take()
                        .map(|tx| tx.send(Message::Close(None)).is_err())
                        .unwrap_or(false);
                    self.state_tx.send_replace(ConnectionState::Disconnected);
                    (true, close_failed)
                }
                None => (cancelled_reconnect, false),
            }
        };

        if !had_conn {
            return;
        }

        self.emit(
            DiagnosticLevel::Info,
            "ws_disconnect",
            "WebSocket disconnect requested",
            None,
        );
        if close_failed {
            self.emit(
                DiagnosticLevel::Warn,
                "ws_disconnect_error",
                "Error while closing WebSocket",
                Some(json!({ "error": "writer already stopped" })),
            );
        }
    }

    fn send(&self, msg: &OutboundMessage) {
        let kind = msg.kind();
        let text = match serde_json::to_string(msg) {
            Ok(t) => t,
            Err(e) => {
                self.emit(
                    DiagnosticLevel::Error,
                    "ws_send_skipped",
                    "Failed to encode outbound message",
                    Some(json!({ "type": kind, "error": e.to_string() })),
                );
                return;
            }
        };

        let bytes = text.len();
        let preview: String = text.chars().take(self.config.send_preview_chars).collect();

        let outcome = {
            let slot = self.lock_slot();
            let state = self.state();
            match slot.conn.as_ref().and_then(|c| c.outbound.as_ref()) {
                Some(tx) if state == ConnectionState::Open => {
                    tx.send(Message::Text(text.into())).map_err(|_| state)
                }
                _ => Err(state),
            }
        };

        match outcome {
            Ok(()) => self.emit(
                DiagnosticLevel::Debug,
                "ws_send",
                "WebSocket message sent",
                Some(json!({ "type": kind, "bytes": bytes, "preview": preview })),
            ),
            Err(state) => self.emit(
                DiagnosticLevel::Warn,
                "ws_send_skipped",
                "WebSocket not ready",
                Some(json!({ "type": kind, "state": state.as_str() })),
            ),
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        self.lock_slot()
            .conn
            .as_ref()
            .is_some_and(|c| c.generation == generation)
    }

    fn mark_open(&self, generation: u64, outbound: mpsc::UnboundedSender<Message>) -> bool {
        let mut slot = self.lock_slot();
        match slot.conn.as_mut() {
            Some(conn) if conn.generation == generation => {
                conn.outbound = Some(outbound);
                self.state_tx.send_replace(ConnectionState::Open);
                true
            }
            _ => false,
        }
    }

    fn push_control(&self, generation: u64, msg: Message) {
        let slot = self.lock_slot();
        if let Some(tx) = slot
            .conn
            .as_ref()
            .filter(|c| c.generation == generation)
            .and_then(|c| c.outbound.as_ref())
        {
            let _ = tx.send(msg);
        }
    }

    fn handle_text(&self, generation: u64, raw: &str) {
        if !self.is_current(generation) {
            return;
        }

        if !raw.is_empty() {
            self.emit(
                DiagnosticLevel::Debug,
                "ws_message",
                "WebSocket message received",
                Some(json!({ "bytes": raw.len() })),
            );
        }

        let msg = match InboundMessage::parse(raw) {
            Ok(m) => m,
            Err(e) => {
                self.emit(
                    DiagnosticLevel::Error,
                    "ws_message_error",
                    "Failed to parse WebSocket message",
                    Some(json!({ "error": e.to_string() })),
                );
                return;
            }
        };

        self.emit(
            DiagnosticLevel::Debug,
            "ws_message_parsed",
            "WebSocket message parsed",
            Some(json!({ "type": msg.kind() })),
        );

        if let InboundMessage::Error { message, .. } = &msg {
            self.emit(
                DiagnosticLevel::Error,
                "agent_error",
                "Agent reported an error",
                Some(json!({ "message": message })),
            );
        }

        let failures = self
            .messages
            .dispatch(|| self.is_current(generation), |cb| cb(&msg));
        for error in failures {
            self.emit(
                DiagnosticLevel::Error,
                "subscriber_panic",
                "Message subscriber panicked",
                Some(json!({ "type": msg.kind(), "error": error })),
            );
        }
    }

    /// Called by the connection task when its socket is gone for any reason other
    /// than an explicit `disconnect()`.
    fn connection_lost(self: &Arc<Self>, generation: u64, close: Option<Value>) {
        let delay = self.config.reconnect_delay;
        {
            let mut slot = self.lock_slot();
            if !slot.conn.as_ref().is_some_and(|c| c.generation == generation) {
                return;
            }
            slot.conn = None;
            self.state_tx.send_replace(ConnectionState::Disconnected);

            if let Some(stale) = slot.reconnect.take() {
                stale.abort();
            }
            slot.reconnect_epoch += 1;
            let epoch = slot.reconnect_epoch;
            let weak = Arc::downgrade(self);
            slot.reconnect = Some(tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                if let Some(inner) = weak.upgrade() {
                    inner.reconnect(epoch);
                }
            }));
        }

        self.emit(
            DiagnosticLevel::Warn,
            "ws_close",
            "WebSocket closed",
            Some(close.unwrap_or_else(|| json!({ "code": null, "reason": "" }))),
        );
        self.emit(
            DiagnosticLevel::Debug,
            "ws_reconnect_scheduled",
            "Reconnect scheduled",
            Some(json!({ "delay_ms": delay.as_millis() as u64 })),
        );
    }

    fn emit(&self, level: DiagnosticLevel, event: &str, message: &str, payload: Option<Value>) {
        let entry = DiagnosticEntry::now(level, event, message, payload);
        mirror_to_log(&entry);

        for error in self.diagnostics.dispatch(|| true, |cb| cb(&entry)) {
            log::error!("diagnostic subscriber panicked on {}: {error}", entry.event);
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let slot = self.slot.get_mut().unwrap_or_else(|e| e.into_inner());
        if let Some(pending) = slot.reconnect.take() {
            pending.abort();
        }
        if let Some(mut conn) = slot.conn.take() {
            if let Some(task) = conn.task.take() {
                task.abort();
            }
        }
    }
}

fn mirror_to_log(entry: &DiagnosticEntry) {
    let payload = entry
        .payload
        .as_ref()
        .map(|p| p.to_string())
        .unwrap_or_default();
    match entry.level {
        DiagnosticLevel::Debug => log::debug!("[{}] {} {payload}", entry.event, entry.message),
        DiagnosticLevel::Info => log::info!("[{}] {} {payload}", entry.event, entry.message),
        DiagnosticLevel::Warn => log::warn!("[{}] {} {payload}", entry.event, entry.message),
        DiagnosticLevel::Error => log::error!("[{}] {} {payload}", entry.event, entry.message),
    }
}

async fn run_connection(weak: Weak<Inner>, generation: u64, config: ClientConfig) {
    // Connect with a hard timeout so a black-holed endpoint still reaches the reconnect path.
    let connected = tokio::time::timeout(
        config.connect_timeout,
        tokio_tungstenite::connect_async(config.ws_url.as_str()),
    )
    .await;

    let ws = match connected {
        Ok(Ok((ws, _resp))) => ws,
        Ok(Err(e)) => {
            if let Some(inner) = weak.upgrade() {
                inner.emit(
                    DiagnosticLevel::Error,
                    "ws_error",
                    "WebSocket error",
                    Some(json!({ "error": e.to_string() })),
                );
                inner.connection_lost(generation, None);
            }
            return;
        }
        Err(_) => {
            if let Some(inner) = weak.upgrade() {
                inner.emit(
                    DiagnosticLevel::Error,
                    "ws_error",
                    "WebSocket connect timed out",
                    Some(json!({ "timeout_ms": config.connect_timeout.as_millis() as u64 })),
                );
                inner.connection_lost(generation, None);
            }
            return;
        }
    };

    let (ws_write, mut ws_read) = ws.split();

    // Writer task: socket writes never block inbound dispatch.
    let (out_tx, out_rx) = mpsc::unbounded_channel::<Message>();
    tokio::spawn(write_loop(ws_write, out_rx));

    {
        let Some(inner) = weak.upgrade() else {
            return;
        };
        if !inner.mark_open(generation, out_tx) {
            return;
        }
        inner.emit(DiagnosticLevel::Info, "ws_open", "WebSocket connected", None);
        inner.send(&OutboundMessage::Hello {
            session_id: inner.session_id.clone(),
            language: inner.config.language.clone(),
        });
    }

    let mut close: Option<Value> = None;
    while let Some(frame) = ws_read.next().await {
        let Some(inner) = weak.upgrade() else {
            return;
        };

        match frame {
            Ok(Message::Text(text)) => inner.handle_text(generation, text.as_str()),
            Ok(Message::Binary(bytes)) => inner.emit(
                DiagnosticLevel::Warn,
                "ws_message_non_text",
                "Non-text WebSocket message",
                Some(json!({ "type": "binary", "bytes": bytes.len() })),
            ),
            Ok(Message::Ping(payload)) => inner.push_control(generation, Message::Pong(payload)),
            Ok(Message::Pong(_)) | Ok(Message::Frame(_)) => {}
            Ok(Message::Close(frame)) => {
                close = Some(match frame {
                    Some(f) => json!({ "code": u16::from(f.code), "reason": f.reason.as_str() }),
                    None => json!({ "code": null, "reason": "" }),
                });
                break;
            }
            Err(e) => {
                inner.emit(
                    DiagnosticLevel::Error,
                    "ws_error",
                    "WebSocket error",
                    Some(json!({ "error": e.to_string() })),
                );
                break;
            }
        }
    }

    if let Some(inner) = weak.upgrade() {
        inner.connection_lost(generation, close);
    }
}

async fn write_loop<S>(mut sink: S, mut rx: mpsc::UnboundedReceiver<Message>)
where
    S: Sink<Message> + Unpin,
    S::Error: std::fmt::Display,
{
    let mut sent_close = false;
    while let Some(msg) = rx.recv().await {
        let is_close = matches!(msg, Message::Close(_));
        match tokio::time::timeout(WS_SEND_TIMEOUT, sink.send(msg)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                log::warn!("websocket write failed: {e}");
                return;
            }
            Err(_) => {
                log::warn!("websocket write timed out");
                return;
            }
        }
        if is_close {
            sent_close = true;
            break;
        }
    }

    if !sent_close {
        if let Err(e) = sink.send(Message::Close(None)).await {
            log::debug!("websocket close failed: {e}");
        }
    }
}
