//! The Action Link: the single WebSocket connection to the browser
//! agent, multiplexed by correlation id.
//!
//! The browser agent dials in (`GET /ws`), not the other way round, so
//! "reconnection" here means watching for a fresh upgrade inside a
//! backoff window after the socket drops. At most one connection is
//! ever live; a new upgrade while one is `ready` replaces it outright,
//! which is what happens when the extension reloads.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::{oneshot, Mutex, RwLock};
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::errors::{EngineError, ErrorCode};
use crate::limits::EngineLimits;
use crate::protocol::{ActionRequest, ActionResponse, ActionResponseStatus, ControlFrame, ServerControlFrame};
use crate::retry::backoff_delay;

/// Base delay and factor for the reconnection backoff window.
const RECONNECT_BASE: Duration = Duration::from_secs(1);
const RECONNECT_FACTOR: f64 = 2.0;
const RECONNECT_MAX_ATTEMPTS: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Ready,
}

impl ConnectionState {
    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Ready => "ready",
        }
    }
}

type PendingMap = Arc<Mutex<HashMap<String, oneshot::Sender<ActionResponse>>>>;

/// Shared handle to the current browser connection. Cheap to clone;
/// every engine task holds one.
#[derive(Clone)]
pub struct ActionLink {
    state: Arc<RwLock<ConnectionState>>,
    outbound: Arc<RwLock<Option<tokio::sync::mpsc::UnboundedSender<Message>>>>,
    pending: PendingMap,
    in_flight: Arc<AtomicUsize>,
    limits: Arc<EngineLimits>,
    reconnect_attempts: Arc<AtomicU32>,
    persistent_disconnect: Arc<AtomicBool>,
    /// Bumped on every successful `attach`, so a stale reconnection
    /// watcher from a previous disconnect knows to stop rather than
    /// declaring a live connection persistently disconnected.
    generation: Arc<AtomicU32>,
}

impl ActionLink {
    pub fn new(limits: Arc<EngineLimits>) -> Self {
        Self {
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            outbound: Arc::new(RwLock::new(None)),
            pending: Arc::new(Mutex::new(HashMap::new())),
            in_flight: Arc::new(AtomicUsize::new(0)),
            limits,
            reconnect_attempts: Arc::new(AtomicU32::new(0)),
            persistent_disconnect: Arc::new(AtomicBool::new(false)),
            generation: Arc::new(AtomicU32::new(0)),
        }
    }

    pub async fn state(&self) -> ConnectionState {
        *self.state.read().await
    }

    /// Whether the reconnection window has been exhausted since the
    /// last time a connection was `ready`. Surfaced through the status
    /// surface's diagnostics so a stuck task can be told apart from a
    /// browser agent that has given up reconnecting.
    pub fn is_persistently_disconnected(&self) -> bool {
        self.persistent_disconnect.load(Ordering::SeqCst)
    }

    /// Sends `action`/`payload`, waits for the correlated response, and
    /// enforces the per-call action timeout. Never blocks past that
    /// deadline even if the browser agent never answers.
    #[instrument(skip(self, payload), fields(action = %action))]
    pub async fn call(&self, action: &str, payload: Value) -> Result<Value, EngineError> {
        if self.in_flight.load(Ordering::SeqCst) >= self.limits.link_max_in_flight {
            return Err(EngineError::Transport(
                ErrorCode::LINK_BUSY,
                "too many in-flight action calls".to_string(),
            ));
        }

        let sender = {
            let outbound = self.outbound.read().await;
            outbound.clone()
        };
        let Some(sender) = sender else {
            return Err(EngineError::Transport(
                ErrorCode::LINK_DISCONNECTED,
                "no active browser connection".to_string(),
            ));
        };

        let id = Uuid::new_v4().to_string();
        let (reply_tx, reply_rx) = oneshot::channel();
        self.pending.lock().await.insert(id.clone(), reply_tx);
        self.in_flight.fetch_add(1, Ordering::SeqCst);

        let request = ActionRequest {
            id: id.clone(),
            action: action.to_string(),
            payload,
        };
        let frame = serde_json::to_string(&request).map_err(|e| {
            EngineError::Internal(ErrorCode::INTERNAL_ERROR, format!("failed to encode action request: {e}"))
        })?;

        if sender.send(Message::Text(frame)).is_err() {
            self.pending.lock().await.remove(&id);
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            return Err(EngineError::Transport(
                ErrorCode::LINK_CLOSED,
                "browser connection closed while sending".to_string(),
            ));
        }

        let result = timeout(self.limits.action_timeout, reply_rx).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match result {
            Ok(Ok(response)) => match response.status {
                ActionResponseStatus::Success => Ok(response.data.unwrap_or(Value::Null)),
                ActionResponseStatus::Error => Err(EngineError::Action(
                    ErrorCode::ACTION_ERROR,
                    response.error.unwrap_or_else(|| "action failed".to_string()),
                )),
            },
            Ok(Err(_)) => Err(EngineError::Transport(
                ErrorCode::LINK_CLOSED,
                "browser connection closed before responding".to_string(),
            )),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                Err(EngineError::ActionTimeout(ErrorCode::ACTION_TIMEOUT, self.limits.action_timeout))
            }
        }
    }

    /// Takes over a freshly upgraded socket, replacing whatever
    /// connection was previously live.
    pub async fn attach(&self, socket: WebSocket) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.reconnect_attempts.store(0, Ordering::SeqCst);
        self.persistent_disconnect.store(false, Ordering::SeqCst);

        *self.state.write().await = ConnectionState::Connecting;

        let (mut sink, mut stream) = socket.split();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<Message>();
        *self.outbound.write().await = Some(tx.clone());
        *self.state.write().await = ConnectionState::Ready;
        info!("browser connection attached");

        let heartbeat_interval = self.limits.heartbeat_interval;
        let heartbeat_tx = tx.clone();
        let mut heartbeat = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(heartbeat_interval);
            let frame = serde_json::to_string(&ServerControlFrame::Ping)
                .expect("ServerControlFrame::Ping always serializes");
            loop {
                ticker.tick().await;
                if heartbeat_tx.send(Message::Text(frame.clone())).is_err() {
                    break;
                }
            }
        });

        let mut sender_task = tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                if sink.send(message).await.is_err() {
                    break;
                }
            }
        });

        let pending = self.pending.clone();
        let mut receiver_task = tokio::spawn(async move {
            while let Some(frame) = stream.next().await {
                match frame {
                    Ok(Message::Text(text)) => handle_inbound_text(&pending, &text).await,
                    Ok(Message::Close(_)) => {
                        debug!("browser closed the connection");
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "error reading from browser connection");
                        break;
                    }
                }
            }
        });

        tokio::select! {
            _ = &mut sender_task => { receiver_task.abort(); heartbeat.abort(); }
            _ = &mut receiver_task => { sender_task.abort(); heartbeat.abort(); }
            _ = &mut heartbeat => { sender_task.abort(); receiver_task.abort(); }
        }

        *self.outbound.write().await = None;
        *self.state.write().await = ConnectionState::Disconnected;
        self.fail_all_pending("browser connection lost").await;
        info!("browser connection detached");

        self.spawn_reconnect_watcher(generation);
    }

    /// Watches the reconnection window after a disconnect: a fresh
    /// `attach` bumps `generation` and resets the attempt counter, so
    /// this loop simply checks after each backoff sleep whether it's
    /// still the watcher for the connection that just dropped. If the
    /// window runs out before a new upgrade arrives, the link is marked
    /// persistently disconnected until the next successful handshake.
    fn spawn_reconnect_watcher(&self, generation: u32) {
        let state = self.state.clone();
        let reconnect_attempts = self.reconnect_attempts.clone();
        let persistent_disconnect = self.persistent_disconnect.clone();
        let current_generation = self.generation.clone();

        tokio::spawn(async move {
            loop {
                let attempt = reconnect_attempts.fetch_add(1, Ordering::SeqCst) + 1;
                let Some(delay) = ActionLink::reconnect_delay(attempt) else {
                    if current_generation.load(Ordering::SeqCst) == generation {
                        persistent_disconnect.store(true, Ordering::SeqCst);
                        warn!("reconnection window exhausted; browser agent is persistently disconnected");
                    }
                    return;
                };

                tokio::time::sleep(delay).await;

                if current_generation.load(Ordering::SeqCst) != generation
                    || *state.read().await != ConnectionState::Disconnected
                {
                    // A new upgrade arrived (or is in flight) during the sleep.
                    return;
                }
            }
        });
    }

    async fn fail_all_pending(&self, reason: &str) {
        let mut pending = self.pending.lock().await;
        for (_, sender) in pending.drain() {
            let _ = sender.send(ActionResponse {
                id: String::new(),
                status: ActionResponseStatus::Error,
                data: None,
                error: Some(reason.to_string()),
            });
        }
    }

    /// How long to wait for a new upgrade before giving up on attempt
    /// `n` of the reconnection window.
    pub fn reconnect_delay(attempt: u32) -> Option<Duration> {
        if attempt > RECONNECT_MAX_ATTEMPTS {
            None
        } else {
            Some(backoff_delay(attempt, RECONNECT_BASE, RECONNECT_FACTOR))
        }
    }
}

async fn handle_inbound_text(pending: &PendingMap, text: &str) {
    if let Ok(response) = serde_json::from_str::<ActionResponse>(text) {
        match pending.lock().await.remove(&response.id) {
            Some(sender) => {
                let _ = sender.send(response);
            }
            None => {
                warn!(id = %response.id, "dropping action response with no matching pending call");
            }
        }
        return;
    }

    if let Ok(control) = serde_json::from_str::<ControlFrame>(text) {
        match control {
            ControlFrame::Connected { from } => {
                info!(from = ?from, "browser agent identified itself");
            }
            ControlFrame::Pong => {
                debug!("received pong");
            }
        }
        return;
    }

    warn!(
        code = %ErrorCode::LINK_MALFORMED_FRAME,
        frame = %text,
        "received frame that is neither an action response nor a control frame"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reconnect_delay_follows_backoff_and_gives_up_after_max_attempts() {
        assert_eq!(ActionLink::reconnect_delay(1), Some(Duration::from_secs(1)));
        assert_eq!(ActionLink::reconnect_delay(2), Some(Duration::from_secs(2)));
        assert_eq!(ActionLink::reconnect_delay(5), Some(Duration::from_secs(16)));
        assert_eq!(ActionLink::reconnect_delay(6), None);
    }

    #[tokio::test]
    async fn call_without_connection_returns_disconnected_error() {
        let link = ActionLink::new(Arc::new(EngineLimits::default()));
        let result = link.call("getPageInfo", Value::Null).await;
        assert!(matches!(result, Err(EngineError::Transport(ErrorCode::LINK_DISCONNECTED, _))));
    }

    #[tokio::test]
    async fn initial_state_is_disconnected() {
        let link = ActionLink::new(Arc::new(EngineLimits::default()));
        assert_eq!(link.state().await, ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn response_with_unmatched_id_is_dropped_without_panicking() {
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let frame = serde_json::json!({"id": "unknown-id", "status": "success", "data": null}).to_string();
        handle_inbound_text(&pending, &frame).await;
        assert!(pending.lock().await.is_empty());
    }

    #[tokio::test]
    async fn frame_that_is_neither_response_nor_control_is_dropped() {
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        handle_inbound_text(&pending, "not json at all").await;
        assert!(pending.lock().await.is_empty());
    }

    #[tokio::test]
    async fn link_starts_out_not_persistently_disconnected() {
        let link = ActionLink::new(Arc::new(EngineLimits::default()));
        assert!(!link.is_persistently_disconnected());
    }
}
