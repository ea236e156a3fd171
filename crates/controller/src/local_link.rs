use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use futures::{SinkExt, StreamExt};
use shared::{
    domain::PuzzleState,
    protocol::{LinkPush, StateSnapshot, UiMessage},
};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

use crate::router::ControllerEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(pub u64);

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ui#{}", self.0)
    }
}

pub type Outbox = mpsc::UnboundedSender<LinkPush>;

struct Session {
    id: SessionId,
    outbox: Outbox,
}

/// Slot for the one UI session that receives pushes.
///
/// Last connect wins. A superseded connection stays open, but its outbox is
/// dropped and its later disconnect does not clear the slot.
#[derive(Default)]
pub struct LocalLink {
    current: Option<Session>,
}

impl LocalLink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tracks `id`, returning the session it superseded.
    pub fn attach(&mut self, id: SessionId, outbox: Outbox) -> Option<SessionId> {
        self.current
            .replace(Session { id, outbox })
            .map(|previous| previous.id)
    }

    /// Honored only when `id` is the tracked session.
    pub fn detach(&mut self, id: SessionId) -> bool {
        match &self.current {
            Some(session) if session.id == id => {
                self.current = None;
                true
            }
            _ => false,
        }
    }

    pub fn current(&self) -> Option<SessionId> {
        self.current.as_ref().map(|session| session.id)
    }

    /// Best effort; returns whether a live session accepted the message.
    pub fn push(&self, message: LinkPush) -> bool {
        let Some(session) = &self.current else {
            debug!(?message, "no ui session; push skipped");
            return false;
        };
        session.outbox.send(message).is_ok()
    }

    pub fn close(&mut self) {
        self.current = None;
    }
}

#[derive(Clone)]
pub struct LinkServerState {
    events: mpsc::Sender<ControllerEvent>,
    state: watch::Receiver<PuzzleState>,
    shutdown: watch::Receiver<bool>,
    next_session: Arc<AtomicU64>,
}

impl LinkServerState {
    pub fn new(
        events: mpsc::Sender<ControllerEvent>,
        state: watch::Receiver<PuzzleState>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            events,
            state,
            shutdown,
            next_session: Arc::new(AtomicU64::new(1)),
        }
    }
}

pub fn build_app(state: LinkServerState) -> Router {
    Router::new()
        .route("/", get(ws_handler))
        .route("/healthz", get(healthz))
        .route("/state", get(current_state))
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

async fn current_state(State(state): State<LinkServerState>) -> Json<StateSnapshot> {
    let snapshot = *state.state.borrow();
    Json(snapshot.into())
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<LinkServerState>,
) -> impl IntoResponse {
    let session = SessionId(state.next_session.fetch_add(1, Ordering::Relaxed));
    ws.on_upgrade(move |socket| ws_connection(state, socket, session))
}

async fn ws_connection(state: LinkServerState, socket: WebSocket, session: SessionId) {
    info!(%session, "browser ui connected");

    let (outbox, mut pushes) = mpsc::unbounded_channel::<LinkPush>();
    if state
        .events
        .send(ControllerEvent::UiConnected { session, outbox })
        .await
        .is_err()
    {
        return;
    }

    let (mut sender, mut receiver) = socket.split();
    let mut send_shutdown = state.shutdown.clone();
    let send_task = tokio::spawn(async move {
        loop {
            let push = tokio::select! {
                push = pushes.recv() => push,
                _ = send_shutdown.changed() => {
                    let _ = sender.send(Message::Close(None)).await;
                    break;
                }
            };
            // Outbox dropped: superseded by a newer session, or the link closed.
            let Some(push) = push else {
                break;
            };
            let text = match serde_json::to_string(&push) {
                Ok(v) => v,
                Err(_) => continue,
            };
            if sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    let mut shutdown = state.shutdown.clone();
    loop {
        let frame = tokio::select! {
            frame = receiver.next() => frame,
            _ = shutdown.changed() => break,
        };
        let Some(Ok(frame)) = frame else {
            break;
        };
        let message = match frame {
            Message::Text(text) => parse_ui_message(&text),
            Message::Binary(bytes) => std::str::from_utf8(&bytes)
                .ok()
                .and_then(parse_ui_message),
            Message::Close(_) => break,
            _ => None,
        };
        if message == Some(UiMessage::Solved)
            && state
                .events
                .send(ControllerEvent::UiSolved { session })
                .await
                .is_err()
        {
            break;
        }
    }

    info!(%session, "browser ui disconnected");
    let _ = state
        .events
        .send(ControllerEvent::UiDisconnected { session })
        .await;
    let shutting_down = *state.shutdown.borrow();
    if shutting_down {
        let _ = send_task.await;
    } else {
        send_task.abort();
    }
}

/// Malformed text is dropped rather than reported to the peer.
pub fn parse_ui_message(text: &str) -> Option<UiMessage> {
    serde_json::from_str(text).ok()
}

#[cfg(test)]
#[path = "tests/local_link_tests.rs"]
mod tests;
