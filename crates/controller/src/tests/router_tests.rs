use super::*;
use crate::{bus_bridge::route_payload, error::ActuationError};
use async_trait::async_trait;
use shared::domain::PropId;
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ActuatorCall {
    SetLocked(bool),
    Release,
}

#[derive(Clone, Default)]
struct RecordingActuator {
    calls: Arc<Mutex<Vec<ActuatorCall>>>,
    fail: bool,
}

#[async_trait]
impl Actuator for RecordingActuator {
    async fn set_locked(&mut self, locked: bool) -> Result<(), ActuationError> {
        self.calls
            .lock()
            .expect("calls")
            .push(ActuatorCall::SetLocked(locked));
        if self.fail {
            return Err(ActuationError::Spawn {
                program: "gpioset".into(),
                chip: "gpiochip0".into(),
                line: 17,
                source: std::io::Error::from(std::io::ErrorKind::NotFound),
            });
        }
        Ok(())
    }

    async fn release(&mut self) {
        self.calls.lock().expect("calls").push(ActuatorCall::Release);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Published {
    Status(PuzzleState),
    Event(Action),
    Disconnect,
}

#[derive(Clone, Default)]
struct RecordingPublisher {
    published: Arc<Mutex<Vec<Published>>>,
}

#[async_trait]
impl BusPublisher for RecordingPublisher {
    async fn publish_status(&self, state: PuzzleState) -> anyhow::Result<()> {
        self.published
            .lock()
            .expect("published")
            .push(Published::Status(state));
        Ok(())
    }

    async fn publish_event(&self, action: Action) -> anyhow::Result<()> {
        self.published
            .lock()
            .expect("published")
            .push(Published::Event(action));
        Ok(())
    }

    async fn disconnect(&self) -> anyhow::Result<()> {
        self.published
            .lock()
            .expect("published")
            .push(Published::Disconnect);
        Ok(())
    }
}

struct Harness {
    router: Router,
    actuator: RecordingActuator,
    publisher: RecordingPublisher,
}

impl Harness {
    fn new() -> Self {
        Self::with_actuator(RecordingActuator::default())
    }

    fn with_actuator(actuator: RecordingActuator) -> Self {
        let publisher = RecordingPublisher::default();
        let router = Router::new(
            StateStore::new(),
            Box::new(actuator.clone()),
            Arc::new(publisher.clone()),
        );
        Self {
            router,
            actuator,
            publisher,
        }
    }

    fn actuator_calls(&self) -> Vec<ActuatorCall> {
        self.actuator.calls.lock().expect("calls").clone()
    }

    fn published(&self) -> Vec<Published> {
        self.publisher.published.lock().expect("published").clone()
    }

    fn events(&self) -> Vec<Action> {
        self.published()
            .into_iter()
            .filter_map(|p| match p {
                Published::Event(action) => Some(action),
                _ => None,
            })
            .collect()
    }

    async fn connect_ui(&mut self, id: u64) -> mpsc::UnboundedReceiver<LinkPush> {
        let (outbox, pushes) = mpsc::unbounded_channel();
        self.router
            .handle(ControllerEvent::UiConnected {
                session: SessionId(id),
                outbox,
            })
            .await;
        pushes
    }

    async fn bus_payload(&mut self, payload: &str) {
        if let Some(event) = route_payload(
            &PropId::new("hollywood_cryptex"),
            "ey/ey1/hollywood/all/cmd",
            payload.as_bytes(),
        ) {
            self.router.handle(event).await;
        }
    }
}

fn drain(pushes: &mut mpsc::UnboundedReceiver<LinkPush>) -> Vec<LinkPush> {
    let mut out = Vec::new();
    while let Ok(push) = pushes.try_recv() {
        out.push(push);
    }
    out
}

#[tokio::test]
async fn start_locks_the_maglock() {
    let mut h = Harness::new();
    h.router.start().await;
    assert_eq!(h.actuator_calls(), vec![ActuatorCall::SetLocked(true)]);
    assert!(h.published().is_empty());
}

#[tokio::test]
async fn reset_on_fresh_state_still_emits_everything() {
    let mut h = Harness::new();
    let mut ui = h.connect_ui(1).await;
    drain(&mut ui);

    h.router.handle(ControllerEvent::Bus(BusCommand::Reset)).await;

    assert_eq!(h.router.state(), PuzzleState::UNSOLVED);
    assert_eq!(h.actuator_calls(), vec![ActuatorCall::SetLocked(true)]);
    assert_eq!(
        h.published(),
        vec![
            Published::Status(PuzzleState::UNSOLVED),
            Published::Event(Action::Reset),
        ]
    );
    assert_eq!(drain(&mut ui), vec![LinkPush::Reset]);
}

#[tokio::test]
async fn force_solve_unlocks_once_and_nudges_ui() {
    let mut h = Harness::new();
    let mut ui = h.connect_ui(1).await;
    assert_eq!(
        drain(&mut ui),
        vec![LinkPush::snapshot(PuzzleState::UNSOLVED)]
    );

    h.bus_payload(r#"{"type":"cmd","command":"force_solved"}"#)
        .await;

    assert_eq!(h.router.state(), PuzzleState::SOLVED_BY_OVERRIDE);
    assert_eq!(h.actuator_calls(), vec![ActuatorCall::SetLocked(false)]);
    assert_eq!(h.events(), vec![Action::ForceSolved]);
    assert_eq!(drain(&mut ui), vec![LinkPush::ForceSolve]);
}

#[tokio::test]
async fn player_solve_after_override_changes_nothing() {
    let mut h = Harness::new();
    h.router
        .handle(ControllerEvent::Bus(BusCommand::ForceSolved))
        .await;
    let calls_before = h.actuator_calls();
    let published_before = h.published();

    h.router
        .handle(ControllerEvent::UiSolved {
            session: SessionId(1),
        })
        .await;

    assert_eq!(h.router.state(), PuzzleState::SOLVED_BY_OVERRIDE);
    assert_eq!(h.actuator_calls(), calls_before);
    assert_eq!(h.published(), published_before);
}

#[tokio::test]
async fn player_solve_does_not_push_to_ui() {
    let mut h = Harness::new();
    let mut ui = h.connect_ui(1).await;
    drain(&mut ui);

    h.router
        .handle(ControllerEvent::UiSolved {
            session: SessionId(1),
        })
        .await;

    assert_eq!(h.router.state(), PuzzleState::SOLVED_BY_PLAYER);
    assert_eq!(h.actuator_calls(), vec![ActuatorCall::SetLocked(false)]);
    assert_eq!(
        h.published(),
        vec![
            Published::Status(PuzzleState::SOLVED_BY_PLAYER),
            Published::Event(Action::Solved),
        ]
    );
    assert!(drain(&mut ui).is_empty());
}

#[tokio::test]
async fn first_solve_wins_when_racing() {
    let mut h = Harness::new();
    h.router
        .handle(ControllerEvent::UiSolved {
            session: SessionId(1),
        })
        .await;
    h.router
        .handle(ControllerEvent::Bus(BusCommand::ForceSolved))
        .await;

    assert_eq!(h.router.state(), PuzzleState::SOLVED_BY_PLAYER);
    assert_eq!(h.events(), vec![Action::Solved]);
}

#[tokio::test]
async fn broadcast_for_other_prop_is_ignored() {
    let mut h = Harness::new();
    h.bus_payload(r#"{"type":"cmd","propId":"other_prop","command":"force_solved"}"#)
        .await;

    assert_eq!(h.router.state(), PuzzleState::UNSOLVED);
    assert!(h.actuator_calls().is_empty());
    assert!(h.published().is_empty());
}

#[tokio::test]
async fn malformed_and_unknown_payloads_do_nothing() {
    let mut h = Harness::new();
    for payload in [
        "{not json",
        "",
        "42",
        r#"{"type":"status","solved":true}"#,
        r#"{"type":"cmd","command":"explode"}"#,
        r#"{"type":"cmd","command":7}"#,
    ] {
        h.bus_payload(payload).await;
    }

    assert_eq!(h.router.state(), PuzzleState::UNSOLVED);
    assert!(h.actuator_calls().is_empty());
    assert!(h.events().is_empty());
}

#[tokio::test]
async fn actuation_failure_keeps_logical_state() {
    let mut h = Harness::with_actuator(RecordingActuator {
        fail: true,
        ..RecordingActuator::default()
    });

    h.router
        .handle(ControllerEvent::Bus(BusCommand::ForceSolved))
        .await;

    assert_eq!(h.router.state(), PuzzleState::SOLVED_BY_OVERRIDE);
    assert_eq!(h.events(), vec![Action::ForceSolved]);
}

#[tokio::test]
async fn bus_connect_republishes_current_status() {
    let mut h = Harness::new();
    h.router
        .handle(ControllerEvent::UiSolved {
            session: SessionId(1),
        })
        .await;
    h.router.handle(ControllerEvent::BusConnected).await;

    assert_eq!(
        h.published().last(),
        Some(&Published::Status(PuzzleState::SOLVED_BY_PLAYER))
    );
}

#[tokio::test]
async fn new_ui_gets_snapshot_and_supersedes_old() {
    let mut h = Harness::new();
    let mut old = h.connect_ui(1).await;
    h.router
        .handle(ControllerEvent::Bus(BusCommand::ForceSolved))
        .await;
    drain(&mut old);

    let mut new = h.connect_ui(2).await;
    assert_eq!(
        drain(&mut new),
        vec![LinkPush::snapshot(PuzzleState::SOLVED_BY_OVERRIDE)]
    );

    // The superseded session's late disconnect must not clear the new one.
    h.router
        .handle(ControllerEvent::UiDisconnected {
            session: SessionId(1),
        })
        .await;
    h.router.handle(ControllerEvent::Bus(BusCommand::Reset)).await;

    assert_eq!(drain(&mut new), vec![LinkPush::Reset]);
    assert!(drain(&mut old).is_empty());
}

#[tokio::test]
async fn run_applies_events_in_order_then_shuts_down() {
    let h = Harness::new();
    let actuator = h.actuator.clone();
    let publisher = h.publisher.clone();
    let state = h.router.subscribe_state();

    let (events_tx, events_rx) = mpsc::channel(8);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let task = tokio::spawn(h.router.run(events_rx, shutdown_rx));

    events_tx
        .send(ControllerEvent::Bus(BusCommand::ForceSolved))
        .await
        .expect("send");
    events_tx
        .send(ControllerEvent::UiSolved {
            session: SessionId(1),
        })
        .await
        .expect("send");
    events_tx
        .send(ControllerEvent::Bus(BusCommand::Reset))
        .await
        .expect("send");
    drop(events_tx);
    task.await.expect("router task");
    drop(shutdown_tx);

    assert_eq!(*state.borrow(), PuzzleState::UNSOLVED);
    assert_eq!(
        actuator.calls.lock().expect("calls").clone(),
        vec![
            ActuatorCall::SetLocked(false),
            ActuatorCall::SetLocked(true),
            ActuatorCall::Release,
        ]
    );
    let published = publisher.published.lock().expect("published").clone();
    assert_eq!(published.last(), Some(&Published::Disconnect));
    assert_eq!(
        published
            .iter()
            .filter(|p| matches!(p, Published::Event(_)))
            .count(),
        2
    );
}

#[tokio::test]
async fn shutdown_signal_stops_router() {
    let h = Harness::new();
    let actuator = h.actuator.clone();
    let (_events_tx, events_rx) = mpsc::channel(8);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let task = tokio::spawn(h.router.run(events_rx, shutdown_rx));

    shutdown_tx.send(true).expect("signal");
    task.await.expect("router task");

    assert_eq!(
        actuator.calls.lock().expect("calls").clone(),
        vec![ActuatorCall::Release]
    );
}
