use std::sync::Arc;

use shared::{
    domain::{Action, PuzzleState},
    protocol::{BusCommand, LinkPush},
};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::{
    actuator::Actuator,
    bus_bridge::BusPublisher,
    local_link::{LocalLink, Outbox, SessionId},
    state_store::StateStore,
};

/// Everything the router reacts to, from either channel.
#[derive(Debug)]
pub enum ControllerEvent {
    BusConnected,
    Bus(BusCommand),
    UiConnected { session: SessionId, outbox: Outbox },
    UiSolved { session: SessionId },
    UiDisconnected { session: SessionId },
}

/// Applies events one at a time, fan-out included, so two transitions never
/// interleave and the first solve to arrive wins.
pub struct Router {
    store: StateStore,
    actuator: Box<dyn Actuator>,
    bus: Arc<dyn BusPublisher>,
    link: LocalLink,
}

impl Router {
    pub fn new(store: StateStore, actuator: Box<dyn Actuator>, bus: Arc<dyn BusPublisher>) -> Self {
        Self {
            store,
            actuator,
            bus,
            link: LocalLink::new(),
        }
    }

    #[cfg(test)]
    pub fn state(&self) -> PuzzleState {
        self.store.state()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<PuzzleState> {
        self.store.subscribe()
    }

    /// Drives the actuator to match the initial (locked) state.
    pub async fn start(&mut self) {
        self.actuate(self.store.state()).await;
    }

    pub async fn run(
        mut self,
        mut events: mpsc::Receiver<ControllerEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            let event = tokio::select! {
                event = events.recv() => event,
                _ = shutdown.changed() => break,
            };
            let Some(event) = event else {
                break;
            };
            self.handle(event).await;
        }
        self.shutdown().await;
    }

    pub async fn handle(&mut self, event: ControllerEvent) {
        match event {
            ControllerEvent::BusConnected => self.publish_status().await,
            ControllerEvent::Bus(command) => self.apply(command.into()).await,
            ControllerEvent::UiConnected { session, outbox } => {
                if let Some(previous) = self.link.attach(session, outbox) {
                    info!(%session, %previous, "ui session superseded");
                }
                self.link.push(LinkPush::snapshot(self.store.state()));
            }
            ControllerEvent::UiSolved { session } => {
                debug!(%session, "ui reported solve");
                self.apply(Action::Solved).await;
            }
            ControllerEvent::UiDisconnected { session } => {
                if !self.link.detach(session) {
                    debug!(%session, current = ?self.link.current(), "stale ui disconnect ignored");
                }
            }
        }
    }

    async fn apply(&mut self, action: Action) {
        let changed = match action {
            Action::Solved => self.store.player_solve(),
            Action::ForceSolved => self.store.force_solve(),
            Action::Reset => self.store.reset(),
        };
        if !changed {
            debug!(?action, "already solved; no transition");
            return;
        }

        let state = self.store.state();
        info!(
            ?action,
            source = ?action.source(),
            solved = state.solved(),
            overridden = state.overridden(),
            "puzzle state changed"
        );

        self.actuate(state).await;
        self.publish_status().await;
        if let Err(error) = self.bus.publish_event(action).await {
            warn!(%error, ?action, "event not published");
        }
        if let Some(push) = ui_nudge(action) {
            self.link.push(push);
        }
    }

    async fn actuate(&mut self, state: PuzzleState) {
        if let Err(error) = self.actuator.set_locked(state.locked()).await {
            error!(%error, locked = state.locked(), "maglock actuation failed; state kept");
        }
    }

    async fn publish_status(&mut self) {
        if let Err(error) = self.bus.publish_status(self.store.state()).await {
            warn!(%error, "status not published");
        }
    }

    async fn shutdown(&mut self) {
        info!("shutting down controller");
        self.actuator.release().await;
        if let Err(error) = self.bus.disconnect().await {
            warn!(%error, "bus disconnect failed");
        }
        self.link.close();
    }
}

/// Bus-originated transitions need an out-of-band push so the UI reacts now.
fn ui_nudge(action: Action) -> Option<LinkPush> {
    match action {
        Action::ForceSolved => Some(LinkPush::ForceSolve),
        Action::Reset => Some(LinkPush::Reset),
        Action::Solved => None,
    }
}

#[cfg(test)]
#[path = "tests/router_tests.rs"]
mod tests;
