use shared::domain::PuzzleState;
use tokio::sync::watch;

/// Sole owner and mutator of the puzzle state.
///
/// Observers hold `watch` receivers and are notified synchronously, inside the
/// transition call, whenever the state is written.
pub struct StateStore {
    state: PuzzleState,
    observers: watch::Sender<PuzzleState>,
}

impl StateStore {
    pub fn new() -> Self {
        let (observers, _) = watch::channel(PuzzleState::UNSOLVED);
        Self {
            state: PuzzleState::UNSOLVED,
            observers,
        }
    }

    pub fn state(&self) -> PuzzleState {
        self.state
    }

    pub fn subscribe(&self) -> watch::Receiver<PuzzleState> {
        self.observers.subscribe()
    }

    pub fn player_solve(&mut self) -> bool {
        self.solve(PuzzleState::SOLVED_BY_PLAYER)
    }

    pub fn force_solve(&mut self) -> bool {
        self.solve(PuzzleState::SOLVED_BY_OVERRIDE)
    }

    /// Always reports a transition: reset doubles as a resync primitive.
    pub fn reset(&mut self) -> bool {
        self.write(PuzzleState::UNSOLVED);
        true
    }

    // First writer to a solved state wins until the next reset.
    fn solve(&mut self, next: PuzzleState) -> bool {
        if self.state.solved() {
            return false;
        }
        self.write(next);
        true
    }

    fn write(&mut self, next: PuzzleState) {
        self.state = next;
        self.observers.send_replace(next);
    }
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "tests/state_store_tests.rs"]
mod tests;
