use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PropId(pub String);

impl PropId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PropId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Who caused the most recent state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeSource {
    System,
    Player,
    Gm,
}

/// A discrete action reported on the event topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Solved,
    ForceSolved,
    Reset,
}

impl Action {
    pub fn source(self) -> ChangeSource {
        match self {
            Action::Solved => ChangeSource::Player,
            Action::ForceSolved => ChangeSource::Gm,
            Action::Reset => ChangeSource::System,
        }
    }
}

/// Authoritative puzzle state.
///
/// Fields are private so that an override can only exist on a solved puzzle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PuzzleState {
    solved: bool,
    overridden: bool,
}

impl PuzzleState {
    pub const UNSOLVED: Self = Self {
        solved: false,
        overridden: false,
    };
    pub const SOLVED_BY_PLAYER: Self = Self {
        solved: true,
        overridden: false,
    };
    pub const SOLVED_BY_OVERRIDE: Self = Self {
        solved: true,
        overridden: true,
    };

    pub fn solved(&self) -> bool {
        self.solved
    }

    pub fn overridden(&self) -> bool {
        self.overridden
    }

    /// The maglock is energized whenever the puzzle is unsolved.
    pub fn locked(&self) -> bool {
        !self.solved
    }

    pub fn last_change_source(&self) -> ChangeSource {
        if self.overridden {
            ChangeSource::Gm
        } else if self.solved {
            ChangeSource::Player
        } else {
            ChangeSource::System
        }
    }
}
