use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{Action, ChangeSource, PropId, PuzzleState};

/// Topic names for one prop, rooted at `<namespace>/<site>/<room>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    pub status: String,
    pub event: String,
    pub cmd: String,
    pub broadcast_cmd: String,
}

impl Topics {
    pub fn new(namespace: &str, site: &str, room: &str, prop_id: &PropId) -> Self {
        let room_base = format!("{namespace}/{site}/{room}");
        let prop_base = format!("{room_base}/prop/{prop_id}");
        Self {
            status: format!("{prop_base}/status"),
            event: format!("{prop_base}/event"),
            cmd: format!("{prop_base}/cmd"),
            broadcast_cmd: format!("{room_base}/all/cmd"),
        }
    }
}

/// Commands the controller acts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BusCommand {
    ForceSolved,
    Reset,
}

impl BusCommand {
    pub fn name(self) -> &'static str {
        match self {
            BusCommand::ForceSolved => "force_solved",
            BusCommand::Reset => "reset",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "force_solved" => Some(BusCommand::ForceSolved),
            "reset" => Some(BusCommand::Reset),
            _ => None,
        }
    }
}

impl From<BusCommand> for Action {
    fn from(value: BusCommand) -> Self {
        match value {
            BusCommand::ForceSolved => Action::ForceSolved,
            BusCommand::Reset => Action::Reset,
        }
    }
}

/// Every record carried on the bus, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BusRecord {
    Status(StatusRecord),
    Event(EventRecord),
    Cmd(CommandRecord),
}

impl BusRecord {
    pub fn to_payload(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusRecord {
    pub prop_id: PropId,
    pub name: String,
    pub online: bool,
    pub solved: bool,
    #[serde(rename = "override")]
    pub overridden: bool,
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_change_source: Option<ChangeSource>,
}

impl StatusRecord {
    pub fn online(prop_id: PropId, name: String, state: PuzzleState, at: DateTime<Utc>) -> Self {
        Self {
            prop_id,
            name,
            online: true,
            solved: state.solved(),
            overridden: state.overridden(),
            timestamp: at.timestamp_millis(),
            last_change_source: Some(state.last_change_source()),
        }
    }

    /// Payload registered as the last will.
    pub fn offline(prop_id: PropId, name: String, at: DateTime<Utc>) -> Self {
        Self {
            prop_id,
            name,
            online: false,
            solved: false,
            overridden: false,
            timestamp: at.timestamp_millis(),
            last_change_source: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRecord {
    pub prop_id: PropId,
    pub action: Action,
    pub source: ChangeSource,
    pub timestamp: i64,
}

impl EventRecord {
    pub fn new(prop_id: PropId, action: Action, at: DateTime<Utc>) -> Self {
        Self {
            prop_id,
            action,
            source: action.source(),
            timestamp: at.timestamp_millis(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prop_id: Option<PropId>,
    #[serde(default)]
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl CommandRecord {
    pub fn new(prop_id: Option<PropId>, command: BusCommand) -> Self {
        Self {
            prop_id,
            command: command.name().to_string(),
            params: None,
        }
    }

    /// Records without a (non-empty) `propId` are addressed to every prop.
    pub fn is_addressed_to(&self, prop_id: &PropId) -> bool {
        match &self.prop_id {
            Some(target) if !target.as_str().is_empty() => target == prop_id,
            _ => true,
        }
    }
}

/// Server to UI messages on the local link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LinkPush {
    State {
        solved: bool,
        #[serde(rename = "override")]
        overridden: bool,
    },
    ForceSolve,
    Reset,
}

impl LinkPush {
    pub fn snapshot(state: PuzzleState) -> Self {
        LinkPush::State {
            solved: state.solved(),
            overridden: state.overridden(),
        }
    }
}

/// UI to server messages on the local link. Anything but `solved` is ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UiMessage {
    Solved,
    #[serde(other)]
    Ignored,
}

/// Body of the `/state` route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateSnapshot {
    pub solved: bool,
    #[serde(rename = "override")]
    pub overridden: bool,
    pub last_change_source: ChangeSource,
}

impl From<PuzzleState> for StateSnapshot {
    fn from(state: PuzzleState) -> Self {
        Self {
            solved: state.solved(),
            overridden: state.overridden(),
            last_change_source: state.last_change_source(),
        }
    }
}
