//! Game History Snapshot
//!
//! Shared game-state snapshot pushed by the backend into a game realm.
//! The gateway only inspects the fields it needs to redact; everything
//! else is carried through untouched.

use serde::{Deserialize, Serialize};

/// Lifecycle of a game as reported by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlayState {
    /// Game in progress.
    #[default]
    Playing,
    /// Waiting for a final pass / challenge.
    WaitingForFinalPass,
    /// Game finished. Everything in the snapshot is public.
    GameOver,
}

/// A participant of the game.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PlayerInfo {
    /// Display name; events are attributed by this value.
    pub nickname: String,
    /// Backend user identifier.
    #[serde(default)]
    pub user_id: String,
    /// Full name, if the player set one.
    #[serde(default)]
    pub real_name: String,
}

/// Kind of a recorded turn event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnEventKind {
    /// Tiles placed on the board.
    #[default]
    TilePlacementMove,
    /// Tiles exchanged with the bag.
    Exchange,
    /// Turn passed.
    Pass,
    /// Phony tiles taken back after a challenge.
    PhonyTilesReturned,
    /// Challenge bonus.
    ChallengeBonus,
    /// End-of-game rack points.
    EndRackPoints,
    /// Time penalty.
    TimePenalty,
}

/// One event within a turn.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TurnEvent {
    /// Nickname of the player who made the event.
    pub nickname: String,
    /// Event kind.
    #[serde(default)]
    pub kind: TurnEventKind,
    /// Rack held by the player when the event happened.
    #[serde(default)]
    pub rack: String,
    /// Tiles thrown back for an exchange, or their count once redacted.
    #[serde(default)]
    pub exchanged: String,
    /// Board position of the play.
    #[serde(default)]
    pub position: String,
    /// Tiles played.
    #[serde(default)]
    pub played_tiles: String,
    /// Score of this event.
    #[serde(default)]
    pub score: i32,
    /// Running total after this event.
    #[serde(default)]
    pub cumulative: i32,
}

/// A player's turn: one or more events.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GameTurn {
    /// Events recorded during this turn.
    pub events: Vec<TurnEvent>,
}

/// Full game history as sent to clients joining a game realm.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GameHistory {
    /// Game identifier.
    pub uid: String,
    /// Participants, in seat order.
    pub players: Vec<PlayerInfo>,
    /// Recorded turns.
    #[serde(default)]
    pub turns: Vec<GameTurn>,
    /// Last rack seen for each participant, indexed like `players`.
    #[serde(default)]
    pub last_known_racks: Vec<String>,
    /// Lifecycle state.
    #[serde(default)]
    pub play_state: PlayState,
    /// Lexicon in use.
    #[serde(default)]
    pub lexicon: String,
}

impl GameHistory {
    /// Seat index of the participant with the given nickname.
    pub fn seat_of(&self, nickname: &str) -> Option<usize> {
        self.players.iter().position(|p| p.nickname == nickname)
    }

    /// Whether the game has finished.
    pub fn is_over(&self) -> bool {
        self.play_state == PlayState::GameOver
    }

    /// Serialize to JSON bytes.
    pub fn to_json_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Deserialize from JSON bytes.
    pub fn from_json_bytes(data: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(data)
    }
}
