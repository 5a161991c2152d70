//! Bot API の NDJSON イベント。
//!
//! 使わないフィールドは読まない。未知の `type` は `Unknown` に落とす。

use serde::Deserialize;
use shakmaty::Color;

use crate::game::{GameEvent, GameSetup, GameStatus, GameUpdate};
use crate::time_budget::SpeedClass;

/// `/api/stream/event` の 1 行。
#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum IncomingEvent {
    Challenge { challenge: ChallengeInfo },
    ChallengeCanceled { challenge: ChallengeInfo },
    ChallengeDeclined { challenge: ChallengeInfo },
    GameStart { game: GameStartInfo },
    GameFinish { game: GameStartInfo },
    #[serde(other)]
    Unknown,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ChallengeInfo {
    pub id: String,
    #[serde(default)]
    pub rated: bool,
    #[serde(default = "unknown_speed")]
    pub speed: SpeedClass,
    pub variant: Variant,
    #[serde(default)]
    pub challenger: Option<Player>,
}

impl ChallengeInfo {
    pub fn challenger_id(&self) -> &str {
        self.challenger.as_ref().map_or("anonymous", |p| p.id.as_str())
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct Variant {
    pub key: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Player {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    White,
    Black,
}

impl From<Side> for Color {
    fn from(side: Side) -> Color {
        match side {
            Side::White => Color::White,
            Side::Black => Color::Black,
        }
    }
}

/// `gameStart` / `gameFinish` に載る対局の要約。
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameStartInfo {
    pub game_id: String,
    pub color: Side,
    #[serde(default)]
    pub fen: Option<String>,
    #[serde(default)]
    pub is_my_turn: Option<bool>,
    #[serde(default = "unknown_speed")]
    pub speed: SpeedClass,
}

/// `/api/bot/game/stream/{id}` の 1 行。
#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum GameStreamEvent {
    GameFull(GameFull),
    GameState(GameStateEvent),
    ChatLine {
        username: String,
        text: String,
    },
    OpponentGone {
        gone: bool,
    },
    #[serde(other)]
    Unknown,
}

impl GameStreamEvent {
    /// セッションに渡す形へ変換する。セッションが関知しないものは `None`。
    pub fn into_game_event(self) -> Option<GameEvent> {
        match self {
            GameStreamEvent::GameFull(full) => Some(GameEvent::Update(full.state.into())),
            GameStreamEvent::GameState(state) => Some(GameEvent::Update(state.into())),
            GameStreamEvent::ChatLine { username, text } => {
                Some(GameEvent::Chat { username, text })
            }
            GameStreamEvent::OpponentGone { gone } => Some(GameEvent::OpponentGone { gone }),
            GameStreamEvent::Unknown => None,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameFull {
    pub id: String,
    /// 標準配置なら `"startpos"`。
    #[serde(default)]
    pub initial_fen: Option<String>,
    #[serde(default = "unknown_speed")]
    pub speed: SpeedClass,
    pub state: GameStateEvent,
}

impl GameFull {
    /// `gameStart` の情報と合わせてセッションの初期値を作る。
    pub fn into_setup(self, start: &GameStartInfo) -> (GameSetup, GameUpdate) {
        let speed = match self.speed {
            SpeedClass::Unknown => start.speed,
            speed => speed,
        };
        let setup = GameSetup {
            game_id: self.id,
            color: start.color.into(),
            speed,
            initial_fen: self.initial_fen,
            is_my_turn: start.is_my_turn,
        };
        (setup, self.state.into())
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct GameStateEvent {
    #[serde(default)]
    pub moves: String,
    #[serde(default)]
    pub wtime: u64,
    #[serde(default)]
    pub btime: u64,
    pub status: GameStatus,
}

impl From<GameStateEvent> for GameUpdate {
    fn from(state: GameStateEvent) -> GameUpdate {
        GameUpdate::from_move_text(&state.moves, state.status, state.wtime, state.btime)
    }
}

fn unknown_speed() -> SpeedClass {
    SpeedClass::Unknown
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_incoming_events() {
        let line = r#"{"type":"challenge","challenge":{"id":"c1","rated":true,"speed":"blitz",
            "variant":{"key":"standard","name":"Standard"},
            "challenger":{"id":"alice","name":"Alice","rating":1500}}}"#;
        let IncomingEvent::Challenge { challenge } = serde_json::from_str(line).unwrap() else {
            panic!("not a challenge");
        };
        assert_eq!(challenge.id, "c1");
        assert_eq!(challenge.speed, SpeedClass::Blitz);
        assert_eq!(challenge.challenger_id(), "alice");

        let line = r#"{"type":"gameStart","game":{"gameId":"g1","fullId":"g1xxxx",
            "color":"black","fen":"rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1",
            "isMyTurn":false,"speed":"rapid"}}"#;
        let IncomingEvent::GameStart { game } = serde_json::from_str(line).unwrap() else {
            panic!("not a gameStart");
        };
        assert_eq!(game.color, Side::Black);
        assert_eq!(game.is_my_turn, Some(false));

        let event: IncomingEvent = serde_json::from_str(r#"{"type":"somethingElse"}"#).unwrap();
        assert!(matches!(event, IncomingEvent::Unknown));
    }

    #[test]
    fn game_full_builds_the_session_setup() {
        let start: GameStartInfo = serde_json::from_str(
            r#"{"gameId":"g1","color":"white","isMyTurn":true,"speed":"bullet"}"#,
        )
        .unwrap();
        let line = r#"{"type":"gameFull","id":"g1","speed":"bullet","initialFen":"startpos",
            "state":{"type":"gameState","moves":"","wtime":60000,"btime":60000,
            "winc":0,"binc":0,"status":"started"}}"#;
        let GameStreamEvent::GameFull(full) = serde_json::from_str(line).unwrap() else {
            panic!("not a gameFull");
        };
        let (setup, update) = full.into_setup(&start);
        assert_eq!(setup.color, Color::White);
        assert_eq!(setup.speed, SpeedClass::Bullet);
        assert_eq!(setup.initial_fen.as_deref(), Some("startpos"));
        assert!(update.moves.is_empty());
        assert_eq!(update.status, GameStatus::Started);
    }

    #[test]
    fn game_state_becomes_an_update() {
        let line = r#"{"type":"gameState","moves":"e2e4 c7c5","wtime":58000,"btime":59500,
            "winc":0,"binc":0,"status":"resign","winner":"white"}"#;
        let event: GameStreamEvent = serde_json::from_str(line).unwrap();
        let Some(GameEvent::Update(update)) = event.into_game_event() else {
            panic!("not an update");
        };
        assert_eq!(update.moves, vec!["e2e4", "c7c5"]);
        assert!(update.status.is_terminal());
        assert_eq!(update.btime_ms, 59_500);

        let event: GameStreamEvent =
            serde_json::from_str(r#"{"type":"opponentGone","gone":true,"claimWinInSeconds":10}"#)
                .unwrap();
        assert_eq!(event.into_game_event(), Some(GameEvent::OpponentGone { gone: true }));
    }
}
