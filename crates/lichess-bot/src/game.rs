//! サーバー側の表現から切り離した対局の型。
//!
//! セッションはここにある型だけを見て動く。Lichess 固有の JSON は
//! [`crate::lichess::events`] で変換する。

use serde::Deserialize;
use shakmaty::Color;
use shakmaty::uci::UciMove;

use crate::time_budget::SpeedClass;

/// 対局の状態。`Created` / `Started` 以外は終局。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum GameStatus {
    Created,
    Started,
    Aborted,
    Mate,
    Resign,
    Stalemate,
    Timeout,
    Draw,
    Outoftime,
    Cheat,
    NoStart,
    UnknownFinish,
    VariantEnd,
    #[serde(other)]
    Other,
}

impl GameStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, GameStatus::Created | GameStatus::Started)
    }
}

/// 対局開始時に 1 度だけ決まる情報。
#[derive(Clone, Debug)]
pub struct GameSetup {
    pub game_id: String,
    /// bot 側の色。
    pub color: Color,
    pub speed: SpeedClass,
    /// `None` は標準初期配置。
    pub initial_fen: Option<String>,
    /// サーバーが報告した手番。ログの突き合わせにだけ使う。
    pub is_my_turn: Option<bool>,
}

/// 指し手列と時計の最新値。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GameUpdate {
    pub moves: Vec<String>,
    pub status: GameStatus,
    pub wtime_ms: u64,
    pub btime_ms: u64,
}

impl GameUpdate {
    /// スペース区切りの指し手列から作る。
    pub fn from_move_text(moves: &str, status: GameStatus, wtime_ms: u64, btime_ms: u64) -> Self {
        Self {
            moves: moves.split_whitespace().map(str::to_string).collect(),
            status,
            wtime_ms,
            btime_ms,
        }
    }

    pub fn remaining_ms(&self, color: Color) -> u64 {
        match color {
            Color::White => self.wtime_ms,
            Color::Black => self.btime_ms,
        }
    }
}

/// セッションに流し込む 1 件の通知。
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GameEvent {
    Update(GameUpdate),
    Chat { username: String, text: String },
    OpponentGone { gone: bool },
}

/// 指し手の提出先。
///
/// 送信結果は待たない。失敗はサーバーからの次の状態通知で気付く。
pub trait MoveSink: Send + Sync {
    fn submit(&self, game_id: &str, mv: &UciMove);
}
