//! Lichess Bot API との接続。

pub mod client;
pub mod events;
pub mod ndjson;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use shakmaty::uci::UciMove;

use crate::error::TransportError;

pub use client::LichessClient;
pub use events::{ChallengeInfo, GameFull, GameStartInfo, GameStreamEvent, IncomingEvent};

pub type EventStream<T> = BoxStream<'static, Result<T, TransportError>>;

/// 対局サーバーへの操作。dispatcher はこの trait だけを通して通信する。
#[async_trait]
pub trait GameService: Send + Sync + 'static {
    /// アカウント宛てのイベント（挑戦・対局開始など）。
    async fn incoming_events(&self) -> Result<EventStream<IncomingEvent>, TransportError>;

    /// 1 局分のイベント。最初の 1 件は `gameFull`。
    async fn game_events(&self, game_id: &str)
    -> Result<EventStream<GameStreamEvent>, TransportError>;

    async fn make_move(&self, game_id: &str, mv: &UciMove) -> Result<(), TransportError>;

    async fn accept_challenge(&self, challenge_id: &str) -> Result<(), TransportError>;

    async fn decline_challenge(&self, challenge_id: &str, reason: &str)
    -> Result<(), TransportError>;

    /// 通常アカウントを BOT アカウントに切り替える（不可逆）。
    async fn upgrade_to_bot(&self) -> Result<(), TransportError>;
}
