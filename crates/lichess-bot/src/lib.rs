//! Lichess の BOT アカウントで UCI エンジンを指させるブリッジ。
//!
//! - [`engine`]: エンジン子プロセスの起動・UCI 通信・終了
//! - [`session`]: 1 対局分の状態機械（手番判定・思考時間・book）
//! - [`dispatcher`]: イベントストリームの受信と対局 task の管理
//! - [`lichess`]: Bot API の HTTP / NDJSON バインディング
//! - [`selfplay`]: 2 エンジンの自己対局と勝敗集計

pub mod book;
pub mod challenge;
pub mod config;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod game;
pub mod lichess;
pub mod position;
pub mod selfplay;
pub mod session;
pub mod time_budget;

pub use dispatcher::{DispatcherSettings, SessionDispatcher};
pub use error::{BookError, ConfigError, EngineError, PositionError, SessionError, TransportError};
pub use game::{GameEvent, GameSetup, GameStatus, GameUpdate, MoveSink};
pub use session::{GameSession, SessionDeps, SessionState};
