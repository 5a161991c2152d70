//! エラー型。
//!
//! プロセス / パイプ系 ([`EngineError`]) は対局セッション境界で回復し、
//! 通信系 ([`TransportError`]) は dispatcher まで伝播させてイベントループごと
//! 再起動する。

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// エンジンプロセスの起動・通信で発生するエラー。
#[derive(Debug, Error)]
pub enum EngineError {
    /// プロセスの起動自体に失敗した。
    #[error("failed to spawn engine at {}: {source}", path.display())]
    Spawn {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// `uci` / `isready` のハンドシェイクが完了しなかった。
    #[error("engine handshake did not complete: {0}")]
    Startup(String),

    /// 思考時間 + 猶予内に bestmove が返らなかった、または bestmove が不正。
    #[error("analysis failed: {0}")]
    Analysis(String),

    /// stdin への書き込み失敗（パイプ切断）。
    #[error("failed to write to engine: {0}")]
    Write(#[source] io::Error),

    /// stdout が閉じられた（プロセス終了）。
    #[error("engine closed its output stream")]
    Eof,

    /// Running 以外の状態で探索要求が来た。
    #[error("engine is not running")]
    NotRunning,
}

impl EngineError {
    /// エンジン再起動で回復を試みるべき種別か。
    ///
    /// Spawn / Startup は再起動しても同じ結果になりやすいため、セッションの
    /// 作り直し（dispatcher 側のリトライ）に回す。
    pub fn is_recoverable_by_restart(&self) -> bool {
        matches!(
            self,
            EngineError::Analysis(_)
                | EngineError::Write(_)
                | EngineError::Eof
                | EngineError::NotRunning
        )
    }

    pub(crate) fn handshake_timeout(stage: &str, timeout: Duration) -> Self {
        EngineError::Startup(format!("no '{stage}' within {} ms", timeout.as_millis()))
    }
}

/// 局面の再構築に失敗した。
#[derive(Debug, Error)]
pub enum PositionError {
    #[error("invalid FEN '{fen}': {reason}")]
    InvalidFen { fen: String, reason: String },

    #[error("move #{index} '{mv}' is not valid UCI")]
    InvalidMove { index: usize, mv: String },

    #[error("move #{index} '{mv}' is illegal in the current position")]
    IllegalMove { index: usize, mv: String },
}

/// Polyglot book の読み込みエラー。
#[derive(Debug, Error)]
pub enum BookError {
    #[error("failed to read opening book {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("opening book {} is truncated ({len} bytes is not a multiple of 16)", path.display())]
    Truncated { path: PathBuf, len: u64 },
}

/// リモートサービス（Lichess）との通信エラー。
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{endpoint} returned {status}: {body}")]
    Status {
        endpoint: String,
        status: u16,
        body: String,
    },

    #[error("event stream for {0} ended unexpectedly")]
    StreamClosed(String),

    #[error("game stream for {game_id} did not start with gameFull")]
    MissingGameFull { game_id: String },
}

/// 1 局分の処理（対局セッション、自己対局）が返すエラー。
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Position(#[from] PositionError),
}

/// 設定ファイルの読み込みエラー。
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("token file {} is empty", .0.display())]
    EmptyToken(PathBuf),
}
