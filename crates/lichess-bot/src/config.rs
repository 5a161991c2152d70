//! TOML 設定ファイル。
//!
//! すべての項目に既定値があり、ファイル自体も省略できる。
//!
//! ```toml
//! [engine]
//! path = "../target/release/rust_chess"
//! quit_timeout_ms = 1000
//! analysis_grace_ms = 2000
//!
//! [engine.options]
//! Hash = 128
//! Threads = 2
//!
//! [time]
//! min_budget_ms = 100
//! default_divisor = 30
//! divisors = { bullet = 40 }
//!
//! [book]
//! path = "books/performance.bin"
//!
//! [lichess]
//! token_file = "lichess.token"
//!
//! [challenge]
//! allowed_challengers_file = "allowed.challengers"
//! rated_speeds = ["bullet", "blitz", "rapid"]
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::engine::EngineSettings;
use crate::error::ConfigError;
use crate::time_budget::{DEFAULT_DIVISOR, DEFAULT_FIRST_MOVE, DEFAULT_MIN_BUDGET};

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(default, deny_unknown_fields)]
pub struct BotConfig {
    pub engine: EngineConfig,
    pub time: TimeConfig,
    pub book: BookConfig,
    pub lichess: LichessConfig,
    pub challenge: ChallengeConfig,
}

impl BotConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text, path)
    }

    pub fn parse(text: &str, origin: &Path) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: origin.to_path_buf(),
            source,
        })
    }
}

/// エンジンプロセスの設定。
#[derive(Deserialize, Debug, Clone)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    pub path: PathBuf,
    pub args: Vec<String>,
    pub handshake_timeout_ms: u64,
    pub quit_timeout_ms: u64,
    pub analysis_grace_ms: u64,
    /// `setoption` で渡す UCI オプション。値は文字列化して送る。
    pub options: BTreeMap<String, toml::Value>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("../target/release/rust_chess"),
            args: Vec::new(),
            handshake_timeout_ms: 10_000,
            quit_timeout_ms: 1_000,
            analysis_grace_ms: 2_000,
            options: BTreeMap::new(),
        }
    }
}

impl EngineConfig {
    pub fn to_settings(&self) -> EngineSettings {
        EngineSettings {
            path: self.path.clone(),
            args: self.args.clone(),
            options: self
                .options
                .iter()
                .map(|(name, value)| (name.clone(), option_value_string(value)))
                .collect(),
            handshake_timeout: Duration::from_millis(self.handshake_timeout_ms),
            quit_timeout: Duration::from_millis(self.quit_timeout_ms),
            analysis_grace: Duration::from_millis(self.analysis_grace_ms),
        }
    }
}

fn option_value_string(value: &toml::Value) -> String {
    match value {
        toml::Value::String(s) => s.clone(),
        toml::Value::Integer(i) => i.to_string(),
        toml::Value::Float(f) => f.to_string(),
        toml::Value::Boolean(b) => b.to_string(),
        other => other.to_string(),
    }
}

/// 思考時間の設定。
#[derive(Deserialize, Debug, Clone)]
#[serde(default, deny_unknown_fields)]
pub struct TimeConfig {
    pub min_budget_ms: u64,
    pub default_divisor: u32,
    /// 速度区分名 (`bullet` 等) → 除数。
    pub divisors: BTreeMap<String, u32>,
    /// 速度区分名 → 時計が動く前の初手思考時間 (ms)。
    pub first_move_ms: BTreeMap<String, u64>,
    pub default_first_move_ms: u64,
}

impl Default for TimeConfig {
    fn default() -> Self {
        let first_move_ms = [
            ("ultraBullet", 200),
            ("bullet", 200),
            ("blitz", 1_000),
            ("rapid", 5_000),
            ("classical", 10_000),
            ("correspondence", 60_000),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();
        Self {
            min_budget_ms: DEFAULT_MIN_BUDGET.as_millis() as u64,
            default_divisor: DEFAULT_DIVISOR,
            divisors: BTreeMap::new(),
            first_move_ms,
            default_first_move_ms: DEFAULT_FIRST_MOVE.as_millis() as u64,
        }
    }
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(default, deny_unknown_fields)]
pub struct BookConfig {
    /// Polyglot `.bin`。未指定なら book なし。
    pub path: Option<PathBuf>,
    /// book 抽選の乱数シード。未指定なら OS 乱数。
    pub seed: Option<u64>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default, deny_unknown_fields)]
pub struct LichessConfig {
    pub base_url: String,
    pub token_file: PathBuf,
    pub restart_backoff_ms: u64,
    /// Spawn / Startup 失敗時にセッションを作り直す上限回数。
    pub max_session_restarts: u32,
}

impl Default for LichessConfig {
    fn default() -> Self {
        Self {
            base_url: "https://lichess.org".to_string(),
            token_file: PathBuf::from("lichess.token"),
            restart_backoff_ms: 1_000,
            max_session_restarts: 3,
        }
    }
}

impl LichessConfig {
    pub fn restart_backoff(&self) -> Duration {
        Duration::from_millis(self.restart_backoff_ms)
    }

    /// トークンファイルを読み、前後の空白を落として返す。
    pub fn read_token(&self) -> Result<String, ConfigError> {
        let text =
            std::fs::read_to_string(&self.token_file).map_err(|source| ConfigError::Io {
                path: self.token_file.clone(),
                source,
            })?;
        let token = text.trim();
        if token.is_empty() {
            return Err(ConfigError::EmptyToken(self.token_file.clone()));
        }
        Ok(token.to_string())
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default, deny_unknown_fields)]
pub struct ChallengeConfig {
    /// 1 行 1 ユーザー ID。ここに載っている相手の挑戦は条件なしで受ける。
    pub allowed_challengers_file: Option<PathBuf>,
    /// それ以外の相手から受けるレーティング戦の速度区分。
    pub rated_speeds: Vec<String>,
}

impl Default for ChallengeConfig {
    fn default() -> Self {
        Self {
            allowed_challengers_file: Some(PathBuf::from("allowed.challengers")),
            rated_speeds: vec!["bullet".into(), "blitz".into(), "rapid".into()],
        }
    }
}
