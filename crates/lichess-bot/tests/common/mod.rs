//! 結合テスト共通のヘルパー。

#![allow(dead_code)] // テストファイルごとに使う関数が異なる

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use lichess_bot::config::TimeConfig;
use lichess_bot::engine::EngineSettings;
use lichess_bot::game::{GameSetup, GameStatus, GameUpdate, MoveSink};
use lichess_bot::session::SessionDeps;
use lichess_bot::time_budget::{SpeedClass, TimeBudget};
use shakmaty::Color;
use shakmaty::uci::UciMove;

/// 通常の探索 1 回あたりの思考時間。
pub const T_THINK: Duration = Duration::from_millis(50);
/// 時間計測の許容誤差（CI の負荷を見込む）。
pub const T_SLACK: Duration = Duration::from_millis(1_000);

/// `mode` で動くスタブエンジンの設定。タイムアウトはテスト向けに短くする。
pub fn mock_settings(mode: &str) -> EngineSettings {
    let mut settings = EngineSettings::new(env!("CARGO_BIN_EXE_mock_uci_engine"));
    settings.args = vec![mode.to_string()];
    settings.handshake_timeout = Duration::from_millis(2_000);
    settings.quit_timeout = Duration::from_millis(300);
    settings.analysis_grace = Duration::from_millis(500);
    settings
}

/// 受信した UCI コマンドを `log` に書き出すスタブエンジンの設定。
pub fn logging_mock_settings(mode: &str, log: &Path) -> EngineSettings {
    let mut settings = mock_settings(mode);
    settings.args.push(log.display().to_string());
    settings
}

/// 初手も途中局面も [`T_THINK`] 前後で返る思考時間表。
pub fn fast_time_budget() -> TimeBudget {
    let config = TimeConfig {
        min_budget_ms: T_THINK.as_millis() as u64,
        default_divisor: 30,
        divisors: Default::default(),
        first_move_ms: Default::default(),
        default_first_move_ms: T_THINK.as_millis() as u64,
    };
    TimeBudget::from_config(&config)
}

/// 提出された指し手を記録する。
#[derive(Default)]
pub struct RecordingSink {
    moves: Mutex<Vec<(String, String)>>,
}

impl RecordingSink {
    pub fn moves(&self) -> Vec<String> {
        self.moves
            .lock()
            .unwrap()
            .iter()
            .map(|(_, mv)| mv.clone())
            .collect()
    }

    pub fn games(&self) -> Vec<String> {
        self.moves
            .lock()
            .unwrap()
            .iter()
            .map(|(game, _)| game.clone())
            .collect()
    }
}

impl MoveSink for RecordingSink {
    fn submit(&self, game_id: &str, mv: &UciMove) {
        self.moves
            .lock()
            .unwrap()
            .push((game_id.to_string(), mv.to_string()));
    }
}

pub fn deps(engine: EngineSettings, sink: &Arc<RecordingSink>) -> SessionDeps {
    SessionDeps {
        engine,
        time_budget: Arc::new(fast_time_budget()),
        book: None,
        sink: sink.clone(),
    }
}

pub fn setup(color: Color, is_my_turn: bool) -> GameSetup {
    GameSetup {
        game_id: "testgame".to_string(),
        color,
        speed: SpeedClass::Blitz,
        initial_fen: None,
        is_my_turn: Some(is_my_turn),
    }
}

/// 双方の残り 1.5 秒（除数 30 で 50ms）の進行中更新。
pub fn update(moves: &str) -> GameUpdate {
    GameUpdate::from_move_text(moves, GameStatus::Started, 1_500, 1_500)
}

pub fn finished(moves: &str, status: GameStatus) -> GameUpdate {
    GameUpdate::from_move_text(moves, status, 1_500, 1_500)
}
