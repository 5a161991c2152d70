//! 2 つのエンジンを指し合わせる自己対局。
//!
//! 1 局ごとに両エンジンを起動し直し、先後を入れ替えながら勝敗を集計する。
//! 各手は固定の思考時間で探索させ、book があれば先に引く。

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use log::{debug, info, warn};
use serde::Serialize;
use shakmaty::uci::UciMove;
use shakmaty::{Color, Outcome, Position as _};

use crate::book::BookSelector;
use crate::engine::EngineClient;
use crate::error::{EngineError, SessionError};
use crate::position::Position;

/// 1 局の最大手数。超えたら引き分け。
pub const DEFAULT_MAX_PLIES: u32 = 500;

#[derive(Clone, Debug)]
pub struct MatchConfig {
    pub games: u32,
    pub movetime: Duration,
    pub max_plies: u32,
    /// `None` は標準初期配置。
    pub start_fen: Option<String>,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            games: 1,
            movetime: Duration::from_millis(500),
            max_plies: DEFAULT_MAX_PLIES,
            start_fen: None,
        }
    }
}

/// 対局者。エンジンと、使うなら book。
pub struct Contestant {
    pub name: String,
    pub engine: EngineClient,
    pub book: Option<BookSelector>,
}

impl Contestant {
    pub fn new(name: impl Into<String>, engine: EngineClient, book: Option<BookSelector>) -> Self {
        Self {
            name: name.into(),
            engine,
            book,
        }
    }

    async fn choose(
        &mut self,
        position: &Position,
        movetime: Duration,
    ) -> Result<UciMove, EngineError> {
        if let Some(book) = self.book.as_mut() {
            if let Some(mv) = book.choose(position) {
                debug!("{}: book move {mv}", self.name);
                return Ok(mv);
            }
        }
        let result = self.engine.analyze(position, movetime).await?;
        debug!(
            "{}: ply {} move {} {}",
            self.name,
            position.ply(),
            result.best_move,
            result.info.to_json()
        );
        Ok(result.best_move)
    }
}

/// 1 局の結果。`winner` が `None` なら引き分け。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GameRecord {
    pub winner: Option<Color>,
    pub reason: String,
    pub plies: usize,
}

/// 対局者 A から見た結果。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MatchOutcome {
    WinA,
    WinB,
    Draw,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct MatchStats {
    pub wins_a: u32,
    pub wins_b: u32,
    pub draws: u32,
    pub total: u32,
}

impl MatchStats {
    pub fn record(&mut self, outcome: MatchOutcome) {
        match outcome {
            MatchOutcome::WinA => self.wins_a += 1,
            MatchOutcome::WinB => self.wins_b += 1,
            MatchOutcome::Draw => self.draws += 1,
        }
        self.total += 1;
    }

    /// A の得点率（引き分けは 0.5）。対局がなければ `None`。
    pub fn score_a(&self) -> Option<f64> {
        (self.total > 0)
            .then(|| (f64::from(self.wins_a) + 0.5 * f64::from(self.draws)) / f64::from(self.total))
    }
}

impl fmt::Display for MatchStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "+{} ={} -{} ({} games)",
            self.wins_a, self.draws, self.wins_b, self.total
        )
    }
}

/// 終局していれば勝者と理由を返す。
///
/// `seen` は局面キーごとの出現回数（現局面を含む）。
pub fn adjudicate(
    position: &Position,
    seen: &HashMap<u64, u32>,
) -> Option<(Option<Color>, &'static str)> {
    let board = position.board();
    match board.outcome() {
        Some(Outcome::Decisive { winner }) => return Some((Some(winner), "checkmate")),
        Some(Outcome::Draw) if board.is_stalemate() => return Some((None, "stalemate")),
        Some(Outcome::Draw) => return Some((None, "insufficient material")),
        None => {}
    }
    if board.halfmoves() >= 100 {
        return Some((None, "fifty-move rule"));
    }
    if seen.get(&position.polyglot_key()).copied().unwrap_or(0) >= 3 {
        return Some((None, "threefold repetition"));
    }
    None
}

/// 起動済みの 2 エンジンで 1 局指す。
///
/// 探索に失敗した側、非合法手を返した側の負け。エンジンの停止は呼び出し側が行う。
pub async fn play_game(
    white: &mut Contestant,
    black: &mut Contestant,
    config: &MatchConfig,
) -> Result<GameRecord, SessionError> {
    let mut position = Position::replay(config.start_fen.as_deref(), &[] as &[&str])?;
    let mut seen: HashMap<u64, u32> = HashMap::new();
    *seen.entry(position.polyglot_key()).or_default() += 1;

    loop {
        let plies = position.ply();
        let finish = |winner: Option<Color>, reason: &str| GameRecord {
            winner,
            reason: reason.to_string(),
            plies,
        };
        if let Some((winner, reason)) = adjudicate(&position, &seen) {
            return Ok(finish(winner, reason));
        }
        if plies >= config.max_plies as usize {
            return Ok(finish(None, "move limit"));
        }

        let side = position.side_to_move();
        let player = match side {
            Color::White => &mut *white,
            Color::Black => &mut *black,
        };
        let mv = match player.choose(&position, config.movetime).await {
            Ok(mv) => mv,
            Err(e) if e.is_recoverable_by_restart() => {
                warn!("{}: {e}; forfeits the game", player.name);
                return Ok(finish(Some(!side), "engine failure"));
            }
            Err(e) => return Err(e.into()),
        };
        if let Err(e) = position.push(&mv) {
            warn!("{}: {e}; forfeits the game", player.name);
            return Ok(finish(Some(!side), "illegal move"));
        }
        *seen.entry(position.polyglot_key()).or_default() += 1;
    }
}

/// `config.games` 局指す。偶数局目（0 始まり）は A が白。
pub async fn run_match(
    a: &mut Contestant,
    b: &mut Contestant,
    config: &MatchConfig,
) -> Result<MatchStats, SessionError> {
    let mut stats = MatchStats::default();
    for game in 0..config.games {
        let a_color = if game % 2 == 0 { Color::White } else { Color::Black };
        let result: Result<GameRecord, SessionError> = async {
            a.engine.start().await?;
            b.engine.start().await?;
            match a_color {
                Color::White => play_game(&mut *a, &mut *b, config).await,
                Color::Black => play_game(&mut *b, &mut *a, config).await,
            }
        }
        .await;
        a.engine.quit().await;
        b.engine.quit().await;
        let record = result?;

        let outcome = match record.winner {
            None => MatchOutcome::Draw,
            Some(winner) if winner == a_color => MatchOutcome::WinA,
            Some(_) => MatchOutcome::WinB,
        };
        stats.record(outcome);
        let verdict = match outcome {
            MatchOutcome::WinA => format!("win for {}", a.name),
            MatchOutcome::WinB => format!("win for {}", b.name),
            MatchOutcome::Draw => "draw".to_string(),
        };
        info!(
            "game {}/{} done: {verdict} by {} after {} plies ({} played {:?}); {stats}",
            game + 1,
            config.games,
            record.reason,
            record.plies,
            a.name,
            a_color
        );
    }
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(fen: &str) -> Position {
        Position::replay(Some(fen), &[] as &[&str]).unwrap()
    }

    fn once(position: &Position) -> HashMap<u64, u32> {
        HashMap::from([(position.polyglot_key(), 1)])
    }

    #[test]
    fn checkmate_names_the_winner() {
        let mated = at("rnb1kbnr/pppp1ppp/8/4p3/6Pq/5P2/PPPPP2P/RNBQKBNR w KQkq - 1 3");
        assert_eq!(
            adjudicate(&mated, &once(&mated)),
            Some((Some(Color::Black), "checkmate"))
        );
    }

    #[test]
    fn draws_are_recognised() {
        let stalemate = at("7k/5Q2/6K1/8/8/8/8/8 b - - 0 1");
        assert_eq!(
            adjudicate(&stalemate, &once(&stalemate)),
            Some((None, "stalemate"))
        );

        let bare_kings = at("8/8/8/4k3/8/8/8/4K3 w - - 0 1");
        assert_eq!(
            adjudicate(&bare_kings, &once(&bare_kings)),
            Some((None, "insufficient material"))
        );

        let fifty = at("8/8/8/4k3/8/8/8/4K2R w K - 100 80");
        assert_eq!(adjudicate(&fifty, &once(&fifty)), Some((None, "fifty-move rule")));
    }

    #[test]
    fn third_occurrence_is_a_repetition_draw() {
        let start = Position::standard();
        let mut seen = HashMap::from([(start.polyglot_key(), 2)]);
        assert_eq!(adjudicate(&start, &seen), None);
        seen.insert(start.polyglot_key(), 3);
        assert_eq!(adjudicate(&start, &seen), Some((None, "threefold repetition")));
    }

    #[test]
    fn stats_count_from_the_first_engine() {
        let mut stats = MatchStats::default();
        assert_eq!(stats.score_a(), None);
        stats.record(MatchOutcome::WinA);
        stats.record(MatchOutcome::Draw);
        stats.record(MatchOutcome::WinB);
        stats.record(MatchOutcome::WinA);
        assert_eq!(
            stats,
            MatchStats {
                wins_a: 2,
                wins_b: 1,
                draws: 1,
                total: 4
            }
        );
        assert_eq!(stats.score_a(), Some(0.625));
        assert_eq!(stats.to_string(), "+2 =1 -1 (4 games)");
    }
}
