//! 対局局面。
//!
//! サーバーから届いた指し手列を初期配置から毎回リプレイして組み立てる。
//! 差分更新はしないので、通知の取りこぼしや順序の入れ替わりがあっても
//! 次の更新でサーバーの棋譜と必ず一致する。

use shakmaty::fen::Fen;
use shakmaty::uci::UciMove;
use shakmaty::zobrist::{Zobrist64, ZobristHash};
use shakmaty::{CastlingMode, Chess, Color, EnPassantMode, Move, Position as _};

use crate::error::PositionError;

/// Lichess が標準初期配置を表すときに使う値。
pub const STARTPOS: &str = "startpos";

/// 初期配置 + 指し手列から導出した局面。
#[derive(Clone, Debug)]
pub struct Position {
    /// `None` は標準初期配置。
    initial_fen: Option<String>,
    moves: Vec<UciMove>,
    board: Chess,
}

impl Default for Position {
    fn default() -> Self {
        Self::standard()
    }
}

impl Position {
    pub fn standard() -> Self {
        Self {
            initial_fen: None,
            moves: Vec::new(),
            board: Chess::default(),
        }
    }

    /// 初期配置から `moves` を順に適用して局面を作り直す。
    ///
    /// `initial_fen` が `None` / 空 / `"startpos"` のときは標準初期配置。
    /// 各手は UCI として解釈でき、かつその時点で合法でなければならない。
    pub fn replay<S: AsRef<str>>(
        initial_fen: Option<&str>,
        moves: &[S],
    ) -> Result<Self, PositionError> {
        let initial_fen = initial_fen
            .map(str::trim)
            .filter(|fen| !fen.is_empty() && *fen != STARTPOS)
            .map(str::to_string);
        let mut board = match &initial_fen {
            Some(fen) => parse_fen(fen)?,
            None => Chess::default(),
        };

        let mut parsed = Vec::with_capacity(moves.len());
        for (index, mv_str) in moves.iter().enumerate() {
            let mv_str = mv_str.as_ref();
            let uci = UciMove::from_ascii(mv_str.as_bytes()).map_err(|_| {
                PositionError::InvalidMove {
                    index,
                    mv: mv_str.to_string(),
                }
            })?;
            let mv = uci.to_move(&board).map_err(|_| PositionError::IllegalMove {
                index,
                mv: mv_str.to_string(),
            })?;
            board.play_unchecked(&mv);
            parsed.push(uci);
        }

        Ok(Self {
            initial_fen,
            moves: parsed,
            board,
        })
    }

    /// 1 手進める。非合法なら局面は変わらない。
    pub fn push(&mut self, uci: &UciMove) -> Result<(), PositionError> {
        let mv = uci.to_move(&self.board).map_err(|_| PositionError::IllegalMove {
            index: self.moves.len(),
            mv: uci.to_string(),
        })?;
        self.board.play_unchecked(&mv);
        self.moves.push(uci.clone());
        Ok(())
    }

    pub fn side_to_move(&self) -> Color {
        self.board.turn()
    }

    /// 初期配置から指された手数。
    pub fn ply(&self) -> usize {
        self.moves.len()
    }

    pub fn moves(&self) -> &[UciMove] {
        &self.moves
    }

    pub fn initial_fen(&self) -> Option<&str> {
        self.initial_fen.as_deref()
    }

    pub fn board(&self) -> &Chess {
        &self.board
    }

    pub fn is_game_over(&self) -> bool {
        self.board.is_game_over()
    }

    /// UCI の `position` コマンド文字列。
    pub fn uci_command(&self) -> String {
        let mut cmd = match &self.initial_fen {
            Some(fen) => format!("position fen {fen}"),
            None => "position startpos".to_string(),
        };
        if !self.moves.is_empty() {
            cmd.push_str(" moves");
            for mv in &self.moves {
                cmd.push(' ');
                cmd.push_str(&mv.to_string());
            }
        }
        cmd
    }

    /// Polyglot book の検索キー。
    pub fn polyglot_key(&self) -> u64 {
        let hash: Zobrist64 = self.board.zobrist_hash(EnPassantMode::Legal);
        hash.0
    }

    /// `uci` がこの局面で合法ならその手を返す。
    pub fn legal_move(&self, uci: &UciMove) -> Option<Move> {
        uci.to_move(&self.board).ok()
    }

    /// 合法手を UCI 表記（標準キャスリング表記）で列挙する。
    pub fn legal_uci_moves(&self) -> Vec<UciMove> {
        self.board
            .legal_moves()
            .iter()
            .map(|m| m.to_uci(CastlingMode::Standard))
            .collect()
    }

    pub fn fen(&self) -> String {
        Fen::from_position(self.board.clone(), EnPassantMode::Legal).to_string()
    }
}

fn parse_fen(fen: &str) -> Result<Chess, PositionError> {
    let invalid = |reason: String| PositionError::InvalidFen {
        fen: fen.to_string(),
        reason,
    };
    let setup = Fen::from_ascii(fen.as_bytes()).map_err(|e| invalid(e.to_string()))?;
    setup
        .into_position::<Chess>(CastlingMode::Standard)
        .map_err(|e| invalid(e.to_string()))
}
