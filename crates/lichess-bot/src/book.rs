//! Polyglot 形式の定跡と、重み付き抽選。

use std::path::Path;
use std::sync::Arc;

use byteorder::{BigEndian, ByteOrder};
use log::{debug, info};
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;
use shakmaty::uci::UciMove;
use shakmaty::{CastlingMode, Move, Position as _, Role, Square};

use crate::error::BookError;
use crate::position::Position;

/// 1 レコードのバイト数 (key u64, move u16, weight u16, learn u32)。
const RECORD_SIZE: usize = 16;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BookEntry {
    /// Polyglot の指し手エンコード。
    pub mv: u16,
    pub weight: u16,
}

/// キーでソート済みのエントリ列。読み込み後は不変なので対局間で共有する。
#[derive(Clone, Debug, Default)]
pub struct OpeningBook {
    entries: Vec<(u64, BookEntry)>,
}

impl OpeningBook {
    pub fn load(path: &Path) -> Result<Self, BookError> {
        let bytes = std::fs::read(path).map_err(|source| BookError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        if bytes.len() % RECORD_SIZE != 0 {
            return Err(BookError::Truncated {
                path: path.to_path_buf(),
                len: bytes.len() as u64,
            });
        }
        let entries = bytes
            .chunks_exact(RECORD_SIZE)
            .map(|record| {
                let key = BigEndian::read_u64(&record[0..8]);
                let mv = BigEndian::read_u16(&record[8..10]);
                let weight = BigEndian::read_u16(&record[10..12]);
                (key, BookEntry { mv, weight })
            })
            .collect();
        let book = Self::from_entries(entries);
        info!("loaded opening book {} ({} entries)", path.display(), book.len());
        Ok(book)
    }

    /// ソートされていなくてもよい。
    pub fn from_entries(mut entries: Vec<(u64, BookEntry)>) -> Self {
        entries.sort_by_key(|(key, _)| *key);
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries_for(&self, key: u64) -> &[(u64, BookEntry)] {
        let start = self.entries.partition_point(|(k, _)| *k < key);
        let end = self.entries.partition_point(|(k, _)| *k <= key);
        &self.entries[start..end]
    }
}

/// book 参照と乱数状態。1 対局に 1 つ。
pub struct BookSelector {
    book: Arc<OpeningBook>,
    rng: Xoshiro256PlusPlus,
}

impl BookSelector {
    /// `seed` 指定時は再現可能な抽選になる。
    pub fn new(book: Arc<OpeningBook>, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => Xoshiro256PlusPlus::seed_from_u64(seed),
            None => Xoshiro256PlusPlus::from_rng(&mut rand::rng()),
        };
        Self { book, rng }
    }

    /// 局面に合法な book 手があれば重みに比例して 1 つ選ぶ。
    pub fn choose(&mut self, position: &Position) -> Option<UciMove> {
        let key = position.polyglot_key();
        let candidates: Vec<(Move, u32)> = self
            .book
            .entries_for(key)
            .iter()
            .filter(|(_, entry)| entry.weight > 0)
            .filter_map(|(_, entry)| {
                resolve_move(position, entry.mv).map(|m| (m, u32::from(entry.weight)))
            })
            .collect();
        if candidates.is_empty() {
            return None;
        }

        let total: u32 = candidates.iter().map(|(_, w)| w).sum();
        let mut pick = self.rng.random_range(0..total);
        for (mv, weight) in &candidates {
            if pick < *weight {
                debug!("book hit: {} of {} candidates", mv, candidates.len());
                return Some(mv.to_uci(CastlingMode::Standard));
            }
            pick -= weight;
        }
        None
    }
}

/// Polyglot の 16bit 表現を局面の合法手に対応付ける。
///
/// bit 0-5: 移動先、6-11: 移動元、12-14: 成り駒 (1=N 2=B 3=R 4=Q)。
/// キャスリングは「キングがルークを取る」形で表される。
fn resolve_move(position: &Position, raw: u16) -> Option<Move> {
    let to = Square::new(u32::from(raw & 0x3f));
    let from = Square::new(u32::from((raw >> 6) & 0x3f));
    let promotion = match (raw >> 12) & 0x7 {
        0 => None,
        1 => Some(Role::Knight),
        2 => Some(Role::Bishop),
        3 => Some(Role::Rook),
        4 => Some(Role::Queen),
        _ => return None,
    };
    position
        .board()
        .legal_moves()
        .into_iter()
        .find(|m| m.from() == Some(from) && m.to() == to && m.promotion() == promotion)
}

/// [`resolve_move`] の逆。book の作成やテストで使う。
pub fn encode_move(mv: &Move) -> u16 {
    let to = mv.to() as u16;
    let from = mv.from().map_or(0, |sq| sq as u16);
    let promotion = match mv.promotion() {
        Some(Role::Knight) => 1,
        Some(Role::Bishop) => 2,
        Some(Role::Rook) => 3,
        Some(Role::Queen) => 4,
        _ => 0,
    };
    to | (from << 6) | (promotion << 12)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn book_move(position: &Position, uci: &str) -> u16 {
        let uci = UciMove::from_ascii(uci.as_bytes()).unwrap();
        encode_move(&position.legal_move(&uci).unwrap())
    }

    #[test]
    fn polyglot_encoding_of_known_moves() {
        let start = Position::standard();
        // e2e4: from=12, to=28
        assert_eq!(book_move(&start, "e2e4"), (12 << 6) | 28);
        let castle = Position::replay(None, &["e2e4", "e7e5", "g1f3", "b8c6", "f1c4", "g8f6"])
            .unwrap();
        // e1g1 は e1h1 (from=4, to=7) として格納される
        assert_eq!(book_move(&castle, "e1g1"), (4 << 6) | 7);
    }

    #[test]
    fn castling_entry_resolves_to_standard_notation() {
        let pos = Position::replay(None, &["e2e4", "e7e5", "g1f3", "b8c6", "f1c4", "g8f6"])
            .unwrap();
        let book = OpeningBook::from_entries(vec![(
            pos.polyglot_key(),
            BookEntry { mv: (4 << 6) | 7, weight: 1 },
        )]);
        let mut selector = BookSelector::new(Arc::new(book), Some(1));
        assert_eq!(selector.choose(&pos).unwrap().to_string(), "e1g1");
    }

    #[test]
    fn draws_follow_the_weights() {
        let start = Position::standard();
        let key = start.polyglot_key();
        let book = OpeningBook::from_entries(vec![
            (key, BookEntry { mv: book_move(&start, "e2e4"), weight: 3 }),
            (key, BookEntry { mv: book_move(&start, "d2d4"), weight: 1 }),
            (key, BookEntry { mv: book_move(&start, "a2a3"), weight: 0 }),
            (key ^ 1, BookEntry { mv: book_move(&start, "h2h4"), weight: 100 }),
        ]);
        let mut selector = BookSelector::new(Arc::new(book), Some(7));

        let mut e4 = 0;
        let mut d4 = 0;
        for _ in 0..10_000 {
            match selector.choose(&start).unwrap().to_string().as_str() {
                "e2e4" => e4 += 1,
                "d2d4" => d4 += 1,
                other => panic!("unexpected book move {other}"),
            }
        }
        assert!((7_200..=7_800).contains(&e4), "e2e4 drawn {e4} times");
        assert_eq!(e4 + d4, 10_000);
    }

    #[test]
    fn illegal_or_missing_entries_yield_nothing() {
        let start = Position::standard();
        let book = OpeningBook::from_entries(vec![(
            start.polyglot_key(),
            // e2e5 は合法手ではない
            BookEntry { mv: (12 << 6) | 36, weight: 5 },
        )]);
        let mut selector = BookSelector::new(Arc::new(book), None);
        assert!(selector.choose(&start).is_none());
        let after_e4 = Position::replay(None, &["e2e4"]).unwrap();
        assert!(selector.choose(&after_e4).is_none());
    }

    #[test]
    fn load_reads_big_endian_records() {
        let start = Position::standard();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let mut record = Vec::new();
        record.extend_from_slice(&start.polyglot_key().to_be_bytes());
        record.extend_from_slice(&book_move(&start, "g1f3").to_be_bytes());
        record.extend_from_slice(&10u16.to_be_bytes());
        record.extend_from_slice(&0u32.to_be_bytes());
        file.write_all(&record).unwrap();
        file.flush().unwrap();

        let book = OpeningBook::load(file.path()).unwrap();
        assert_eq!(book.len(), 1);
        let mut selector = BookSelector::new(Arc::new(book), Some(0));
        assert_eq!(selector.choose(&start).unwrap().to_string(), "g1f3");

        file.write_all(&[0u8; 5]).unwrap();
        file.flush().unwrap();
        assert!(matches!(
            OpeningBook::load(file.path()),
            Err(BookError::Truncated { len: 21, .. })
        ));
    }
}
