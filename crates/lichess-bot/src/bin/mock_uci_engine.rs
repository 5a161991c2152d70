//! 結合テスト用の UCI エンジンスタブ。
//!
//! 探索はせず、`stop` を受けたら最初の合法手を返す。第 1 引数で異常系の振る舞いを選ぶ。
//!
//! - `normal`: 通常動作
//! - `mute`: 何にも応答しない（stdin が閉じたら終了）
//! - `ignore-quit`: `quit` を無視して居座る
//! - `no-bestmove`: `stop` を無視する
//! - `crash-on-go`: `go` を受けたら異常終了する
//! - `early-bestmove`: `go` を受けた直後に bestmove を返す
//! - `illegal-move`: 盤面上で非合法な手を返す
//!
//! 第 2 引数にパスを渡すと、受信した行をそのファイルに追記する。

use std::fs::OpenOptions;
use std::io::{self, BufRead, Write};
use std::process::ExitCode;

use lichess_bot::position::Position;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mode {
    Normal,
    Mute,
    IgnoreQuit,
    NoBestmove,
    CrashOnGo,
    EarlyBestmove,
    IllegalMove,
}

impl Mode {
    fn parse(arg: Option<&str>) -> Option<Mode> {
        Some(match arg.unwrap_or("normal") {
            "normal" => Mode::Normal,
            "mute" => Mode::Mute,
            "ignore-quit" => Mode::IgnoreQuit,
            "no-bestmove" => Mode::NoBestmove,
            "crash-on-go" => Mode::CrashOnGo,
            "early-bestmove" => Mode::EarlyBestmove,
            "illegal-move" => Mode::IllegalMove,
            _ => return None,
        })
    }
}

fn main() -> ExitCode {
    let mut args = std::env::args().skip(1);
    let arg = args.next();
    let Some(mode) = Mode::parse(arg.as_deref()) else {
        eprintln!("unknown mode {arg:?}");
        return ExitCode::from(2);
    };
    let mut log = args
        .next()
        .and_then(|path| OpenOptions::new().create(true).append(true).open(path).ok());

    let stdin = io::stdin();
    let mut out = io::stdout().lock();
    let mut position = Position::standard();
    let mut searching = false;

    for line in stdin.lock().lines() {
        let Ok(line) = line else { break };
        let line = line.trim().to_string();
        if let Some(log) = log.as_mut() {
            let _ = writeln!(log, "{line}");
        }
        if mode == Mode::Mute {
            continue;
        }

        let reply: Vec<String> = match line.split_whitespace().next() {
            Some("uci") => vec![
                "id name MockEngine".to_string(),
                "id author test".to_string(),
                "option name Hash type spin default 16 min 1 max 1024".to_string(),
                "uciok".to_string(),
            ],
            Some("isready") => vec!["readyok".to_string()],
            Some("position") => {
                match parse_position(&line) {
                    Some(parsed) => position = parsed,
                    None => eprintln!("mock: cannot parse '{line}'"),
                }
                Vec::new()
            }
            Some("go") => match mode {
                Mode::CrashOnGo => return ExitCode::from(3),
                Mode::EarlyBestmove => search_result(&position, mode),
                _ => {
                    searching = true;
                    vec!["info depth 1 seldepth 1 score cp 0 nodes 1 pv".to_string()]
                }
            },
            Some("stop") if searching && mode != Mode::NoBestmove => {
                searching = false;
                search_result(&position, mode)
            }
            Some("quit") if mode != Mode::IgnoreQuit => return ExitCode::SUCCESS,
            _ => Vec::new(),
        };
        for reply in reply {
            let _ = writeln!(out, "{reply}");
        }
        let _ = out.flush();
    }

    if mode == Mode::IgnoreQuit {
        // stdin が閉じても kill されるまで残る
        loop {
            std::thread::park();
        }
    }
    ExitCode::SUCCESS
}

fn parse_position(line: &str) -> Option<Position> {
    let rest = line.strip_prefix("position")?.trim();
    let (setup, moves) = match rest.split_once(" moves") {
        Some((setup, moves)) => (setup.trim(), moves.split_whitespace().collect::<Vec<_>>()),
        None => (rest, Vec::new()),
    };
    let fen = match setup {
        "startpos" => None,
        other => Some(other.strip_prefix("fen")?.trim()),
    };
    Position::replay(fen, &moves).ok()
}

fn search_result(position: &Position, mode: Mode) -> Vec<String> {
    let best = if mode == Mode::IllegalMove {
        // 初期局面でも途中局面でもまず合法にならない手
        "a1a8".to_string()
    } else {
        position
            .legal_uci_moves()
            .first()
            .map_or_else(|| "(none)".to_string(), ToString::to_string)
    };
    vec![
        format!("info depth 7 seldepth 9 multipv 1 score cp 31 nodes 4200 nps 42000 time 100 pv {best}"),
        format!("bestmove {best}"),
    ]
}
