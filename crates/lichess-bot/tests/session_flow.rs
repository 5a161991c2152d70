//! GameSession をスタブエンジンと組み合わせて、手番判定と終局処理を確認する。

mod common;

use std::sync::Arc;

use common::{RecordingSink, deps, finished, logging_mock_settings, mock_settings, setup, update};
use lichess_bot::book::{BookEntry, BookSelector, OpeningBook, encode_move};
use lichess_bot::engine::ProcessState;
use lichess_bot::game::{GameEvent, GameStatus};
use lichess_bot::position::Position;
use lichess_bot::session::{GameSession, SessionState};
use shakmaty::Color;
use shakmaty::uci::UciMove;
use tokio::sync::{mpsc, watch};

#[tokio::test]
async fn white_moves_before_any_update_arrives() {
    let sink = Arc::new(RecordingSink::default());
    let mut session = GameSession::start(
        setup(Color::White, true),
        update(""),
        deps(mock_settings("normal"), &sink),
    )
    .await
    .unwrap();
    assert_eq!(session.state(), SessionState::AwaitingTurn);
    assert_eq!(session.engine_state(), ProcessState::Running);

    session.begin().await.unwrap();
    let moves = sink.moves();
    assert_eq!(moves.len(), 1);
    assert_eq!(sink.games(), vec!["testgame"]);
    assert!(Position::replay(None, &moves).is_ok());
    assert_eq!(session.state(), SessionState::AwaitingTurn);

    // gameFull と同じ内容の通知が来ても 2 手目は出さない
    session.begin().await.unwrap();
    session
        .handle_event(GameEvent::Update(update("")))
        .await
        .unwrap();
    assert_eq!(sink.moves().len(), 1);

    session.finish().await;
    assert_eq!(session.engine_state(), ProcessState::Stopped);
}

#[tokio::test]
async fn duplicate_updates_do_not_trigger_a_second_decision() {
    let sink = Arc::new(RecordingSink::default());
    let mut session = GameSession::start(
        setup(Color::White, true),
        update(""),
        deps(mock_settings("normal"), &sink),
    )
    .await
    .unwrap();
    session.begin().await.unwrap();
    let first = sink.moves()[0].clone();

    let reply = format!("{first} e7e5");
    session
        .handle_event(GameEvent::Update(update(&reply)))
        .await
        .unwrap();
    assert_eq!(sink.moves().len(), 2);

    session
        .handle_event(GameEvent::Update(update(&reply)))
        .await
        .unwrap();
    assert_eq!(sink.moves().len(), 2);
    session.finish().await;
}

#[tokio::test]
async fn black_answers_only_odd_length_histories() {
    let sink = Arc::new(RecordingSink::default());
    let mut session = GameSession::start(
        setup(Color::Black, false),
        update(""),
        deps(mock_settings("normal"), &sink),
    )
    .await
    .unwrap();
    session.begin().await.unwrap();
    assert!(sink.moves().is_empty());

    session
        .handle_event(GameEvent::Update(update("e2e4")))
        .await
        .unwrap();
    assert_eq!(sink.moves().len(), 1);
    let ours = sink.moves()[0].clone();

    // 自分の手が反映された通知（長さ 2）では動かない
    session
        .handle_event(GameEvent::Update(update(&format!("e2e4 {ours}"))))
        .await
        .unwrap();
    assert_eq!(sink.moves().len(), 1);
    assert_eq!(session.state(), SessionState::AwaitingTurn);

    session
        .handle_event(GameEvent::Update(update(&format!("e2e4 {ours} g1f3"))))
        .await
        .unwrap();
    assert_eq!(sink.moves().len(), 2);
    session.finish().await;
}

#[tokio::test]
async fn turn_follows_the_board_not_the_move_count() {
    // 黒番から始まる局面。手数 0 でも黒が指す
    let sink = Arc::new(RecordingSink::default());
    let mut game = setup(Color::Black, true);
    game.initial_fen =
        Some("rnbqkbnr/pppppppp/8/8/4P3/8/PPPP1PPP/RNBQKBNR b KQkq - 0 1".to_string());
    let mut session = GameSession::start(game, update(""), deps(mock_settings("normal"), &sink))
        .await
        .unwrap();
    session.begin().await.unwrap();
    assert_eq!(sink.moves().len(), 1);
    session.finish().await;
}

#[tokio::test]
async fn terminal_status_releases_the_engine() {
    let sink = Arc::new(RecordingSink::default());
    let mut session = GameSession::start(
        setup(Color::Black, false),
        update(""),
        deps(mock_settings("normal"), &sink),
    )
    .await
    .unwrap();
    session
        .handle_event(GameEvent::Update(finished("", GameStatus::Aborted)))
        .await
        .unwrap();
    assert_eq!(session.state(), SessionState::Finished);
    assert_eq!(session.engine_state(), ProcessState::Stopped);

    // 終局後の通知は無視する
    session
        .handle_event(GameEvent::Update(update("e2e4")))
        .await
        .unwrap();
    assert!(sink.moves().is_empty());
    assert_eq!(session.state(), SessionState::Finished);
}

#[tokio::test]
async fn finished_game_does_not_spawn_an_engine() {
    let sink = Arc::new(RecordingSink::default());
    let session = GameSession::start(
        setup(Color::White, true),
        finished("e2e4 e7e5", GameStatus::Resign),
        deps(mock_settings("normal"), &sink),
    )
    .await
    .unwrap();
    assert_eq!(session.state(), SessionState::Finished);
    assert_eq!(session.engine_state(), ProcessState::NotStarted);
}

#[tokio::test]
async fn book_moves_skip_the_engine() {
    let start = Position::standard();
    let e4 = start
        .legal_move(&UciMove::from_ascii(b"e2e4").unwrap())
        .unwrap();
    let book = OpeningBook::from_entries(vec![(
        start.polyglot_key(),
        BookEntry {
            mv: encode_move(&e4),
            weight: 1,
        },
    )]);

    // go を受けたら落ちるエンジンでも book があれば指せる
    let sink = Arc::new(RecordingSink::default());
    let mut session_deps = deps(mock_settings("crash-on-go"), &sink);
    session_deps.book = Some(BookSelector::new(Arc::new(book), Some(1)));
    let mut session = GameSession::start(setup(Color::White, true), update(""), session_deps)
        .await
        .unwrap();
    session.begin().await.unwrap();
    assert_eq!(sink.moves(), vec!["e2e4"]);
    assert_eq!(session.engine_state(), ProcessState::Running);
    session.finish().await;
}

#[tokio::test]
async fn illegal_engine_move_restarts_the_engine_without_submitting() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("uci.log");
    let sink = Arc::new(RecordingSink::default());
    let mut session = GameSession::start(
        setup(Color::White, true),
        update(""),
        deps(logging_mock_settings("illegal-move", &log), &sink),
    )
    .await
    .unwrap();

    session.begin().await.unwrap();
    assert!(sink.moves().is_empty());
    assert_eq!(session.state(), SessionState::AwaitingTurn);
    assert_eq!(session.engine_state(), ProcessState::Running);

    let handshakes = |log: &std::path::Path| {
        std::fs::read_to_string(log)
            .unwrap()
            .lines()
            .filter(|line| *line == "uci")
            .count()
    };
    assert_eq!(handshakes(&log), 2);

    // 局面更新でない通知では決め直さない
    session
        .handle_event(GameEvent::Chat {
            username: "opponent".to_string(),
            text: "hi".to_string(),
        })
        .await
        .unwrap();
    session
        .handle_event(GameEvent::OpponentGone { gone: false })
        .await
        .unwrap();
    assert_eq!(handshakes(&log), 2);

    // 同じ局面の通知でも、失敗後の最初の 1 回は決め直す
    session
        .handle_event(GameEvent::Update(update("")))
        .await
        .unwrap();
    assert!(sink.moves().is_empty());
    assert_eq!(handshakes(&log), 3);
    session.finish().await;
    assert_eq!(session.engine_state(), ProcessState::Stopped);
}

#[tokio::test]
async fn move_is_discarded_when_the_game_ends_while_thinking() {
    let sink = Arc::new(RecordingSink::default());
    let mut session = GameSession::start(
        setup(Color::White, true),
        update(""),
        deps(mock_settings("normal"), &sink),
    )
    .await
    .unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let (_stop_tx, mut stop_rx) = watch::channel(false);
    tx.send(GameEvent::Update(finished("", GameStatus::Aborted)))
        .unwrap();
    drop(tx);

    session.run(&mut rx, &mut stop_rx).await.unwrap();
    assert!(sink.moves().is_empty());
    assert_eq!(session.state(), SessionState::Finished);
    assert_eq!(session.engine_state(), ProcessState::Stopped);
}

#[tokio::test]
async fn run_plays_until_the_game_is_over() {
    let sink = Arc::new(RecordingSink::default());
    let mut session = GameSession::start(
        setup(Color::Black, false),
        update(""),
        deps(mock_settings("normal"), &sink),
    )
    .await
    .unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let (_stop_tx, mut stop_rx) = watch::channel(false);
    let sink_view = sink.clone();
    let driver = tokio::spawn(async move {
        tx.send(GameEvent::Chat {
            username: "lichess".to_string(),
            text: "good luck".to_string(),
        })
        .unwrap();
        tx.send(GameEvent::Update(update("d2d4"))).unwrap();
        while sink_view.moves().is_empty() {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        let ours = sink_view.moves()[0].clone();
        tx.send(GameEvent::Update(update(&format!("d2d4 {ours}"))))
            .unwrap();
        tx.send(GameEvent::Update(finished(
            &format!("d2d4 {ours}"),
            GameStatus::Resign,
        )))
        .unwrap();
        tx
    });

    session.run(&mut rx, &mut stop_rx).await.unwrap();
    let _tx = driver.await.unwrap();
    assert_eq!(sink.moves().len(), 1);
    assert_eq!(session.state(), SessionState::Finished);
    assert_eq!(session.engine_state(), ProcessState::Stopped);
}

#[tokio::test]
async fn shutdown_signal_stops_the_session() {
    let sink = Arc::new(RecordingSink::default());
    let mut session = GameSession::start(
        setup(Color::Black, false),
        update(""),
        deps(mock_settings("normal"), &sink),
    )
    .await
    .unwrap();
    let (_tx, mut rx) = mpsc::unbounded_channel();
    let (stop_tx, mut stop_rx) = watch::channel(false);
    stop_tx.send(true).unwrap();

    session.run(&mut rx, &mut stop_rx).await.unwrap();
    assert_eq!(session.state(), SessionState::AwaitingTurn);
    assert_eq!(session.engine_state(), ProcessState::Stopped);
}
