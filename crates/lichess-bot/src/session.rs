//! 1 対局分の状態機械。
//!
//! サーバーからの通知ごとに局面を作り直し、自分の手番になったら
//! book → エンジンの順に指し手を決めて [`MoveSink`] に渡す。
//! エンジンプロセスはセッションが単独で所有し、終局時に 1 度だけ `quit` する。

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use shakmaty::uci::UciMove;
use tokio::sync::{mpsc, watch};

use crate::book::BookSelector;
use crate::engine::{EngineClient, EngineSettings, ProcessState, SearchResult};
use crate::error::{EngineError, SessionError};
use crate::game::{GameEvent, GameSetup, GameUpdate, MoveSink};
use crate::position::Position;
use crate::time_budget::TimeBudget;

/// `AwaitingTurn → Thinking → MoveSubmitted → (AwaitingTurn | Finished)`
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    AwaitingTurn,
    Thinking,
    MoveSubmitted,
    Finished,
}

/// セッションが外から受け取る部品。
pub struct SessionDeps {
    pub engine: EngineSettings,
    pub time_budget: Arc<TimeBudget>,
    pub book: Option<BookSelector>,
    pub sink: Arc<dyn MoveSink>,
}

pub struct GameSession {
    setup: GameSetup,
    position: Position,
    state: SessionState,
    engine: EngineClient,
    book: Option<BookSelector>,
    time_budget: Arc<TimeBudget>,
    sink: Arc<dyn MoveSink>,
    /// 最後に反映した指し手列と時計。
    latest: GameUpdate,
    /// 直近に思考を始めた局面の手数。同じ局面で 2 度決めない。
    decided_ply: Option<usize>,
    /// 探索に失敗し、次の局面更新を待っている。
    retry_pending: bool,
    /// 失敗後に局面更新が届いた。次の `decide` で 1 度だけ決め直す。
    retry_ready: bool,
    engine_released: bool,
    moves_submitted: usize,
}

impl GameSession {
    /// 初期局面を組み立て、エンジンを起動する。
    ///
    /// 初期状態が既に終局なら起動せず `Finished` で返す。
    pub async fn start(
        setup: GameSetup,
        initial: GameUpdate,
        deps: SessionDeps,
    ) -> Result<Self, SessionError> {
        let position = Position::replay(setup.initial_fen.as_deref(), &initial.moves)?;
        let engine = EngineClient::new(deps.engine, format!("game {}", setup.game_id));

        let mut session = Self {
            setup,
            position,
            state: SessionState::AwaitingTurn,
            engine,
            book: deps.book,
            time_budget: deps.time_budget,
            sink: deps.sink,
            latest: initial,
            decided_ply: None,
            retry_pending: false,
            retry_ready: false,
            engine_released: false,
            moves_submitted: 0,
        };

        if session.latest.status.is_terminal() {
            info!(
                "game {}: already over ({:?})",
                session.setup.game_id, session.latest.status
            );
            session.state = SessionState::Finished;
            session.engine_released = true;
            return Ok(session);
        }

        if let Some(server_says) = session.setup.is_my_turn {
            if server_says != session.is_our_turn() {
                warn!(
                    "game {}: server reports isMyTurn={server_says} but {:?} is to move",
                    session.setup.game_id,
                    session.position.side_to_move()
                );
            }
        }

        session.engine.start().await?;
        info!(
            "game {}: playing {:?} ({}, {} plies so far)",
            session.setup.game_id,
            session.setup.color,
            session.setup.speed,
            session.position.ply()
        );
        Ok(session)
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn engine_state(&self) -> ProcessState {
        self.engine.state()
    }

    pub fn setup(&self) -> &GameSetup {
        &self.setup
    }

    pub fn position(&self) -> &Position {
        &self.position
    }

    /// 最後に反映した通知。セッションを作り直すときの起点になる。
    pub fn latest_update(&self) -> &GameUpdate {
        &self.latest
    }

    pub fn moves_submitted(&self) -> usize {
        self.moves_submitted
    }

    /// 開始時点で自分の手番なら、通知を待たずにここで 1 手指す。
    pub async fn begin(&mut self) -> Result<(), SessionError> {
        if let Some(mv) = self.decide().await? {
            self.submit(mv);
        }
        Ok(())
    }

    /// 通知 1 件を反映し、必要なら指し手を決めて提出する。
    pub async fn handle_event(&mut self, event: GameEvent) -> Result<(), SessionError> {
        self.apply(event).await;
        self.begin().await
    }

    /// 終局として扱い、エンジンを解放する。
    pub async fn finish(&mut self) {
        self.state = SessionState::Finished;
        self.release_engine().await;
    }

    /// 通知チャネルが閉じるか `shutdown` が立つか終局するまで処理を続ける。
    ///
    /// どの経路で抜けてもエンジンは解放済みになる。思考中は通知を読まず、
    /// 指し手が決まった時点で溜まっている通知に終局があればその手は捨てる。
    pub async fn run(
        &mut self,
        events: &mut mpsc::UnboundedReceiver<GameEvent>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<(), SessionError> {
        let result = self.drive(events, shutdown).await;
        self.release_engine().await;
        result
    }

    async fn drive(
        &mut self,
        events: &mut mpsc::UnboundedReceiver<GameEvent>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<(), SessionError> {
        let mut backlog = VecDeque::new();
        if let Some(mv) = self.decide().await? {
            self.submit_unless_over(mv, events, &mut backlog);
        }

        while self.state != SessionState::Finished {
            let event = match backlog.pop_front() {
                Some(event) => event,
                None => tokio::select! {
                    _ = stop_requested(shutdown) => {
                        info!("game {}: shutting down", self.setup.game_id);
                        return Ok(());
                    }
                    event = events.recv() => match event {
                        Some(event) => event,
                        None => {
                            debug!("game {}: event channel closed", self.setup.game_id);
                            return Ok(());
                        }
                    },
                },
            };
            self.apply(event).await;
            if let Some(mv) = self.decide().await? {
                self.submit_unless_over(mv, events, &mut backlog);
            }
        }
        Ok(())
    }

    fn submit_unless_over(
        &mut self,
        mv: UciMove,
        events: &mut mpsc::UnboundedReceiver<GameEvent>,
        backlog: &mut VecDeque<GameEvent>,
    ) {
        while let Ok(event) = events.try_recv() {
            backlog.push_back(event);
        }
        let over = backlog
            .iter()
            .any(|event| matches!(event, GameEvent::Update(update) if update.status.is_terminal()));
        if over {
            info!(
                "game {}: game ended while thinking, discarding {mv}",
                self.setup.game_id
            );
            self.state = SessionState::AwaitingTurn;
            return;
        }
        self.submit(mv);
    }

    async fn apply(&mut self, event: GameEvent) {
        if self.state == SessionState::Finished {
            debug!("game {}: ignoring event after finish", self.setup.game_id);
            return;
        }
        match event {
            GameEvent::Update(update) => self.apply_update(update).await,
            GameEvent::Chat { username, text } => {
                info!("game {}: chat {username}: {text}", self.setup.game_id);
            }
            GameEvent::OpponentGone { gone } => {
                info!("game {}: opponent gone = {gone}", self.setup.game_id);
            }
        }
    }

    async fn apply_update(&mut self, update: GameUpdate) {
        if update.status.is_terminal() {
            info!(
                "game {}: finished ({:?}) after {} plies",
                self.setup.game_id,
                update.status,
                update.moves.len()
            );
            self.latest = update;
            self.finish().await;
            return;
        }
        if update.moves == self.latest.moves {
            if self.retry_pending {
                self.retry_ready = true;
                self.latest = update;
            } else {
                debug!("game {}: duplicate update ignored", self.setup.game_id);
            }
            return;
        }
        match Position::replay(self.setup.initial_fen.as_deref(), &update.moves) {
            Ok(position) => {
                self.position = position;
                self.latest = update;
                self.retry_ready = self.retry_pending;
            }
            Err(e) => warn!("game {}: dropping update: {e}", self.setup.game_id),
        }
    }

    fn is_our_turn(&self) -> bool {
        self.position.side_to_move() == self.setup.color
    }

    /// 手番なら指し手を決める。提出はしない。
    async fn decide(&mut self) -> Result<Option<UciMove>, SessionError> {
        if self.state == SessionState::Finished {
            return Ok(None);
        }
        if !self.is_our_turn() {
            self.state = SessionState::AwaitingTurn;
            return Ok(None);
        }
        let ply = self.position.ply();
        if self.decided_ply == Some(ply) && !self.retry_ready {
            return Ok(None);
        }
        if self.position.is_game_over() {
            debug!("game {}: no legal moves, waiting for result", self.setup.game_id);
            return Ok(None);
        }
        self.retry_pending = false;
        self.retry_ready = false;
        self.decided_ply = Some(ply);
        self.state = SessionState::Thinking;

        if let Some(book) = self.book.as_mut() {
            if let Some(mv) = book.choose(&self.position) {
                info!("game {}: ply {ply} book move {mv}", self.setup.game_id);
                return Ok(Some(mv));
            }
        }

        let budget = self.budget();
        match self.analyze(budget).await {
            Ok(result) => {
                info!(
                    "game {}: ply {ply} move {} (budget {} ms, took {} ms) {}",
                    self.setup.game_id,
                    result.best_move,
                    budget.as_millis(),
                    result.elapsed.as_millis(),
                    result.info.to_json()
                );
                Ok(Some(result.best_move))
            }
            Err(e) if e.is_recoverable_by_restart() => {
                error!(
                    "game {}: {e}; restarting engine and waiting for the next update",
                    self.setup.game_id
                );
                self.state = SessionState::AwaitingTurn;
                self.engine.start().await?;
                self.retry_pending = true;
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// 時計が動き出す前は固定表、以降は自分の残り時間から。
    fn budget(&self) -> Duration {
        if self.position.ply() < 2 {
            return self.time_budget.first_move(self.setup.speed);
        }
        let remaining = self.latest.remaining_ms(self.setup.color);
        let clock = self.time_budget.clock_state(self.setup.speed, remaining);
        self.time_budget.budget(clock)
    }

    async fn analyze(&mut self, budget: Duration) -> Result<SearchResult, EngineError> {
        let result = self.engine.analyze(&self.position, budget).await?;
        if self.position.legal_move(&result.best_move).is_none() {
            return Err(EngineError::Analysis(format!(
                "illegal bestmove {} at ply {}",
                result.best_move,
                self.position.ply()
            )));
        }
        Ok(result)
    }

    fn submit(&mut self, mv: UciMove) {
        self.state = SessionState::MoveSubmitted;
        self.sink.submit(&self.setup.game_id, &mv);
        self.moves_submitted += 1;
        self.state = SessionState::AwaitingTurn;
    }

    async fn release_engine(&mut self) {
        if self.engine_released {
            return;
        }
        self.engine_released = true;
        self.engine.quit().await;
    }
}

/// `shutdown` が立つか送信側が消えるまで待つ。
///
/// `watch::Ref` は `Send` でないので、`select!` の出力に残さずここで捨てる。
pub(crate) async fn stop_requested(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}
