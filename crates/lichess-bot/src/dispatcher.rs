//! イベントストリームを受けて対局ごとにセッション task を起こす。
//!
//! 通信エラーはここで受け止め、全セッションを止めてから待機して接続し直す。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use log::{debug, error, info, warn};
use tokio::sync::{mpsc, watch};
use tokio::task::{self, JoinSet};

use crate::book::{BookSelector, OpeningBook};
use crate::challenge::ChallengePolicy;
use crate::engine::EngineSettings;
use crate::error::{SessionError, TransportError};
use crate::game::{GameEvent, GameSetup, GameUpdate, MoveSink};
use crate::lichess::{EventStream, GameService, GameStartInfo, GameStreamEvent, IncomingEvent};
use crate::session::{GameSession, SessionDeps, SessionState, stop_requested};
use crate::time_budget::TimeBudget;

/// 全対局で共有する設定と読み取り専用データ。
#[derive(Clone)]
pub struct DispatcherSettings {
    pub engine: EngineSettings,
    pub time_budget: Arc<TimeBudget>,
    pub book: Option<Arc<OpeningBook>>,
    pub book_seed: Option<u64>,
    pub restart_backoff: Duration,
    pub max_session_restarts: u32,
}

impl DispatcherSettings {
    fn session_deps(&self, sink: Arc<dyn MoveSink>) -> SessionDeps {
        SessionDeps {
            engine: self.engine.clone(),
            time_budget: Arc::clone(&self.time_budget),
            book: self
                .book
                .as_ref()
                .map(|book| BookSelector::new(Arc::clone(book), self.book_seed)),
            sink,
        }
    }
}

type GameResult = (String, Result<(), TransportError>);

pub struct SessionDispatcher<S> {
    service: Arc<S>,
    sink: Arc<dyn MoveSink>,
    policy: ChallengePolicy,
    settings: Arc<DispatcherSettings>,
}

impl<S: GameService> SessionDispatcher<S> {
    pub fn new(
        service: Arc<S>,
        sink: Arc<dyn MoveSink>,
        policy: ChallengePolicy,
        settings: DispatcherSettings,
    ) -> Self {
        Self {
            service,
            sink,
            policy,
            settings: Arc::new(settings),
        }
    }

    /// `shutdown` が立つまで接続と再接続を繰り返す。
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                break;
            }
            let (stop_sessions, sessions_stopped) = watch::channel(false);
            let mut games = JoinSet::new();
            let outcome = self
                .event_loop(&mut games, &sessions_stopped, &mut shutdown)
                .await;

            // 残っているセッションを止め、エンジンの quit を待つ
            let _ = stop_sessions.send(true);
            while let Some(joined) = games.join_next().await {
                if let Err(e) = joined {
                    error!("game task panicked: {e}");
                }
            }

            match outcome {
                Ok(()) => break,
                Err(e) => {
                    error!(
                        "event loop failed: {e}; reconnecting in {} ms",
                        self.settings.restart_backoff.as_millis()
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(self.settings.restart_backoff) => {}
                        _ = stop_requested(&mut shutdown) => break,
                    }
                }
            }
        }
        info!("dispatcher stopped");
    }

    /// shutdown なら `Ok`、通信が途切れたら `Err`。
    async fn event_loop(
        &self,
        games: &mut JoinSet<GameResult>,
        sessions_stopped: &watch::Receiver<bool>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<(), TransportError> {
        let mut events = self.service.incoming_events().await?;
        info!("connected to the event stream");
        // 対局 ID → その対局を指している task
        let mut active: HashMap<String, task::Id> = HashMap::new();

        loop {
            tokio::select! {
                _ = stop_requested(shutdown) => return Ok(()),
                event = events.next() => match event {
                    Some(Ok(event)) => {
                        self.handle_incoming(event, games, &mut active, sessions_stopped).await;
                    }
                    Some(Err(e)) => return Err(e),
                    None => return Err(TransportError::StreamClosed("incoming events".to_string())),
                },
                Some(joined) = games.join_next(), if !games.is_empty() => match joined {
                    Ok((game_id, result)) => {
                        active.remove(&game_id);
                        result?;
                        debug!("game {game_id}: task finished");
                    }
                    Err(e) => {
                        error!("game task panicked: {e}");
                        let id = e.id();
                        active.retain(|_, task| *task != id);
                    }
                },
            }
        }
    }

    async fn handle_incoming(
        &self,
        event: IncomingEvent,
        games: &mut JoinSet<GameResult>,
        active: &mut HashMap<String, task::Id>,
        sessions_stopped: &watch::Receiver<bool>,
    ) {
        match event {
            IncomingEvent::Challenge { challenge } => {
                let result = if self.policy.should_accept(&challenge) {
                    self.service.accept_challenge(&challenge.id).await
                } else {
                    self.service.decline_challenge(&challenge.id, "generic").await
                };
                if let Err(e) = result {
                    warn!("challenge {}: {e}", challenge.id);
                }
            }
            IncomingEvent::ChallengeCanceled { challenge } => {
                info!("challenge {} canceled", challenge.id);
            }
            IncomingEvent::ChallengeDeclined { challenge } => {
                info!("challenge {} declined", challenge.id);
            }
            IncomingEvent::GameStart { game } => {
                if active.contains_key(&game.game_id) {
                    debug!("game {}: already being played", game.game_id);
                    return;
                }
                info!("game {}: started", game.game_id);
                let task = GameTask {
                    service: Arc::clone(&self.service),
                    sink: Arc::clone(&self.sink),
                    settings: Arc::clone(&self.settings),
                    shutdown: sessions_stopped.clone(),
                };
                let game_id = game.game_id.clone();
                let handle = games.spawn(async move {
                    let game_id = game.game_id.clone();
                    let result = task.play(game).await;
                    (game_id, result)
                });
                active.insert(game_id, handle.id());
            }
            IncomingEvent::GameFinish { game } => {
                info!("game {}: finish reported", game.game_id);
            }
            IncomingEvent::Unknown => warn!("dropping incoming event of unknown type"),
        }
    }
}

/// 1 局分の task。
struct GameTask<S> {
    service: Arc<S>,
    sink: Arc<dyn MoveSink>,
    settings: Arc<DispatcherSettings>,
    shutdown: watch::Receiver<bool>,
}

impl<S: GameService> GameTask<S> {
    async fn play(self, start: GameStartInfo) -> Result<(), TransportError> {
        let game_id = start.game_id.clone();
        let mut stream = self.service.game_events(&game_id).await?;
        let (setup, initial) = match stream.next().await {
            Some(Ok(GameStreamEvent::GameFull(full))) => full.into_setup(&start),
            Some(Ok(_)) => return Err(TransportError::MissingGameFull { game_id }),
            Some(Err(e)) => return Err(e),
            None => return Err(TransportError::StreamClosed(format!("game {game_id}"))),
        };

        let (tx, mut rx) = mpsc::unbounded_channel();
        let forward = forward_events(stream, tx, game_id.clone());
        let session = async move {
            let finished = self.drive_session(setup, initial, &mut rx).await;
            // forwarder は受け手が閉じたことで終わる
            drop(rx);
            finished
        };
        let (forwarded, finished) = tokio::join!(forward, session);
        if finished {
            return Ok(());
        }
        forwarded
    }

    /// セッションを作って走らせる。Spawn / Startup 失敗は作り直す。
    ///
    /// 終局まで進んだら true。
    async fn drive_session(
        &self,
        setup: GameSetup,
        initial: GameUpdate,
        rx: &mut mpsc::UnboundedReceiver<GameEvent>,
    ) -> bool {
        let mut shutdown = self.shutdown.clone();
        let mut last_known = initial;
        let mut restarts = 0u32;
        loop {
            let deps = self.settings.session_deps(Arc::clone(&self.sink));
            let outcome = match GameSession::start(setup.clone(), last_known.clone(), deps).await {
                Ok(mut session) => {
                    let result = session.run(rx, &mut shutdown).await;
                    last_known = session.latest_update().clone();
                    match result {
                        Ok(()) => return session.state() == SessionState::Finished,
                        Err(e) => e,
                    }
                }
                Err(e) => e,
            };

            let retryable = !matches!(outcome, SessionError::Position(_));
            if !retryable || restarts >= self.settings.max_session_restarts {
                error!("game {}: giving up: {outcome}", setup.game_id);
                return false;
            }
            restarts += 1;
            error!(
                "game {}: {outcome}; recreating session in {} ms ({restarts}/{})",
                setup.game_id,
                self.settings.restart_backoff.as_millis(),
                self.settings.max_session_restarts
            );
            tokio::select! {
                _ = tokio::time::sleep(self.settings.restart_backoff) => {}
                _ = stop_requested(&mut shutdown) => return false,
            }
        }
    }
}

/// ゲームストリームをセッションのチャネルへ流す。受け手が閉じたら終わる。
async fn forward_events(
    mut stream: EventStream<GameStreamEvent>,
    tx: mpsc::UnboundedSender<GameEvent>,
    game_id: String,
) -> Result<(), TransportError> {
    loop {
        tokio::select! {
            _ = tx.closed() => return Ok(()),
            item = stream.next() => match item {
                Some(Ok(event)) => match event.into_game_event() {
                    Some(event) => {
                        if tx.send(event).is_err() {
                            return Ok(());
                        }
                    }
                    None => warn!("game {game_id}: dropping event of unknown type"),
                },
                Some(Err(e)) => return Err(e),
                None => return Err(TransportError::StreamClosed(format!("game {game_id}"))),
            },
        }
    }
}
