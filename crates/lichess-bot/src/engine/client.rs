use std::path::PathBuf;
use std::time::Duration;

use log::{debug, info, warn};
use shakmaty::uci::UciMove;
use tokio::time::{Instant, sleep_until, timeout, timeout_at};

use super::info::{EvaluationInfo, parse_bestmove};
use super::process::{ProcessHandle, ProcessState};
use crate::error::EngineError;
use crate::position::Position;

pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_QUIT_TIMEOUT: Duration = Duration::from_secs(1);
pub const DEFAULT_ANALYSIS_GRACE: Duration = Duration::from_secs(2);

/// エンジンプロセス起動時の設定。
#[derive(Clone, Debug)]
pub struct EngineSettings {
    pub path: PathBuf,
    pub args: Vec<String>,
    /// `setoption name <k> value <v>` として handshake 中に送る。
    pub options: Vec<(String, String)>,
    pub handshake_timeout: Duration,
    pub quit_timeout: Duration,
    /// `stop` 送信後に bestmove を待つ上限。
    pub analysis_grace: Duration,
}

impl EngineSettings {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            args: Vec::new(),
            options: Vec::new(),
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            quit_timeout: DEFAULT_QUIT_TIMEOUT,
            analysis_grace: DEFAULT_ANALYSIS_GRACE,
        }
    }
}

/// 1 回の探索結果。
#[derive(Clone, Debug)]
pub struct SearchResult {
    pub best_move: UciMove,
    pub info: EvaluationInfo,
    pub elapsed: Duration,
}

/// UCI エンジン 1 本分のクライアント。
///
/// 同時に所有するプロセスは高々 1 本で、操作は `&mut self` により直列化される。
pub struct EngineClient {
    settings: EngineSettings,
    process: Option<ProcessHandle>,
    state: ProcessState,
    label: String,
    engine_name: Option<String>,
}

impl EngineClient {
    pub fn new(settings: EngineSettings, label: impl Into<String>) -> Self {
        Self {
            settings,
            process: None,
            state: ProcessState::NotStarted,
            label: label.into(),
            engine_name: None,
        }
    }

    pub fn state(&self) -> ProcessState {
        self.state
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// `id name` で名乗ったエンジン名。
    pub fn engine_name(&self) -> Option<&str> {
        self.engine_name.as_deref()
    }

    pub fn pid(&self) -> Option<u32> {
        self.process.as_ref().and_then(ProcessHandle::id)
    }

    /// プロセスを起動してハンドシェイクを行う。
    ///
    /// 既に起動済みなら先に `quit` する。失敗時はプロセスを回収して
    /// `Stopped` に戻す。
    pub async fn start(&mut self) -> Result<(), EngineError> {
        if self.process.is_some() {
            self.quit().await;
        }

        let process =
            ProcessHandle::launch(&self.settings.path, &self.settings.args, self.label.clone())?;
        self.process = Some(process);

        match self.handshake().await {
            Ok(()) => {
                self.state = ProcessState::Running;
                info!(
                    "{}: engine ready ({})",
                    self.label,
                    self.engine_name.as_deref().unwrap_or("unnamed")
                );
                Ok(())
            }
            Err(e) => {
                if let Some(mut process) = self.process.take() {
                    process.terminate().await;
                }
                self.state = ProcessState::Stopped;
                Err(e)
            }
        }
    }

    async fn handshake(&mut self) -> Result<(), EngineError> {
        let handshake_timeout = self.settings.handshake_timeout;
        let options = self.settings.options.clone();
        let process = self.process.as_mut().ok_or(EngineError::NotRunning)?;
        let deadline = Instant::now() + handshake_timeout;

        process.send_line("uci").await.map_err(startup_error)?;
        loop {
            let line = timeout_at(deadline, process.read_line())
                .await
                .map_err(|_| EngineError::handshake_timeout("uciok", handshake_timeout))?
                .map_err(startup_error)?;
            if let Some(name) = line.strip_prefix("id name ") {
                self.engine_name = Some(name.trim().to_string());
            } else if line.trim() == "uciok" {
                break;
            }
        }

        for (name, value) in &options {
            process
                .send_line(&format!("setoption name {name} value {value}"))
                .await
                .map_err(startup_error)?;
        }
        process.send_line("ucinewgame").await.map_err(startup_error)?;
        process.send_line("isready").await.map_err(startup_error)?;
        loop {
            let line = timeout_at(deadline, process.read_line())
                .await
                .map_err(|_| EngineError::handshake_timeout("readyok", handshake_timeout))?
                .map_err(startup_error)?;
            if line.trim() == "readyok" {
                return Ok(());
            }
        }
    }

    /// `position` → `go infinite` → (budget 経過) → `stop` → `bestmove`。
    ///
    /// budget より早く戻ることはない。`stop` 後 `analysis_grace` 以内に
    /// bestmove が来なければ [`EngineError::Analysis`]。
    pub async fn analyze(
        &mut self,
        position: &Position,
        budget: Duration,
    ) -> Result<SearchResult, EngineError> {
        if self.state != ProcessState::Running {
            return Err(EngineError::NotRunning);
        }
        let grace = self.settings.analysis_grace;
        let process = self.process.as_mut().ok_or(EngineError::NotRunning)?;

        let start = Instant::now();
        process.send_line(&position.uci_command()).await?;
        process.send_line("go infinite").await?;

        let mut latest: Option<EvaluationInfo> = None;
        let mut early: Option<String> = None;
        let think = sleep_until(start + budget);
        tokio::pin!(think);
        loop {
            tokio::select! {
                _ = &mut think => break,
                line = process.read_line(), if early.is_none() => {
                    let line = line?;
                    if let Some(mv) = parse_bestmove(&line) {
                        // 自発的に探索を終えた（詰み等）。結果は budget まで保持する
                        debug!("{}: bestmove before stop", process.label());
                        early = Some(mv.to_string());
                    } else if let Some(info) = EvaluationInfo::parse(&line) {
                        latest = Some(info);
                    }
                }
            }
        }

        let best = match early {
            Some(best) => best,
            None => {
                process.send_line("stop").await?;
                match timeout(grace, read_bestmove(process, &mut latest)).await {
                    Ok(best) => best?,
                    Err(_) => {
                        return Err(EngineError::Analysis(format!(
                            "no bestmove within {} ms after stop",
                            grace.as_millis()
                        )));
                    }
                }
            }
        };

        let best_move = UciMove::from_ascii(best.as_bytes())
            .ok()
            .filter(|mv| !matches!(mv, UciMove::Null))
            .ok_or_else(|| EngineError::Analysis(format!("unusable bestmove '{best}'")))?;

        Ok(SearchResult {
            best_move,
            info: latest.unwrap_or_default(),
            elapsed: start.elapsed(),
        })
    }

    /// `quit` を送り、`quit_timeout` 内に終了しなければ強制終了する。
    ///
    /// どの経路でも最後は `Stopped` でプロセスを持たない状態になる。
    pub async fn quit(&mut self) {
        let Some(mut process) = self.process.take() else {
            return;
        };
        let quit_timeout = self.settings.quit_timeout;
        let graceful = process.send_line("quit").await.is_ok()
            && process.wait_exit(quit_timeout).await;
        if graceful {
            debug!("{}: engine exited", self.label);
        } else {
            self.state = ProcessState::Stopping;
            warn!(
                "{}: engine did not exit within {} ms, killing it",
                self.label,
                quit_timeout.as_millis()
            );
        }
        process.terminate().await;
        self.state = ProcessState::Stopped;
    }
}

impl Drop for EngineClient {
    fn drop(&mut self) {
        if self.process.is_some() {
            warn!("{}: engine client dropped while the process is alive", self.label);
        }
    }
}

async fn read_bestmove(
    process: &mut ProcessHandle,
    latest: &mut Option<EvaluationInfo>,
) -> Result<String, EngineError> {
    loop {
        let line = process.read_line().await?;
        if let Some(mv) = parse_bestmove(&line) {
            return Ok(mv.to_string());
        }
        if let Some(info) = EvaluationInfo::parse(&line) {
            *latest = Some(info);
        }
    }
}

fn startup_error(e: EngineError) -> EngineError {
    match e {
        EngineError::Eof => EngineError::Startup("engine exited during handshake".to_string()),
        EngineError::Write(io) => EngineError::Startup(format!("write failed: {io}")),
        other => other,
    }
}
