use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use log::{debug, warn};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::EngineError;

/// エンジンプロセスのライフサイクル状態。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProcessState {
    NotStarted,
    Running,
    /// quit を送ったがタイムアウト内に終了せず、強制終了中。
    Stopping,
    Stopped,
}

/// 子プロセス 1 本と、その stdin / stdout をカプセル化する。
///
/// stdout は専用 task で行単位に読み、channel 経由で受け取る。
/// `read_line` 自体はタイムアウトを持たない（呼び出し側が付ける）。
pub struct ProcessHandle {
    child: Child,
    stdin: BufWriter<ChildStdin>,
    rx: mpsc::UnboundedReceiver<String>,
    reader: JoinHandle<()>,
    label: String,
    terminated: bool,
}

impl ProcessHandle {
    /// プロセスを起動する。tokio runtime 上で呼ぶこと。
    pub fn launch(path: &Path, args: &[String], label: String) -> Result<Self, EngineError> {
        let spawn_error = |source| EngineError::Spawn {
            path: path.to_path_buf(),
            source,
        };
        let mut child = Command::new(path)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(spawn_error)?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| spawn_error(std::io::Error::other("no stdin")))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| spawn_error(std::io::Error::other("no stdout")))?;

        let (tx, rx) = mpsc::unbounded_channel();
        let reader = tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if tx.send(line).is_err() {
                    break;
                }
            }
        });

        debug!("{label}: spawned {} (pid {:?})", path.display(), child.id());
        Ok(Self {
            child,
            stdin: BufWriter::new(stdin),
            rx,
            reader,
            label,
            terminated: false,
        })
    }

    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub async fn send_line(&mut self, text: &str) -> Result<(), EngineError> {
        debug!("{} < {text}", self.label);
        self.stdin
            .write_all(text.as_bytes())
            .await
            .map_err(EngineError::Write)?;
        self.stdin.write_all(b"\n").await.map_err(EngineError::Write)?;
        self.stdin.flush().await.map_err(EngineError::Write)
    }

    /// 次の 1 行を待つ。stdout が閉じていれば [`EngineError::Eof`]。
    ///
    /// cancel safe（`tokio::select!` の分岐に置いてよい）。
    pub async fn read_line(&mut self) -> Result<String, EngineError> {
        match self.rx.recv().await {
            Some(line) => {
                debug!("{} > {line}", self.label);
                Ok(line)
            }
            None => Err(EngineError::Eof),
        }
    }

    /// `timeout` 以内にプロセスが自発的に終了したら true。
    pub async fn wait_exit(&mut self, timeout: Duration) -> bool {
        matches!(
            tokio::time::timeout(timeout, self.child.wait()).await,
            Ok(Ok(_))
        )
    }

    /// kill シグナルを送り、終了を回収する。
    ///
    /// 冪等。終了済みのハンドルに対しては何もしない。
    pub async fn terminate(&mut self) {
        if self.terminated {
            return;
        }
        if let Ok(None) = self.child.try_wait() {
            if let Err(e) = self.child.kill().await {
                warn!("{}: failed to kill engine process: {e}", self.label);
            }
        } else if let Err(e) = self.child.wait().await {
            warn!("{}: failed to reap engine process: {e}", self.label);
        }
        self.reader.abort();
        self.terminated = true;
        debug!("{}: process released", self.label);
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        if !self.terminated {
            // kill_on_drop で回収されるが、経路の取りこぼしは記録しておく
            warn!("{}: process handle dropped without terminate", self.label);
            if let Err(e) = self.child.start_kill() {
                warn!("{}: failed to kill engine process: {e}", self.label);
            }
        }
        self.reader.abort();
    }
}
