//! UCI エンジンの子プロセス管理。

pub mod client;
pub mod info;
pub mod process;

pub use client::{EngineClient, EngineSettings, SearchResult};
pub use info::{EvaluationInfo, parse_bestmove};
pub use process::{ProcessHandle, ProcessState};
