//! 改行区切り JSON ストリームのデコード。

use std::collections::VecDeque;

use futures_util::stream::{self, BoxStream, Stream, StreamExt};
use log::warn;
use serde::de::DeserializeOwned;

use crate::error::TransportError;

/// 受信バイト列を行単位に切り出す。
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    /// `chunk` を追加し、完成した行を返す。改行を含まない末尾は保持する。
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            lines.push(String::from_utf8_lossy(&line[..pos]).into_owned());
        }
        lines
    }

    /// ストリーム終端で残った改行なしの行。
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.pending);
        Some(String::from_utf8_lossy(&rest).into_owned())
    }
}

/// 1 行をデコードする。空行（keep-alive）と壊れた行は `None`。
pub fn parse_line<T: DeserializeOwned>(line: &str, label: &str) -> Option<T> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    match serde_json::from_str(line) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("{label}: dropping malformed line ({e}): {line}");
            None
        }
    }
}

struct DecodeState<S> {
    inner: S,
    buffer: LineBuffer,
    lines: VecDeque<String>,
    done: bool,
    label: String,
}

/// バイトチャンクのストリームをイベントのストリームに変換する。
///
/// 下位ストリームのエラーは 1 度だけ流してから終了する。
pub fn decode_ndjson<T, S, B, E>(
    chunks: S,
    label: impl Into<String>,
) -> BoxStream<'static, Result<T, TransportError>>
where
    T: DeserializeOwned + Send + 'static,
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Into<TransportError> + Send + 'static,
{
    let state = DecodeState {
        inner: Box::pin(chunks),
        buffer: LineBuffer::default(),
        lines: VecDeque::new(),
        done: false,
        label: label.into(),
    };
    stream::unfold(state, |mut st| async move {
        loop {
            if let Some(line) = st.lines.pop_front() {
                match parse_line::<T>(&line, &st.label) {
                    Some(value) => return Some((Ok(value), st)),
                    None => continue,
                }
            }
            if st.done {
                return None;
            }
            match st.inner.next().await {
                Some(Ok(chunk)) => {
                    let lines = st.buffer.push(chunk.as_ref());
                    st.lines.extend(lines);
                }
                Some(Err(e)) => {
                    st.done = true;
                    return Some((Err(e.into()), st));
                }
                None => {
                    st.done = true;
                    st.lines.extend(st.buffer.finish());
                }
            }
        }
    })
    .boxed()
}
