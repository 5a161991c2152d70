use std::collections::BTreeMap;

use serde::Serialize;

/// 探索中に観測した評価情報（最後の有効な info 行）。
#[derive(Serialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct EvaluationInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub depth: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seldepth: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score_cp: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score_mate: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nodes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nps: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_ms: Option<u64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub pv: Vec<String>,
    /// 上記以外の `key value` 形式の項目（hashfull, tbhits 等）。
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, String>,
}

impl EvaluationInfo {
    /// info 行を解析する。
    ///
    /// multipv=1 以外の行、`info string`、評価値も読み筋も持たない行
    /// （currmove 通知など）は `None`。
    pub fn parse(line: &str) -> Option<Self> {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.first().copied() != Some("info") {
            return None;
        }
        if tokens.get(1).copied() == Some("string") {
            return None;
        }

        let mut info = EvaluationInfo::default();
        let mut i = 1;
        while i < tokens.len() {
            let key = tokens[i];
            let value = tokens.get(i + 1).copied();
            match key {
                "multipv" => {
                    if value.and_then(|v| v.parse::<u32>().ok()).unwrap_or(1) != 1 {
                        return None;
                    }
                    i += 1;
                }
                "depth" => {
                    info.depth = value.and_then(|v| v.parse().ok());
                    i += 1;
                }
                "seldepth" => {
                    info.seldepth = value.and_then(|v| v.parse().ok());
                    i += 1;
                }
                "nodes" => {
                    info.nodes = value.and_then(|v| v.parse().ok());
                    i += 1;
                }
                "nps" => {
                    info.nps = value.and_then(|v| v.parse().ok());
                    i += 1;
                }
                "time" => {
                    info.time_ms = value.and_then(|v| v.parse().ok());
                    i += 1;
                }
                "score" => {
                    match value {
                        Some("cp") => {
                            info.score_cp = tokens.get(i + 2).and_then(|v| v.parse().ok());
                            info.score_mate = None;
                        }
                        Some("mate") => {
                            info.score_mate = tokens.get(i + 2).and_then(|v| v.parse().ok());
                            info.score_cp = None;
                        }
                        _ => {}
                    }
                    i += 2;
                    // lowerbound / upperbound はそのまま extra に残す
                    if let Some(bound @ ("lowerbound" | "upperbound")) = tokens.get(i + 1).copied()
                    {
                        info.extra.insert("bound".to_string(), bound.to_string());
                        i += 1;
                    }
                }
                "pv" => {
                    info.pv = tokens[i + 1..].iter().map(|t| t.to_string()).collect();
                    break;
                }
                // 探索中の手の通知は評価行ではない
                "currmove" | "currmovenumber" => return None,
                _ => {
                    if let Some(v) = value {
                        info.extra.insert(key.to_string(), v.to_string());
                    }
                    i += 1;
                }
            }
            i += 1;
        }

        if info.score_cp.is_none() && info.score_mate.is_none() && info.pv.is_empty() {
            return None;
        }
        Some(info)
    }

    /// ログ出力用の 1 行 JSON。
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// `bestmove <move> [ponder <move>]` から指し手部分を取り出す。
pub fn parse_bestmove(line: &str) -> Option<&str> {
    let mut tokens = line.split_whitespace();
    if tokens.next()? != "bestmove" {
        return None;
    }
    Some(tokens.next().unwrap_or_default())
}
