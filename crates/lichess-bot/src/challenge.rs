//! 挑戦の受諾判定。

use std::collections::{BTreeSet, HashSet};
use std::path::Path;

use log::{info, warn};

use crate::config::ChallengeConfig;
use crate::error::ConfigError;
use crate::lichess::ChallengeInfo;
use crate::time_budget::SpeedClass;

/// 許可リストの相手とは遊べる variant なら何でも指す。
const PLAYABLE_VARIANTS: [&str; 2] = ["standard", "fromPosition"];

#[derive(Clone, Debug, Default)]
pub struct ChallengePolicy {
    allowed: HashSet<String>,
    rated_speeds: BTreeSet<SpeedClass>,
}

impl ChallengePolicy {
    pub fn new(
        allowed: impl IntoIterator<Item = String>,
        rated_speeds: impl IntoIterator<Item = SpeedClass>,
    ) -> Self {
        Self {
            allowed: allowed.into_iter().map(|id| id.to_lowercase()).collect(),
            rated_speeds: rated_speeds.into_iter().collect(),
        }
    }

    /// 許可リストファイルが無ければ空として扱う。
    pub fn from_config(config: &ChallengeConfig) -> Result<Self, ConfigError> {
        let allowed = match &config.allowed_challengers_file {
            Some(path) => read_allow_list(path)?,
            None => Vec::new(),
        };
        let mut rated_speeds = Vec::new();
        for key in &config.rated_speeds {
            match SpeedClass::from_key(key) {
                SpeedClass::Unknown => warn!("ignoring unknown speed '{key}' in rated_speeds"),
                speed => rated_speeds.push(speed),
            }
        }
        Ok(Self::new(allowed, rated_speeds))
    }

    pub fn should_accept(&self, challenge: &ChallengeInfo) -> bool {
        let challenger = challenge.challenger_id();
        let variant = challenge.variant.key.as_str();
        let accept = if self.allowed.contains(&challenger.to_lowercase()) {
            PLAYABLE_VARIANTS.contains(&variant)
        } else {
            challenge.rated && variant == "standard" && self.rated_speeds.contains(&challenge.speed)
        };
        info!(
            "{} challenge {} from {challenger} ({variant}, {}, {})",
            if accept { "accepting" } else { "declining" },
            challenge.id,
            challenge.speed,
            if challenge.rated { "rated" } else { "casual" },
        );
        accept
    }
}

fn read_allow_list(path: &Path) -> Result<Vec<String>, ConfigError> {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!("allow list {} not found; only rated games will be accepted", path.display());
            return Ok(Vec::new());
        }
        Err(source) => {
            return Err(ConfigError::Io {
                path: path.to_path_buf(),
                source,
            });
        }
    };
    Ok(text
        .lines()
        .map(|line| line.split('#').next().unwrap_or("").trim())
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect())
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    fn challenge(from: &str, rated: bool, speed: &str, variant: &str) -> ChallengeInfo {
        serde_json::from_value(serde_json::json!({
            "id": "c1",
            "rated": rated,
            "speed": speed,
            "variant": { "key": variant },
            "challenger": { "id": from, "name": from },
        }))
        .unwrap()
    }

    #[test]
    fn strangers_need_rated_standard_games() {
        let policy = ChallengePolicy::new(
            Vec::new(),
            [SpeedClass::Bullet, SpeedClass::Blitz, SpeedClass::Rapid],
        );
        assert!(policy.should_accept(&challenge("bob", true, "blitz", "standard")));
        assert!(!policy.should_accept(&challenge("bob", false, "blitz", "standard")));
        assert!(!policy.should_accept(&challenge("bob", true, "classical", "standard")));
        assert!(!policy.should_accept(&challenge("bob", true, "blitz", "chess960")));
    }

    #[test]
    fn allowed_challengers_play_any_speed() {
        let policy = ChallengePolicy::new(vec!["Alice".to_string()], [SpeedClass::Blitz]);
        assert!(policy.should_accept(&challenge("alice", false, "correspondence", "standard")));
        assert!(policy.should_accept(&challenge("alice", false, "rapid", "fromPosition")));
        assert!(!policy.should_accept(&challenge("alice", false, "rapid", "atomic")));
    }

    #[test]
    fn allow_list_file_skips_comments() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("allowed.challengers");
        std::fs::write(&path, "# friends\nalice\n\n  carol  # sparring\n").unwrap();
        let config = ChallengeConfig {
            allowed_challengers_file: Some(path),
            rated_speeds: vec!["blitz".into(), "lightning".into()],
        };
        let policy = ChallengePolicy::from_config(&config).unwrap();
        assert!(policy.should_accept(&challenge("carol", false, "classical", "standard")));
        assert!(!policy.should_accept(&challenge("dave", true, "bullet", "standard")));

        let missing = ChallengeConfig {
            allowed_challengers_file: Some(PathBuf::from("/nonexistent/allowed.challengers")),
            ..ChallengeConfig::default()
        };
        let policy = ChallengePolicy::from_config(&missing).unwrap();
        assert!(!policy.should_accept(&challenge("alice", false, "blitz", "standard")));
    }
}
