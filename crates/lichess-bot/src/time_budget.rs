//! 1 手あたりの思考時間の決定。

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::Deserialize;

use crate::config::TimeConfig;

/// 速度区分ごとの指定がないときの除数。
pub const DEFAULT_DIVISOR: u32 = 30;
/// 思考時間の下限。持ち時間がほぼ 0 でも 0 秒探索は要求しない。
pub const DEFAULT_MIN_BUDGET: Duration = Duration::from_millis(100);
/// 速度区分が不明なときの初手思考時間。
pub const DEFAULT_FIRST_MOVE: Duration = Duration::from_secs(1);

/// Lichess の速度区分。
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SpeedClass {
    UltraBullet,
    Bullet,
    Blitz,
    Rapid,
    Classical,
    Correspondence,
    #[serde(other)]
    Unknown,
}

impl SpeedClass {
    pub const ALL: [SpeedClass; 6] = [
        SpeedClass::UltraBullet,
        SpeedClass::Bullet,
        SpeedClass::Blitz,
        SpeedClass::Rapid,
        SpeedClass::Classical,
        SpeedClass::Correspondence,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SpeedClass::UltraBullet => "ultraBullet",
            SpeedClass::Bullet => "bullet",
            SpeedClass::Blitz => "blitz",
            SpeedClass::Rapid => "rapid",
            SpeedClass::Classical => "classical",
            SpeedClass::Correspondence => "correspondence",
            SpeedClass::Unknown => "unknown",
        }
    }

    pub fn from_key(key: &str) -> SpeedClass {
        SpeedClass::ALL
            .into_iter()
            .find(|s| s.as_str().eq_ignore_ascii_case(key))
            .unwrap_or(SpeedClass::Unknown)
    }
}

impl fmt::Display for SpeedClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 手番側の残り時間と除数。毎手サーバーの最新値から作り直す。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ClockState {
    pub remaining_ms: u64,
    pub divisor: u32,
}

/// `remaining_ms / 1000 / divisor` 秒。`floor` 以下なら `floor`。
///
/// divisor が 0 のときは 1 として扱う。
pub fn compute(remaining_ms: u64, divisor: u32, floor: Duration) -> Duration {
    let seconds = remaining_ms as f64 / 1000.0 / f64::from(divisor.max(1));
    let budget = Duration::from_secs_f64(seconds);
    if budget <= floor { floor } else { budget }
}

/// 速度区分ごとの除数表・初手思考時間表と下限値。
#[derive(Clone, Debug)]
pub struct TimeBudget {
    divisors: BTreeMap<SpeedClass, u32>,
    default_divisor: u32,
    first_move: BTreeMap<SpeedClass, Duration>,
    default_first_move: Duration,
    floor: Duration,
}

impl Default for TimeBudget {
    fn default() -> Self {
        Self::from_config(&TimeConfig::default())
    }
}

impl TimeBudget {
    pub fn from_config(config: &TimeConfig) -> Self {
        let divisors = config
            .divisors
            .iter()
            .map(|(k, v)| (SpeedClass::from_key(k), *v))
            .filter(|(speed, _)| *speed != SpeedClass::Unknown)
            .collect();
        let first_move = config
            .first_move_ms
            .iter()
            .map(|(k, v)| (SpeedClass::from_key(k), Duration::from_millis(*v)))
            .filter(|(speed, _)| *speed != SpeedClass::Unknown)
            .collect();
        Self {
            divisors,
            default_divisor: config.default_divisor.max(1),
            first_move,
            default_first_move: Duration::from_millis(config.default_first_move_ms),
            floor: Duration::from_millis(config.min_budget_ms),
        }
    }

    pub fn floor(&self) -> Duration {
        self.floor
    }

    pub fn divisor(&self, speed: SpeedClass) -> u32 {
        self.divisors
            .get(&speed)
            .copied()
            .unwrap_or(self.default_divisor)
    }

    pub fn clock_state(&self, speed: SpeedClass, remaining_ms: u64) -> ClockState {
        ClockState {
            remaining_ms,
            divisor: self.divisor(speed),
        }
    }

    pub fn budget(&self, clock: ClockState) -> Duration {
        compute(clock.remaining_ms, clock.divisor, self.floor)
    }

    /// 時計が動き出す前（双方 1 手目まで）の思考時間。
    pub fn first_move(&self, speed: SpeedClass) -> Duration {
        let duration = self
            .first_move
            .get(&speed)
            .copied()
            .unwrap_or(self.default_first_move);
        duration.max(self.floor)
    }
}
