use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use serde::Serialize;

use crate::parser::{LoadConfig, LoadValue};

/// 既没有 iterations 也没有 duration 时的默认请求数
const DEFAULT_ITERATIONS: u64 = 10;

const TRUTHY: [&str; 7] = ["1", "true", "yes", "y", "on", "enable", "enabled"];

/// 归一化后的压测参数
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedLoadConfig {
    pub iterations: Option<u64>,
    pub duration_ms: Option<u64>,
    pub start_users: u64,
    pub max_users: u64,
    pub spawn_rate: Option<u64>,
    pub ramp_up_ms: Option<u64>,
    pub delay_ms: u64,
    pub wait_min_ms: Option<u64>,
    pub wait_max_ms: Option<u64>,
    pub requests_per_second: Option<u64>,
    /// 0..=1
    pub failure_rate_threshold: Option<f64>,

    pub adaptive_enabled: bool,
    pub adaptive_failure_rate: Option<f64>,
    pub adaptive_window_sec: u64,
    pub adaptive_stable_sec: u64,
    pub adaptive_cooldown_ms: u64,
    pub adaptive_backoff_step_users: u64,
}

impl NormalizedLoadConfig {
    pub fn from_config(config: &LoadConfig) -> Self {
        let int = |key: &str| config.get(key).and_then(to_int);
        let duration = |key: &str| config.get(key).and_then(parse_duration_ms);

        let iterations = int("iterations").filter(|n| *n > 0).map(|n| n as u64);
        let duration_ms = duration("duration").filter(|ms| *ms > 0);

        let concurrent = int("concurrent");
        let users = int("users");
        let start_u = int("startUsers")
            .or(int("start"))
            .or(concurrent)
            .or(users)
            .unwrap_or(1)
            .max(0) as u64;
        let max_users = int("maxUsers")
            .or(int("max"))
            .or(concurrent)
            .or(users)
            .unwrap_or(1)
            .max(1) as u64;

        let adaptive_enabled = config.get("adaptive").is_some_and(parse_bool);
        let adaptive_failure_rate = if adaptive_enabled {
            Some(
                config
                    .get("adaptiveFailureRate")
                    .and_then(parse_failure_rate)
                    .unwrap_or(0.01),
            )
        } else {
            None
        };

        Self {
            iterations: if iterations.is_none() && duration_ms.is_none() {
                Some(DEFAULT_ITERATIONS)
            } else {
                iterations
            },
            duration_ms,
            start_users: start_u.min(max_users),
            max_users,
            spawn_rate: int("spawnRate").filter(|n| *n > 0).map(|n| n as u64),
            ramp_up_ms: duration("rampUp").filter(|ms| *ms > 0),
            delay_ms: duration("delay").unwrap_or(0),
            wait_min_ms: duration("waitMin"),
            wait_max_ms: duration("waitMax"),
            requests_per_second: int("requestsPerSecond")
                .filter(|n| *n > 0)
                .map(|n| n as u64),
            failure_rate_threshold: config
                .get("failureRateThreshold")
                .and_then(parse_failure_rate),
            adaptive_enabled,
            adaptive_failure_rate,
            adaptive_window_sec: parse_seconds(config.get("adaptiveWindow"), 15),
            adaptive_stable_sec: parse_seconds(config.get("adaptiveStable"), 20),
            adaptive_cooldown_ms: parse_seconds(config.get("adaptiveCooldown"), 5) * 1000,
            adaptive_backoff_step_users: int("adaptiveBackoffStep").unwrap_or(2).max(1) as u64,
        }
    }

    pub fn duration(&self) -> Option<Duration> {
        self.duration_ms.map(Duration::from_millis)
    }

    /// 每个虚拟用户两次请求之间的等待区间（毫秒）
    pub fn wait_range(&self) -> Option<(u64, u64)> {
        match (self.wait_min_ms, self.wait_max_ms) {
            (Some(a), Some(b)) => Some((a.min(b), a.max(b))),
            _ => None,
        }
    }

    /// 爬坡阶段每秒新增的用户数
    ///
    /// 未配置 `spawnRate` 时由 `rampUp` 推导，都没有时为 `None`（一次性启动）。
    pub fn effective_spawn_rate(&self) -> Option<u64> {
        if self.spawn_rate.is_some() {
            return self.spawn_rate;
        }
        let remaining = self.max_users.saturating_sub(self.start_users);
        match self.ramp_up_ms {
            Some(ms) if remaining > 0 => {
                let seconds = ms as f64 / 1000.0;
                Some(((remaining as f64 / seconds).ceil() as u64).max(1))
            }
            _ => None,
        }
    }
}

/// 解析时长，支持 `ms|s|m|h` 后缀，裸数字按毫秒处理
pub fn parse_duration_ms(value: &LoadValue) -> Option<u64> {
    static DURATION_REGEX: OnceLock<Regex> = OnceLock::new();
    let raw = match value {
        LoadValue::Int(n) => return Some((*n).max(0) as u64),
        LoadValue::Text(s) => s.trim(),
    };
    if raw.is_empty() {
        return None;
    }
    let re = DURATION_REGEX
        .get_or_init(|| Regex::new(r"(?i)^(-?\d+(?:\.\d+)?)\s*(ms|s|m|h)?$").unwrap());
    let caps = re.captures(raw)?;
    let n: f64 = caps[1].parse().ok()?;
    if !n.is_finite() || n < 0.0 {
        return None;
    }
    let multiplier = match caps.get(2).map(|m| m.as_str().to_ascii_lowercase()).as_deref() {
        Some("h") => 3_600_000.0,
        Some("m") => 60_000.0,
        Some("s") => 1_000.0,
        _ => 1.0,
    };
    Some((n * multiplier).round() as u64)
}

/// 失败率阈值：小数、百分比（`5%`）或大于 1 的数字（按百分比）
pub fn parse_failure_rate(value: &LoadValue) -> Option<f64> {
    static PERCENT_REGEX: OnceLock<Regex> = OnceLock::new();
    let raw = match value {
        LoadValue::Int(n) => return Some(to_fraction(*n as f64)),
        LoadValue::Text(s) => s.trim(),
    };
    if raw.is_empty() {
        return None;
    }
    let re = PERCENT_REGEX.get_or_init(|| Regex::new(r"^(-?\d+(?:\.\d+)?)\s*%$").unwrap());
    if let Some(caps) = re.captures(raw) {
        let p: f64 = caps[1].parse().ok()?;
        if p < 0.0 {
            return None;
        }
        return Some((p / 100.0).clamp(0.0, 1.0));
    }
    let n: f64 = raw.parse().ok()?;
    if !n.is_finite() || n < 0.0 {
        return None;
    }
    Some(to_fraction(n))
}

fn to_fraction(n: f64) -> f64 {
    let frac = if n > 1.0 { n / 100.0 } else { n };
    frac.clamp(0.0, 1.0)
}

pub fn parse_bool(value: &LoadValue) -> bool {
    match value {
        LoadValue::Int(n) => *n != 0,
        LoadValue::Text(s) => TRUTHY.contains(&s.trim().to_lowercase().as_str()),
    }
}

/// 取前导整数，`"10abc"` 视为 10
fn to_int(value: &LoadValue) -> Option<i64> {
    match value {
        LoadValue::Int(n) => Some(*n),
        LoadValue::Text(s) => {
            let s = s.trim();
            let (sign, digits) = match s.strip_prefix('-') {
                Some(rest) => (-1, rest),
                None => (1, s.strip_prefix('+').unwrap_or(s)),
            };
            let end = digits
                .find(|c: char| !c.is_ascii_digit())
                .unwrap_or(digits.len());
            digits[..end].parse::<i64>().ok().map(|n| n * sign)
        }
    }
}

fn parse_seconds(value: Option<&LoadValue>, fallback: u64) -> u64 {
    let Some(value) = value else {
        return fallback;
    };
    if let Some(ms) = parse_duration_ms(value).filter(|ms| *ms > 0) {
        return ((ms as f64 / 1000.0).round() as u64).max(1);
    }
    match to_int(value) {
        Some(n) if n > 0 => n as u64,
        _ => fallback,
    }
}
