//! 自适应压测：按滑动窗口失败率停止爬坡、逐步减少用户，稳定后结束。

use serde::{Deserialize, Serialize};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use crate::loadtest::config::NormalizedLoadConfig;

/// 控制器做判断前窗口内至少需要的样本数
const MIN_WINDOW_SAMPLES: u64 = 20;

pub const EXHAUSTED_REASON: &str = "Adaptive backoff exhausted";

/// 自适应阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdaptivePhase {
    Disabled,
    Ramping,
    BackingOff,
    Stable,
    Exhausted,
}

/// 结果里附带的自适应摘要
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdaptiveSummary {
    pub enabled: bool,
    pub phase: AdaptivePhase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stabilized: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peak_users: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stable_users: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_to_first_failure_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backoff_steps: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peak_window_failure_rate: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stable_window_failure_rate: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peak_window_rps: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stable_window_rps: Option<f64>,
}

impl AdaptiveSummary {
    fn new(enabled: bool) -> Self {
        Self {
            enabled,
            phase: if enabled {
                AdaptivePhase::Ramping
            } else {
                AdaptivePhase::Disabled
            },
            stabilized: None,
            peak_users: None,
            stable_users: None,
            time_to_first_failure_ms: None,
            backoff_steps: None,
            peak_window_failure_rate: None,
            stable_window_failure_rate: None,
            peak_window_rps: None,
            stable_window_rps: None,
        }
    }
}

/// 窗口统计
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowStats {
    pub sent: u64,
    pub failure_rate: f64,
    pub rps: f64,
}

#[derive(Debug, Clone, Copy, Default)]
struct Bucket {
    sec: u64,
    sent: u64,
    failed: u64,
}

/// 按秒分桶的环形计数器
#[derive(Debug)]
pub struct WindowCounter {
    origin: Instant,
    window_sec: u64,
    ring: Mutex<Vec<Bucket>>,
}

impl WindowCounter {
    pub fn new(origin: Instant, window_sec: u64) -> Self {
        let window_sec = window_sec.max(1);
        let len = window_sec.max(3) as usize + 2;
        Self {
            origin,
            window_sec,
            // sec 从 1 开始计，0 表示空桶
            ring: Mutex::new(vec![Bucket::default(); len]),
        }
    }

    fn second(&self, now: Instant) -> u64 {
        now.saturating_duration_since(self.origin).as_secs() + 1
    }

    pub fn record(&self, now: Instant, failed: bool) {
        let sec = self.second(now);
        let mut ring = self.ring.lock().unwrap_or_else(PoisonError::into_inner);
        let len = ring.len();
        let bucket = &mut ring[(sec as usize) % len];
        if bucket.sec != sec {
            *bucket = Bucket {
                sec,
                ..Bucket::default()
            };
        }
        bucket.sent += 1;
        if failed {
            bucket.failed += 1;
        }
    }

    /// 最近 `window_sec` 秒的统计，没有样本时返回 None
    pub fn stats(&self, now: Instant) -> Option<WindowStats> {
        let now_sec = self.second(now);
        let min_sec = (now_sec + 1).saturating_sub(self.window_sec);
        let (sent, failed) = self
            .ring
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|b| b.sec != 0 && b.sec >= min_sec && b.sec <= now_sec)
            .fold((0, 0), |(s, f), b| (s + b.sent, f + b.failed));
        if sent == 0 {
            return None;
        }
        Some(WindowStats {
            sent,
            failure_rate: failed as f64 / sent as f64,
            rps: sent as f64 / self.window_sec as f64,
        })
    }
}

/// 控制器的一次判断结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdaptiveDecision {
    Hold,
    /// 首次不稳定：停止爬坡
    StopRamp,
    /// 退避到新的目标用户数
    Backoff(u64),
    /// 已稳定，正常结束
    Stabilized,
    /// 退到 1 个用户仍不稳定，中止
    Exhausted,
}

/// 自适应控制器状态机
///
/// 调用方定期调用 [`AdaptiveController::tick`]，根据返回的决定调整目标用户数或结束压测。
#[derive(Debug)]
pub struct AdaptiveController {
    threshold: f64,
    stable_for: Duration,
    cooldown: Duration,
    step: u64,
    max_users: u64,
    started: Instant,
    saw_instability: bool,
    stable_since: Option<Instant>,
    last_adjust: Option<Instant>,
    backoff_steps: u64,
    summary: AdaptiveSummary,
}

impl AdaptiveController {
    pub fn new(config: &NormalizedLoadConfig, started: Instant) -> Self {
        Self {
            threshold: config.adaptive_failure_rate.unwrap_or(0.01),
            stable_for: Duration::from_secs(config.adaptive_stable_sec),
            cooldown: Duration::from_millis(config.adaptive_cooldown_ms),
            step: config.adaptive_backoff_step_users.max(1),
            max_users: config.max_users,
            started,
            saw_instability: false,
            stable_since: None,
            last_adjust: None,
            backoff_steps: 0,
            summary: AdaptiveSummary::new(config.adaptive_enabled),
        }
    }

    pub fn summary(&self) -> &AdaptiveSummary {
        &self.summary
    }

    pub fn into_summary(self) -> AdaptiveSummary {
        self.summary
    }

    pub fn tick(&mut self, now: Instant, stats: Option<WindowStats>, target: u64) -> AdaptiveDecision {
        let Some(stats) = stats.filter(|s| s.sent >= MIN_WINDOW_SAMPLES) else {
            return AdaptiveDecision::Hold;
        };
        let unstable = stats.failure_rate > self.threshold;

        if !self.saw_instability {
            if unstable {
                self.saw_instability = true;
                self.stable_since = None;
                self.last_adjust = Some(now);
                self.summary.phase = AdaptivePhase::BackingOff;
                self.summary.peak_users = Some(target);
                self.summary.time_to_first_failure_ms =
                    Some(now.saturating_duration_since(self.started).as_millis() as u64);
                self.summary.peak_window_failure_rate = Some(stats.failure_rate);
                self.summary.peak_window_rps = Some(stats.rps);
                return AdaptiveDecision::StopRamp;
            }
            // 还没爬到最大用户数时不判稳定
            if target < self.max_users {
                self.stable_since = None;
                return AdaptiveDecision::Hold;
            }
            if !self.stable_long_enough(now) {
                return AdaptiveDecision::Hold;
            }
            self.summary.peak_users = Some(self.max_users);
            self.summary.backoff_steps = Some(0);
            self.summary.peak_window_failure_rate = Some(stats.failure_rate);
            self.summary.peak_window_rps = Some(stats.rps);
            self.mark_stable(self.max_users, stats);
            return AdaptiveDecision::Stabilized;
        }

        if unstable {
            self.stable_since = None;
            if self
                .last_adjust
                .is_some_and(|last| now.saturating_duration_since(last) < self.cooldown)
            {
                return AdaptiveDecision::Hold;
            }
            let next = target.saturating_sub(self.step).max(1);
            if next < target {
                self.backoff_steps += 1;
            }
            self.last_adjust = Some(now);
            self.summary.backoff_steps = Some(self.backoff_steps);
            if next <= 1 {
                self.summary.phase = AdaptivePhase::Exhausted;
                return AdaptiveDecision::Exhausted;
            }
            self.summary.phase = AdaptivePhase::BackingOff;
            return AdaptiveDecision::Backoff(next);
        }

        if !self.stable_long_enough(now) {
            return AdaptiveDecision::Hold;
        }
        self.mark_stable(target, stats);
        AdaptiveDecision::Stabilized
    }

    fn stable_long_enough(&mut self, now: Instant) -> bool {
        let since = *self.stable_since.get_or_insert(now);
        now.saturating_duration_since(since) >= self.stable_for
    }

    fn mark_stable(&mut self, users: u64, stats: WindowStats) {
        self.summary.phase = AdaptivePhase::Stable;
        self.summary.stabilized = Some(true);
        self.summary.stable_users = Some(users);
        self.summary.stable_window_failure_rate = Some(stats.failure_rate);
        self.summary.stable_window_rps = Some(stats.rps);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::LoadConfig;

    fn controller(line: &str) -> (AdaptiveController, Instant) {
        let config = NormalizedLoadConfig::from_config(&LoadConfig::parse(line));
        let start = Instant::now();
        (AdaptiveController::new(&config, start), start)
    }

    fn stats(sent: u64, failure_rate: f64) -> Option<WindowStats> {
        Some(WindowStats {
            sent,
            failure_rate,
            rps: sent as f64 / 15.0,
        })
    }

    fn at(start: Instant, ms: u64) -> Instant {
        start + Duration::from_millis(ms)
    }

    #[test]
    fn test_needs_enough_samples() {
        let (mut ctl, start) = controller("adaptive=on max=4");
        assert_eq!(ctl.tick(at(start, 500), stats(5, 1.0), 4), AdaptiveDecision::Hold);
        assert_eq!(ctl.tick(at(start, 500), None, 4), AdaptiveDecision::Hold);
        assert_eq!(ctl.summary().phase, AdaptivePhase::Ramping);
    }

    #[test]
    fn test_backs_off_with_cooldown_until_exhausted() {
        let (mut ctl, start) =
            controller("adaptive=on start=1 max=6 adaptiveCooldown=1 adaptiveBackoffStep=2");

        assert_eq!(ctl.tick(at(start, 500), stats(40, 0.5), 6), AdaptiveDecision::StopRamp);
        let summary = ctl.summary().clone();
        assert_eq!(summary.phase, AdaptivePhase::BackingOff);
        assert_eq!(summary.peak_users, Some(6));
        assert_eq!(summary.time_to_first_failure_ms, Some(500));

        // 冷却期内不调整
        assert_eq!(ctl.tick(at(start, 1000), stats(40, 0.5), 6), AdaptiveDecision::Hold);
        assert_eq!(ctl.tick(at(start, 1500), stats(40, 0.5), 6), AdaptiveDecision::Backoff(4));
        assert_eq!(ctl.tick(at(start, 2500), stats(40, 0.5), 4), AdaptiveDecision::Backoff(2));
        assert_eq!(ctl.tick(at(start, 3500), stats(40, 0.5), 2), AdaptiveDecision::Exhausted);

        let summary = ctl.into_summary();
        assert_eq!(summary.phase, AdaptivePhase::Exhausted);
        assert_eq!(summary.backoff_steps, Some(3));
    }

    #[test]
    fn test_stabilizes_after_backoff() {
        let (mut ctl, start) = controller("adaptive=on max=8 adaptiveStable=2s adaptiveCooldown=1");

        assert_eq!(ctl.tick(at(start, 500), stats(40, 0.3), 8), AdaptiveDecision::StopRamp);
        assert_eq!(ctl.tick(at(start, 2000), stats(40, 0.3), 8), AdaptiveDecision::Backoff(6));
        assert_eq!(ctl.tick(at(start, 2500), stats(40, 0.0), 6), AdaptiveDecision::Hold);
        assert_eq!(ctl.tick(at(start, 4000), stats(40, 0.0), 6), AdaptiveDecision::Hold);
        assert_eq!(ctl.tick(at(start, 4500), stats(40, 0.0), 6), AdaptiveDecision::Stabilized);

        let summary = ctl.into_summary();
        assert_eq!(summary.phase, AdaptivePhase::Stable);
        assert_eq!(summary.stabilized, Some(true));
        assert_eq!(summary.stable_users, Some(6));
        assert_eq!(summary.peak_users, Some(8));
    }

    #[test]
    fn test_healthy_run_stabilizes_only_at_max_users() {
        let (mut ctl, start) = controller("adaptive=on start=1 max=4 adaptiveStable=1");

        assert_eq!(ctl.tick(at(start, 500), stats(30, 0.0), 2), AdaptiveDecision::Hold);
        assert_eq!(ctl.tick(at(start, 2000), stats(30, 0.0), 2), AdaptiveDecision::Hold);
        assert_eq!(ctl.tick(at(start, 2500), stats(30, 0.0), 4), AdaptiveDecision::Hold);
        assert_eq!(ctl.tick(at(start, 3500), stats(30, 0.0), 4), AdaptiveDecision::Stabilized);

        let summary = ctl.into_summary();
        assert_eq!(summary.stable_users, Some(4));
        assert_eq!(summary.backoff_steps, Some(0));
    }

    #[test]
    fn test_window_counter_drops_old_buckets() {
        let start = Instant::now();
        let counter = WindowCounter::new(start, 2);
        assert!(counter.stats(start).is_none());

        counter.record(at(start, 100), true);
        counter.record(at(start, 200), false);
        counter.record(at(start, 1100), false);
        counter.record(at(start, 1200), false);

        let window = counter.stats(at(start, 1500)).unwrap();
        assert_eq!(window.sent, 4);
        assert_eq!(window.failure_rate, 0.25);
        assert_eq!(window.rps, 2.0);

        // 第 1 秒的桶已经滑出窗口
        let window = counter.stats(at(start, 2500)).unwrap();
        assert_eq!(window.sent, 2);
        assert_eq!(window.failure_rate, 0.0);
    }
}
