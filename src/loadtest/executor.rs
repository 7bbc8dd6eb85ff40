use async_trait::async_trait;
use rand::Rng;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::http::transport::{CancelRegistry, OutgoingRequest, Transport, TransportError};
use crate::loadtest::adaptive::{
    AdaptiveController, AdaptiveDecision, AdaptiveSummary, EXHAUSTED_REASON, WindowCounter,
};
use crate::loadtest::config::NormalizedLoadConfig;
use crate::loadtest::metrics::LoadTestResults;
use crate::parser::LoadConfig;
use crate::{RawreqError, Result};

/// 失败率判定前至少需要的样本数
const MIN_ABORT_SAMPLES: u64 = 20;
const MIN_SPAWN_INTERVAL: Duration = Duration::from_millis(1);
const CONTROLLER_TICK: Duration = Duration::from_millis(500);

/// 压测执行端
#[async_trait]
pub trait LoadRunner: Send + Sync {
    async fn execute_load_test(
        &self,
        request: &OutgoingRequest,
        config: &LoadConfig,
        request_id: &str,
    ) -> Result<LoadTestResults>;

    fn cancel(&self, request_id: &str);
}

/// 默认压测执行器：每个虚拟用户一个 tokio 任务
pub struct LoadTestExecutor {
    transport: Arc<dyn Transport>,
    registry: CancelRegistry,
}

impl LoadTestExecutor {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            registry: CancelRegistry::new(),
        }
    }
}

#[async_trait]
impl LoadRunner for LoadTestExecutor {
    async fn execute_load_test(
        &self,
        request: &OutgoingRequest,
        config: &LoadConfig,
        request_id: &str,
    ) -> Result<LoadTestResults> {
        if request_id.is_empty() {
            return Err(RawreqError::Other("压测需要 request id".to_string()));
        }
        let config = NormalizedLoadConfig::from_config(config);
        let cancel = self.registry.register(request_id);
        let results = run_load_test(
            Arc::clone(&self.transport),
            request.clone(),
            config,
            cancel,
        )
        .await;
        self.registry.release(request_id);
        Ok(results)
    }

    fn cancel(&self, request_id: &str) {
        if self.registry.cancel(request_id) {
            info!(request_id, "load test cancelled");
        }
    }
}

#[derive(Default)]
struct Tally {
    issued: AtomicU64,
    total: AtomicU64,
    ok: AtomicU64,
    failed: AtomicU64,
    response_times: Mutex<Vec<u64>>,
    status_counts: Mutex<BTreeMap<String, u64>>,
    aborted: AtomicBool,
    abort_reason: Mutex<Option<String>>,
    next_allowed: Mutex<Option<Instant>>,
}

struct Shared {
    transport: Arc<dyn Transport>,
    request: OutgoingRequest,
    config: NormalizedLoadConfig,
    tally: Tally,
    /// 取消、到时、失败率中止或自适应结束都会触发
    stop: CancellationToken,
    deadline: Option<Instant>,
    /// 用户编号大于它的虚拟用户退出
    target_users: AtomicU64,
    allow_ramping: AtomicBool,
    /// 只在自适应模式下存在
    window: Option<WindowCounter>,
}

impl Shared {
    fn should_stop(&self) -> bool {
        self.stop.is_cancelled()
            || self.tally.aborted.load(Ordering::SeqCst)
            || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    fn reserve_slot(&self) -> bool {
        match self.config.iterations {
            Some(limit) => self.tally.issued.fetch_add(1, Ordering::SeqCst) < limit,
            None => true,
        }
    }

    /// 全局 RPS 间隔控制
    fn throttle_delay(&self) -> Option<Duration> {
        let rps = self.config.requests_per_second?;
        let interval = Duration::from_secs_f64(1.0 / rps as f64);
        let mut next = self
            .tally
            .next_allowed
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let now = Instant::now();
        let slot = (*next).filter(|t| *t > now).unwrap_or(now);
        *next = Some(slot + interval);
        let wait = slot.saturating_duration_since(now);
        (!wait.is_zero()).then_some(wait)
    }

    fn user_wait(&self) -> Duration {
        let ms = match self.config.wait_range() {
            Some((min, max)) if max > min => rand::rng().random_range(min..=max),
            Some((min, _)) => min,
            None => self.config.delay_ms,
        };
        Duration::from_millis(ms)
    }

    fn user_retired(&self, user: u64) -> bool {
        user > self.target_users.load(Ordering::SeqCst)
    }

    fn record(&self, status: u16, elapsed_ms: u64) {
        let failed = status == 0 || status >= 400;
        if let Some(window) = &self.window {
            window.record(Instant::now(), failed);
        }
        self.tally.total.fetch_add(1, Ordering::SeqCst);
        self.tally
            .response_times
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(elapsed_ms);

        if failed {
            self.tally.failed.fetch_add(1, Ordering::SeqCst);
            *self
                .tally
                .status_counts
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .entry(status.to_string())
                .or_insert(0) += 1;
        } else {
            self.tally.ok.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn maybe_abort(&self) {
        let Some(threshold) = self.config.failure_rate_threshold else {
            return;
        };
        let total = self.tally.total.load(Ordering::SeqCst);
        if total < MIN_ABORT_SAMPLES {
            return;
        }
        let rate = self.tally.failed.load(Ordering::SeqCst) as f64 / total as f64;
        if rate < threshold {
            return;
        }
        self.abort(format!(
            "Failure rate {:.1}% exceeded threshold {:.1}%",
            rate * 100.0,
            threshold * 100.0
        ));
    }

    /// 只记录第一次中止的原因
    fn abort(&self, reason: String) {
        if !self.tally.aborted.swap(true, Ordering::SeqCst) {
            warn!(%reason, "aborting load test");
            *self
                .tally
                .abort_reason
                .lock()
                .unwrap_or_else(PoisonError::into_inner) = Some(reason);
            self.stop.cancel();
        }
    }
}

async fn pause(shared: &Shared, wait: Duration) -> bool {
    tokio::select! {
        _ = shared.stop.cancelled() => false,
        _ = tokio::time::sleep(wait) => true,
    }
}

async fn run_user(shared: Arc<Shared>, user: u64) {
    debug!(user, "virtual user started");
    loop {
        if shared.should_stop() || shared.user_retired(user) || !shared.reserve_slot() {
            break;
        }
        if let Some(wait) = shared.throttle_delay()
            && !pause(&shared, wait).await
        {
            break;
        }
        if shared.should_stop() {
            break;
        }

        let started = Instant::now();
        let outcome = tokio::select! {
            _ = shared.stop.cancelled() => break,
            outcome = shared.transport.send(&shared.request, None) => outcome,
        };
        let elapsed = started.elapsed().as_millis() as u64;
        let (status, elapsed) = match outcome {
            Ok(response) => (
                response.status,
                if response.response_time > 0 {
                    response.response_time
                } else {
                    elapsed
                },
            ),
            Err(TransportError::Cancelled) => break,
            Err(TransportError::Failed { status, .. }) => (status.unwrap_or(0), elapsed),
        };
        shared.record(status, elapsed);
        shared.maybe_abort();

        let wait = shared.user_wait();
        if !wait.is_zero() && !pause(&shared, wait).await {
            break;
        }
    }
    debug!(user, "virtual user finished");
}

async fn run_controller(shared: Arc<Shared>, mut controller: AdaptiveController) -> AdaptiveSummary {
    let mut ticker = tokio::time::interval(CONTROLLER_TICK);
    // interval 的第一次 tick 立即完成
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = shared.stop.cancelled() => break,
            _ = ticker.tick() => {}
        }
        let Some(window) = &shared.window else {
            break;
        };
        if shared.should_stop() {
            break;
        }
        let now = Instant::now();
        let target = shared.target_users.load(Ordering::SeqCst);
        match controller.tick(now, window.stats(now), target) {
            AdaptiveDecision::Hold => {}
            AdaptiveDecision::StopRamp => {
                info!(users = target, "instability detected, ramping stopped");
                shared.allow_ramping.store(false, Ordering::SeqCst);
            }
            AdaptiveDecision::Backoff(next) => {
                info!(from = target, to = next, "backing off virtual users");
                shared.target_users.store(next, Ordering::SeqCst);
            }
            AdaptiveDecision::Stabilized => {
                info!(users = target, "load stabilized, stopping");
                shared.stop.cancel();
                break;
            }
            AdaptiveDecision::Exhausted => {
                shared.target_users.store(1, Ordering::SeqCst);
                shared.abort(EXHAUSTED_REASON.to_string());
                break;
            }
        }
    }
    controller.into_summary()
}

async fn run_load_test(
    transport: Arc<dyn Transport>,
    request: OutgoingRequest,
    config: NormalizedLoadConfig,
    cancel: CancellationToken,
) -> LoadTestResults {
    let start_time = chrono::Utc::now().timestamp_millis();
    let started = Instant::now();
    let deadline = config.duration().map(|d| started + d);
    let spawn_rate = config.effective_spawn_rate();
    info!(
        method = %request.method,
        url = %request.url,
        start_users = config.start_users,
        max_users = config.max_users,
        iterations = ?config.iterations,
        duration_ms = ?config.duration_ms,
        adaptive = config.adaptive_enabled,
        "starting load test"
    );

    let adaptive = config.adaptive_enabled;
    let controller = adaptive.then(|| AdaptiveController::new(&config, started));
    let shared = Arc::new(Shared {
        transport,
        request,
        tally: Tally::default(),
        stop: cancel.child_token(),
        deadline,
        // 自适应模式从起始用户数开始，由爬坡逐个放开
        target_users: AtomicU64::new(if adaptive {
            config.start_users
        } else {
            config.max_users
        }),
        allow_ramping: AtomicBool::new(true),
        window: adaptive.then(|| WindowCounter::new(started, config.adaptive_window_sec)),
        config,
    });
    let controller = controller.map(|c| tokio::spawn(run_controller(Arc::clone(&shared), c)));

    if let Some(deadline) = deadline {
        let stop = shared.stop.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep_until(deadline.into()) => stop.cancel(),
                _ = stop.cancelled() => {}
            }
        });
    }

    let mut users = JoinSet::new();
    let mut spawned = 0u64;
    for _ in 0..shared.config.start_users {
        spawned += 1;
        users.spawn(run_user(Arc::clone(&shared), spawned));
    }

    let interval = spawn_rate
        .map(|rate| Duration::from_secs_f64(1.0 / rate as f64).max(MIN_SPAWN_INTERVAL));
    while spawned < shared.config.max_users
        && !shared.should_stop()
        && shared.allow_ramping.load(Ordering::SeqCst)
    {
        if let Some(interval) = interval
            && !pause(&shared, interval).await
        {
            break;
        }
        if !shared.allow_ramping.load(Ordering::SeqCst) {
            break;
        }
        spawned += 1;
        if adaptive {
            let max_users = shared.config.max_users;
            let _ = shared
                .target_users
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |t| {
                    Some((t + 1).min(max_users))
                });
        }
        users.spawn(run_user(Arc::clone(&shared), spawned));
    }

    while let Some(joined) = users.join_next().await {
        if let Err(e) = joined {
            warn!(error = %e, "virtual user task failed");
        }
    }
    shared.stop.cancel();

    let adaptive_summary = match controller {
        Some(handle) => match handle.await {
            Ok(summary) => Some(summary),
            Err(e) => {
                warn!(error = %e, "adaptive controller task failed");
                None
            }
        },
        None => None,
    };

    let tally = &shared.tally;
    let aborted = tally.aborted.load(Ordering::SeqCst);
    let results = LoadTestResults {
        total_requests: tally.total.load(Ordering::SeqCst),
        successful_requests: tally.ok.load(Ordering::SeqCst),
        failed_requests: tally.failed.load(Ordering::SeqCst),
        response_times: std::mem::take(
            &mut *tally
                .response_times
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        ),
        failure_status_counts: std::mem::take(
            &mut *tally
                .status_counts
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        ),
        start_time,
        end_time: chrono::Utc::now().timestamp_millis(),
        cancelled: cancel.is_cancelled() && !aborted,
        aborted,
        abort_reason: tally
            .abort_reason
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone(),
        planned_duration_ms: shared.config.duration_ms,
        adaptive: adaptive_summary,
    };
    info!(
        total = results.total_requests,
        failed = results.failed_requests,
        cancelled = results.cancelled,
        aborted = results.aborted,
        "load test finished"
    );
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::transport::TransportResponse;

    struct FixedTransport {
        status: u16,
        sent: AtomicU64,
    }

    #[async_trait]
    impl Transport for FixedTransport {
        async fn send(
            &self,
            _request: &OutgoingRequest,
            _request_id: Option<&str>,
        ) -> std::result::Result<TransportResponse, TransportError> {
            self.sent.fetch_add(1, Ordering::SeqCst);
            Ok(TransportResponse {
                status: self.status,
                response_time: 3,
                ..TransportResponse::default()
            })
        }

        fn cancel_request(&self, _request_id: &str) {}
    }

    fn executor(status: u16) -> (Arc<FixedTransport>, LoadTestExecutor) {
        let transport = Arc::new(FixedTransport {
            status,
            sent: AtomicU64::new(0),
        });
        let executor = LoadTestExecutor::new(transport.clone());
        (transport, executor)
    }

    fn request() -> OutgoingRequest {
        OutgoingRequest {
            method: "GET".to_string(),
            url: "http://localhost/health".to_string(),
            ..OutgoingRequest::default()
        }
    }

    #[tokio::test]
    async fn test_iterations_are_shared_across_users() {
        let (transport, executor) = executor(200);
        let config = LoadConfig::parse("users=4 iterations=25");
        let results = executor
            .execute_load_test(&request(), &config, "load-1")
            .await
            .unwrap();

        assert_eq!(results.total_requests, 25);
        assert_eq!(results.successful_requests, 25);
        assert_eq!(transport.sent.load(Ordering::SeqCst), 25);
        assert_eq!(results.response_times.len(), 25);
        assert!(!results.cancelled);
        assert!(!results.aborted);
    }

    #[tokio::test]
    async fn test_failures_counted_by_status() {
        let (_, executor) = executor(503);
        let config = LoadConfig::parse("iterations=5");
        let results = executor
            .execute_load_test(&request(), &config, "load-2")
            .await
            .unwrap();

        assert_eq!(results.failed_requests, 5);
        assert_eq!(results.failure_status_counts.get("503"), Some(&5));
    }

    #[tokio::test]
    async fn test_failure_threshold_aborts() {
        let (_, executor) = executor(500);
        let config = LoadConfig::parse("users=2 iterations=500 failureRateThreshold=10%");
        let results = executor
            .execute_load_test(&request(), &config, "load-3")
            .await
            .unwrap();

        assert!(results.aborted);
        assert!(!results.cancelled);
        assert!(results.total_requests < 500);
        assert!(results.abort_reason.unwrap().starts_with("Failure rate"));
    }

    #[tokio::test]
    async fn test_cancel_stops_duration_run() {
        let (_, executor) = executor(200);
        let executor = Arc::new(executor);
        let config = LoadConfig::parse("users=2 duration=30s delay=20ms");

        let runner = Arc::clone(&executor);
        let handle = tokio::spawn(async move {
            runner
                .execute_load_test(&request(), &config, "load-4")
                .await
        });
        tokio::time::sleep(Duration::from_millis(100)).await;
        executor.cancel("load-4");

        let results = handle.await.unwrap().unwrap();
        assert!(results.cancelled);
        assert_eq!(results.planned_duration_ms, Some(30_000));
    }

    #[tokio::test]
    async fn test_adaptive_backoff_exhausted() {
        let (_, executor) = executor(500);
        let config = LoadConfig::parse(
            "users=4 duration=30s delay=10ms adaptive=on adaptiveBackoffStep=3 adaptiveCooldown=1",
        );
        let started = Instant::now();
        let results = executor
            .execute_load_test(&request(), &config, "load-5")
            .await
            .unwrap();

        assert!(started.elapsed() < Duration::from_secs(10));
        assert!(results.aborted);
        assert!(!results.cancelled);
        assert_eq!(results.abort_reason.as_deref(), Some(EXHAUSTED_REASON));
        let adaptive = results.adaptive.unwrap();
        assert_eq!(adaptive.phase, crate::loadtest::AdaptivePhase::Exhausted);
        assert_eq!(adaptive.peak_users, Some(4));
        assert_eq!(adaptive.backoff_steps, Some(1));
    }

    #[tokio::test]
    async fn test_adaptive_stops_once_stable() {
        let (_, executor) = executor(200);
        let config =
            LoadConfig::parse("users=2 duration=30s delay=10ms adaptive=on adaptiveStable=1s");
        let started = Instant::now();
        let results = executor
            .execute_load_test(&request(), &config, "load-6")
            .await
            .unwrap();

        assert!(started.elapsed() < Duration::from_secs(10));
        assert!(!results.aborted);
        assert!(!results.cancelled);
        assert!(results.total_requests > 0);
        let adaptive = results.adaptive.unwrap();
        assert_eq!(adaptive.phase, crate::loadtest::AdaptivePhase::Stable);
        assert_eq!(adaptive.stable_users, Some(2));
    }

    #[tokio::test]
    async fn test_no_adaptive_summary_by_default() {
        let (_, executor) = executor(200);
        let results = executor
            .execute_load_test(&request(), &LoadConfig::parse("iterations=3"), "load-7")
            .await
            .unwrap();
        assert!(results.adaptive.is_none());
    }

    #[tokio::test]
    async fn test_requires_request_id() {
        let (_, executor) = executor(200);
        let result = executor
            .execute_load_test(&request(), &LoadConfig::default(), "")
            .await;
        assert!(result.is_err());
    }
}
