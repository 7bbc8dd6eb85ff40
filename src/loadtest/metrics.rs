use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::loadtest::adaptive::AdaptiveSummary;

/// 压测执行器返回的原始结果
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadTestResults {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    /// 每个请求的耗时（毫秒）
    pub response_times: Vec<u64>,
    /// 失败状态码 -> 次数，`"0"` 表示网络错误
    pub failure_status_counts: BTreeMap<String, u64>,
    /// Unix 毫秒
    pub start_time: i64,
    pub end_time: i64,
    pub cancelled: bool,
    pub aborted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub abort_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub planned_duration_ms: Option<u64>,
    /// 只有开启自适应时才有
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub adaptive: Option<AdaptiveSummary>,
}

/// 聚合指标
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadTestMetrics {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub failure_status_counts: BTreeMap<String, u64>,
    pub requests_per_second: f64,
    pub average_response_time: f64,
    pub p50: u64,
    pub p95: u64,
    pub p99: u64,
    pub min_response_time: u64,
    pub max_response_time: u64,
    /// 百分比
    pub error_rate: f64,
    /// 秒
    pub duration: f64,
    pub cancelled: bool,
    pub aborted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub abort_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub planned_duration: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub adaptive: Option<AdaptiveSummary>,
}

impl LoadTestMetrics {
    pub fn calculate(results: &LoadTestResults) -> Self {
        let mut sorted = results.response_times.clone();
        sorted.sort_unstable();
        let duration = (results.end_time - results.start_time) as f64 / 1000.0;

        let average_response_time = if sorted.is_empty() {
            0.0
        } else {
            sorted.iter().sum::<u64>() as f64 / sorted.len() as f64
        };
        let error_rate = if results.total_requests == 0 {
            0.0
        } else {
            results.failed_requests as f64 / results.total_requests as f64 * 100.0
        };

        Self {
            total_requests: results.total_requests,
            successful_requests: results.successful_requests,
            failed_requests: results.failed_requests,
            failure_status_counts: results.failure_status_counts.clone(),
            requests_per_second: if duration > 0.0 {
                results.total_requests as f64 / duration
            } else {
                0.0
            },
            average_response_time,
            p50: percentile(&sorted, 0.5),
            p95: percentile(&sorted, 0.95),
            p99: percentile(&sorted, 0.99),
            min_response_time: sorted.first().copied().unwrap_or(0),
            max_response_time: sorted.last().copied().unwrap_or(0),
            error_rate,
            duration,
            cancelled: results.cancelled,
            aborted: results.aborted,
            abort_reason: results.abort_reason.clone(),
            planned_duration: results.planned_duration_ms.map(|ms| ms as f64 / 1000.0),
            adaptive: results.adaptive.clone(),
        }
    }

    /// 汇总响应的 statusText
    pub fn status_text(&self) -> &'static str {
        if self.cancelled {
            "Load Test Cancelled"
        } else if self.aborted {
            "Load Test Aborted"
        } else {
            "Load Test Complete"
        }
    }
}

/// `sorted[floor(n * q)]`，越界或为空时取 0
fn percentile(sorted: &[u64], q: f64) -> u64 {
    let idx = (sorted.len() as f64 * q).floor() as usize;
    sorted.get(idx).copied().unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn results(times: Vec<u64>) -> LoadTestResults {
        LoadTestResults {
            total_requests: times.len() as u64,
            successful_requests: times.len() as u64,
            response_times: times,
            start_time: 1_000,
            end_time: 3_000,
            ..LoadTestResults::default()
        }
    }

    #[test]
    fn test_percentiles_use_floor_index() {
        let metrics = LoadTestMetrics::calculate(&results((1..=10).map(|n| n * 10).collect()));
        assert_eq!(metrics.p50, 60);
        assert_eq!(metrics.p95, 100);
        assert_eq!(metrics.p99, 100);
        assert_eq!(metrics.min_response_time, 10);
        assert_eq!(metrics.max_response_time, 100);
        assert_eq!(metrics.average_response_time, 55.0);
    }

    #[test]
    fn test_rps_and_duration() {
        let metrics = LoadTestMetrics::calculate(&results(vec![5, 5, 5, 5]));
        assert_eq!(metrics.duration, 2.0);
        assert_eq!(metrics.requests_per_second, 2.0);
    }

    #[test]
    fn test_empty_results() {
        let metrics = LoadTestMetrics::calculate(&LoadTestResults::default());
        assert_eq!(metrics.total_requests, 0);
        assert_eq!(metrics.average_response_time, 0.0);
        assert_eq!(metrics.error_rate, 0.0);
        assert_eq!(metrics.p50, 0);
        assert_eq!(metrics.requests_per_second, 0.0);
    }

    #[test]
    fn test_error_rate_percent() {
        let mut raw = results(vec![1, 2, 3, 4]);
        raw.failed_requests = 1;
        raw.successful_requests = 3;
        assert_eq!(LoadTestMetrics::calculate(&raw).error_rate, 25.0);
    }

    #[test]
    fn test_status_text() {
        let mut metrics = LoadTestMetrics::default();
        assert_eq!(metrics.status_text(), "Load Test Complete");
        metrics.aborted = true;
        assert_eq!(metrics.status_text(), "Load Test Aborted");
        metrics.cancelled = true;
        assert_eq!(metrics.status_text(), "Load Test Cancelled");
    }
}
