use crate::http::response::ResponseData;
use crate::loadtest::LoadTestMetrics;
use anyhow::Result;
use colored::*;

pub enum ResponseFormat {
    Compact,
    Verbose,
}

pub struct ResponseFormatter {
    format: ResponseFormat,
    color: bool,
    show_body: bool,
    show_headers: bool,
    show_timing: bool,
}

impl ResponseFormatter {
    pub fn new(format: ResponseFormat) -> Self {
        Self {
            format,
            color: true,
            show_body: true,
            show_headers: true,
            show_timing: true,
        }
    }

    pub fn without_color(mut self) -> Self {
        self.color = false;
        self
    }

    pub fn format(&self, response: &ResponseData) -> Result<String> {
        if let Some(metrics) = &response.load_test_metrics {
            return Ok(self.format_load_test(response, metrics));
        }
        match self.format {
            ResponseFormat::Compact => self.format_compact(response),
            ResponseFormat::Verbose => self.format_verbose(response),
        }
    }

    fn status_line(&self, response: &ResponseData, bold: bool) -> String {
        let status_line = if response.status_text.is_empty() {
            format!("HTTP {}", response.status)
        } else {
            format!("HTTP {} {}", response.status, response.status_text)
        };
        if !self.color {
            return status_line;
        }
        let colored = if response.is_success() {
            status_line.green()
        } else if (400..500).contains(&response.status) || response.is_cancelled() {
            status_line.yellow()
        } else {
            status_line.red()
        };
        if bold {
            colored.bold().to_string()
        } else {
            colored.to_string()
        }
    }

    fn timing_line(&self, response: &ResponseData) -> String {
        let timing = match response.size {
            Some(size) => format!("Time: {}ms  Size: {} bytes", response.response_time, size),
            None => format!("Time: {}ms", response.response_time),
        };
        if self.color {
            timing.cyan().to_string()
        } else {
            timing
        }
    }

    fn heading(&self, text: &str) -> String {
        if self.color {
            text.blue().bold().to_string()
        } else {
            text.to_string()
        }
    }

    fn format_compact(&self, response: &ResponseData) -> Result<String> {
        let mut output = vec![self.status_line(response, false)];
        if self.show_timing {
            output.push(self.timing_line(response));
        }

        if self.show_body {
            let body = &response.body;
            if !body.is_empty() && body.len() < 200 {
                // 尝试格式化 JSON，失败则显示原始内容
                let formatted_body = self
                    .try_format_json(body)
                    .unwrap_or_else(|_| body.to_string());
                output.push(formatted_body);
            } else if !body.is_empty() {
                output.push(format!("Body: {} bytes", body.len()));
            }
        }

        Ok(output.join("\n"))
    }

    fn format_verbose(&self, response: &ResponseData) -> Result<String> {
        let mut output = vec![self.status_line(response, true)];
        if let Some(url) = &response.processed_url {
            output.push(format!("URL: {}", url));
        }
        if self.show_timing {
            output.push(self.timing_line(response));
        }
        if self.show_headers && !response.headers.is_empty() {
            output.push(String::new());
            output.push(self.heading("Headers:"));
            for (key, value) in &response.headers {
                let line = format!("   {}: {}", key, value);
                if self.color {
                    output.push(line.blue().to_string());
                } else {
                    output.push(line);
                }
            }
        }

        if self.show_body && !response.body.is_empty() {
            output.push(String::new());
            output.push(self.heading("Body:"));
            let formatted_body = self
                .try_format_json(&response.body)
                .unwrap_or_else(|_| response.body.clone());
            output.push(formatted_body);
        }

        Ok(output.join("\n"))
    }

    fn format_load_test(&self, response: &ResponseData, metrics: &LoadTestMetrics) -> String {
        let mut output = vec![self.status_line(response, true)];
        output.push(format!(
            "Requests: {} total, {} ok, {} failed ({:.2}% errors)",
            metrics.total_requests,
            metrics.successful_requests,
            metrics.failed_requests,
            metrics.error_rate
        ));
        output.push(format!(
            "Throughput: {:.2} req/s over {:.2}s",
            metrics.requests_per_second, metrics.duration
        ));
        output.push(format!(
            "Latency: avg {:.1}ms  min {}ms  p50 {}ms  p95 {}ms  p99 {}ms  max {}ms",
            metrics.average_response_time,
            metrics.min_response_time,
            metrics.p50,
            metrics.p95,
            metrics.p99,
            metrics.max_response_time
        ));
        if !metrics.failure_status_counts.is_empty() {
            output.push(self.heading("Failures:"));
            for (status, count) in &metrics.failure_status_counts {
                output.push(format!("   {}: {}", status, count));
            }
        }
        if let Some(adaptive) = &metrics.adaptive {
            let mut line = format!("Adaptive: {:?}", adaptive.phase);
            if let Some(users) = adaptive.stable_users {
                line.push_str(&format!(", stable at {} users", users));
            }
            if let Some(users) = adaptive.peak_users {
                line.push_str(&format!(", peak {} users", users));
            }
            if let Some(steps) = adaptive.backoff_steps.filter(|s| *s > 0) {
                line.push_str(&format!(", {} backoff steps", steps));
            }
            output.push(line);
        }
        if let Some(reason) = &metrics.abort_reason {
            output.push(format!("Aborted: {}", reason));
        }
        output.join("\n")
    }

    /// 尝试将 body 格式化为漂亮的 JSON
    /// 如果不是有效的 JSON，返回错误
    fn try_format_json(&self, body: &str) -> Result<String> {
        let value: serde_json::Value = serde_json::from_str(body)?;
        serde_json::to_string_pretty(&value).map_err(Into::into)
    }
}
