use crate::loadtest::LoadTestMetrics;
use crate::runner::preview::ChainItem;
use crate::script::AssertionResult;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

pub const CANCELLED_STATUS_TEXT: &str = "Cancelled";
const CANCELLED_BODY: &str = "Request was cancelled before completion.";

/// 实际发出的请求快照
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestPreview {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub method: String,
    pub url: String,
    #[serde(default)]
    pub headers: IndexMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

/// 链路条目里展示用的响应快照
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponsePreview {
    pub status: u16,
    pub status_text: String,
    #[serde(default)]
    pub headers: IndexMap<String, String>,
    pub body: String,
    pub response_time: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<usize>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub assertions: Vec<AssertionResult>,
}

/// 一次执行的终态响应
///
/// 成功、失败、取消、压测汇总都落在这个结构上，`status == 0` 表示没有拿到 HTTP 响应。
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseData {
    pub status: u16,
    pub status_text: String,
    #[serde(default)]
    pub headers: IndexMap<String, String>,
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub json: Option<serde_json::Value>,
    /// 毫秒
    pub response_time: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processed_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_preview: Option<RequestPreview>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub chain_items: Vec<ChainItem>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub assertions: Vec<AssertionResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub load_test_metrics: Option<LoadTestMetrics>,
}

impl ResponseData {
    /// body 能解析成 JSON 时同时填充 `json`
    pub fn new(
        status: u16,
        status_text: impl Into<String>,
        headers: IndexMap<String, String>,
        body: impl Into<String>,
        response_time: u64,
    ) -> Self {
        let body = body.into();
        let json = parse_json_body(&body);
        Self {
            status,
            status_text: status_text.into(),
            headers,
            body,
            json,
            response_time,
            ..Self::default()
        }
    }

    /// 没有拿到 HTTP 响应的失败结果
    pub fn failure(status: u16, status_text: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            status,
            status_text: status_text.into(),
            body: body.into(),
            ..Self::default()
        }
    }

    pub fn cancelled() -> Self {
        Self::failure(0, CANCELLED_STATUS_TEXT, CANCELLED_BODY)
    }

    /// 附带请求快照，`processed_url` 跟随快照的 URL
    pub fn with_request_preview(mut self, preview: RequestPreview) -> Self {
        self.processed_url = Some(preview.url.clone());
        self.request_preview = Some(preview);
        self
    }

    pub fn is_cancelled(&self) -> bool {
        self.status == 0 && self.status_text == CANCELLED_STATUS_TEXT
    }

    pub fn is_success(&self) -> bool {
        (200..400).contains(&self.status)
    }

    pub fn preview(&self) -> ResponsePreview {
        ResponsePreview {
            status: self.status,
            status_text: self.status_text.clone(),
            headers: self.headers.clone(),
            body: self.body.clone(),
            response_time: self.response_time,
            size: self.size,
            assertions: self.assertions.clone(),
        }
    }
}

fn parse_json_body(body: &str) -> Option<serde_json::Value> {
    if body.trim().is_empty() {
        return None;
    }
    serde_json::from_str(body).ok()
}
