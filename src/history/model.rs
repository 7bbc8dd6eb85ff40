use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::http::response::ResponseData;

/// 历史记录条目
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryItem {
    /// 请求时间
    pub timestamp: DateTime<Utc>,

    pub method: String,

    /// 实际发出的 URL（变量替换后）
    pub url: String,

    pub status: u16,

    pub status_text: String,

    /// 毫秒
    pub response_time: u64,

    /// 终态响应（包含链路条目和断言）
    pub response_data: ResponseData,
}

impl HistoryItem {
    /// `url` 优先取响应里记录的 processed URL
    pub fn from_response(method: &str, fallback_url: &str, response: &ResponseData) -> Self {
        Self {
            timestamp: Utc::now(),
            method: method.to_string(),
            url: response
                .processed_url
                .clone()
                .unwrap_or_else(|| fallback_url.to_string()),
            status: response.status,
            status_text: response.status_text.clone(),
            response_time: response.response_time,
            response_data: response.clone(),
        }
    }
}
