use async_trait::async_trait;
use indexmap::IndexMap;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::http::response::RequestPreview;

/// 已完成变量替换、可直接发送的请求
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OutgoingRequest {
    pub name: Option<String>,
    pub method: String,
    pub url: String,
    pub headers: IndexMap<String, String>,
    pub body: Option<String>,
    pub timeout: Option<Duration>,
}

impl OutgoingRequest {
    pub fn preview(&self) -> RequestPreview {
        RequestPreview {
            name: self.name.clone(),
            method: self.method.clone(),
            url: self.url.clone(),
            headers: self.headers.clone(),
            body: self.body.clone(),
        }
    }
}

/// 传输层返回的原始响应
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransportResponse {
    pub status: u16,
    pub status_text: String,
    pub headers: IndexMap<String, String>,
    pub body: String,
    /// 毫秒
    pub response_time: u64,
    pub size: usize,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    /// 调用方主动取消
    #[error("请求已取消")]
    Cancelled,

    #[error("{message}")]
    Failed {
        status: Option<u16>,
        status_text: Option<String>,
        message: String,
    },
}

impl TransportError {
    pub fn failed(message: impl Into<String>) -> Self {
        TransportError::Failed {
            status: None,
            status_text: None,
            message: message.into(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, TransportError::Cancelled)
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        let status_text = if err.is_timeout() {
            "Timeout"
        } else if err.is_connect() {
            "Connection Error"
        } else {
            "Network Error"
        };
        TransportError::Failed {
            status: err.status().map(|s| s.as_u16()),
            status_text: Some(status_text.to_string()),
            message: err.to_string(),
        }
    }
}

/// 请求发送端
///
/// `request_id` 用于取消：`cancel_request` 之后，对应的 `send` 以
/// `TransportError::Cancelled` 结束。
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(
        &self,
        request: &OutgoingRequest,
        request_id: Option<&str>,
    ) -> Result<TransportResponse, TransportError>;

    fn cancel_request(&self, request_id: &str);
}

/// 按请求 ID 管理的取消令牌
#[derive(Debug, Default)]
pub struct CancelRegistry {
    tokens: Mutex<HashMap<String, CancellationToken>>,
}

impl CancelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 获取（或创建）某个请求 ID 的令牌
    pub fn register(&self, request_id: &str) -> CancellationToken {
        self.tokens
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(request_id.to_string())
            .or_default()
            .clone()
    }

    /// 触发取消，返回是否存在对应的令牌
    pub fn cancel(&self, request_id: &str) -> bool {
        let token = self
            .tokens
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(request_id)
            .cloned();
        match token {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn release(&self, request_id: &str) {
        self.tokens
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(request_id);
    }

    pub fn len(&self) -> usize {
        self.tokens
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
