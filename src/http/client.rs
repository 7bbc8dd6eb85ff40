use async_trait::async_trait;
use indexmap::IndexMap;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::Result;
use crate::http::transport::{
    CancelRegistry, OutgoingRequest, Transport, TransportError, TransportResponse,
};
use crate::http::types::{Method, Url};

const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// 基于 reqwest 的默认传输层
pub struct ReqwestTransport {
    inner: reqwest::Client,
    registry: CancelRegistry,
}

impl ReqwestTransport {
    pub fn new() -> Result<Self> {
        Self::with_timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        let inner = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            inner,
            registry: CancelRegistry::new(),
        })
    }

    async fn dispatch(
        &self,
        request: &OutgoingRequest,
    ) -> std::result::Result<TransportResponse, TransportError> {
        let method = Method::parse(&request.method)
            .map(Method::to_reqwest)
            .map_err(|e| TransportError::failed(e.to_string()))?;
        let url = Url::parse(&request.url)
            .map_err(|e| TransportError::Failed {
                status: None,
                status_text: Some("Invalid URL".to_string()),
                message: e.to_string(),
            })?
            .to_string();

        let mut builder = self
            .inner
            .request(method, url)
            .headers(build_header_map(&request.headers));
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }
        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }

        let start = Instant::now();
        let response = builder.send().await?;
        let status = response.status();
        let headers = collect_headers(response.headers());
        let bytes = response.bytes().await?;
        let response_time = start.elapsed().as_millis() as u64;

        Ok(TransportResponse {
            status: status.as_u16(),
            status_text: status.canonical_reason().unwrap_or_default().to_string(),
            headers,
            size: bytes.len(),
            body: String::from_utf8_lossy(&bytes).into_owned(),
            response_time,
        })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(
        &self,
        request: &OutgoingRequest,
        request_id: Option<&str>,
    ) -> std::result::Result<TransportResponse, TransportError> {
        debug!(method = %request.method, url = %request.url, "sending request");
        let Some(request_id) = request_id else {
            return self.dispatch(request).await;
        };

        let token = self.registry.register(request_id);
        let outcome = tokio::select! {
            _ = token.cancelled() => Err(TransportError::Cancelled),
            result = self.dispatch(request) => result,
        };
        self.registry.release(request_id);

        if let Err(TransportError::Cancelled) = &outcome {
            debug!(request_id, "request cancelled");
        }
        outcome
    }

    fn cancel_request(&self, request_id: &str) {
        if !self.registry.cancel(request_id) {
            debug!(request_id, "no in-flight request to cancel");
        }
    }
}

fn build_header_map(headers: &IndexMap<String, String>) -> HeaderMap {
    let mut map = HeaderMap::new();
    for (key, value) in headers {
        match (
            HeaderName::from_bytes(key.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                map.insert(name, value);
            }
            _ => warn!(header = %key, "skipping invalid header"),
        }
    }
    map
}

fn collect_headers(headers: &HeaderMap) -> IndexMap<String, String> {
    let mut out: IndexMap<String, String> = IndexMap::new();
    for (name, value) in headers {
        let value = String::from_utf8_lossy(value.as_bytes()).into_owned();
        out.entry(name.as_str().to_string())
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(&value);
            })
            .or_insert(value);
    }
    out
}
