use crate::Result;
use crate::http::response::ResponseData;
use crate::parser::Request;
use crate::variable::{ResponseStore, VariableContext};
use async_trait::async_trait;
use chrono::{DateTime, Local};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Mutex, PoisonError};

/// 脚本执行阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScriptStage {
    Pre,
    Post,
    Custom,
}

impl ScriptStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScriptStage::Pre => "pre",
            ScriptStage::Post => "post",
            ScriptStage::Custom => "custom",
        }
    }
}

impl fmt::Display for ScriptStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 单条断言结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssertionResult {
    pub passed: bool,
    pub message: String,
    pub stage: ScriptStage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsoleLevel {
    Info,
    Warn,
    Error,
    Debug,
}

impl fmt::Display for ConsoleLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConsoleLevel::Info => "info",
            ConsoleLevel::Warn => "warn",
            ConsoleLevel::Error => "error",
            ConsoleLevel::Debug => "debug",
        };
        f.write_str(s)
    }
}

/// 一条脚本控制台输出
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConsoleEntry {
    pub level: ConsoleLevel,
    pub source: String,
    pub message: String,
    pub timestamp: DateTime<Local>,
}

/// 脚本控制台输出的接收端
pub trait ConsoleSink: Send + Sync {
    fn record(&self, level: ConsoleLevel, source: &str, message: &str);
}

/// 内存中的控制台缓冲区，同时以 debug 级别写入 tracing
#[derive(Debug, Default)]
pub struct ScriptLogBuffer {
    entries: Mutex<Vec<ConsoleEntry>>,
}

impl ScriptLogBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<ConsoleEntry> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// 取出并清空所有记录
    pub fn drain(&self) -> Vec<ConsoleEntry> {
        std::mem::take(&mut *self.entries.lock().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ConsoleSink for ScriptLogBuffer {
    fn record(&self, level: ConsoleLevel, source: &str, message: &str) {
        tracing::debug!(%level, source, text = message, "script console");
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(ConsoleEntry {
                level,
                source: source.to_string(),
                message: message.to_string(),
                timestamp: Local::now(),
            });
    }
}

/// 脚本 `setVar` 的异步持久化端
#[async_trait]
pub trait VariableSink: Send + Sync {
    async fn set_variable(&self, key: &str, value: &str) -> Result<()>;
}

/// 丢弃所有变量同步
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopVariableSink;

#[async_trait]
impl VariableSink for NoopVariableSink {
    async fn set_variable(&self, _key: &str, _value: &str) -> Result<()> {
        Ok(())
    }
}

/// 跨多次执行共享的变量存储（例如同一个文件会话）
#[derive(Debug, Default)]
pub struct SharedVariables {
    inner: Mutex<VariableContext>,
}

impl SharedVariables {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> VariableContext {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl VariableSink for SharedVariables {
    async fn set_variable(&self, key: &str, value: &str) -> Result<()> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, value);
        Ok(())
    }
}

/// 脚本可见、可修改的请求视图
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScriptRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub method: String,
    pub url: String,
    pub headers: IndexMap<String, String>,
    pub body: Option<String>,
}

impl From<&Request> for ScriptRequest {
    fn from(request: &Request) -> Self {
        Self {
            name: request.name.clone(),
            method: request.method.clone(),
            url: request.url.clone(),
            headers: request.headers.clone(),
            body: request.body.clone(),
        }
    }
}

impl ScriptRequest {
    /// 把脚本的修改写回请求定义
    pub fn apply_to(&self, request: &mut Request) {
        request.name = self.name.clone();
        if !self.method.is_empty() {
            request.method = self.method.to_ascii_uppercase();
        }
        if !self.url.is_empty() {
            request.url = self.url.clone();
        }
        request.headers = self.headers.clone();
        request.body = self.body.clone();
    }
}

/// 脚本可见的响应视图
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptResponse {
    pub status: u16,
    pub status_text: String,
    pub headers: IndexMap<String, String>,
    pub body: String,
    pub json: Option<serde_json::Value>,
    pub response_time: u64,
}

impl From<&ResponseData> for ScriptResponse {
    fn from(response: &ResponseData) -> Self {
        Self {
            status: response.status,
            status_text: response.status_text.clone(),
            headers: response.headers.clone(),
            body: response.body.clone(),
            json: response.json.clone(),
            response_time: response.response_time,
        }
    }
}

/// `updateRequest` 的顶层补丁，`headers` 按键合并
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestPatch {
    pub name: Option<String>,
    pub method: Option<String>,
    pub url: Option<String>,
    pub body: Option<String>,
    pub headers: IndexMap<String, String>,
}

/// 一次脚本调用的执行上下文
///
/// 脚本只能通过 `set_variable`、`set_header`、`patch_request` 修改它。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScriptContext {
    pub request: Option<ScriptRequest>,
    pub response: Option<ScriptResponse>,
    pub variables: VariableContext,
    /// 依赖链中已完成步骤的响应，脚本里是 `context.responseStore`
    pub responses: ResponseStore,
}

impl ScriptContext {
    pub fn new(request: Option<ScriptRequest>, variables: VariableContext) -> Self {
        Self {
            request,
            response: None,
            variables,
            responses: ResponseStore::new(),
        }
    }

    pub fn with_responses(mut self, responses: ResponseStore) -> Self {
        self.responses = responses;
        self
    }

    pub fn with_response(mut self, response: &ResponseData) -> Self {
        self.response = Some(ScriptResponse::from(response));
        self
    }

    /// 空 key 忽略
    pub fn set_variable(&mut self, key: &str, value: &str) {
        if key.is_empty() {
            return;
        }
        self.variables.insert(key, value);
    }

    /// 缺失时返回空串
    pub fn get_variable(&self, key: &str) -> String {
        self.variables.get(key).unwrap_or_default().to_string()
    }

    pub fn set_header(&mut self, name: &str, value: &str) {
        if name.is_empty() {
            return;
        }
        self.ensure_request()
            .headers
            .insert(name.to_string(), value.to_string());
    }

    pub fn patch_request(&mut self, patch: RequestPatch) {
        let request = self.ensure_request();
        if let Some(name) = patch.name {
            request.name = Some(name);
        }
        if let Some(method) = patch.method {
            request.method = method;
        }
        if let Some(url) = patch.url {
            request.url = url;
        }
        if let Some(body) = patch.body {
            request.body = Some(body);
        }
        request.headers.extend(patch.headers);
    }

    fn ensure_request(&mut self) -> &mut ScriptRequest {
        self.request.get_or_insert_with(ScriptRequest::default)
    }
}
