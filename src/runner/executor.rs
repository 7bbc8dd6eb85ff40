use chrono::Utc;
use indexmap::IndexMap;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::history::{HistoryItem, HistoryStore};
use crate::http::response::{RequestPreview, ResponseData};
use crate::http::transport::{OutgoingRequest, Transport, TransportError};
use crate::loadtest::{LoadRunner, LoadTestExecutor, LoadTestMetrics, LoadTestResults};
use crate::parser::{LoadConfig, ParsedFile, Request};
use crate::runner::chain::build_chain;
use crate::runner::preview::{build_chain_items, ensure_request_preview};
use crate::runner::types::{
    ExecuteOptions, ExecutionKind, ExecutionOutcome, ExecutionReport, SkipReason,
};
use crate::script::{
    ConsoleSink, NoopVariableSink, ScriptContext, ScriptDeps, ScriptLogBuffer, ScriptRequest,
    ScriptRunner, ScriptStage, VariableSink,
};
use crate::variable::{
    NoSecrets, ResponseStore, SecretResolver, VariableContext, VariableResolver, hydrate_headers,
    hydrate_headers_secrets_only, hydrate_text, hydrate_text_secrets_only, merge_variables,
    normalize_env_name,
};

const NETWORK_ERROR: &str = "Network Error";
const CHAIN_ERROR: &str = "Chain Error";
const LOAD_TEST_ERROR: &str = "Load Test Error";

/// `fileId-requestIndex-timestamp`
pub fn build_request_id(file_id: &str, index: usize, now_ms: i64) -> String {
    format!("{}-{}-{}", file_id, index, now_ms)
}

/// 单步执行失败的信息
#[derive(Debug, Clone, Default)]
pub struct StepFailure {
    pub status: Option<u16>,
    pub status_text: Option<String>,
    pub message: String,
    pub response_time: u64,
    pub preview: Option<RequestPreview>,
}

enum StepError {
    Cancelled,
    Failed(StepFailure),
}

/// 一步执行可见的环境与前序响应
struct StepScope<'a> {
    env: &'a str,
    env_vars: Option<&'a BTreeMap<String, String>>,
    responses: &'a ResponseStore,
}

/// 把失败信息整理成终态响应，缺失字段用兜底值填充
pub fn build_failure_response(
    failure: StepFailure,
    fallback_status_text: &str,
    fallback_body: &str,
) -> ResponseData {
    let status_text = failure
        .status_text
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| fallback_status_text.to_string());
    let body = if failure.message.is_empty() {
        fallback_body.to_string()
    } else {
        failure.message
    };
    let mut response = ResponseData::failure(failure.status.unwrap_or(0), status_text, body);
    response.response_time = failure.response_time;
    match failure.preview {
        Some(preview) => response.with_request_preview(preview),
        None => response,
    }
}

/// 压测汇总响应：状态 200，指标以格式化 JSON 作为 body
pub fn build_load_test_summary(
    metrics: LoadTestMetrics,
    results: &LoadTestResults,
    request: &OutgoingRequest,
) -> ResponseData {
    let body = serde_json::to_string_pretty(&metrics).unwrap_or_default();
    let mut response = ResponseData::failure(200, metrics.status_text(), body)
        .with_request_preview(request.preview());
    response.response_time = (results.end_time - results.start_time).max(0) as u64;
    response.load_test_metrics = Some(metrics);
    response
}

/// 执行结束或 future 被丢弃时释放运行标记并清掉当前请求
struct RunningGuard<'a> {
    running: &'a AtomicBool,
    active: &'a Mutex<Option<(String, CancellationToken)>>,
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        *self.active.lock().unwrap_or_else(PoisonError::into_inner) = None;
        self.running.store(false, Ordering::SeqCst);
    }
}

/// 单个文件的执行编排器
///
/// 负责单请求、依赖链和压测三种执行方式。同一实例同一时间只允许一个执行，
/// 重叠的调用返回 `ExecutionOutcome::Skipped`；不同实例互不影响。
/// 每条执行路径都会得到一个 `ResponseData`（成功、结构化错误或取消），不会返回错误。
pub struct Orchestrator {
    file_id: String,
    transport: Arc<dyn Transport>,
    load_runner: Arc<dyn LoadRunner>,
    secrets: Arc<dyn SecretResolver>,
    history: Option<Arc<dyn HistoryStore>>,
    scripts: ScriptRunner,
    console: Arc<dyn ConsoleSink>,
    variable_sink: Arc<dyn VariableSink>,
    running: AtomicBool,
    active: Mutex<Option<(String, CancellationToken)>>,
}

impl Orchestrator {
    pub fn new(file_id: impl Into<String>, transport: Arc<dyn Transport>) -> Self {
        Self {
            file_id: file_id.into(),
            load_runner: Arc::new(LoadTestExecutor::new(Arc::clone(&transport))),
            transport,
            secrets: Arc::new(NoSecrets),
            history: None,
            scripts: ScriptRunner::new(),
            console: Arc::new(ScriptLogBuffer::new()),
            variable_sink: Arc::new(NoopVariableSink),
            running: AtomicBool::new(false),
            active: Mutex::new(None),
        }
    }

    pub fn with_load_runner(mut self, load_runner: Arc<dyn LoadRunner>) -> Self {
        self.load_runner = load_runner;
        self
    }

    pub fn with_secrets(mut self, secrets: Arc<dyn SecretResolver>) -> Self {
        self.secrets = secrets;
        self
    }

    pub fn with_history(mut self, history: Arc<dyn HistoryStore>) -> Self {
        self.history = Some(history);
        self
    }

    pub fn with_script_runner(mut self, scripts: ScriptRunner) -> Self {
        self.scripts = scripts;
        self
    }

    pub fn with_console(mut self, console: Arc<dyn ConsoleSink>) -> Self {
        self.console = console;
        self
    }

    pub fn with_variable_sink(mut self, sink: Arc<dyn VariableSink>) -> Self {
        self.variable_sink = sink;
        self
    }

    pub fn file_id(&self) -> &str {
        &self.file_id
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// 当前正在执行的请求 ID
    pub fn active_request_id(&self) -> Option<String> {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|(id, _)| id.clone())
    }

    /// 取消当前执行，没有执行中的请求时返回 false
    pub fn cancel(&self) -> bool {
        match self.active_request_id() {
            Some(id) => {
                self.cancel_request(&id);
                true
            }
            None => false,
        }
    }

    pub fn cancel_request(&self, request_id: &str) {
        info!(request_id, "cancelling request");
        if let Some((id, token)) = self
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            && id == request_id
        {
            token.cancel();
        }
        self.transport.cancel_request(request_id);
        self.load_runner.cancel(request_id);
    }

    /// 执行文件中下标为 `index` 的请求
    ///
    /// 有 `@load` 时跑压测，有 `depends` 时跑依赖链，否则单独发送。
    pub async fn execute(
        &self,
        file: &ParsedFile,
        index: usize,
        options: ExecuteOptions,
    ) -> ExecutionOutcome {
        if self.running.swap(true, Ordering::SeqCst) {
            debug!(index, "execution already in flight, skipping");
            return ExecutionOutcome::Skipped(SkipReason::AlreadyRunning);
        }
        let _guard = RunningGuard {
            running: &self.running,
            active: &self.active,
        };

        let Some(request) = file.requests.get(index) else {
            warn!(index, total = file.requests.len(), "no request at index");
            return ExecutionOutcome::Skipped(SkipReason::UnknownRequest);
        };

        let request_id = options.request_id.clone().unwrap_or_else(|| {
            build_request_id(&self.file_id, index, Utc::now().timestamp_millis())
        });
        let cancel = CancellationToken::new();
        *self.active.lock().unwrap_or_else(PoisonError::into_inner) =
            Some((request_id.clone(), cancel.clone()));

        let env = normalize_env_name(options.env.as_deref().unwrap_or_default());
        let env_vars = file.environments.get(&env);
        let mut variables = merge_variables(&file.variables, env_vars);
        variables.extend(options.variables.iter());

        let no_responses = ResponseStore::new();
        let scope = StepScope {
            env: &env,
            env_vars,
            responses: &no_responses,
        };
        let (kind, response, record) = if let Some(config) = &request.load_test {
            match self
                .run_load_test(request, config, &variables, &scope, &request_id)
                .await
            {
                Ok(response) => (ExecutionKind::LoadTest, response, true),
                Err(response) => (ExecutionKind::LoadTest, response, false),
            }
        } else if request.depends.is_some() {
            let response = self
                .run_chain(file, index, &mut variables, &scope, &request_id, &cancel)
                .await;
            (ExecutionKind::Chain, response, true)
        } else {
            let response = self
                .run_single(request, &mut variables, &scope, &request_id, &cancel)
                .await;
            (ExecutionKind::Single, response, true)
        };

        let history = if record {
            let method = match kind {
                ExecutionKind::LoadTest => format!("{} (Load Test)", request.method),
                _ => request.method.clone(),
            };
            self.record_history(&method, &request.url, &response, file)
                .await
        } else {
            Vec::new()
        };

        info!(
            request_id = %request_id,
            status = response.status,
            status_text = %response.status_text,
            "execution finished"
        );

        ExecutionOutcome::Completed(Box::new(ExecutionReport {
            request_id,
            kind,
            response,
            history,
            variables,
        }))
    }

    async fn run_single(
        &self,
        request: &Request,
        variables: &mut VariableContext,
        scope: &StepScope<'_>,
        request_id: &str,
        cancel: &CancellationToken,
    ) -> ResponseData {
        let chain = std::slice::from_ref(request);
        match self.run_step(request, variables, scope, request_id, cancel).await {
            Ok(mut response) => {
                response.chain_items = build_chain_items(chain, &[], &[Some(response.clone())], 0);
                response
            }
            Err(StepError::Cancelled) => ResponseData::cancelled(),
            Err(StepError::Failed(failure)) => {
                let preview = failure.preview.clone();
                let mut response =
                    build_failure_response(failure, NETWORK_ERROR, "Unknown error occurred");
                response.chain_items =
                    build_chain_items(chain, &[preview], &[Some(response.clone())], 0);
                response
            }
        }
    }

    async fn run_chain(
        &self,
        file: &ParsedFile,
        index: usize,
        variables: &mut VariableContext,
        scope: &StepScope<'_>,
        request_id: &str,
        cancel: &CancellationToken,
    ) -> ResponseData {
        let chain = match build_chain(&file.requests, index) {
            Ok(chain) => chain,
            Err(e) => {
                warn!(error = %e, "failed to build request chain");
                return ResponseData::failure(0, CHAIN_ERROR, e.to_string());
            }
        };
        info!(request_id, steps = chain.len(), "executing request chain");

        let mut previews = Vec::with_capacity(chain.len());
        for step in &chain {
            previews.push(Some(self.secrets_only_preview(step, scope.env).await));
        }

        let mut store = ResponseStore::new();
        let mut responses: Vec<Option<ResponseData>> = Vec::with_capacity(chain.len());
        let mut terminal = None;
        for (idx, step) in chain.iter().enumerate() {
            let step_scope = StepScope {
                responses: &store,
                ..*scope
            };
            match self
                .run_step(step, variables, &step_scope, request_id, cancel)
                .await
            {
                Ok(response) => {
                    store.insert(idx + 1, &response);
                    responses.push(Some(response));
                }
                Err(StepError::Cancelled) => {
                    terminal = Some(ResponseData::cancelled());
                    break;
                }
                Err(StepError::Failed(failure)) => {
                    warn!(step = idx, error = %failure.message, "chain step failed");
                    if let Some(preview) = &failure.preview {
                        previews[idx] = Some(preview.clone());
                    }
                    let response = build_failure_response(
                        failure,
                        CHAIN_ERROR,
                        "Failed to execute request chain",
                    );
                    responses.push(Some(response.clone()));
                    terminal = Some(response);
                    break;
                }
            }
        }

        let mut response = terminal
            .or_else(|| responses.last().cloned().flatten())
            .unwrap_or_else(|| {
                ResponseData::failure(0, CHAIN_ERROR, "Failed to execute request chain")
            });
        response.chain_items =
            build_chain_items(&chain, &previews, &responses, chain.len().saturating_sub(1));
        response
    }

    async fn run_load_test(
        &self,
        request: &Request,
        config: &LoadConfig,
        variables: &VariableContext,
        scope: &StepScope<'_>,
        request_id: &str,
    ) -> std::result::Result<ResponseData, ResponseData> {
        let outgoing = self
            .prepare_outgoing(request, variables, scope)
            .await
            .map_err(|e| ResponseData::failure(0, LOAD_TEST_ERROR, e.to_string()))?;

        match self
            .load_runner
            .execute_load_test(&outgoing, config, request_id)
            .await
        {
            Ok(results) => {
                let metrics = LoadTestMetrics::calculate(&results);
                Ok(build_load_test_summary(metrics, &results, &outgoing))
            }
            Err(e) => {
                warn!(error = %e, "load test failed");
                Err(ResponseData::failure(0, LOAD_TEST_ERROR, e.to_string()))
            }
        }
    }

    /// 前置脚本 -> 变量替换 -> 发送 -> 后置脚本
    async fn run_step(
        &self,
        request: &Request,
        variables: &mut VariableContext,
        scope: &StepScope<'_>,
        request_id: &str,
        cancel: &CancellationToken,
    ) -> std::result::Result<ResponseData, StepError> {
        let started = Instant::now();
        let deps = ScriptDeps::new(Arc::clone(&self.console), Arc::clone(&self.variable_sink));
        let mut assertions = Vec::new();
        let mut context =
            ScriptContext::new(Some(ScriptRequest::from(request)), variables.clone())
                .with_responses(scope.responses.clone());
        let mut effective = request.clone();

        if let Some(script) = request.pre_script.as_deref() {
            assertions.extend(
                self.scripts
                    .run(script, &mut context, ScriptStage::Pre, &deps)
                    .await,
            );
            *variables = context.variables.clone();
            if let Some(patched) = &context.request {
                patched.apply_to(&mut effective);
            }
        }
        if cancel.is_cancelled() {
            return Err(StepError::Cancelled);
        }

        let outgoing = self
            .prepare_outgoing(&effective, variables, scope)
            .await
            .map_err(|e| {
                StepError::Failed(StepFailure {
                    message: e.to_string(),
                    response_time: started.elapsed().as_millis() as u64,
                    ..StepFailure::default()
                })
            })?;
        let preview = outgoing.preview();
        debug!(method = %outgoing.method, url = %outgoing.url, "sending request");

        let sent = tokio::select! {
            _ = cancel.cancelled() => Err(TransportError::Cancelled),
            sent = self.transport.send(&outgoing, Some(request_id)) => sent,
        };
        let raw = match sent {
            Ok(raw) => raw,
            Err(TransportError::Cancelled) => return Err(StepError::Cancelled),
            Err(TransportError::Failed {
                status,
                status_text,
                message,
            }) => {
                return Err(StepError::Failed(StepFailure {
                    status,
                    status_text,
                    message,
                    response_time: started.elapsed().as_millis() as u64,
                    preview: Some(preview),
                }));
            }
        };

        let mut response = ResponseData::new(
            raw.status,
            raw.status_text,
            raw.headers,
            raw.body,
            raw.response_time,
        )
        .with_request_preview(preview);
        response.size = Some(raw.size);

        if let Some(script) = request.post_script.as_deref() {
            let mut post = ScriptContext::new(context.request.clone(), variables.clone())
                .with_responses(scope.responses.clone())
                .with_response(&response);
            assertions.extend(
                self.scripts
                    .run(script, &mut post, ScriptStage::Post, &deps)
                    .await,
            );
            *variables = post.variables;
        }

        response.assertions = assertions;
        Ok(response)
    }

    /// 响应引用 -> 密钥 -> 变量
    async fn prepare_outgoing(
        &self,
        request: &Request,
        variables: &VariableContext,
        scope: &StepScope<'_>,
    ) -> crate::Result<OutgoingRequest> {
        let secrets = self.secrets.as_ref();
        let env = scope.env;
        let references = |text: &str| scope.responses.resolve(text, variables, scope.env_vars);

        let url = hydrate_text(&references(&request.url), variables, env, secrets).await?;
        let headers: IndexMap<String, String> = request
            .headers
            .iter()
            .map(|(k, v)| (k.clone(), references(v)))
            .collect();
        let headers = hydrate_headers(&headers, variables, env, secrets).await?;
        let body = match request.body.as_deref() {
            Some(body) => Some(hydrate_text(&references(body), variables, env, secrets).await?),
            None => None,
        };

        let mut unresolved = VariableResolver::placeholders(&url);
        for value in headers.values().chain(body.iter()) {
            unresolved.extend(VariableResolver::placeholders(value));
        }
        if !unresolved.is_empty() {
            debug!(?unresolved, url = %url, "placeholders left unresolved");
        }

        Ok(OutgoingRequest {
            name: request.name.clone(),
            method: request.method.clone(),
            url,
            headers,
            body,
            timeout: request.options.timeout.map(Duration::from_secs),
        })
    }

    /// 只替换密钥的预览，失败时退回原始定义
    async fn secrets_only_preview(&self, request: &Request, env: &str) -> RequestPreview {
        let secrets = self.secrets.as_ref();
        let hydrated = async {
            let url = hydrate_text_secrets_only(&request.url, env, secrets).await?;
            let headers = hydrate_headers_secrets_only(&request.headers, env, secrets).await?;
            let body = match request.body.as_deref() {
                Some(body) => Some(hydrate_text_secrets_only(body, env, secrets).await?),
                None => None,
            };
            Ok::<_, crate::RawreqError>(RequestPreview {
                name: request.name.clone(),
                method: request.method.clone(),
                url,
                headers,
                body,
            })
        };
        match hydrated.await {
            Ok(preview) => preview,
            Err(e) => {
                debug!(error = %e, "secret hydration failed for preview");
                ensure_request_preview(request, None)
            }
        }
    }

    async fn record_history(
        &self,
        method: &str,
        fallback_url: &str,
        response: &ResponseData,
        file: &ParsedFile,
    ) -> Vec<HistoryItem> {
        let Some(store) = &self.history else {
            return Vec::new();
        };
        let item = HistoryItem::from_response(method, fallback_url, response);
        match store
            .add_to_history(&self.file_id, item, file.source_path.as_deref())
            .await
        {
            Ok(history) => history,
            Err(e) => {
                warn!(error = %e, file_id = %self.file_id, "failed to save history");
                Vec::new()
            }
        }
    }
}
