use crate::script::clean::{TRUTHY_FN, clean_script};
use crate::script::types::{
    AssertionResult, ConsoleLevel, ConsoleSink, RequestPatch, ScriptContext, ScriptRequest,
    ScriptStage, VariableSink,
};
use rhai::module_resolvers::DummyModuleResolver;
use rhai::packages::{Package, StandardPackage};
use rhai::{Array, Dynamic, Engine, EvalAltResult, INT, ImmutableString, Map, Position, Scope};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// `delay()` 单次最长等待
const MAX_DELAY_MS: f64 = 600_000.0;

const CONSOLE_METHODS: [(&str, ConsoleLevel); 5] = [
    ("log", ConsoleLevel::Info),
    ("info", ConsoleLevel::Info),
    ("warn", ConsoleLevel::Warn),
    ("error", ConsoleLevel::Error),
    ("debug", ConsoleLevel::Debug),
];

/// JS 风格的全局对象：`JSON`、`Math`、`Date`、`Array`
#[derive(Debug, Clone, Copy)]
struct JsJson;

#[derive(Debug, Clone, Copy)]
struct JsMath;

#[derive(Debug, Clone, Copy)]
struct JsDate;

#[derive(Debug, Clone, Copy)]
struct JsArray;

/// 脚本运行的外部依赖
#[derive(Clone)]
pub struct ScriptDeps {
    /// 脚本清理函数
    pub clean: fn(&str) -> String,
    /// 控制台输出接收端
    pub console: Arc<dyn ConsoleSink>,
    /// `setVar` 的异步持久化端
    pub variables: Arc<dyn VariableSink>,
}

impl ScriptDeps {
    pub fn new(console: Arc<dyn ConsoleSink>, variables: Arc<dyn VariableSink>) -> Self {
        Self {
            clean: clean_script,
            console,
            variables,
        }
    }
}

/// 沙箱资源限制
#[derive(Debug, Clone)]
pub struct SandboxLimits {
    pub max_operations: u64,
    pub max_call_levels: usize,
    pub max_string_size: usize,
    pub max_collection_size: usize,
}

impl Default for SandboxLimits {
    fn default() -> Self {
        Self {
            max_operations: 1_000_000,
            max_call_levels: 64,
            max_string_size: 4 * 1024 * 1024,
            max_collection_size: 100_000,
        }
    }
}

/// 前置/后置脚本执行器
///
/// 脚本运行在嵌入式 rhai 引擎里，只能看到显式注入的 API：
/// `request`、`response`、`context`（只读，含 `context.responseStore`），`console.*`、
/// `setVar`、`getVar`、`setHeader`、`updateRequest`、`assert`、`delay`，
/// 以及 `JSON`/`Math`/`Date`/`Array` 里的常用函数。没有文件、网络或模块加载能力。
#[derive(Debug, Clone, Default)]
pub struct ScriptRunner {
    limits: SandboxLimits,
}

impl ScriptRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_operations(max_operations: u64) -> Self {
        Self {
            limits: SandboxLimits {
                max_operations,
                ..SandboxLimits::default()
            },
        }
    }

    /// 执行脚本并返回断言结果
    ///
    /// 脚本错误不会向上传播：运行时错误记录为 `runtime error: <message>`，
    /// 断言失败只体现在返回的结果里。
    pub async fn run(
        &self,
        script: &str,
        context: &mut ScriptContext,
        stage: ScriptStage,
        deps: &ScriptDeps,
    ) -> Vec<AssertionResult> {
        if script.trim().is_empty() {
            return Vec::new();
        }
        let source = (deps.clean)(script).trim().to_string();
        if source.is_empty() {
            return Vec::new();
        }

        let label = build_script_source(stage, context.request.as_ref());
        let state = Arc::new(Mutex::new(SandboxState {
            context: std::mem::take(context),
            assertions: Vec::new(),
            pending_syncs: Vec::new(),
        }));

        let sandbox = Sandbox {
            state: Arc::clone(&state),
            stage,
            label: label.clone(),
            console: Arc::clone(&deps.console),
            variables: Arc::clone(&deps.variables),
            handle: Handle::current(),
            limits: self.limits.clone(),
        };
        let outcome = tokio::task::spawn_blocking(move || sandbox.execute(&source)).await;

        let (assertions, pending) = {
            let mut guard = lock(&state);
            *context = std::mem::take(&mut guard.context);
            (
                std::mem::take(&mut guard.assertions),
                std::mem::take(&mut guard.pending_syncs),
            )
        };

        for task in pending {
            if let Err(e) = task.await {
                warn!(error = %e, "variable sync task failed");
            }
        }

        let failure = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(err)) => runtime_error_message(&err),
            Err(join_error) => Some(join_error.to_string()),
        };
        match failure {
            Some(message) => {
                debug!(source = %label, error = %message, "script runtime error");
                deps.console.record(
                    ConsoleLevel::Error,
                    &label,
                    &format!("runtime error: {}", message),
                );
            }
            None if assertions.iter().any(|a| !a.passed) => {
                debug!(source = %label, "script stopped by failed assertion");
            }
            None => {}
        }

        assertions
    }
}

/// 构建控制台来源标签：`stage:name` / `stage:METHOD url` / `stage:METHOD` / `stage`
pub fn build_script_source(stage: ScriptStage, request: Option<&ScriptRequest>) -> String {
    let prefix = stage.as_str();
    let Some(request) = request else {
        return prefix.to_string();
    };
    if let Some(name) = request.name.as_deref().filter(|n| !n.is_empty()) {
        return format!("{}:{}", prefix, name);
    }
    match (request.method.is_empty(), request.url.is_empty()) {
        (false, false) => format!("{}:{} {}", prefix, request.method, request.url),
        (false, true) => format!("{}:{}", prefix, request.method),
        _ => prefix.to_string(),
    }
}

/// 把控制台参数拼成一条消息：空值丢弃，map/array 输出 JSON，以空格连接
pub fn build_console_message(args: &[Dynamic]) -> String {
    args.iter()
        .map(stringify)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
        .trim()
        .to_string()
}

struct SandboxState {
    context: ScriptContext,
    assertions: Vec<AssertionResult>,
    pending_syncs: Vec<JoinHandle<()>>,
}

fn lock(state: &Mutex<SandboxState>) -> MutexGuard<'_, SandboxState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// 断言失败时抛出的标记值
#[derive(Debug, Clone)]
struct AssertionFailure;

/// 脚本中的 `console` 对象
#[derive(Clone)]
struct ScriptConsole {
    sink: Arc<dyn ConsoleSink>,
    source: Arc<str>,
}

impl ScriptConsole {
    fn emit(&self, level: ConsoleLevel, args: &[Dynamic]) {
        let message = build_console_message(args);
        if !message.is_empty() {
            self.sink.record(level, &self.source, &message);
        }
    }
}

/// 一次脚本执行的引擎与状态
struct Sandbox {
    state: Arc<Mutex<SandboxState>>,
    stage: ScriptStage,
    label: String,
    console: Arc<dyn ConsoleSink>,
    variables: Arc<dyn VariableSink>,
    handle: Handle,
    limits: SandboxLimits,
}

impl Sandbox {
    fn execute(self, script: &str) -> Result<(), Box<EvalAltResult>> {
        let engine = self.build_engine();
        let mut scope = self.build_scope()?;
        engine.run_with_scope(&mut scope, script)
    }

    fn build_scope(&self) -> Result<Scope<'static>, Box<EvalAltResult>> {
        let (request, response, variables, responses) = {
            let guard = lock(&self.state);
            (
                guard.context.request.clone(),
                guard.context.response.clone(),
                guard.context.variables.to_map(),
                guard.context.responses.clone(),
            )
        };

        let request = match request {
            Some(r) => rhai::serde::to_dynamic(r)?,
            None => Dynamic::from_map(Map::new()),
        };
        let response = match response {
            Some(r) => rhai::serde::to_dynamic(r)?,
            None => Dynamic::from_map(Map::new()),
        };

        let mut context = Map::new();
        context.insert("request".into(), request.clone());
        context.insert("response".into(), response.clone());
        context.insert("variables".into(), rhai::serde::to_dynamic(variables)?);

        let mut store = Map::new();
        for (key, stored) in responses.iter() {
            store.insert(key.as_str().into(), rhai::serde::to_dynamic(stored)?);
        }
        context.insert("responseStore".into(), Dynamic::from_map(store));

        let mut scope = Scope::new();
        scope.push_constant_dynamic("request", request);
        scope.push_constant_dynamic("response", response);
        scope.push_constant_dynamic("context", Dynamic::from_map(context));
        scope.push(
            "console",
            ScriptConsole {
                sink: Arc::clone(&self.console),
                source: Arc::from(self.label.as_str()),
            },
        );
        scope.push_constant("JSON", JsJson);
        scope.push_constant("Math", JsMath);
        scope.push_constant("Date", JsDate);
        scope.push_constant("Array", JsArray);
        Ok(scope)
    }

    fn build_engine(&self) -> Engine {
        // new_raw 不带 print/debug 默认输出，也不带任何模块
        let mut engine = Engine::new_raw();
        engine.register_global_module(StandardPackage::new().as_shared_module());
        engine.set_module_resolver(DummyModuleResolver::new());
        engine.set_max_modules(0);
        engine.disable_symbol("eval");

        engine.set_max_operations(self.limits.max_operations);
        engine.set_max_call_levels(self.limits.max_call_levels);
        engine.set_max_expr_depths(128, 64);
        engine.set_max_string_size(self.limits.max_string_size);
        engine.set_max_array_size(self.limits.max_collection_size);
        engine.set_max_map_size(self.limits.max_collection_size);

        let console = Arc::clone(&self.console);
        let label = self.label.clone();
        engine.on_print(move |text| {
            if !text.is_empty() {
                console.record(ConsoleLevel::Info, &label, text);
            }
        });

        self.register_console(&mut engine);
        self.register_variables(&mut engine);
        self.register_request(&mut engine);
        self.register_assert(&mut engine);
        register_js_helpers(&mut engine);

        engine.register_fn("delay", |ms: Dynamic| {
            if let Some(ms) = as_number(&ms).filter(|n| n.is_finite() && *n > 0.0) {
                std::thread::sleep(Duration::from_secs_f64(ms.min(MAX_DELAY_MS) / 1000.0));
            }
        });

        engine
    }

    fn register_console(&self, engine: &mut Engine) {
        engine.register_type_with_name::<ScriptConsole>("Console");
        for (name, level) in CONSOLE_METHODS {
            engine
                .register_fn(name, move |c: &mut ScriptConsole| c.emit(level, &[]))
                .register_fn(name, move |c: &mut ScriptConsole, a: Dynamic| {
                    c.emit(level, &[a])
                })
                .register_fn(name, move |c: &mut ScriptConsole, a: Dynamic, b: Dynamic| {
                    c.emit(level, &[a, b])
                })
                .register_fn(
                    name,
                    move |c: &mut ScriptConsole, a: Dynamic, b: Dynamic, d: Dynamic| {
                        c.emit(level, &[a, b, d])
                    },
                )
                .register_fn(
                    name,
                    move |c: &mut ScriptConsole, a: Dynamic, b: Dynamic, d: Dynamic, e: Dynamic| {
                        c.emit(level, &[a, b, d, e])
                    },
                )
                .register_fn(
                    name,
                    move |c: &mut ScriptConsole,
                          a: Dynamic,
                          b: Dynamic,
                          d: Dynamic,
                          e: Dynamic,
                          f: Dynamic| { c.emit(level, &[a, b, d, e, f]) },
                )
                .register_fn(
                    name,
                    move |c: &mut ScriptConsole,
                          a: Dynamic,
                          b: Dynamic,
                          d: Dynamic,
                          e: Dynamic,
                          f: Dynamic,
                          g: Dynamic| { c.emit(level, &[a, b, d, e, f, g]) },
                );
        }
    }

    fn register_variables(&self, engine: &mut Engine) {
        let state = Arc::clone(&self.state);
        let sink = Arc::clone(&self.variables);
        let handle = self.handle.clone();
        engine.register_fn("setVar", move |key: Dynamic, value: Dynamic| {
            let key = stringify(&key);
            if key.is_empty() {
                return;
            }
            let value = stringify(&value);

            let mut guard = lock(&state);
            guard.context.set_variable(&key, &value);

            let sink = Arc::clone(&sink);
            let task = handle.spawn(async move {
                if let Err(e) = sink.set_variable(&key, &value).await {
                    warn!(key = %key, error = %e, "failed to sync script variable");
                }
            });
            guard.pending_syncs.push(task);
        });

        let state = Arc::clone(&self.state);
        engine.register_fn("getVar", move |key: Dynamic| -> String {
            lock(&state).context.get_variable(&stringify(&key))
        });
    }

    fn register_request(&self, engine: &mut Engine) {
        let state = Arc::clone(&self.state);
        engine.register_fn("setHeader", move |name: Dynamic, value: Dynamic| {
            lock(&state)
                .context
                .set_header(&stringify(&name), &stringify(&value));
        });

        let state = Arc::clone(&self.state);
        engine.register_fn("updateRequest", move |patch: Dynamic| {
            if let Some(map) = patch.try_cast::<Map>() {
                lock(&state).context.patch_request(patch_from_map(map));
            }
        });
    }

    fn register_assert(&self, engine: &mut Engine) {
        let stage = self.stage;

        let state = Arc::clone(&self.state);
        engine.register_fn("assert", move |condition: Dynamic| {
            record_assertion(&state, stage, &condition, None)
        });

        let state = Arc::clone(&self.state);
        engine.register_fn("assert", move |condition: Dynamic, message: Dynamic| {
            record_assertion(&state, stage, &condition, Some(&message))
        });
    }
}

/// JS 真值判断、`!` 运算符和常用全局函数
fn register_js_helpers(engine: &mut Engine) {
    engine.register_fn(TRUTHY_FN, |value: Dynamic| is_truthy(&value));

    engine
        .register_fn("!", |s: ImmutableString| s.is_empty())
        .register_fn("!", |_: ()| true)
        .register_fn("!", |n: INT| n == 0)
        .register_fn("!", |f: f64| f == 0.0 || f.is_nan())
        .register_fn("!", |_: Map| false)
        .register_fn("!", |_: Array| false);

    engine
        .register_fn("toString", |value: Dynamic| stringify(&value))
        .register_get("length", |a: &mut Array| a.len() as INT)
        .register_get("length", |s: &mut ImmutableString| s.chars().count() as INT);

    engine.register_type_with_name::<JsJson>("JSON");
    engine
        .register_fn("stringify", |_: JsJson, value: Dynamic| {
            rhai::serde::from_dynamic::<serde_json::Value>(&value)
                .map(|json| json.to_string())
                .unwrap_or_else(|_| stringify(&value))
        })
        .register_fn(
            "parse",
            |_: JsJson, text: ImmutableString| -> Result<Dynamic, Box<EvalAltResult>> {
                let value: serde_json::Value = serde_json::from_str(&text)
                    .map_err(|e| format!("JSON.parse: {}", e))?;
                rhai::serde::to_dynamic(value)
            },
        );

    engine.register_type_with_name::<JsMath>("Math");
    engine
        .register_fn("floor", |_: JsMath, x: Dynamic| to_int(number(&x).floor()))
        .register_fn("ceil", |_: JsMath, x: Dynamic| to_int(number(&x).ceil()))
        .register_fn("round", |_: JsMath, x: Dynamic| {
            to_int((number(&x) + 0.5).floor())
        })
        .register_fn("abs", |_: JsMath, x: Dynamic| match x.as_int() {
            Ok(n) => Dynamic::from_int(n.saturating_abs()),
            Err(_) => Dynamic::from_float(number(&x).abs()),
        })
        .register_fn("min", |_: JsMath, a: Dynamic, b: Dynamic| {
            pick(a, b, |x, y| x <= y)
        })
        .register_fn("max", |_: JsMath, a: Dynamic, b: Dynamic| {
            pick(a, b, |x, y| x >= y)
        })
        .register_fn("random", |_: JsMath| rand::random::<f64>());

    engine.register_type_with_name::<JsDate>("Date");
    engine.register_fn("now", |_: JsDate| {
        chrono::Utc::now().timestamp_millis() as INT
    });

    engine.register_type_with_name::<JsArray>("Array");
    engine.register_fn("isArray", |_: JsArray, value: Dynamic| value.is_array());
}

fn number(value: &Dynamic) -> f64 {
    as_number(value).unwrap_or(f64::NAN)
}

/// NaN 转为 0
fn to_int(x: f64) -> INT {
    if x.is_nan() { 0 } else { x as INT }
}

fn pick(a: Dynamic, b: Dynamic, keep_first: fn(f64, f64) -> bool) -> Dynamic {
    if keep_first(number(&a), number(&b)) { a } else { b }
}

fn record_assertion(
    state: &Mutex<SandboxState>,
    stage: ScriptStage,
    condition: &Dynamic,
    message: Option<&Dynamic>,
) -> Result<(), Box<EvalAltResult>> {
    let passed = is_truthy(condition);
    let message = message
        .map(stringify)
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| {
            if passed {
                "Assertion passed".to_string()
            } else {
                "Assertion failed".to_string()
            }
        });

    lock(state).assertions.push(AssertionResult {
        passed,
        message,
        stage,
    });

    if passed {
        Ok(())
    } else {
        Err(Box::new(EvalAltResult::ErrorRuntime(
            Dynamic::from(AssertionFailure),
            Position::NONE,
        )))
    }
}

fn patch_from_map(map: Map) -> RequestPatch {
    let mut patch = RequestPatch::default();
    for (key, value) in map {
        match key.as_str() {
            "headers" => {
                if let Some(headers) = value.try_cast::<Map>() {
                    for (name, v) in headers {
                        patch.headers.insert(name.to_string(), stringify(&v));
                    }
                }
            }
            "name" => patch.name = Some(stringify(&value)),
            "method" => patch.method = Some(stringify(&value)),
            "url" => patch.url = Some(stringify(&value)),
            "body" => patch.body = Some(stringify(&value)),
            _ => {}
        }
    }
    patch
}

/// 断言失败返回 None，其余错误返回可读消息
fn runtime_error_message(err: &EvalAltResult) -> Option<String> {
    match err {
        EvalAltResult::ErrorInFunctionCall(_, _, inner, _) => runtime_error_message(inner),
        EvalAltResult::ErrorRuntime(value, _) if value.is::<AssertionFailure>() => None,
        EvalAltResult::ErrorRuntime(value, _) => Some(stringify(value)),
        other => Some(other.to_string()),
    }
}

fn stringify(value: &Dynamic) -> String {
    if value.is_unit() {
        return String::new();
    }
    if value.is_string() {
        return value.clone().into_string().unwrap_or_default();
    }
    if value.is_map() || value.is_array() {
        if let Ok(json) = rhai::serde::from_dynamic::<serde_json::Value>(value) {
            return json.to_string();
        }
    }
    value.to_string()
}

fn is_truthy(value: &Dynamic) -> bool {
    if value.is_unit() {
        return false;
    }
    if let Ok(b) = value.as_bool() {
        return b;
    }
    if let Ok(n) = value.as_int() {
        return n != 0;
    }
    if let Ok(f) = value.as_float() {
        return f != 0.0 && !f.is_nan();
    }
    if value.is_string() {
        return !stringify(value).is_empty();
    }
    true
}

fn as_number(value: &Dynamic) -> Option<f64> {
    if let Ok(n) = value.as_int() {
        return Some(n as f64);
    }
    if let Ok(f) = value.as_float() {
        return Some(f);
    }
    if value.is_string() {
        return stringify(value).trim().parse().ok();
    }
    None
}
