use crate::history::HistoryItem;
use crate::http::response::ResponseData;
use crate::variable::VariableContext;

/// 一次执行的输入参数
#[derive(Debug, Clone, Default)]
pub struct ExecuteOptions {
    /// 环境名，空值视为 `default`
    pub env: Option<String>,

    /// 覆盖文件变量和环境变量的额外变量（例如 CLI `--var`）
    pub variables: VariableContext,

    /// 不指定时按 `fileId-index-timestamp` 生成
    pub request_id: Option<String>,
}

impl ExecuteOptions {
    pub fn with_env(mut self, env: impl Into<String>) -> Self {
        self.env = Some(env.into());
        self
    }

    pub fn with_variables(mut self, variables: VariableContext) -> Self {
        self.variables = variables;
        self
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }
}

/// 执行方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionKind {
    Single,
    Chain,
    LoadTest,
}

/// 一次完成的执行
#[derive(Debug, Clone)]
pub struct ExecutionReport {
    pub request_id: String,

    pub kind: ExecutionKind,

    /// 终态响应：成功、结构化错误或取消
    pub response: ResponseData,

    /// 追加后该文件的完整历史；没有配置历史存储或写入失败时为空
    pub history: Vec<HistoryItem>,

    /// 脚本修改后的变量
    pub variables: VariableContext,
}

/// 未执行的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// 同一个编排器上已有执行在进行
    AlreadyRunning,

    /// 请求下标不存在
    UnknownRequest,
}

#[derive(Debug, Clone)]
pub enum ExecutionOutcome {
    Completed(Box<ExecutionReport>),
    Skipped(SkipReason),
}

impl ExecutionOutcome {
    pub fn report(&self) -> Option<&ExecutionReport> {
        match self {
            ExecutionOutcome::Completed(report) => Some(report),
            ExecutionOutcome::Skipped(_) => None,
        }
    }

    pub fn into_report(self) -> Option<ExecutionReport> {
        match self {
            ExecutionOutcome::Completed(report) => Some(*report),
            ExecutionOutcome::Skipped(_) => None,
        }
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, ExecutionOutcome::Skipped(_))
    }
}
