use std::collections::BTreeMap;
use std::path::PathBuf;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::parser::load_config::LoadConfig;

/// 请求的附加选项
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestOptions {
    /// 超时时间（秒，来自 @timeout）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
}

/// 单个解析后的 HTTP 请求
///
/// 只有在方法和 URL 都已知时才会生成。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Request {
    /// 请求名称（@name 或 `### name: X ###`）
    pub name: Option<String>,

    /// HTTP 方法（大写）
    pub method: String,

    /// 请求 URL（未替换变量）
    pub url: String,

    /// Headers，键唯一
    pub headers: IndexMap<String, String>,

    /// 请求体（已 trim，为空时为 None）
    pub body: Option<String>,

    /// 前置脚本（`<` 块）
    pub pre_script: Option<String>,

    /// 后置脚本（`>` 块）
    pub post_script: Option<String>,

    /// 依赖的请求名称
    pub depends: Option<String>,

    /// 压测配置（@load）
    pub load_test: Option<LoadConfig>,

    /// 所属分组
    pub group: Option<String>,

    pub options: RequestOptions,

    /// 方法行所在的行号（从 1 开始）
    pub line_number: usize,
}

impl Request {
    /// 以方法行创建一个新请求
    pub fn new(method: impl Into<String>, url: impl Into<String>, line_number: usize) -> Self {
        Self {
            name: None,
            method: method.into().to_ascii_uppercase(),
            url: url.into(),
            headers: IndexMap::new(),
            body: None,
            pre_script: None,
            post_script: None,
            depends: None,
            load_test: None,
            group: None,
            options: RequestOptions::default(),
            line_number,
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// 展示用标签：名称，或 `METHOD url`
    pub fn label(&self) -> String {
        match self.name() {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => format!("{} {}", self.method, self.url),
        }
    }

    /// 把待定元数据合并进请求（请求行出现时调用）
    pub(crate) fn absorb(&mut self, pending: PendingMetadata) {
        if pending.name.is_some() {
            self.name = pending.name;
        }
        if pending.depends.is_some() {
            self.depends = pending.depends;
        }
        if pending.load_test.is_some() {
            self.load_test = pending.load_test;
        }
        if pending.group.is_some() {
            self.group = pending.group;
        }
        if pending.timeout.is_some() {
            self.options.timeout = pending.timeout;
        }
    }
}

/// 在请求行出现之前累积的元数据
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PendingMetadata {
    pub name: Option<String>,
    pub depends: Option<String>,
    pub load_test: Option<LoadConfig>,
    pub timeout: Option<u64>,
    pub group: Option<String>,
}

impl PendingMetadata {
    pub fn is_empty(&self) -> bool {
        self == &PendingMetadata::default()
    }
}

/// 整个文件的解析结果
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedFile {
    /// 解析出的所有请求，按出现顺序
    pub requests: Vec<Request>,

    /// 环境名 -> (变量名 -> 值)
    pub environments: BTreeMap<String, BTreeMap<String, String>>,

    /// 文件级变量
    pub variables: BTreeMap<String, String>,

    /// 出现过的分组（去重，保持首次出现顺序）
    pub groups: Vec<String>,

    /// 文件显示名（@tab 或 `### tab: X ###`）
    pub file_display_name: Option<String>,

    /// 源文件路径
    #[serde(skip)]
    pub source_path: Option<PathBuf>,
}

impl ParsedFile {
    pub fn new() -> Self {
        Self::default()
    }

    /// 设置源文件路径
    pub fn with_source_path(mut self, path: PathBuf) -> Self {
        self.source_path = Some(path);
        self
    }

    /// 按名称精确查找请求下标
    pub fn find_by_name(&self, name: &str) -> Option<usize> {
        self.requests
            .iter()
            .position(|r| r.name.as_deref() == Some(name))
    }

    /// 注册分组（已存在时忽略）
    pub(crate) fn add_group(&mut self, group: &str) {
        if !self.groups.iter().any(|g| g == group) {
            self.groups.push(group.to_string());
        }
    }
}

/// 解析错误类型
///
/// DSL 本身是容错的，只有读取文件会失败。
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    /// IO 错误
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// 解析结果类型别名
pub type ParseResult<T> = Result<T, ParseError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_new_uppercases_method() {
        let req = Request::new("post", "http://example.com", 3);
        assert_eq!(req.method, "POST");
        assert_eq!(req.line_number, 3);
        assert!(req.headers.is_empty());
        assert_eq!(req.body, None);
    }

    #[test]
    fn test_label() {
        let mut req = Request::new("GET", "/users", 1);
        assert_eq!(req.label(), "GET /users");
        req.name = Some("List".to_string());
        assert_eq!(req.label(), "List");
    }

    #[test]
    fn test_absorb_pending() {
        let mut req = Request::new("GET", "/a", 1);
        req.group = Some("old".to_string());
        let pending = PendingMetadata {
            name: Some("A".to_string()),
            timeout: Some(5),
            ..Default::default()
        };
        req.absorb(pending);
        assert_eq!(req.name(), Some("A"));
        assert_eq!(req.options.timeout, Some(5));
        assert_eq!(req.group.as_deref(), Some("old"));
    }

    #[test]
    fn test_groups_deduplicated() {
        let mut file = ParsedFile::new();
        file.add_group("auth");
        file.add_group("users");
        file.add_group("auth");
        assert_eq!(file.groups, vec!["auth", "users"]);
    }

    #[test]
    fn test_find_by_name() {
        let mut file = ParsedFile::new();
        let mut a = Request::new("GET", "/a", 1);
        a.name = Some("A".to_string());
        file.requests.push(a);
        file.requests.push(Request::new("GET", "/b", 3));
        assert_eq!(file.find_by_name("A"), Some(0));
        assert_eq!(file.find_by_name("a"), None);
    }

    #[test]
    fn test_pending_is_empty() {
        assert!(PendingMetadata::default().is_empty());
        let pending = PendingMetadata {
            depends: Some("x".to_string()),
            ..Default::default()
        };
        assert!(!pending.is_empty());
    }
}
