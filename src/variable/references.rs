//! 依赖链中的响应引用：`{{requestN.response.body.a.b}}`、`{{requestN.response.status}}`、
//! `{{requestN.response.headers.X}}`，以及带命名空间的 `{{variables.k}}` / `{{env.k}}`。

use indexmap::IndexMap;
use regex::{Captures, Regex};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::OnceLock;

use crate::http::response::ResponseData;
use crate::variable::types::VariableContext;

/// 保存下来的一步响应
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredResponse {
    pub status: u16,
    pub status_text: String,
    pub headers: IndexMap<String, String>,
    pub body: String,
}

impl From<&ResponseData> for StoredResponse {
    fn from(response: &ResponseData) -> Self {
        Self {
            status: response.status,
            status_text: response.status_text.clone(),
            headers: response.headers.clone(),
            body: response.body.clone(),
        }
    }
}

impl StoredResponse {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(name)
            .or_else(|| {
                self.headers
                    .iter()
                    .find(|(k, _)| k.eq_ignore_ascii_case(name))
                    .map(|(_, v)| v)
            })
            .map(String::as_str)
    }
}

/// 一次执行内已完成步骤的响应，键为 `request1`、`request2`……
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResponseStore {
    entries: IndexMap<String, StoredResponse>,
}

impl ResponseStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 第 `step` 步（从 1 开始）的键
    pub fn key(step: usize) -> String {
        format!("request{}", step)
    }

    pub fn insert(&mut self, step: usize, response: &ResponseData) {
        self.entries
            .insert(Self::key(step), StoredResponse::from(response));
    }

    pub fn get(&self, key: &str) -> Option<&StoredResponse> {
        self.entries.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &StoredResponse)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 替换文本中的响应引用与带命名空间的变量
    ///
    /// 只处理含 `.` 的占位符，普通 `{{name}}` 留给后续的变量替换。解析不了的引用保持原样。
    pub fn resolve(
        &self,
        text: &str,
        variables: &VariableContext,
        env_vars: Option<&BTreeMap<String, String>>,
    ) -> String {
        static REF_REGEX: OnceLock<Regex> = OnceLock::new();
        if !text.contains("{{") {
            return text.to_string();
        }
        let re = REF_REGEX.get_or_init(|| Regex::new(r"\{\{([^}]+)\}\}").unwrap());

        re.replace_all(text, |caps: &Captures| {
            let expr = caps[1].trim();
            self.resolve_expr(expr, variables, env_vars)
                .unwrap_or_else(|| caps[0].to_string())
        })
        .to_string()
    }

    fn resolve_expr(
        &self,
        expr: &str,
        variables: &VariableContext,
        env_vars: Option<&BTreeMap<String, String>>,
    ) -> Option<String> {
        let parts: Vec<&str> = expr.split('.').collect();
        if parts.len() < 2 {
            return None;
        }

        if parts[0].starts_with("request") {
            let stored = self.entries.get(parts[0])?;
            if parts.len() < 3 || parts[1] != "response" {
                return None;
            }
            return match parts[2] {
                "body" if stored.body.is_empty() => None,
                "body" if parts.len() == 3 => Some(stored.body.clone()),
                "body" => match serde_json::from_str::<Value>(&stored.body).ok()? {
                    Value::Object(map) => Some(json_path(&map, &parts[3..])),
                    _ => None,
                },
                "status" => Some(stored.status.to_string()),
                "headers" if parts.len() >= 4 => stored.header(parts[3]).map(str::to_string),
                _ => None,
            };
        }

        let key = parts[1..].join(".");
        match parts[0] {
            "variables" => variables.get(&key).map(str::to_string),
            "env" => env_vars?.get(&key).cloned(),
            _ => None,
        }
    }
}

/// 只沿对象逐级取值，不支持数组下标；取不到时为空串
fn json_path(root: &serde_json::Map<String, Value>, path: &[&str]) -> String {
    let mut current = root;
    for (i, part) in path.iter().enumerate() {
        let Some(value) = current.get(*part) else {
            return String::new();
        };
        if i == path.len() - 1 {
            return match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
        }
        match value {
            Value::Object(next) => current = next,
            _ => return String::new(),
        }
    }
    String::new()
}
