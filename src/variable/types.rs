use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

/// 变量上下文，存储所有可用变量
///
/// 一次执行（含整条依赖链）共享同一个上下文，后置脚本写入的变量对后续步骤可见。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VariableContext {
    /// 变量映射表
    variables: HashMap<String, String>,
}

impl VariableContext {
    /// 创建新的空变量上下文
    pub fn new() -> Self {
        Self::default()
    }

    /// 插入变量
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.variables.insert(key.into(), value.into());
    }

    /// 设置变量 (insert 的别名)
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.insert(key, value);
    }

    /// 获取变量值
    pub fn get(&self, key: &str) -> Option<&str> {
        self.variables.get(key).map(|s| s.as_str())
    }

    /// 批量插入变量（后插入的覆盖先插入的）
    pub fn extend<I, K, V>(&mut self, vars: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        for (k, v) in vars {
            self.insert(k, v);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.variables.iter()
    }

    /// 导出为有序映射（用于脚本与序列化）
    pub fn to_map(&self) -> BTreeMap<String, String> {
        self.variables
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// 变量数量
    pub fn len(&self) -> usize {
        self.variables.len()
    }

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for VariableContext {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut ctx = VariableContext::new();
        ctx.extend(iter);
        ctx
    }
}

/// 环境配置
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Environment {
    /// 变量映射
    #[serde(flatten)]
    pub variables: HashMap<String, String>,
}

/// 脚本沙箱配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScriptSettings {
    /// 单次脚本执行允许的最大操作数
    pub max_operations: u64,
}

impl Default for ScriptSettings {
    fn default() -> Self {
        Self {
            max_operations: 1_000_000,
        }
    }
}

/// 完整的配置文件（rawreq.toml）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RawreqConfig {
    /// 未指定 --env 时使用的环境
    pub default_env: Option<String>,

    /// 历史记录目录，默认 ~/.rawreq
    pub history_dir: Option<PathBuf>,

    /// 每个文件保留的历史条数
    pub max_history: usize,

    /// 请求超时（秒），可被 @timeout 覆盖
    pub request_timeout_secs: u64,

    /// 是否在源文件旁保存最近一次响应
    pub save_responses: bool,

    pub script: ScriptSettings,

    /// 所有环境配置
    pub environments: HashMap<String, Environment>,

    /// 环境名 -> (密钥名 -> 值)
    pub secrets: HashMap<String, HashMap<String, String>>,
}

impl Default for RawreqConfig {
    fn default() -> Self {
        Self {
            default_env: None,
            history_dir: None,
            max_history: 100,
            request_timeout_secs: 30,
            save_responses: true,
            script: ScriptSettings::default(),
            environments: HashMap::new(),
            secrets: HashMap::new(),
        }
    }
}

impl RawreqConfig {
    /// 获取指定环境的变量
    pub fn get_environment(&self, env_name: &str) -> Option<&Environment> {
        self.environments.get(env_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_variable_context_basic() {
        let mut ctx = VariableContext::new();
        assert!(ctx.is_empty());

        ctx.insert("key", "value");
        assert_eq!(ctx.len(), 1);
        assert_eq!(ctx.get("key"), Some("value"));
        assert_eq!(ctx.get("missing"), None);
    }

    #[test]
    fn test_variable_context_extend_overrides() {
        let mut ctx: VariableContext = [("key1", "a"), ("key2", "b")].into_iter().collect();
        ctx.extend([("key2", "c")]);
        assert_eq!(ctx.len(), 2);
        assert_eq!(ctx.get("key2"), Some("c"));
        assert_eq!(
            ctx.to_map().into_iter().collect::<Vec<_>>(),
            vec![
                ("key1".to_string(), "a".to_string()),
                ("key2".to_string(), "c".to_string())
            ]
        );
    }

    #[test]
    fn test_config_defaults() {
        let config: RawreqConfig = toml::from_str("").unwrap();
        assert_eq!(config.max_history, 100);
        assert_eq!(config.request_timeout_secs, 30);
        assert!(config.save_responses);
        assert_eq!(config.script.max_operations, 1_000_000);
        assert!(config.environments.is_empty());
    }

    #[test]
    fn test_config_parse() {
        let toml_str = r#"
default_env = "dev"
max_history = 20

[script]
max_operations = 5000

[environments.dev]
base_url = "http://localhost:8080"

[environments.prod]
base_url = "https://api.example.com"
api_key = "${PROD_KEY}"

[secrets.dev]
token = "s3cr3t"
"#;

        let config: RawreqConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.default_env.as_deref(), Some("dev"));
        assert_eq!(config.max_history, 20);
        assert_eq!(config.script.max_operations, 5000);
        assert_eq!(config.environments.len(), 2);
        assert_eq!(config.secrets["dev"]["token"], "s3cr3t");

        let dev = config.get_environment("dev").unwrap();
        assert_eq!(
            dev.variables.get("base_url"),
            Some(&"http://localhost:8080".to_string())
        );
    }
}
