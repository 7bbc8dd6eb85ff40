use crate::variable::types::VariableContext;
use regex::{Captures, Regex};
use std::sync::OnceLock;

/// 变量替换器
pub struct VariableResolver;

impl VariableResolver {
    /// 替换文本中的所有 {{variable}} 占位符
    ///
    /// 占位符内部会先 trim；找不到的变量保持原样。
    pub fn substitute(text: &str, context: &VariableContext) -> String {
        static VAR_REGEX: OnceLock<Regex> = OnceLock::new();
        let re = VAR_REGEX.get_or_init(|| Regex::new(r"\{\{([^}]+)\}\}").unwrap());

        re.replace_all(text, |caps: &Captures| {
            let var_name = caps[1].trim();
            context.get(var_name).unwrap_or(&caps[0]).to_string()
        })
        .to_string()
    }

    /// 解析并替换系统环境变量 ${VAR}
    pub fn resolve_env_vars(text: &str) -> String {
        static ENV_REGEX: OnceLock<Regex> = OnceLock::new();
        let re = ENV_REGEX.get_or_init(|| Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").unwrap());

        re.replace_all(text, |caps: &Captures| {
            let env_name = &caps[1];
            std::env::var(env_name).unwrap_or_else(|_| caps[0].to_string())
        })
        .to_string()
    }

    /// 列出文本中引用的占位符名称（去重，保持顺序）
    pub fn placeholders(text: &str) -> Vec<String> {
        static VAR_REGEX: OnceLock<Regex> = OnceLock::new();
        let re = VAR_REGEX.get_or_init(|| Regex::new(r"\{\{([^}]+)\}\}").unwrap());

        let mut names: Vec<String> = Vec::new();
        for caps in re.captures_iter(text) {
            let name = caps[1].trim().to_string();
            if !names.contains(&name) {
                names.push(name);
            }
        }
        names
    }
}
