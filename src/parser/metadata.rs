use crate::parser::load_config::LoadConfig;
use crate::parser::types::{ParsedFile, PendingMetadata, Request};
use regex::Regex;
use std::sync::OnceLock;

/// 以 `@` 开头的单行指令
#[derive(Debug, Clone, PartialEq)]
pub enum Directive {
    /// `@env.<env>.<key> (=|空白) <value>`
    Env {
        env: String,
        key: String,
        value: String,
    },
    /// `@tab <name>`
    Tab(String),
    /// `@name <text>`
    Name(String),
    /// `@depends <name>`
    Depends(String),
    /// `@load k=v ...`
    Load(LoadConfig),
    /// `@timeout <seconds>`
    Timeout(u64),
    /// `@key[=value]`
    Variable { key: String, value: String },
    /// 格式错误的指令，静默丢弃
    Ignored,
}

/// `### ... ###` 分隔行上携带的元数据
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SeparatorMeta {
    Name(String),
    Group(String),
    Depends(String),
    Tab(String),
    None,
}

/// 主解析函数（统一入口），输入必须是已 trim 的行
///
/// 非 `@` 开头的行返回 `None`。
pub fn parse_directive(line: &str) -> Option<Directive> {
    if !line.starts_with('@') {
        return None;
    }

    if line.starts_with("@env.") {
        return Some(parse_env(line));
    }

    let directive = if let Some(rest) = line.strip_prefix("@tab ") {
        Directive::Tab(normalize_display_name(rest))
    } else if let Some(rest) = line.strip_prefix("@name ") {
        Directive::Name(rest.trim().to_string())
    } else if let Some(rest) = line.strip_prefix("@depends ") {
        Directive::Depends(rest.trim().to_string())
    } else if let Some(rest) = line.strip_prefix("@load ") {
        Directive::Load(LoadConfig::parse(rest))
    } else if let Some(rest) = line.strip_prefix("@timeout ") {
        parse_timeout(rest)
    } else {
        parse_variable(line)
    };

    Some(directive)
}

/// 应用指令到文件结果或待定元数据
pub fn apply_directive(directive: Directive, file: &mut ParsedFile, pending: &mut PendingMetadata) {
    match directive {
        Directive::Env { env, key, value } => {
            file.environments.entry(env).or_default().insert(key, value);
        }
        Directive::Tab(name) => file.file_display_name = Some(name),
        Directive::Name(name) => pending.name = Some(name),
        Directive::Depends(target) => pending.depends = Some(target),
        Directive::Load(config) => pending.load_test = Some(config),
        Directive::Timeout(secs) => pending.timeout = Some(secs),
        Directive::Variable { key, value } => {
            file.variables.insert(key, value);
        }
        Directive::Ignored => {}
    }
}

/// 判断原始行是否是请求分隔符
///
/// `###` 单独成行，或 `### <label>` 且 label 不全是 `#`（`### #####` 这类视觉分割线视为注释）。
pub fn is_separator(raw_line: &str) -> bool {
    let Some(rest) = raw_line.trim().strip_prefix("###") else {
        return false;
    };
    if rest.is_empty() {
        return true;
    }
    if !rest.starts_with(char::is_whitespace) {
        return false;
    }
    rest.chars().any(|c| c != '#' && !c.is_whitespace())
}

/// 提取分隔行上的元数据
pub fn parse_separator(line: &str) -> SeparatorMeta {
    let line = line.trim();
    let inner = line.strip_prefix("###").unwrap_or(line);
    let inner = inner.strip_suffix("###").unwrap_or(inner).trim();
    if inner.is_empty() {
        return SeparatorMeta::None;
    }

    if let Some(rest) = inner.strip_prefix("name:") {
        SeparatorMeta::Name(rest.trim().to_string())
    } else if let Some(rest) = inner.strip_prefix("group:") {
        SeparatorMeta::Group(rest.trim().to_string())
    } else if let Some(rest) = inner.strip_prefix("depends:") {
        SeparatorMeta::Depends(rest.trim().to_string())
    } else if let Some(rest) = inner.strip_prefix("tab:") {
        SeparatorMeta::Tab(normalize_display_name(rest))
    } else {
        SeparatorMeta::None
    }
}

/// 应用分隔行元数据：有进行中的请求时作用于该请求，否则作用于待定元数据
pub fn apply_separator(
    meta: SeparatorMeta,
    file: &mut ParsedFile,
    current: Option<&mut Request>,
    pending: &mut PendingMetadata,
) {
    match meta {
        SeparatorMeta::Name(name) => match current {
            Some(request) => request.name = Some(name),
            None => pending.name = Some(name),
        },
        SeparatorMeta::Depends(target) => match current {
            Some(request) => request.depends = Some(target),
            None => pending.depends = Some(target),
        },
        SeparatorMeta::Group(group) => {
            if !group.is_empty() {
                file.add_group(&group);
            }
            match current {
                Some(request) => request.group = Some(group),
                None => pending.group = Some(group),
            }
        }
        SeparatorMeta::Tab(name) => file.file_display_name = Some(name),
        SeparatorMeta::None => {}
    }
}

/// 去掉成对的引号并 trim
pub fn normalize_display_name(value: &str) -> String {
    let trimmed = value.trim();
    let quoted = trimmed.len() >= 2
        && ((trimmed.starts_with('"') && trimmed.ends_with('"'))
            || (trimmed.starts_with('\'') && trimmed.ends_with('\'')));
    if quoted {
        trimmed[1..trimmed.len() - 1].trim().to_string()
    } else {
        trimmed.to_string()
    }
}

// === 各个解析器实现 ===

fn parse_env(line: &str) -> Directive {
    static ENV_REGEX: OnceLock<Regex> = OnceLock::new();
    let re = ENV_REGEX.get_or_init(|| Regex::new(r"^@env\.(\w+)\.(\w+)\s*(?:=|\s+)\s*(.+)$").unwrap());

    match re.captures(line) {
        Some(caps) => Directive::Env {
            env: caps[1].to_string(),
            key: caps[2].to_string(),
            value: caps[3].to_string(),
        },
        None => Directive::Ignored,
    }
}

/// 只取开头的数字部分，`30s` 视为 30；非正数被忽略
fn parse_timeout(content: &str) -> Directive {
    let digits: String = content
        .trim()
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    match digits.parse::<u64>() {
        Ok(secs) if secs > 0 => Directive::Timeout(secs),
        _ => Directive::Ignored,
    }
}

fn parse_variable(line: &str) -> Directive {
    static VAR_REGEX: OnceLock<Regex> = OnceLock::new();
    let re = VAR_REGEX.get_or_init(|| Regex::new(r"^@(\w+)\s*=?\s*(.*)$").unwrap());

    match re.captures(line) {
        Some(caps) => Directive::Variable {
            key: caps[1].to_string(),
            value: caps[2].to_string(),
        },
        None => Directive::Ignored,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_with_equals_or_space() {
        let expected = Directive::Env {
            env: "dev".to_string(),
            key: "token".to_string(),
            value: "abc".to_string(),
        };
        assert_eq!(parse_directive("@env.dev.token abc"), Some(expected.clone()));
        assert_eq!(parse_directive("@env.dev.token=abc"), Some(expected.clone()));
        assert_eq!(parse_directive("@env.dev.token = abc"), Some(expected));
    }

    #[test]
    fn test_malformed_env_is_ignored() {
        assert_eq!(parse_directive("@env.dev"), Some(Directive::Ignored));
        assert_eq!(parse_directive("@env.dev.token"), Some(Directive::Ignored));
    }

    #[test]
    fn test_tab_strips_quotes() {
        assert_eq!(
            parse_directive("@tab \" Users API \""),
            Some(Directive::Tab("Users API".to_string()))
        );
    }

    #[test]
    fn test_request_directives() {
        assert_eq!(
            parse_directive("@name  Login "),
            Some(Directive::Name("Login".to_string()))
        );
        assert_eq!(
            parse_directive("@depends Login"),
            Some(Directive::Depends("Login".to_string()))
        );
        assert!(matches!(
            parse_directive("@load users=2"),
            Some(Directive::Load(ref c)) if c.get_int("concurrent") == Some(2)
        ));
    }

    #[test]
    fn test_timeout() {
        assert_eq!(parse_directive("@timeout 30"), Some(Directive::Timeout(30)));
        assert_eq!(parse_directive("@timeout 5s"), Some(Directive::Timeout(5)));
        assert_eq!(parse_directive("@timeout 0"), Some(Directive::Ignored));
        assert_eq!(parse_directive("@timeout -3"), Some(Directive::Ignored));
        assert_eq!(parse_directive("@timeout soon"), Some(Directive::Ignored));
    }

    #[test]
    fn test_generic_variables() {
        assert_eq!(
            parse_directive("@baseUrl = http://localhost:3000"),
            Some(Directive::Variable {
                key: "baseUrl".to_string(),
                value: "http://localhost:3000".to_string()
            })
        );
        assert_eq!(
            parse_directive("@flag"),
            Some(Directive::Variable {
                key: "flag".to_string(),
                value: String::new()
            })
        );
        assert_eq!(parse_directive("@-bad"), Some(Directive::Ignored));
        assert_eq!(parse_directive("GET /"), None);
    }

    #[test]
    fn test_name_without_value_is_a_variable() {
        assert_eq!(
            parse_directive("@name"),
            Some(Directive::Variable {
                key: "name".to_string(),
                value: String::new()
            })
        );
    }

    #[test]
    fn test_is_separator() {
        assert!(is_separator("###"));
        assert!(is_separator("  ### Login"));
        assert!(is_separator("### name: A ###"));
        assert!(!is_separator("### ########"));
        assert!(!is_separator("####"));
        assert!(!is_separator("## section"));
    }

    #[test]
    fn test_parse_separator() {
        assert_eq!(
            parse_separator("### name: Login ###"),
            SeparatorMeta::Name("Login".to_string())
        );
        assert_eq!(
            parse_separator("### group: auth"),
            SeparatorMeta::Group("auth".to_string())
        );
        assert_eq!(
            parse_separator("### depends: Login ###"),
            SeparatorMeta::Depends("Login".to_string())
        );
        assert_eq!(
            parse_separator("### tab: 'My File' ###"),
            SeparatorMeta::Tab("My File".to_string())
        );
        assert_eq!(parse_separator("### Just a title"), SeparatorMeta::None);
        assert_eq!(parse_separator("###"), SeparatorMeta::None);
    }

    #[test]
    fn test_apply_separator_targets() {
        let mut file = ParsedFile::new();
        let mut pending = PendingMetadata::default();
        apply_separator(
            SeparatorMeta::Group("auth".to_string()),
            &mut file,
            None,
            &mut pending,
        );
        assert_eq!(pending.group.as_deref(), Some("auth"));
        assert_eq!(file.groups, vec!["auth"]);

        let mut request = Request::new("GET", "/", 1);
        apply_separator(
            SeparatorMeta::Name("Root".to_string()),
            &mut file,
            Some(&mut request),
            &mut pending,
        );
        assert_eq!(request.name.as_deref(), Some("Root"));
        assert_eq!(pending.name, None);
    }

    #[test]
    fn test_normalize_display_name() {
        assert_eq!(normalize_display_name("  'x' "), "x");
        assert_eq!(normalize_display_name("\"a b\""), "a b");
        assert_eq!(normalize_display_name("'mismatch\""), "'mismatch\"");
        assert_eq!(normalize_display_name("\""), "\"");
    }
}
