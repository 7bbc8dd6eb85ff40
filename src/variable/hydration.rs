//! 两阶段文本替换：先替换密钥占位符，再替换 `{{var}}` 变量。

use crate::Result;
use crate::variable::resolver::VariableResolver;
use crate::variable::secrets::SecretResolver;
use crate::variable::types::VariableContext;
use indexmap::IndexMap;
use std::collections::BTreeMap;

/// 空白环境名统一为 `default`
pub fn normalize_env_name(env: &str) -> String {
    let trimmed = env.trim();
    if trimmed.is_empty() {
        "default".to_string()
    } else {
        trimmed.to_string()
    }
}

/// 合并文件变量与环境变量，冲突时环境变量优先
pub fn merge_variables(
    file_vars: &BTreeMap<String, String>,
    env_vars: Option<&BTreeMap<String, String>>,
) -> VariableContext {
    let mut context: VariableContext = file_vars.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
    if let Some(env_vars) = env_vars {
        context.extend(env_vars.iter().map(|(k, v)| (k.as_str(), v.as_str())));
    }
    context
}

pub async fn hydrate_text(
    value: &str,
    variables: &VariableContext,
    env: &str,
    secrets: &dyn SecretResolver,
) -> Result<String> {
    let with_secrets = hydrate_text_secrets_only(value, env, secrets).await?;
    Ok(VariableResolver::substitute(&with_secrets, variables))
}

/// 只替换密钥，不替换变量
pub async fn hydrate_text_secrets_only(
    value: &str,
    env: &str,
    secrets: &dyn SecretResolver,
) -> Result<String> {
    if value.is_empty() {
        return Ok(String::new());
    }
    secrets
        .replace_secrets(value, &normalize_env_name(env))
        .await
}

pub async fn hydrate_headers(
    headers: &IndexMap<String, String>,
    variables: &VariableContext,
    env: &str,
    secrets: &dyn SecretResolver,
) -> Result<IndexMap<String, String>> {
    let mut out = IndexMap::with_capacity(headers.len());
    for (key, value) in headers {
        out.insert(key.clone(), hydrate_text(value, variables, env, secrets).await?);
    }
    Ok(out)
}

pub async fn hydrate_headers_secrets_only(
    headers: &IndexMap<String, String>,
    env: &str,
    secrets: &dyn SecretResolver,
) -> Result<IndexMap<String, String>> {
    let mut out = IndexMap::with_capacity(headers.len());
    for (key, value) in headers {
        out.insert(key.clone(), hydrate_text_secrets_only(value, env, secrets).await?);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::variable::secrets::{NoSecrets, SecretStore};
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// 把 `<<secret>>` 替换为 `S`，并记录收到的环境名
    #[derive(Default)]
    struct AngleSecrets {
        envs: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl SecretResolver for AngleSecrets {
        async fn replace_secrets(&self, text: &str, env: &str) -> Result<String> {
            self.envs.lock().unwrap().push(env.to_string());
            Ok(text.replace("<<secret>>", "S"))
        }
    }

    #[test]
    fn test_normalize_env_name() {
        assert_eq!(normalize_env_name(""), "default");
        assert_eq!(normalize_env_name("   "), "default");
        assert_eq!(normalize_env_name(" dev "), "dev");
        assert_eq!(normalize_env_name("Prod"), "Prod");
    }

    #[tokio::test]
    async fn test_secrets_resolved_before_variables() {
        let resolver = AngleSecrets::default();
        let vars: VariableContext = [("name", "Ada")].into_iter().collect();

        let out = hydrate_text("hi <<secret>> {{name}}", &vars, "", &resolver)
            .await
            .unwrap();
        assert_eq!(out, "hi S Ada");
        assert_eq!(resolver.envs.lock().unwrap().as_slice(), ["default"]);
    }

    #[tokio::test]
    async fn test_variable_cannot_inject_secret_lookup() {
        let mut store = SecretStore::default();
        store.insert("default", "key", "leaked");
        let vars: VariableContext = [("x", "{{secret:key}}")].into_iter().collect();

        let out = hydrate_text("{{x}}", &vars, "default", &store).await.unwrap();
        assert_eq!(out, "{{secret:key}}");
    }

    #[tokio::test]
    async fn test_secrets_only_keeps_variables() {
        let resolver = AngleSecrets::default();
        let out = hydrate_text_secrets_only("<<secret>>/{{id}}", "dev", &resolver)
            .await
            .unwrap();
        assert_eq!(out, "S/{{id}}");
    }

    #[tokio::test]
    async fn test_hydrate_headers() {
        let mut headers = IndexMap::new();
        headers.insert("Authorization".to_string(), "Bearer {{token}}".to_string());
        headers.insert("X-Key".to_string(), "<<secret>>".to_string());
        let vars: VariableContext = [("token", "t-1")].into_iter().collect();
        let resolver = AngleSecrets::default();

        let out = hydrate_headers(&headers, &vars, "dev", &resolver).await.unwrap();
        assert_eq!(out["Authorization"], "Bearer t-1");
        assert_eq!(out["X-Key"], "S");

        let preview = hydrate_headers_secrets_only(&headers, "dev", &resolver)
            .await
            .unwrap();
        assert_eq!(preview["Authorization"], "Bearer {{token}}");
        assert_eq!(preview["X-Key"], "S");
    }

    #[tokio::test]
    async fn test_unresolved_left_verbatim() {
        let out = hydrate_text("{{a}}-{{b}}", &VariableContext::new(), "x", &NoSecrets)
            .await
            .unwrap();
        assert_eq!(out, "{{a}}-{{b}}");
    }

    #[test]
    fn test_merge_variables_env_wins() {
        let mut file_vars = BTreeMap::new();
        file_vars.insert("host".to_string(), "file".to_string());
        file_vars.insert("only_file".to_string(), "1".to_string());
        let mut env_vars = BTreeMap::new();
        env_vars.insert("host".to_string(), "env".to_string());

        let merged = merge_variables(&file_vars, Some(&env_vars));
        assert_eq!(merged.get("host"), Some("env"));
        assert_eq!(merged.get("only_file"), Some("1"));

        let merged = merge_variables(&file_vars, None);
        assert_eq!(merged.get("host"), Some("file"));
    }
}
