use crate::Result;
use async_trait::async_trait;
use regex::{Captures, Regex};
use std::collections::HashMap;
use std::sync::OnceLock;

/// 密钥替换服务
///
/// 实现方负责把文本中的密钥占位符替换为真实值；未知的占位符应保持原样。
#[async_trait]
pub trait SecretResolver: Send + Sync {
    async fn replace_secrets(&self, text: &str, env: &str) -> Result<String>;
}

/// 不做任何替换
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSecrets;

#[async_trait]
impl SecretResolver for NoSecrets {
    async fn replace_secrets(&self, text: &str, _env: &str) -> Result<String> {
        Ok(text.to_string())
    }
}

/// 基于配置文件 `[secrets.<env>]` 的内存密钥库
///
/// 替换 `{{secret:key}}`，先查当前环境，再查 `default`。
#[derive(Debug, Clone, Default)]
pub struct SecretStore {
    secrets: HashMap<String, HashMap<String, String>>,
}

impl SecretStore {
    pub fn new(secrets: HashMap<String, HashMap<String, String>>) -> Self {
        Self { secrets }
    }

    pub fn insert(&mut self, env: &str, key: impl Into<String>, value: impl Into<String>) {
        self.secrets
            .entry(env.to_string())
            .or_default()
            .insert(key.into(), value.into());
    }

    fn lookup(&self, env: &str, key: &str) -> Option<&str> {
        [env, "default"]
            .iter()
            .find_map(|scope| self.secrets.get(*scope)?.get(key))
            .map(String::as_str)
    }
}

#[async_trait]
impl SecretResolver for SecretStore {
    async fn replace_secrets(&self, text: &str, env: &str) -> Result<String> {
        static SECRET_REGEX: OnceLock<Regex> = OnceLock::new();
        let re = SECRET_REGEX
            .get_or_init(|| Regex::new(r"\{\{\s*secret:([A-Za-z0-9_\-.]+)\s*\}\}").unwrap());

        Ok(re
            .replace_all(text, |caps: &Captures| {
                self.lookup(env, &caps[1])
                    .unwrap_or(&caps[0])
                    .to_string()
            })
            .to_string())
    }
}
