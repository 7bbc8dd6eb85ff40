use crate::Result;
use crate::parser::ParsedFile;
use crate::variable::hydration::merge_variables;
use crate::variable::resolver::VariableResolver;
use crate::variable::secrets::SecretStore;
use crate::variable::types::{RawreqConfig, VariableContext};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// 配置文件加载器
pub struct ConfigLoader;

impl ConfigLoader {
    /// 配置文件名
    const CONFIG_FILE: &'static str = "rawreq.toml";

    /// 从指定路径加载配置文件
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<RawreqConfig> {
        let content = fs::read_to_string(path.as_ref())?;
        let config = toml::from_str(&content)?;
        debug!(path = %path.as_ref().display(), "loaded config");
        Ok(config)
    }

    /// 查找并加载配置文件
    /// 查找顺序：
    /// 1. 当前目录及其父目录
    /// 2. 用户配置目录 ~/.config/rawreq/
    ///
    /// 找不到或解析失败时返回默认配置。
    pub fn find_and_load() -> RawreqConfig {
        let Some(path) = Self::locate() else {
            return RawreqConfig::default();
        };
        match Self::load_from_path(&path) {
            Ok(config) => config,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "ignoring unreadable config");
                RawreqConfig::default()
            }
        }
    }

    fn locate() -> Option<PathBuf> {
        let mut current = std::env::current_dir().ok()?;
        loop {
            let config_path = current.join(Self::CONFIG_FILE);
            if config_path.exists() {
                return Some(config_path);
            }
            // 尝试父目录
            if !current.pop() {
                break;
            }
        }

        let user_path = dirs::home_dir()?
            .join(".config")
            .join("rawreq")
            .join(Self::CONFIG_FILE);
        user_path.exists().then_some(user_path)
    }

    /// 构建变量上下文
    ///
    /// 优先级（低到高）：文件变量、配置文件中的环境变量、文件中的 `@env.`、CLI 覆盖。
    pub fn build_context(
        config: &RawreqConfig,
        file: &ParsedFile,
        env_name: &str,
        cli_vars: &[(String, String)],
    ) -> VariableContext {
        let mut env_layer: BTreeMap<String, String> = BTreeMap::new();

        // 配置文件中的环境变量，展开 ${VAR}
        if let Some(env) = config.get_environment(env_name) {
            for (key, value) in &env.variables {
                env_layer.insert(key.clone(), VariableResolver::resolve_env_vars(value));
            }
        }

        if let Some(file_env) = file.environments.get(env_name) {
            env_layer.extend(file_env.iter().map(|(k, v)| (k.clone(), v.clone())));
        }

        let mut context = merge_variables(&file.variables, Some(&env_layer));

        // CLI 覆盖（优先级最高）
        for (key, value) in cli_vars {
            context.insert(key.clone(), value.clone());
        }

        context
    }

    /// 由配置构建密钥库，值中的 ${VAR} 会被展开
    pub fn secret_store(config: &RawreqConfig) -> SecretStore {
        let mut store = SecretStore::default();
        for (env, secrets) in &config.secrets {
            for (key, value) in secrets {
                store.insert(env, key.clone(), VariableResolver::resolve_env_vars(value));
            }
        }
        store
    }

    /// 历史目录：配置值，否则 ~/.rawreq，再否则当前目录下的 .rawreq
    pub fn history_dir(config: &RawreqConfig) -> PathBuf {
        config.history_dir.clone().unwrap_or_else(|| {
            dirs::home_dir()
                .map(|home| home.join(".rawreq"))
                .unwrap_or_else(|| PathBuf::from(".rawreq"))
        })
    }

    /// 解析 CLI 变量参数 "key=value"
    pub fn parse_cli_var(s: &str) -> Option<(String, String)> {
        s.split_once('=')
            .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
    }
}
