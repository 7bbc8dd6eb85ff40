pub mod config;
pub mod hydration;
pub mod references;
pub mod resolver;
pub mod secrets;
pub mod types;

pub use config::ConfigLoader;
pub use hydration::{
    hydrate_headers, hydrate_headers_secrets_only, hydrate_text, hydrate_text_secrets_only,
    merge_variables, normalize_env_name,
};
pub use references::{ResponseStore, StoredResponse};
pub use resolver::VariableResolver;
pub use secrets::{NoSecrets, SecretResolver, SecretStore};
pub use types::{Environment, RawreqConfig, ScriptSettings, VariableContext};
