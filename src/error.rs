use thiserror::Error;

#[derive(Error, Debug)]
pub enum RawreqError {
    #[error("解析错误: {0}")]
    ParseError(String),

    #[error("检测到循环依赖: {0}")]
    CircularDependency(String),

    #[error("无效的 URL: {0}")]
    InvalidUrl(String),

    #[error("HTTP 请求失败: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("网络错误: {0}")]
    NetworkError(String),

    #[error("请求已取消")]
    Cancelled,

    #[error("脚本错误: {0}")]
    ScriptError(String),

    #[error("IO 错误: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON 解析错误: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("配置文件解析错误: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("URL 解析错误: {0}")]
    UrlParseError(#[from] url::ParseError),

    #[error("{0}")]
    Other(String),
}

impl From<anyhow::Error> for RawreqError {
    fn from(err: anyhow::Error) -> Self {
        RawreqError::Other(err.to_string())
    }
}

impl From<crate::parser::ParseError> for RawreqError {
    fn from(err: crate::parser::ParseError) -> Self {
        RawreqError::ParseError(err.to_string())
    }
}

/// Result type for rawreq crate
pub type Result<T> = std::result::Result<T, RawreqError>;
