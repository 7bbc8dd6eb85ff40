use tracing_subscriber::{EnvFilter, fmt};

/// 初始化日志系统
///
/// 优先使用 RUST_LOG 环境变量；否则按 verbosity 选择级别:
/// - 0: info
/// - 1: debug
/// - 2+: trace
///
/// 日志输出到 stderr，避免和响应内容混在一起。
pub fn init_logger(verbosity: u8) {
    let default_level = match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let result = fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(verbosity > 0)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .try_init();

    // 测试里可能被多次调用
    if result.is_ok() {
        tracing::debug!(verbosity, "Logger initialized");
    }
}
