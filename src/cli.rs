use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, anyhow};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use comfy_table::presets::UTF8_FULL;
use comfy_table::{Cell, Color, Table};
use inquire::Select;
use tracing::{debug, info, warn};

use rawreq::history::{FileHistoryStore, print_history};
use rawreq::http::ReqwestTransport;
use rawreq::parser::{self, ParsedFile};
use rawreq::runner::{
    ExecuteOptions, ExecutionOutcome, ExecutionReporter, Orchestrator, SkipReason,
};
use rawreq::script::{ScriptLogBuffer, ScriptRunner, SharedVariables};
use rawreq::variable::{ConfigLoader, RawreqConfig, normalize_env_name};

pub type Result<T> = std::result::Result<T, anyhow::Error>;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// 日志详细程度（-v debug，-vv trace）
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// 执行 .http 文件中的一个请求
    Run(RunArgs),

    /// 解析 .http 文件并列出请求
    Parse {
        file: PathBuf,

        /// 以 JSON 输出解析结果
        #[arg(long)]
        json: bool,
    },

    /// 查看文件的执行历史
    History {
        file: PathBuf,

        /// 显示最近 n 条
        #[arg(short = 'n', long, default_value_t = 20)]
        limit: usize,

        #[arg(long)]
        history_dir: Option<PathBuf>,
    },
}

#[derive(Args)]
pub struct RunArgs {
    pub file: PathBuf,

    /// 请求序号（从 1 开始）或名称；省略时交互选择
    #[arg(short, long)]
    pub request: Option<String>,

    /// 环境名
    #[arg(short, long)]
    pub env: Option<String>,

    /// 覆盖变量 key=value，可重复
    #[arg(long = "var", value_name = "KEY=VALUE")]
    pub vars: Vec<String>,

    #[arg(long)]
    pub history_dir: Option<PathBuf>,

    /// 不写入历史
    #[arg(long)]
    pub no_history: bool,

    /// 以 JSON 输出最终响应
    #[arg(long)]
    pub json: bool,
}

/// 执行命令，返回是否成功
pub async fn run(cli: Cli) -> Result<bool> {
    match cli.command {
        Commands::Run(args) => run_request(args, cli.verbose > 0).await,
        Commands::Parse { file, json } => {
            let parsed = load_file(&file)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&parsed)?);
            } else {
                print_requests(&parsed);
            }
            Ok(true)
        }
        Commands::History {
            file,
            limit,
            history_dir,
        } => {
            let config = ConfigLoader::find_and_load();
            let dir = history_dir.unwrap_or_else(|| ConfigLoader::history_dir(&config));
            let store = FileHistoryStore::new(dir);
            let items = store.tail(&file_id(&file), limit)?;
            print_history(&items);
            Ok(true)
        }
    }
}

async fn run_request(args: RunArgs, verbose: bool) -> Result<bool> {
    let parsed = load_file(&args.file)?;
    if parsed.requests.is_empty() {
        return Err(anyhow!("No requests found in {}", args.file.display()));
    }
    let index = match &args.request {
        Some(selector) => select_by_arg(&parsed, selector)?,
        None if parsed.requests.len() == 1 => 0,
        None => select_interactive(&parsed)?,
    };

    let config = ConfigLoader::find_and_load();
    let env = normalize_env_name(
        &args
            .env
            .clone()
            .or_else(|| config.default_env.clone())
            .unwrap_or_default(),
    );
    let cli_vars: Vec<(String, String)> = args
        .vars
        .iter()
        .filter_map(|v| {
            let parsed = ConfigLoader::parse_cli_var(v);
            if parsed.is_none() {
                warn!(var = %v, "ignoring malformed --var, expected KEY=VALUE");
            }
            parsed
        })
        .collect();
    let variables = ConfigLoader::build_context(&config, &parsed, &env, &cli_vars);

    let console = Arc::new(ScriptLogBuffer::new());
    let script_vars = Arc::new(SharedVariables::new());
    let orchestrator = Arc::new(
        build_orchestrator(&args, &config, Arc::clone(&console))?
            .with_variable_sink(script_vars.clone()),
    );

    // Ctrl-C 取消当前执行
    let canceller = Arc::clone(&orchestrator);
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, cancelling");
            canceller.cancel();
        }
    });

    let reporter = ExecutionReporter::new(verbose);
    let request = &parsed.requests[index];
    if !args.json {
        reporter.print_header(&args.file.display().to_string(), &request.label());
    }

    let options = ExecuteOptions::default()
        .with_env(env)
        .with_variables(variables);
    let outcome = orchestrator.execute(&parsed, index, options).await;
    ctrl_c.abort();

    let report = match outcome {
        ExecutionOutcome::Completed(report) => report,
        ExecutionOutcome::Skipped(SkipReason::AlreadyRunning) => {
            return Err(anyhow!("Another execution is already running"));
        }
        ExecutionOutcome::Skipped(SkipReason::UnknownRequest) => {
            return Err(anyhow!("No request at position {}", index + 1));
        }
    };
    debug!(request_id = %report.request_id, history = report.history.len(), "execution complete");

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report.response)?);
    } else {
        reporter.print_console(&console.drain());
        reporter.print_script_variables(&script_vars.snapshot());
        reporter.print_report(&report);
    }
    Ok(ExecutionReporter::passed(&report))
}

fn build_orchestrator(
    args: &RunArgs,
    config: &RawreqConfig,
    console: Arc<ScriptLogBuffer>,
) -> Result<Orchestrator> {
    let transport = ReqwestTransport::with_timeout(Duration::from_secs(config.request_timeout_secs))
        .context("Failed to build HTTP client")?;
    let mut orchestrator = Orchestrator::new(file_id(&args.file), Arc::new(transport))
        .with_secrets(Arc::new(ConfigLoader::secret_store(config)))
        .with_script_runner(ScriptRunner::with_max_operations(config.script.max_operations))
        .with_console(console);

    if !args.no_history {
        let dir = args
            .history_dir
            .clone()
            .unwrap_or_else(|| ConfigLoader::history_dir(config));
        let mut store = FileHistoryStore::new(&dir).with_max_items(config.max_history);
        if config.save_responses {
            store = store.with_response_files(dir.join("responses"));
        }
        orchestrator = orchestrator.with_history(Arc::new(store));
    }
    Ok(orchestrator)
}

fn load_file(path: &Path) -> Result<ParsedFile> {
    parser::parse_file(path).with_context(|| format!("Failed to read {}", path.display()))
}

fn file_id(path: &Path) -> String {
    path.display().to_string()
}

/// 数字按 1 起始的序号解析，否则按名称精确匹配
fn select_by_arg(parsed: &ParsedFile, selector: &str) -> Result<usize> {
    if let Ok(number) = selector.parse::<usize>() {
        if number == 0 || number > parsed.requests.len() {
            return Err(anyhow!(
                "Request number {} out of range (1-{})",
                number,
                parsed.requests.len()
            ));
        }
        return Ok(number - 1);
    }
    parsed
        .find_by_name(selector)
        .ok_or_else(|| anyhow!("No request named '{}'", selector))
}

fn select_interactive(parsed: &ParsedFile) -> Result<usize> {
    #[derive(Clone)]
    struct RequestOption {
        index: usize,
        display: String,
    }

    impl std::fmt::Display for RequestOption {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{}", self.display)
        }
    }

    let options: Vec<RequestOption> = parsed
        .requests
        .iter()
        .enumerate()
        .map(|(index, r)| RequestOption {
            index,
            display: match r.name() {
                Some(name) => format!("[{}] {} - {} {}", index + 1, name, r.method, r.url),
                None => format!("[{}] {} {}", index + 1, r.method, r.url),
            },
        })
        .collect();

    let selected = Select::new("Select a request to run:", options)
        .with_page_size(15)
        .with_help_message("Enter to run, type to filter")
        .prompt()
        .map_err(|e| anyhow!("Interaction canceled or failed: {}", e))?;
    Ok(selected.index)
}

fn print_requests(parsed: &ParsedFile) {
    if let Some(name) = &parsed.file_display_name {
        println!("{}", name.bold());
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_header(vec!["#", "Name", "Method", "URL", "Depends", "Extras"]);
    for (idx, request) in parsed.requests.iter().enumerate() {
        let mut extras = Vec::new();
        if request.pre_script.is_some() {
            extras.push("pre".to_string());
        }
        if request.post_script.is_some() {
            extras.push("post".to_string());
        }
        if request.load_test.is_some() {
            extras.push("load".to_string());
        }
        if let Some(timeout) = request.options.timeout {
            extras.push(format!("timeout={}s", timeout));
        }
        if let Some(group) = &request.group {
            extras.push(format!("group={}", group));
        }

        table.add_row(vec![
            Cell::new(idx + 1),
            Cell::new(request.name().unwrap_or("-")),
            Cell::new(&request.method).fg(Color::Cyan),
            Cell::new(&request.url),
            Cell::new(request.depends.as_deref().unwrap_or("-")),
            Cell::new(extras.join(", ")),
        ]);
    }
    println!("{}", table);

    if !parsed.environments.is_empty() {
        let names: Vec<&str> = parsed.environments.keys().map(String::as_str).collect();
        println!("Environments: {}", names.join(", "));
    }
}
