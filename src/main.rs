mod cli;

use anyhow::Result;
use clap::Parser;
use cli::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // 初始化日志系统
    rawreq::logger::init_logger(cli.verbose);

    if !cli::run(cli).await? {
        std::process::exit(1);
    }
    Ok(())
}
