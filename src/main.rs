use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use proxy_harvest::common::log::init_logging;
use proxy_harvest::db::{AppwriteStore, RecordStore};
use proxy_harvest::fetcher::SourceFetcher;
use proxy_harvest::model::{AppConfig, ProxyKind};
use proxy_harvest::service::probe::HttpProbe;
use proxy_harvest::service::report::{export_working, ValidationSummary};
use proxy_harvest::service::sweeper::{RetentionSweeper, SweepOptions};
use proxy_harvest::service::validator::ProxyValidator;
use proxy_harvest::service::verifier::ValidationPool;
use serde::Serialize;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};

/// 采集、验证并保存公开代理，清理过期记录
#[derive(Parser)]
#[command(name = "proxy-harvest", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// 配置文件（不含扩展名）
    #[arg(short, long, default_value = "Config")]
    config: String,
}

#[derive(Subcommand)]
enum Commands {
    /// 抓取代理列表、验证并写入存储
    Validate {
        /// 代理类型，逗号分隔（http, socks4, socks5）
        #[arg(short, long, value_delimiter = ',')]
        kinds: Option<Vec<ProxyKind>>,
        /// 最大并发验证数
        #[arg(short, long)]
        workers: Option<usize>,
        /// 单次探测超时（秒）
        #[arg(short, long)]
        timeout: Option<u64>,
        /// 额外导出可用代理的目录
        #[arg(short, long)]
        output_dir: Option<String>,
    },
    /// 删除超过保留时长的记录
    Sweep {
        /// 保留时长（小时）
        #[arg(short, long)]
        retention_hours: Option<u64>,
        /// 最大并发删除数
        #[arg(short, long)]
        workers: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    match run(Cli::parse()).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<bool> {
    let env: config::Map<String, String> = std::env::vars().collect();
    let mut config = AppConfig::load_with(Some(&cli.config), env).context("加载配置失败")?;

    // 必须在任何业务逻辑之前初始化
    init_logging(&config.log).context("初始化日志失败")?;

    match cli.command {
        Commands::Validate { kinds, workers, timeout, output_dir } => {
            if let Some(kinds) = kinds {
                config.source.kinds = kinds;
            }
            if let Some(workers) = workers {
                config.verify.workers = workers;
            }
            if let Some(timeout) = timeout {
                config.verify.timeout_secs = timeout;
            }
            if output_dir.is_some() {
                config.verify.output_dir = output_dir;
            }
            config.validate()?;
            run_validation(&config).await
        }
        Commands::Sweep { retention_hours, workers } => {
            if let Some(hours) = retention_hours {
                config.sweep.retention_hours = hours;
            }
            if let Some(workers) = workers {
                config.sweep.delete_workers = workers;
            }
            config.validate()?;
            run_sweep(&config).await
        }
    }
}

async fn run_validation(config: &AppConfig) -> Result<bool> {
    let store: Arc<dyn RecordStore> = Arc::new(AppwriteStore::new(&config.store)?);

    info!("========== [代理采集阶段] ==========");
    let fetcher = SourceFetcher::new(&config.source)?;
    let fetched = fetcher.fetch_all(&config.source.kinds).await;
    info!("抓取到总共 {} 条代理", fetched.candidates.len());

    let validator = ProxyValidator::new(
        Arc::new(HttpProbe::new()),
        config.verify.test_urls.clone(),
        config.verify.timeout(),
    )?;
    let pool = ValidationPool::new(validator, store, config.verify.workers)
        .with_error_sample(config.verify.error_sample);
    let report = pool.run(fetched.candidates).await;

    if let Some(dir) = &config.verify.output_dir {
        if let Err(e) = export_working(Path::new(dir), &fetched.fetched, &report.working) {
            warn!("⚠️ 导出到 {} 失败：{:#}", dir, e);
        }
    }

    let summary = ValidationSummary::new(&report, fetched.errors);
    print_summary(&summary)?;
    Ok(true)
}

async fn run_sweep(config: &AppConfig) -> Result<bool> {
    let store: Arc<dyn RecordStore> = Arc::new(AppwriteStore::new(&config.store)?);
    let options = SweepOptions::from_config(&config.sweep, config.store.page_size);

    let summary = RetentionSweeper::new(store, options).sweep().await;
    print_summary(&summary)?;
    Ok(summary.success)
}

fn print_summary<T: Serialize>(summary: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(summary)?);
    Ok(())
}
