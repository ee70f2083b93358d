use anyhow::{Context, Result};
use clap::{Arg, Command};
use tokio::signal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use indexflow_core::AppConfig;

mod app;

use app::Application;

#[tokio::main]
async fn main() -> Result<()> {
    // 解析命令行参数
    let matches = Command::new("indexflow")
        .version("1.0.0")
        .about("多租户后台任务调度与批量索引系统")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("配置文件路径，缺省时尝试 config/indexflow.toml"),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("日志级别")
                .value_parser(["trace", "debug", "info", "warn", "error"])
                .default_value("info"),
        )
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .value_name("FORMAT")
                .help("日志格式")
                .value_parser(["json", "pretty"])
                .default_value("pretty"),
        )
        .get_matches();

    let config_path = matches.get_one::<String>("config").map(String::as_str);
    let log_level = matches.get_one::<String>("log-level").map(String::as_str);
    let log_format = matches.get_one::<String>("log-format").map(String::as_str);

    init_logging(
        log_level.unwrap_or("info"),
        log_format.unwrap_or("pretty"),
    );

    info!("启动indexflow调度服务");
    if let Some(path) = config_path {
        info!("配置文件: {}", path);
    }

    let config = AppConfig::load(config_path).context("加载配置失败")?;

    let app = Application::new(config).await?;
    app.start().await?;

    signal::ctrl_c().await.context("监听停机信号失败")?;
    info!("收到停机信号");
    app.shutdown().await;

    Ok(())
}

fn init_logging(log_level: &str, log_format: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    let registry = tracing_subscriber::registry().with(filter);
    if log_format == "json" {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}
