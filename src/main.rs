use anyhow::{Context, Result};
use clap::{Arg, ArgMatches, Command};
use mediation::MediationRuntime;
use mediation_config::{AppConfig, LogFormat};
use mediation_observability::init_logging;
use tracing::info;

fn cli() -> Command {
    Command::new("mediation")
        .version(env!("CARGO_PKG_VERSION"))
        .about("消息中介引擎调度核心")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("配置文件路径")
                .global(true),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("日志级别，覆盖配置文件")
                .value_parser(["trace", "debug", "info", "warn", "error"])
                .global(true),
        )
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .value_name("FORMAT")
                .help("日志格式，覆盖配置文件")
                .value_parser(["json", "pretty", "compact"])
                .global(true),
        )
        .subcommand_required(true)
        .subcommand(Command::new("validate").about("加载并校验配置，构建端点注册表"))
        .subcommand(Command::new("endpoints").about("列出已声明的端点及其解析后的策略"))
}

#[tokio::main]
async fn main() -> Result<()> {
    let matches = cli().get_matches();
    let config_path = matches.get_one::<String>("config").map(String::as_str);

    let mut config = AppConfig::load(config_path).with_context(|| match config_path {
        Some(path) => format!("加载配置文件失败: {path}"),
        None => "加载配置失败".to_string(),
    })?;
    apply_log_overrides(&mut config, &matches)?;
    init_logging(&config.logging)?;

    match matches.subcommand() {
        Some(("validate", _)) => validate(config).await,
        Some(("endpoints", _)) => endpoints(config).await,
        Some((other, _)) => Err(anyhow::anyhow!("不支持的子命令: {other}")),
        None => Err(anyhow::anyhow!("缺少子命令")),
    }
}

fn apply_log_overrides(config: &mut AppConfig, matches: &ArgMatches) -> Result<()> {
    if let Some(level) = matches.get_one::<String>("log-level") {
        config.logging.level = level.clone();
    }
    if let Some(format) = matches.get_one::<String>("log-format") {
        config.logging.format = format
            .parse::<LogFormat>()
            .map_err(|e| anyhow::anyhow!("不支持的日志格式: {e}"))?;
    }
    Ok(())
}

async fn validate(config: AppConfig) -> Result<()> {
    let runtime = MediationRuntime::new(config).await?;
    runtime.init_endpoints().await?;
    let registry = runtime.environment().registry();
    info!("配置校验通过，端点数量: {}", registry.len().await);
    println!("配置有效: {} 个端点", registry.len().await);
    runtime.shutdown().await;
    Ok(())
}

async fn endpoints(config: AppConfig) -> Result<()> {
    let runtime = MediationRuntime::new(config).await?;
    let reports = runtime.endpoint_reports().await?;
    if reports.is_empty() {
        println!("没有声明任何端点");
        return Ok(());
    }

    for report in reports {
        println!(
            "{} [{}] {}",
            report.name,
            report.kind,
            report.address.as_deref().unwrap_or("-")
        );
        if report.resolved_to != report.name {
            println!("  解析到: {}", report.resolved_to);
        }
        let settings = &report.settings;
        println!(
            "  挂起: 初始 {}ms, 倍数 {}, 上限 {}ms",
            settings.initial.as_millis(),
            settings.progression,
            settings.maximum.as_millis()
        );
        println!(
            "  重试: 挂起前 {} 次, 间隔 {}ms",
            settings.retries_before_suspension,
            settings.retry_delay.as_millis()
        );
        println!("  状态: {:?}", report.snapshot.state);
        println!("  定义: {}", report.definition);
    }
    Ok(())
}
