use anyhow::{Context, Result};
use cgminer_dashboard::api::{BackendApi, HttpBackend};
use cgminer_dashboard::config::{Args, Command, DashboardConfig, StartArgs, BACKEND_URL_ENV};
use cgminer_dashboard::logging::init_logging;
use cgminer_dashboard::mining::DispatchCommand;
use cgminer_dashboard::monitoring::SnapshotPoller;
use cgminer_dashboard::utils::{format_hashrate, format_uptime};
use cgminer_dashboard::{DashboardError, DashboardSession, MiningConfiguration, ResourceEnvelope};
use clap::Parser;
use std::sync::Arc;
use tracing::{error, info, warn};

/// 系统资源使用率告警阈值（百分比）
const SYSTEM_USAGE_WARN_PERCENT: f64 = 90.0;

#[tokio::main]
async fn main() {
    // 解析命令行参数
    let args = Args::parse();

    // 加载配置
    let mut config = match DashboardConfig::load_or_default(&args.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Failed to load config: {:#}", e);
            std::process::exit(1);
        }
    };
    config.apply_overrides(std::env::var(BACKEND_URL_ENV).ok(), args.backend_url.clone());

    // 初始化日志系统
    let _guard = match init_logging(config.log_config(args.log_level.as_deref())) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = config.validate() {
        error!("❌ Invalid configuration: {:#}", e);
        std::process::exit(1);
    }

    if let Err(e) = run(args.command, config).await {
        error!("❌ {:#}", e);
        std::process::exit(1);
    }
}

async fn run(command: Command, config: DashboardConfig) -> Result<()> {
    match command {
        Command::Watch => watch(&config).await,
        Command::Status => status(&config).await,
        Command::Capabilities => capabilities(&config).await,
        Command::Start(start) => start_mining(&config, &start).await,
        Command::Stop => stop_mining(&config).await,
    }
}

fn backend(config: &DashboardConfig) -> Result<Arc<dyn BackendApi>> {
    let backend = HttpBackend::with_timeout(&config.backend.base_url, config.poll_timeout())
        .context("Failed to create backend client")?;
    Ok(Arc::new(backend))
}

async fn watch(config: &DashboardConfig) -> Result<()> {
    info!("🚀 Starting CGMiner Dashboard v{}", env!("CARGO_PKG_VERSION"));
    let session = DashboardSession::connect(config)?;

    if let Err(e) = session.refresh_capabilities().await {
        warn!("Capability report unavailable: {}", e);
    }

    let mut connection = session.connection_state();
    let mut status = session.mining_status();
    let mut system = session.system_snapshot();

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    error!("Error waiting for signal: {}", e);
                }
                info!("🛑 Received shutdown signal");
                break;
            }
            changed = connection.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = *connection.borrow_and_update();
                if state.is_connected() {
                    info!("🔌 Push channel: {}", state);
                } else {
                    warn!("🔌 Push channel: {}", state);
                }
            }
            Some(latest) = status.changed() => {
                info!(
                    "⛏️  mining={} hashrate={} accepted={} rejected={} ({:.2}%) uptime={}",
                    latest.is_mining,
                    format_hashrate(latest.hashrate),
                    latest.accepted_shares,
                    latest.rejected_shares,
                    latest.get_reject_rate(),
                    format_uptime(latest.uptime_seconds)
                );
            }
            Some(latest) = system.changed() => {
                if latest.exceeds(SYSTEM_USAGE_WARN_PERCENT) {
                    warn!("⚠️  System usage above {:.0}%", SYSTEM_USAGE_WARN_PERCENT);
                }
                info!(
                    "🖥️  cpu={:.1}% mem={:.1}% disk={:.1}%",
                    latest.cpu_usage_percent, latest.memory_usage_percent, latest.disk_usage_percent
                );
            }
        }
    }

    session.dispose();
    info!("👋 Dashboard session closed");
    Ok(())
}

async fn status(config: &DashboardConfig) -> Result<()> {
    let backend = backend(config)?;

    match backend.health().await {
        Ok(health) => println!(
            "Backend: {} (database: {})",
            if health.is_healthy() { "healthy" } else { "degraded" },
            health.database.as_deref().unwrap_or("unknown")
        ),
        Err(e) => println!("Backend: unreachable ({})", e),
    }

    let poller = SnapshotPoller::with_timeout(backend, config.poll_interval(), config.poll_timeout());
    let report = poller.poll().await;

    match report.status {
        Ok(status) => {
            println!("Mining:   {}", if status.is_mining { "running" } else { "stopped" });
            println!("Hashrate: {}", format_hashrate(status.hashrate));
            println!(
                "Shares:   {} accepted / {} rejected ({:.2}% accepted)",
                status.accepted_shares,
                status.rejected_shares,
                status.get_accept_rate()
            );
            println!("Blocks:   {}", status.blocks_found);
            println!("Uptime:   {}", format_uptime(status.uptime_seconds));
        }
        Err(e) => println!("Mining:   unavailable ({})", e),
    }

    match report.system {
        Ok(system) => println!(
            "System:   cpu {:.1}%, memory {:.1}%, disk {:.1}% at {}",
            system.cpu_usage_percent, system.memory_usage_percent, system.disk_usage_percent, system.timestamp
        ),
        Err(e) => println!("System:   unavailable ({})", e),
    }

    Ok(())
}

async fn capabilities(config: &DashboardConfig) -> Result<()> {
    let backend = backend(config)?;
    let report = backend.cpu_info().await.context("Failed to fetch capability report")?;
    let envelope = ResourceEnvelope::normalize(&report);

    println!("Logical cores:    {}", envelope.logical_cores());
    println!("Max safe threads: {}", envelope.max_safe_threads());
    println!("Total memory:     {:.1} GB", envelope.total_memory_gb());
    for preset in envelope.presets() {
        println!("  {:<13} {}", preset.name(), preset.threads);
    }

    Ok(())
}

async fn start_mining(config: &DashboardConfig, start: &StartArgs) -> Result<()> {
    let session = DashboardSession::connect(config)?;

    let mut draft: MiningConfiguration = start.to_configuration();
    match session.refresh_capabilities().await {
        Ok(envelope) => {
            draft = match start.profile {
                Some(profile) if start.threads.is_none() => draft.with_profile(profile, &envelope),
                _ => draft.with_suggested_threads(&envelope),
            };
        }
        Err(e) => warn!("Capability report unavailable, thread bounds not checked: {}", e),
    }

    let result = session.dispatch(DispatchCommand::Start, &draft).await;
    session.dispose();

    match result {
        Ok(outcome) => {
            info!("✅ {}", outcome.message);
            Ok(())
        }
        Err(DashboardError::Dispatch(e)) => {
            for problem in e.problems() {
                error!("  - {}", problem);
            }
            anyhow::bail!("Start rejected")
        }
        Err(e) => Err(e.into()),
    }
}

async fn stop_mining(config: &DashboardConfig) -> Result<()> {
    let session = DashboardSession::connect(config)?;
    let result = session
        .dispatch(DispatchCommand::Stop, &MiningConfiguration::default())
        .await;
    session.dispose();

    let outcome = result.context("Stop failed")?;
    info!("✅ {}", outcome.message);
    Ok(())
}
