//! claw-usaged - Clawbernetes GPU usage reporting daemon
//!
//! Aggregates GPU task records into usage statistics and pushes daily,
//! weekly, monthly and yearly reports, catching up on any missed while the
//! daemon was down.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use claw_reports::{JsonMarkerStore, ReportKind, ReportScheduler, ReportingConfig, SchedulerSettings};
use claw_usage::{JsonLinesTaskSource, SystemClock, TaskFilter, TimePeriod, UsageService};
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const DEFAULT_CONFIG: &str = "/etc/claw-usaged/config.toml";

#[derive(Parser)]
#[command(name = "claw-usaged")]
#[command(about = "Clawbernetes GPU usage reporting daemon")]
#[command(version)]
struct Cli {
    /// Emit logs as JSON
    #[arg(long, global = true, env = "CLAW_USAGED_LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the reporting daemon
    Run {
        /// Path to config file
        #[arg(short, long, default_value = DEFAULT_CONFIG)]
        config: PathBuf,
    },

    /// Push pending reports of one kind now
    Push {
        /// Report kind (daily, weekly, monthly, yearly)
        kind: ReportKind,

        /// Path to config file
        #[arg(short, long, default_value = DEFAULT_CONFIG)]
        config: PathBuf,
    },

    /// Push every missed report of every enabled kind
    CatchUp {
        /// Path to config file
        #[arg(short, long, default_value = DEFAULT_CONFIG)]
        config: PathBuf,
    },

    /// Print usage statistics as JSON
    Stats {
        /// Look-back period (one_day, one_week, one_month, six_month, one_year, three_year, all)
        #[arg(short, long, default_value = "one_day")]
        period: TimePeriod,

        /// Only include this user
        #[arg(long)]
        user: Option<String>,

        /// Only include this machine
        #[arg(long)]
        machine: Option<String>,

        /// Path to config file
        #[arg(short, long, default_value = DEFAULT_CONFIG)]
        config: PathBuf,
    },

    /// Generate a sample config file
    InitConfig {
        /// Path to write config
        #[arg(short, long, default_value = DEFAULT_CONFIG)]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json)?;

    match cli.command {
        Commands::Run { config } => {
            run_daemon(&config).await?;
        }

        Commands::Push { kind, config } => {
            push(&config, kind).await?;
        }

        Commands::CatchUp { config } => {
            catch_up(&config).await?;
        }

        Commands::Stats {
            period,
            user,
            machine,
            config,
        } => {
            stats(&config, period, user, machine)?;
        }

        Commands::InitConfig { output } => {
            init_config(&output)?;
        }
    }

    Ok(())
}

fn init_tracing(json: bool) -> anyhow::Result<()> {
    let filter = EnvFilter::from_default_env()
        .add_directive("claw_usaged=info".parse()?)
        .add_directive("claw_usage=info".parse()?)
        .add_directive("claw_reports=info".parse()?);

    if json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer())
            .with(filter)
            .init();
    }
    Ok(())
}

fn usage_service(config: &ReportingConfig) -> anyhow::Result<Arc<UsageService>> {
    let source = JsonLinesTaskSource::new(&config.records_path);
    Ok(Arc::new(UsageService::new(
        Arc::new(source),
        Arc::new(SystemClock),
        config.usage_settings()?,
    )))
}

fn build_scheduler(config: &ReportingConfig) -> anyhow::Result<Arc<ReportScheduler>> {
    let usage = usage_service(config)?;
    let channel = config.channels.build()?;
    let markers = JsonMarkerStore::in_dir(&config.state_path);
    info!(
        records = %config.records_path.display(),
        markers = %markers.path().display(),
        enabled = ?config.enabled_kinds,
        "scheduler ready"
    );
    Ok(Arc::new(ReportScheduler::new(
        usage,
        Arc::new(channel),
        Arc::new(markers),
        SchedulerSettings::from_config(config)?,
    )))
}

fn load_config(path: &Path) -> anyhow::Result<ReportingConfig> {
    let config = ReportingConfig::from_file(path)?;
    info!(
        config = %path.display(),
        reset_hour = config.reset_hour,
        utc_offset_hours = config.utc_offset_hours,
        missing_check_hour = config.missing_check_hour,
        "loaded config"
    );
    Ok(config)
}

async fn run_daemon(config_path: &Path) -> anyhow::Result<()> {
    info!(config = %config_path.display(), "starting claw-usaged");

    let config = load_config(config_path)?;
    let scheduler = build_scheduler(&config)?;

    run_catch_up(Arc::clone(&scheduler)).await?;

    let mut tick = tokio::time::interval(Duration::from_secs(config.tick_interval_secs));
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut refresh = tokio::time::interval(Duration::from_secs(config.cache_refresh_secs));
    refresh.set_missed_tick_behavior(MissedTickBehavior::Delay);

    // Both intervals fire immediately; catch-up already covered that.
    tick.tick().await;
    refresh.tick().await;

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = tick.tick() => {
                run_tick(Arc::clone(&scheduler)).await;
            }
            _ = refresh.tick() => {
                let scheduler = Arc::clone(&scheduler);
                if let Err(e) = tokio::task::spawn_blocking(move || scheduler.update_statistics_cache()).await {
                    error!(error = %e, "cache refresh task failed");
                }
            }
            result = &mut shutdown => {
                if let Err(e) = result {
                    error!(error = %e, "failed to listen for shutdown signal");
                }
                info!("shutting down");
                break;
            }
        }
    }

    Ok(())
}

async fn run_tick(scheduler: Arc<ReportScheduler>) {
    let result = tokio::task::spawn_blocking(move || {
        if let Some(report) = scheduler.run_missing_check_if_due() {
            for kind in report.failed_kinds() {
                warn!(kind = %kind, "missing-report check failed, will retry next tick");
            }
        }

        for kind in ReportKind::ALL {
            match scheduler.run_scheduled(kind) {
                Ok(outcome) if outcome.delivered() > 0 => {
                    info!(kind = %kind, delivered = outcome.delivered(), "scheduled reports pushed");
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(kind = %kind, error = %e, "scheduled push failed, will retry next tick");
                }
            }
        }
    })
    .await;

    if let Err(e) = result {
        error!(error = %e, "scheduler tick failed");
    }
}

async fn run_catch_up(scheduler: Arc<ReportScheduler>) -> anyhow::Result<()> {
    let report = tokio::task::spawn_blocking(move || scheduler.check_and_push_missing_reports()).await?;
    for (kind, outcome) in &report.outcomes {
        if let Err(e) = outcome {
            error!(kind = %kind, error = %e, "catch-up stopped");
        }
    }
    Ok(())
}

async fn push(config_path: &Path, kind: ReportKind) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let scheduler = build_scheduler(&config)?;
    let outcome = tokio::task::spawn_blocking(move || scheduler.push_now(kind)).await??;
    println!("{kind}: {} report(s) delivered", outcome.delivered());
    Ok(())
}

async fn catch_up(config_path: &Path) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let scheduler = build_scheduler(&config)?;
    let report = tokio::task::spawn_blocking(move || scheduler.check_and_push_missing_reports()).await?;

    for (kind, outcome) in &report.outcomes {
        match outcome {
            Ok(outcome) => println!("{kind}: {} report(s) delivered", outcome.delivered()),
            Err(e) => println!("{kind}: failed: {e}"),
        }
    }

    if !report.is_success() {
        anyhow::bail!("catch-up failed for {:?}", report.failed_kinds());
    }
    Ok(())
}

fn stats(
    config_path: &Path,
    period: TimePeriod,
    user: Option<String>,
    machine: Option<String>,
) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let usage = usage_service(&config)?;

    let mut filter = TaskFilter::all();
    if let Some(user) = user {
        filter = filter.user(user);
    }
    if let Some(machine) = machine {
        filter = filter.machine(machine);
    }

    let stats = usage.statistics(period, filter)?;
    println!("{}", serde_json::to_string_pretty(&*stats.result)?);
    Ok(())
}

fn init_config(output: &Path) -> anyhow::Result<()> {
    let config = ReportingConfig::default();

    if let Some(parent) = output.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(output, config.to_toml()?)?;

    println!("Config written to {}", output.display());
    println!();
    println!("Edit records_path and the webhooks, then run:");
    println!("  claw-usaged run --config {}", output.display());

    Ok(())
}
