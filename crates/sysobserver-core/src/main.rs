//! sysobserver CLI
//!
//! Command-line interface for the sysobserver resource watcher.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::{error, info, warn};

use sysobserver::alerting::{build_sink, render_announcement, render_report};
use sysobserver::api::{AppState, HttpServer};
use sysobserver::collector::{HostProbe, SystemInfo};
use sysobserver::config::{log_source, LogFormat, LoggingConfig};
use sysobserver::observer::{build_metrics, Observer, ObserverContext};
use sysobserver::Config;

/// sysobserver - resource pressure notifications for a single machine
#[derive(Parser)]
#[command(name = "sysobserver")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true, env = "SYSOBSERVER_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output format (for commands that support it)
    #[arg(long, global = true, default_value = "text")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the observer behind the HTTP control API
    Serve {
        /// Address to bind
        #[arg(long, env = "SYSOBSERVER_HOST")]
        host: Option<String>,

        /// Port to bind
        #[arg(long, env = "SYSOBSERVER_PORT")]
        port: Option<u16>,

        /// Start observing immediately
        #[arg(long)]
        start: bool,
    },

    /// Run a few cycles back to back and print the reports
    Check {
        /// Number of cycles
        #[arg(long, default_value = "1", value_parser = clap::value_parser!(u32).range(1..))]
        cycles: u32,

        /// Deliver the reports through the configured sink
        #[arg(long)]
        notify: bool,
    },

    /// Show a snapshot of this machine
    Info,

    /// Print the effective configuration
    Config,

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    // Parse CLI arguments
    let cli = Cli::parse();

    if let Commands::Completions { shell } = cli.command {
        generate_completions(shell);
        return ExitCode::SUCCESS;
    }

    let _ = dotenvy::dotenv();

    // Load configuration
    let (config, source) = match Config::load_with_source(cli.config.as_deref()) {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    // Initialize logging
    init_tracing(&config.logging, cli.verbose);
    log_source(source.as_deref());

    // Execute command
    let result = match cli.command {
        Commands::Serve { host, port, start } => run_serve(config, host, port, start).await,
        Commands::Check { cycles, notify } => run_check(config, cycles, notify, cli.format).await,
        Commands::Info => run_info(&config, cli.format).await,
        Commands::Config => run_config(&config),
        Commands::Completions { .. } => Ok(()),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(logging: &LoggingConfig, verbose: bool) {
    let level = if verbose { "debug" } else { logging.level.as_str() };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    match logging.format {
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
        LogFormat::Pretty => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }
}

async fn run_serve(
    mut config: Config,
    host: Option<String>,
    port: Option<u16>,
    start: bool,
) -> anyhow::Result<()> {
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }

    let prometheus = PrometheusBuilder::new()
        .install_recorder()
        .context("failed to install metrics recorder")?;

    let probe = HostProbe::new();
    let metrics = build_metrics(&config, &probe).await?;
    let context = ObserverContext::from_config(&config, metrics);
    let sink = build_sink(&config.notification, context.host())?;

    if config.observer.announce {
        let text = render_announcement(context.host(), &context.descriptors());
        if let Err(e) = sink.send(&text).await {
            warn!(sink = sink.name(), error = %e, "Announcement not delivered");
        }
    }

    let observer = Observer::spawn(context, sink, config.observer.notify_recovery);

    if start || config.observer.autostart {
        observer.start().await?;
    }

    let state = AppState::new(observer.clone(), probe)
        .with_gpu(config.discovery.gpu)
        .with_prometheus(prometheus);

    info!(
        host = observer.host(),
        metrics = observer.metrics().len(),
        "Starting sysobserver on http://{}",
        config.server.addr()
    );

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
        }
        info!("Shutting down...");
    };

    HttpServer::new(state)
        .serve(&config.server.addr(), shutdown)
        .await?;

    observer.shutdown().await?;
    Ok(())
}

async fn run_check(
    config: Config,
    cycles: u32,
    notify: bool,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let probe = HostProbe::new();
    let metrics = build_metrics(&config, &probe).await?;
    let mut context = ObserverContext::from_config(&config, metrics);
    let sink = if notify {
        Some(build_sink(&config.notification, context.host())?)
    } else {
        None
    };
    let include_recovery = config.observer.notify_recovery;

    let reports = context
        .run_checks(cycles, sink.as_deref(), include_recovery)
        .await;

    for report in &reports {
        let text = render_report(
            report,
            context.host(),
            &context.descriptors(),
            include_recovery,
        );

        match format {
            OutputFormat::Json => println!("{}", serde_json::to_string(report)?),
            OutputFormat::Text => {
                println!("Cycle {}: {}", report.cycle, report.decision.reason.as_str());
                for failure in &report.failures {
                    println!("  ! {} unavailable: {}", failure.metric_id, failure.reason);
                }
                if !text.is_empty() {
                    println!("{text}");
                }
            }
        }
    }

    if sink.is_some() {
        let stats = context.status(false, None).stats;
        if stats.delivery_failures > 0 {
            warn!(
                failed = stats.delivery_failures,
                sent = stats.notifications_sent,
                "Some notifications were not delivered"
            );
        }
    }

    if format == OutputFormat::Text {
        let status = context.status(false, None);
        for metric in status.metrics {
            println!(
                "{:<28} {:>5}  streak {}",
                metric.label,
                metric.last_level.map_or("-", |l| l.as_str()),
                metric.consecutive_exceed_count
            );
        }
    }

    Ok(())
}

async fn run_info(config: &Config, format: OutputFormat) -> anyhow::Result<()> {
    let info = SystemInfo::collect(&HostProbe::new(), config.discovery.gpu).await;
    match format {
        OutputFormat::Text => print!("{info}"),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&info)?),
    }
    Ok(())
}

fn run_config(config: &Config) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(config)?);
    Ok(())
}

fn generate_completions(shell: clap_complete::Shell) {
    use clap::CommandFactory;
    use clap_complete::generate;
    use std::io;

    let mut cmd = Cli::command();
    generate(shell, &mut cmd, "sysobserver", &mut io::stdout());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_cycles_default_to_one() {
        let cli = Cli::try_parse_from(["sysobserver", "check"]).unwrap();
        assert!(matches!(cli.command, Commands::Check { cycles: 1, notify: false }));

        let cli = Cli::try_parse_from(["sysobserver", "check", "--cycles", "3", "--notify"]).unwrap();
        assert!(matches!(cli.command, Commands::Check { cycles: 3, notify: true }));
    }

    #[test]
    fn test_check_rejects_zero_cycles() {
        let err = Cli::try_parse_from(["sysobserver", "check", "--cycles", "0"])
            .err()
            .unwrap();
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }
}
