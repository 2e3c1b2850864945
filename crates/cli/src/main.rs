//! `kahoy`: apply raw Kubernetes manifests declaratively.

#![forbid(unsafe_code)]

use std::path::PathBuf;
use std::process::ExitCode;
use std::str::FromStr;

use anyhow::Result;
use clap::{ArgAction, Parser, Subcommand};
use kahoy_core::config::AppConfig;
use kahoy_core::error_kind;
use tokio::signal;
use tracing::{error, info, warn};

mod apply;

pub const DEFAULT_CONFIG_FILE: &str = "kahoy.yml";

#[derive(Parser, Debug)]
#[command(name = "kahoy", version, about = "Declarative deployer for raw Kubernetes manifests")]
struct Cli {
    /// Debug logging
    #[arg(long = "debug", global = true, env = "KAHOY_DEBUG", action = ArgAction::SetTrue)]
    debug: bool,

    /// Disable logging
    #[arg(long = "no-log", global = true, env = "KAHOY_NO_LOG", action = ArgAction::SetTrue)]
    no_log: bool,

    /// App config file (default: kahoy.yml, optional)
    #[arg(short = 'c', long = "config-file", global = true, env = "KAHOY_CONFIG_FILE")]
    config_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Plan and apply the difference between the old and new manifests
    Apply(apply::ApplyArgs),
    /// Print the version
    Version,
}

fn init_tracing(debug: bool, no_log: bool) {
    let default = if no_log {
        "off"
    } else if debug {
        "debug"
    } else {
        "info"
    };
    let env = std::env::var("KAHOY_LOG").unwrap_or_else(|_| default.to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("KAHOY_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            warn!(addr = %addr, "invalid KAHOY_METRICS_ADDR; expected host:port");
        }
    }
}

fn load_config(path: Option<PathBuf>) -> Result<AppConfig> {
    match path {
        Some(p) => AppConfig::load(&p, true),
        None => AppConfig::load(std::path::Path::new(DEFAULT_CONFIG_FILE), false),
    }
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Version => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Commands::Apply(args) => {
            let app_config = load_config(cli.config_file)?;
            tokio::select! {
                res = apply::run(args, app_config) => res,
                _ = signal::ctrl_c() => {
                    warn!("Ctrl-C received; stopping run");
                    anyhow::bail!("interrupted")
                }
            }
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.debug, cli.no_log);
    init_metrics();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = ?e, kind = ?error_kind(&e), "kahoy failed");
            ExitCode::FAILURE
        }
    }
}
