use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use us8k_classifier::config::AppConfig;
use us8k_classifier::context::ServiceContext;
use us8k_classifier::http::{run_http_server, HttpState};

#[derive(Parser, Debug)]
#[command(name = "us8k_server", about = "Urban sound prediction service")]
struct Cli {
    /// JSON configuration file (defaults to $US8K_CONFIG or config/us8k.json)
    #[arg(long)]
    config: Option<PathBuf>,
    /// Listen address, overriding service.bind_addr
    #[arg(long)]
    bind: Option<String>,
    /// Enable debug logging
    #[arg(long, short)]
    verbose: bool,
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::from(0),
        Err(err) => {
            eprintln!("Error: {err:?}");
            ExitCode::from(1)
        }
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    us8k_classifier::init_logging(cli.verbose);

    let mut config = match &cli.config {
        Some(path) => {
            let mut config = AppConfig::load_from_file(path);
            config.apply_env_overrides();
            config
        }
        None => AppConfig::load(),
    };
    if let Some(bind) = cli.bind {
        config.service.bind_addr = bind;
    }
    if let Err(reason) = config.validate() {
        bail!("invalid configuration: {}", reason);
    }

    let addr: SocketAddr = config
        .service
        .bind_addr
        .parse()
        .with_context(|| format!("parsing bind address {}", config.service.bind_addr))?;

    let context = Arc::new(ServiceContext::new(config));
    let state = context.try_initial_load();
    log::info!("[Service] Initial state: {:?}", state);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("building tokio runtime")?;

    runtime.block_on(run_http_server(HttpState::new(context), addr, async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            log::error!("[Service] Failed to listen for Ctrl-C: {}", err);
            std::future::pending::<()>().await;
        }
        log::info!("[Service] Shutting down");
    }))
}
