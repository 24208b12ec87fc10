// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! dn - distributed network scanner

mod display;
mod setup;

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use dn_agent::Agent;
use dn_core::{AgentConfig, CommonConfig, Config, ServerConfig};
use dn_engine::{snapshot, Context};
use dn_server::Server;

#[derive(Parser)]
#[command(
    name = "dn",
    version,
    about = "dragnet - a coordinator that spreads an nmap scan across a fleet of agents"
)]
struct Cli {
    /// Workspace directory holding config, state, and reports
    #[arg(long, value_name = "DIR")]
    name: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a fresh workspace: config templates and a self-signed
    /// certificate pair
    Config(setup::ConfigArgs),
    /// Run as the scan coordinator
    Srv {
        /// Config file path within the workspace
        #[arg(long)]
        config: PathBuf,
        /// Address to bind the listener to
        #[arg(short = 'b', default_value = "0.0.0.0")]
        bind: String,
        /// Listener port
        #[arg(short = 'p', long, default_value_t = 2040)]
        port: u16,
        /// Target list: one IPv4 address, CIDR block, or a.b.c.d-e range
        /// per line
        targets: PathBuf,
    },
    /// Run as a worker agent
    Agent {
        /// Config file path within the workspace
        #[arg(long)]
        config: PathBuf,
        /// Coordinator host
        #[arg(short = 's')]
        server: String,
        /// Coordinator port
        #[arg(short = 'p', long, default_value_t = 2040)]
        port: u16,
    },
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Config(args) => setup::create_workspace(&cli.name, &args).await,
        Commands::Srv {
            config,
            bind,
            port,
            targets,
        } => {
            let config =
                Config::Server(ServerConfig::load(&cli.name, &config, bind, port, targets)?);
            let _guard = init_logging(config.common())?;
            launch(config).await
        }
        Commands::Agent {
            config,
            server,
            port,
        } => {
            let config = Config::Agent(AgentConfig::load(&cli.name, &config, server, port)?);
            let _guard = init_logging(config.common())?;
            launch(config).await
        }
    }
}

async fn launch(config: Config) -> Result<()> {
    let terminate = CancellationToken::new();
    spawn_signal_handler(terminate.clone());
    match config {
        Config::Server(cfg) => run_server(cfg, terminate).await,
        Config::Agent(cfg) => run_agent(cfg, terminate).await,
    }
}

async fn run_server(cfg: ServerConfig, terminate: CancellationToken) -> Result<()> {
    let ctx = if snapshot::resumable(&cfg.snapshot_path) {
        info!(path = %cfg.snapshot_path.display(), "resuming interrupted scan");
        Context::restore(&cfg.snapshot_path)?
    } else {
        let raw = std::fs::read_to_string(&cfg.targets)
            .with_context(|| format!("failed to read targets {}", cfg.targets.display()))?;
        let targets: Vec<String> = raw
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect();
        dn_engine::TargetOptimizer::new(&cfg.queue_path)
            .save(&targets)
            .context("target optimization failed")?;
        Context::new(&cfg)
    };
    let shared = ctx.into_shared();

    let display = tokio::spawn(display::show_loop(
        Arc::clone(&shared),
        terminate.clone(),
    ));

    let server = Server::new(cfg.clone(), Arc::clone(&shared), terminate.clone());
    server.run().await?;
    terminate.cancel();
    let _ = display.await;

    let mut ctx = shared.lock();
    if ctx.is_finished() {
        info!("scan finished cleanly");
        // A stale snapshot would turn the next run into a no-op resume.
        let _ = std::fs::remove_file(&cfg.snapshot_path);
    } else {
        ctx.snapshot(&cfg.snapshot_path)
            .context("failed to write snapshot")?;
        info!(path = %cfg.snapshot_path.display(), "snapshot written, scan can be resumed");
    }
    Ok(())
}

async fn run_agent(cfg: AgentConfig, terminate: CancellationToken) -> Result<()> {
    let mut agent = Agent::new(cfg, terminate);
    agent.run().await.context("agent failed")?;
    Ok(())
}

/// Cancel the terminate token on SIGINT or SIGTERM.
fn spawn_signal_handler(terminate: CancellationToken) {
    tokio::spawn(async move {
        use tokio::signal::unix::{signal, SignalKind};
        let ctrl_c = tokio::signal::ctrl_c();
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(_) => {
                let _ = ctrl_c.await;
            }
        }
        info!("shutdown requested");
        terminate.cancel();
    });
}

/// Log to `dragnet-<timestamp>.log` inside the workspace; stdout stays
/// reserved for the status display.
fn init_logging(common: &CommonConfig) -> Result<tracing_appender::non_blocking::WorkerGuard> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    std::fs::create_dir_all(&common.workspace)?;
    let filename = format!(
        "dragnet-{}.log",
        chrono::Local::now().format("%b-%d-%Y-%H-%M")
    );
    let appender = tracing_appender::rolling::never(&common.workspace, filename);
    let (non_blocking, guard) = tracing_appender::non_blocking(appender);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
        .init();

    Ok(guard)
}
