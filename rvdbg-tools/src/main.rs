mod config;
mod logging;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use rvdbg::config::LogLevel;
use rvdbg::{Acceptor, DebugSessionUnit, SimulatedPlatform};

use crate::config::{load_config, parse_log_level, Config, ProtocolArg, ServerOverrides};
use crate::logging::setup_logging;

/// How often the main thread checks for a shutdown request.
const SHUTDOWN_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(clap::Parser)]
#[clap(
    name = "rvdbg-server",
    about = "Serve simulated RISC-V harts to debuggers over TCP",
    version
)]
struct Cli {
    /// Configuration file, merged over `rvdbg.{toml,json,yaml}` in `.` and the home directory.
    #[clap(long, short, value_name = "PATH")]
    config: Option<PathBuf>,

    /// IPv4 address of the first endpoint.
    #[clap(long)]
    host_ip: Option<String>,

    /// Port of the first endpoint.
    #[clap(long, short)]
    port: Option<u16>,

    /// Protocol of the first endpoint.
    #[clap(long, value_enum)]
    protocol: Option<ProtocolArg>,

    /// Log level of the console and of the first endpoint's sessions.
    #[clap(long, value_parser = parse_log_level, help_heading = "LOG CONFIGURATION")]
    log_level: Option<LogLevel>,

    /// Location for log file
    #[clap(long, help_heading = "LOG CONFIGURATION")]
    log_file: Option<PathBuf>,
}

impl Cli {
    fn overrides(&self) -> ServerOverrides {
        ServerOverrides {
            host_ip: self.host_ip.clone(),
            port: self.port,
            protocol: self.protocol,
            log_level: self.log_level,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let _logger_guard = setup_logging(cli.log_file.as_deref(), cli.log_level)?;

    let mut config = load_config(cli.config.as_deref()).context("Failed to load configuration.")?;
    cli.overrides().apply(&mut config);

    serve(config)
}

fn serve(config: Config) -> Result<()> {
    let platform = Arc::new(
        SimulatedPlatform::new(&config.dsu.harts).context("Failed to start the simulated harts.")?,
    );
    let dsu = DebugSessionUnit::from_config(platform.clone(), &config.dsu);

    let mut acceptors = Vec::with_capacity(config.servers.len());
    for server in config.servers {
        let port = server.host_port;
        let mut acceptor = Acceptor::new(server, dsu.clone());
        acceptor
            .start()
            .with_context(|| format!("Failed to start the endpoint on port {port}."))?;
        acceptors.push(acceptor);
    }

    anyhow::ensure!(
        acceptors.iter().any(Acceptor::is_running),
        "No endpoint is enabled."
    );

    let shutdown = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(signal_hook::consts::SIGINT, shutdown.clone())?;
    signal_hook::flag::register(signal_hook::consts::SIGTERM, shutdown.clone())?;

    while !shutdown.load(Ordering::Relaxed) {
        if !acceptors.iter().any(Acceptor::is_running) {
            tracing::error!("All endpoints stopped");
            break;
        }
        std::thread::sleep(SHUTDOWN_POLL_INTERVAL);
    }

    tracing::info!("Shutting down");
    for acceptor in &mut acceptors {
        acceptor.stop();
    }
    drop(acceptors);
    drop(dsu);

    match Arc::try_unwrap(platform) {
        Ok(platform) => platform.shutdown(),
        Err(_) => tracing::warn!("Simulated harts are still in use, not waiting for them"),
    }

    Ok(())
}
