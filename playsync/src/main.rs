use anyhow::{Context, Result};
use clap::Parser;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::info;

use playsync_coordinator::logging::{init_logging, init_logging_from_env, LoggingMode};
use playsync_coordinator::{CoordinatorConfig, SyncCoordinator};
use ws_server::{run_event_loop, ServerConfig, SyncServer};

/// Playback synchronization server
///
/// Accepts WebSocket connections from displays and controllers on `/ws` and
/// keeps every display playing the same thing at the same moment.
#[derive(Parser, Debug)]
#[command(name = "playsync")]
#[command(about = "Playback synchronization server for displays and remote controllers")]
#[command(version)]
pub struct Args {
    /// Port to listen on
    #[arg(short, long, default_value = "3000")]
    pub port: u16,

    /// Address to bind
    #[arg(long, default_value = "0.0.0.0")]
    pub host: IpAddr,

    /// Comma-separated origins allowed to connect, or * for any
    #[arg(long, default_value = "*")]
    pub allowed_origins: String,

    /// Seconds a dropped endpoint is held for reconnection
    #[arg(short = 'g', long, default_value = "30")]
    pub grace_period: u64,

    /// Seconds between pings on each connection
    #[arg(long, default_value = "25")]
    pub heartbeat_interval: u64,

    /// Seconds to wait for traffic after a ping
    #[arg(long, default_value = "10")]
    pub heartbeat_timeout: u64,

    /// Seconds of silence before a connection is dropped
    #[arg(long, default_value = "60")]
    pub inactive_timeout: u64,

    /// Disable per-connection heartbeats (the inactivity sweep still runs)
    #[arg(long)]
    pub no_heartbeat: bool,

    /// Logging mode (silent, development, debug, json); PLAYSYNC_LOG_MODE when unset
    #[arg(long)]
    pub log_mode: Option<String>,
}

impl Args {
    /// Origins as a list, with blanks removed
    pub fn origins(&self) -> Vec<String> {
        self.allowed_origins
            .split(',')
            .map(str::trim)
            .filter(|o| !o.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// Validate command line arguments
    pub fn validate(&self) -> Result<()> {
        if self.origins().is_empty() {
            return Err(anyhow::anyhow!("At least one allowed origin is required"));
        }

        if let Some(mode) = &self.log_mode {
            if LoggingMode::parse(mode).is_none() {
                return Err(anyhow::anyhow!(
                    "Invalid log mode '{}'. Valid modes: silent, development, debug, json",
                    mode
                ));
            }
        }

        Ok(())
    }
}

/// Configuration derived from command line arguments and environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub coordinator: CoordinatorConfig,
    pub log_mode: Option<LoggingMode>,
}

impl TryFrom<Args> for Config {
    type Error = anyhow::Error;

    fn try_from(args: Args) -> Result<Self> {
        args.validate()?;

        let server = ServerConfig::default()
            .with_bind_addr(SocketAddr::new(args.host, args.port))
            .with_allowed_origins(args.origins());
        server.validate().context("Invalid server configuration")?;

        let mut coordinator = CoordinatorConfig::default()
            .with_grace_period(Duration::from_secs(args.grace_period))
            .with_heartbeat(
                Duration::from_secs(args.heartbeat_interval),
                Duration::from_secs(args.heartbeat_timeout),
            )
            .with_inactive_timeout(Duration::from_secs(args.inactive_timeout));
        coordinator.enable_heartbeat = !args.no_heartbeat;
        coordinator
            .validate()
            .context("Invalid coordinator configuration")?;

        Ok(Self {
            server,
            coordinator,
            log_mode: args.log_mode.as_deref().and_then(LoggingMode::parse),
        })
    }
}

impl Config {
    /// Create configuration from command line arguments and environment variables
    pub fn from_env() -> Result<Self> {
        let mut args = Args::parse();

        // Override with environment variables if present
        if let Ok(port) = std::env::var("PORT") {
            args.port = port.parse().context("Invalid PORT environment variable")?;
        }

        if let Ok(origins) = std::env::var("PLAYSYNC_ALLOWED_ORIGINS") {
            args.allowed_origins = origins;
        }

        if let Ok(grace) = std::env::var("PLAYSYNC_GRACE_PERIOD_SECS") {
            args.grace_period = grace
                .parse()
                .context("Invalid PLAYSYNC_GRACE_PERIOD_SECS environment variable")?;
        }

        Config::try_from(args)
    }

    pub fn print_summary(&self) {
        info!("Configuration:");
        info!("  Bind address: {}", self.server.bind_addr);
        info!("  Allowed origins: {}", self.server.allowed_origins.join(", "));
        info!("  Grace period: {}s", self.coordinator.grace_period.as_secs());
        if self.coordinator.enable_heartbeat {
            info!(
                "  Heartbeat: every {}s, timeout {}s",
                self.coordinator.heartbeat_interval.as_secs(),
                self.coordinator.heartbeat_timeout.as_secs()
            );
        } else {
            info!("  Heartbeat: disabled");
        }
        info!("  Inactivity timeout: {}s", self.coordinator.inactive_timeout.as_secs());
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;

    match config.log_mode {
        Some(mode) => init_logging(mode)?,
        None => init_logging_from_env()?,
    }
    config.print_summary();

    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let server = SyncServer::start(config.server.clone(), event_tx)
        .await
        .context("Failed to start WebSocket server")?;

    let coordinator = SyncCoordinator::new(config.coordinator.clone(), server.transport())
        .context("Failed to create coordinator")?;
    let sweep = coordinator.spawn_liveness_sweep();
    let pump = tokio::spawn(run_event_loop(coordinator.clone(), event_rx));

    info!(addr = %server.local_addr(), "playsync ready on ws://{}/ws", server.local_addr());

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutdown requested");

    server
        .shutdown()
        .await
        .context("Failed to stop WebSocket server")?;
    coordinator.shutdown();
    sweep.abort();
    pump.abort();

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn parse(args: &[&str]) -> Args {
        Args::try_parse_from(std::iter::once("playsync").chain(args.iter().copied()))
            .expect("arguments should parse")
    }

    #[test]
    fn test_defaults() {
        let config = Config::try_from(parse(&[])).unwrap();

        assert_eq!(config.server.bind_addr.port(), 3000);
        assert_eq!(config.server.allowed_origins, vec!["*".to_string()]);
        assert_eq!(config.coordinator.grace_period, Duration::from_secs(30));
        assert!(config.coordinator.enable_heartbeat);
        assert_eq!(config.log_mode, None);
    }

    #[test]
    fn test_flags() {
        let config = Config::try_from(parse(&[
            "--port",
            "4100",
            "--allowed-origins",
            "https://a.example, https://b.example",
            "--grace-period",
            "5",
            "--no-heartbeat",
            "--log-mode",
            "json",
        ]))
        .unwrap();

        assert_eq!(config.server.bind_addr.port(), 4100);
        assert_eq!(config.server.allowed_origins.len(), 2);
        assert_eq!(config.coordinator.grace_period, Duration::from_secs(5));
        assert!(!config.coordinator.enable_heartbeat);
        assert_eq!(config.log_mode, Some(LoggingMode::Json));
    }

    #[rstest]
    #[case::no_origins(&["--allowed-origins", " , "])]
    #[case::bad_log_mode(&["--log-mode", "loud"])]
    #[case::timeout_not_below_interval(&["--heartbeat-interval", "10", "--heartbeat-timeout", "10"])]
    #[case::inactive_below_timeout(&["--inactive-timeout", "5"])]
    fn test_invalid_arguments(#[case] args: &[&str]) {
        assert!(Config::try_from(parse(args)).is_err());
    }
}
