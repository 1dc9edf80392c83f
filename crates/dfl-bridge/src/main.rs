//! DockForLife bridge: entry point.
//!
//! Connects to OBS on this machine and lets remote controllers operate it,
//! either through a relay service (paired by join code) or through a local
//! WebSocket endpoint.
//!
//! # Usage
//!
//! ```text
//! dfl-bridge [OPTIONS]
//!
//! Options:
//!   --listen <ADDR>              Direct-client bind address [default: 0.0.0.0]
//!   --port <PORT>                Direct-client port [default: 4456]
//!   --no-direct                  Disable the direct-client endpoint
//!   --obs-url <URL>              OBS WebSocket URL [default: ws://127.0.0.1:4455]
//!   --obs-password <PASSWORD>    OBS WebSocket password
//!   --relay-url <URL>            Relay service URL (relay disabled when absent)
//!   --code <CODE>                Join code (generated when absent)
//!   --log-level <LEVEL>          Log filter when RUST_LOG is unset [default: info]
//!   --reconnect-delay <SECS>     Pause between reconnect attempts [default: 5]
//!   --request-timeout <SECS>     OBS request deadline [default: 5]
//!   --heartbeat-interval <SECS>  Relay ping interval [default: 25]
//!   --config <PATH>              Optional TOML file with the same keys
//! ```
//!
//! # Where settings come from
//!
//! For every setting the first source that has a value wins:
//!
//! 1. the command-line flag,
//! 2. its `DFL_*` environment variable,
//! 3. the TOML file given by `--config`,
//! 4. the built-in default.
//!
//! | Variable                  | Flag                   |
//! |---------------------------|------------------------|
//! | `DFL_LISTEN`              | `--listen`             |
//! | `DFL_PORT`                | `--port`               |
//! | `DFL_NO_DIRECT`           | `--no-direct`          |
//! | `DFL_OBS_URL`             | `--obs-url`            |
//! | `DFL_OBS_PASSWORD`        | `--obs-password`       |
//! | `DFL_RELAY_URL`           | `--relay-url`          |
//! | `DFL_JOIN_CODE`           | `--code`               |
//! | `DFL_LOG_LEVEL`           | `--log-level`          |
//! | `DFL_RECONNECT_DELAY`     | `--reconnect-delay`    |
//! | `DFL_REQUEST_TIMEOUT`     | `--request-timeout`    |
//! | `DFL_HEARTBEAT_INTERVAL`  | `--heartbeat-interval` |
//! | `DFL_CONFIG`              | `--config`             |

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{bail, Context};
use clap::Parser;
use tokio::task::JoinSet;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use dfl_bridge::application::{CommandExecutor, EventPublisher, EventRouter};
use dfl_bridge::domain::config::{BridgeConfig, DEFAULT_DIRECT_PORT, DEFAULT_OBS_URL};
use dfl_bridge::infrastructure::config_file::{self, FileConfig};
use dfl_bridge::infrastructure::{
    run_server, ClientSettings, ObsClient, ObsClientOptions, RelayLink, RelayLinkOptions, Shutdown,
};
use dfl_core::{JoinCode, SceneCache};

// ── CLI argument definitions ──────────────────────────────────────────────────

/// DockForLife bridge.
///
/// Values are optional here so that the TOML file can fill the gap between
/// the environment and the built-in defaults; see [`Cli::into_bridge_config`].
#[derive(Debug, Default, Parser)]
#[command(
    name = "dfl-bridge",
    about = "Remote control bridge between OBS and DockForLife controllers",
    version
)]
struct Cli {
    /// IP address for the direct-client endpoint.
    ///
    /// `0.0.0.0` accepts clients from the LAN, `127.0.0.1` only local ones.
    #[arg(long, env = "DFL_LISTEN")]
    listen: Option<String>,

    /// TCP port for the direct-client endpoint.
    #[arg(long, env = "DFL_PORT")]
    port: Option<u16>,

    /// Do not open the direct-client endpoint.
    #[arg(long, env = "DFL_NO_DIRECT")]
    no_direct: bool,

    /// WebSocket URL of OBS.
    #[arg(long, env = "DFL_OBS_URL")]
    obs_url: Option<String>,

    /// Password configured in OBS → Tools → WebSocket Server Settings.
    #[arg(long, env = "DFL_OBS_PASSWORD", hide_env_values = true)]
    obs_password: Option<String>,

    /// Base URL of the relay service.  Without it only direct clients work.
    #[arg(long, env = "DFL_RELAY_URL")]
    relay_url: Option<String>,

    /// Join code to register with.  A random code is generated when absent.
    #[arg(long, env = "DFL_JOIN_CODE")]
    code: Option<String>,

    /// Log filter used when `RUST_LOG` is not set (e.g. `debug`).
    #[arg(long, env = "DFL_LOG_LEVEL")]
    log_level: Option<String>,

    /// Seconds to wait between reconnect attempts.
    #[arg(long, env = "DFL_RECONNECT_DELAY")]
    reconnect_delay: Option<u64>,

    /// Seconds to wait for one OBS response.
    #[arg(long, env = "DFL_REQUEST_TIMEOUT")]
    request_timeout: Option<u64>,

    /// Seconds between relay heartbeat pings.
    #[arg(long, env = "DFL_HEARTBEAT_INTERVAL")]
    heartbeat_interval: Option<u64>,

    /// Path of an optional TOML configuration file.
    #[arg(long, env = "DFL_CONFIG")]
    config: Option<PathBuf>,
}

impl Cli {
    /// The effective log filter: flag or env, then file, then `info`.
    fn log_level(&self, file: &FileConfig) -> String {
        self.log_level
            .clone()
            .or_else(|| file.log_level.clone())
            .unwrap_or_else(|| "info".to_string())
    }

    /// Merges the parsed arguments with `file` into a [`BridgeConfig`].
    ///
    /// # Errors
    ///
    /// Returns an error if the listen address is not an IP address, the join
    /// code is malformed, or a timing value is zero where that is not allowed.
    fn into_bridge_config(self, file: FileConfig) -> anyhow::Result<BridgeConfig> {
        let defaults = BridgeConfig::default();

        let direct_listen = if self.no_direct || file.no_direct.unwrap_or(false) {
            None
        } else {
            let listen = self
                .listen
                .or(file.listen)
                .unwrap_or_else(|| "0.0.0.0".to_string());
            let ip: IpAddr = listen
                .trim()
                .parse()
                .with_context(|| format!("invalid listen address: '{listen}'"))?;
            let port = self.port.or(file.port).unwrap_or(DEFAULT_DIRECT_PORT);
            Some(SocketAddr::new(ip, port))
        };

        let join_code = match self.code.or(file.code) {
            Some(code) => {
                JoinCode::parse(&code).with_context(|| format!("invalid join code: '{code}'"))?
            }
            None => defaults.join_code,
        };

        let request_timeout = seconds(self.request_timeout.or(file.request_timeout))
            .unwrap_or(defaults.request_timeout);
        if request_timeout.is_zero() {
            bail!("--request-timeout must be at least one second");
        }
        let heartbeat_interval = seconds(self.heartbeat_interval.or(file.heartbeat_interval))
            .unwrap_or(defaults.heartbeat_interval);
        if heartbeat_interval.is_zero() {
            bail!("--heartbeat-interval must be at least one second");
        }

        Ok(BridgeConfig {
            direct_listen,
            obs_url: non_empty(self.obs_url.or(file.obs_url))
                .unwrap_or_else(|| DEFAULT_OBS_URL.to_string()),
            obs_password: non_empty(self.obs_password.or(file.obs_password)),
            relay_url: non_empty(self.relay_url.or(file.relay_url)),
            join_code,
            reconnect_delay: seconds(self.reconnect_delay.or(file.reconnect_delay))
                .unwrap_or(defaults.reconnect_delay),
            request_timeout,
            heartbeat_interval,
            ..defaults
        })
    }
}

fn seconds(value: Option<u64>) -> Option<Duration> {
    value.map(Duration::from_secs)
}

/// Treats blank strings (e.g. `DFL_OBS_PASSWORD=`) as unset.
fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

// ── Entry point ───────────────────────────────────────────────────────────────

/// Program entry point.
///
/// # What happens at startup
///
/// 1. Flags are parsed and the optional TOML file is read.
/// 2. `tracing_subscriber` is initialised; `RUST_LOG` wins over
///    `--log-level`.
/// 3. The OBS client, executor and router are wired together.
/// 4. Three long-running tasks start: the OBS supervisor, the relay link
///    (if a relay URL is set) and the direct-client server (unless
///    `--no-direct`).
/// 5. Ctrl+C triggers the shared [`Shutdown`] signal; `main` returns once
///    every task has stopped.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let file = match &cli.config {
        Some(path) => config_file::load(path)?,
        None => FileConfig::default(),
    };

    // ── Logging setup ─────────────────────────────────────────────────────────
    let level = cli.log_level(&file);
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)),
        )
        .init();

    let config = Arc::new(cli.into_bridge_config(file)?);
    info!(
        obs = %config.obs_url,
        direct = ?config.direct_listen,
        relay = config.relay_url.is_some(),
        "DockForLife bridge starting"
    );

    // ── Wiring ────────────────────────────────────────────────────────────────
    let shutdown = Shutdown::new();
    let scenes = Arc::new(Mutex::new(SceneCache::new()));
    let events = EventPublisher::default();
    let obs = Arc::new(ObsClient::new(
        ObsClientOptions::from(config.as_ref()),
        Arc::clone(&scenes),
        events.clone(),
    ));
    let executor = Arc::new(CommandExecutor::new(obs.clone(), scenes));
    let router = Arc::new(EventRouter::new(executor, events));

    let mut tasks: JoinSet<anyhow::Result<()>> = JoinSet::new();

    tasks.spawn({
        let shutdown = shutdown.clone();
        async move {
            obs.run(shutdown).await;
            Ok(())
        }
    });

    match RelayLinkOptions::from_config(&config) {
        Some(options) => {
            info!(code = %options.code, "join code for remote controllers: {}", options.code);
            let relay = Arc::new(RelayLink::new(options, Arc::clone(&router)));
            let shutdown = shutdown.clone();
            tasks.spawn(async move {
                relay.run(shutdown).await;
                Ok(())
            });
        }
        None => info!("relay disabled; set --relay-url to enable remote control"),
    }

    if let Some(addr) = config.direct_listen {
        let settings = ClientSettings::from(config.as_ref());
        tasks.spawn(run_server(addr, Arc::clone(&router), settings, shutdown.clone()));
    }

    // ── Graceful shutdown ─────────────────────────────────────────────────────
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("received Ctrl+C; shutting down");
                    shutdown.trigger();
                }
                Err(e) => error!("failed to listen for Ctrl+C signal: {e}"),
            }
        }
    });

    let mut failure = None;
    while let Some(joined) = tasks.join_next().await {
        let outcome = joined
            .context("bridge task panicked")
            .and_then(|result| result);
        if let Err(e) = outcome {
            error!("{e:#}");
            shutdown.trigger();
            failure.get_or_insert(e);
        }
    }

    info!("DockForLife bridge stopped");
    failure.map_or(Ok(()), Err)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn config(args: &[&str]) -> anyhow::Result<BridgeConfig> {
        let mut argv = vec!["dfl-bridge"];
        argv.extend_from_slice(args);
        Cli::parse_from(argv).into_bridge_config(FileConfig::default())
    }

    #[test]
    fn test_defaults_open_direct_endpoint_on_4456() {
        // Arrange / Act
        let config = config(&[]).unwrap();

        // Assert
        assert_eq!(
            config.direct_listen,
            Some(SocketAddr::from(([0, 0, 0, 0], 4456)))
        );
        assert_eq!(config.obs_url, "ws://127.0.0.1:4455");
        assert_eq!(config.relay_url, None);
        assert_eq!(config.reconnect_delay, Duration::from_secs(5));
        assert_eq!(config.heartbeat_interval, Duration::from_secs(25));
    }

    #[test]
    fn test_listen_and_port_override() {
        let config = config(&["--listen", "127.0.0.1", "--port", "9000"]).unwrap();
        assert_eq!(config.direct_listen.unwrap().to_string(), "127.0.0.1:9000");
    }

    #[test]
    fn test_ipv6_listen_address() {
        let config = config(&["--listen", "::1"]).unwrap();
        assert_eq!(config.direct_listen.unwrap().to_string(), "[::1]:4456");
    }

    #[test]
    fn test_no_direct_disables_endpoint() {
        let config = config(&["--no-direct"]).unwrap();
        assert_eq!(config.direct_listen, None);
    }

    #[test]
    fn test_invalid_listen_returns_error() {
        // Arrange
        let result = config(&["--listen", "not.an.ip"]);

        // Assert: must return an error, not panic
        let err = result.unwrap_err();
        assert!(err.to_string().contains("invalid listen address"));
    }

    #[test]
    fn test_code_is_normalised() {
        let config = config(&["--code", " k7mxq2pa "]).unwrap();
        assert_eq!(config.join_code.as_str(), "K7MXQ2PA");
    }

    #[test]
    fn test_malformed_code_returns_error() {
        assert!(config(&["--code", "no!"]).is_err());
    }

    #[test]
    fn test_generated_code_when_absent() {
        let config = config(&[]).unwrap();
        assert_eq!(config.join_code.as_str().len(), 8);
    }

    #[test]
    fn test_blank_password_means_none() {
        let config = config(&["--obs-password", ""]).unwrap();
        assert_eq!(config.obs_password, None);
    }

    #[test]
    fn test_timing_overrides() {
        let config = config(&[
            "--reconnect-delay",
            "2",
            "--request-timeout",
            "8",
            "--heartbeat-interval",
            "40",
        ])
        .unwrap();
        assert_eq!(config.reconnect_delay, Duration::from_secs(2));
        assert_eq!(config.request_timeout, Duration::from_secs(8));
        assert_eq!(config.heartbeat_interval, Duration::from_secs(40));
    }

    #[test]
    fn test_zero_heartbeat_is_rejected() {
        assert!(config(&["--heartbeat-interval", "0"]).is_err());
    }

    #[test]
    fn test_file_fills_unset_values() {
        // Arrange
        let cli = Cli::parse_from(["dfl-bridge"]);
        let file = FileConfig {
            relay_url: Some("relay.example.com".to_string()),
            code: Some("ABCD2345".to_string()),
            port: Some(7000),
            ..FileConfig::default()
        };

        // Act
        let config = cli.into_bridge_config(file).unwrap();

        // Assert
        assert_eq!(
            config.relay_endpoint().as_deref(),
            Some("wss://relay.example.com?code=ABCD2345&role=host")
        );
        assert_eq!(config.direct_listen.unwrap().port(), 7000);
    }

    #[test]
    fn test_flag_wins_over_file() {
        let cli = Cli::parse_from(["dfl-bridge", "--obs-url", "ws://10.0.0.9:4455"]);
        let file = FileConfig {
            obs_url: Some("ws://192.168.1.2:4455".to_string()),
            ..FileConfig::default()
        };

        let config = cli.into_bridge_config(file).unwrap();

        assert_eq!(config.obs_url, "ws://10.0.0.9:4455");
    }

    #[test]
    fn test_file_can_disable_direct_endpoint() {
        let file = FileConfig {
            no_direct: Some(true),
            ..FileConfig::default()
        };
        let config = Cli::default().into_bridge_config(file).unwrap();
        assert_eq!(config.direct_listen, None);
    }

    #[test]
    fn test_log_level_precedence() {
        let file = FileConfig {
            log_level: Some("warn".to_string()),
            ..FileConfig::default()
        };

        assert_eq!(Cli::default().log_level(&FileConfig::default()), "info");
        assert_eq!(Cli::default().log_level(&file), "warn");
        let cli = Cli::parse_from(["dfl-bridge", "--log-level", "debug"]);
        assert_eq!(cli.log_level(&file), "debug");
    }
}
