//! Bridge configuration types.
//!
//! [`BridgeConfig`] is the single source of truth for all runtime settings.
//! `main.rs` builds it once from CLI flags, environment variables and the
//! optional TOML file, then shares it behind an `Arc`.  Nothing in here reads
//! the environment or touches the filesystem.

use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use dfl_core::JoinCode;

/// Default port of the local direct-client WebSocket endpoint.
pub const DEFAULT_DIRECT_PORT: u16 = 4456;

/// Default URL of the OBS WebSocket server.
pub const DEFAULT_OBS_URL: &str = "ws://127.0.0.1:4455";

/// All runtime configuration for the bridge.
///
/// # Example
///
/// ```rust
/// use dfl_bridge::domain::BridgeConfig;
///
/// let cfg = BridgeConfig::default();
/// assert_eq!(cfg.direct_listen.map(|a| a.port()), Some(4456));
/// assert!(cfg.relay_endpoint().is_none());
/// ```
#[derive(Clone)]
pub struct BridgeConfig {
    /// Address of the local WebSocket endpoint, or `None` when direct mode is
    /// disabled.
    pub direct_listen: Option<SocketAddr>,

    /// WebSocket URL of OBS, e.g. `ws://127.0.0.1:4455`.
    pub obs_url: String,

    /// Password for OBS authentication.  Never logged.
    pub obs_password: Option<String>,

    /// Base URL of the relay service.  `None` disables the relay link.
    pub relay_url: Option<String>,

    /// Code under which this bridge registers with the relay.
    pub join_code: JoinCode,

    /// Fixed pause between reconnect attempts (OBS and relay alike).
    pub reconnect_delay: Duration,

    /// Deadline for one OBS request/response round trip.
    pub request_timeout: Duration,

    /// Interval of relay `ping` envelopes.
    pub heartbeat_interval: Duration,

    /// Interval of WebSocket ping frames sent to direct clients.
    pub client_ping_interval: Duration,

    /// Deadline for one write to a direct client.
    pub client_write_timeout: Duration,

    /// Capacity of each direct client's outbound queue.
    pub client_queue_capacity: usize,
}

impl BridgeConfig {
    /// Full relay URL including the join code and host role, if the relay
    /// link is enabled.
    pub fn relay_endpoint(&self) -> Option<String> {
        self.relay_url
            .as_deref()
            .map(|base| relay_endpoint_url(base, &self.join_code))
    }
}

impl Default for BridgeConfig {
    /// | Field                   | Default                 |
    /// |-------------------------|-------------------------|
    /// | direct_listen           | `0.0.0.0:4456`          |
    /// | obs_url                 | `ws://127.0.0.1:4455`   |
    /// | relay_url               | none                    |
    /// | join_code               | freshly generated       |
    /// | reconnect_delay         | 5 seconds               |
    /// | request_timeout         | 5 seconds               |
    /// | heartbeat_interval      | 25 seconds              |
    /// | client_ping_interval    | 30 seconds              |
    /// | client_write_timeout    | 10 seconds              |
    /// | client_queue_capacity   | 256                     |
    fn default() -> Self {
        Self {
            direct_listen: Some(SocketAddr::from(([0, 0, 0, 0], DEFAULT_DIRECT_PORT))),
            obs_url: DEFAULT_OBS_URL.to_string(),
            obs_password: None,
            relay_url: None,
            join_code: JoinCode::generate(),
            reconnect_delay: Duration::from_secs(5),
            request_timeout: Duration::from_secs(5),
            heartbeat_interval: Duration::from_secs(25),
            client_ping_interval: Duration::from_secs(30),
            client_write_timeout: Duration::from_secs(10),
            client_queue_capacity: 256,
        }
    }
}

// Hand-written so the OBS password never ends up in a log line.
impl fmt::Debug for BridgeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BridgeConfig")
            .field("direct_listen", &self.direct_listen)
            .field("obs_url", &self.obs_url)
            .field("obs_password", &self.obs_password.as_ref().map(|_| "<redacted>"))
            .field("relay_url", &self.relay_url)
            .field("join_code", &self.join_code)
            .field("reconnect_delay", &self.reconnect_delay)
            .field("request_timeout", &self.request_timeout)
            .field("heartbeat_interval", &self.heartbeat_interval)
            .field("client_ping_interval", &self.client_ping_interval)
            .field("client_write_timeout", &self.client_write_timeout)
            .field("client_queue_capacity", &self.client_queue_capacity)
            .finish()
    }
}

/// Appends the registration query to a relay base URL.
///
/// A URL without a scheme is assumed to be `wss://`.  An existing query
/// string is extended rather than replaced.
///
/// ```rust
/// use dfl_bridge::domain::relay_endpoint_url;
/// use dfl_core::JoinCode;
///
/// let code = JoinCode::parse("K7MXQ2PA").unwrap();
/// assert_eq!(
///     relay_endpoint_url("relay.example.com/ws", &code),
///     "wss://relay.example.com/ws?code=K7MXQ2PA&role=host"
/// );
/// ```
pub fn relay_endpoint_url(base: &str, code: &JoinCode) -> String {
    let base = base.trim();
    let base = if base.contains("://") {
        base.to_string()
    } else {
        format!("wss://{base}")
    };
    let separator = if base.contains('?') { '&' } else { '?' };
    format!("{base}{separator}code={code}&role=host")
}

// ── Tests ─────────────────────────────────────────────────────────────────────
