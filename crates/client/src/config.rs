use std::time::Duration;

/// Default worker endpoint.
pub const DEFAULT_URL: &str = "ws://localhost:3000/websocket";

/// Default time allowed for the WebSocket handshake.
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Client configuration loaded from environment variables.
///
/// Defaults suit a worker running locally. Timeouts and keepalive are
/// disabled when unset or `0`.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Worker WebSocket URL (`ws://` or `wss://`).
    pub url: String,
    /// Upper bound on the connect handshake.
    pub connect_timeout: Duration,
    /// Reject an invocation that has not been answered within this window.
    pub invoke_timeout: Option<Duration>,
    /// Send a Ping frame at this interval while the connection is open.
    pub keepalive_interval: Option<Duration>,
    /// Open the connection on the first `invoke` if it was never opened.
    pub connect_on_first_use: bool,
}

impl ClientConfig {
    /// Configuration for `url` with all other fields at their defaults.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                        | Default                          |
    /// |--------------------------------|----------------------------------|
    /// | `JOBWIRE_URL`                  | `ws://localhost:3000/websocket`  |
    /// | `JOBWIRE_CONNECT_TIMEOUT_SECS` | `10`                             |
    /// | `JOBWIRE_INVOKE_TIMEOUT_SECS`  | none                             |
    /// | `JOBWIRE_KEEPALIVE_SECS`       | none                             |
    /// | `JOBWIRE_CONNECT_ON_FIRST_USE` | `true`                           |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup.
    ///
    /// [`from_env`](Self::from_env) delegates here; tests pass a map.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let url = lookup("JOBWIRE_URL").unwrap_or_else(|| DEFAULT_URL.into());

        let connect_timeout_secs = parse_var::<_, u64>(&lookup, "JOBWIRE_CONNECT_TIMEOUT_SECS")?
            .unwrap_or(DEFAULT_CONNECT_TIMEOUT_SECS);
        let invoke_timeout = parse_var::<_, u64>(&lookup, "JOBWIRE_INVOKE_TIMEOUT_SECS")?
            .filter(|&secs| secs > 0)
            .map(Duration::from_secs);
        let keepalive_interval = parse_var::<_, u64>(&lookup, "JOBWIRE_KEEPALIVE_SECS")?
            .filter(|&secs| secs > 0)
            .map(Duration::from_secs);
        let connect_on_first_use =
            parse_var::<_, bool>(&lookup, "JOBWIRE_CONNECT_ON_FIRST_USE")?.unwrap_or(true);

        Ok(Self {
            url,
            connect_timeout: Duration::from_secs(connect_timeout_secs),
            invoke_timeout,
            keepalive_interval,
            connect_on_first_use,
        })
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_URL.into(),
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            invoke_timeout: None,
            keepalive_interval: None,
            connect_on_first_use: true,
        }
    }
}

fn parse_var<F, T>(lookup: &F, key: &'static str) -> Result<Option<T>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { key, value: raw }),
    }
}

/// An environment variable held a value of the wrong shape.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{key} has invalid value '{value}'")]
    Invalid { key: &'static str, value: String },
}
