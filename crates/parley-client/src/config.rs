use std::time::Duration;

const DEFAULT_SERVER_URL: &str = "http://127.0.0.1:3000";
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Where a [`RemoteBackend`](crate::RemoteBackend) finds its server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Base URL of the REST API, e.g. `http://127.0.0.1:3000`.
    pub server_url: String,
    pub request_timeout: Duration,
}

impl ClientConfig {
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Read `PARLEY_SERVER_URL` and `PARLEY_REQUEST_TIMEOUT_SECS`, after
    /// loading a `.env` file if one exists.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let server_url =
            std::env::var("PARLEY_SERVER_URL").unwrap_or_else(|_| DEFAULT_SERVER_URL.into());
        let request_timeout = std::env::var("PARLEY_REQUEST_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_REQUEST_TIMEOUT);

        Self {
            server_url,
            request_timeout,
        }
    }

    /// WebSocket URL of the subscription gateway.
    pub fn gateway_url(&self) -> String {
        let base = self.server_url.trim_end_matches('/');
        let ws = if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{}", rest)
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{}", rest)
        } else {
            base.to_string()
        };
        format!("{}/gateway", ws)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new(DEFAULT_SERVER_URL)
    }
}
