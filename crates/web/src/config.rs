//! Typed application settings.
//!
//! Every struct deserializes with defaults for missing fields, so a configuration file only lists
//! what it changes:
//!
//! ```
//! use spindle_web::config::{AppOptions, Backend};
//!
//! let options = AppOptions::from_json(r#"{ "backend": "blocking", "server": { "port": 0 } }"#).unwrap();
//! assert_eq!(options.backend, Backend::Blocking);
//! assert_eq!(options.server.port, 0);
//! assert!(options.cors.is_none());
//! ```

use crate::pipeline::ExecutionMode;
use serde::Deserialize;
use spindle_http::ServerOptions;
use std::thread;

/// Which socket backend serves the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    #[default]
    EventLoop,
    Blocking,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppOptions {
    pub server: ServerOptions,
    pub backend: Backend,
    pub worker: WorkerOptions,
    /// Overrides the matching settings of the router when present.
    pub router: Option<RouterOptions>,
    /// Overrides the default execution mode of the router when present.
    pub execution_mode: Option<ExecutionMode>,
    /// Enables the CORS filter when present.
    pub cors: Option<CorsOptions>,
    pub websocket: WebSocketOptions,
    pub log: LogOptions,
}

impl AppOptions {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct WorkerOptions {
    /// Threads polling futures, defaults to the number of cores.
    pub async_threads: Option<usize>,
    /// Upper bound of threads running blocking handlers, defaults to eight per core.
    pub max_threads: Option<usize>,
}

impl WorkerOptions {
    pub fn max_threads(&self) -> usize {
        self.max_threads.unwrap_or_else(|| thread::available_parallelism().map_or(8, |n| n.get() * 8)).max(1)
    }
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(default)]
pub struct RouterOptions {
    /// Literal path segments match regardless of ASCII case.
    pub ignore_case: bool,
    /// `/users/` matches a route declared as `/users`.
    pub ignore_trailing_slash: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CorsOptions {
    /// Allowed origins, `*` for any, or patterns such as `https://*.example.com`.
    pub origins: Vec<String>,
    pub methods: Vec<String>,
    /// Allowed request headers, `*` for any.
    pub headers: Vec<String>,
    pub exposed_headers: Vec<String>,
    pub credentials: bool,
    /// Preflight cache duration, `0` leaves `Access-Control-Max-Age` out.
    pub max_age_secs: u64,
}

impl Default for CorsOptions {
    fn default() -> Self {
        Self {
            origins: vec!["*".to_string()],
            methods: vec!["GET".to_string(), "POST".to_string()],
            headers: ["X-Requested-With", "Content-Type", "Accept", "Origin"].map(String::from).to_vec(),
            exposed_headers: Vec::new(),
            credentials: true,
            max_age_secs: 1800,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WebSocketOptions {
    /// Closes the socket when a callback fails.
    pub close_on_error: bool,
}

impl Default for WebSocketOptions {
    fn default() -> Self {
        Self { close_on_error: true }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogOptions {
    /// Installs a `tracing-subscriber` formatter on start, skipped when one is already set.
    pub enabled: bool,
    pub level: String,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self { enabled: true, level: "info".to_string() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = AppOptions::from_json("{}").unwrap();
        assert_eq!(options.backend, Backend::EventLoop);
        assert!(options.execution_mode.is_none());
        assert_eq!(options.server.port, 8080);
        assert!(options.websocket.close_on_error);
        assert!(options.router.is_none());
        assert!(options.worker.max_threads() >= 1);
    }

    #[test]
    fn test_nested_overrides() {
        let json = r#"{
            "execution_mode": "worker",
            "router": { "ignore_trailing_slash": true },
            "cors": { "origins": ["https://a.example"], "credentials": false },
            "worker": { "max_threads": 4 },
            "log": { "level": "debug" }
        }"#;
        let options = AppOptions::from_json(json).unwrap();
        assert_eq!(options.execution_mode, Some(ExecutionMode::Worker));
        let router = options.router.unwrap();
        assert!(router.ignore_trailing_slash);
        assert!(!router.ignore_case);
        assert_eq!(options.worker.max_threads(), 4);
        assert_eq!(options.log.level, "debug");

        let cors = options.cors.unwrap();
        assert_eq!(cors.origins, vec!["https://a.example"]);
        assert!(!cors.credentials);
        assert_eq!(cors.methods, vec!["GET", "POST"]);
        assert_eq!(cors.max_age_secs, 1800);
    }

    #[test]
    fn test_unknown_backend_is_rejected() {
        assert!(AppOptions::from_json(r#"{ "backend": "netty" }"#).is_err());
    }
}
