use crate::wire::ResponseDefaults;
use http::HeaderValue;
use serde::Deserialize;

const DEFAULT_MAX_REQUEST_SIZE: usize = 10 * 1024 * 1024;

/// Settings shared by the socket backends.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerOptions {
    pub host: String,
    /// `0` picks a free port.
    pub port: u16,
    /// Event-loop threads, defaults to the number of cores.
    pub io_threads: Option<usize>,
    /// Largest accepted request body, in bytes.
    pub max_request_size: usize,
    /// Adds `Date` and `Server` to responses that don't set them.
    pub default_headers: bool,
    pub server_name: String,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            io_threads: None,
            max_request_size: DEFAULT_MAX_REQUEST_SIZE,
            default_headers: true,
            server_name: "spindle".to_string(),
        }
    }
}

impl ServerOptions {
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_io_threads(mut self, io_threads: usize) -> Self {
        self.io_threads = Some(io_threads);
        self
    }

    pub fn with_max_request_size(mut self, max_request_size: usize) -> Self {
        self.max_request_size = max_request_size;
        self
    }

    pub fn with_default_headers(mut self, default_headers: bool) -> Self {
        self.default_headers = default_headers;
        self
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub(crate) fn response_defaults(&self) -> ResponseDefaults {
        if !self.default_headers {
            return ResponseDefaults::default();
        }
        ResponseDefaults { date: true, server: HeaderValue::from_str(&self.server_name).ok() }
    }
}
