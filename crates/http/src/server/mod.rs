//! Socket backends.
//!
//! - [`EventLoopServer`]: a tokio runtime whose threads are marked as I/O threads, one task per
//!   connection, WebSocket upgrades.
//! - [`BlockingServer`]: one thread per connection, writes go straight to the socket.
//!
//! Both answer every request through the same [`ExchangeHandler`] and the same wire encoding.

mod blocking;
mod event_loop;
mod options;
mod ws_session;

pub use blocking::BlockingServer;
pub use event_loop::EventLoopServer;
pub use options::ServerOptions;

use crate::error::NativeError;
use crate::handler::ExchangeHandler;
use std::net::SocketAddr;
use std::sync::Arc;

/// The lifecycle of a backend.
pub trait NativeServer: Send + Sync {
    fn name(&self) -> &'static str;

    /// Binds the listener and starts serving, returns the bound address.
    fn start(&self, handler: Arc<dyn ExchangeHandler>) -> Result<SocketAddr, NativeError>;

    /// Blocks until the server is stopped.
    fn join(&self);

    /// Stops accepting connections and releases the backend threads.
    fn stop(&self);
}
