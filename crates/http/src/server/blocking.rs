use crate::error::NativeError;
use crate::handler::ExchangeHandler;
use crate::server::{NativeServer, ServerOptions};
use crate::thread_kind::{mark_current_thread, ThreadKind};
use crate::wire::{
    encode_chunk, encode_last_chunk, encode_status, DecodedRequest, Outbound, RequestDecoder, ResponseDefaults,
    ResponseSink, WireRequest, WireResponse, CONTINUE,
};
use bytes::BytesMut;
use http::{Method, StatusCode, Version};
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio_util::codec::Decoder;
use tracing::{debug, info, warn};

const READ_BUFFER_SIZE: usize = 8 * 1024;
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// A backend serving each connection on its own thread.
///
/// The handler runs on the connection thread, marked [`ThreadKind::Worker`]. A response
/// completed by another thread is written straight to the socket under a lock, the connection
/// thread waits for it once the handler called `start_async`.
#[derive(Debug)]
pub struct BlockingServer {
    options: ServerOptions,
    running: Mutex<Option<Running>>,
    stopped: Arc<(Mutex<bool>, Condvar)>,
}

#[derive(Debug)]
struct Running {
    stop: Arc<AtomicBool>,
    acceptor: JoinHandle<()>,
}

#[derive(Debug)]
struct ConnectionConfig {
    max_request_size: usize,
    defaults: Arc<ResponseDefaults>,
}

impl BlockingServer {
    pub fn new(options: ServerOptions) -> Self {
        Self { options, running: Mutex::new(None), stopped: Arc::new((Mutex::new(true), Condvar::new())) }
    }
}

impl NativeServer for BlockingServer {
    fn name(&self) -> &'static str {
        "blocking"
    }

    fn start(&self, handler: Arc<dyn ExchangeHandler>) -> Result<SocketAddr, NativeError> {
        let mut running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
        if running.is_some() {
            return Err(NativeError::io(io::Error::new(io::ErrorKind::AlreadyExists, "server already started")));
        }

        let listener = TcpListener::bind(self.options.address())?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;

        let stop = Arc::new(AtomicBool::new(false));
        let config = Arc::new(ConnectionConfig {
            max_request_size: self.options.max_request_size,
            defaults: Arc::new(self.options.response_defaults()),
        });
        let acceptor = {
            let stop = Arc::clone(&stop);
            thread::Builder::new().name("spindle-acceptor".into()).spawn(move || accept_loop(listener, handler, config, stop))?
        };

        *self.stopped.0.lock().unwrap_or_else(PoisonError::into_inner) = false;
        *running = Some(Running { stop, acceptor });
        info!(%local_addr, server = self.name(), "server started");
        Ok(local_addr)
    }

    fn join(&self) {
        let (lock, condvar) = &*self.stopped;
        let mut stopped = lock.lock().unwrap_or_else(PoisonError::into_inner);
        while !*stopped {
            stopped = condvar.wait(stopped).unwrap_or_else(PoisonError::into_inner);
        }
    }

    fn stop(&self) {
        let running = self.running.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(Running { stop, acceptor }) = running {
            stop.store(true, Ordering::Release);
            if acceptor.join().is_err() {
                warn!("acceptor thread panicked");
            }
            info!(server = self.name(), "server stopped");
        }

        let (lock, condvar) = &*self.stopped;
        *lock.lock().unwrap_or_else(PoisonError::into_inner) = true;
        condvar.notify_all();
    }
}

fn accept_loop(listener: TcpListener, handler: Arc<dyn ExchangeHandler>, config: Arc<ConnectionConfig>, stop: Arc<AtomicBool>) {
    while !stop.load(Ordering::Acquire) {
        let (stream, remote) = match listener.accept() {
            Ok(accepted) => accepted,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                thread::sleep(ACCEPT_POLL_INTERVAL);
                continue;
            }
            Err(e) => {
                warn!(cause = %e, "failed to accept");
                continue;
            }
        };

        let handler = Arc::clone(&handler);
        let config = Arc::clone(&config);
        let spawned = thread::Builder::new().name("spindle-worker".into()).spawn(move || {
            mark_current_thread(ThreadKind::Worker);
            match serve_connection(stream, remote, handler.as_ref(), &config) {
                Ok(()) => debug!(%remote, "connection closed"),
                Err(e) => info!(%remote, cause = %e, "connection closed with error"),
            }
        });
        if let Err(e) = spawned {
            warn!(cause = %e, "can't spawn connection thread");
        }
    }
    info!("stop accepting connections");
}

fn serve_connection(
    stream: TcpStream,
    remote: SocketAddr,
    handler: &dyn ExchangeHandler,
    config: &ConnectionConfig,
) -> Result<(), NativeError> {
    stream.set_nonblocking(false)?;
    let mut reader = stream.try_clone()?;
    let socket = Arc::new(Mutex::new(stream));

    let mut decoder = RequestDecoder::new(config.max_request_size);
    let mut buf = BytesMut::with_capacity(READ_BUFFER_SIZE);

    loop {
        let decoded = match read_request(&mut reader, &socket, &mut decoder, &mut buf) {
            Ok(Some(decoded)) => decoded,
            Ok(None) => return Ok(()),
            Err(NativeError::Parse { source }) => {
                warn!(%remote, cause = %source, "can't read request");
                let response = encode_status(Version::HTTP_11, source.status_code(), &config.defaults);
                lock(&socket).write_all(&response)?;
                return Err(source.into());
            }
            Err(e) => return Err(e),
        };

        let version = decoded.head.version;
        let keep_alive = decoded.head.keep_alive();
        let head_request = decoded.head.method == Method::HEAD;
        let exchange = Arc::new(Exchange::new(Arc::clone(&socket), version, Arc::clone(&config.defaults)));

        let request = WireRequest::new(decoded, Some(remote), None);
        let response = WireResponse::new(version, keep_alive, Arc::clone(&config.defaults), SocketSink(Arc::clone(&exchange)))
            .head_request(head_request);
        handler.handle(Box::new(request), Box::new(response));

        if !exchange.wait() {
            let _ = lock(&socket).shutdown(std::net::Shutdown::Both);
            return Ok(());
        }
    }
}

fn read_request(
    reader: &mut TcpStream,
    socket: &Mutex<TcpStream>,
    decoder: &mut RequestDecoder,
    buf: &mut BytesMut,
) -> Result<Option<DecodedRequest>, NativeError> {
    let mut chunk = [0; READ_BUFFER_SIZE];
    loop {
        if let Some(decoded) = decoder.decode(buf)? {
            return Ok(Some(decoded));
        }
        if decoder.take_continue() {
            lock(socket).write_all(CONTINUE)?;
        }
        let n = reader.read(&mut chunk)?;
        if n == 0 {
            return if buf.is_empty() { Ok(None) } else { Err(NativeError::Closed) };
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}

fn lock(socket: &Mutex<TcpStream>) -> std::sync::MutexGuard<'_, TcpStream> {
    socket.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One request and response on a connection.
#[derive(Debug)]
struct Exchange {
    socket: Arc<Mutex<TcpStream>>,
    version: Version,
    defaults: Arc<ResponseDefaults>,
    state: Mutex<ExchangeState>,
    done: Condvar,
}

#[derive(Debug, Default)]
struct ExchangeState {
    written: bool,
    async_started: bool,
    /// `Some(keep_alive)` once the response completed.
    outcome: Option<bool>,
}

impl Exchange {
    fn new(socket: Arc<Mutex<TcpStream>>, version: Version, defaults: Arc<ResponseDefaults>) -> Self {
        Self { socket, version, defaults, state: Mutex::new(ExchangeState::default()), done: Condvar::new() }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, ExchangeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self, frame: Outbound) -> Result<(), NativeError> {
        let result = self.write_frame(frame);
        if result.is_err() {
            self.finish(false);
        }
        result
    }

    fn write_frame(&self, frame: Outbound) -> Result<(), NativeError> {
        match frame {
            Outbound::Bytes(bytes) => {
                self.state().written = true;
                lock(&self.socket).write_all(&bytes)?;
            }
            Outbound::Stream { mut reader, chunked } => {
                self.state().written = true;
                let mut socket = lock(&self.socket);
                let mut chunk = vec![0; READ_BUFFER_SIZE];
                let mut buf = BytesMut::with_capacity(READ_BUFFER_SIZE + 16);
                loop {
                    let n = reader.read(&mut chunk)?;
                    if n == 0 {
                        break;
                    }
                    if chunked {
                        buf.clear();
                        encode_chunk(&mut buf, &chunk[..n]);
                        socket.write_all(&buf)?;
                    } else {
                        socket.write_all(&chunk[..n])?;
                    }
                }
                if chunked {
                    buf.clear();
                    encode_last_chunk(&mut buf);
                    socket.write_all(&buf)?;
                }
            }
            Outbound::File { file, len } => {
                self.state().written = true;
                io::copy(&mut file.take(len), &mut *lock(&self.socket))?;
            }
            Outbound::End { keep_alive } => {
                lock(&self.socket).flush()?;
                self.finish(keep_alive);
            }
            Outbound::Abort => {
                let written = self.state().written;
                if !written {
                    warn!("response dropped before completion");
                    self.write_error()?;
                }
                self.finish(false);
            }
        }
        Ok(())
    }

    fn write_error(&self) -> Result<(), NativeError> {
        let response = encode_status(self.version, StatusCode::INTERNAL_SERVER_ERROR, &self.defaults);
        lock(&self.socket).write_all(&response)?;
        Ok(())
    }

    fn finish(&self, keep_alive: bool) {
        let mut state = self.state();
        if state.outcome.is_none() {
            state.outcome = Some(keep_alive);
        }
        self.done.notify_all();
    }

    /// Called once the handler returned, blocks until the response completes. Returns whether
    /// the connection stays open.
    fn wait(&self) -> bool {
        let mut state = self.state();
        if state.outcome.is_none() && !state.async_started {
            warn!("handler returned without completing the response");
            if !state.written {
                state.written = true;
                if let Err(e) = self.write_error() {
                    debug!(cause = %e, "can't write error response");
                }
            }
            state.outcome = Some(false);
        }

        while state.outcome.is_none() {
            state = self.done.wait(state).unwrap_or_else(PoisonError::into_inner);
        }
        state.outcome == Some(true)
    }
}

#[derive(Debug)]
struct SocketSink(Arc<Exchange>);

impl ResponseSink for SocketSink {
    fn write(&mut self, frame: Outbound) -> Result<(), NativeError> {
        self.0.write(frame)
    }

    fn start_async(&mut self) {
        self.0.state().async_started = true;
    }
}
