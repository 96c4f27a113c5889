use crate::error::NativeError;
use crate::handler::ExchangeHandler;
use crate::server::ws_session::{self, Command, EventLoopWebSocket, WebSocketSession};
use crate::server::{NativeServer, ServerOptions};
use crate::thread_kind::{mark_current_thread, ThreadKind};
use crate::websocket::NativeWebSocket;
use crate::wire::{
    encode_chunk, encode_last_chunk, encode_status, websocket_accept_key, DecodedRequest, Outbound, RequestDecoder,
    RequestHead, ResponseDefaults, ResponseSink, Upgrader, WireRequest, WireResponse, CONTINUE,
};
use bytes::BytesMut;
use http::{Method, StatusCode, Version};
use std::io::{self, Read};
use std::net::SocketAddr;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::runtime::Runtime;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::Notify;
use tracing::{debug, info, warn};

const READ_BUFFER_SIZE: usize = 8 * 1024;

/// A backend running connections as tasks on a tokio runtime.
///
/// The runtime threads are marked [`ThreadKind::Io`]: the handler is called on them and must hand
/// blocking work to another thread. Responses completed elsewhere are queued to the connection
/// task, which writes them in order.
#[derive(Debug)]
pub struct EventLoopServer {
    options: ServerOptions,
    running: Mutex<Option<Running>>,
    stopped: Arc<(Mutex<bool>, Condvar)>,
}

#[derive(Debug)]
struct Running {
    runtime: Runtime,
    shutdown: Arc<Notify>,
}

#[derive(Debug)]
struct ConnectionConfig {
    max_request_size: usize,
    defaults: Arc<ResponseDefaults>,
}

enum Frame {
    Response(Outbound),
    Upgrade(WebSocketSession),
}

enum Next {
    KeepAlive,
    Close,
    Upgrade(WebSocketSession),
}

impl EventLoopServer {
    pub fn new(options: ServerOptions) -> Self {
        Self { options, running: Mutex::new(None), stopped: Arc::new((Mutex::new(true), Condvar::new())) }
    }
}

impl NativeServer for EventLoopServer {
    fn name(&self) -> &'static str {
        "event-loop"
    }

    /// Must be called outside of any tokio runtime.
    fn start(&self, handler: Arc<dyn ExchangeHandler>) -> Result<SocketAddr, NativeError> {
        let mut running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
        if running.is_some() {
            return Err(NativeError::io(io::Error::new(io::ErrorKind::AlreadyExists, "server already started")));
        }

        let mut builder = tokio::runtime::Builder::new_multi_thread();
        if let Some(io_threads) = self.options.io_threads {
            builder.worker_threads(io_threads.max(1));
        }
        let runtime = builder
            .thread_name("spindle-io")
            .on_thread_start(|| mark_current_thread(ThreadKind::Io))
            .enable_all()
            .build()?;

        let listener = runtime.block_on(TcpListener::bind(self.options.address()))?;
        let local_addr = listener.local_addr()?;

        let shutdown = Arc::new(Notify::new());
        let config = Arc::new(ConnectionConfig {
            max_request_size: self.options.max_request_size,
            defaults: Arc::new(self.options.response_defaults()),
        });
        runtime.spawn(accept_loop(listener, handler, config, Arc::clone(&shutdown)));

        *self.stopped.0.lock().unwrap_or_else(PoisonError::into_inner) = false;
        *running = Some(Running { runtime, shutdown });
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
        if let Some(Running { runtime, shutdown }) = running {
            shutdown.notify_one();
            runtime.shutdown_timeout(Duration::from_secs(1));
            info!(server = self.name(), "server stopped");
        }

        let (lock, condvar) = &*self.stopped;
        *lock.lock().unwrap_or_else(PoisonError::into_inner) = true;
        condvar.notify_all();
    }
}

async fn accept_loop(
    listener: TcpListener,
    handler: Arc<dyn ExchangeHandler>,
    config: Arc<ConnectionConfig>,
    shutdown: Arc<Notify>,
) {
    loop {
        let (stream, remote) = tokio::select! {
            () = shutdown.notified() => {
                info!("stop accepting connections");
                return;
            }
            accepted = listener.accept() => match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!(cause = %e, "failed to accept");
                    continue;
                }
            },
        };

        if let Err(e) = stream.set_nodelay(true) {
            debug!(cause = %e, "can't set TCP_NODELAY");
        }

        let handler = Arc::clone(&handler);
        let config = Arc::clone(&config);
        tokio::spawn(async move {
            match serve_connection(stream, remote, handler, config).await {
                Ok(()) => debug!(%remote, "connection closed"),
                Err(e) => info!(%remote, cause = %e, "connection closed with error"),
            }
        });
    }
}

async fn serve_connection(
    mut stream: TcpStream,
    remote: SocketAddr,
    handler: Arc<dyn ExchangeHandler>,
    config: Arc<ConnectionConfig>,
) -> Result<(), NativeError> {
    let mut decoder = RequestDecoder::new(config.max_request_size);
    let mut buf = BytesMut::with_capacity(READ_BUFFER_SIZE);

    loop {
        let decoded = match read_request(&mut stream, &mut decoder, &mut buf).await {
            Ok(Some(decoded)) => decoded,
            Ok(None) => return Ok(()),
            Err(NativeError::Parse { source }) => {
                warn!(%remote, cause = %source, "can't read request");
                let response = encode_status(Version::HTTP_11, source.status_code(), &config.defaults);
                stream.write_all(&response).await?;
                let _ = stream.shutdown().await;
                return Err(source.into());
            }
            Err(e) => return Err(e),
        };

        let version = decoded.head.version;
        let keep_alive = decoded.head.keep_alive();
        let head_request = decoded.head.method == Method::HEAD;
        let (tx, mut rx) = mpsc::unbounded_channel();

        let request = WireRequest::new(decoded, Some(remote), Some(Box::new(QueueUpgrader { tx: tx.clone() })));
        let response =
            WireResponse::new(version, keep_alive, Arc::clone(&config.defaults), QueueSink { tx }).head_request(head_request);
        handler.handle(Box::new(request), Box::new(response));

        match drain_response(&mut stream, &mut rx, version, &config.defaults).await? {
            Next::KeepAlive => {}
            Next::Close => {
                let _ = stream.shutdown().await;
                return Ok(());
            }
            Next::Upgrade(session) => return ws_session::run(stream, buf, session).await,
        }
    }
}

async fn read_request(
    stream: &mut TcpStream,
    decoder: &mut RequestDecoder,
    buf: &mut BytesMut,
) -> Result<Option<DecodedRequest>, NativeError> {
    use tokio_util::codec::Decoder;

    loop {
        if let Some(decoded) = decoder.decode(buf)? {
            return Ok(Some(decoded));
        }
        if decoder.take_continue() {
            stream.write_all(CONTINUE).await?;
            debug!("sent continue response");
        }
        if stream.read_buf(buf).await? == 0 {
            return if buf.is_empty() { Ok(None) } else { Err(NativeError::Closed) };
        }
    }
}

/// Writes the frames of one response, returns what the connection does next.
async fn drain_response(
    stream: &mut TcpStream,
    rx: &mut UnboundedReceiver<Frame>,
    version: Version,
    defaults: &ResponseDefaults,
) -> Result<Next, NativeError> {
    let mut written = false;

    while let Some(frame) = rx.recv().await {
        match frame {
            Frame::Response(Outbound::Bytes(bytes)) => {
                written = true;
                stream.write_all(&bytes).await?;
            }
            Frame::Response(Outbound::Stream { reader, chunked }) => {
                written = true;
                copy_reader(stream, reader, chunked).await?;
            }
            Frame::Response(Outbound::File { file, len }) => {
                written = true;
                let mut file = tokio::fs::File::from_std(file).take(len);
                tokio::io::copy(&mut file, &mut *stream).await?;
            }
            Frame::Response(Outbound::End { keep_alive }) => {
                stream.flush().await?;
                return Ok(if keep_alive { Next::KeepAlive } else { Next::Close });
            }
            Frame::Response(Outbound::Abort) => {
                if !written {
                    warn!("response dropped before completion");
                    stream.write_all(&encode_status(version, StatusCode::INTERNAL_SERVER_ERROR, defaults)).await?;
                }
                return Ok(Next::Close);
            }
            Frame::Upgrade(session) => return Ok(Next::Upgrade(session)),
        }
    }

    Ok(Next::Close)
}

/// Pumps a blocking reader to the socket, reads happen on the blocking pool.
async fn copy_reader(stream: &mut TcpStream, mut reader: Box<dyn Read + Send>, chunked: bool) -> Result<(), NativeError> {
    loop {
        let (returned, read) = tokio::task::spawn_blocking(move || {
            let mut chunk = vec![0; READ_BUFFER_SIZE];
            let read = reader.read(&mut chunk).map(|n| {
                chunk.truncate(n);
                chunk
            });
            (reader, read)
        })
        .await
        .map_err(|e| NativeError::io(io::Error::other(e)))?;
        reader = returned;

        let chunk = read?;
        if chunk.is_empty() {
            break;
        }
        if chunked {
            let mut buf = BytesMut::with_capacity(chunk.len() + 16);
            encode_chunk(&mut buf, &chunk);
            stream.write_all(&buf).await?;
        } else {
            stream.write_all(&chunk).await?;
        }
    }

    if chunked {
        let mut buf = BytesMut::with_capacity(5);
        encode_last_chunk(&mut buf);
        stream.write_all(&buf).await?;
    }
    Ok(())
}

#[derive(Debug)]
struct QueueSink {
    tx: UnboundedSender<Frame>,
}

impl ResponseSink for QueueSink {
    fn write(&mut self, frame: Outbound) -> Result<(), NativeError> {
        self.tx.send(Frame::Response(frame)).map_err(|_closed| NativeError::Closed)
    }
}

struct QueueUpgrader {
    tx: UnboundedSender<Frame>,
}

impl Upgrader for QueueUpgrader {
    fn upgrade(&self, head: &RequestHead) -> Result<Box<dyn NativeWebSocket>, NativeError> {
        let accept = websocket_accept_key(head)?;
        let (commands, receiver) = mpsc::unbounded_channel::<Command>();
        let open = Arc::new(AtomicBool::new(true));

        let session = WebSocketSession { accept, commands: receiver, open: Arc::clone(&open) };
        self.tx.send(Frame::Upgrade(session)).map_err(|_closed| NativeError::Closed)?;

        Ok(Box::new(EventLoopWebSocket { commands, open }))
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Response(outbound) => f.debug_tuple("Response").field(outbound).finish(),
            Self::Upgrade(_) => f.write_str("Upgrade"),
        }
    }
}
