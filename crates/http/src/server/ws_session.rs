//! WebSocket connections of the event-loop backend.
//!
//! The application talks to the connection task through an unbounded command queue, the task
//! owns the socket and calls the listener on the I/O thread.

use crate::error::NativeError;
use crate::websocket::{CloseStatus, NativeWebSocket, WebSocketListener};
use bytes::{Bytes, BytesMut};
use futures::{SinkExt, StreamExt};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, Role};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::debug;

pub(super) enum Command {
    Listen(Arc<dyn WebSocketListener>),
    Send(Message),
    Close(CloseStatus),
    Pause,
    Resume,
    Terminate,
}

/// An accepted upgrade, waiting for its connection task.
pub(super) struct WebSocketSession {
    pub(super) accept: String,
    pub(super) commands: UnboundedReceiver<Command>,
    pub(super) open: Arc<AtomicBool>,
}

#[derive(Debug)]
pub(super) struct EventLoopWebSocket {
    pub(super) commands: UnboundedSender<Command>,
    pub(super) open: Arc<AtomicBool>,
}

impl EventLoopWebSocket {
    fn submit(&self, command: Command) {
        // the connection task is gone, nothing left to tell it
        let _ = self.commands.send(command);
    }
}

impl NativeWebSocket for EventLoopWebSocket {
    fn set_listener(&self, listener: Arc<dyn WebSocketListener>) {
        self.submit(Command::Listen(listener));
    }

    fn send_text(&self, text: String) {
        if self.is_open() {
            self.submit(Command::Send(Message::text(text)));
        }
    }

    fn send_binary(&self, data: Bytes) {
        if self.is_open() {
            self.submit(Command::Send(Message::binary(data)));
        }
    }

    fn close(&self, status: CloseStatus) {
        if self.open.swap(false, Ordering::AcqRel) {
            self.submit(Command::Close(status));
        }
    }

    fn pause(&self) {
        self.submit(Command::Pause);
    }

    fn resume(&self) {
        self.submit(Command::Resume);
    }

    fn terminate(&self) {
        if self.open.swap(false, Ordering::AcqRel) {
            self.submit(Command::Terminate);
        }
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }
}

enum Terminal {
    Closed(CloseStatus),
    Failed(NativeError),
}

/// Completes the handshake and serves frames until either side closes.
pub(super) async fn run(mut stream: TcpStream, read_ahead: BytesMut, session: WebSocketSession) -> Result<(), NativeError> {
    let WebSocketSession { accept, mut commands, open } = session;

    let handshake = format!(
        "HTTP/1.1 101 Switching Protocols\r\nupgrade: websocket\r\nconnection: Upgrade\r\nsec-websocket-accept: {accept}\r\n\r\n"
    );
    if let Err(e) = stream.write_all(handshake.as_bytes()).await {
        open.store(false, Ordering::Release);
        return Err(e.into());
    }

    let socket = WebSocketStream::from_partially_read(stream, read_ahead.to_vec(), Role::Server, None).await;
    let (mut sink, mut source) = socket.split();
    let mut listener: Option<Arc<dyn WebSocketListener>> = None;
    let mut paused = false;

    let terminal = loop {
        // frames are only read once someone listens
        let reading = listener.is_some() && !paused;

        tokio::select! {
            command = commands.recv() => match command {
                Some(Command::Listen(new_listener)) => {
                    new_listener.on_connect();
                    listener = Some(new_listener);
                }
                Some(Command::Send(message)) => {
                    if let Err(e) = sink.send(message).await {
                        break Terminal::Failed(NativeError::io(io::Error::other(e)));
                    }
                }
                Some(Command::Close(status)) => {
                    let frame = CloseFrame { code: CloseCode::from(status.code()), reason: status.reason().to_owned().into() };
                    let _ = sink.send(Message::Close(Some(frame))).await;
                    break Terminal::Closed(status);
                }
                Some(Command::Pause) => paused = true,
                Some(Command::Resume) => paused = false,
                Some(Command::Terminate) | None => break Terminal::Closed(CloseStatus::HARSH_DISCONNECT),
            },

            message = source.next(), if reading => match message {
                Some(Ok(Message::Text(text))) => {
                    if let Some(listener) = &listener {
                        listener.on_text(text.as_str().to_owned());
                    }
                }
                Some(Ok(Message::Binary(data))) => {
                    if let Some(listener) = &listener {
                        listener.on_binary(data);
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    let status = frame
                        .map(|frame| CloseStatus::new(u16::from(frame.code), frame.reason.as_str().to_owned()))
                        .unwrap_or(CloseStatus::NORMAL);
                    let _ = sink.close().await;
                    break Terminal::Closed(status);
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => break Terminal::Failed(NativeError::io(io::Error::other(e))),
                None => break Terminal::Closed(CloseStatus::HARSH_DISCONNECT),
            },
        }
    };

    open.store(false, Ordering::Release);
    match (listener, terminal) {
        (Some(listener), Terminal::Closed(status)) => {
            debug!(%status, "websocket closed");
            listener.on_close(status);
        }
        (Some(listener), Terminal::Failed(e)) => {
            debug!(cause = %e, "websocket failed");
            listener.on_error(e);
        }
        (None, _) => {}
    }

    Ok(())
}
