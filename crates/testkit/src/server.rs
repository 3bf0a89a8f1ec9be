//! Loopback websocket server.
//!
//! Accepts any number of connections; commands always go to the most recent
//! one, which is what a reconnecting client talks to.

use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, warn};
use voxlink_net::codec::compress;
use voxlink_net::{decode, encode, Message};

type Current = Arc<Mutex<Option<mpsc::UnboundedSender<WsMessage>>>>;

/// What the server saw.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    /// A client finished the handshake; `uri` is the request path and query.
    Connected {
        /// Request URI.
        uri: String,
    },
    /// A client sent a message.
    Received(Message),
    /// A connection ended.
    Closed,
}

/// Websocket server on an ephemeral loopback port.
pub struct TestServer {
    addr: SocketAddr,
    current: Current,
    events: mpsc::UnboundedReceiver<ServerEvent>,
    accept_task: JoinHandle<()>,
}

impl TestServer {
    /// Bind and start accepting.
    pub async fn bind() -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let current: Current = Arc::new(Mutex::new(None));
        let (events_tx, events) = mpsc::unbounded_channel();

        let accept_current = Arc::clone(&current);
        let accept_task = tokio::spawn(async move {
            while let Ok((stream, peer)) = listener.accept().await {
                debug!(%peer, "Test server accepted connection");
                tokio::spawn(serve(stream, Arc::clone(&accept_current), events_tx.clone()));
            }
        });

        Ok(Self {
            addr,
            current,
            events,
            accept_task,
        })
    }

    /// Base URL for [`voxlink_net::ConnectionConfig::server_url`].
    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// Send a message to the current connection.
    pub fn send(&self, message: &Message) -> bool {
        match encode(message) {
            Ok(frame) => self.send_raw(frame),
            Err(err) => {
                warn!(error = %err, "Test server failed to encode");
                false
            }
        }
    }

    /// Send a zlib-compressed message to the current connection.
    pub fn send_compressed(&self, message: &Message) -> bool {
        match encode(message).and_then(|frame| compress(&frame)) {
            Ok(frame) => self.send_raw(frame),
            Err(err) => {
                warn!(error = %err, "Test server failed to compress");
                false
            }
        }
    }

    /// Send arbitrary bytes as one binary frame.
    pub fn send_raw(&self, frame: Vec<u8>) -> bool {
        lock(&self.current)
            .as_ref()
            .map(|tx| tx.send(WsMessage::Binary(frame)).is_ok())
            .unwrap_or(false)
    }

    /// Close the current connection from the server side.
    pub fn kick(&self) -> bool {
        lock(&self.current)
            .take()
            .map(|tx| tx.send(WsMessage::Close(None)).is_ok())
            .unwrap_or(false)
    }

    /// Next event, or `None` after `wait`.
    pub async fn next_event(&mut self, wait: Duration) -> Option<ServerEvent> {
        tokio::time::timeout(wait, self.events.recv())
            .await
            .ok()
            .flatten()
    }

    /// Wait for a handshake and return its request URI.
    pub async fn wait_connected(&mut self, wait: Duration) -> Option<String> {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            let left = deadline.saturating_duration_since(tokio::time::Instant::now());
            match self.next_event(left).await? {
                ServerEvent::Connected { uri } => return Some(uri),
                _ => continue,
            }
        }
    }

    /// Wait for the next message from a client.
    pub async fn wait_message(&mut self, wait: Duration) -> Option<Message> {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            let left = deadline.saturating_duration_since(tokio::time::Instant::now());
            match self.next_event(left).await? {
                ServerEvent::Received(message) => return Some(message),
                _ => continue,
            }
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

async fn serve(stream: TcpStream, current: Current, events: mpsc::UnboundedSender<ServerEvent>) {
    let mut uri = String::new();
    let callback = |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
        uri = request.uri().to_string();
        Ok(response)
    };
    let socket = match accept_hdr_async(stream, callback).await {
        Ok(socket) => socket,
        Err(err) => {
            warn!(error = %err, "Test server handshake failed");
            return;
        }
    };

    let (tx, mut outgoing) = mpsc::unbounded_channel();
    *lock(&current) = Some(tx);
    let _ = events.send(ServerEvent::Connected { uri });

    let (mut sink, mut incoming) = socket.split();
    loop {
        tokio::select! {
            command = outgoing.recv() => match command {
                Some(WsMessage::Close(frame)) => {
                    let _ = sink.send(WsMessage::Close(frame)).await;
                    break;
                }
                Some(frame) => {
                    if sink.send(frame).await.is_err() {
                        break;
                    }
                }
                None => break,
            },
            frame = incoming.next() => match frame {
                Some(Ok(WsMessage::Binary(bytes))) => match decode(&bytes) {
                    Ok(message) => {
                        let _ = events.send(ServerEvent::Received(message));
                    }
                    Err(err) => warn!(error = %err, "Test server got malformed frame"),
                },
                Some(Ok(WsMessage::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }

    let _ = events.send(ServerEvent::Closed);
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
