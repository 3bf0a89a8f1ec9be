//! Websocket transport.
//!
//! Each connection attempt runs in its own task, tagged with the generation
//! number the [`crate::ConnectionManager`] assigned to it. The task reports
//! lifecycle and decoded frames back through a single inbox; the manager
//! ignores anything carrying an outdated generation.

use crate::error::TransportError;
use crate::worker_pool::{DecodeOutcome, WorkerPool};
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, trace, warn};

/// Something the transport layer observed.
#[derive(Debug)]
pub(crate) enum Inbound {
    /// The websocket handshake completed.
    Opened,
    /// A binary frame finished decoding.
    Decoded(DecodeOutcome),
    /// The attempt failed or the open socket went away.
    Closed(TransportError),
    /// The reconnect delay elapsed.
    ReconnectDue,
}

/// [`Inbound`] tagged with the connection attempt it belongs to.
#[derive(Debug)]
pub(crate) struct Envelope {
    pub generation: u64,
    pub event: Inbound,
}

pub(crate) type Inbox = mpsc::UnboundedSender<Envelope>;

const CLOSE_GRACE: Duration = Duration::from_millis(250);

/// Build the websocket endpoint for a server URL.
///
/// `http`/`https` are rewritten to `ws`/`wss`; the path is `/ws/` and the
/// secret and client id travel as query parameters.
pub fn endpoint_url(
    server_url: &str,
    secret: &str,
    client_id: &str,
) -> Result<String, TransportError> {
    let trimmed = server_url.trim().trim_end_matches('/');
    let (scheme, rest) = trimmed
        .split_once("://")
        .ok_or_else(|| TransportError::InvalidEndpoint(format!("missing scheme in `{server_url}`")))?;

    let scheme = match scheme.to_ascii_lowercase().as_str() {
        "ws" | "http" => "ws",
        "wss" | "https" => "wss",
        other => {
            return Err(TransportError::InvalidEndpoint(format!(
                "unsupported scheme `{other}`"
            )))
        }
    };
    if rest.is_empty() {
        return Err(TransportError::InvalidEndpoint(format!(
            "missing host in `{server_url}`"
        )));
    }

    Ok(format!(
        "{scheme}://{rest}/ws/?secret={}&client_id={}",
        percent_encode(secret),
        percent_encode(client_id)
    ))
}

fn percent_encode(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            other => out.push_str(&format!("%{other:02X}")),
        }
    }
    out
}

/// Owning handle for one websocket task.
#[derive(Debug)]
pub(crate) struct SocketHandle {
    outbound: mpsc::UnboundedSender<WsMessage>,
    task: JoinHandle<()>,
}

impl SocketHandle {
    /// Queue a binary frame for transmission.
    pub fn send(&self, frame: Vec<u8>) -> Result<(), TransportError> {
        self.outbound
            .send(WsMessage::Binary(frame))
            .map_err(|_| TransportError::Closed("socket task has exited".to_string()))
    }

    /// Ask the task to close the socket. A task still running after
    /// [`CLOSE_GRACE`] (for example stuck in the handshake) is aborted.
    pub fn close(self) {
        let _ = self.outbound.send(WsMessage::Close(None));
        let task = self.task;
        tokio::spawn(async move {
            tokio::time::sleep(CLOSE_GRACE).await;
            task.abort();
        });
    }

    /// Tear the task down immediately without a close handshake.
    pub fn abort(self) {
        self.task.abort();
    }
}

/// Open a websocket to `url` and pump it until it closes.
pub(crate) fn spawn_socket(
    url: String,
    generation: u64,
    pool: WorkerPool,
    inbox: Inbox,
) -> SocketHandle {
    let (outbound, mut outgoing) = mpsc::unbounded_channel::<WsMessage>();

    let task = tokio::spawn(async move {
        let post = |event: Inbound| {
            let _ = inbox.send(Envelope { generation, event });
        };

        let stream = match connect_async(url.as_str()).await {
            Ok((stream, _response)) => stream,
            Err(err) => {
                post(Inbound::Closed(TransportError::Connect(err.to_string())));
                return;
            }
        };
        debug!(generation, "Websocket open");
        post(Inbound::Opened);

        let (mut sink, mut incoming) = stream.split();

        let failure = loop {
            tokio::select! {
                command = outgoing.recv() => match command {
                    Some(WsMessage::Close(frame)) => {
                        let _ = sink.send(WsMessage::Close(frame)).await;
                        break TransportError::Closed("closed locally".to_string());
                    }
                    Some(frame) => {
                        if let Err(err) = sink.send(frame).await {
                            break TransportError::Closed(err.to_string());
                        }
                    }
                    None => {
                        let _ = sink.close().await;
                        break TransportError::Closed("handle dropped".to_string());
                    }
                },
                frame = incoming.next() => match frame {
                    Some(Ok(WsMessage::Binary(bytes))) => {
                        trace!(generation, bytes = bytes.len(), "Frame received");
                        let inbox = inbox.clone();
                        pool.submit_decode(bytes, move |outcome| {
                            let _ = inbox.send(Envelope {
                                generation,
                                event: Inbound::Decoded(outcome),
                            });
                        });
                    }
                    Some(Ok(WsMessage::Ping(payload))) => {
                        let _ = sink.send(WsMessage::Pong(payload)).await;
                    }
                    Some(Ok(WsMessage::Close(frame))) => {
                        let reason = frame
                            .map(|f| format!("{} {}", u16::from(f.code), f.reason))
                            .unwrap_or_else(|| "closed by server".to_string());
                        break TransportError::Closed(reason);
                    }
                    Some(Ok(WsMessage::Text(text))) => {
                        warn!(generation, len = text.len(), "Ignoring text frame");
                    }
                    Some(Ok(_)) => {}
                    Some(Err(err)) => break TransportError::Closed(err.to_string()),
                    None => break TransportError::Closed("stream ended".to_string()),
                },
            }
        };

        debug!(generation, %failure, "Websocket task finished");
        post(Inbound::Closed(failure));
    });

    SocketHandle { outbound, task }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_rewrites_http_schemes() {
        assert_eq!(
            endpoint_url("http://localhost:4000/", "s3cret", "abc").unwrap(),
            "ws://localhost:4000/ws/?secret=s3cret&client_id=abc"
        );
        assert_eq!(
            endpoint_url("https://voxels.example.com", "", "abc").unwrap(),
            "wss://voxels.example.com/ws/?secret=&client_id=abc"
        );
        assert_eq!(
            endpoint_url("ws://127.0.0.1:9000", "x", "y").unwrap(),
            "ws://127.0.0.1:9000/ws/?secret=x&client_id=y"
        );
    }

    #[test]
    fn endpoint_encodes_query_values() {
        let url = endpoint_url("ws://host", "a b&c", "id/1").unwrap();
        assert_eq!(url, "ws://host/ws/?secret=a%20b%26c&client_id=id%2F1");
    }

    #[test]
    fn endpoint_rejects_bad_urls() {
        assert!(matches!(
            endpoint_url("localhost:4000", "", "a"),
            Err(TransportError::InvalidEndpoint(_))
        ));
        assert!(matches!(
            endpoint_url("ftp://host", "", "a"),
            Err(TransportError::InvalidEndpoint(_))
        ));
        assert!(matches!(
            endpoint_url("ws://", "", "a"),
            Err(TransportError::InvalidEndpoint(_))
        ));
    }
}
