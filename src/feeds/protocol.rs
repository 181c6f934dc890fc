use crate::models::frame::{Frame, FrameKind};
use futures_util::{SinkExt, StreamExt};
use serde_json::{Map, Value};
use std::collections::VecDeque;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("connection closed")]
    Closed,
    #[error("timed out waiting for {0} response")]
    Timeout(&'static str),
    #[error("broker rejected {kind} request: {code}: {message}")]
    Rejected {
        kind: &'static str,
        code: String,
        message: String,
    },
    #[error("malformed {0} response")]
    Malformed(&'static str),
}

/// Raw text-frame pipe underneath the protocol client.
///
/// `recv_text` yields `None` once the peer has closed the connection.
#[allow(async_fn_in_trait)]
pub trait FrameTransport {
    async fn send_text(&mut self, text: String) -> Result<(), ProtocolError>;
    async fn recv_text(&mut self) -> Option<Result<String, ProtocolError>>;
}

/// WebSocket transport over tokio-tungstenite.
pub struct WsTransport {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl WsTransport {
    pub async fn connect(url: &url::Url) -> Result<Self, ProtocolError> {
        info!("Connecting to broker WS: {}", url.host_str().unwrap_or("?"));
        let (stream, _) = connect_async(url.as_str())
            .await
            .map_err(|e| ProtocolError::Transport(e.to_string()))?;
        info!("Broker WS connected");
        Ok(Self { stream })
    }
}

impl FrameTransport for WsTransport {
    async fn send_text(&mut self, text: String) -> Result<(), ProtocolError> {
        self.stream
            .send(Message::Text(text))
            .await
            .map_err(|e| ProtocolError::Transport(e.to_string()))
    }

    async fn recv_text(&mut self) -> Option<Result<String, ProtocolError>> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text)),
                Ok(Message::Ping(data)) => {
                    if let Err(e) = self.stream.send(Message::Pong(data)).await {
                        return Some(Err(ProtocolError::Transport(e.to_string())));
                    }
                }
                Ok(Message::Close(frame)) => {
                    warn!("Broker WS closed: {frame:?}");
                    return None;
                }
                Ok(_) => {} // Binary, Pong, raw frames
                Err(e) => return Some(Err(ProtocolError::Transport(e.to_string()))),
            }
        }
    }
}

/// The single broker connection: framed JSON requests out, decoded frames in.
///
/// Frames that arrive while a request is waiting for its response, and do not
/// answer it, are parked in a backlog and handed back by `next_frame` in
/// arrival order.
pub struct ProtocolClient<T> {
    transport: T,
    next_req_id: u64,
    backlog: VecDeque<Frame>,
}

impl<T: FrameTransport> ProtocolClient<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            next_req_id: 1,
            backlog: VecDeque::new(),
        }
    }

    #[cfg(test)]
    pub(crate) fn transport(&self) -> &T {
        &self.transport
    }

    pub fn into_transport(self) -> T {
        self.transport
    }

    /// Send a request object, stamping it with a fresh `req_id`.
    pub async fn send(&mut self, mut request: Map<String, Value>) -> Result<u64, ProtocolError> {
        let req_id = self.next_req_id;
        self.next_req_id += 1;
        request.insert("req_id".into(), Value::from(req_id));
        let text = Value::Object(request).to_string();
        debug!("-> {text}");
        self.transport.send_text(text).await?;
        Ok(req_id)
    }

    /// Next live frame from the wire. Non-JSON frames are logged and skipped.
    pub async fn recv_live(&mut self) -> Result<Frame, ProtocolError> {
        loop {
            match self.transport.recv_text().await {
                None => return Err(ProtocolError::Closed),
                Some(Err(e)) => return Err(e),
                Some(Ok(text)) => match Frame::parse(&text) {
                    Ok(frame) => return Ok(frame),
                    Err(e) => {
                        warn!(event = "malformed_frame", "Skipping non-JSON frame ({e}): {text}");
                    }
                },
            }
        }
    }

    /// Next frame for the event loop: parked frames first, then the wire.
    pub async fn next_frame(&mut self) -> Result<Frame, ProtocolError> {
        if let Some(frame) = self.backlog.pop_front() {
            return Ok(frame);
        }
        self.recv_live().await
    }

    pub fn defer(&mut self, frame: Frame) {
        self.backlog.push_back(frame);
    }

    pub fn backlog_len(&self) -> usize {
        self.backlog.len()
    }

    /// Send `request` and wait until `deadline` for the frame answering it.
    ///
    /// A frame answers when it is of `expected` kind or an error frame, and its
    /// `req_id` (if echoed) equals ours. Error frames without a `req_id` must
    /// name the same `msg_type`, when they carry one. Everything else is
    /// deferred for the event loop.
    pub async fn request(
        &mut self,
        request: Map<String, Value>,
        expected: FrameKind,
        deadline: Instant,
    ) -> Result<Frame, ProtocolError> {
        let label = expected.key().unwrap_or("unknown");
        let req_id = self.send(request).await?;

        loop {
            let frame = match tokio::time::timeout_at(deadline, self.recv_live()).await {
                Ok(result) => result?,
                Err(_) => return Err(ProtocolError::Timeout(label)),
            };

            if Self::answers(&frame, expected, req_id) {
                if let Some(err) = frame.error() {
                    return Err(ProtocolError::Rejected {
                        kind: label,
                        code: err.code,
                        message: err.message,
                    });
                }
                return Ok(frame);
            }
            self.defer(frame);
        }
    }

    fn answers(frame: &Frame, expected: FrameKind, req_id: u64) -> bool {
        if let Some(id) = frame.req_id {
            if id != req_id {
                return false;
            }
        }
        match frame.kind {
            k if k == expected => true,
            FrameKind::Error => match (frame.req_id, frame.msg_type.as_deref()) {
                (Some(_), _) => true,
                (None, Some(mt)) => Some(mt) == expected.key(),
                (None, None) => true,
            },
            _ => false,
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::VecDeque;

    /// Scripted transport: replays queued inbound frames, records outbound ones.
    /// Once the script is exhausted, `recv_text` pends forever (or reports
    /// closed, when `close_when_drained` is set).
    #[derive(Default)]
    pub struct ScriptedTransport {
        pub inbound: VecDeque<String>,
        pub sent: Vec<Value>,
        pub close_when_drained: bool,
    }

    impl ScriptedTransport {
        pub fn push(&mut self, frame: Value) {
            self.inbound.push_back(frame.to_string());
        }

        pub fn push_raw(&mut self, text: &str) {
            self.inbound.push_back(text.to_string());
        }
    }

    impl FrameTransport for ScriptedTransport {
        async fn send_text(&mut self, text: String) -> Result<(), ProtocolError> {
            let v = serde_json::from_str(&text).map_err(|e| ProtocolError::Transport(e.to_string()))?;
            self.sent.push(v);
            Ok(())
        }

        async fn recv_text(&mut self) -> Option<Result<String, ProtocolError>> {
            match self.inbound.pop_front() {
                Some(text) => Some(Ok(text)),
                None if self.close_when_drained => None,
                None => std::future::pending().await,
            }
        }
    }
}
