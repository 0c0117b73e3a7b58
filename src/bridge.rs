use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::LinesStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::channel::MessageChannel;
use crate::error::{BridgeError, ChannelError};
use crate::gatt::CentralBackend;
use crate::jsonrpc::RpcSession;
use crate::session::open_ble_session;

type SharedWriter<W> = Arc<tokio::sync::Mutex<W>>;

/// Session flavour selected by the last path segment of the socket URL.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum SessionKind {
    Ble,
    /// Classic Bluetooth; recognised but not served.
    Bt,
}

impl SessionKind {
    /// Reads the kind from a URL such as `ws://127.0.0.1:20111/scratch/ble`.
    #[must_use]
    pub fn from_url(url: &str) -> Option<Self> {
        let path = url.split(['?', '#']).next()?;
        path.trim_end_matches('/').rsplit('/').next()?.parse().ok()
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
enum BridgeMethod {
    Open,
    Close,
    Send,
}

/// One line received from the host.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BridgeMessage {
    method: BridgeMethod,
    socket_id: i64,
    url: Option<String>,
    jsonrpc: Option<String>,
}

/// One line sent to the host on behalf of a socket.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct OutboundFrame<'a> {
    socket_id: i64,
    message: &'a str,
}

/// Outbound half of one bridged socket; frames share the host writer.
struct BridgeChannel<W> {
    socket_id: i64,
    writer: SharedWriter<W>,
    closed: CancellationToken,
}

#[async_trait]
impl<W> MessageChannel for BridgeChannel<W>
where
    W: AsyncWrite + Unpin + Send,
{
    #[instrument(skip(self, text), level = "trace", fields(socket_id = self.socket_id))]
    async fn send_text(&self, text: String) -> Result<(), ChannelError> {
        if self.closed.is_cancelled() {
            return Err(ChannelError::Closed);
        }
        let frame = serde_json::to_string(&OutboundFrame {
            socket_id: self.socket_id,
            message: &text,
        })
        .map_err(std::io::Error::from)?;

        let mut writer = self.writer.lock().await;
        writer.write_all(frame.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
        Ok(())
    }

    async fn close(&self) {
        debug!(socket_id = self.socket_id, "closing bridged socket");
        self.closed.cancel();
    }
}

struct BridgeSocket {
    session: Arc<RpcSession>,
    inbox: mpsc::UnboundedSender<String>,
    closed: CancellationToken,
    worker: JoinHandle<()>,
}

/// Routes host lines to BLE sessions keyed by socket id.
pub struct HostBridge<W> {
    backend: CentralBackend,
    writer: SharedWriter<W>,
    sockets: HashMap<i64, BridgeSocket>,
}

impl<W> std::fmt::Debug for HostBridge<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostBridge")
            .field("backend", &self.backend)
            .field("sockets", &self.sockets.len())
            .finish_non_exhaustive()
    }
}

impl<W> HostBridge<W>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    #[must_use]
    pub fn new(writer: W, backend: CentralBackend) -> Self {
        Self {
            backend,
            writer: Arc::new(tokio::sync::Mutex::new(writer)),
            sockets: HashMap::new(),
        }
    }

    /// Number of open sockets.
    #[must_use]
    pub fn socket_count(&self) -> usize {
        self.sockets.len()
    }

    /// Serves host lines from `reader` until it ends, then closes every socket.
    ///
    /// Malformed lines are logged and skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if reading from the host fails.
    pub async fn run<R>(mut self, reader: R) -> Result<(), BridgeError>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut lines = LinesStream::new(reader.lines());
        while let Some(line) = lines.next().await {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            if let Err(error) = self.handle_line(&line).await {
                warn!(%error, "ignoring bridge message");
            }
        }
        self.close_all().await;
        Ok(())
    }

    /// Handles one host line.
    ///
    /// # Errors
    ///
    /// Returns an error if the line is not a bridge message.
    #[instrument(skip(self, line), level = "debug")]
    pub async fn handle_line(&mut self, line: &str) -> Result<(), BridgeError> {
        let message: BridgeMessage = serde_json::from_str(line)?;
        match message.method {
            BridgeMethod::Open => self.open(message.socket_id, message.url.as_deref()).await,
            BridgeMethod::Close => self.close(message.socket_id).await,
            BridgeMethod::Send => match message.jsonrpc {
                Some(text) => self.send(message.socket_id, text),
                None => debug!(socket_id = message.socket_id, "send without payload"),
            },
        }
        Ok(())
    }

    /// Closes every socket.
    pub async fn close_all(&mut self) {
        let socket_ids: Vec<i64> = self.sockets.keys().copied().collect();
        for socket_id in socket_ids {
            self.close(socket_id).await;
        }
    }

    async fn open(&mut self, socket_id: i64, url: Option<&str>) {
        let Some(kind) = url.and_then(SessionKind::from_url) else {
            warn!(socket_id, ?url, "unsupported socket URL");
            return;
        };
        if kind == SessionKind::Bt {
            warn!(socket_id, "classic Bluetooth sessions are not supported");
            return;
        }
        if self.sockets.contains_key(&socket_id) {
            warn!(socket_id, "socket reopened; closing the previous session");
            self.close(socket_id).await;
        }

        let closed = CancellationToken::new();
        let channel = BridgeChannel {
            socket_id,
            writer: self.writer.clone(),
            closed: closed.clone(),
        };
        let session = match open_ble_session(Arc::new(channel), &self.backend).await {
            Ok(session) => Arc::new(session),
            Err(error) => {
                warn!(socket_id, %error, "failed to open session");
                return;
            }
        };

        let (inbox, mut queue) = mpsc::unbounded_channel::<String>();
        let worker_session = session.clone();
        let worker = tokio::spawn(async move {
            while let Some(text) = queue.recv().await {
                worker_session.did_receive_text(&text).await;
            }
        });
        info!(socket_id, %kind, "opened socket");
        self.sockets.insert(
            socket_id,
            BridgeSocket {
                session,
                inbox,
                closed,
                worker,
            },
        );
    }

    async fn close(&mut self, socket_id: i64) {
        let Some(socket) = self.sockets.remove(&socket_id) else {
            debug!(socket_id, "close for unknown socket");
            return;
        };
        let BridgeSocket {
            session,
            inbox,
            closed: _,
            worker,
        } = socket;
        drop(inbox);
        session.close().await;
        // Queued messages still drain; each fails against the closed session.
        if let Err(error) = worker.await {
            warn!(socket_id, %error, "socket worker failed");
        }
        info!(socket_id, "closed socket");
    }

    fn send(&mut self, socket_id: i64, text: String) {
        let Some(socket) = self.sockets.get(&socket_id) else {
            debug!(socket_id, "send for unknown socket");
            return;
        };
        if socket.closed.is_cancelled() {
            debug!(socket_id, "dropping socket closed by its session");
            self.sockets.remove(&socket_id);
            return;
        }
        if socket.inbox.send(text).is_err() {
            warn!(socket_id, "socket worker has stopped");
        }
    }
}
