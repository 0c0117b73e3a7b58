use std::sync::Mutex;

use async_trait::async_trait;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use crate::error::ChannelError;

/// A bidirectional text-message transport to one remote peer.
///
/// Inbound text is pushed into a session by whoever owns the transport; this trait covers the
/// outbound half and closure.
#[async_trait]
pub trait MessageChannel: Send + Sync {
    /// Emits one complete text message.
    async fn send_text(&self, text: String) -> Result<(), ChannelError>;

    /// Closes the channel. Further sends fail with [`ChannelError::Closed`].
    async fn close(&self);
}

/// In-process channel delivering outbound messages to an unbounded receiver.
#[derive(Debug)]
pub struct MemoryChannel {
    sender: Mutex<Option<mpsc::UnboundedSender<String>>>,
}

impl MemoryChannel {
    /// Creates a channel and the receiver that observes its outbound messages.
    ///
    /// The receiver yields `None` once the channel is closed.
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (
            Self {
                sender: Mutex::new(Some(sender)),
            },
            receiver,
        )
    }

    fn sender(&self) -> Option<mpsc::UnboundedSender<String>> {
        self.sender
            .lock()
            .ok()
            .and_then(|sender| sender.as_ref().cloned())
    }
}

#[async_trait]
impl MessageChannel for MemoryChannel {
    async fn send_text(&self, text: String) -> Result<(), ChannelError> {
        let sender = self.sender().ok_or(ChannelError::Closed)?;
        sender.send(text).map_err(|_error| ChannelError::Closed)
    }

    async fn close(&self) {
        if let Ok(mut sender) = self.sender.lock() {
            sender.take();
        }
    }
}

/// Channel writing one message per line to an async writer, such as stdout.
#[derive(Debug)]
pub struct LineChannel<W> {
    writer: tokio::sync::Mutex<W>,
    closed: CancellationToken,
}

impl<W> LineChannel<W>
where
    W: AsyncWrite + Unpin + Send,
{
    #[must_use]
    pub fn new(writer: W) -> Self {
        Self {
            writer: tokio::sync::Mutex::new(writer),
            closed: CancellationToken::new(),
        }
    }

    /// Token cancelled when the channel is closed from the session side.
    #[must_use]
    pub fn closed(&self) -> CancellationToken {
        self.closed.clone()
    }
}

#[async_trait]
impl<W> MessageChannel for LineChannel<W>
where
    W: AsyncWrite + Unpin + Send,
{
    #[instrument(skip(self, text), level = "trace", fields(len = text.len()))]
    async fn send_text(&self, text: String) -> Result<(), ChannelError> {
        if self.closed.is_cancelled() {
            return Err(ChannelError::Closed);
        }

        let mut writer = self.writer.lock().await;
        writer.write_all(text.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
        Ok(())
    }

    async fn close(&self) {
        debug!("closing line channel");
        self.closed.cancel();
    }
}
