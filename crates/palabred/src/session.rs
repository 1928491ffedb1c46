//! Per-connection session state and transport.
//!
//! A `Session` is exclusively owned by its `ConnectionHandler`. The only
//! piece shared with the registry is the `Outbound` handle, a cheap clone
//! that lets the broadcast deliver lines while the owner keeps the right to
//! close the connection.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};
use tokio::sync::Mutex;
use tokio::time::timeout;

use palabre_core::{DisplayName, DomainResult, Lifecycle, SessionId, SessionState};

/// Read half of a client connection.
pub type BoxedReader = Box<dyn AsyncRead + Send + Sync + Unpin>;

/// Write half of a client connection.
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Errors from writing to or closing a session transport.
///
/// For the broadcast, every variant means "unreachable recipient".
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("transport already closed")]
    Closed,

    #[error("I/O error: {0}")]
    Io(String),

    #[error("write timed out after {0:?}")]
    WriteTimeout(Duration),
}

// ============================================================================
// Outbound
// ============================================================================

/// Shared, serialized write side of a session.
///
/// Cloning is cheap. All clones write through one mutex, so lines written
/// by the registry and by the owning handler never interleave.
#[derive(Clone)]
pub struct Outbound {
    writer: Arc<Mutex<Option<BufWriter<BoxedWriter>>>>,
    write_timeout: Duration,
}

impl Outbound {
    /// Wraps the write half of a connection.
    pub fn new(writer: impl AsyncWrite + Send + Unpin + 'static, write_timeout: Duration) -> Self {
        let boxed: BoxedWriter = Box::new(writer);
        Self {
            writer: Arc::new(Mutex::new(Some(BufWriter::new(boxed)))),
            write_timeout,
        }
    }

    /// Writes one line followed by `\n` and flushes it.
    ///
    /// # Errors
    ///
    /// - `TransportError::Closed` if `close` already ran
    /// - `TransportError::Io` if the peer is gone
    /// - `TransportError::WriteTimeout` if the peer stopped reading
    pub async fn send(&self, line: &str) -> Result<(), TransportError> {
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(TransportError::Closed)?;

        match timeout(self.write_timeout, async {
            writer.write_all(line.as_bytes()).await?;
            writer.write_all(b"\n").await?;
            writer.flush().await?;
            Ok::<(), std::io::Error>(())
        })
        .await
        {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(TransportError::Io(e.to_string())),
            Err(_) => Err(TransportError::WriteTimeout(self.write_timeout)),
        }
    }

    /// Releases the write half. Idempotent.
    ///
    /// Returns `Ok(true)` if this call released it, `Ok(false)` if it was
    /// already released. The writer is dropped even when shutdown fails.
    pub async fn close(&self) -> Result<bool, TransportError> {
        let taken = self.writer.lock().await.take();
        let Some(mut writer) = taken else {
            return Ok(false);
        };

        match timeout(self.write_timeout, writer.shutdown()).await {
            Ok(Ok(())) => Ok(true),
            Ok(Err(e)) => Err(TransportError::Io(e.to_string())),
            Err(_) => Err(TransportError::WriteTimeout(self.write_timeout)),
        }
    }

    /// Returns true once `close` has run.
    pub async fn is_closed(&self) -> bool {
        self.writer.lock().await.is_none()
    }
}

impl std::fmt::Debug for Outbound {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Outbound")
            .field("write_timeout", &self.write_timeout)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Inbound
// ============================================================================

/// Result of reading one line from a peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    /// A line, terminator included if the peer sent one.
    Line(String),

    /// End of stream, or the read side was already released.
    Closed,

    /// Reset, invalid UTF-8 or any other read error.
    Failed(String),
}

/// Exclusive read side of a session.
pub struct Inbound {
    reader: Option<BufReader<BoxedReader>>,
}

impl Inbound {
    fn new(reader: impl AsyncRead + Send + Sync + Unpin + 'static) -> Self {
        let boxed: BoxedReader = Box::new(reader);
        Self {
            reader: Some(BufReader::new(boxed)),
        }
    }

    async fn read_line(&mut self) -> ReadOutcome {
        let Some(reader) = self.reader.as_mut() else {
            return ReadOutcome::Closed;
        };

        let mut line = String::new();
        match reader.read_line(&mut line).await {
            Ok(0) => ReadOutcome::Closed,
            Ok(_) => ReadOutcome::Line(line),
            Err(e) => ReadOutcome::Failed(e.to_string()),
        }
    }

    fn close(&mut self) -> bool {
        self.reader.take().is_some()
    }
}

// ============================================================================
// Session
// ============================================================================

/// One connected client: identity, transport and lifecycle state.
pub struct Session {
    id: SessionId,
    peer: Option<SocketAddr>,
    display_name: Option<DisplayName>,
    lifecycle: Lifecycle,
    inbound: Inbound,
    outbound: Outbound,
    connected_at: DateTime<Utc>,
}

impl Session {
    /// Creates a session in the `Connected` state.
    pub fn new(
        id: SessionId,
        peer: Option<SocketAddr>,
        reader: impl AsyncRead + Send + Sync + Unpin + 'static,
        writer: impl AsyncWrite + Send + Unpin + 'static,
        write_timeout: Duration,
    ) -> Self {
        Self {
            id,
            peer,
            display_name: None,
            lifecycle: Lifecycle::new(id),
            inbound: Inbound::new(reader),
            outbound: Outbound::new(writer, write_timeout),
            connected_at: Utc::now(),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    pub fn display_name(&self) -> Option<&DisplayName> {
        self.display_name.as_ref()
    }

    /// Records the registered name. Only the first call has an effect.
    ///
    /// Returns `false` if a name was already set.
    pub fn set_display_name(&mut self, name: DisplayName) -> bool {
        if self.display_name.is_some() {
            return false;
        }
        self.display_name = Some(name);
        true
    }

    pub fn state(&self) -> SessionState {
        self.lifecycle.state()
    }

    pub fn advance(&mut self, next: SessionState) -> DomainResult<()> {
        self.lifecycle.advance(next)
    }

    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    /// Returns a shared handle to the write side.
    pub fn outbound(&self) -> Outbound {
        self.outbound.clone()
    }

    /// Reads the next line from the peer.
    pub async fn read_line(&mut self) -> ReadOutcome {
        self.inbound.read_line().await
    }

    /// Sends one line to the peer.
    pub async fn send(&self, line: &str) -> Result<(), TransportError> {
        self.outbound.send(line).await
    }

    /// Releases the read side, then the write side. Idempotent.
    ///
    /// The read side is always released, even if closing the write side
    /// fails.
    pub async fn close(&mut self) -> Result<(), TransportError> {
        self.inbound.close();
        self.outbound.close().await.map(|_| ())
    }
}
