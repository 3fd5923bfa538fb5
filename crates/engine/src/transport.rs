//! Transport boundary.
//!
//! The engine talks to exactly one peer over a byte-oriented duplex stream
//! (typically stdin/stdout of a subprocess). Spawning the peer and framing
//! bytes into discrete records happen behind this trait; the engine only
//! sees whole newline-delimited JSON records.

use async_trait::async_trait;

/// Errors surfaced by a transport implementation.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("transport is closed")]
    Closed,
}

/// A connected duplex record stream to the peer process.
///
/// `read_record` is called by a single consumer (the protocol router);
/// `write` may be called concurrently from many tasks and implementations
/// must serialize writes so records never interleave.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Write one JSON record (without trailing newline) to the peer.
    async fn write(&self, record: String) -> Result<(), TransportError>;

    /// Read the next inbound record. `None` means the peer closed the
    /// stream; the router treats that as terminal.
    async fn read_record(&self) -> Option<String>;

    /// Half-close the outbound side, signalling end of input to the peer
    /// while inbound records keep flowing.
    async fn end_input(&self) -> Result<(), TransportError>;

    /// Close the transport entirely.
    async fn close(&self) -> Result<(), TransportError>;
}
