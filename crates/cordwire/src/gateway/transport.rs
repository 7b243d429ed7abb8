//! The socket transport seam.

use futures::future::BoxFuture;

use crate::error::CordResult;

/// One open gateway connection carrying text frames.
pub trait SocketConnection: Send {
    /// Send one text frame.
    fn send(&mut self, frame: String) -> BoxFuture<'_, CordResult<()>>;

    /// Receive the next text frame.
    ///
    /// `None` means the remote side closed the connection; an error means it
    /// broke abruptly.
    fn recv(&mut self) -> BoxFuture<'_, Option<CordResult<String>>>;

    /// Close the connection. Errors are not reported: the connection is
    /// abandoned either way.
    fn close(&mut self) -> BoxFuture<'_, ()>;
}

/// Opens gateway connections.
pub trait SocketTransport: Send + Sync {
    /// Open a new connection.
    fn open(&self) -> BoxFuture<'_, CordResult<Box<dyn SocketConnection>>>;
}
