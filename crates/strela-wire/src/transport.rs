use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};

use crate::{Result, WireError};

/// Listens for the debuggee's single inbound connection.
///
/// The debuggee is told the port on its command line and connects back; the
/// adapter never dials out. Only the first connection is accepted, after which
/// the listener is dropped.
#[derive(Debug)]
pub struct DebuggeeListener {
    listener: TcpListener,
}

impl DebuggeeListener {
    /// Bind to `addr`; use port 0 for an ephemeral port.
    pub async fn bind(addr: SocketAddr) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { listener })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Wait for the debuggee to connect. `None` waits indefinitely.
    pub async fn accept(self, timeout: Option<Duration>) -> Result<TcpStream> {
        let accept = self.listener.accept();
        let (stream, peer) = match timeout {
            Some(limit) => tokio::time::timeout(limit, accept)
                .await
                .map_err(|_| WireError::Timeout)??,
            None => accept.await?,
        };
        let _ = stream.set_nodelay(true);
        tracing::debug!(target: "strela.wire", %peer, "debuggee connected");
        Ok(stream)
    }
}
