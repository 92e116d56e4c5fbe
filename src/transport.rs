//! The narrow interface the core expects from its transports.
//!
//! The runtime does not mandate an event-loop shape; anything that can
//! deliver complete byte chunks into the framer and write reply bytes back
//! out can host it. The trait below is what the server lifecycle consumes
//! from the bundled TCP and UDP transports.

use std::io;
use std::net::{IpAddr, SocketAddr};

use async_trait::async_trait;

/// A bound transport serving one protocol on one local address.
#[async_trait]
pub trait RpcTransport: Send + Sync {
    /// The address the transport is bound to. Useful after binding to port
    /// 0 to learn which port the OS assigned.
    fn local_addr(&self) -> SocketAddr;

    /// The local port, shorthand for `local_addr().port()`.
    fn local_port(&self) -> u16 {
        self.local_addr().port()
    }

    /// The local IP the transport is listening on.
    fn local_ip(&self) -> IpAddr {
        self.local_addr().ip()
    }

    /// Runs the accept/receive loop. Only returns on a listener-level I/O
    /// error; per-connection and per-datagram failures are handled inside.
    async fn handle_forever(&self) -> io::Result<()>;
}
