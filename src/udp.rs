//! UDP transport: each datagram is one complete record.
//!
//! Datagrams dispatch in parallel without per-source serialization; the
//! concurrent task count is bounded by the server's worker budget. Replies
//! go best-effort to the datagram's source address, and anything that fails
//! before the xid is known is dropped silently.

use std::io;
use std::net::SocketAddr;
use std::ops::RangeInclusive;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::net::UdpSocket;
use tokio::sync::Semaphore;
use tracing::{debug, info};

use crate::rpc::context::{Context, Protocol, SharedState};
use crate::rpc::dispatch;
use crate::transport::RpcTransport;

/// Largest datagram payload UDP can carry.
const MAX_DATAGRAM_SIZE: usize = 65_535;

/// UDP socket bound to one local address.
pub struct UdpTransport {
    socket: Arc<UdpSocket>,
    local_addr: SocketAddr,
    shared: Arc<SharedState>,
    workers: Arc<Semaphore>,
}

impl UdpTransport {
    /// Binds to `ip:port` with the given parallel-dispatch budget.
    pub async fn bind(
        ip: &str,
        port: u16,
        shared: Arc<SharedState>,
        worker_tasks: usize,
    ) -> io::Result<Self> {
        let socket = UdpSocket::bind((ip, port)).await?;
        let local_addr = socket.local_addr()?;
        info!("UDP transport listening on {local_addr}");
        Ok(UdpTransport {
            socket: Arc::new(socket),
            local_addr,
            shared,
            workers: Arc::new(Semaphore::new(worker_tasks.max(1))),
        })
    }

    /// Binds to the first free port in `ports`.
    pub async fn bind_range(
        ip: &str,
        ports: RangeInclusive<u16>,
        shared: Arc<SharedState>,
        worker_tasks: usize,
    ) -> io::Result<Self> {
        for port in ports.clone() {
            match Self::bind(ip, port, shared.clone(), worker_tasks).await {
                Ok(transport) => return Ok(transport),
                Err(e) if e.kind() == io::ErrorKind::AddrInUse => continue,
                Err(e) => return Err(e),
            }
        }
        Err(io::Error::new(
            io::ErrorKind::AddrInUse,
            format!("no free port in {}..={}", ports.start(), ports.end()),
        ))
    }
}

#[async_trait]
impl RpcTransport for UdpTransport {
    fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    async fn handle_forever(&self) -> io::Result<()> {
        loop {
            let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
            let (n, source) = self.socket.recv_from(&mut buf).await?;
            buf.truncate(n);

            let permit = self
                .workers
                .clone()
                .acquire_owned()
                .await
                .expect("worker semaphore closed");
            let mut context = Context::new(
                self.local_addr.port(),
                source,
                Protocol::Udp,
                self.shared.clone(),
            );
            let socket = self.socket.clone();
            tokio::spawn(async move {
                let _permit = permit;
                match dispatch(buf, &mut context).await {
                    Ok(Some(reply)) => {
                        // Best effort; the client retries on loss.
                        if let Err(e) = socket.send_to(&reply, source).await {
                            debug!("UDP reply to {source} failed: {e:?}");
                        }
                    }
                    Ok(None) => {}
                    Err(e) => {
                        // Not decodable far enough to reply; drop silently.
                        debug!("dropping undecodable datagram from {source}: {e:?}");
                    }
                }
            });
        }
    }
}
