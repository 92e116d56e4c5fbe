//! TCP transport: accepts connections and runs one framing-and-dispatch
//! pipeline per connection.
//!
//! A connection is serialized: records dispatch in arrival order through
//! its command queue, while separate connections proceed in parallel.
//! Framing violations (oversized records, malformed fragment headers) and
//! write failures close the connection.

use std::io;
use std::net::SocketAddr;
use std::ops::RangeInclusive;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::rpc::command_queue::{CommandQueue, CommandResult};
use crate::rpc::context::{Context, Protocol, SharedState};
use crate::rpc::dispatch;
use crate::rpc::fragment::{write_record, RecordAssembler, MAX_FRAGMENT_SIZE};
use crate::transport::RpcTransport;

/// TCP listener bound to one local address.
pub struct TcpTransport {
    listener: TcpListener,
    local_addr: SocketAddr,
    shared: Arc<SharedState>,
}

impl TcpTransport {
    /// Binds to `ip:port`. Port 0 lets the OS pick.
    pub async fn bind(ip: &str, port: u16, shared: Arc<SharedState>) -> io::Result<Self> {
        let listener = TcpListener::bind((ip, port)).await?;
        let local_addr = listener.local_addr()?;
        info!("TCP transport listening on {local_addr}");
        Ok(TcpTransport { listener, local_addr, shared })
    }

    /// Binds to the first free port in `ports`.
    pub async fn bind_range(
        ip: &str,
        ports: RangeInclusive<u16>,
        shared: Arc<SharedState>,
    ) -> io::Result<Self> {
        for port in ports.clone() {
            match Self::bind(ip, port, shared.clone()).await {
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
impl RpcTransport for TcpTransport {
    fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    async fn handle_forever(&self) -> io::Result<()> {
        loop {
            let (socket, peer) = self.listener.accept().await?;
            let context = Context::new(
                self.local_addr.port(),
                peer,
                Protocol::Tcp,
                self.shared.clone(),
            );
            info!("accepting connection from {}", context.client_addr);
            tokio::spawn(async move {
                if let Err(e) = process_connection(socket, context).await {
                    debug!("connection closed: {e:?}");
                }
            });
        }
    }
}

/// Adapter putting [`dispatch`] behind the command-queue processor type.
fn process_rpc_command(
    data: Vec<u8>,
    mut context: Context,
) -> futures::future::BoxFuture<'static, CommandResult> {
    Box::pin(async move { dispatch(data, &mut context).await })
}

/// Pumps one established connection: socket bytes feed the record
/// assembler, complete records go through the FIFO command queue, and
/// encoded replies are written back as record-marked fragments.
async fn process_connection(
    mut socket: TcpStream,
    context: Context,
) -> Result<(), anyhow::Error> {
    let _ = socket.set_nodelay(true);
    let max_record_size = context.shared.max_record_size;
    let idle_timeout = context.shared.idle_timeout;
    let (result_sender, mut result_receiver) = mpsc::unbounded_channel();
    let queue = CommandQueue::new(process_rpc_command, result_sender);
    let mut assembler = RecordAssembler::new(max_record_size);
    let mut complete = Vec::new();

    loop {
        // Rebuilt every iteration, so any socket or pipeline activity
        // restarts the idle clock.
        let idle = async {
            match idle_timeout {
                Some(limit) => tokio::time::sleep(limit).await,
                None => std::future::pending().await,
            }
        };
        tokio::select! {
            _ = socket.readable() => {
                let mut buf = [0; 128_000];
                match socket.try_read(&mut buf) {
                    Ok(0) => return Ok(()),
                    Ok(n) => {
                        // A framing violation is fatal to the connection.
                        assembler.push(&buf[..n], &mut complete)?;
                        for record in complete.drain(..) {
                            queue.submit(record, context.clone())?;
                        }
                    }
                    Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {}
                    Err(e) => {
                        debug!("connection read failed: {e:?}");
                        return Err(e.into());
                    }
                }
            },
            reply = result_receiver.recv() => {
                match reply {
                    Some(Ok(Some(msg))) => {
                        if let Err(e) = write_record(&mut socket, &msg, MAX_FRAGMENT_SIZE).await {
                            error!("reply write failed: {e:?}");
                            return Err(e);
                        }
                    }
                    Some(Ok(None)) => {
                        // No reply owed (retransmission or silent drop).
                    }
                    Some(Err(e)) => {
                        debug!("dispatch failed, closing connection: {e:?}");
                        return Err(e);
                    }
                    None => {
                        return Err(anyhow::anyhow!("unexpected pipeline termination"));
                    }
                }
            },
            _ = idle => {
                debug!("closing idle connection from {}", context.client_addr);
                return Ok(());
            }
        }
    }
}
