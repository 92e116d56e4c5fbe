//! Portmapper client (RFC 1833, version 2 mapping program).
//!
//! A small RPC client over UDP used for self-registration: the server
//! issues SET for every (program, version, protocol) binding on startup and
//! UNSET on teardown. GETPORT and DUMP are provided for completeness and
//! for probing the host portmapper in tests.

use std::io::Cursor;
use std::net::SocketAddr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{anyhow, bail};
use tokio::net::UdpSocket;
use tokio::time::timeout;
use tracing::trace;

use crate::xdr::portmap::{mapping, pmaplist, PortmapProcedure, PORT, PROGRAM, VERSION};
use crate::xdr::rpc::{
    accept_body, call_body, opaque_auth, reply_body, rpc_body, rpc_msg, RPC_VERSION_2,
};
use crate::xdr::{deserialize, Deserialize, Serialize};

const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_secs(2);

/// One-connection RPC client speaking to a portmapper.
pub struct PortmapClient {
    socket: UdpSocket,
    next_xid: u32,
    reply_timeout: Duration,
}

impl PortmapClient {
    /// Connects to the portmapper at `addr`.
    pub async fn connect(addr: SocketAddr) -> std::io::Result<Self> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        socket.connect(addr).await?;
        // Seed the xid off the clock so retries of a previous process are
        // not mistaken for our calls.
        let seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.subsec_nanos())
            .unwrap_or(1);
        Ok(PortmapClient {
            socket,
            next_xid: seed | 1,
            reply_timeout: DEFAULT_REPLY_TIMEOUT,
        })
    }

    /// Connects to the local portmapper on the well-known port.
    pub async fn local() -> std::io::Result<Self> {
        Self::connect(SocketAddr::from(([127, 0, 0, 1], PORT))).await
    }

    /// Overrides the per-call reply timeout.
    pub fn with_timeout(mut self, reply_timeout: Duration) -> Self {
        self.reply_timeout = reply_timeout;
        self
    }

    /// PMAPPROC_NULL: ping the portmapper.
    pub async fn null(&mut self) -> anyhow::Result<()> {
        self.call::<(), ()>(PortmapProcedure::PMAPPROC_NULL, &()).await
    }

    /// PMAPPROC_SET: registers a binding. False means the portmapper
    /// already had an entry for (prog, vers, prot).
    pub async fn set(&mut self, map: mapping) -> anyhow::Result<bool> {
        self.call(PortmapProcedure::PMAPPROC_SET, &map).await
    }

    /// PMAPPROC_UNSET: withdraws a binding. False means nothing matched.
    pub async fn unset(&mut self, map: mapping) -> anyhow::Result<bool> {
        self.call(PortmapProcedure::PMAPPROC_UNSET, &map).await
    }

    /// PMAPPROC_GETPORT: resolves (prog, vers, prot) to a port; 0 when the
    /// program is not registered.
    pub async fn getport(&mut self, map: mapping) -> anyhow::Result<u16> {
        let port: u32 = self.call(PortmapProcedure::PMAPPROC_GETPORT, &map).await?;
        Ok(port as u16)
    }

    /// PMAPPROC_DUMP: lists every binding the portmapper holds.
    pub async fn dump(&mut self) -> anyhow::Result<Vec<mapping>> {
        let head: Option<pmaplist> = self.call(PortmapProcedure::PMAPPROC_DUMP, &()).await?;
        let mut out = Vec::new();
        let mut next = head;
        while let Some(entry) = next {
            out.push(entry.map);
            next = entry.next.map(|b| *b);
        }
        Ok(out)
    }

    /// Sends one call and decodes the accepted SUCCESS results, retrying
    /// reads until the reply's xid matches the call's.
    async fn call<A, R>(&mut self, proc: PortmapProcedure, args: &A) -> anyhow::Result<R>
    where
        A: Serialize,
        R: Deserialize + Default,
    {
        let xid = self.next_xid;
        self.next_xid = self.next_xid.wrapping_add(1);

        let msg = rpc_msg {
            xid,
            body: rpc_body::CALL(call_body {
                rpcvers: RPC_VERSION_2,
                prog: PROGRAM,
                vers: VERSION,
                proc: proc as u32,
                cred: opaque_auth::none(),
                verf: opaque_auth::none(),
            }),
        };
        let mut request = Vec::new();
        msg.serialize(&mut request)?;
        args.serialize(&mut request)?;
        self.socket.send(&request).await?;
        trace!("portmap call {:?}, xid {}", proc, xid);

        let deadline = tokio::time::Instant::now() + self.reply_timeout;
        loop {
            let mut buf = vec![0u8; 8192];
            let n = timeout(deadline - tokio::time::Instant::now(), self.socket.recv(&mut buf))
                .await
                .map_err(|_| anyhow!("portmapper did not reply within {:?}", self.reply_timeout))??;
            buf.truncate(n);

            let mut cursor = Cursor::new(buf);
            let reply = deserialize::<rpc_msg>(&mut cursor)?;
            if reply.xid != xid {
                trace!("ignoring reply with foreign xid {}", reply.xid);
                continue;
            }
            let accepted = match reply.body {
                rpc_body::REPLY(reply_body::MSG_ACCEPTED(accepted)) => accepted,
                rpc_body::REPLY(reply_body::MSG_DENIED(denied)) => {
                    bail!("portmap call denied: {denied:?}");
                }
                rpc_body::CALL(_) => bail!("portmapper sent a call instead of a reply"),
            };
            match accepted.reply_data {
                accept_body::SUCCESS => return Ok(deserialize::<R>(&mut cursor)?),
                other => bail!("portmap call failed: {other:?}"),
            }
        }
    }
}
