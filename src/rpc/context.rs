//! Per-message execution context.
//!
//! Every decoded call is dispatched with a [`Context`] naming the peer, the
//! transport it arrived on, and the caller identity the auth pipeline
//! established, plus a handle on the state shared by all connections
//! (program registry, GSS session table, retransmission tracker,
//! configuration).

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use crate::auth::{Caller, GssAuthenticator};
use crate::rpc::dispatcher::ProgramRegistry;
use crate::rpc::transaction_tracker::TransactionTracker;
use crate::xdr::XdrConfig;

/// Transport a message arrived on.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Protocol {
    Tcp,
    Udp,
}

/// State shared by every connection of one server instance. Owned by the
/// server builder, handed to transports behind an `Arc`.
pub struct SharedState {
    /// Program/version registrations.
    pub registry: ProgramRegistry,
    /// GSS machinery; absent when the server accepts no RPCSEC_GSS calls.
    pub gss: Option<GssAuthenticator>,
    /// Retransmission dedup table.
    pub transaction_tracker: TransactionTracker,
    /// Ceiling on an assembled TCP record.
    pub max_record_size: usize,
    /// Close TCP connections quiet for this long; `None` means never.
    pub idle_timeout: Option<std::time::Duration>,
    /// Codec policy knobs.
    pub xdr: XdrConfig,
}

/// Execution context for one RPC message.
#[derive(Clone)]
pub struct Context {
    /// Port the receiving transport is bound to.
    pub local_port: u16,
    /// Peer address; replies on UDP go back here.
    pub client_addr: SocketAddr,
    /// Transport the call arrived on.
    pub protocol: Protocol,
    /// Identity established by the auth pipeline. `Caller::Anonymous` until
    /// the credential has been verified.
    pub caller: Caller,
    /// Server-wide shared state.
    pub shared: Arc<SharedState>,
}

impl Context {
    /// Context for a freshly arrived, not yet authenticated message.
    pub fn new(
        local_port: u16,
        client_addr: SocketAddr,
        protocol: Protocol,
        shared: Arc<SharedState>,
    ) -> Self {
        Context {
            local_port,
            client_addr,
            protocol,
            caller: Caller::Anonymous,
            shared,
        }
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("rpc::Context")
            .field("local_port", &self.local_port)
            .field("client_addr", &self.client_addr)
            .field("protocol", &self.protocol)
            .field("caller", &self.caller)
            .finish()
    }
}
