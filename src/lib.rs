//! An ONC-RPC (Sun RPC) server runtime in Rust.
//!
//! This library implements the core of an RPC version 2 server as defined
//! in RFC 5531: an XDR serialization engine over a growable segmented
//! buffer, record-marked TCP and datagram UDP transports, a dispatcher
//! routing calls to handlers registered by (program, version), pluggable
//! authentication flavors including RPCSEC_GSS (RFC 2203), and portmapper
//! self-registration (RFC 1833).
//!
//! ## Main Components
//!
//! - `buffer`: the segmented [`ByteBuffer`](buffer::ByteBuffer) with
//!   read/write cursors and big-endian accessors that backs every message.
//!
//! - `xdr`: the XDR (RFC 4506) codec: primitive and composite type
//!   serialization plus the [`XdrStream`](xdr::XdrStream) lifecycle that
//!   owns a buffer for the duration of one message.
//!
//! - `rpc`: record framing for TCP, per-connection FIFO pipelines,
//!   retransmission tracking, and the dispatcher with its
//!   [`RpcHandler`](rpc::RpcHandler) trait.
//!
//! - `auth`: the authentication pipeline: AUTH_NONE, AUTH_SYS, and
//!   RPCSEC_GSS with a pluggable [`GssMechanism`](auth::GssMechanism).
//!
//! - `tcp` / `udp` / `transport`: the bundled tokio transports and the
//!   narrow interface the server consumes from them.
//!
//! - `server`: the [`RpcServerBuilder`] that owns registrations, session
//!   tables, and configuration, binds the transports, and publishes the
//!   served programs to the host portmapper.
//!
//! ## Standards Compliance
//!
//! - RFC 5531: RPC: Remote Procedure Call Protocol Specification Version 2
//! - RFC 4506: XDR: External Data Representation Standard
//! - RFC 1833: Binding Protocols for ONC RPC Version 2
//! - RFC 2203: RPCSEC_GSS Protocol Specification
//!
//! ## Usage
//!
//! Implement [`rpc::RpcHandler`] for each program, register it on an
//! [`RpcServerBuilder`], `bind()`, and `serve()`.

pub mod auth;
pub mod buffer;
pub mod portmap_client;
pub mod rpc;
pub mod server;
pub mod tcp;
pub mod transport;
pub mod udp;
pub mod xdr;

pub use server::{Protocols, RpcServer, RpcServerBuilder};
