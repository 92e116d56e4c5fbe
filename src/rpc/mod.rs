//! RPC protocol runtime (RFC 5531): record framing, per-connection
//! pipelines, retransmission tracking, and call dispatch.
//!
//! The inbound flow is transport bytes → [`RecordAssembler`] →
//! [`dispatch`] (header decode, auth pipeline, registry lookup, handler
//! invocation) → encoded reply back through the transport. TCP connections
//! are serialized through a [`CommandQueue`]; UDP datagrams dispatch in
//! parallel.

pub mod command_queue;
pub mod context;
pub mod dispatcher;
pub mod fragment;
pub mod transaction_tracker;

pub use command_queue::{AsyncCommandProcessor, CommandQueue, CommandResult};
pub use context::{Context, Protocol, SharedState};
pub use dispatcher::{
    dispatch, HandlerStatus, LookupResult, ProgramKey, ProgramRegistry, RpcHandler,
};
pub use fragment::{write_record, FramingError, RecordAssembler, MAX_FRAGMENT_SIZE};
pub use transaction_tracker::TransactionTracker;

/// Default ceiling on an assembled TCP record (1 MiB). Bulk-data programs
/// can negotiate this upward through the server builder.
pub const DEFAULT_MAX_RECORD_SIZE: usize = 1024 * 1024;
