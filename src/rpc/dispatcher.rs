//! Call routing: program registry, handler trait, and the dispatch path
//! that turns a complete record into an encoded reply.
//!
//! Dispatch order follows RFC 5531: decode the call header, gate on the RPC
//! version, drop retransmissions, run the auth pipeline, then route on
//! (program, version). A missing program yields PROG_UNAVAIL; a registered
//! program at the wrong version yields PROG_MISMATCH carrying the lowest
//! and highest registered versions; otherwise the handler runs and its
//! status picks the accepted-reply arm written around whatever the handler
//! produced as the reply body.

use std::collections::HashMap;
use std::io::Write;
use std::sync::{Arc, RwLock};

use anyhow::bail;
use async_trait::async_trait;
use futures::FutureExt;
use tracing::{debug, error, warn};

use crate::auth::{self, AuthDecision};
use crate::rpc::context::Context;
use crate::xdr::rpc::{
    auth_error_reply_message, garbage_args_reply_message, make_success_reply,
    prog_mismatch_reply_message, prog_unavail_reply_message, proc_unavail_reply_message,
    rpc_body, rpc_msg, rpc_vers_mismatch_reply_message, system_err_reply_message, RPC_VERSION_2,
};
use crate::xdr::XdrStream;

/// Identifies one registered program version.
pub type ProgramKey = (u32, u32);

/// Status a handler reports after running a procedure. The dispatcher maps
/// it onto the accepted-reply arm; for anything but `Success` the body the
/// handler wrote is discarded.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum HandlerStatus {
    /// Procedure ran; its results are in the reply stream.
    Success,
    /// The program does not implement the requested procedure.
    ProcUnavail,
    /// The procedure arguments failed to decode.
    GarbageArgs,
    /// Internal failure while executing the procedure.
    SystemErr,
}

/// A registered RPC program version.
///
/// `call` runs on whatever worker task the connection pipeline happens to
/// use; implementations must be thread-safe and hold no expectations about
/// call ordering across connections. `args` is positioned past the RPC
/// header (and past any GSS wrapping); the reply body goes into `reply`.
#[async_trait]
pub trait RpcHandler: Send + Sync {
    async fn call(
        &self,
        proc: u32,
        args: &mut XdrStream,
        reply: &mut XdrStream,
        context: &Context,
    ) -> HandlerStatus;
}

/// Outcome of a registry lookup.
pub enum LookupResult {
    Found(Arc<dyn RpcHandler>),
    ProgUnavail,
    ProgMismatch { low: u32, high: u32 },
}

/// Concurrent (program, version) → handler map.
///
/// Lookups clone an immutable snapshot behind an `Arc`, so they never block
/// on a registration in progress and never observe a torn state; writes
/// rebuild the map and swap the snapshot.
#[derive(Default)]
pub struct ProgramRegistry {
    programs: RwLock<Arc<HashMap<ProgramKey, Arc<dyn RpcHandler>>>>,
}

impl ProgramRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler for (program, version), replacing any previous
    /// registration for that key.
    pub fn register(&self, prog: u32, vers: u32, handler: Arc<dyn RpcHandler>) {
        let mut guard = self.programs.write().expect("program registry lock poisoned");
        let mut next: HashMap<_, _> = (**guard).clone();
        next.insert((prog, vers), handler);
        *guard = Arc::new(next);
    }

    /// Removes a registration. Returns true when the key was present.
    pub fn unregister(&self, prog: u32, vers: u32) -> bool {
        let mut guard = self.programs.write().expect("program registry lock poisoned");
        let mut next: HashMap<_, _> = (**guard).clone();
        let removed = next.remove(&(prog, vers)).is_some();
        *guard = Arc::new(next);
        removed
    }

    /// Resolves (program, version) to a handler, or to the reply the
    /// dispatcher owes when no handler matches.
    pub fn lookup(&self, prog: u32, vers: u32) -> LookupResult {
        let snapshot = self
            .programs
            .read()
            .expect("program registry lock poisoned")
            .clone();
        if let Some(handler) = snapshot.get(&(prog, vers)) {
            return LookupResult::Found(handler.clone());
        }
        let mut versions = snapshot.keys().filter(|(p, _)| *p == prog).map(|(_, v)| *v);
        match versions.next() {
            None => LookupResult::ProgUnavail,
            Some(first) => {
                let (low, high) = versions.fold((first, first), |(lo, hi), v| {
                    (lo.min(v), hi.max(v))
                });
                LookupResult::ProgMismatch { low, high }
            }
        }
    }

    /// All registered (program, version) keys, for portmap publication.
    pub fn registrations(&self) -> Vec<ProgramKey> {
        let snapshot = self
            .programs
            .read()
            .expect("program registry lock poisoned")
            .clone();
        snapshot.keys().copied().collect()
    }
}

/// Serializes a reply header and appends an already-encoded body.
pub(crate) fn encode_reply(msg: &rpc_msg, body: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut stream = XdrStream::new();
    stream.begin_encoding()?;
    stream.encode(msg)?;
    stream.write_all(body)?;
    stream.end_encoding()?;
    Ok(stream.into_bytes())
}

/// Processes one complete record.
///
/// Returns the encoded reply, `None` when no reply is owed (retransmission
/// or a silent auth drop), or an error when not enough of the header could
/// be decoded to reply at all; the transport then closes the connection
/// (TCP) or drops the datagram (UDP).
pub async fn dispatch(data: Vec<u8>, context: &mut Context) -> anyhow::Result<Option<Vec<u8>>> {
    let mut args = XdrStream::from_bytes(data).with_config(context.shared.xdr);
    args.begin_decoding()?;
    let recv = args.decode::<rpc_msg>()?;
    let xid = recv.xid;
    let call = match recv.body {
        rpc_body::CALL(call) => call,
        rpc_body::REPLY(_) => {
            error!("unexpectedly received a reply instead of a call");
            bail!("bad RPC call format");
        }
    };

    if call.rpcvers != RPC_VERSION_2 {
        warn!("invalid RPC version {} != {}", call.rpcvers, RPC_VERSION_2);
        return Ok(Some(encode_reply(&rpc_vers_mismatch_reply_message(xid), &[])?));
    }

    if context
        .shared
        .transaction_tracker
        .is_retransmission(xid, context.client_addr)
    {
        debug!("retransmission detected, xid: {}, client: {}", xid, context.client_addr);
        return Ok(None);
    }

    let res = dispatch_call(xid, call, args, context).await;
    context
        .shared
        .transaction_tracker
        .mark_processed(xid, context.client_addr);
    res
}

async fn dispatch_call(
    xid: u32,
    call: crate::xdr::rpc::call_body,
    mut args: XdrStream,
    context: &mut Context,
) -> anyhow::Result<Option<Vec<u8>>> {
    let verified = match auth::verify_call(xid, &call, &mut args, context)? {
        AuthDecision::Deny(why) => {
            debug!("denying call xid {} from {}: {:?}", xid, context.client_addr, why);
            return Ok(Some(encode_reply(&auth_error_reply_message(xid, why), &[])?));
        }
        AuthDecision::Garbage => {
            return Ok(Some(encode_reply(&garbage_args_reply_message(xid), &[])?));
        }
        AuthDecision::Control(reply) => return Ok(Some(reply)),
        AuthDecision::Drop => return Ok(None),
        AuthDecision::Proceed(v) => v,
    };

    context.caller = verified.caller;
    let mut args = match verified.args_override {
        Some(inner) => inner,
        None => args,
    };

    let handler = match context.shared.registry.lookup(call.prog, call.vers) {
        LookupResult::ProgUnavail => {
            warn!("unknown RPC program number {}", call.prog);
            return Ok(Some(encode_reply(&prog_unavail_reply_message(xid), &[])?));
        }
        LookupResult::ProgMismatch { low, high } => {
            warn!(
                "unsupported version {} for program {} (supported {}..={})",
                call.vers, call.prog, low, high
            );
            return Ok(Some(encode_reply(
                &prog_mismatch_reply_message(xid, low, high),
                &[],
            )?));
        }
        LookupResult::Found(handler) => handler,
    };

    let mut body = XdrStream::new();
    body.begin_encoding()?;
    let outcome = std::panic::AssertUnwindSafe(
        handler.call(call.proc, &mut args, &mut body, context),
    )
    .catch_unwind()
    .await;
    let status = match outcome {
        Ok(status) => status,
        Err(_) => {
            error!(
                "handler for program {} version {} panicked on proc {}",
                call.prog, call.vers, call.proc
            );
            HandlerStatus::SystemErr
        }
    };
    body.end_encoding()?;

    let reply = match status {
        HandlerStatus::Success => {
            let body_bytes = body.into_bytes();
            let (verifier, body_bytes) = match verified.sealer {
                Some(sealer) => (sealer.reply_verifier()?, sealer.seal(&body_bytes)?),
                None => (verified.verifier, body_bytes),
            };
            encode_reply(&make_success_reply(xid, verifier), &body_bytes)?
        }
        HandlerStatus::ProcUnavail => encode_reply(&proc_unavail_reply_message(xid), &[])?,
        HandlerStatus::GarbageArgs => encode_reply(&garbage_args_reply_message(xid), &[])?,
        HandlerStatus::SystemErr => encode_reply(&system_err_reply_message(xid), &[])?,
    };
    Ok(Some(reply))
}
