//! RPC message structures as defined in RFC 5531.
//!
//! A message is a transaction id followed by a discriminated union over
//! CALL and REPLY bodies. Replies are either accepted (possibly with a
//! per-procedure error status) or denied (RPC version mismatch or
//! authentication failure). Field order in the structs below is the wire
//! order; the codec macros serialize fields in declaration order.

// Keep RFC naming for the wire structures so they read against the protocol
// definition.
#![allow(non_camel_case_types)]

use std::io::{Read, Write};

use num_derive::{FromPrimitive, ToPrimitive};

use super::{deserialize, invalid_data, Deserialize, DeserializeStruct, Serialize,
    SerializeStruct};

/// The RPC protocol version this runtime speaks.
pub const RPC_VERSION_2: u32 = 2;

/// Maximum length of an auth credential or verifier body (RFC 5531 §8.2).
pub const MAX_AUTH_BODY_LENGTH: usize = 400;

/// Authentication flavor numbers assigned by IANA.
#[derive(Copy, Clone, Debug, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[repr(u32)]
#[non_exhaustive]
pub enum auth_flavor {
    /// No authentication.
    AUTH_NONE = 0,
    /// UNIX-style uid/gid credentials (AUTH_SYS in RFC 5531).
    AUTH_SYS = 1,
    /// Short-hand credential issued by the server.
    AUTH_SHORT = 2,
    /// Diffie-Hellman authentication (obsolete, never accepted here).
    AUTH_DH = 3,
    /// GSS-API based security (RFC 2203).
    RPCSEC_GSS = 6,
}

/// Authentication failure codes carried in AUTH_ERROR rejections.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[repr(u32)]
pub enum auth_stat {
    /// Credential is malformed or its flavor is not supported.
    #[default]
    AUTH_BADCRED = 1,
    /// Credential rejected; the client must begin a new session.
    AUTH_REJECTEDCRED = 2,
    /// Verifier is malformed.
    AUTH_BADVERF = 3,
    /// Verifier expired or replayed.
    AUTH_REJECTEDVERF = 4,
    /// Flavor too weak for the requested operation.
    AUTH_TOOWEAK = 5,
    /// Server rejected for reasons it will not state.
    AUTH_FAILED = 7,
    /// RPCSEC_GSS: no such context / credential problem.
    RPCSEC_GSS_CREDPROBLEM = 13,
    /// RPCSEC_GSS: context problem (expired, MIC failure, window).
    RPCSEC_GSS_CTXPROBLEM = 14,
}
crate::SerializeEnum!(auth_stat);
crate::DeserializeEnum!(auth_stat);

/// A credential or verifier: flavor number plus opaque body.
///
/// The flavor is kept as the raw wire value so credentials with flavors this
/// server does not implement still decode; the auth pipeline turns them into
/// an AUTH_BADCRED denial rather than a parse failure.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct opaque_auth {
    /// Wire flavor number; match against [`auth_flavor`].
    pub flavor: u32,
    /// Opaque payload interpreted per flavor.
    pub body: Vec<u8>,
}
DeserializeStruct!(opaque_auth, flavor, body);
SerializeStruct!(opaque_auth, flavor, body);

impl opaque_auth {
    /// The AUTH_NONE credential: flavor 0, empty body.
    pub fn none() -> opaque_auth {
        opaque_auth::default()
    }

    /// An RPCSEC_GSS verifier holding a MIC.
    pub fn gss(mic: Vec<u8>) -> opaque_auth {
        opaque_auth { flavor: auth_flavor::RPCSEC_GSS as u32, body: mic }
    }

    /// The known flavor this credential carries, if any.
    pub fn known_flavor(&self) -> Option<auth_flavor> {
        num_traits::FromPrimitive::from_u32(self.flavor)
    }
}

impl Default for opaque_auth {
    fn default() -> opaque_auth {
        opaque_auth { flavor: auth_flavor::AUTH_NONE as u32, body: Vec::new() }
    }
}

/// An RPC message: transaction id plus call or reply body.
///
/// The xid correlates a reply to its call; it is not a sequence number and
/// carries no ordering obligation.
#[derive(Clone, Debug, Default)]
pub struct rpc_msg {
    pub xid: u32,
    pub body: rpc_body,
}
DeserializeStruct!(rpc_msg, xid, body);
SerializeStruct!(rpc_msg, xid, body);

/// Message body union, discriminated by msg_type (CALL = 0, REPLY = 1).
#[derive(Clone, Debug)]
pub enum rpc_body {
    CALL(call_body),
    REPLY(reply_body),
}

impl Default for rpc_body {
    fn default() -> rpc_body {
        rpc_body::CALL(call_body::default())
    }
}

impl Serialize for rpc_body {
    fn serialize<W: Write>(&self, dest: &mut W) -> std::io::Result<()> {
        match self {
            rpc_body::CALL(v) => {
                0_u32.serialize(dest)?;
                v.serialize(dest)
            }
            rpc_body::REPLY(v) => {
                1_u32.serialize(dest)?;
                v.serialize(dest)
            }
        }
    }
}

impl Deserialize for rpc_body {
    fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
        match deserialize::<u32>(src)? {
            0 => *self = rpc_body::CALL(deserialize(src)?),
            1 => *self = rpc_body::REPLY(deserialize(src)?),
            msg_type => {
                return Err(invalid_data(format!("invalid message type {msg_type}")));
            }
        }
        Ok(())
    }
}

/// The header of a call. Procedure-specific arguments follow on the wire.
#[derive(Clone, Debug, Default)]
pub struct call_body {
    /// Must be [`RPC_VERSION_2`]; anything else is denied with RPC_MISMATCH.
    pub rpcvers: u32,
    pub prog: u32,
    pub vers: u32,
    pub proc: u32,
    pub cred: opaque_auth,
    pub verf: opaque_auth,
}
DeserializeStruct!(call_body, rpcvers, prog, vers, proc, cred, verf);
SerializeStruct!(call_body, rpcvers, prog, vers, proc, cred, verf);

/// Reply body union: the call was either accepted or denied.
#[derive(Clone, Debug)]
pub enum reply_body {
    MSG_ACCEPTED(accepted_reply),
    MSG_DENIED(rejected_reply),
}

impl Default for reply_body {
    fn default() -> reply_body {
        reply_body::MSG_ACCEPTED(accepted_reply::default())
    }
}

impl Serialize for reply_body {
    fn serialize<W: Write>(&self, dest: &mut W) -> std::io::Result<()> {
        match self {
            reply_body::MSG_ACCEPTED(v) => {
                0_u32.serialize(dest)?;
                v.serialize(dest)
            }
            reply_body::MSG_DENIED(v) => {
                1_u32.serialize(dest)?;
                v.serialize(dest)
            }
        }
    }
}

impl Deserialize for reply_body {
    fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
        match deserialize::<u32>(src)? {
            0 => *self = reply_body::MSG_ACCEPTED(deserialize(src)?),
            1 => *self = reply_body::MSG_DENIED(deserialize(src)?),
            reply_stat => {
                return Err(invalid_data(format!("invalid reply status {reply_stat}")));
            }
        }
        Ok(())
    }
}

/// Lowest and highest version the server supports, reported on mismatches.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct mismatch_info {
    pub low: u32,
    pub high: u32,
}
DeserializeStruct!(mismatch_info, low, high);
SerializeStruct!(mismatch_info, low, high);

/// Reply to a call the server accepted. Acceptance does not imply success;
/// the reply_data arm reports per-call failures.
#[derive(Clone, Debug, Default)]
pub struct accepted_reply {
    /// Verifier the server presents back to the client (AUTH_NONE except
    /// for RPCSEC_GSS, where it carries a MIC).
    pub verf: opaque_auth,
    pub reply_data: accept_body,
}
DeserializeStruct!(accepted_reply, verf, reply_data);
SerializeStruct!(accepted_reply, verf, reply_data);

/// Outcome of an accepted call, discriminated by accept_stat.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[repr(u32)]
pub enum accept_body {
    /// Procedure executed; its results follow the reply header.
    #[default]
    SUCCESS,
    /// Program number is not registered on this server.
    PROG_UNAVAIL,
    /// Program is registered but not at the requested version.
    PROG_MISMATCH(mismatch_info),
    /// Procedure number is not provided by the program.
    PROC_UNAVAIL,
    /// The procedure arguments could not be decoded.
    GARBAGE_ARGS,
    /// Internal failure while executing the procedure.
    SYSTEM_ERR,
}

impl Serialize for accept_body {
    fn serialize<W: Write>(&self, dest: &mut W) -> std::io::Result<()> {
        match self {
            accept_body::SUCCESS => 0_u32.serialize(dest),
            accept_body::PROG_UNAVAIL => 1_u32.serialize(dest),
            accept_body::PROG_MISMATCH(v) => {
                2_u32.serialize(dest)?;
                v.serialize(dest)
            }
            accept_body::PROC_UNAVAIL => 3_u32.serialize(dest),
            accept_body::GARBAGE_ARGS => 4_u32.serialize(dest),
            accept_body::SYSTEM_ERR => 5_u32.serialize(dest),
        }
    }
}

impl Deserialize for accept_body {
    fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
        match deserialize::<u32>(src)? {
            0 => *self = accept_body::SUCCESS,
            1 => *self = accept_body::PROG_UNAVAIL,
            2 => *self = accept_body::PROG_MISMATCH(deserialize(src)?),
            3 => *self = accept_body::PROC_UNAVAIL,
            4 => *self = accept_body::GARBAGE_ARGS,
            5 => *self = accept_body::SYSTEM_ERR,
            accept_stat => {
                return Err(invalid_data(format!("invalid accept stat {accept_stat}")));
            }
        }
        Ok(())
    }
}

/// Reply to a call the server refused to execute.
#[derive(Clone, Debug)]
pub enum rejected_reply {
    /// The caller's RPC protocol version is unsupported; the supported
    /// range rides along.
    RPC_MISMATCH(mismatch_info),
    /// The caller failed authentication.
    AUTH_ERROR(auth_stat),
}

impl Default for rejected_reply {
    fn default() -> rejected_reply {
        rejected_reply::AUTH_ERROR(auth_stat::default())
    }
}

impl Serialize for rejected_reply {
    fn serialize<W: Write>(&self, dest: &mut W) -> std::io::Result<()> {
        match self {
            rejected_reply::RPC_MISMATCH(v) => {
                0_u32.serialize(dest)?;
                v.serialize(dest)
            }
            rejected_reply::AUTH_ERROR(v) => {
                1_u32.serialize(dest)?;
                v.serialize(dest)
            }
        }
    }
}

impl Deserialize for rejected_reply {
    fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
        match deserialize::<u32>(src)? {
            0 => *self = rejected_reply::RPC_MISMATCH(deserialize(src)?),
            1 => *self = rejected_reply::AUTH_ERROR(deserialize(src)?),
            stat => return Err(invalid_data(format!("invalid reject stat {stat}"))),
        }
        Ok(())
    }
}

/// Accepted SUCCESS reply with the given server verifier. The procedure
/// results are appended after this header by the caller.
pub fn make_success_reply(xid: u32, verf: opaque_auth) -> rpc_msg {
    let reply = reply_body::MSG_ACCEPTED(accepted_reply {
        verf,
        reply_data: accept_body::SUCCESS,
    });
    rpc_msg { xid, body: rpc_body::REPLY(reply) }
}

/// Accepted reply: the program number has no registrations.
pub fn prog_unavail_reply_message(xid: u32) -> rpc_msg {
    let reply = reply_body::MSG_ACCEPTED(accepted_reply {
        verf: opaque_auth::none(),
        reply_data: accept_body::PROG_UNAVAIL,
    });
    rpc_msg { xid, body: rpc_body::REPLY(reply) }
}

/// Accepted reply: program registered but not at this version; `low`/`high`
/// are the smallest and largest registered versions.
pub fn prog_mismatch_reply_message(xid: u32, low: u32, high: u32) -> rpc_msg {
    let reply = reply_body::MSG_ACCEPTED(accepted_reply {
        verf: opaque_auth::none(),
        reply_data: accept_body::PROG_MISMATCH(mismatch_info { low, high }),
    });
    rpc_msg { xid, body: rpc_body::REPLY(reply) }
}

/// Accepted reply: the program does not implement this procedure.
pub fn proc_unavail_reply_message(xid: u32) -> rpc_msg {
    let reply = reply_body::MSG_ACCEPTED(accepted_reply {
        verf: opaque_auth::none(),
        reply_data: accept_body::PROC_UNAVAIL,
    });
    rpc_msg { xid, body: rpc_body::REPLY(reply) }
}

/// Accepted reply: argument decoding failed.
pub fn garbage_args_reply_message(xid: u32) -> rpc_msg {
    let reply = reply_body::MSG_ACCEPTED(accepted_reply {
        verf: opaque_auth::none(),
        reply_data: accept_body::GARBAGE_ARGS,
    });
    rpc_msg { xid, body: rpc_body::REPLY(reply) }
}

/// Accepted reply: the handler failed internally.
pub fn system_err_reply_message(xid: u32) -> rpc_msg {
    let reply = reply_body::MSG_ACCEPTED(accepted_reply {
        verf: opaque_auth::none(),
        reply_data: accept_body::SYSTEM_ERR,
    });
    rpc_msg { xid, body: rpc_body::REPLY(reply) }
}

/// Denied reply: caller spoke an RPC version other than 2.
pub fn rpc_vers_mismatch_reply_message(xid: u32) -> rpc_msg {
    let reply = rejected_reply::RPC_MISMATCH(mismatch_info {
        low: RPC_VERSION_2,
        high: RPC_VERSION_2,
    });
    rpc_msg { xid, body: rpc_body::REPLY(reply_body::MSG_DENIED(reply)) }
}

/// Denied reply: authentication failed for the stated reason.
pub fn auth_error_reply_message(xid: u32, why: auth_stat) -> rpc_msg {
    let reply = rejected_reply::AUTH_ERROR(why);
    rpc_msg { xid, body: rpc_body::REPLY(reply_body::MSG_DENIED(reply)) }
}
