//! RPCSEC_GSS wire structures (RFC 2203).
//!
//! The GSS credential rides in the call's `cred` field; its body is the
//! structure below. Control procedures (INIT, CONTINUE_INIT, DESTROY)
//! carry GSS tokens in the procedure argument/result position, while DATA
//! calls wrap the real procedure arguments according to the negotiated
//! service level.

#![allow(non_camel_case_types)]

use num_derive::{FromPrimitive, ToPrimitive};

use super::{DeserializeStruct, SerializeStruct};

/// The only RPCSEC_GSS protocol version defined.
pub const RPCSEC_GSS_VERSION_1: u32 = 1;

/// Sequence numbers at or above this value force the client to destroy the
/// context and negotiate a new one (RFC 2203 §5.3.1).
pub const MAXSEQ: u32 = 0x8000_0000;

/// Control/data discriminator inside the GSS credential.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[repr(u32)]
pub enum gss_proc {
    /// Ordinary call on an established context.
    #[default]
    RPCSEC_GSS_DATA = 0,
    /// First token of context establishment.
    RPCSEC_GSS_INIT = 1,
    /// Follow-up token of a multi-leg establishment.
    RPCSEC_GSS_CONTINUE_INIT = 2,
    /// Tear the context down.
    RPCSEC_GSS_DESTROY = 3,
}
crate::SerializeEnum!(gss_proc);
crate::DeserializeEnum!(gss_proc);

/// Protection applied to the call and reply bodies of DATA calls.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[repr(u32)]
pub enum gss_service {
    /// Header authentication only; bodies travel in the clear.
    #[default]
    rpc_gss_svc_none = 1,
    /// Bodies carry a MIC over (seq_num, arguments).
    rpc_gss_svc_integrity = 2,
    /// Bodies are wrapped (encrypted) by the GSS mechanism.
    rpc_gss_svc_privacy = 3,
}
crate::SerializeEnum!(gss_service);
crate::DeserializeEnum!(gss_service);

/// Body of an RPCSEC_GSS credential.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct rpc_gss_cred {
    /// Must be [`RPCSEC_GSS_VERSION_1`].
    pub version: u32,
    pub proc: gss_proc,
    /// Per-context sequence number; validated against the replay window on
    /// DATA calls, ignored on control calls.
    pub seq_num: u32,
    pub service: gss_service,
    /// Server-issued context handle; empty on the initial INIT.
    pub handle: Vec<u8>,
}
DeserializeStruct!(rpc_gss_cred, version, proc, seq_num, service, handle);
SerializeStruct!(rpc_gss_cred, version, proc, seq_num, service, handle);

/// Result of an INIT or CONTINUE_INIT call, returned as the procedure
/// results of the control call.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct rpc_gss_init_res {
    /// Handle the client presents on subsequent calls.
    pub handle: Vec<u8>,
    /// GSS-API major status of the establishment step.
    pub gss_major: u32,
    /// GSS-API minor (mechanism) status.
    pub gss_minor: u32,
    /// Size of the replay window the server will enforce.
    pub seq_window: u32,
    /// Output token to feed the client's security context, possibly empty.
    pub token: Vec<u8>,
}
DeserializeStruct!(rpc_gss_init_res, handle, gss_major, gss_minor, seq_window, token);
SerializeStruct!(rpc_gss_init_res, handle, gss_major, gss_minor, seq_window, token);

/// Body layout of a DATA call or reply at the integrity service level:
/// an opaque (seq_num ++ data) followed by its MIC.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct rpc_gss_integ_data {
    pub databody_integ: Vec<u8>,
    pub checksum: Vec<u8>,
}
DeserializeStruct!(rpc_gss_integ_data, databody_integ, checksum);
SerializeStruct!(rpc_gss_integ_data, databody_integ, checksum);
