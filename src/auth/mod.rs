//! Authentication pipeline.
//!
//! Runs after the call header is decoded and before dispatch. Each flavor
//! contributes one verification step; the outcome either lets the call
//! proceed (with the reply verifier and caller identity fixed), answers the
//! call entirely (GSS control procedures), denies it, or drops it without a
//! reply.

pub mod gss;
pub mod unix;

pub use gss::{
    AcceptedContext, GssAuthenticator, GssContext, GssMechanism, GssRejection,
    GssSessionConfig, ReplySealer, SequenceCheck, SequenceWindow,
};
pub use unix::AuthUnixParams;

use tracing::debug;

use crate::rpc::context::Context;
use crate::xdr::gss::gss_service;
use crate::xdr::rpc::{auth_flavor, auth_stat, call_body, opaque_auth, MAX_AUTH_BODY_LENGTH};
use crate::xdr::XdrStream;

/// Identity the pipeline established for a call.
#[derive(Clone, Debug, Default)]
pub enum Caller {
    /// AUTH_NONE, or a call that has not been verified yet.
    #[default]
    Anonymous,
    /// AUTH_SYS identity, asserted by the client.
    Unix(AuthUnixParams),
    /// RPCSEC_GSS identity, authenticated by the mechanism.
    Gss(GssCaller),
}

/// The authenticated principal of a GSS call and its protection level.
#[derive(Clone, Debug)]
pub struct GssCaller {
    pub principal: String,
    pub service: gss_service,
}

/// A call the pipeline cleared for dispatch.
pub struct VerifiedCall {
    /// Verifier for the accepted reply (AUTH_NONE except for GSS).
    pub verifier: opaque_auth,
    /// Identity to record on the call context.
    pub caller: Caller,
    /// Replacement argument stream when the flavor unwrapped the body
    /// (GSS integrity/privacy); `None` leaves the original stream in place.
    pub args_override: Option<XdrStream>,
    /// Reply-body protection, present on GSS DATA calls.
    pub sealer: Option<ReplySealer>,
}

/// Outcome of the pipeline for one call.
pub enum AuthDecision {
    /// Verified; continue to dispatch.
    Proceed(VerifiedCall),
    /// The auth layer answered the call itself (GSS INIT/DESTROY); the
    /// encoded reply is ready to transmit.
    Control(Vec<u8>),
    /// Reply GARBAGE_ARGS: the flavor could not decode its portion of the
    /// call body.
    Garbage,
    /// Reply MSG_DENIED with AUTH_ERROR(why).
    Deny(auth_stat),
    /// No reply at all (GSS sequence numbers already seen inside the
    /// replay window).
    Drop,
}

/// Verifies the credential and verifier of a decoded call.
pub fn verify_call(
    xid: u32,
    call: &call_body,
    args: &mut XdrStream,
    context: &Context,
) -> anyhow::Result<AuthDecision> {
    if call.cred.body.len() > MAX_AUTH_BODY_LENGTH
        || call.verf.body.len() > MAX_AUTH_BODY_LENGTH
    {
        debug!("auth body exceeds {} octets", MAX_AUTH_BODY_LENGTH);
        return Ok(AuthDecision::Deny(auth_stat::AUTH_BADCRED));
    }

    match call.cred.known_flavor() {
        Some(auth_flavor::AUTH_NONE) => Ok(AuthDecision::Proceed(VerifiedCall {
            verifier: opaque_auth::none(),
            caller: Caller::Anonymous,
            args_override: None,
            sealer: None,
        })),
        Some(auth_flavor::AUTH_SYS) => match AuthUnixParams::parse(&call.cred.body) {
            Ok(params) => Ok(AuthDecision::Proceed(VerifiedCall {
                verifier: opaque_auth::none(),
                caller: Caller::Unix(params),
                args_override: None,
                sealer: None,
            })),
            Err(e) => {
                debug!("malformed AUTH_SYS credential: {e}");
                Ok(AuthDecision::Deny(auth_stat::AUTH_BADCRED))
            }
        },
        // Short-hand credentials are never issued by this runtime, so any
        // presented one is stale.
        Some(auth_flavor::AUTH_SHORT) => Ok(AuthDecision::Deny(auth_stat::AUTH_REJECTEDCRED)),
        Some(auth_flavor::AUTH_DH) => Ok(AuthDecision::Deny(auth_stat::AUTH_TOOWEAK)),
        Some(auth_flavor::RPCSEC_GSS) => match &context.shared.gss {
            Some(authenticator) => authenticator.process(xid, call, args),
            None => {
                debug!("RPCSEC_GSS credential but no GSS mechanism configured");
                Ok(AuthDecision::Deny(auth_stat::AUTH_BADCRED))
            }
        },
        None => {
            debug!("unknown auth flavor {}", call.cred.flavor);
            Ok(AuthDecision::Deny(auth_stat::AUTH_BADCRED))
        }
    }
}
