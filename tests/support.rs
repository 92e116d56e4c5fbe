#![allow(dead_code)]

use std::io::Cursor;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use sunrpc::auth::{AcceptedContext, GssContext, GssMechanism, GssRejection};
use sunrpc::rpc::context::SharedState;
use sunrpc::rpc::{Context, HandlerStatus, ProgramRegistry, Protocol, RpcHandler,
    TransactionTracker, DEFAULT_MAX_RECORD_SIZE};
use sunrpc::xdr::rpc::{call_body, opaque_auth, rpc_body, rpc_msg, RPC_VERSION_2};
use sunrpc::xdr::{deserialize, Serialize, XdrConfig, XdrStream};

pub const ECHO_PROGRAM: u32 = 200_105;
pub const ECHO_VERSION: u32 = 3;

pub const PROC_NULL: u32 = 0;
pub const PROC_ECHO: u32 = 1;
pub const PROC_FAIL: u32 = 2;
pub const PROC_PANIC: u32 = 3;

/// Test program: proc 0 is the conventional null, proc 1 echoes a variable
/// opaque, proc 2 reports an internal failure, proc 3 panics.
pub struct EchoHandler;

#[async_trait]
impl RpcHandler for EchoHandler {
    async fn call(
        &self,
        proc: u32,
        args: &mut XdrStream,
        reply: &mut XdrStream,
        _context: &Context,
    ) -> HandlerStatus {
        match proc {
            PROC_NULL => HandlerStatus::Success,
            PROC_ECHO => {
                let payload = match args.decode::<Vec<u8>>() {
                    Ok(payload) => payload,
                    Err(_) => return HandlerStatus::GarbageArgs,
                };
                match reply.encode(&payload) {
                    Ok(()) => HandlerStatus::Success,
                    Err(_) => HandlerStatus::SystemErr,
                }
            }
            PROC_FAIL => HandlerStatus::SystemErr,
            PROC_PANIC => panic!("handler blew up"),
            _ => HandlerStatus::ProcUnavail,
        }
    }
}

/// Builds the shared server state used by the dispatch-level tests.
pub fn shared_state(gss: Option<sunrpc::auth::GssAuthenticator>) -> Arc<SharedState> {
    let registry = ProgramRegistry::new();
    registry.register(ECHO_PROGRAM, ECHO_VERSION, Arc::new(EchoHandler));
    Arc::new(SharedState {
        registry,
        gss,
        transaction_tracker: TransactionTracker::new(Duration::from_secs(60)),
        max_record_size: DEFAULT_MAX_RECORD_SIZE,
        idle_timeout: None,
        xdr: XdrConfig::default(),
    })
}

pub fn test_context(shared: Arc<SharedState>) -> Context {
    Context::new(0, "127.0.0.1:1234".parse().unwrap(), Protocol::Tcp, shared)
}

static NEXT_XID: AtomicU32 = AtomicU32::new(100);

pub fn next_xid() -> u32 {
    NEXT_XID.fetch_add(1, Ordering::Relaxed)
}

/// Encodes a call message followed by its argument bytes.
pub fn encode_call(xid: u32, call: call_body, args: &[u8]) -> Vec<u8> {
    let msg = rpc_msg { xid, body: rpc_body::CALL(call) };
    let mut out = Vec::new();
    msg.serialize(&mut out).expect("serialize call");
    out.extend_from_slice(args);
    out
}

pub fn simple_call(xid: u32, prog: u32, vers: u32, proc: u32, args: &[u8]) -> Vec<u8> {
    encode_call(
        xid,
        call_body {
            rpcvers: RPC_VERSION_2,
            prog,
            vers,
            proc,
            cred: opaque_auth::none(),
            verf: opaque_auth::none(),
        },
        args,
    )
}

/// Decodes a reply message, returning it and a cursor positioned at the
/// reply body.
pub fn decode_reply(bytes: &[u8]) -> (rpc_msg, Cursor<Vec<u8>>) {
    let mut cursor = Cursor::new(bytes.to_vec());
    let msg = deserialize::<rpc_msg>(&mut cursor).expect("deserialize reply");
    (msg, cursor)
}

/// The octets a GSS header MIC covers: xid through the credential.
pub fn gss_header_bytes(xid: u32, call: &call_body) -> Vec<u8> {
    let mut data = Vec::new();
    xid.serialize(&mut data).unwrap();
    0u32.serialize(&mut data).unwrap();
    call.rpcvers.serialize(&mut data).unwrap();
    call.prog.serialize(&mut data).unwrap();
    call.vers.serialize(&mut data).unwrap();
    call.proc.serialize(&mut data).unwrap();
    call.cred.serialize(&mut data).unwrap();
    data
}

const WRAP_KEY: u8 = 0x5a;
const MIC_LEN: usize = 8;

fn toy_mic(data: &[u8]) -> Vec<u8> {
    // FNV-1a folded into eight octets; deterministic and keyless, which is
    // all the protocol plumbing under test needs.
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for b in data {
        hash ^= u64::from(*b);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash.to_be_bytes().to_vec()
}

/// Mechanism standing in for a real GSS implementation: single-leg
/// establishment, FNV MICs, XOR wrapping. `two_leg` exercises
/// CONTINUE_INIT handling.
pub struct TestMechanism {
    pub principal: String,
    pub two_leg: bool,
    pub reject_tokens: bool,
}

impl TestMechanism {
    pub fn new() -> Self {
        TestMechanism {
            principal: "alice@EXAMPLE.COM".to_string(),
            two_leg: false,
            reject_tokens: false,
        }
    }
}

struct TestGssContext {
    principal: String,
    complete: bool,
}

impl GssContext for TestGssContext {
    fn principal(&self) -> String {
        self.principal.clone()
    }

    fn get_mic(&self, data: &[u8]) -> Vec<u8> {
        toy_mic(data)
    }

    fn verify_mic(&self, data: &[u8], mic: &[u8]) -> bool {
        mic.len() == MIC_LEN && toy_mic(data) == mic
    }

    fn wrap(&self, data: &[u8]) -> Vec<u8> {
        let mut out = toy_mic(data);
        out.extend(data.iter().map(|b| b ^ WRAP_KEY));
        out
    }

    fn unwrap(&self, data: &[u8]) -> Option<Vec<u8>> {
        if data.len() < MIC_LEN {
            return None;
        }
        let plain: Vec<u8> = data[MIC_LEN..].iter().map(|b| b ^ WRAP_KEY).collect();
        if toy_mic(&plain) == data[..MIC_LEN] {
            Some(plain)
        } else {
            None
        }
    }
}

impl GssMechanism for TestMechanism {
    fn accept_sec_context(
        &self,
        pending: Option<Box<dyn GssContext>>,
        input_token: &[u8],
    ) -> Result<AcceptedContext, GssRejection> {
        if self.reject_tokens {
            return Err(GssRejection { major: 0x000d_0000, minor: 1 });
        }
        let complete = pending.is_some() || !self.two_leg;
        Ok(AcceptedContext {
            context: Box::new(TestGssContext {
                principal: self.principal.clone(),
                complete,
            }),
            output_token: input_token.iter().rev().copied().collect(),
            complete,
        })
    }
}

/// Client-side MIC/wrap helpers mirroring [`TestMechanism`], for building
/// wire-correct GSS calls in tests.
pub mod client_gss {
    use super::{toy_mic, MIC_LEN, WRAP_KEY};

    pub fn mic(data: &[u8]) -> Vec<u8> {
        toy_mic(data)
    }

    pub fn wrap(data: &[u8]) -> Vec<u8> {
        let mut out = toy_mic(data);
        out.extend(data.iter().map(|b| b ^ WRAP_KEY));
        out
    }

    pub fn unwrap(data: &[u8]) -> Option<Vec<u8>> {
        if data.len() < MIC_LEN {
            return None;
        }
        let plain: Vec<u8> = data[MIC_LEN..].iter().map(|b| b ^ WRAP_KEY).collect();
        (toy_mic(&plain) == data[..MIC_LEN]).then_some(plain)
    }
}
