mod support;

use std::io::Cursor;
use std::sync::Arc;

use sunrpc::rpc::{dispatch, HandlerStatus, LookupResult, ProgramRegistry, RpcHandler};
use sunrpc::xdr::rpc::{
    accept_body, auth_stat, call_body, opaque_auth, rejected_reply, reply_body, rpc_body,
};
use sunrpc::xdr::{deserialize, Serialize};

use support::{
    decode_reply, next_xid, shared_state, simple_call, test_context, EchoHandler, ECHO_PROGRAM,
    ECHO_VERSION, PROC_ECHO, PROC_FAIL, PROC_NULL, PROC_PANIC,
};

fn accepted(reply: &sunrpc::xdr::rpc::rpc_msg) -> &sunrpc::xdr::rpc::accepted_reply {
    match &reply.body {
        rpc_body::REPLY(reply_body::MSG_ACCEPTED(accepted)) => accepted,
        other => panic!("expected MSG_ACCEPTED, got {other:?}"),
    }
}

fn denied(reply: &sunrpc::xdr::rpc::rpc_msg) -> &rejected_reply {
    match &reply.body {
        rpc_body::REPLY(reply_body::MSG_DENIED(denied)) => denied,
        other => panic!("expected MSG_DENIED, got {other:?}"),
    }
}

#[tokio::test]
async fn echo_round_trip() {
    let mut context = test_context(shared_state(None));
    let payload = b"some random data".to_vec();
    let mut args = Vec::new();
    payload.serialize(&mut args).unwrap();

    let xid = next_xid();
    let call = simple_call(xid, ECHO_PROGRAM, ECHO_VERSION, PROC_ECHO, &args);
    let reply = dispatch(call, &mut context)
        .await
        .expect("dispatch")
        .expect("reply owed");

    let (msg, mut body) = decode_reply(&reply);
    assert_eq!(msg.xid, xid);
    let accepted = accepted(&msg);
    assert_eq!(accepted.reply_data, accept_body::SUCCESS);
    assert_eq!(accepted.verf, opaque_auth::none());
    assert_eq!(deserialize::<Vec<u8>>(&mut body).unwrap(), payload);
}

#[tokio::test]
async fn unregistered_program_is_prog_unavail() {
    let mut context = test_context(shared_state(None));
    let xid = next_xid();
    let call = simple_call(xid, ECHO_PROGRAM + 1, 1, PROC_NULL, &[]);
    let reply = dispatch(call, &mut context).await.unwrap().unwrap();

    let (msg, _) = decode_reply(&reply);
    assert_eq!(msg.xid, xid);
    assert_eq!(accepted(&msg).reply_data, accept_body::PROG_UNAVAIL);
}

#[tokio::test]
async fn wrong_version_reports_registered_range() {
    let shared = shared_state(None);
    shared.registry.register(ECHO_PROGRAM, 7, Arc::new(EchoHandler));
    let mut context = test_context(shared);

    let xid = next_xid();
    let call = simple_call(xid, ECHO_PROGRAM, 5, PROC_NULL, &[]);
    let reply = dispatch(call, &mut context).await.unwrap().unwrap();

    let (msg, _) = decode_reply(&reply);
    match &accepted(&msg).reply_data {
        accept_body::PROG_MISMATCH(info) => {
            assert_eq!(info.low, ECHO_VERSION);
            assert_eq!(info.high, 7);
        }
        other => panic!("expected PROG_MISMATCH, got {other:?}"),
    }
}

#[tokio::test]
async fn unknown_procedure_is_proc_unavail() {
    let mut context = test_context(shared_state(None));
    let call = simple_call(next_xid(), ECHO_PROGRAM, ECHO_VERSION, 99, &[]);
    let reply = dispatch(call, &mut context).await.unwrap().unwrap();
    let (msg, _) = decode_reply(&reply);
    assert_eq!(accepted(&msg).reply_data, accept_body::PROC_UNAVAIL);
}

#[tokio::test]
async fn truncated_arguments_are_garbage_args() {
    let mut context = test_context(shared_state(None));
    // PROC_ECHO expects a variable opaque; hand it a bare length prefix.
    let call = simple_call(next_xid(), ECHO_PROGRAM, ECHO_VERSION, PROC_ECHO, &[0, 0, 0, 32]);
    let reply = dispatch(call, &mut context).await.unwrap().unwrap();
    let (msg, _) = decode_reply(&reply);
    assert_eq!(accepted(&msg).reply_data, accept_body::GARBAGE_ARGS);
}

#[tokio::test]
async fn handler_failure_is_system_err() {
    let mut context = test_context(shared_state(None));
    let call = simple_call(next_xid(), ECHO_PROGRAM, ECHO_VERSION, PROC_FAIL, &[]);
    let reply = dispatch(call, &mut context).await.unwrap().unwrap();
    let (msg, _) = decode_reply(&reply);
    assert_eq!(accepted(&msg).reply_data, accept_body::SYSTEM_ERR);
}

#[tokio::test]
async fn handler_panic_is_system_err() {
    let mut context = test_context(shared_state(None));
    let call = simple_call(next_xid(), ECHO_PROGRAM, ECHO_VERSION, PROC_PANIC, &[]);
    let reply = dispatch(call, &mut context).await.unwrap().unwrap();
    let (msg, _) = decode_reply(&reply);
    assert_eq!(accepted(&msg).reply_data, accept_body::SYSTEM_ERR);
}

#[tokio::test]
async fn wrong_rpc_version_is_denied() {
    let mut context = test_context(shared_state(None));
    let xid = next_xid();
    let call = support::encode_call(
        xid,
        call_body {
            rpcvers: 3,
            prog: ECHO_PROGRAM,
            vers: ECHO_VERSION,
            proc: PROC_NULL,
            cred: opaque_auth::none(),
            verf: opaque_auth::none(),
        },
        &[],
    );
    let reply = dispatch(call, &mut context).await.unwrap().unwrap();

    let (msg, _) = decode_reply(&reply);
    assert_eq!(msg.xid, xid);
    match denied(&msg) {
        rejected_reply::RPC_MISMATCH(info) => {
            assert_eq!((info.low, info.high), (2, 2));
        }
        other => panic!("expected RPC_MISMATCH, got {other:?}"),
    }
}

#[tokio::test]
async fn unknown_auth_flavor_is_denied() {
    let mut context = test_context(shared_state(None));
    let call = support::encode_call(
        next_xid(),
        call_body {
            rpcvers: 2,
            prog: ECHO_PROGRAM,
            vers: ECHO_VERSION,
            proc: PROC_NULL,
            cred: opaque_auth { flavor: 0xff, body: vec![] },
            verf: opaque_auth::none(),
        },
        &[],
    );
    let reply = dispatch(call, &mut context).await.unwrap().unwrap();
    let (msg, _) = decode_reply(&reply);
    match denied(&msg) {
        rejected_reply::AUTH_ERROR(why) => assert_eq!(*why, auth_stat::AUTH_BADCRED),
        other => panic!("expected AUTH_ERROR, got {other:?}"),
    }
}

#[tokio::test]
async fn retransmission_is_dropped() {
    let mut context = test_context(shared_state(None));
    let xid = next_xid();
    let call = simple_call(xid, ECHO_PROGRAM, ECHO_VERSION, PROC_NULL, &[]);

    let first = dispatch(call.clone(), &mut context).await.unwrap();
    assert!(first.is_some());
    let second = dispatch(call, &mut context).await.unwrap();
    assert!(second.is_none());
}

#[tokio::test]
async fn truncated_header_is_an_error() {
    let mut context = test_context(shared_state(None));
    let call = simple_call(next_xid(), ECHO_PROGRAM, ECHO_VERSION, PROC_NULL, &[]);
    let result = dispatch(call[..10].to_vec(), &mut context).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn auth_sys_identity_reaches_the_handler() {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use sunrpc::auth::{AuthUnixParams, Caller};
    use sunrpc::rpc::Context;
    use sunrpc::xdr::XdrStream;

    struct CaptureHandler {
        seen: Arc<Mutex<Option<Caller>>>,
    }

    #[async_trait]
    impl RpcHandler for CaptureHandler {
        async fn call(
            &self,
            _proc: u32,
            _args: &mut XdrStream,
            _reply: &mut XdrStream,
            context: &Context,
        ) -> HandlerStatus {
            *self.seen.lock().unwrap() = Some(context.caller.clone());
            HandlerStatus::Success
        }
    }

    let seen = Arc::new(Mutex::new(None));
    let shared = shared_state(None);
    shared
        .registry
        .register(ECHO_PROGRAM, 9, Arc::new(CaptureHandler { seen: seen.clone() }));
    let mut context = test_context(shared);

    let params = AuthUnixParams {
        stamp: 0,
        machinename: b"client.example".to_vec(),
        uid: 501,
        gid: 20,
        gids: [12, 20].into_iter().collect(),
    };
    let mut cred_body = Vec::new();
    params.serialize(&mut cred_body).unwrap();

    let call = support::encode_call(
        next_xid(),
        call_body {
            rpcvers: 2,
            prog: ECHO_PROGRAM,
            vers: 9,
            proc: PROC_NULL,
            cred: opaque_auth { flavor: 1, body: cred_body },
            verf: opaque_auth::none(),
        },
        &[],
    );
    let reply = dispatch(call, &mut context).await.unwrap().unwrap();
    let (msg, _) = decode_reply(&reply);
    assert_eq!(accepted(&msg).reply_data, accept_body::SUCCESS);

    let captured = seen.lock().unwrap().take();
    match captured {
        Some(Caller::Unix(recorded)) => assert_eq!(recorded, params),
        other => panic!("expected AUTH_SYS caller, got {other:?}"),
    }
}

#[tokio::test]
async fn oversized_auth_body_is_denied() {
    let mut context = test_context(shared_state(None));
    let call = support::encode_call(
        next_xid(),
        call_body {
            rpcvers: 2,
            prog: ECHO_PROGRAM,
            vers: ECHO_VERSION,
            proc: PROC_NULL,
            cred: opaque_auth { flavor: 0, body: vec![0; 401] },
            verf: opaque_auth::none(),
        },
        &[],
    );
    let reply = dispatch(call, &mut context).await.unwrap().unwrap();
    let (msg, _) = decode_reply(&reply);
    match denied(&msg) {
        rejected_reply::AUTH_ERROR(why) => assert_eq!(*why, auth_stat::AUTH_BADCRED),
        other => panic!("expected AUTH_ERROR, got {other:?}"),
    }
}

#[test]
fn registry_lookup_is_never_torn() {
    // Writers churn other keys while readers hammer a key that is always
    // registered; a lookup must never miss it.
    let registry = Arc::new(ProgramRegistry::new());
    registry.register(ECHO_PROGRAM, ECHO_VERSION, Arc::new(EchoHandler));

    std::thread::scope(|scope| {
        for _ in 0..4 {
            let registry = registry.clone();
            scope.spawn(move || {
                for _ in 0..2_000 {
                    match registry.lookup(ECHO_PROGRAM, ECHO_VERSION) {
                        LookupResult::Found(_) => {}
                        _ => panic!("registered key vanished during lookup"),
                    }
                }
            });
        }
        for writer in 0..2u32 {
            let registry = registry.clone();
            scope.spawn(move || {
                for i in 0..2_000u32 {
                    let vers = 100 + writer * 1000 + (i % 5);
                    registry.register(ECHO_PROGRAM, vers, Arc::new(EchoHandler));
                    registry.unregister(ECHO_PROGRAM, vers);
                }
            });
        }
    });

    assert!(matches!(
        registry.lookup(ECHO_PROGRAM, ECHO_VERSION),
        LookupResult::Found(_)
    ));
}

#[test]
fn mismatch_range_reflects_registrations() {
    let registry = ProgramRegistry::new();
    registry.register(77, 2, Arc::new(EchoHandler));
    registry.register(77, 5, Arc::new(EchoHandler));
    registry.register(77, 3, Arc::new(EchoHandler));

    match registry.lookup(77, 9) {
        LookupResult::ProgMismatch { low, high } => {
            assert_eq!((low, high), (2, 5));
        }
        _ => panic!("expected PROG_MISMATCH"),
    }
    match registry.lookup(78, 1) {
        LookupResult::ProgUnavail => {}
        _ => panic!("expected PROG_UNAVAIL"),
    }
}

#[tokio::test]
async fn reply_to_a_reply_is_rejected() {
    let mut context = test_context(shared_state(None));
    let msg = sunrpc::xdr::rpc::make_success_reply(next_xid(), opaque_auth::none());
    let mut wire = Vec::new();
    msg.serialize(&mut wire).unwrap();
    let mut cursor = Cursor::new(&wire);
    // Sanity: the message itself decodes.
    let _ = deserialize::<sunrpc::xdr::rpc::rpc_msg>(&mut cursor).unwrap();

    assert!(dispatch(wire, &mut context).await.is_err());
}
