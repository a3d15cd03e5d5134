//! Blocking and non-blocking message transfer over inproc connections

use carapace::prelude::*;
use std::time::{Duration, Instant};

const WAIT: Duration = Duration::from_secs(5);

fn setup() {
    carapace::init().unwrap();
    carapace::dev_tracing::init_tracing();
}

/// Open a socket whose blocking calls give up after [`WAIT`].
fn open(protocol: Protocol) -> Socket {
    let socket = Socket::open(protocol).unwrap();
    socket.set_duration(OptionName::RecvTimeout, WAIT).unwrap();
    socket.set_duration(OptionName::SendTimeout, WAIT).unwrap();
    socket
}

#[test]
fn test_req_rep_round_trip() {
    setup();
    let server = open(Protocol::Rep0);
    server.listen("inproc://send-recv-reqrep").unwrap();
    let client = open(Protocol::Req0);
    client.dial("inproc://send-recv-reqrep").unwrap();

    client.send(Message::from("hello")).unwrap();
    let request = server.recv().unwrap();
    assert_eq!(request.body(), b"hello");
    assert_eq!(
        request.get_option(OptionName::Url).unwrap().as_ref(),
        b"inproc://send-recv-reqrep"
    );

    server.send(Message::from("world")).unwrap();
    assert_eq!(client.recv().unwrap().body(), b"world");

    client.close().unwrap();
    server.close().unwrap();
}

#[test]
fn test_nonblocking_empty() {
    setup();
    let pull = open(Protocol::Pull0);
    assert!(pull.try_recv().unwrap().is_none());

    let push = open(Protocol::Push0);
    match push.try_send(Message::from("nobody")).unwrap() {
        SendOutcome::WouldBlock(msg) => assert_eq!(msg.body(), b"nobody"),
        SendOutcome::Sent => panic!("sent without a peer"),
    }

    push.close().unwrap();
    pull.close().unwrap();
}

/// A full receive queue pushes back on the sender.
#[test]
fn test_backpressure() {
    setup();
    let pull = open(Protocol::Pull0);
    pull.set_int(OptionName::RecvBuffer, 1).unwrap();
    pull.listen("inproc://send-recv-backpressure").unwrap();
    let push = open(Protocol::Push0);
    push.dial("inproc://send-recv-backpressure").unwrap();

    assert!(push.try_send(Message::from("one")).unwrap().is_sent());
    assert!(!push.try_send(Message::from("two")).unwrap().is_sent());

    assert_eq!(pull.recv().unwrap().body(), b"one");
    assert!(push.try_send(Message::from("three")).unwrap().is_sent());
    assert_eq!(pull.recv().unwrap().body(), b"three");

    push.close().unwrap();
    pull.close().unwrap();
}

/// A waiting send completes once the peer makes room.
#[test]
fn test_blocked_send_resumes() {
    setup();
    let pull = open(Protocol::Pull0);
    pull.set_int(OptionName::RecvBuffer, 0).unwrap();
    pull.listen("inproc://send-recv-resume").unwrap();
    let push = open(Protocol::Push0);
    push.dial("inproc://send-recv-resume").unwrap();

    let sender = std::thread::spawn(move || push.send(Message::from("queued")));
    std::thread::sleep(Duration::from_millis(20));
    assert_eq!(pull.recv().unwrap().body(), b"queued");
    sender.join().unwrap().unwrap();

    push.close().unwrap();
    pull.close().unwrap();
}

#[test]
fn test_message_layout_preserved() {
    setup();
    let pull = open(Protocol::Pull0);
    pull.listen("inproc://send-recv-layout").unwrap();
    let push = open(Protocol::Push0);
    push.dial("inproc://send-recv-layout").unwrap();

    let mut msg = Message::with_size(64).unwrap();
    msg.append_body_u32(0xdead_beef).unwrap();
    assert_eq!(msg.body().len(), 68);
    assert_eq!(msg.header().len(), 0);
    push.send(msg).unwrap();

    let mut received = pull.recv().unwrap();
    assert_eq!(received.body().len(), 68);
    assert!(received.header().is_empty());
    assert_eq!(received.chop_body_u32().unwrap(), 0xdead_beef);
    assert!(received.body().iter().all(|b| *b == 0));

    push.close().unwrap();
    pull.close().unwrap();
}

#[test]
fn test_context_round_trip() {
    setup();
    let server = open(Protocol::Rep0);
    server.listen("inproc://send-recv-context").unwrap();
    let context = Context::open(server).unwrap();

    let client = open(Protocol::Req0);
    client.dial("inproc://send-recv-context").unwrap();
    client.send(Message::from("job")).unwrap();

    let request = context.recv().unwrap();
    assert_eq!(request.body(), b"job");
    context.send(Message::from("done")).unwrap();
    assert_eq!(client.recv().unwrap().body(), b"done");

    context.close().unwrap();
    assert!(context.recv().unwrap_err().is_closed());
    client.close().unwrap();
    server.close().unwrap();
}

/// Messages above the receiver's `recv-size-max` are dropped.
#[test]
fn test_oversized_dropped() {
    setup();
    let pull = open(Protocol::Pull0);
    pull.set_size(OptionName::RecvSizeMax, 16).unwrap();
    pull.listen("inproc://send-recv-oversized").unwrap();
    let push = open(Protocol::Push0);
    push.dial("inproc://send-recv-oversized").unwrap();

    push.send(Message::from(vec![7_u8; 32])).unwrap();
    push.send(Message::from(vec![1_u8; 8])).unwrap();

    assert_eq!(pull.recv().unwrap().body(), &[1_u8; 8]);
    assert!(pull.try_recv().unwrap().is_none());

    push.close().unwrap();
    pull.close().unwrap();
}

#[test]
fn test_expired_dropped() {
    setup();
    let pull = open(Protocol::Pull0);
    pull.listen("inproc://send-recv-expired").unwrap();
    let push = open(Protocol::Push0);
    push.dial("inproc://send-recv-expired").unwrap();

    let mut stale = Message::from("stale");
    stale.set_expiry(Some(Instant::now()));
    push.send(stale).unwrap();
    let mut fresh = Message::from("fresh");
    fresh.set_expiry(Some(Instant::now() + Duration::from_secs(60)));
    push.send(fresh).unwrap();

    assert_eq!(pull.recv().unwrap().body(), b"fresh");
    assert!(pull.try_recv().unwrap().is_none());

    push.close().unwrap();
    pull.close().unwrap();
}

/// Sends rotate across connected peers.
#[test]
fn test_round_robin() {
    setup();
    let first = open(Protocol::Pull0);
    first.listen("inproc://send-recv-rr-1").unwrap();
    let second = open(Protocol::Pull0);
    second.listen("inproc://send-recv-rr-2").unwrap();

    let push = open(Protocol::Push0);
    push.dial("inproc://send-recv-rr-1").unwrap();
    push.dial("inproc://send-recv-rr-2").unwrap();

    for i in 0..4_u32 {
        let mut msg = Message::new();
        msg.append_body_u32(i).unwrap();
        push.send(msg).unwrap();
    }

    for pull in [first, second] {
        assert!(pull.try_recv().unwrap().is_some());
        assert!(pull.try_recv().unwrap().is_some());
        assert!(pull.try_recv().unwrap().is_none());
    }

    push.close().unwrap();
    first.close().unwrap();
    second.close().unwrap();
}

/// A message carrying a pipe goes back through that pipe only.
#[test]
fn test_directed_reply() {
    setup();
    let hub = open(Protocol::Bus0);
    hub.listen("inproc://send-recv-directed").unwrap();
    let alice = open(Protocol::Bus0);
    alice.dial("inproc://send-recv-directed").unwrap();
    let bob = open(Protocol::Bus0);
    bob.dial("inproc://send-recv-directed").unwrap();

    alice.send(Message::from("from alice")).unwrap();
    let request = hub.recv().unwrap();
    let pipe = request.pipe().unwrap();
    assert_eq!(pipe.socket().unwrap(), hub);

    for _ in 0..2 {
        let mut reply = Message::from("for alice");
        reply.set_pipe(Some(pipe));
        hub.send(reply).unwrap();
    }

    assert_eq!(alice.recv().unwrap().body(), b"for alice");
    assert_eq!(alice.recv().unwrap().body(), b"for alice");
    assert!(bob.try_recv().unwrap().is_none());

    for socket in [alice, bob, hub] {
        socket.close().unwrap();
    }
}

/// A send that fails hands the message back to the caller.
#[test]
fn test_send_error_returns_message() {
    setup();
    let push = open(Protocol::Push0);
    push.set_duration(OptionName::SendTimeout, Duration::from_millis(10))
        .unwrap();
    let err = push.send(Message::from("retry me")).unwrap_err();
    assert!(err.error.is_timeout());
    assert_eq!(err.into_message().unwrap().body(), b"retry me");

    push.close().unwrap();
    let err = push.send(Message::from("closed")).unwrap_err();
    assert!(err.error.is_closed());
    assert!(err.message.is_some());
}

#[test]
fn test_wrong_direction() {
    setup();
    let sub = open(Protocol::Sub0);
    let err = sub.send(Message::from("nope")).unwrap_err();
    assert_eq!(err.error.kind(), ErrorKind::NotSupported);

    let push = open(Protocol::Push0);
    assert_eq!(push.recv().unwrap_err().kind(), ErrorKind::NotSupported);

    sub.close().unwrap();
    push.close().unwrap();
}
