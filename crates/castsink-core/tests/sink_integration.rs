//! End-to-end exercises of `Sink<mio::net::TcpStream>` against real loopback
//! sockets, covering the scenarios from `spec.md` §8: single-client
//! delivery, hard-limit drop, streamheader precedence, and flush-then-close.

use std::{
    io::Read,
    net::{IpAddr, Ipv4Addr, SocketAddr, TcpListener},
    time::Duration,
};

use castsink_core::{Notification, Sink, SinkConfig, Status};

fn connected_pair() -> (mio::net::TcpStream, std::net::TcpStream) {
    let listener =
        TcpListener::bind(SocketAddr::from((IpAddr::V4(Ipv4Addr::LOCALHOST), 0))).expect("bind listener");
    let addr = listener.local_addr().unwrap();
    let client = std::net::TcpStream::connect(addr).expect("connect");
    let (server, _peer) = listener.accept().expect("accept");
    server.set_nonblocking(true).expect("nonblocking");
    client.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
    (mio::net::TcpStream::from_std(server), client)
}

#[test]
fn single_client_receives_rendered_buffer() {
    let (server, mut client) = connected_pair();
    let (sink, _rx) = Sink::new(SinkConfig::new()).expect("create sink");
    sink.start().expect("start");

    sink.add(server);
    sink.render(b"hello".to_vec(), None, false, false).expect("render");

    let mut buf = [0_u8; 5];
    client.read_exact(&mut buf).expect("read rendered bytes");
    assert_eq!(&buf, b"hello");

    sink.stop().expect("stop");
}

#[test]
fn streamheader_precedes_first_buffer_for_new_client() {
    let (sink, _rx) = Sink::new(SinkConfig::new()).expect("create sink");
    sink.start().expect("start");

    sink.render(b"HDR".to_vec(), None, true, false).expect("render header");

    let (server, mut client) = connected_pair();
    sink.add(server);
    sink.render(b"DATA".to_vec(), None, false, false).expect("render data");

    let mut buf = [0_u8; 7];
    client.read_exact(&mut buf).expect("read header + data");
    assert_eq!(&buf, b"HDRDATA");

    sink.stop().expect("stop");
}

#[test]
fn hard_limit_marks_client_slow_and_notifies() {
    let (server, _client) = connected_pair();
    let config = SinkConfig::new().with_units_max(1);
    let (sink, rx) = Sink::new(config).expect("create sink");
    sink.start().expect("start");

    sink.add(server);
    sink.render(b"a".to_vec(), None, false, false).unwrap();
    sink.render(b"b".to_vec(), None, false, false).unwrap();

    let added = rx.recv_timeout(Duration::from_secs(5)).expect("added notification");
    assert!(matches!(added, Notification::ClientAdded { .. }));

    let removed = rx.recv_timeout(Duration::from_secs(5)).expect("removed notification");
    match removed {
        Notification::ClientRemoved { status, .. } => assert_eq!(status, Status::Slow),
        _ => panic!("expected ClientRemoved"),
    }

    let fd_removed = rx.recv_timeout(Duration::from_secs(5)).expect("fd-removed notification");
    assert!(matches!(fd_removed, Notification::ClientFdRemoved { .. }));

    sink.stop().expect("stop");
}

#[test]
fn remove_flush_drains_backlog_then_closes() {
    let (server, mut client) = connected_pair();
    let (sink, rx) = Sink::new(SinkConfig::new()).expect("create sink");
    sink.start().expect("start");

    let identity = sink.add(server);
    sink.render(b"bye".to_vec(), None, false, false).unwrap();
    sink.remove_flush(identity);

    let mut buf = [0_u8; 3];
    client.read_exact(&mut buf).expect("read drained backlog");
    assert_eq!(&buf, b"bye");

    loop {
        match rx.recv_timeout(Duration::from_secs(5)).expect("notification") {
            Notification::ClientAdded { .. } => continue,
            Notification::ClientRemoved { status, .. } => {
                assert_eq!(status, Status::Removed);
                break;
            }
            Notification::ClientFdRemoved { .. } => panic!("fd-removed arrived before removed"),
        }
    }

    sink.stop().expect("stop");
}

#[test]
fn duplicate_add_emits_added_then_duplicate_removed_then_fd_removed() {
    use std::os::fd::{AsRawFd, FromRawFd};

    let (sink, rx) = Sink::new(SinkConfig::new()).expect("create sink");
    sink.start().expect("start");

    let (server, _client) = connected_pair();
    let fd = server.as_raw_fd();
    let identity = sink.add(server);

    // Same descriptor, added again: `spec.md`'s "add(h); add(h)" round trip.
    let dup = unsafe { mio::net::TcpStream::from_raw_fd(fd) };
    let dup_identity = sink.add(dup);
    assert_eq!(dup_identity, identity);

    match rx.recv_timeout(Duration::from_secs(5)).expect("added notification") {
        Notification::ClientAdded { identity: got } => assert_eq!(got, identity),
        _ => panic!("expected ClientAdded"),
    }

    match rx.recv_timeout(Duration::from_secs(5)).expect("duplicate notification") {
        Notification::ClientRemoved { identity: got, status, .. } => {
            assert_eq!(got, identity);
            assert_eq!(status, Status::Duplicate);
        }
        _ => panic!("expected ClientRemoved"),
    }

    match rx.recv_timeout(Duration::from_secs(5)).expect("fd-removed notification") {
        Notification::ClientFdRemoved { identity: got, handle } => {
            assert_eq!(got, identity);
            // `handle` aliases the fd still owned by the live client inside
            // `sink`; forget it here instead of letting it close on drop.
            std::mem::forget(handle);
        }
        _ => panic!("expected ClientFdRemoved"),
    }

    sink.stop().expect("stop");
}

#[test]
fn add_full_rejects_inverted_burst_spec() {
    use castsink_core::{SyncMethod, Unit};

    let (sink, _rx) = Sink::<mio::net::TcpStream>::new(SinkConfig::new()).expect("create sink");
    let (server, _client) = connected_pair();

    let err = sink
        .add_full(server, SyncMethod::Burst, (Unit::Buffers, 10), (Unit::Buffers, 2))
        .expect_err("max below min must be rejected");
    assert_eq!(err.min_value, 10);
    assert_eq!(err.max_value, 2);
}
