use std::{
    io::Write,
    net::{IpAddr, Ipv4Addr, SocketAddr, TcpListener},
    thread,
    time::Duration,
};

use castsink_net::{ClientHandle, PollOutcome, PollSet, Token};

const CLIENT_TOKEN: Token = Token(1);

#[test]
fn wait_reports_readable_then_interrupted_on_flush() {
    let listener = TcpListener::bind(SocketAddr::from((IpAddr::V4(Ipv4Addr::LOCALHOST), 0)))
        .expect("bind listener");
    let addr = listener.local_addr().unwrap();

    let writer = thread::spawn(move || {
        thread::sleep(Duration::from_millis(20));
        let mut conn = std::net::TcpStream::connect(addr).expect("connect");
        conn.write_all(b"hello").unwrap();
        // Keep the connection open until the test is done with it.
        thread::sleep(Duration::from_millis(200));
    });

    let (std_stream, _peer) = listener.accept().expect("accept");
    std_stream.set_nonblocking(true).unwrap();
    let mut mio_stream = mio::net::TcpStream::from_std(std_stream);

    let mut poll = PollSet::new().expect("poll set");
    let handle = poll.handle();
    handle.add(&mut mio_stream, CLIENT_TOKEN, true, false).expect("register");

    let outcome = poll.wait(Some(Duration::from_secs(5))).expect("wait");
    match outcome {
        PollOutcome::Ready(ready) => {
            assert!(ready.can_read(CLIENT_TOKEN));
            assert!(!ready.has_error(CLIENT_TOKEN));
        }
        _ => panic!("expected readable event"),
    }

    let mut discarded = 0;
    while discarded < 5 {
        discarded += ClientHandle::read_discard(&mut mio_stream, 512).unwrap();
    }

    handle.set_flushing(true);
    let outcome = poll.wait(Some(Duration::from_secs(5))).expect("wait after flush");
    assert!(matches!(outcome, PollOutcome::Interrupted));

    writer.join().unwrap();
}

#[test]
fn restart_unblocks_a_pending_wait() {
    let mut poll = PollSet::new().expect("poll set");
    let handle = poll.handle();

    let waiter = thread::spawn(move || {
        // Nothing registered: this would block for the full timeout unless
        // restart() wakes it early.
        let started = std::time::Instant::now();
        let outcome = poll.wait(Some(Duration::from_secs(30))).expect("wait");
        (started.elapsed(), matches!(outcome, PollOutcome::Interrupted))
    });

    thread::sleep(Duration::from_millis(50));
    handle.restart();

    let (elapsed, was_interrupted) = waiter.join().unwrap();
    assert!(was_interrupted);
    assert!(elapsed < Duration::from_secs(5), "restart() should unblock wait() promptly");
}
