//! The dispatch thread body: waits on the poll set, demultiplexes
//! readiness, drains client reads, drives client writes. `spec.md` §4.5.

use std::{io, sync::atomic::Ordering, time::Duration};

use castsink_net::{ClientHandle, PollHandle, PollOutcome, PollSet, PollSetError, ReadySet, Token};
use castsink_timing::{Nanos, Repeater};

use crate::{
    client::{Client, SessionCaps},
    config::SinkConfig,
    error::SinkError,
    payload::Payload,
    positioning,
    queue::BufferQueue,
    sink::{Inner, SinkShared, lock, remove_client_link, token_for},
    types::Status,
};

/// How long `wait()` blocks between activity-timeout sweeps when nothing
/// else wakes it.
const IDLE_WAIT: Duration = Duration::from_millis(250);

/// Floor between activity-timeout sweeps. A busy sink can stay under
/// constant I/O pressure and never see `PollOutcome::Timeout`, so the sweep
/// is paced off wall-clock time instead of off that one outcome variant.
const TIMEOUT_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Runs until `shared.running` is cleared and the poll set is flushed.
/// `spec.md` §4.5 steps 1-7.
pub(crate) fn run<H: ClientHandle>(shared: &SinkShared<H>, mut poll: PollSet) -> Result<(), SinkError> {
    let mut timeout_sweep = Repeater::every(TIMEOUT_SWEEP_INTERVAL);

    loop {
        if !shared.running.load(Ordering::Acquire) {
            return Ok(());
        }

        match poll.wait(Some(IDLE_WAIT)) {
            Ok(PollOutcome::Ready(ready)) => run_pass(shared, &ready),
            Ok(PollOutcome::Timeout) => {}
            Ok(PollOutcome::Interrupted) => {
                if !shared.running.load(Ordering::Acquire) {
                    return Ok(());
                }
            }
            Err(err) if is_ebadf(&err) => recover_ebadf(shared),
            Err(err) => return Err(SinkError::DispatchFatal(err)),
        }

        timeout_sweep.maybe(|_| check_timeouts(shared));
    }
}

/// `true` for the one `wait()` failure that's a single bad descriptor rather
/// than something wrong with the poll set itself.
fn is_ebadf(err: &PollSetError) -> bool {
    matches!(err, PollSetError::Fatal(io_err) if io_err.raw_os_error() == Some(libc::EBADF))
}

/// `spec.md` §4.5 step 4: on `EBADF`, probe every handle's validity under
/// the lock instead of tearing down the whole sink. Bad ones are marked
/// ERROR and removed through the normal path; `run` then retries `wait`.
fn recover_ebadf<H: ClientHandle>(shared: &SinkShared<H>) {
    let mut to_remove = Vec::new();
    {
        let mut inner = lock(&shared.inner);
        for client in &mut inner.clients {
            if !client.handle.is_valid() {
                client.status = Status::Error;
                to_remove.push(client.handle.identity());
            }
        }
    }
    for identity in to_remove {
        remove_client_link(shared, identity);
    }
}

/// Per-client inactivity sweep, paced by `timeout_sweep` rather than tied to
/// a bare `PollOutcome::Timeout` (`spec.md` §4.5 step 2), independent of the
/// producer-driven timeout check inside `queue_buffer`.
fn check_timeouts<H: ClientHandle>(shared: &SinkShared<H>) {
    if shared.config.timeout == Nanos::ZERO {
        return;
    }

    let now = Nanos::now();
    let mut to_remove = Vec::new();
    {
        let mut inner = lock(&shared.inner);
        for client in &mut inner.clients {
            if client.status == Status::Ok
                && u64::from(now.saturating_sub(client.stats.last_activity_time)) > shared.config.timeout.0
            {
                client.status = Status::Slow;
                to_remove.push(client.handle.identity());
            }
        }
    }
    for identity in to_remove {
        remove_client_link(shared, identity);
    }
}

/// One pass over every client with readiness news this tick. Holds the
/// client lock for the whole pass: the channel-based notification design
/// (`notify.rs`) means `remove_client_link` never needs to release it
/// mid-iteration, so there's no cookie-restart dance here — removed
/// clients are simply collected by identity and torn down after the lock
/// is dropped.
fn run_pass<H: ClientHandle>(shared: &SinkShared<H>, ready: &ReadySet) {
    let now = Nanos::now();
    let mut to_remove: Vec<u64> = Vec::new();
    let mut bytes_written: u64 = 0;

    {
        let mut inner = lock(&shared.inner);
        let Inner { clients, bufqueue, streamheader, .. } = &mut *inner;

        for client in clients.iter_mut() {
            if client.status.is_terminal() {
                to_remove.push(client.handle.identity());
                continue;
            }

            let token = token_for(&client.handle);

            if ready.has_error(token) {
                client.status = Status::Error;
                to_remove.push(client.handle.identity());
                continue;
            }
            if ready.has_closed(token) {
                client.status = Status::Closed;
                to_remove.push(client.handle.identity());
                continue;
            }

            if shared.config.handle_read && ready.can_read(token) {
                handle_client_read(client, now);
                if client.status.is_terminal() {
                    to_remove.push(client.handle.identity());
                    continue;
                }
            }

            if ready.can_write(token) {
                bytes_written +=
                    handle_client_write(client, bufqueue, streamheader, &shared.config, &shared.poll, token, now);
                if client.status.is_terminal() {
                    to_remove.push(client.handle.identity());
                }
            }
        }

        inner.bytes_served += bytes_written;
    }

    for identity in to_remove {
        remove_client_link(shared, identity);
    }
}

/// `spec.md` §4.5a: clients aren't expected to send anything. A read
/// signals either the peer closing (`available == 0`) or noise to drain
/// and discard.
fn handle_client_read<H: ClientHandle>(client: &mut Client<H>, now: Nanos) {
    let avail = match client.handle.read_available() {
        Ok(avail) => avail,
        Err(_) => {
            client.status = Status::Error;
            return;
        }
    };

    if avail == 0 {
        client.status = Status::Closed;
        return;
    }

    let mut remaining = avail;
    while remaining > 0 {
        match client.handle.read_discard(remaining) {
            Ok(0) => break,
            Ok(n) => remaining = remaining.saturating_sub(n),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
            Err(_) => {
                client.status = Status::Error;
                return;
            }
        }
    }
    client.stats.last_activity_time = now;
}

/// `spec.md` §4.5b. Loops until would-block or nothing left to send;
/// returns the number of bytes actually written (for the sink's
/// `bytes_served` counter).
fn handle_client_write<H: ClientHandle>(
    client: &mut Client<H>,
    queue: &BufferQueue,
    streamheader: &[Payload],
    config: &SinkConfig,
    poll: &PollHandle,
    token: Token,
    now: Nanos,
) -> u64 {
    let mut written = 0_u64;

    loop {
        if client.sending.is_empty() {
            if client.new_connection {
                let pos = positioning::new_client_start(queue, client, positioning::default_is_sync_frame);
                if pos == -1 {
                    let _ = poll.set_write(&mut client.handle, token, false);
                    return written;
                }
                client.bufpos = pos;
                client.new_connection = false;
            } else if client.bufpos == -1 {
                let _ = poll.set_write(&mut client.handle, token, false);
                if client.flushcount == 0 {
                    client.status = Status::Removed;
                }
                return written;
            }

            let Some(buf) = queue.get(client.bufpos as usize).cloned() else {
                let _ = poll.set_write(&mut client.handle, token, false);
                return written;
            };
            client.bufpos -= 1;
            if client.flushcount > 0 {
                client.flushcount -= 1;
            }
            if client.stats.first_buffer_ts.is_none() {
                client.stats.first_buffer_ts = buf.timestamp;
            }
            client.stats.last_buffer_ts = buf.timestamp;

            attach_and_enqueue(client, streamheader, buf, config);
            client.bufoffset = 0;
        }

        let Some(head) = client.sending.front() else {
            return written;
        };
        let chunk = &head.bytes[client.bufoffset..];

        match client.handle.write(chunk) {
            Ok(n) if n == chunk.len() => {
                written += n as u64;
                client.stats.bytes_sent += n as u64;
                client.stats.last_activity_time = now;
                client.sending.pop_front();
                client.bufoffset = 0;
            }
            Ok(n) => {
                written += n as u64;
                client.stats.bytes_sent += n as u64;
                client.stats.last_activity_time = now;
                client.bufoffset += n;
                return written;
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return written,
            Err(e) if e.raw_os_error() == Some(libc::ECONNRESET) => {
                client.status = Status::Closed;
                return written;
            }
            Err(_) => {
                client.status = Status::Error;
                return written;
            }
        }
    }
}

/// Attaches the streamheader ahead of `buf` when the client has never seen
/// one, or when it changed and resend is called for. `spec.md` §4.5b:
/// caps are treated as opaque everywhere except here, where all that
/// matters is "does this client's last-sent streamheader differ from the
/// current one".
fn attach_and_enqueue<H>(client: &mut Client<H>, streamheader: &[Payload], buf: Payload, config: &SinkConfig) {
    let needs_resend = match &client.session_caps {
        None => true,
        Some(caps) => {
            !streamheader.is_empty()
                && (caps.streamheader.is_empty() || (config.resend_streamheader && caps.streamheader.as_slice() != streamheader))
        }
    };

    if needs_resend {
        client.sending.extend(streamheader.iter().cloned());
        client.session_caps = Some(SessionCaps { streamheader: streamheader.to_vec() });
    }
    client.sending.push_back(buf);
}
