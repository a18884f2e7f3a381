//! The public facade: `Sink<H>` owns the client table and buffer queue
//! behind a single mutex, and runs the dispatch loop on a dedicated thread.
//! `spec.md` §4.1, §4.5, §4.7.

use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
        mpsc,
    },
    thread::JoinHandle,
};

use castsink_net::{ClientHandle, PollHandle, PollSet, Token};
use castsink_timing::Nanos;
use castsink_utils::thread_boot;

use crate::{
    client::{Client, Stats},
    config::SinkConfig,
    controller,
    dispatch,
    error::{AddClientError, NotRunning, SinkError},
    notify::Notification,
    payload::{Payload, PayloadInner},
    queue::BufferQueue,
    types::{BurstSpec, Status, SyncMethod},
};

#[inline]
pub(crate) fn token_for<H: ClientHandle>(handle: &H) -> Token {
    Token(handle.identity() as usize)
}

/// Point-in-time client statistics returned by `Sink::get_stats`.
#[derive(Clone, Copy, Debug)]
pub struct ClientStats {
    pub bytes_sent: u64,
    pub connect_time: Nanos,
    pub disconnect_time: Option<Nanos>,
    pub connected_duration: Nanos,
    pub last_activity_time: Nanos,
    pub dropped_buffers: u64,
    pub first_buffer_ts: Option<Nanos>,
    pub last_buffer_ts: Option<Nanos>,
}

/// Everything the dispatch thread needs, guarded by one mutex. Client
/// lookups are linear (`spec.md` doesn't call for more than a few hundred
/// clients per sink); this mirrors the source's single-list model.
pub(crate) struct Inner<H> {
    pub clients: Vec<Client<H>>,
    pub clients_cookie: u32,
    pub bufqueue: BufferQueue,
    pub streamheader: Vec<Payload>,
    pub last_header: bool,
    pub bytes_to_serve: u64,
    pub bytes_served: u64,
    pub buffers_queued: usize,
}

/// Sink-wide throughput counters, per `spec.md`'s "Sink state" field list.
#[derive(Clone, Copy, Debug)]
pub struct SinkStats {
    pub bytes_to_serve: u64,
    pub bytes_served: u64,
    pub buffers_queued: usize,
}

/// State shared between the `Sink<H>` facade and the dispatch thread.
pub(crate) struct SinkShared<H> {
    pub inner: Mutex<Inner<H>>,
    pub config: SinkConfig,
    pub poll: PollHandle,
    pub notify_tx: mpsc::Sender<Notification<H>>,
    pub running: AtomicBool,
    pub on_removed: Mutex<Option<Arc<dyn Fn(&H) + Send + Sync>>>,
}

/// A running (or not-yet-started) multi-client fan-out sink.
///
/// Generic over the client descriptor type `H`; `mio::net::TcpStream` is the
/// concrete handle the rest of the crate is exercised against, but anything
/// implementing `ClientHandle` works (`spec.md` §9, "Polymorphism over the
/// descriptor").
pub struct Sink<H> {
    shared: Arc<SinkShared<H>>,
    poll_set: Mutex<Option<PollSet>>,
    dispatch_thread: Mutex<Option<JoinHandle<Result<(), SinkError>>>>,
}

impl<H: ClientHandle + Send + 'static> Sink<H> {
    pub fn new(config: SinkConfig) -> Result<(Self, mpsc::Receiver<Notification<H>>), SinkError> {
        let poll_set = PollSet::new().map_err(SinkError::PollSetCreate)?;
        let poll = poll_set.handle();
        let (notify_tx, notify_rx) = mpsc::channel();

        let shared = Arc::new(SinkShared {
            inner: Mutex::new(Inner {
                clients: Vec::new(),
                clients_cookie: 0,
                bufqueue: BufferQueue::new(),
                streamheader: Vec::new(),
                last_header: false,
                bytes_to_serve: 0,
                bytes_served: 0,
                buffers_queued: 0,
            }),
            config,
            poll,
            notify_tx,
            running: AtomicBool::new(false),
            on_removed: Mutex::new(None),
        });

        let sink = Self { shared, poll_set: Mutex::new(Some(poll_set)), dispatch_thread: Mutex::new(None) };
        Ok((sink, notify_rx))
    }

    /// Installs a hook invoked synchronously (off the caller's thread, on
    /// whichever thread performed the removal) just before the handle is
    /// handed back via `Notification::ClientFdRemoved`. Must not call back
    /// into this `Sink`.
    pub fn set_removed_hook(&self, hook: Arc<dyn Fn(&H) + Send + Sync>) {
        *lock(&self.shared.on_removed) = Some(hook);
    }

    /// Spawns the dispatch thread. A no-op if already started.
    pub fn start(&self) -> Result<(), SinkError> {
        let mut guard = lock(&self.poll_set);
        let Some(poll_set) = guard.take() else {
            return Ok(());
        };
        drop(guard);

        self.shared.running.store(true, Ordering::Release);
        let shared = self.shared.clone();
        let core = self.shared.config.dispatch_thread_core;
        let priority = self.shared.config.dispatch_thread_priority;

        let handle = std::thread::Builder::new()
            .name("castsink-dispatch".into())
            .spawn(move || {
                thread_boot(core, priority);
                dispatch::run(&shared, poll_set)
            })
            .expect("failed to spawn dispatch thread");

        *lock(&self.dispatch_thread) = Some(handle);
        Ok(())
    }

    /// Signals the dispatch thread to stop and joins it. Blocks until the
    /// thread has exited.
    pub fn stop(&self) -> Result<(), SinkError> {
        self.shared.running.store(false, Ordering::Release);
        self.shared.poll.set_flushing(true);
        match lock(&self.dispatch_thread).take() {
            Some(handle) => handle.join().unwrap_or(Err(SinkError::DispatchPanicked)),
            None => Ok(()),
        }
    }

    /// Registers a new client with the default sync method and burst spec
    /// from `SinkConfig`. Returns the client's identity.
    pub fn add(&self, handle: H) -> u64 {
        let burst = (self.shared.config.def_burst_unit, self.shared.config.def_burst_value);
        self.add_full(handle, self.shared.config.def_sync_method, burst, burst)
            .expect("config-derived burst spec is internally consistent")
    }

    /// Registers a new client with an explicit sync method and burst
    /// min/max. `spec.md` §4.7.
    pub fn add_full(
        &self,
        mut handle: H,
        sync_method: SyncMethod,
        burst_min: BurstSpec,
        burst_max: BurstSpec,
    ) -> Result<u64, AddClientError> {
        if burst_min.0 == burst_max.0 && burst_max.1 != -1 && burst_max.1 < burst_min.1 {
            return Err(AddClientError {
                min_unit: burst_min.0,
                min_value: burst_min.1,
                max_unit: burst_max.0,
                max_value: burst_max.1,
            });
        }

        let identity = handle.identity();
        let mut inner = lock(&self.shared.inner);

        if inner.clients.iter().any(|c| c.handle.identity() == identity) {
            drop(inner);
            let now = Nanos::now();
            let stats = Stats { connect_time: now, last_activity_time: now, ..Stats::default() };
            // The core never closes a descriptor itself, duplicate or not:
            // route `handle` back out through `ClientFdRemoved` instead of
            // letting it drop here (and close the fd out from under the
            // caller).
            let _ = self.shared.notify_tx.send(Notification::ClientRemoved {
                identity,
                status: Status::Duplicate,
                stats,
            });
            let _ = self.shared.notify_tx.send(Notification::ClientFdRemoved { identity, handle });
            return Ok(identity);
        }

        if let Some(dscp) = self.shared.config.qos_dscp {
            if handle.is_socket() {
                let _ = handle.set_dscp(dscp);
            }
        }
        if let Some(size) = self.shared.config.socket_buf_size {
            if handle.is_socket() {
                let _ = handle.set_buf_size(size);
            }
        }

        let token = token_for(&handle);
        if let Err(err) = self.shared.poll.add(&mut handle, token, self.shared.config.handle_read, true) {
            tracing::warn!(?err, identity, "failed to register client with poll set");
        }

        inner.clients.push(Client::new(handle, sync_method, burst_min, burst_max));
        drop(inner);

        self.shared.poll.restart();
        let _ = self.shared.notify_tx.send(Notification::ClientAdded { identity });
        Ok(identity)
    }

    /// Marks a client REMOVED and tears it down immediately. `spec.md`
    /// §4.7: unlike slow/error/closed removal (discovered and acted on by
    /// the dispatch loop), an explicit `remove` acts synchronously.
    pub fn remove(&self, identity: u64) {
        {
            let mut inner = lock(&self.shared.inner);
            match inner.clients.iter_mut().find(|c| c.handle.identity() == identity) {
                Some(client) if client.status == Status::Ok => client.status = Status::Removed,
                _ => return,
            }
        }
        remove_client_link(&self.shared, identity);
    }

    /// Schedules a client for removal once its already-queued backlog has
    /// drained, rather than dropping it immediately. `spec.md` §4.7.
    pub fn remove_flush(&self, identity: u64) {
        let mut inner = lock(&self.shared.inner);
        if let Some(client) = inner.clients.iter_mut().find(|c| c.handle.identity() == identity) {
            if client.status == Status::Ok {
                client.flushcount = client.bufpos + 1;
                client.status = Status::Flushing;
            }
        }
    }

    pub fn sink_stats(&self) -> SinkStats {
        let inner = lock(&self.shared.inner);
        SinkStats {
            bytes_to_serve: inner.bytes_to_serve,
            bytes_served: inner.bytes_served,
            buffers_queued: inner.buffers_queued,
        }
    }

    pub fn get_stats(&self, identity: u64) -> Option<ClientStats> {
        let inner = lock(&self.shared.inner);
        let client = inner.clients.iter().find(|c| c.handle.identity() == identity)?;
        let now = Nanos::now();
        Some(ClientStats {
            bytes_sent: client.stats.bytes_sent,
            connect_time: client.stats.connect_time,
            disconnect_time: client.stats.disconnect_time,
            connected_duration: client.stats.connected_duration(now),
            last_activity_time: client.stats.last_activity_time,
            dropped_buffers: client.stats.dropped_buffers,
            first_buffer_ts: client.stats.first_buffer_ts,
            last_buffer_ts: client.stats.last_buffer_ts,
        })
    }

    /// Delivers a new payload. Header payloads (`header == true`) replace
    /// the streamheader set instead of entering the queue (`spec.md` §4.7);
    /// everything else goes through `controller::queue_buffer`.
    pub fn render(&self, bytes: Vec<u8>, timestamp: Option<Nanos>, header: bool, keyframe: bool) -> Result<(), NotRunning> {
        if !self.shared.running.load(Ordering::Acquire) {
            return Err(NotRunning);
        }

        let buf = PayloadInner::new(bytes, timestamp, header, keyframe);
        let mut inner = lock(&self.shared.inner);

        let was_header = inner.last_header;
        inner.last_header = header;
        if header {
            if !was_header {
                inner.streamheader.clear();
            }
            inner.streamheader.push(buf);
            return Ok(());
        }

        let now = Nanos::now();
        let size = buf.size() as u64;
        let Inner { bufqueue, clients, .. } = &mut *inner;
        let outcome = controller::queue_buffer(bufqueue, clients, &self.shared.config, buf, now);
        let slow_identities: Vec<u64> = outcome.slow.iter().map(|&i| clients[i].handle.identity()).collect();

        for &idx in &outcome.rearm {
            let client = &mut inner.clients[idx];
            let token = token_for(&client.handle);
            let _ = self.shared.poll.set_write(&mut client.handle, token, true);
        }
        inner.bytes_to_serve += size;
        inner.buffers_queued = outcome.buffers_queued;
        drop(inner);

        for identity in slow_identities {
            remove_client_link(&self.shared, identity);
        }
        if outcome.need_signal {
            self.shared.poll.restart();
        }
        Ok(())
    }
}

/// The three-stage removal protocol (`spec.md` §4.7): deregister from the
/// poll set, snapshot stats and drop the client's backlog, emit
/// `client_removed` with that snapshot, *then* drop the client out of the
/// index and hand its handle back via `client_fd_removed`. The order
/// matters: a consumer reacting to `client_removed` never needs to look
/// the client back up (it's still indexed), and `client_fd_removed` is the
/// caller's cue that it's now safe to close the descriptor.
pub(crate) fn remove_client_link<H: ClientHandle>(shared: &SinkShared<H>, identity: u64) {
    let mut inner = lock(&shared.inner);
    let Some(idx) = inner.clients.iter().position(|c| c.handle.identity() == identity) else {
        return;
    };

    let status = {
        let client = &mut inner.clients[idx];
        let _ = shared.poll.remove(&mut client.handle, token_for(&client.handle));
        client.stats.disconnect_time = Some(Nanos::now());
        client.sending.clear();
        client.session_caps = None;
        client.status
    };
    let stats = inner.clients[idx].stats;

    let _ = shared.notify_tx.send(Notification::ClientRemoved { identity, status, stats });

    let client = inner.clients.remove(idx);
    inner.clients_cookie = inner.clients_cookie.wrapping_add(1);
    drop(inner);

    if let Some(hook) = lock(&shared.on_removed).as_ref() {
        hook(&client.handle);
    }

    let _ = shared.notify_tx.send(Notification::ClientFdRemoved { identity, handle: client.handle });
}

pub(crate) fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}
