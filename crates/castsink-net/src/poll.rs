use std::{
    collections::HashMap,
    io,
    sync::{
        Arc, RwLock,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use mio::{Events, Interest, Registry, Token, Waker, event::Source};
use tracing::warn;

use crate::error::PollSetError;

/// Reserved token for the waker used by `restart()`/`set_flushing()`. Never
/// handed out to a real client.
const WAKE_TOKEN: Token = Token(usize::MAX);

const DEFAULT_EVENT_CAPACITY: usize = 1024;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReadyFlags {
    pub readable: bool,
    pub writable: bool,
    pub read_closed: bool,
    pub error: bool,
}

/// Snapshot of readiness for every token that had an event this tick.
///
/// A token absent from the set means "no readiness news this tick" — it does
/// *not* mean the descriptor is dead; the dispatch loop only queries tokens
/// it already knows about.
#[derive(Debug, Default)]
pub struct ReadySet {
    flags: HashMap<Token, ReadyFlags>,
}

impl ReadySet {
    #[inline]
    pub fn len(&self) -> usize {
        self.flags.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.flags.is_empty()
    }

    #[inline]
    pub fn can_read(&self, token: Token) -> bool {
        self.flags.get(&token).is_some_and(|f| f.readable)
    }

    #[inline]
    pub fn can_write(&self, token: Token) -> bool {
        self.flags.get(&token).is_some_and(|f| f.writable)
    }

    #[inline]
    pub fn has_closed(&self, token: Token) -> bool {
        self.flags.get(&token).is_some_and(|f| f.read_closed)
    }

    #[inline]
    pub fn has_error(&self, token: Token) -> bool {
        self.flags.get(&token).is_some_and(|f| f.error)
    }
}

/// Result of a single `PollSet::wait` call, mirroring the classic
/// `poll(2)`-style tri-state return (`ready_count | 0=timeout |
/// -1=interrupted`) from `spec.md` §4.1.
pub enum PollOutcome {
    Ready(ReadySet),
    Timeout,
    Interrupted,
}

struct PollShared {
    registry: Registry,
    waker: Waker,
    flushing: AtomicBool,
    interests: RwLock<HashMap<Token, Interest>>,
}

/// Thread-safe half of a [`PollSet`]: every operation here is documented by
/// `spec.md` §4.1 as callable from any thread. Cloning is an `Arc` clone.
#[derive(Clone)]
pub struct PollHandle(Arc<PollShared>);

impl PollHandle {
    pub fn add<S: Source>(&self, source: &mut S, token: Token, read: bool, write: bool) -> io::Result<()> {
        let interest = interest_from(read, write).unwrap_or(Interest::READABLE);
        self.0.registry.register(source, token, interest)?;
        self.0.interests.write().unwrap_or_else(|e| e.into_inner()).insert(token, interest);
        Ok(())
    }

    pub fn remove<S: Source>(&self, source: &mut S, token: Token) -> io::Result<()> {
        self.0.registry.deregister(source)?;
        self.0.interests.write().unwrap_or_else(|e| e.into_inner()).remove(&token);
        Ok(())
    }

    fn reregister<S: Source>(&self, source: &mut S, token: Token, read: bool, write: bool) -> io::Result<()> {
        match interest_from(read, write) {
            Some(interest) => {
                self.0.registry.reregister(source, token, interest)?;
                self.0.interests.write().unwrap_or_else(|e| e.into_inner()).insert(token, interest);
            }
            None => {
                // Neither readable nor writable: dropping all interest isn't
                // representable by mio's Interest (it requires at least one
                // bit), so callers should `remove` instead. Kept permissive
                // here: leave the previous interest registered.
                warn!(?token, "reregister called with no interest, ignoring");
            }
        }
        Ok(())
    }

    pub fn set_read<S: Source>(&self, source: &mut S, token: Token, on: bool) -> io::Result<()> {
        let write = self.current_write(token);
        self.reregister(source, token, on, write)
    }

    pub fn set_write<S: Source>(&self, source: &mut S, token: Token, on: bool) -> io::Result<()> {
        let read = self.current_read(token);
        self.reregister(source, token, read, on)
    }

    fn current_write(&self, token: Token) -> bool {
        self.0
            .interests
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&token)
            .is_some_and(Interest::is_writable)
    }

    fn current_read(&self, token: Token) -> bool {
        self.0
            .interests
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&token)
            .is_some_and(Interest::is_readable)
    }

    /// Unblocks a concurrent `wait()` so interest changes made before this
    /// call take effect immediately instead of waiting out the timeout.
    pub fn restart(&self) {
        if let Err(err) = self.0.waker.wake() {
            warn!(?err, "poll set restart (waker) failed");
        }
    }

    /// While `true`, `wait()` returns `Interrupted` immediately without
    /// blocking on the OS readiness primitive.
    pub fn set_flushing(&self, flushing: bool) {
        self.0.flushing.store(flushing, Ordering::Release);
        if flushing {
            self.restart();
        }
    }
}

fn interest_from(read: bool, write: bool) -> Option<Interest> {
    match (read, write) {
        (true, true) => Some(Interest::READABLE.add(Interest::WRITABLE)),
        (true, false) => Some(Interest::READABLE),
        (false, true) => Some(Interest::WRITABLE),
        (false, false) => None,
    }
}

/// Wrapper over the host OS readiness primitive (`epoll`/`kqueue`/IOCP via
/// `mio`). The `wait()`-holding half lives on the dispatch thread only; use
/// [`PollSet::handle`] to get a [`PollHandle`] for use from any other
/// thread, per `spec.md` §4.1.
pub struct PollSet {
    poll: mio::Poll,
    events: Events,
    shared: Arc<PollShared>,
}

impl PollSet {
    pub fn new() -> Result<Self, PollSetError> {
        let poll = mio::Poll::new().map_err(PollSetError::Create)?;
        let registry = poll.registry().try_clone().map_err(PollSetError::Create)?;
        let waker = Waker::new(&registry, WAKE_TOKEN).map_err(PollSetError::Waker)?;
        Ok(Self {
            poll,
            events: Events::with_capacity(DEFAULT_EVENT_CAPACITY),
            shared: Arc::new(PollShared {
                registry,
                waker,
                flushing: AtomicBool::new(false),
                interests: RwLock::new(HashMap::new()),
            }),
        })
    }

    pub fn handle(&self) -> PollHandle {
        PollHandle(self.shared.clone())
    }

    /// Must only be called from the dispatch thread (`spec.md` §4.1).
    pub fn wait(&mut self, timeout: Option<Duration>) -> Result<PollOutcome, PollSetError> {
        if self.shared.flushing.load(Ordering::Acquire) {
            return Ok(PollOutcome::Interrupted);
        }

        match self.poll.poll(&mut self.events, timeout) {
            Ok(()) => {}
            // mio retries EINTR internally; any error here is unexpected and
            // corresponds to spec.md §4.5 step 5's fatal path.
            Err(err) => return Err(PollSetError::Fatal(err)),
        }

        if self.shared.flushing.load(Ordering::Acquire) {
            return Ok(PollOutcome::Interrupted);
        }

        let mut woke = false;
        let mut flags = HashMap::with_capacity(self.events.iter().count());
        for ev in self.events.iter() {
            if ev.token() == WAKE_TOKEN {
                woke = true;
                continue;
            }
            flags.insert(
                ev.token(),
                ReadyFlags {
                    readable: ev.is_readable(),
                    writable: ev.is_writable(),
                    read_closed: ev.is_read_closed(),
                    error: ev.is_error(),
                },
            );
        }

        if flags.is_empty() {
            return Ok(if woke { PollOutcome::Interrupted } else { PollOutcome::Timeout });
        }
        Ok(PollOutcome::Ready(ReadySet { flags }))
    }
}
