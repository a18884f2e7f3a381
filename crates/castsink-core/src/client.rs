//! Per-descriptor client state.

use std::collections::VecDeque;

use castsink_timing::Nanos;

use crate::{
    payload::Payload,
    types::{BurstSpec, Status, SyncMethod},
};

/// Point-in-time statistics snapshot, returned by `get_stats` and embedded
/// in `Notification::ClientRemoved`. `Copy` so callers never need to hold
/// the client lock past the point they read it.
#[derive(Clone, Copy, Debug, Default)]
pub struct Stats {
    pub bytes_sent: u64,
    pub connect_time: Nanos,
    pub disconnect_time: Option<Nanos>,
    pub last_activity_time: Nanos,
    pub dropped_buffers: u64,
    pub first_buffer_ts: Option<Nanos>,
    pub last_buffer_ts: Option<Nanos>,
}

impl Stats {
    /// `disconnect_time ?? now` minus `connect_time`, per `spec.md` §4.7.
    pub fn connected_duration(&self, now: Nanos) -> Nanos {
        self.disconnect_time.unwrap_or(now).saturating_sub(self.connect_time)
    }
}

/// Per-client session caps/streamheader bookkeeping. `spec.md` treats caps
/// as an opaque "session preamble"; all we need to compare is whether it
/// changed and whether the attached streamheader differs.
#[derive(Clone, Debug, Default)]
pub struct SessionCaps {
    pub streamheader: Vec<Payload>,
}

pub struct Client<H> {
    pub handle: H,
    pub status: Status,
    pub sync_method: SyncMethod,
    pub burst_min: BurstSpec,
    pub burst_max: BurstSpec,
    /// -1 means "waiting for a position".
    pub bufpos: i64,
    /// Bytes already written out of the current `sending` head.
    pub bufoffset: usize,
    pub sending: VecDeque<Payload>,
    /// -1 means unlimited.
    pub flushcount: i64,
    pub new_connection: bool,
    pub session_caps: Option<SessionCaps>,
    pub discont: bool,
    pub stats: Stats,
}

impl<H> Client<H> {
    pub fn new(handle: H, sync_method: SyncMethod, burst_min: BurstSpec, burst_max: BurstSpec) -> Self {
        let now = Nanos::now();
        Self {
            handle,
            status: Status::Ok,
            sync_method,
            burst_min,
            burst_max,
            bufpos: -1,
            bufoffset: 0,
            sending: VecDeque::new(),
            flushcount: -1,
            new_connection: true,
            session_caps: None,
            discont: false,
            stats: Stats {
                bytes_sent: 0,
                connect_time: now,
                disconnect_time: None,
                last_activity_time: now,
                dropped_buffers: 0,
                first_buffer_ts: None,
                last_buffer_ts: None,
            },
        }
    }
}
