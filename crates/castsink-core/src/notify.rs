//! Notifications emitted from the dispatch thread, per `spec.md` §6.
//!
//! These are sent over an `mpsc` channel instead of invoked as callbacks
//! under the client lock (Design Notes §9, first bullet: "externalise
//! notifications through a channel drained by the producer" is the
//! explicitly preferred Rust-idiomatic alternative to the source's
//! lock-release-around-emission dance). `send` on an unbounded channel
//! never blocks, so the dispatch thread never has to drop its lock to
//! make progress on notification delivery.
//!
//! `ClientRemoved` embeds a [`StatsSnapshot`] captured at removal time.
//! This is what lets the three-stage removal protocol's "the handle is
//! still indexed during `client_removed`" requirement hold structurally:
//! a consumer reacting to `ClientRemoved` never needs to call back into
//! the sink to fetch stats for a client that is simultaneously being torn
//! down, because the stats already travelled with the notification.

use crate::{client::Stats, types::Status};

pub type StatsSnapshot = Stats;

pub enum Notification<H> {
    ClientAdded { identity: u64 },
    ClientRemoved { identity: u64, status: Status, stats: StatsSnapshot },
    /// Carries the handle back to the embedder. The core never closes a
    /// descriptor itself; receipt of this notification is the signal that
    /// it's now safe (and the caller's responsibility) to do so.
    ClientFdRemoved { identity: u64, handle: H },
}
