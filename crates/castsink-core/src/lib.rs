//! Streaming dispatch core for a multi-client fan-out sink: a shared
//! buffer queue, per-client positioning and recovery policies, and a
//! dedicated dispatch thread that multiplexes non-blocking writes across
//! every client descriptor. See `SPEC_FULL.md` for the full data model.

mod client;
mod config;
mod controller;
mod dispatch;
mod error;
mod notify;
mod payload;
mod positioning;
mod queue;
mod sink;
mod types;

pub use client::{SessionCaps, Stats};
pub use config::SinkConfig;
pub use error::{AddClientError, NotRunning, SinkError};
pub use notify::{Notification, StatsSnapshot};
pub use payload::{Payload, PayloadInner};
pub use sink::{ClientStats, Sink, SinkStats};
pub use types::{BurstSpec, RecoverPolicy, Status, SyncMethod, Unit};
