//! Error taxonomy. Per-client failures never surface here — they only ever
//! change a `Client`'s `Status` and get removed by the dispatch loop. These
//! types cover the two sink-fatal cases from `spec.md` §7 plus the one
//! `add_full` validation failure the source handles by "warn and drop".

use castsink_net::PollSetError;
use thiserror::Error;

use crate::types::Unit;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("failed to create poll set")]
    PollSetCreate(#[source] PollSetError),

    #[error("dispatch loop wait failed fatally")]
    DispatchFatal(#[source] PollSetError),

    #[error("dispatch thread panicked")]
    DispatchPanicked,
}

/// Returned by `add_full` instead of the original's "warn and drop": the
/// caller decides whether an invalid burst spec is worth logging or just
/// ignoring.
#[derive(Debug, Error)]
#[error("burst_max {max_value} ({max_unit:?}) is below burst_min {min_value} ({min_unit:?})")]
pub struct AddClientError {
    pub min_unit: Unit,
    pub min_value: i64,
    pub max_unit: Unit,
    pub max_value: i64,
}

/// `render` requires the sink to be running (`spec.md` §4.7: "require the
/// sink be in OPEN state, else fail with FLUSHING").
#[derive(Debug, Error)]
#[error("sink is not running")]
pub struct NotRunning;
