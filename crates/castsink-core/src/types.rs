//! Small, `Copy` enums shared across `castsink-core`: units, policies, and
//! wire-stable client status.

/// Unit a limit (`units_max`, a burst bound, ...) is expressed in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Unit {
    Buffers,
    Bytes,
    Time,
    Undefined,
}

/// Policy for where a newly-added client starts reading from the queue.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncMethod {
    Latest,
    NextKeyframe,
    LatestKeyframe,
    Burst,
    BurstKeyframe,
    BurstWithKeyframe,
}

/// Policy applied when a client's position crosses the soft limit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecoverPolicy {
    None,
    ResyncLatest,
    ResyncSoftLimit,
    ResyncKeyframe,
}

/// Client lifecycle status. Discriminants are part of the wire contract for
/// `client_removed` notifications and must not be renumbered.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Status {
    Ok = 0,
    Closed = 1,
    Removed = 2,
    Slow = 3,
    Error = 4,
    Flushing = 5,
    Duplicate = 6,
}

impl Status {
    /// Everything except `Ok`/`Flushing` is a terminal status: the dispatch
    /// loop removes the client on sight.
    #[inline]
    pub fn is_terminal(self) -> bool {
        !matches!(self, Status::Ok | Status::Flushing)
    }
}

/// `(unit, value)` burst bound. `value == -1` means "unset" for a max bound.
pub type BurstSpec = (Unit, i64);
