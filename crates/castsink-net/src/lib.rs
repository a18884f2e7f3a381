//! Non-blocking descriptor layer for `castsink`: a poll-set wrapper over the
//! host readiness primitive, plus a small capability trait that lets the
//! dispatch loop treat sockets and other writable descriptors uniformly.

mod error;
mod handle;
mod poll;

pub use error::PollSetError;
pub use handle::{ClientHandle, set_socket_buf_size};
pub use mio::Token;
pub use poll::{PollHandle, PollOutcome, PollSet, ReadyFlags, ReadySet};
