use thiserror::Error;

/// Sink-fatal poll set errors (`spec.md` §7: "poll-set creation failure at
/// start" and "unrecoverable `wait` errors that are neither EINTR, EBUSY, nor
/// EBADF").
#[derive(Error, Debug)]
pub enum PollSetError {
    #[error("couldn't create poll set: {0}")]
    Create(#[source] std::io::Error),
    #[error("couldn't create poll set waker: {0}")]
    Waker(#[source] std::io::Error),
    #[error("fatal poll error: {0}")]
    Fatal(#[source] std::io::Error),
}
