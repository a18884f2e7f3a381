//! Opaque, ref-counted payloads: the unit of data the queue and every
//! client `sending` backlog hold.

use std::sync::Arc;

use castsink_timing::Nanos;

#[derive(Debug, PartialEq)]
pub struct PayloadInner {
    pub bytes: Vec<u8>,
    pub timestamp: Option<Nanos>,
    pub header: bool,
    pub keyframe: bool,
}

/// Shared handle to a payload. Cloning is an `Arc` clone: cheap, and the
/// underlying bytes stay alive as long as any queue slot or client
/// `sending` backlog references them.
pub type Payload = Arc<PayloadInner>;

impl PayloadInner {
    pub fn new(bytes: Vec<u8>, timestamp: Option<Nanos>, header: bool, keyframe: bool) -> Payload {
        Arc::new(Self { bytes, timestamp, header, keyframe })
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.bytes.len()
    }
}
