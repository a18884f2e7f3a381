//! Pure, side-effect-free placement logic: given the current queue and a
//! client's sync/burst parameters, compute a starting index or a recovery
//! index. The only side effect allowed anywhere in this module is the
//! documented sync-method downgrade in `new_client_start`.

use crate::{
    client::Client,
    payload::Payload,
    queue::BufferQueue,
    types::{BurstSpec, RecoverPolicy, SyncMethod, Unit},
};

/// Default sync-frame predicate: payloads already carry their own
/// keyframe flag, so most callers just pass this through.
#[inline]
pub fn default_is_sync_frame(p: &Payload) -> bool {
    p.keyframe
}

/// Smallest `k` such that the first `k` payloads (newest-first) satisfy
/// `limit` in `unit`. Returns `len + 1` ("not yet satisfied") if the queue
/// doesn't hold enough data.
pub fn buffers_max_for(queue: &BufferQueue, limit: i64, unit: Unit) -> usize {
    match unit {
        Unit::Buffers => limit.max(0) as usize,
        Unit::Undefined => queue.len() + 1,
        Unit::Bytes => {
            let mut bytes: u64 = 0;
            for (i, p) in queue.iter().enumerate() {
                bytes += p.size() as u64;
                if limit >= 0 && bytes >= limit as u64 {
                    return i + 1;
                }
            }
            queue.len() + 1
        }
        Unit::Time => {
            let mut first = None;
            for (i, p) in queue.iter().enumerate() {
                let Some(ts) = p.timestamp else { continue };
                let base = *first.get_or_insert(ts);
                let elapsed = base.saturating_sub(ts);
                if limit >= 0 && u64::from(elapsed) >= limit as u64 {
                    return i + 1;
                }
            }
            queue.len() + 1
        }
    }
}

/// A `(bytes, buffers, time)` limit triple, each independently `-1` for
/// "unset" — mirrors the source's independent scalar knobs rather than a
/// single tagged unit, since a burst spec and the queue-controller's
/// min-retention knobs both need more than one unit active at once.
#[derive(Clone, Copy, Debug)]
pub struct LimitSpec {
    pub bytes: i64,
    pub buffers: i64,
    pub time: i64,
}

impl LimitSpec {
    pub const UNSET: LimitSpec = LimitSpec { bytes: -1, buffers: -1, time: -1 };
}

/// Projects a single `(unit, value)` burst bound onto a `LimitSpec` with
/// only the matching field set.
pub fn to_limit_spec((unit, value): BurstSpec) -> LimitSpec {
    match unit {
        Unit::Buffers => LimitSpec { buffers: value, ..LimitSpec::UNSET },
        Unit::Bytes => LimitSpec { bytes: value, ..LimitSpec::UNSET },
        Unit::Time => LimitSpec { time: value, ..LimitSpec::UNSET },
        Unit::Undefined => LimitSpec::UNSET,
    }
}

/// Scans the queue newest-to-oldest, accumulating bytes and buffer count
/// and tracking a time base (`first = queue[0].ts`). Returns
/// `(min_idx, max_idx, complete)`: `min_idx` is the earliest index at
/// which every min bound is satisfied, `max_idx` is the last index before
/// any max bound is exceeded (or `len - 1` if none is). `complete` is
/// true only if both sides were satisfied before the queue ran out.
pub fn find_limits(queue: &BufferQueue, min: LimitSpec, max: LimitSpec) -> (usize, usize, bool) {
    let len = queue.len();
    castsink_utils::safe_assert!(len > 0, "find_limits called on an empty queue");
    if len == 0 {
        return (0, 0, false);
    }

    if min.buffers != -1 && (len as i64) < min.buffers {
        return (len - 1, len - 1, false);
    }

    let mut bytes_min = min.bytes;
    let mut buffers_min = min.buffers;
    let mut time_min = min.time;
    let bytes_max = max.bytes;
    let buffers_max = max.buffers;
    let time_max = max.time;

    let mut first: Option<castsink_timing::Nanos> = None;
    let mut bytes: u64 = 0;
    let mut min_idx: Option<usize> = None;
    let mut max_idx: Option<usize> = None;
    let mut max_hit = false;
    let mut result = false;

    for i in 0..len {
        if bytes_min == -1 && buffers_min == -1 && time_min == -1 && min_idx.is_none() {
            min_idx = Some(i.saturating_sub(1));
        }
        if max_hit {
            max_idx = Some(i.saturating_sub(1));
            result = min_idx.is_some();
            break;
        }

        let buf = queue.get(i).expect("i < len");
        bytes += buf.size() as u64;

        if let Some(ts) = buf.timestamp {
            let base = *first.get_or_insert(ts);
            let elapsed = u64::from(base.saturating_sub(ts));
            if time_min != -1 && elapsed >= time_min as u64 {
                time_min = -1;
            }
            if time_max != -1 && elapsed >= time_max as u64 {
                max_hit = true;
            }
        }

        if buffers_min != -1 && (i as i64 + 1) >= buffers_min {
            buffers_min = -1;
        }
        if buffers_max != -1 && (i as i64 + 1) >= buffers_max {
            max_hit = true;
        }
        if bytes_min != -1 && bytes >= bytes_min as u64 {
            bytes_min = -1;
        }
        if bytes_max != -1 && bytes >= bytes_max as u64 {
            max_hit = true;
        }
    }

    let max_idx = max_idx.unwrap_or(len - 1);
    let min_idx = min_idx.unwrap_or(max_idx);

    (min_idx, max_idx, result)
}

/// Scans `[0, from_idx]` towards index 0 (newer) for the nearest sync
/// frame, starting at `from_idx` itself. `-1` if none is found or
/// `from_idx < 0`.
pub fn find_prev_syncframe(queue: &BufferQueue, from_idx: i64, is_sync_frame: impl Fn(&Payload) -> bool) -> i64 {
    let mut i = from_idx;
    while i >= 0 {
        if let Some(p) = queue.get(i as usize) {
            if is_sync_frame(p) {
                return i;
            }
        }
        i -= 1;
    }
    -1
}

/// Scans `[from_idx, len)` towards the tail (older) for the nearest sync
/// frame, starting at `from_idx` itself. `-1` if none is found or
/// `from_idx < 0`.
pub fn find_next_syncframe(queue: &BufferQueue, from_idx: i64, is_sync_frame: impl Fn(&Payload) -> bool) -> i64 {
    if from_idx < 0 {
        return -1;
    }
    let len = queue.len() as i64;
    let mut i = from_idx;
    while i < len {
        if let Some(p) = queue.get(i as usize) {
            if is_sync_frame(p) {
                return i;
            }
        }
        i += 1;
    }
    -1
}

/// Decides where a newly-added (or not-yet-positioned) client should
/// start reading from. Returns `-1` when the client must keep waiting for
/// more data; callers should leave `bufpos` at `-1` and retry on the next
/// `queue_buffer` pass (`new_connection` stays `true` until this returns
/// a real index).
pub fn new_client_start<H>(
    queue: &BufferQueue,
    client: &mut Client<H>,
    is_sync_frame: impl Fn(&Payload) -> bool,
) -> i64 {
    if queue.is_empty() {
        client.bufpos = -1;
        return -1;
    }

    match client.sync_method {
        SyncMethod::Latest => client.bufpos,
        SyncMethod::NextKeyframe => {
            let result = find_prev_syncframe(queue, client.bufpos, &is_sync_frame);
            if result == -1 {
                client.bufpos = -1;
            }
            result
        }
        SyncMethod::LatestKeyframe => {
            let result = find_next_syncframe(queue, 0, &is_sync_frame);
            if result == -1 {
                client.bufpos = -1;
                client.sync_method = SyncMethod::NextKeyframe;
            }
            result
        }
        SyncMethod::Burst => {
            let (min_idx, max_idx, _) =
                find_limits(queue, to_limit_spec(client.burst_min), to_limit_spec(client.burst_max));
            let result = min_idx as i64;
            if max_idx as i64 <= result { (max_idx as i64 - 1).max(0) } else { result }
        }
        SyncMethod::BurstKeyframe => 'outcome: {
            let (min_idx, max_idx, _) =
                find_limits(queue, to_limit_spec(client.burst_min), to_limit_spec(client.burst_max));
            let next = find_next_syncframe(queue, min_idx as i64, &is_sync_frame);
            if next != -1 && next < max_idx as i64 {
                break 'outcome next;
            }
            let prev = find_prev_syncframe(queue, min_idx as i64, &is_sync_frame);
            if prev != -1 {
                break 'outcome prev;
            }
            client.bufpos = -1;
            client.sync_method = SyncMethod::NextKeyframe;
            -1
        }
        SyncMethod::BurstWithKeyframe => {
            let (min_idx, max_idx, _) =
                find_limits(queue, to_limit_spec(client.burst_min), to_limit_spec(client.burst_max));
            let next = find_next_syncframe(queue, min_idx as i64, &is_sync_frame);
            if next != -1 && next < max_idx as i64 {
                next
            } else if max_idx as i64 <= min_idx as i64 {
                (max_idx as i64 - 1).max(0)
            } else {
                min_idx as i64
            }
        }
    }
}

/// Computes the new position for a client that has crossed the soft
/// limit. Does not mutate the client; callers compare the result against
/// the current `bufpos` to decide whether a discontinuity occurred.
pub fn recover<H>(
    queue: &BufferQueue,
    client: &Client<H>,
    policy: RecoverPolicy,
    soft_max_unit: Unit,
    soft_max_value: i64,
    is_sync_frame: impl Fn(&Payload) -> bool,
) -> i64 {
    match policy {
        RecoverPolicy::None => client.bufpos,
        RecoverPolicy::ResyncLatest => -1,
        RecoverPolicy::ResyncSoftLimit => buffers_max_for(queue, soft_max_value, soft_max_unit) as i64,
        RecoverPolicy::ResyncKeyframe => {
            if queue.is_empty() {
                return buffers_max_for(queue, soft_max_value, soft_max_unit) as i64;
            }
            let soft = buffers_max_for(queue, soft_max_value, soft_max_unit) as i64;
            let mut pos = (queue.len() as i64 - 1).min(soft - 1);
            while pos >= 0 {
                if queue.get(pos as usize).is_some_and(&is_sync_frame) {
                    return pos;
                }
                pos -= 1;
            }
            buffers_max_for(queue, soft_max_value, soft_max_unit) as i64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{client::Client, payload::PayloadInner};

    fn push(queue: &mut BufferQueue, keyframe: bool) {
        queue.prepend(PayloadInner::new(vec![0; 10], None, false, keyframe));
    }

    fn client_with(sync: SyncMethod, burst_min: BurstSpec, burst_max: BurstSpec) -> Client<()> {
        Client::new((), sync, burst_min, burst_max)
    }

    #[test]
    fn new_client_start_never_escapes_queue_bounds() {
        let mut queue = BufferQueue::new();
        for i in 0..8 {
            push(&mut queue, i == 2);
        }
        for sync in [
            SyncMethod::Latest,
            SyncMethod::NextKeyframe,
            SyncMethod::LatestKeyframe,
            SyncMethod::Burst,
            SyncMethod::BurstKeyframe,
            SyncMethod::BurstWithKeyframe,
        ] {
            let mut client = client_with(sync, (Unit::Buffers, 3), (Unit::Buffers, 5));
            client.bufpos = 0;
            let result = new_client_start(&queue, &mut client, default_is_sync_frame);
            assert!(result == -1 || (0..queue.len() as i64).contains(&result));
        }
    }

    #[test]
    fn burst_keyframe_falls_back_to_prev_syncframe() {
        // index 0 = newest; pushing the list in reverse makes the final
        // queue order match the list written index-for-index, so index 2
        // ends up the keyframe, matching spec.md §8 scenario 3.
        let mut queue = BufferQueue::new();
        for key in [false, false, true, false, false].into_iter().rev() {
            push(&mut queue, key);
        }
        let mut client = client_with(SyncMethod::BurstKeyframe, (Unit::Buffers, 3), (Unit::Buffers, 5));
        let result = new_client_start(&queue, &mut client, default_is_sync_frame);
        assert_eq!(result, 2);
    }

    #[test]
    fn recover_keyframe_scans_backward_from_soft_limit() {
        let mut queue = BufferQueue::new();
        for key in [false, false, true, false, false, false, false].into_iter().rev() {
            push(&mut queue, key);
        }
        let mut client = client_with(SyncMethod::Latest, (Unit::Buffers, 0), (Unit::Buffers, -1));
        client.bufpos = 4;
        let result = recover(&queue, &client, RecoverPolicy::ResyncKeyframe, Unit::Buffers, 4, default_is_sync_frame);
        assert_eq!(result, 2);
    }

    #[test]
    fn buffers_max_for_counts_buffers_directly() {
        let mut queue = BufferQueue::new();
        for _ in 0..10 {
            push(&mut queue, false);
        }
        assert_eq!(buffers_max_for(&queue, 4, Unit::Buffers), 4);
    }
}
