//! Queue controller: called whenever the producer delivers a new buffer.
//! Advances every client's position, triggers recovery/slow-drop, and
//! trims the queue tail. `spec.md` §4.6, steps 1-9.

use castsink_timing::Nanos;
use tracing::{info, warn};

use crate::{
    client::Client,
    config::SinkConfig,
    payload::Payload,
    positioning::{self, LimitSpec},
    queue::BufferQueue,
    types::{Status, SyncMethod, Unit},
};

pub struct QueueBufferOutcome {
    /// Clients that crossed the hard limit or timed out this pass, in the
    /// order they were found. Callers remove these via the normal
    /// `remove_client_link` path so notifications still fire correctly.
    pub slow: Vec<usize>,
    /// Clients that just got data to send for the first time (`bufpos ==
    /// 0` or still `new_connection`) and so need their write interest
    /// re-armed with the poll set — the dispatch loop disarms it whenever
    /// a client's `sending` backlog and queue position both go empty.
    pub rearm: Vec<usize>,
    /// True if any client crossed into `rearm` or `slow` this pass, i.e.
    /// the dispatch thread's poll set should be `restart()`-ed.
    pub need_signal: bool,
    /// `max_buffer_usage`: the deepest position any client (or the
    /// min-retention/keyframe guarantees) needed this pass. `spec.md` §4.6
    /// step 8: "record `buffers_queued = max_buffer_usage`".
    pub buffers_queued: usize,
}

/// Prepends `buf` to the queue, reconciles every client's position against
/// it, and trims the tail back down to what's still referenced. Returns
/// the indices of clients that must be removed as SLOW (caller owns
/// removal so it can go through the shared notification path).
pub fn queue_buffer<H>(
    queue: &mut BufferQueue,
    clients: &mut [Client<H>],
    config: &SinkConfig,
    buf: Payload,
    now: Nanos,
) -> QueueBufferOutcome {
    let queue_len = queue.prepend(buf);

    let max_buffers = if config.units_max > 0 {
        positioning::buffers_max_for(queue, config.units_max, config.unit_type) as i64
    } else {
        -1
    };
    let soft_max_buffers = if config.units_soft_max > 0 {
        positioning::buffers_max_for(queue, config.units_soft_max, config.unit_type) as i64
    } else {
        -1
    };

    let mut max_buffer_usage: i64 = 0;
    let mut need_signal = false;
    let mut slow = Vec::new();
    let mut rearm = Vec::new();

    for (idx, client) in clients.iter_mut().enumerate() {
        if client.status != Status::Ok && client.status != Status::Flushing {
            continue;
        }

        client.bufpos += 1;

        if soft_max_buffers > 0 && client.bufpos >= soft_max_buffers {
            let newpos = positioning::recover(
                queue,
                client,
                config.recover_policy,
                config.unit_type,
                config.units_soft_max,
                positioning::default_is_sync_frame,
            );
            if newpos != client.bufpos {
                client.stats.dropped_buffers += (client.bufpos - newpos).max(0) as u64;
                client.bufpos = newpos;
                client.discont = true;
                info!(bufpos = client.bufpos, "client position reset by recovery policy");
            }
        }

        let timed_out = config.timeout.0 > 0
            && u64::from(now.saturating_sub(client.stats.last_activity_time)) > config.timeout.0;

        if (max_buffers > 0 && client.bufpos >= max_buffers) || timed_out {
            warn!(bufpos = client.bufpos, timed_out, "client too slow, marking for removal");
            client.status = Status::Slow;
            client.bufpos = -1;
            slow.push(idx);
            need_signal = true;
            continue;
        } else if client.bufpos == 0 || client.new_connection {
            rearm.push(idx);
            need_signal = true;
        }

        max_buffer_usage = max_buffer_usage.max(client.bufpos);
    }

    // Extend retention to satisfy bytes-min/buffers-min/time-min
    // regardless of what any client currently needs (spec.md §4.6 step 5).
    if queue_len > 0 {
        let min_spec = LimitSpec { bytes: config.bytes_min, buffers: config.buffers_min, time: config.time_min };
        let (usage, _max, _complete) = positioning::find_limits(queue, min_spec, LimitSpec::UNSET);
        max_buffer_usage = max_buffer_usage.max(usage as i64 + 1);
    }

    // Guarantee at least one keyframe survives for sync methods that need
    // one (spec.md §4.6 step 6).
    if matches!(config.def_sync_method, SyncMethod::LatestKeyframe | SyncMethod::BurstKeyframe) {
        let limit = if soft_max_buffers > 0 { queue_len.min(soft_max_buffers as usize) } else { queue_len };
        for i in 0..limit {
            if queue.get(i).is_some_and(|p| positioning::default_is_sync_frame(p)) {
                max_buffer_usage = max_buffer_usage.max(i as i64);
                break;
            }
        }
    }

    let retain = (max_buffer_usage + 1).max(0) as usize;
    queue.trim_to(retain.min(queue_len));

    QueueBufferOutcome { slow, rearm, need_signal, buffers_queued: max_buffer_usage.max(0) as usize }
}

/// Converts a config's `units_max`/`unit_type` into a hard buffer count, or
/// `-1` if unset. Exposed for `Sink::get_stats`-adjacent callers that need
/// the same conversion `queue_buffer` uses internally.
pub fn hard_limit_buffers(queue: &BufferQueue, config: &SinkConfig) -> i64 {
    if config.units_max > 0 {
        positioning::buffers_max_for(queue, config.units_max, config.unit_type) as i64
    } else {
        -1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::PayloadInner;

    fn payload(n: u8) -> Payload {
        PayloadInner::new(vec![n; 10], None, false, false)
    }

    #[test]
    fn hard_limit_drops_slow_client() {
        let mut queue = BufferQueue::new();
        let mut config = SinkConfig::new();
        config.units_max = 2;
        config.unit_type = Unit::Buffers;

        let mut clients: Vec<Client<()>> = vec![Client::new((), SyncMethod::Latest, (Unit::Undefined, -1), (Unit::Undefined, -1))];
        clients[0].bufpos = -1;
        clients[0].new_connection = false;

        let now = Nanos::now();
        queue_buffer(&mut queue, &mut clients, &config, payload(0), now);
        assert_eq!(clients[0].bufpos, 0);
        let outcome = queue_buffer(&mut queue, &mut clients, &config, payload(1), now);
        assert!(outcome.slow.is_empty());
        assert_eq!(clients[0].bufpos, 1);
        let outcome = queue_buffer(&mut queue, &mut clients, &config, payload(2), now);
        assert_eq!(outcome.slow, vec![0]);
        assert_eq!(clients[0].status, Status::Slow);
    }
}
