//! Builder-style sink configuration, per `spec.md` §6's configuration
//! table. No external config-format crate is pulled in: values are
//! supplied programmatically by the embedder, matching the source
//! system's GObject properties.

use castsink_timing::Nanos;
use castsink_utils::ThreadPriority;

use crate::types::{RecoverPolicy, SyncMethod, Unit};

#[derive(Clone, Debug)]
pub struct SinkConfig {
    pub unit_type: Unit,
    /// Hard retention limit; `-1` disables it.
    pub units_max: i64,
    /// Recovery threshold; `-1` disables it.
    pub units_soft_max: i64,
    pub buffers_min: i64,
    pub bytes_min: i64,
    pub time_min: i64,
    pub def_sync_method: SyncMethod,
    pub def_burst_unit: Unit,
    pub def_burst_value: i64,
    pub recover_policy: RecoverPolicy,
    pub resend_streamheader: bool,
    pub handle_read: bool,
    /// Per-client inactivity limit; `Nanos::ZERO` means none.
    pub timeout: Nanos,
    /// IP DSCP value (0-63) applied to every socket client via
    /// `ClientHandle::set_dscp`. `None` leaves the default untouched.
    pub qos_dscp: Option<u8>,
    /// `SO_SNDBUF`/`SO_RCVBUF` size applied to every socket client.
    pub socket_buf_size: Option<usize>,
    pub dispatch_thread_core: Option<usize>,
    pub dispatch_thread_priority: ThreadPriority,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            unit_type: Unit::Buffers,
            units_max: -1,
            units_soft_max: -1,
            buffers_min: -1,
            bytes_min: -1,
            time_min: -1,
            def_sync_method: SyncMethod::Latest,
            def_burst_unit: Unit::Undefined,
            def_burst_value: -1,
            recover_policy: RecoverPolicy::None,
            resend_streamheader: true,
            handle_read: true,
            timeout: Nanos::ZERO,
            qos_dscp: None,
            socket_buf_size: None,
            dispatch_thread_core: None,
            dispatch_thread_priority: ThreadPriority::OSDefault,
        }
    }
}

impl SinkConfig {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_unit_type(mut self, unit_type: Unit) -> Self {
        self.unit_type = unit_type;
        self
    }

    #[must_use]
    pub fn with_units_max(mut self, units_max: i64) -> Self {
        self.units_max = units_max;
        self
    }

    #[must_use]
    pub fn with_units_soft_max(mut self, units_soft_max: i64) -> Self {
        self.units_soft_max = units_soft_max;
        self
    }

    #[must_use]
    pub fn with_min_retention(mut self, buffers_min: i64, bytes_min: i64, time_min: i64) -> Self {
        self.buffers_min = buffers_min;
        self.bytes_min = bytes_min;
        self.time_min = time_min;
        self
    }

    #[must_use]
    pub fn with_def_sync_method(mut self, method: SyncMethod) -> Self {
        self.def_sync_method = method;
        self
    }

    #[must_use]
    pub fn with_def_burst(mut self, unit: Unit, value: i64) -> Self {
        self.def_burst_unit = unit;
        self.def_burst_value = value;
        self
    }

    #[must_use]
    pub fn with_recover_policy(mut self, policy: RecoverPolicy) -> Self {
        self.recover_policy = policy;
        self
    }

    #[must_use]
    pub fn with_resend_streamheader(mut self, resend: bool) -> Self {
        self.resend_streamheader = resend;
        self
    }

    #[must_use]
    pub fn with_handle_read(mut self, handle_read: bool) -> Self {
        self.handle_read = handle_read;
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Nanos) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_qos_dscp(mut self, dscp: u8) -> Self {
        self.qos_dscp = Some(dscp);
        self
    }

    #[must_use]
    pub fn with_socket_buf_size(mut self, size: usize) -> Self {
        self.socket_buf_size = Some(size);
        self
    }

    #[must_use]
    pub fn with_dispatch_thread(mut self, core: Option<usize>, priority: ThreadPriority) -> Self {
        self.dispatch_thread_core = core;
        self.dispatch_thread_priority = priority;
        self
    }
}
