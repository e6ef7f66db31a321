use std::time::Duration;

pub use rivulet_abr::{AbrMode, AbrOptions};
pub use rivulet_net::{NetOptions, RetryPolicy};

/// How fragment bodies are delivered to the buffer controller.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TransferMode {
    /// Body is handed over once the fragment has fully arrived.
    #[default]
    Buffered,
    /// Each received increment is demultiplexed and queued immediately.
    Progressive,
}

/// Fragment loader configuration.
#[derive(Clone, Debug)]
pub struct LoaderOptions {
    /// Maximum number of fragments loading at the same time.
    pub concurrency_limit: usize,
    /// Same-URL retries of a whole transfer before falling back to another
    /// quality or origin.
    pub retry_policy: RetryPolicy,
    /// Upper bound on waiting for a fragment response to start.
    pub request_timeout: Duration,
    pub transfer_mode: TransferMode,
    /// Number of executed requests kept for deduplication and bandwidth revision.
    pub history_cap: usize,
    /// Two requests whose start times differ by less than this are equivalent.
    pub dedup_tolerance: f64,
}

impl Default for LoaderOptions {
    fn default() -> Self {
        Self {
            concurrency_limit: 2,
            retry_policy: RetryPolicy::default(),
            request_timeout: Duration::from_secs(30),
            transfer_mode: TransferMode::Buffered,
            history_cap: 20,
            dedup_tolerance: 0.1,
        }
    }
}

impl LoaderOptions {
    #[must_use]
    pub fn with_concurrency_limit(mut self, limit: usize) -> Self {
        self.concurrency_limit = limit.max(1);
        self
    }

    #[must_use]
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_transfer_mode(mut self, mode: TransferMode) -> Self {
        self.transfer_mode = mode;
        self
    }
}

/// Buffer controller configuration.
///
/// All durations expressed as `f64` are seconds of media time; `Duration`
/// fields are wall-clock timer periods.
#[derive(Clone, Debug)]
pub struct StreamConfig {
    pub validate_interval: Duration,
    pub append_interval: Duration,
    /// Lower bound on the target buffer when the manifest declares less.
    pub default_min_buffer_time: f64,
    /// Overrides every other minimum buffer source when set.
    pub forced_min_buffer_time: Option<f64>,
    /// Extra media requested on top of the minimum buffer.
    pub prefetch_threshold: f64,
    /// Fragments longer than this are appended in several pieces.
    pub append_enable_threshold: f64,
    pub schedule_while_paused: bool,
    /// Low-latency live mode. Skips the minimum buffer clamp.
    pub low_latency: bool,
    /// Buffer level under which playback is considered stalled.
    pub stall_threshold: f64,
    /// Largest unbuffered gap the playhead is moved across.
    pub max_gap_jump: f64,
    /// Appends pause while more than this is buffered ahead.
    pub max_buffer_ahead: f64,
    /// Media older than this behind the playhead is removed from the sink.
    pub buffer_to_keep_behind: f64,
    /// Seek without removing stale buffered ranges.
    pub fast_seek: bool,
    pub loader: LoaderOptions,
    pub abr: AbrOptions,
    pub event_channel_capacity: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            validate_interval: Duration::from_millis(500),
            append_interval: Duration::from_millis(100),
            default_min_buffer_time: 8.0,
            forced_min_buffer_time: None,
            prefetch_threshold: 1.0,
            append_enable_threshold: 2.0,
            schedule_while_paused: false,
            low_latency: false,
            stall_threshold: 0.5,
            max_gap_jump: 0.5,
            max_buffer_ahead: 60.0,
            buffer_to_keep_behind: 30.0,
            fast_seek: false,
            loader: LoaderOptions::default(),
            abr: AbrOptions::default(),
            event_channel_capacity: 64,
        }
    }
}

impl StreamConfig {
    /// Configuration for low-latency live playback: progressive transfer
    /// and no minimum buffer clamp.
    pub fn low_latency() -> Self {
        Self {
            low_latency: true,
            loader: LoaderOptions::default().with_transfer_mode(TransferMode::Progressive),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_abr(mut self, abr: AbrOptions) -> Self {
        self.abr = abr;
        self
    }

    #[must_use]
    pub fn with_loader(mut self, loader: LoaderOptions) -> Self {
        self.loader = loader;
        self
    }

    #[must_use]
    pub fn with_forced_min_buffer_time(mut self, secs: f64) -> Self {
        self.forced_min_buffer_time = Some(secs);
        self
    }

    #[must_use]
    pub fn with_schedule_while_paused(mut self, enabled: bool) -> Self {
        self.schedule_while_paused = enabled;
        self
    }

    #[must_use]
    pub fn with_fast_seek(mut self, enabled: bool) -> Self {
        self.fast_seek = enabled;
        self
    }

    #[must_use]
    pub fn with_intervals(mut self, validate: Duration, append: Duration) -> Self {
        self.validate_interval = validate;
        self.append_interval = append;
        self
    }
}
