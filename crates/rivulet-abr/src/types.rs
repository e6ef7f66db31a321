use std::time::Instant;

/// HTTP status a transport reports when a request timed out.
pub(crate) const REQUEST_TIMEOUT_STATUS: u16 = 408;

/// ABR mode selection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AbrMode {
    /// Automatic bitrate adaptation.
    /// Optionally specify the initial quality index (defaults to 0).
    Auto(Option<usize>),
    /// Fixed quality, adaptation disabled.
    Manual(usize),
}

impl Default for AbrMode {
    fn default() -> Self {
        Self::Auto(None)
    }
}

/// Direction signal of a decision. Persisted per media type as the
/// "confidence" of the last decision.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum SwitchDirection {
    #[default]
    NoChange,
    SwitchDown,
    SwitchUp,
}

/// Source of quality tier information for the decision engine.
///
/// Quality indices are ordered by ascending bandwidth.
pub trait VariantSource {
    /// Total number of available quality tiers.
    fn variant_count(&self) -> usize;

    /// Bandwidth in bits per second of the tier at `index`.
    ///
    /// Returns `None` if the index is out of bounds.
    fn variant_bandwidth(&self, index: usize) -> Option<u64>;
}

/// Decision engine configuration.
#[derive(Clone, Debug)]
pub struct AbrOptions {
    /// ABR mode: Auto (adaptive) or Manual (fixed quality).
    pub mode: AbrMode,
    /// Multiplier applied to measured throughput and download ratio (0.9 keeps 10% headroom).
    pub safety_factor: f64,
    /// Weight of the newest sample in the smoothed throughput.
    pub ewma_decay: f64,
    /// Number of throughput and schedule-margin samples kept.
    pub history_len: usize,
    /// Bandwidth multiplier used when the buffer cushion is thin.
    pub low_buffer_aggressiveness: f64,
    /// Headroom over the current bandwidth allowed when rebasing onto a new adaptation.
    pub rebase_headroom: f64,
}

impl Default for AbrOptions {
    fn default() -> Self {
        Self {
            mode: AbrMode::default(),
            safety_factor: 0.9,
            ewma_decay: 0.25,
            history_len: 3,
            low_buffer_aggressiveness: 1.5,
            rebase_headroom: 1.1,
        }
    }
}

impl AbrOptions {
    /// Initial quality index based on mode.
    pub fn initial_quality(&self) -> usize {
        match self.mode {
            AbrMode::Auto(Some(idx)) | AbrMode::Manual(idx) => idx,
            AbrMode::Auto(None) => 0,
        }
    }

    /// Check if ABR is enabled (Auto mode).
    pub fn is_auto(&self) -> bool {
        matches!(self.mode, AbrMode::Auto(_))
    }

    #[must_use]
    pub fn with_mode(mut self, mode: AbrMode) -> Self {
        self.mode = mode;
        self
    }

    #[must_use]
    pub fn with_safety_factor(mut self, factor: f64) -> Self {
        self.safety_factor = factor;
        self
    }
}

/// Timing record of one completed fragment download.
///
/// Built from the bandwidth-revised HTTP metric, so `bytes` already includes
/// bytes that were in flight on overlapping requests.
#[derive(Clone, Copy, Debug)]
pub struct ThroughputSample {
    /// Identity of the request, used to skip samples that were already evaluated.
    pub request_id: u64,
    pub bytes: u64,
    pub request_start: Instant,
    pub finish: Instant,
    /// Presentation duration of the fragment in seconds (may be NaN when unknown).
    pub media_duration: f64,
    pub status: Option<u16>,
}

impl ThroughputSample {
    pub fn is_timeout(&self) -> bool {
        self.status == Some(REQUEST_TIMEOUT_STATUS)
    }

    /// Wall-clock time the download took, in seconds.
    pub fn total_secs(&self) -> f64 {
        self.finish
            .saturating_duration_since(self.request_start)
            .as_secs_f64()
    }
}

/// Playback context accompanying a decision.
#[derive(Clone, Copy, Debug)]
pub struct AbrContext {
    /// Seconds of media buffered ahead of the playhead.
    pub buffer_level: f64,
    /// Target minimum buffer in seconds.
    pub min_buffer_time: f64,
    /// Whether the previous fragment request was aborted by policy.
    pub last_request_aborted: bool,
}

/// Minimal quality tier description.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Variant {
    pub variant_index: usize,
    pub bandwidth_bps: u64,
}

impl VariantSource for [Variant] {
    fn variant_count(&self) -> usize {
        self.len()
    }

    fn variant_bandwidth(&self, index: usize) -> Option<u64> {
        self.iter()
            .find(|v| v.variant_index == index)
            .map(|v| v.bandwidth_bps)
    }
}

impl VariantSource for Vec<Variant> {
    fn variant_count(&self) -> usize {
        self.as_slice().variant_count()
    }

    fn variant_bandwidth(&self, index: usize) -> Option<u64> {
        self.as_slice().variant_bandwidth(index)
    }
}
