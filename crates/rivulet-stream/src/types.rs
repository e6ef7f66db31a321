use std::{
    collections::BTreeMap,
    sync::atomic::{AtomicU64, Ordering},
    time::Instant,
};

use rivulet_abr::VariantSource;
use rivulet_core::{MediaType, TimeRange};
use rivulet_net::RangeSpec;
use url::Url;

pub type RequestId = u64;

static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

fn next_request_id() -> RequestId {
    NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed)
}

/// Current time on the runtime clock.
///
/// Goes through tokio so that paused test clocks drive request timing.
pub(crate) fn now() -> Instant {
    tokio::time::Instant::now().into_std()
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequestAction {
    Download,
    /// End-of-stream sentinel, never fetched.
    Complete,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RequestKind {
    Init,
    Media,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct RequestTiming {
    pub enqueued: Option<Instant>,
    pub started: Option<Instant>,
    pub first_byte: Option<Instant>,
    pub finished: Option<Instant>,
}

impl RequestTiming {
    /// Seconds since the transfer started, measured at `at`.
    pub fn elapsed_at(&self, at: Instant) -> Option<f64> {
        self.started
            .map(|started| at.saturating_duration_since(started).as_secs_f64())
    }

    /// Seconds the transfer took, once finished.
    pub fn load_secs(&self) -> Option<f64> {
        self.finished.and_then(|finished| self.elapsed_at(finished))
    }
}

/// One addressable media fragment.
#[derive(Clone, Debug)]
pub struct SegmentRequest {
    pub id: RequestId,
    pub media_type: MediaType,
    pub action: RequestAction,
    pub kind: RequestKind,
    pub quality: usize,
    pub representation_id: String,
    pub index: u64,
    pub period_index: usize,
    pub period_start: f64,
    pub start_time: f64,
    pub duration: f64,
    pub timescale: u32,
    /// Absolute URL, or a path resolved against the selected origin.
    pub url: String,
    pub range: Option<RangeSpec>,
    pub origins: Vec<Url>,
    pub origin_index: usize,
    /// `(origin, quality)` combinations that failed, with the last status seen.
    pub failed: BTreeMap<(usize, usize), Option<u16>>,
    pub loading: bool,
    pub canceled: bool,
    pub aborted: bool,
    /// Survives pruning of unmarked pending requests.
    pub keep: bool,
    pub timing: RequestTiming,
    pub bytes_loaded: u64,
    pub status: Option<u16>,
}

impl SegmentRequest {
    fn base(media_type: MediaType, kind: RequestKind, action: RequestAction) -> Self {
        Self {
            id: next_request_id(),
            media_type,
            action,
            kind,
            quality: 0,
            representation_id: String::new(),
            index: 0,
            period_index: 0,
            period_start: 0.0,
            start_time: 0.0,
            duration: 0.0,
            timescale: 1,
            url: String::new(),
            range: None,
            origins: Vec::new(),
            origin_index: 0,
            failed: BTreeMap::new(),
            loading: false,
            canceled: false,
            aborted: false,
            keep: false,
            timing: RequestTiming::default(),
            bytes_loaded: 0,
            status: None,
        }
    }

    /// Media fragment of `representation` covering `[start_time, start_time + duration)`.
    pub fn media(
        representation: &Representation,
        media_type: MediaType,
        index: u64,
        start_time: f64,
        duration: f64,
        url: impl Into<String>,
    ) -> Self {
        Self {
            quality: representation.quality,
            representation_id: representation.id.clone(),
            index,
            start_time,
            duration,
            timescale: representation.timescale,
            url: url.into(),
            origins: representation.base_urls.clone(),
            ..Self::base(media_type, RequestKind::Media, RequestAction::Download)
        }
    }

    /// Initialization segment of `representation`.
    pub fn init(representation: &Representation, media_type: MediaType, url: impl Into<String>) -> Self {
        Self {
            quality: representation.quality,
            representation_id: representation.id.clone(),
            timescale: representation.timescale,
            url: url.into(),
            origins: representation.base_urls.clone(),
            ..Self::base(media_type, RequestKind::Init, RequestAction::Download)
        }
    }

    /// End-of-stream sentinel placed after fragment `index`.
    pub fn complete(representation: &Representation, media_type: MediaType, index: u64, start_time: f64) -> Self {
        Self {
            quality: representation.quality,
            representation_id: representation.id.clone(),
            index,
            start_time,
            ..Self::base(media_type, RequestKind::Media, RequestAction::Complete)
        }
    }

    #[must_use]
    pub fn with_range(mut self, range: RangeSpec) -> Self {
        self.range = Some(range);
        self
    }

    #[must_use]
    pub fn with_period(mut self, index: usize, start: f64) -> Self {
        self.period_index = index;
        self.period_start = start;
        self
    }

    #[must_use]
    pub fn with_origins(mut self, origins: Vec<Url>) -> Self {
        self.origins = origins;
        self
    }

    pub fn end_time(&self) -> f64 {
        self.start_time + self.duration
    }

    pub fn is_complete(&self) -> bool {
        self.action == RequestAction::Complete
    }

    pub fn is_init(&self) -> bool {
        self.kind == RequestKind::Init
    }

    /// Full URL against the selected origin.
    ///
    /// # Errors
    ///
    /// Returns the parse error when the URL cannot be built.
    pub fn resolve_url(&self) -> Result<Url, url::ParseError> {
        match self.origins.get(self.origin_index) {
            Some(origin) => origin.join(&self.url),
            None => Url::parse(&self.url),
        }
    }

    /// Pending queue order: period, then init before media, then fragment index.
    pub(crate) fn queue_order(&self, other: &Self) -> std::cmp::Ordering {
        self.period_start
            .total_cmp(&other.period_start)
            .then(self.kind.cmp(&other.kind))
            .then(self.index.cmp(&other.index))
    }

    /// Whether `other` fetches the same media as `self`.
    ///
    /// Same byte offset, and either the same quality and start time or a
    /// start time within `tolerance`.
    pub fn is_equivalent(&self, other: &Self, tolerance: f64) -> bool {
        let same_offset = self.range.map(|r| r.start) == other.range.map(|r| r.start);
        if !same_offset || self.kind != other.kind || self.action != other.action {
            return false;
        }
        let delta = (self.start_time - other.start_time).abs();
        let exact = self.quality == other.quality && delta < f64::EPSILON;
        exact || delta < tolerance
    }

    pub fn has_failed(&self, origin: usize, quality: usize) -> bool {
        self.failed.contains_key(&(origin, quality))
    }

    /// Number of `(origin, quality)` combinations tried without success.
    pub fn attempts(&self) -> usize {
        self.failed.len()
    }

    /// Copy of this request under a fresh id with the transfer state cleared.
    pub(crate) fn renewed(&self) -> Self {
        Self {
            id: next_request_id(),
            loading: false,
            canceled: false,
            timing: RequestTiming::default(),
            bytes_loaded: 0,
            status: None,
            ..self.clone()
        }
    }

    /// Carry fallback state over from the request this one replaces.
    pub(crate) fn substitute_for(&mut self, failed: &SegmentRequest, origin_index: usize) {
        self.failed = failed.failed.clone();
        self.origin_index = origin_index;
        self.aborted = true;
        self.keep = true;
        self.period_index = failed.period_index;
        self.period_start = failed.period_start;
    }
}

/// One quality tier of an adaptation.
#[derive(Clone, Debug, PartialEq)]
pub struct Representation {
    pub id: String,
    /// Position in the adaptation, ascending by bandwidth.
    pub quality: usize,
    pub bandwidth: u64,
    pub timescale: u32,
    /// Nominal fragment duration in seconds, zero when unknown.
    pub fragment_duration: f64,
    pub base_urls: Vec<Url>,
}

impl Representation {
    pub fn new(id: impl Into<String>, bandwidth: u64) -> Self {
        Self {
            id: id.into(),
            quality: 0,
            bandwidth,
            timescale: 1,
            fragment_duration: 0.0,
            base_urls: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_fragment_duration(mut self, secs: f64) -> Self {
        self.fragment_duration = secs;
        self
    }

    #[must_use]
    pub fn with_timescale(mut self, timescale: u32) -> Self {
        self.timescale = timescale;
        self
    }

    #[must_use]
    pub fn with_base_urls(mut self, urls: Vec<Url>) -> Self {
        self.base_urls = urls;
        self
    }
}

/// Interchangeable representations of one media type.
#[derive(Clone, Debug, PartialEq)]
pub struct Adaptation {
    pub id: String,
    pub media_type: MediaType,
    representations: Vec<Representation>,
}

impl Adaptation {
    /// Sorts representations by bandwidth and assigns their quality index.
    pub fn new(
        id: impl Into<String>,
        media_type: MediaType,
        mut representations: Vec<Representation>,
    ) -> Self {
        representations.sort_by_key(|r| r.bandwidth);
        for (quality, repr) in representations.iter_mut().enumerate() {
            repr.quality = quality;
        }
        Self {
            id: id.into(),
            media_type,
            representations,
        }
    }

    pub fn representation(&self, quality: usize) -> Option<&Representation> {
        self.representations.get(quality)
    }

    pub fn representations(&self) -> &[Representation] {
        &self.representations
    }

    pub fn len(&self) -> usize {
        self.representations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.representations.is_empty()
    }

    pub fn max_quality(&self) -> usize {
        self.len().saturating_sub(1)
    }
}

impl VariantSource for Adaptation {
    fn variant_count(&self) -> usize {
        self.len()
    }

    fn variant_bandwidth(&self, index: usize) -> Option<u64> {
        self.representation(index).map(|r| r.bandwidth)
    }
}

/// Content period the controller is scheduling for.
#[derive(Clone, Debug, PartialEq)]
pub struct PeriodInfo {
    pub index: usize,
    pub start: f64,
    /// Unknown for unbounded live periods.
    pub duration: Option<f64>,
    /// Minimum buffer declared by the manifest.
    pub min_buffer_time: f64,
    /// Live content whose start position is found by probing.
    pub dynamic: bool,
    /// Time range in which fragments are currently available.
    pub availability: Option<TimeRange>,
}

impl PeriodInfo {
    pub fn on_demand(duration: f64, min_buffer_time: f64) -> Self {
        Self {
            index: 0,
            start: 0.0,
            duration: Some(duration),
            min_buffer_time,
            dynamic: false,
            availability: None,
        }
    }

    pub fn live(availability: TimeRange, min_buffer_time: f64) -> Self {
        Self {
            index: 0,
            start: 0.0,
            duration: None,
            min_buffer_time,
            dynamic: true,
            availability: Some(availability),
        }
    }
}

/// One demultiplexed box run of a fragment, as reported by the index parser.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FragmentBox {
    pub offset: usize,
    pub size: usize,
    /// Presentation time in seconds.
    pub time: f64,
    pub duration: f64,
}

impl FragmentBox {
    pub fn end(&self) -> usize {
        self.offset + self.size
    }
}
