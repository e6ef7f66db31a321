use bytes::Bytes;
use rivulet_core::{MediaType, TimeRange};

use crate::{
    error::{IndexError, SinkError},
    metrics::{BufferState, HttpSample, RepresentationSwitch},
    types::{FragmentBox, Representation, SegmentRequest},
};

/// Builds fragment requests from the media index.
#[cfg_attr(test, mockall::automock)]
pub trait IndexResolver: Send + Sync {
    /// Initialization segment of `representation`.
    fn init_request(&self, representation: &Representation) -> Result<SegmentRequest, IndexError>;

    /// Fragment covering `time`, or a `Complete` sentinel past the end of the presentation.
    fn request_for_time(
        &self,
        representation: &Representation,
        time: f64,
    ) -> Result<SegmentRequest, IndexError>;

    /// Fragment following `previous`, which may belong to another representation.
    fn next_request(
        &self,
        representation: &Representation,
        previous: &SegmentRequest,
    ) -> Result<SegmentRequest, IndexError>;

    /// Fragments needed to add `wanted` seconds on top of `buffered`.
    fn segment_count_for_duration(
        &self,
        representation: &Representation,
        wanted: f64,
        buffered: f64,
    ) -> usize;

    /// Box-level demultiplexing of (possibly partial) fragment bytes.
    fn parse_fragment(&self, bytes: &[u8], timescale: u32) -> Result<Vec<FragmentBox>, IndexError>;
}

/// One append operation against the media sink.
#[derive(Clone, Debug, PartialEq)]
pub struct SinkAppend {
    pub bytes: Bytes,
    /// Initialization data, present when the quality differs from the previous append.
    pub init: Option<Bytes>,
    pub start: f64,
    pub duration: f64,
    pub quality: usize,
}

/// Platform buffer that accepts encoded media for playback.
#[cfg_attr(test, mockall::automock)]
pub trait MediaBufferSink: Send {
    /// # Errors
    ///
    /// [`SinkError::QuotaExceeded`] when the buffer is full.
    fn append(&mut self, append: SinkAppend) -> Result<(), SinkError>;

    fn remove(&mut self, start: f64, end: f64) -> Result<(), SinkError>;

    /// Seconds buffered contiguously from `time`, bridging gaps up to `tolerance`.
    fn buffered_length(&self, time: f64, tolerance: f64) -> f64;

    fn buffered_range(&self, time: f64, tolerance: f64) -> Option<TimeRange>;

    fn all_ranges(&self) -> Vec<TimeRange>;

    /// True while a previous operation is still being processed.
    fn is_updating(&self) -> bool;
}

/// Playback position source.
#[cfg_attr(test, mockall::automock)]
pub trait PlaybackClock: Send + Sync {
    fn current_time(&self) -> f64;
    fn is_paused(&self) -> bool;
    fn start_time(&self) -> f64;
    fn playback_rate(&self) -> f64;
    /// Move the playhead, used to jump small gaps and to start live playback.
    fn seek_to(&self, time: f64);
}

/// Append-only store of streaming metrics.
#[cfg_attr(test, mockall::automock)]
pub trait MetricsSink: Send + Sync {
    fn add_http_request(&self, media: MediaType, sample: HttpSample);
    /// Sample corrected for bytes in flight on overlapping requests.
    fn add_revised_http(&self, media: MediaType, sample: HttpSample);
    fn add_buffer_level(&self, media: MediaType, level: f64);
    fn add_buffer_state(&self, media: MediaType, state: BufferState);
    fn add_representation_switch(&self, media: MediaType, switch: RepresentationSwitch);
    fn latest_revised_http(&self, media: MediaType) -> Option<HttpSample>;
    fn current_buffer_level(&self, media: MediaType) -> Option<f64>;
}
