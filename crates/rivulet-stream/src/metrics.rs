use std::{collections::VecDeque, time::Instant};

use parking_lot::Mutex;
use rivulet_abr::ThroughputSample;
use rivulet_core::{MediaType, PerMedia};

use crate::{traits::MetricsSink, types::RequestId};

/// Timing and size of one HTTP fragment transfer.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct HttpSample {
    pub request_id: RequestId,
    pub quality: usize,
    pub bytes: u64,
    pub request_start: Instant,
    pub first_byte: Option<Instant>,
    pub finish: Instant,
    pub media_duration: f64,
    pub status: Option<u16>,
}

impl HttpSample {
    pub fn throughput(&self) -> ThroughputSample {
        ThroughputSample {
            request_id: self.request_id,
            bytes: self.bytes,
            request_start: self.request_start,
            finish: self.finish,
            media_duration: self.media_duration,
            status: self.status,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BufferState {
    Loaded,
    Stalled,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RepresentationSwitch {
    pub from: usize,
    pub to: usize,
    /// Media time at which the new quality applies.
    pub at: f64,
}

#[derive(Debug, Default)]
struct Series {
    http: VecDeque<HttpSample>,
    revised: VecDeque<HttpSample>,
    levels: VecDeque<f64>,
    states: VecDeque<BufferState>,
    switches: VecDeque<RepresentationSwitch>,
}

fn push_bounded<T>(queue: &mut VecDeque<T>, value: T, cap: usize) {
    if queue.len() == cap {
        queue.pop_front();
    }
    queue.push_back(value);
}

/// In-memory [`MetricsSink`] keeping the most recent samples per media type.
#[derive(Debug)]
pub struct MemoryMetrics {
    capacity: usize,
    series: Mutex<PerMedia<Series>>,
}

impl Default for MemoryMetrics {
    fn default() -> Self {
        Self::new(64)
    }
}

impl MemoryMetrics {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            series: Mutex::new(PerMedia::default()),
        }
    }

    pub fn http_requests(&self, media: MediaType) -> Vec<HttpSample> {
        self.series.lock().get(media).http.iter().copied().collect()
    }

    pub fn revised_requests(&self, media: MediaType) -> Vec<HttpSample> {
        self.series.lock().get(media).revised.iter().copied().collect()
    }

    pub fn buffer_states(&self, media: MediaType) -> Vec<BufferState> {
        self.series.lock().get(media).states.iter().copied().collect()
    }

    pub fn switches(&self, media: MediaType) -> Vec<RepresentationSwitch> {
        self.series.lock().get(media).switches.iter().copied().collect()
    }
}

impl MetricsSink for MemoryMetrics {
    fn add_http_request(&self, media: MediaType, sample: HttpSample) {
        push_bounded(&mut self.series.lock().get_mut(media).http, sample, self.capacity);
    }

    fn add_revised_http(&self, media: MediaType, sample: HttpSample) {
        push_bounded(&mut self.series.lock().get_mut(media).revised, sample, self.capacity);
    }

    fn add_buffer_level(&self, media: MediaType, level: f64) {
        push_bounded(&mut self.series.lock().get_mut(media).levels, level, self.capacity);
    }

    fn add_buffer_state(&self, media: MediaType, state: BufferState) {
        push_bounded(&mut self.series.lock().get_mut(media).states, state, self.capacity);
    }

    fn add_representation_switch(&self, media: MediaType, switch: RepresentationSwitch) {
        push_bounded(&mut self.series.lock().get_mut(media).switches, switch, self.capacity);
    }

    fn latest_revised_http(&self, media: MediaType) -> Option<HttpSample> {
        self.series.lock().get(media).revised.back().copied()
    }

    fn current_buffer_level(&self, media: MediaType) -> Option<f64> {
        self.series.lock().get(media).levels.back().copied()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn sample(id: RequestId) -> HttpSample {
        let start = Instant::now();
        HttpSample {
            request_id: id,
            quality: 1,
            bytes: 250_000,
            request_start: start,
            first_byte: None,
            finish: start + Duration::from_secs(1),
            media_duration: 2.0,
            status: Some(200),
        }
    }

    #[test]
    fn keeps_only_most_recent_samples() {
        let metrics = MemoryMetrics::new(2);
        for id in 1..=3 {
            metrics.add_revised_http(MediaType::Video, sample(id));
        }
        let ids: Vec<_> = metrics
            .revised_requests(MediaType::Video)
            .iter()
            .map(|s| s.request_id)
            .collect();
        assert_eq!(ids, [2, 3]);
        assert_eq!(
            metrics.latest_revised_http(MediaType::Video).map(|s| s.request_id),
            Some(3)
        );
    }

    #[test]
    fn media_types_are_tracked_separately() {
        let metrics = MemoryMetrics::default();
        metrics.add_buffer_level(MediaType::Audio, 4.5);
        assert_eq!(metrics.current_buffer_level(MediaType::Audio), Some(4.5));
        assert_eq!(metrics.current_buffer_level(MediaType::Video), None);
        assert!(metrics.latest_revised_http(MediaType::Audio).is_none());
    }

    #[test]
    fn throughput_sample_carries_timing() {
        let s = sample(7).throughput();
        assert_eq!(s.request_id, 7);
        assert!((s.total_secs() - 1.0).abs() < 1e-9);
    }
}
