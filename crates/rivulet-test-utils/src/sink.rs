//! In-memory media buffer.

use std::sync::Arc;

use parking_lot::Mutex;
use rivulet_core::TimeRange;
use rivulet_stream::{MediaBufferSink, SinkAppend, SinkError};

#[derive(Debug, Default)]
struct SinkState {
    ranges: Vec<TimeRange>,
    appends: Vec<SinkAppend>,
    removals: Vec<(f64, f64)>,
    stored_bytes: usize,
    quota: Option<usize>,
    closed: bool,
}

impl SinkState {
    fn insert(&mut self, start: f64, end: f64) {
        let mut merged = TimeRange { start, end };
        self.ranges.retain(|r| {
            let touches = r.start <= merged.end + 1e-6 && merged.start <= r.end + 1e-6;
            if touches {
                merged.start = merged.start.min(r.start);
                merged.end = merged.end.max(r.end);
            }
            !touches
        });
        let at = self.ranges.partition_point(|r| r.start < merged.start);
        self.ranges.insert(at, merged);
    }

    fn cut(&mut self, start: f64, end: f64) {
        let mut kept = Vec::with_capacity(self.ranges.len() + 1);
        for r in self.ranges.drain(..) {
            if r.end <= start || r.start >= end {
                kept.push(r);
                continue;
            }
            if r.start < start {
                kept.push(TimeRange { start: r.start, end: start });
            }
            if r.end > end {
                kept.push(TimeRange { start: end, end: r.end });
            }
        }
        self.ranges = kept;
    }
}

/// [`MediaBufferSink`] keeping time ranges and every append for inspection.
/// Clones share state, so a test can keep one while the controller owns another.
#[derive(Clone, Debug, Default)]
pub struct MemorySink {
    state: Arc<Mutex<SinkState>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail appends with [`SinkError::QuotaExceeded`] past `bytes`.
    #[must_use]
    pub fn with_quota(self, bytes: usize) -> Self {
        self.state.lock().quota = Some(bytes);
        self
    }

    pub fn close(&self) {
        self.state.lock().closed = true;
    }

    pub fn appends(&self) -> Vec<SinkAppend> {
        self.state.lock().appends.clone()
    }

    pub fn appended_starts(&self) -> Vec<f64> {
        self.state.lock().appends.iter().map(|a| a.start).collect()
    }

    pub fn removals(&self) -> Vec<(f64, f64)> {
        self.state.lock().removals.clone()
    }

    pub fn ranges(&self) -> Vec<TimeRange> {
        self.state.lock().ranges.clone()
    }
}

impl MediaBufferSink for MemorySink {
    fn append(&mut self, append: SinkAppend) -> Result<(), SinkError> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(SinkError::Closed);
        }
        let size = append.bytes.len() + append.init.as_ref().map_or(0, |i| i.len());
        if state.quota.is_some_and(|quota| state.stored_bytes + size > quota) {
            return Err(SinkError::QuotaExceeded);
        }
        state.stored_bytes += size;
        state.insert(append.start, append.start + append.duration);
        state.appends.push(append);
        Ok(())
    }

    fn remove(&mut self, start: f64, end: f64) -> Result<(), SinkError> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(SinkError::Closed);
        }
        state.cut(start, end);
        state.removals.push((start, end));
        // Only what is still referenced by a range counts against the quota.
        let remaining: usize = state
            .appends
            .iter()
            .filter(|a| state.ranges.iter().any(|r| r.contains(a.start, 1e-6)))
            .map(|a| a.bytes.len())
            .sum();
        state.stored_bytes = remaining;
        Ok(())
    }

    fn buffered_length(&self, time: f64, tolerance: f64) -> f64 {
        self.buffered_range(time, tolerance)
            .map_or(0.0, |r| (r.end - time).max(0.0))
    }

    fn buffered_range(&self, time: f64, tolerance: f64) -> Option<TimeRange> {
        let state = self.state.lock();
        let first = state
            .ranges
            .iter()
            .position(|r| r.start - tolerance <= time && time < r.end + tolerance)?;
        let mut range = state.ranges[first];
        for next in &state.ranges[first + 1..] {
            if next.start - range.end > tolerance {
                break;
            }
            range.end = range.end.max(next.end);
        }
        Some(range)
    }

    fn all_ranges(&self) -> Vec<TimeRange> {
        self.state.lock().ranges.clone()
    }

    fn is_updating(&self) -> bool {
        false
    }
}
