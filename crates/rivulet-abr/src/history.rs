use std::collections::VecDeque;

/// Fixed-capacity window that evicts the oldest sample on overflow.
#[derive(Clone, Debug)]
struct RollingWindow {
    samples: VecDeque<f64>,
    capacity: usize,
}

impl RollingWindow {
    fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    fn push(&mut self, value: f64) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(value);
    }
}

/// Per-media-type throughput memory of the decision engine.
///
/// Holds the exponentially smoothed throughput and two short windows: raw
/// throughput samples and schedule margins (media duration minus download time).
#[derive(Clone, Debug)]
pub struct ThroughputHistory {
    smoothed_bps: Option<f64>,
    decay: f64,
    rates: RollingWindow,
    margins: RollingWindow,
}

impl ThroughputHistory {
    pub fn new(window: usize, decay: f64) -> Self {
        Self {
            smoothed_bps: None,
            decay,
            rates: RollingWindow::new(window),
            margins: RollingWindow::new(window),
        }
    }

    /// Fold a throughput sample into the average and the rate window.
    pub fn push_rate(&mut self, bps: f64) {
        self.smoothed_bps = Some(match self.smoothed_bps {
            None => bps,
            Some(prev) => (1.0 - self.decay) * prev + self.decay * bps,
        });
        self.rates.push(bps);
    }

    pub fn push_margin(&mut self, secs: f64) {
        self.margins.push(secs);
    }

    pub fn smoothed_bps(&self) -> Option<f64> {
        self.smoothed_bps
    }

    pub fn rates(&self) -> impl Iterator<Item = f64> + '_ {
        self.rates.samples.iter().copied()
    }

    pub fn margin_sum(&self) -> f64 {
        self.margins.samples.iter().sum()
    }

    pub fn reset(&mut self) {
        self.smoothed_bps = None;
        self.rates.samples.clear();
        self.margins.samples.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_sample_sets_average_directly() {
        let mut h = ThroughputHistory::new(3, 0.25);
        h.push_rate(1_000.0);
        assert_eq!(h.smoothed_bps(), Some(1_000.0));
    }

    #[test]
    fn average_is_exponential_not_arithmetic() {
        let mut h = ThroughputHistory::new(3, 0.25);
        for bps in [1_000.0, 2_000.0, 3_000.0] {
            h.push_rate(bps);
        }
        // 0.75 * (0.75 * 1000 + 0.25 * 2000) + 0.25 * 3000
        let expected = 0.75 * 1_250.0 + 0.25 * 3_000.0;
        let smoothed = h.smoothed_bps().unwrap();
        assert!((smoothed - expected).abs() < 1e-9);
        assert!((smoothed - 2_000.0).abs() > 1.0);
    }

    #[test]
    fn windows_keep_only_latest_samples() {
        let mut h = ThroughputHistory::new(3, 0.25);
        for v in 1..=5 {
            h.push_rate(f64::from(v));
            h.push_margin(f64::from(v));
        }
        assert_eq!(h.rates().collect::<Vec<_>>(), vec![3.0, 4.0, 5.0]);
        assert_eq!(h.margin_sum(), 12.0);
    }

    #[test]
    fn reset_clears_everything() {
        let mut h = ThroughputHistory::new(3, 0.25);
        h.push_rate(10.0);
        h.push_margin(-1.0);
        h.reset();
        assert_eq!(h.smoothed_bps(), None);
        assert_eq!(h.rates().count(), 0);
        assert_eq!(h.margin_sum(), 0.0);
    }
}
