//! Playback clock driven by the test.

use std::sync::Arc;

use parking_lot::Mutex;
use rivulet_stream::PlaybackClock;

#[derive(Debug)]
struct ClockState {
    time: f64,
    paused: bool,
    rate: f64,
    seeks: Vec<f64>,
}

/// [`PlaybackClock`] whose position only moves when told to.
#[derive(Clone, Debug)]
pub struct ManualClock {
    state: Arc<Mutex<ClockState>>,
    start_time: f64,
}

impl ManualClock {
    pub fn new(time: f64) -> Self {
        Self {
            state: Arc::new(Mutex::new(ClockState {
                time,
                paused: false,
                rate: 1.0,
                seeks: Vec::new(),
            })),
            start_time: time,
        }
    }

    pub fn set_time(&self, time: f64) {
        self.state.lock().time = time;
    }

    pub fn advance(&self, secs: f64) {
        let mut state = self.state.lock();
        state.time += secs * state.rate;
    }

    pub fn set_paused(&self, paused: bool) {
        self.state.lock().paused = paused;
    }

    /// Positions requested through [`PlaybackClock::seek_to`].
    pub fn seeks(&self) -> Vec<f64> {
        self.state.lock().seeks.clone()
    }
}

impl PlaybackClock for ManualClock {
    fn current_time(&self) -> f64 {
        self.state.lock().time
    }

    fn is_paused(&self) -> bool {
        self.state.lock().paused
    }

    fn start_time(&self) -> f64 {
        self.start_time
    }

    fn playback_rate(&self) -> f64 {
        self.state.lock().rate
    }

    fn seek_to(&self, time: f64) {
        let mut state = self.state.lock();
        state.time = time;
        state.seeks.push(time);
    }
}
