//! Live edge discovery by probing fragment availability.

use std::sync::Arc;

use async_trait::async_trait;
use rivulet_core::TimeRange;
use rivulet_net::Net;
use tracing::{debug, trace, warn};

use crate::{
    error::{StreamError, StreamResult},
    traits::IndexResolver,
    types::Representation,
};

/// Upper bound on probes, whatever the window size.
const MAX_PROBES: usize = 64;
/// Smallest interval searched when the fragment duration is unknown.
const MIN_SEARCH_WIDTH: f64 = 0.001;

/// Checks whether media at a given time is available.
#[async_trait]
pub trait EdgeProbe: Send + Sync {
    /// Start time of the fragment covering `time`, if it can be fetched.
    async fn probe(&self, time: f64) -> Option<f64>;
}

/// Probes through the index resolver and an HTTP `HEAD` request.
pub struct NetProbe {
    net: Arc<dyn Net>,
    resolver: Arc<dyn IndexResolver>,
    representation: Representation,
}

impl NetProbe {
    pub fn new(net: Arc<dyn Net>, resolver: Arc<dyn IndexResolver>, representation: Representation) -> Self {
        Self {
            net,
            resolver,
            representation,
        }
    }
}

#[async_trait]
impl EdgeProbe for NetProbe {
    async fn probe(&self, time: f64) -> Option<f64> {
        let request = self
            .resolver
            .request_for_time(&self.representation, time)
            .ok()
            .filter(|r| !r.is_complete())?;
        let url = request.resolve_url().ok()?;
        match self.net.head(url, None).await {
            Ok(_) => Some(request.start_time),
            Err(e) => {
                trace!(time, error = %e, "live edge: probe failed");
                None
            }
        }
    }
}

/// Find the most recent available fragment start inside `window`.
///
/// Probing starts at the window end and bisects towards the window start
/// until a fragment is found. From there the edge is bracketed within
/// `[hit, hit + window length]` and bisected down to one fragment duration.
/// With an unknown duration (`0`) the first hit is returned as is.
///
/// # Errors
///
/// [`StreamError::LiveEdgeNotFound`] when no probe succeeds.
pub async fn find_live_edge<P: EdgeProbe + ?Sized>(
    probe: &P,
    window: TimeRange,
    fragment_duration: f64,
) -> StreamResult<f64> {
    let span = window.duration();
    let min_width = if fragment_duration > 0.0 {
        fragment_duration
    } else {
        MIN_SEARCH_WIDTH
    };

    let mut probes = 0;
    let low = window.start;
    let mut position = window.end;
    let (hit_position, hit_start) = loop {
        probes += 1;
        if let Some(start) = probe.probe(position).await {
            break (position, start);
        }
        let high = position;
        if high - low < min_width || probes >= MAX_PROBES {
            warn!(start = window.start, end = window.end, probes, "live edge: nothing available");
            return Err(StreamError::LiveEdgeNotFound);
        }
        position = low + (high - low) / 2.0;
    };

    if fragment_duration <= 0.0 {
        warn!(time = hit_start, "live edge: fragment duration unknown, using first available fragment");
        return Ok(hit_start);
    }

    let ahead = hit_position + fragment_duration;
    let Some(mut edge) = probe.probe(ahead).await else {
        debug!(edge = hit_start, probes = probes + 1, "live edge: found");
        return Ok(hit_start);
    };
    probes += 1;

    let mut start = ahead;
    let mut end = hit_position + span;
    while end - start > fragment_duration && probes < MAX_PROBES {
        probes += 1;
        let mid = start + (end - start) / 2.0;
        match probe.probe(mid).await {
            Some(found) => {
                start = mid;
                edge = found;
            }
            None => end = mid,
        }
    }
    debug!(edge, probes, "live edge: found");
    Ok(edge)
}

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;
    use rstest::rstest;

    use super::*;

    /// Fragments of `duration` seconds exist up to `edge`.
    struct Origin {
        edge: f64,
        duration: f64,
        probed: Mutex<Vec<f64>>,
    }

    impl Origin {
        fn new(edge: f64, duration: f64) -> Self {
            Self {
                edge,
                duration,
                probed: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl EdgeProbe for Origin {
        async fn probe(&self, time: f64) -> Option<f64> {
            self.probed.lock().push(time);
            if time > self.edge {
                return None;
            }
            if self.duration > 0.0 {
                Some((time / self.duration).floor() * self.duration)
            } else {
                Some(time)
            }
        }
    }

    fn window(start: f64, end: f64) -> TimeRange {
        TimeRange::new(start, end).expect("range")
    }

    #[tokio::test]
    async fn stops_when_next_fragment_is_missing() {
        let origin = Origin::new(111.0, 2.0);
        let edge = find_live_edge(&origin, window(100.0, 110.0), 2.0).await;
        assert_eq!(edge, Ok(110.0));
        assert_eq!(*origin.probed.lock(), [110.0, 112.0]);
    }

    #[rstest]
    #[case::edge_inside_bracket(117.0, 116.0)]
    #[case::edge_at_bracket_end(121.0, 118.0)]
    #[tokio::test]
    async fn bisects_towards_later_edge(#[case] real_edge: f64, #[case] expected: f64) {
        let origin = Origin::new(real_edge, 2.0);
        let edge = find_live_edge(&origin, window(100.0, 110.0), 2.0)
            .await
            .expect("edge");
        assert_eq!(edge, expected);
    }

    #[tokio::test]
    async fn narrows_below_unavailable_window_end() {
        let origin = Origin::new(104.5, 2.0);
        let edge = find_live_edge(&origin, window(100.0, 110.0), 2.0)
            .await
            .expect("edge");
        assert_eq!(edge, 104.0);
        assert_eq!(origin.probed.lock()[..2], [110.0, 105.0]);
    }

    #[tokio::test]
    async fn unknown_duration_accepts_first_hit() {
        let origin = Origin::new(200.0, 0.0);
        let edge = find_live_edge(&origin, window(100.0, 110.0), 0.0).await;
        assert_eq!(edge, Ok(110.0));
        assert_eq!(origin.probed.lock().len(), 1);
    }

    #[tokio::test]
    async fn nothing_available_is_an_error() {
        let origin = Origin::new(10.0, 2.0);
        let edge = find_live_edge(&origin, window(100.0, 110.0), 2.0).await;
        assert_eq!(edge, Err(StreamError::LiveEdgeNotFound));
    }
}
