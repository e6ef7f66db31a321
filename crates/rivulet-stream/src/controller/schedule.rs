use rivulet_abr::{AbrContext, AbrDecision, AbrReason, SwitchDirection};
use rivulet_events::{AbrEvent, BufferEvent};
use tracing::{debug, info, trace, warn};

use super::{BufferController, ControllerState, RANGE_TOLERANCE};
use crate::{
    config::StreamConfig,
    error::{IndexError, StreamError},
    metrics::{BufferState, RepresentationSwitch},
    types::{PeriodInfo, Representation, RequestKind, SegmentRequest, now},
};

/// Minimum buffer the controller aims for.
pub(crate) fn target_min_buffer(cfg: &StreamConfig, period: &PeriodInfo) -> f64 {
    if let Some(forced) = cfg.forced_min_buffer_time {
        return forced;
    }
    if cfg.low_latency {
        return period.min_buffer_time;
    }
    let target = period.min_buffer_time.max(cfg.default_min_buffer_time);
    match period.duration {
        Some(duration) if duration > 0.0 => target.min(duration),
        _ => target,
    }
}

/// Seconds a media transfer may run before it is aborted.
pub(crate) fn abort_threshold(fragment_duration: f64, buffer_level: f64, quality: usize) -> f64 {
    let base = if buffer_level > fragment_duration * 3.0 {
        fragment_duration * 2.0
    } else {
        fragment_duration * 1.2
    };
    if quality > 0 { base * 2.0 } else { base }
}

impl BufferController {
    /// One validation pass.
    pub(super) fn validate(&mut self) {
        if self.state == ControllerState::Waiting || !self.scheduling {
            return;
        }
        let position = self.deps.clock.current_time();
        self.update_buffer_level(position);
        self.check_stall(position);

        if !self.scheduling_required() && !self.initial_playback && !self.stalled {
            debug!(media = ?self.media, position, "controller: paused, scheduling stopped");
            self.scheduling = false;
            return;
        }

        self.check_gap(position);

        match self.state {
            ControllerState::Ready => {
                self.state = ControllerState::Validating;
                self.schedule();
                if self.state == ControllerState::Validating {
                    self.state = ControllerState::Ready;
                }
            }
            ControllerState::Validating => self.state = ControllerState::Ready,
            ControllerState::Loading | ControllerState::Waiting => {}
        }
    }

    fn scheduling_required(&self) -> bool {
        !self.deps.clock.is_paused() || self.cfg.schedule_while_paused
    }

    fn update_buffer_level(&mut self, position: f64) {
        let level = self.sink.buffered_length(position, RANGE_TOLERANCE);
        self.buffer_level = level;
        self.deps.metrics.add_buffer_level(self.media, level);
        self.deps.bus.publish(BufferEvent::Level {
            media: self.media,
            seconds: level,
        });
    }

    fn check_stall(&mut self, position: f64) {
        let draining = self.completed && self.append_queue.is_empty();
        let insufficient = self.buffer_level < self.cfg.stall_threshold && !draining;

        if insufficient && !self.stalled && !self.initial_playback {
            warn!(media = ?self.media, position, level = self.buffer_level, "controller: buffer stalled");
            self.stalled = true;
            self.deps
                .metrics
                .add_buffer_state(self.media, BufferState::Stalled);
            self.deps.bus.publish(BufferEvent::Stalled {
                media: self.media,
                position,
            });
            self.drop_to_lowest();
        } else if self.stalled && !insufficient {
            info!(media = ?self.media, position, "controller: buffer recovered");
            self.stalled = false;
            self.deps
                .metrics
                .add_buffer_state(self.media, BufferState::Loaded);
            self.deps.bus.publish(BufferEvent::Resumed {
                media: self.media,
                position,
            });
        }
    }

    /// Jump the playhead over a small unbuffered gap.
    fn check_gap(&mut self, position: f64) {
        if self.buffer_level >= self.cfg.stall_threshold || self.initial_playback {
            return;
        }
        let next = self
            .sink
            .all_ranges()
            .into_iter()
            .find(|r| r.start > position && r.start - position <= self.cfg.max_gap_jump);
        match next {
            Some(range) => {
                debug!(media = ?self.media, from = position, to = range.start, "controller: skipping gap");
                self.deps.clock.seek_to(range.start);
                self.deps.bus.publish(BufferEvent::GapSkipped {
                    media: self.media,
                    from: position,
                    to: range.start,
                });
            }
            None if !self.completed => self.drop_to_lowest(),
            None => {}
        }
    }

    fn drop_to_lowest(&mut self) {
        let from = self.abr.quality(self.media);
        if self.abr.set_quality(self.media, 0) {
            let decision = AbrDecision {
                target_quality: 0,
                direction: SwitchDirection::SwitchDown,
                reason: AbrReason::EmergencyDrop,
            };
            self.on_quality_changed(decision, from);
        }
    }

    /// Choose the quality and issue the requests that keep the buffer filled.
    fn schedule(&mut self) {
        self.min_buffer_time = target_min_buffer(&self.cfg, &self.period);
        self.decide_quality(false);

        let representation = match self.representation() {
            Ok(r) => r,
            Err(e) => {
                self.fail(e);
                return;
            }
        };
        self.ensure_init(&representation);

        if self.last_request.as_ref().is_some_and(SegmentRequest::is_complete) {
            trace!(media = ?self.media, "controller: end of stream already queued");
        } else {
            let queued: f64 = self.append_queue.iter().map(|c| c.duration).sum();
            let ahead = self.buffer_level + queued;
            let target = (self.min_buffer_time + self.cfg.prefetch_threshold).min(self.cfg.max_buffer_ahead);
            let required =
                self.deps
                    .registry
                    .required_fragments(self.id, &representation, target - ahead, ahead);
            if required > 0 {
                trace!(media = ?self.media, required, ahead, target, "controller: requesting fragments");
            }
            for _ in 0..required {
                if !self.issue_next(&representation) {
                    break;
                }
            }
            if required == 0 && self.reached_period_end() {
                self.issue_next(&representation);
            }
        }

        let outcomes = self.deps.registry.execute_pending(self.id);
        self.on_outcomes(outcomes);
    }

    pub(super) fn ensure_init(&mut self, representation: &Representation) {
        let quality = representation.quality;
        if self.init_cache.contains_key(&self.init_key(quality))
            || self.deps.registry.has_init_for(self.id, quality)
        {
            return;
        }
        match self.deps.resolver.init_request(representation) {
            Ok(request) => {
                trace!(media = ?self.media, quality, "controller: requesting init segment");
                let request = request.with_period(self.period.index, self.period.start);
                self.deps.registry.enqueue(self.id, request);
            }
            Err(e) => self.on_index_error(e),
        }
    }

    /// Issue the request following the last one. Returns false when nothing
    /// more can be requested right now.
    fn issue_next(&mut self, representation: &Representation) -> bool {
        let result = match &self.last_request {
            Some(previous) => self.deps.resolver.next_request(representation, previous),
            None => self
                .deps
                .resolver
                .request_for_time(representation, self.next_time),
        };
        let request = match result {
            Ok(request) => request.with_period(self.period.index, self.period.start),
            Err(e) => {
                self.on_index_error(e);
                return false;
            }
        };

        if request.is_complete() {
            debug!(media = ?self.media, index = request.index, "controller: end of presentation reached");
            self.deps.registry.enqueue(self.id, request.clone());
            self.last_request = Some(request);
            return false;
        }

        if self.is_satisfied(&request) {
            trace!(media = ?self.media, start = request.start_time, "controller: fragment already requested");
        } else {
            self.deps.registry.enqueue(self.id, request.clone());
        }
        self.next_time = request.end_time();
        self.last_request = Some(request);
        true
    }

    /// Every fragment of a bounded period has been requested.
    fn reached_period_end(&self) -> bool {
        self.period.duration.is_some_and(|duration| {
            self.next_time >= self.period.start + duration - self.cfg.loader.dedup_tolerance
        })
    }

    /// Whether the fragment is pending, loading, queued, or executed and still buffered.
    fn is_satisfied(&self, request: &SegmentRequest) -> bool {
        let tolerance = self.cfg.loader.dedup_tolerance;
        let registry = &self.deps.registry;
        if registry.is_pending(self.id, request) || registry.is_loading(self.id, request) {
            return true;
        }
        if self
            .append_queue
            .contains(request.start_time, request.quality, tolerance)
        {
            return true;
        }
        let midpoint = request.start_time + request.duration / 2.0;
        registry.is_executed(self.id, request)
            && self.sink.buffered_range(midpoint, RANGE_TOLERANCE).is_some()
    }

    fn on_index_error(&mut self, err: IndexError) {
        match err {
            IndexError::BeforeAvailable { earliest } => {
                warn!(media = ?self.media, earliest, "controller: behind available content, seeking");
                self.deps.clock.seek_to(earliest);
                self.reposition(earliest);
                self.deps.bus.publish(BufferEvent::Seeked {
                    media: self.media,
                    position: earliest,
                });
            }
            IndexError::NotAvailable { time } => {
                trace!(media = ?self.media, time, "controller: fragment not yet available");
            }
            IndexError::Malformed(_) => self.fail(StreamError::Index(err)),
        }
    }

    /// Run the ABR engine and apply a switch.
    pub(super) fn decide_quality(&mut self, aborted: bool) {
        let sample = self
            .deps
            .metrics
            .latest_revised_http(self.media)
            .map(|s| s.throughput());
        let last_aborted = aborted
            || self
                .deps
                .registry
                .last_executed(self.id)
                .is_some_and(|r| r.aborted);
        let ctx = AbrContext {
            buffer_level: self.buffer_level,
            min_buffer_time: self.min_buffer_time,
            last_request_aborted: last_aborted,
        };
        let from = self.abr.quality(self.media);
        let decision = self
            .abr
            .decide(self.media, &self.adaptation, sample.as_ref(), &ctx);

        if !matches!(decision.reason, AbrReason::NoSample | AbrReason::AlreadyEvaluated)
            && let Some(bps) = self.abr.smoothed_bps(self.media)
        {
            self.deps.bus.publish(AbrEvent::Throughput {
                media: self.media,
                bits_per_second: bps,
            });
        }
        if decision.target_quality != from {
            self.on_quality_changed(decision, from);
        }
    }

    fn on_quality_changed(&mut self, decision: AbrDecision, from: usize) {
        let to = decision.target_quality;
        info!(media = ?self.media, from, to, reason = ?decision.reason, "controller: quality changed");
        let dropped = self.deps.registry.invalidate_quality(self.id, to);
        if dropped > 0 {
            // Continue from the first fragment that is neither buffered nor in flight.
            self.last_request = None;
            self.next_time = self.resume_time();
        }
        self.deps.metrics.add_representation_switch(
            self.media,
            RepresentationSwitch {
                from,
                to,
                at: self.next_time,
            },
        );
        self.deps.bus.publish(AbrEvent::QualityChanged {
            media: self.media,
            from,
            to,
            direction: decision.direction,
            reason: decision.reason,
        });
    }

    /// End of everything buffered, queued or in flight.
    pub(super) fn resume_time(&self) -> f64 {
        let position = self.deps.clock.current_time();
        let buffered = position + self.sink.buffered_length(position, RANGE_TOLERANCE);
        let queued = self.append_queue.queued_end().unwrap_or(buffered);
        let registry = &self.deps.registry;
        registry
            .pending(self.id)
            .iter()
            .chain(&registry.loading(self.id))
            .filter(|r| r.kind == RequestKind::Media)
            .map(SegmentRequest::end_time)
            .fold(buffered.max(queued), f64::max)
    }

    /// Abort media transfers that take too long and replace them.
    pub(super) fn check_loading_requests(&mut self) {
        if self.state == ControllerState::Waiting {
            return;
        }
        let at = now();
        let slow: Vec<SegmentRequest> = self
            .deps
            .registry
            .loading(self.id)
            .into_iter()
            .filter(|r| r.kind == RequestKind::Media && r.duration > 0.0)
            .filter(|r| {
                let threshold = abort_threshold(r.duration, self.buffer_level, r.quality);
                r.timing.elapsed_at(at).is_some_and(|e| e > threshold)
            })
            .collect();

        for request in slow {
            let Some(aborted) = self
                .deps
                .registry
                .abort_request_for_time(self.id, request.start_time)
            else {
                continue;
            };
            warn!(
                media = ?self.media,
                id = aborted.id,
                start = aborted.start_time,
                quality = aborted.quality,
                "controller: fragment too slow, aborted"
            );
            self.assemblers.remove(&aborted.id);
            self.append_queue.remove_request(aborted.id);
            self.decide_quality(true);
            self.replace_aborted(&aborted);
        }

        let outcomes = self.deps.registry.execute_pending(self.id);
        self.on_outcomes(outcomes);
        self.settle_loading();
    }

    fn replace_aborted(&mut self, aborted: &SegmentRequest) {
        let representation = match self.representation() {
            Ok(r) => r,
            Err(e) => {
                self.fail(e);
                return;
            }
        };
        match self
            .deps
            .resolver
            .request_for_time(&representation, aborted.start_time)
        {
            Ok(mut replacement) if !replacement.is_complete() => {
                replacement.keep = aborted.keep;
                let replacement = replacement.with_period(self.period.index, self.period.start);
                debug!(
                    media = ?self.media,
                    start = replacement.start_time,
                    quality = replacement.quality,
                    "controller: replacing aborted fragment"
                );
                self.deps.registry.enqueue(self.id, replacement);
            }
            Ok(_) => {}
            Err(e) => self.on_index_error(e),
        }
    }

    /// Leave `Loading` once no media transfer is in flight.
    pub(super) fn settle_loading(&mut self) {
        if self.state != ControllerState::Loading {
            return;
        }
        let loading_media = self
            .deps
            .registry
            .loading(self.id)
            .iter()
            .any(|r| r.kind == RequestKind::Media);
        if !loading_media {
            self.state = ControllerState::Ready;
        }
    }
}

#[cfg(test)]
mod tests {
    use rivulet_core::TimeRange;
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(2.0, 10.0, 0, 4.0)]
    #[case(2.0, 6.0, 0, 2.4)]
    #[case(2.0, 10.0, 1, 8.0)]
    #[case(2.0, 1.0, 3, 4.8)]
    fn abort_threshold_scales_with_cushion_and_quality(
        #[case] duration: f64,
        #[case] level: f64,
        #[case] quality: usize,
        #[case] expected: f64,
    ) {
        let got = abort_threshold(duration, level, quality);
        assert!((got - expected).abs() < 1e-9, "got {got}");
    }

    #[test]
    fn forced_min_buffer_wins() {
        let cfg = StreamConfig::default().with_forced_min_buffer_time(3.0);
        let period = PeriodInfo::on_demand(100.0, 20.0);
        assert!((target_min_buffer(&cfg, &period) - 3.0).abs() < f64::EPSILON);
    }

    #[rstest]
    #[case(Some(100.0), 2.0, 8.0)]
    #[case(Some(100.0), 12.0, 12.0)]
    #[case(Some(5.0), 2.0, 5.0)]
    #[case(None, 2.0, 8.0)]
    fn min_buffer_is_clamped(
        #[case] duration: Option<f64>,
        #[case] declared: f64,
        #[case] expected: f64,
    ) {
        let period = PeriodInfo {
            duration,
            ..PeriodInfo::on_demand(0.0, declared)
        };
        let got = target_min_buffer(&StreamConfig::default(), &period);
        assert!((got - expected).abs() < f64::EPSILON, "got {got}");
    }

    #[test]
    fn low_latency_uses_declared_min_buffer() {
        let period = PeriodInfo::live(TimeRange { start: 0.0, end: 30.0 }, 1.5);
        let got = target_min_buffer(&StreamConfig::low_latency(), &period);
        assert!((got - 1.5).abs() < f64::EPSILON);
    }
}
