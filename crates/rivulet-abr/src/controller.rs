use rivulet_core::{MediaType, PerMedia};
use tracing::debug;

use crate::{
    AbrContext, AbrMode, AbrOptions, SwitchDirection, ThroughputHistory, ThroughputSample,
    VariantSource,
};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AbrReason {
    /// No completed request to evaluate yet.
    NoSample,
    /// The latest sample was already evaluated by a previous decision.
    AlreadyEvaluated,
    /// Sample without usable media duration or timing.
    InvalidSample,
    /// Buffer below one fragment while downloads fall behind playback.
    EmergencyDrop,
    /// Measured throughput cannot sustain the current quality.
    InsufficientBandwidth,
    /// The previous request was aborted for taking too long.
    AbortedRequest,
    /// Recent downloads consistently took longer than their media duration.
    NegativeMargin,
    /// Buffer too thin to trust a noisy throughput window.
    ThinBuffer,
    UpSwitch,
    AlreadyOptimal,
    /// Quality pinned by [`AbrMode::Manual`].
    Manual,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct AbrDecision {
    pub target_quality: usize,
    pub direction: SwitchDirection,
    pub reason: AbrReason,
}

impl AbrDecision {
    fn no_change(current: usize, reason: AbrReason) -> Self {
        Self {
            target_quality: current,
            direction: SwitchDirection::NoChange,
            reason,
        }
    }

    pub fn changed(&self) -> bool {
        self.direction != SwitchDirection::NoChange
    }
}

#[derive(Clone, Debug)]
struct QualityState {
    quality: usize,
    confidence: SwitchDirection,
    max_quality: usize,
    last_evaluated: Option<u64>,
    history: ThroughputHistory,
}

/// Bitrate decision engine holding one quality state per media type.
pub struct AbrController {
    cfg: AbrOptions,
    states: PerMedia<QualityState>,
}

impl AbrController {
    #[must_use]
    pub fn new(cfg: AbrOptions) -> Self {
        let initial = cfg.initial_quality();
        let states = PerMedia::from_fn(|_| QualityState {
            quality: initial,
            confidence: SwitchDirection::NoChange,
            max_quality: initial,
            last_evaluated: None,
            history: ThroughputHistory::new(cfg.history_len, cfg.ewma_decay),
        });
        Self { cfg, states }
    }

    pub fn options(&self) -> &AbrOptions {
        &self.cfg
    }

    /// Current quality index for `media`.
    pub fn quality(&self, media: MediaType) -> usize {
        self.states.get(media).quality
    }

    /// Direction of the last decision for `media`.
    pub fn confidence(&self, media: MediaType) -> SwitchDirection {
        self.states.get(media).confidence
    }

    /// Inclusive upper bound on the quality index for `media`.
    pub fn max_quality(&self, media: MediaType) -> usize {
        self.states.get(media).max_quality
    }

    pub fn smoothed_bps(&self, media: MediaType) -> Option<f64> {
        self.states.get(media).history.smoothed_bps()
    }

    /// Derive the quality upper bound from the number of available tiers.
    pub fn set_variant_count(&mut self, media: MediaType, count: usize) {
        let state = self.states.get_mut(media);
        state.max_quality = count.saturating_sub(1);
        state.quality = state.quality.min(state.max_quality);
    }

    /// Force a quality (e.g. drop to the lowest tier on a stall).
    ///
    /// Returns true if the quality changed.
    pub fn set_quality(&mut self, media: MediaType, quality: usize) -> bool {
        let state = self.states.get_mut(media);
        let quality = quality.min(state.max_quality);
        let changed = quality != state.quality;
        state.confidence = match quality.cmp(&state.quality) {
            std::cmp::Ordering::Less => SwitchDirection::SwitchDown,
            std::cmp::Ordering::Greater => SwitchDirection::SwitchUp,
            std::cmp::Ordering::Equal => SwitchDirection::NoChange,
        };
        state.quality = quality;
        changed
    }

    /// Forget throughput history and return to the initial quality.
    pub fn reset(&mut self, media: MediaType) {
        let initial = self.cfg.initial_quality();
        let state = self.states.get_mut(media);
        state.quality = initial.min(state.max_quality);
        state.confidence = SwitchDirection::NoChange;
        state.last_evaluated = None;
        state.history.reset();
    }

    /// Recommend the quality for the next fragment of `media`.
    ///
    /// `sample` is the most recent bandwidth-revised download of this media
    /// type. The chosen quality and direction are persisted as the new state.
    #[allow(
        clippy::cognitive_complexity,
        reason = "decision tree mirrors the download-ratio rule"
    )]
    pub fn decide<V: VariantSource + ?Sized>(
        &mut self,
        media: MediaType,
        variants: &V,
        sample: Option<&ThroughputSample>,
        ctx: &AbrContext,
    ) -> AbrDecision {
        let max_quality = variants.variant_count().saturating_sub(1);
        let safety = self.cfg.safety_factor;
        let aggressiveness = self.cfg.low_buffer_aggressiveness;
        let mode = self.cfg.mode;

        let state = self.states.get_mut(media);
        state.max_quality = max_quality;
        let current = state.quality.min(max_quality);

        if let AbrMode::Manual(idx) = mode {
            let target = idx.min(max_quality);
            let direction = match target.cmp(&current) {
                std::cmp::Ordering::Less => SwitchDirection::SwitchDown,
                std::cmp::Ordering::Greater => SwitchDirection::SwitchUp,
                std::cmp::Ordering::Equal => SwitchDirection::NoChange,
            };
            return Self::commit(state, target, direction, AbrReason::Manual);
        }

        let Some(sample) = sample else {
            return Self::commit(state, current, SwitchDirection::NoChange, AbrReason::NoSample);
        };
        if state.last_evaluated == Some(sample.request_id) {
            return AbrDecision::no_change(current, AbrReason::AlreadyEvaluated);
        }
        state.last_evaluated = Some(sample.request_id);

        let media_duration = sample.media_duration;
        // NaN fails the comparison as well
        if !(media_duration > 0.0) {
            return Self::commit(
                state,
                current,
                SwitchDirection::NoChange,
                AbrReason::InvalidSample,
            );
        }

        let total_time = sample.total_secs();
        if total_time <= 0.0 {
            return Self::commit(
                state,
                current,
                SwitchDirection::NoChange,
                AbrReason::InvalidSample,
            );
        }

        let timed_out = sample.is_timeout();
        #[expect(clippy::cast_precision_loss)]
        let instant_bps = 8.0 * sample.bytes as f64 / total_time * safety;
        state.history.push_rate(instant_bps);
        state.history.push_margin(if timed_out {
            -total_time
        } else {
            media_duration - total_time
        });

        let raw_ratio = if timed_out {
            0.1
        } else {
            media_duration / total_time
        };
        let ratio = raw_ratio * safety;
        if ratio.is_nan() || instant_bps.is_nan() {
            return Self::commit(
                state,
                current,
                SwitchDirection::NoChange,
                AbrReason::InvalidSample,
            );
        }

        let r = if ctx.buffer_level < 1.5 * media_duration || ratio < 1.0 {
            aggressiveness
        } else {
            1.0
        };
        let bandwidth = |idx: usize| -> f64 {
            #[expect(clippy::cast_precision_loss)]
            let bw = variants.variant_bandwidth(idx).unwrap_or(0) as f64;
            bw
        };
        let current_bw = bandwidth(current);

        debug!(
            ?media,
            current,
            instant_bps,
            ratio,
            r,
            buffer_level = ctx.buffer_level,
            media_duration,
            total_time,
            "abr: evaluating"
        );

        let (target, direction, reason) = if ratio < 1.0 {
            if ctx.buffer_level < media_duration {
                (0, SwitchDirection::SwitchDown, AbrReason::EmergencyDrop)
            } else if instant_bps < current_bw * r {
                let target = (0..current)
                    .rev()
                    .find(|&idx| bandwidth(idx) * r <= instant_bps)
                    .unwrap_or(0);
                (
                    target,
                    SwitchDirection::SwitchDown,
                    AbrReason::InsufficientBandwidth,
                )
            } else if ctx.last_request_aborted {
                (
                    current.saturating_sub(2),
                    SwitchDirection::SwitchDown,
                    AbrReason::AbortedRequest,
                )
            } else if state.history.margin_sum() < 0.0 && ctx.buffer_level < 2.0 * media_duration
            {
                (
                    current.saturating_sub(1),
                    SwitchDirection::SwitchDown,
                    AbrReason::NegativeMargin,
                )
            } else {
                (current, SwitchDirection::NoChange, AbrReason::AlreadyOptimal)
            }
        } else if ctx.buffer_level < ctx.min_buffer_time
            && state.history.rates().any(|bps| bps < current_bw * r)
        {
            (current, SwitchDirection::NoChange, AbrReason::ThinBuffer)
        } else {
            match (current + 1..=max_quality).find(|&idx| bandwidth(idx) * r > instant_bps) {
                Some(idx) if idx - 1 == current => {
                    (current, SwitchDirection::NoChange, AbrReason::AlreadyOptimal)
                }
                Some(idx) => (idx - 1, SwitchDirection::SwitchUp, AbrReason::UpSwitch),
                None if max_quality == current => {
                    (current, SwitchDirection::NoChange, AbrReason::AlreadyOptimal)
                }
                None => (max_quality, SwitchDirection::SwitchUp, AbrReason::UpSwitch),
            }
        };

        let decision = Self::commit(state, target.min(max_quality), direction, reason);
        if decision.changed() {
            debug!(
                ?media,
                from = current,
                to = decision.target_quality,
                reason = ?decision.reason,
                "abr: quality switch"
            );
        }
        decision
    }

    /// Pick a quality in `to` that keeps continuity with the quality used in `from`.
    ///
    /// Used when the adaptation of a media type is swapped (e.g. a language
    /// change). Chooses the highest-bandwidth tier not exceeding
    /// `max(smoothed throughput, current bandwidth * headroom)`.
    pub fn rebase_quality<F, T>(&mut self, media: MediaType, from: &F, to: &T) -> usize
    where
        F: VariantSource + ?Sized,
        T: VariantSource + ?Sized,
    {
        let headroom = self.cfg.rebase_headroom;
        let state = self.states.get_mut(media);

        #[expect(clippy::cast_precision_loss)]
        let current_bw = from.variant_bandwidth(state.quality).unwrap_or(0) as f64;
        let ceiling = state
            .history
            .smoothed_bps()
            .unwrap_or(0.0)
            .max(current_bw * headroom);

        #[expect(clippy::cast_precision_loss)]
        let target = (0..to.variant_count())
            .filter_map(|idx| to.variant_bandwidth(idx).map(|bw| (idx, bw)))
            .filter(|(_, bw)| *bw as f64 <= ceiling)
            .max_by_key(|(_, bw)| *bw)
            .map_or(0, |(idx, _)| idx);

        debug!(
            ?media,
            from = state.quality,
            to = target,
            ceiling,
            "abr: rebased quality onto new adaptation"
        );

        state.max_quality = to.variant_count().saturating_sub(1);
        state.quality = target;
        state.confidence = SwitchDirection::NoChange;
        target
    }

    fn commit(
        state: &mut QualityState,
        target: usize,
        direction: SwitchDirection,
        reason: AbrReason,
    ) -> AbrDecision {
        state.quality = target;
        state.confidence = direction;
        AbrDecision {
            target_quality: target,
            direction,
            reason,
        }
    }
}
