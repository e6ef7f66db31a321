use rivulet_events::BufferEvent;
use tracing::{debug, info, warn};

use super::{BufferController, ControllerState, RANGE_TOLERANCE};
use crate::{metrics::RepresentationSwitch, types::Adaptation};

impl BufferController {
    /// Playback moved to `time`: restart scheduling from there.
    pub(super) fn seek(&mut self, time: f64) {
        self.reposition(time);
        self.deps.bus.publish(BufferEvent::Seeked {
            media: self.media,
            position: time,
        });
        self.validate();
    }

    /// Drop in-flight work and continue from the end of the buffered range
    /// around `time`.
    pub(super) fn reposition(&mut self, time: f64) {
        let aborted = self.deps.registry.abort(self.id);
        let pruned = self.deps.registry.remove_pending_unmarked(self.id);
        self.append_queue.clear();
        self.assemblers.clear();

        let current = self.sink.buffered_range(time, RANGE_TOLERANCE);
        if !self.cfg.fast_seek {
            let stale: Vec<_> = self
                .sink
                .all_ranges()
                .into_iter()
                .filter(|r| current.is_none_or(|c| c != *r))
                .collect();
            for range in stale {
                if let Err(e) = self.sink.remove(range.start, range.end) {
                    warn!(media = ?self.media, error = %e, "seek: could not remove stale range");
                }
            }
        }

        let resume = current.map_or(time, |r| r.end.max(time));
        info!(
            media = ?self.media,
            time,
            resume,
            aborted = aborted.len(),
            pruned,
            "seek: repositioned"
        );
        self.last_request = None;
        self.next_time = resume;
        self.completed = false;
        self.completion_notified = false;
        self.stalled = false;
        self.last_error = None;
        self.scheduling = true;
        self.state = ControllerState::Ready;
    }

    pub(super) fn switch_adaptation(&mut self, adaptation: Adaptation) {
        if adaptation.is_empty() {
            warn!(media = ?self.media, id = %adaptation.id, "switch: adaptation without representations ignored");
            return;
        }
        let from = self.abr.quality(self.media);
        let to = self
            .abr
            .rebase_quality(self.media, &self.adaptation, &adaptation);
        debug!(media = ?self.media, from = %self.adaptation.id, to = %adaptation.id, quality = to, "switch: adaptation");

        self.deps.registry.abort(self.id);
        self.deps.registry.remove_pending_unmarked(self.id);
        self.deps
            .registry
            .set_adaptation(self.id, adaptation.clone());
        self.adaptation = adaptation;
        self.init_cache.clear();
        self.applied_quality = None;
        self.append_queue.clear();
        self.assemblers.clear();
        self.deps.metrics.add_representation_switch(
            self.media,
            RepresentationSwitch {
                from,
                to,
                at: self.next_time,
            },
        );

        self.last_request = None;
        self.next_time = self.resume_time();
        self.validate();
    }
}
