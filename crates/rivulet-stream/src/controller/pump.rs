use tracing::{debug, trace, warn};

use super::{BufferController, RANGE_TOLERANCE};
use crate::{
    error::{SinkError, StreamError},
    traits::SinkAppend,
};

impl BufferController {
    /// Move at most one queued piece into the sink.
    pub(super) fn pump_appends(&mut self) {
        if self.sink.is_updating() {
            return;
        }
        let position = self.deps.clock.current_time();
        if self.trim_behind(position, self.cfg.buffer_to_keep_behind, self.cfg.append_enable_threshold) {
            return;
        }

        let Some(head) = self.append_queue.head() else {
            self.check_completion();
            return;
        };
        if !head.complete {
            return;
        }
        if head.start - position > self.cfg.max_buffer_ahead {
            trace!(media = ?self.media, start = head.start, position, "append: buffer full ahead, waiting");
            return;
        }

        let quality = head.quality;
        let init = if self.applied_quality == Some(quality) {
            None
        } else if let Some(init) = self.init_cache.get(&self.init_key(quality)) {
            Some(init.clone())
        } else if self.deps.registry.has_init_for(self.id, quality) {
            trace!(media = ?self.media, quality, "append: waiting for init segment");
            return;
        } else {
            let (request_id, start) = (head.request_id, head.start);
            warn!(media = ?self.media, quality, start, "append: no init segment for quality, discarding fragment");
            self.append_queue.remove_request(request_id);
            self.last_request = None;
            self.next_time = self.next_time.min(start);
            return;
        };
        let append = SinkAppend {
            bytes: head.concat(),
            init,
            start: head.start,
            duration: head.duration,
            quality,
        };

        match self.sink.append(append) {
            Ok(()) => {
                if let Some(chunk) = self.append_queue.pop_head() {
                    trace!(
                        media = ?self.media,
                        start = chunk.start,
                        duration = chunk.duration,
                        quality,
                        subdivision = chunk.subdivision,
                        "append: appended"
                    );
                }
                self.applied_quality = Some(quality);
                self.initial_playback = false;
                self.buffer_level = self.sink.buffered_length(position, RANGE_TOLERANCE);
                self.check_completion();
            }
            Err(SinkError::QuotaExceeded) => {
                warn!(media = ?self.media, position, "append: quota exceeded, trimming");
                if !self.trim_behind(position, self.cfg.buffer_to_keep_behind / 2.0, 0.0) {
                    debug!(media = ?self.media, "append: nothing left to trim, waiting for playback");
                }
            }
            Err(SinkError::Closed) => self.fail(StreamError::Sink(SinkError::Closed)),
            Err(SinkError::Rejected(reason)) => {
                warn!(media = ?self.media, %reason, "append: piece rejected, dropping");
                self.append_queue.pop_head();
                self.applied_quality = None;
            }
        }
    }

    /// Remove media older than `keep` seconds behind `position`, once more
    /// than `slack` seconds are removable. Returns true when a removal was issued.
    fn trim_behind(&mut self, position: f64, keep: f64, slack: f64) -> bool {
        let cutoff = position - keep;
        let Some(first) = self.sink.all_ranges().first().copied() else {
            return false;
        };
        if first.start + slack >= cutoff {
            return false;
        }
        match self.sink.remove(first.start, cutoff) {
            Ok(()) => {
                debug!(media = ?self.media, from = first.start, to = cutoff, "append: trimmed behind playhead");
                true
            }
            Err(e) => {
                warn!(media = ?self.media, error = %e, "append: trim failed");
                false
            }
        }
    }
}
