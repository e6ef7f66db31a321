use std::sync::Arc;

use bytes::Bytes;
use rivulet_events::BufferEvent;
use tracing::{debug, info, trace, warn};

use super::{BufferController, ControllerState};
use crate::{
    append::{AppendChunk, ProgressiveAssembler, split_fragment},
    error::StreamError,
    loader::LoaderOutcome,
    types::{RequestKind, SegmentRequest},
};

impl BufferController {
    pub(super) fn on_outcomes(&mut self, outcomes: Vec<LoaderOutcome>) {
        for outcome in outcomes {
            self.on_outcome(outcome);
        }
    }

    fn on_outcome(&mut self, outcome: LoaderOutcome) {
        match outcome {
            LoaderOutcome::Started(request) => {
                if request.kind != RequestKind::Media || self.state == ControllerState::Waiting {
                    return;
                }
                self.state = ControllerState::Loading;
                // Fallbacks may load a quality whose init segment was never fetched.
                if let Some(representation) = self.adaptation.representation(request.quality).cloned() {
                    self.ensure_init(&representation);
                }
            }
            LoaderOutcome::Chunk { request, chunk } => self.on_chunk(&request, &chunk),
            LoaderOutcome::Loaded { request, body } => {
                self.on_loaded(&request, body);
                self.settle_loading();
            }
            LoaderOutcome::Aborted(request) | LoaderOutcome::Superseded(request) => {
                self.discard_partial(&request);
                self.settle_loading();
            }
            LoaderOutcome::Failed { request, error } => {
                warn!(
                    media = ?self.media,
                    start = request.start_time,
                    attempts = request.attempts(),
                    "controller: fragment could not be loaded"
                );
                self.discard_partial(&request);
                self.fail(StreamError::Load(error));
            }
            LoaderOutcome::StreamEnd(request) => self.on_stream_end(&request),
        }
    }

    /// Forget progressively received data of a request that will not complete.
    fn discard_partial(&mut self, request: &SegmentRequest) {
        let dropped = self.assemblers.remove(&request.id).is_some();
        self.append_queue.remove_request(request.id);
        if dropped {
            trace!(media = ?self.media, id = request.id, "controller: partial fragment discarded");
        }
    }

    /// Progressive increment: queue every box run completed so far.
    fn on_chunk(&mut self, request: &SegmentRequest, chunk: &Bytes) {
        if request.kind != RequestKind::Media {
            return;
        }
        let resolver = Arc::clone(&self.deps.resolver);
        let timescale = request.timescale;
        let assembler = self
            .assemblers
            .entry(request.id)
            .or_insert_with(ProgressiveAssembler::new);
        match assembler.push(chunk, |bytes| resolver.parse_fragment(bytes, timescale)) {
            Ok(spans) => {
                for (fragment_box, span) in spans {
                    self.append_queue.push_span(
                        request.id,
                        request.quality,
                        &fragment_box,
                        span,
                        self.cfg.append_enable_threshold,
                    );
                }
            }
            Err(e) => warn!(media = ?self.media, id = request.id, error = %e, "controller: unparsable chunk"),
        }
    }

    fn on_loaded(&mut self, request: &SegmentRequest, body: Bytes) {
        if request.is_init() {
            trace!(media = ?self.media, quality = request.quality, bytes = body.len(), "controller: init cached");
            let key = self.init_key(request.quality);
            self.init_cache.insert(key, body);
            return;
        }

        if let Some(assembler) = self.assemblers.remove(&request.id) {
            if let Some(rest) = assembler.finish() {
                self.append_queue.push(AppendChunk {
                    duration: request.duration,
                    spans: vec![rest],
                    complete: true,
                    ..AppendChunk::new(request.id, request.quality, request.start_time)
                });
            }
            self.append_queue.finish_request(request.id);
            return;
        }

        let boxes = self
            .deps
            .resolver
            .parse_fragment(&body, request.timescale)
            .unwrap_or_else(|e| {
                debug!(media = ?self.media, id = request.id, error = %e, "controller: no box index, appending whole");
                Vec::new()
            });
        let chunks = split_fragment(
            request.id,
            request.quality,
            &body,
            &boxes,
            request.start_time,
            request.duration,
            self.cfg.append_enable_threshold,
        );
        trace!(
            media = ?self.media,
            id = request.id,
            start = request.start_time,
            pieces = chunks.len(),
            "controller: fragment queued for append"
        );
        for chunk in chunks {
            self.append_queue.push(chunk);
        }
    }

    fn on_stream_end(&mut self, request: &SegmentRequest) {
        if request.period_index != self.period.index {
            debug!(media = ?self.media, period = request.period_index, "controller: stale end of stream ignored");
            return;
        }
        debug!(media = ?self.media, "controller: last fragment requested");
        self.completed = true;
        self.scheduling = false;
        self.deps.registry.remove_pending_unmarked(self.id);
    }

    /// Report completion once the last fragment has reached the sink.
    pub(super) fn check_completion(&mut self) {
        if !self.completed || self.completion_notified || !self.append_queue.is_empty() {
            return;
        }
        let in_flight = self
            .deps
            .registry
            .loading(self.id)
            .iter()
            .any(|r| r.kind == RequestKind::Media);
        if in_flight {
            return;
        }
        info!(media = ?self.media, "controller: stream completed");
        self.completion_notified = true;
        self.deps.bus.publish(BufferEvent::StreamCompleted { media: self.media });
    }
}
