//! Per media type fragment queueing and transfer execution.

mod revision;
mod transport;

use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
};

use bytes::Bytes;
use rivulet_core::MediaType;
use rivulet_events::{EventBus, LoaderEvent};
use rivulet_net::{Net, NetError, TimeoutNet};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

pub use self::transport::TransportEvent;
use self::{
    revision::revised_bytes,
    transport::{FetchJob, run_fetch},
};
use crate::{
    config::{LoaderOptions, TransferMode},
    error::LoadError,
    metrics::HttpSample,
    traits::{IndexResolver, MetricsSink},
    types::{Adaptation, Representation, RequestId, RequestKind, SegmentRequest, now},
};

const NOT_FOUND: u16 = 404;

/// Collaborators handed to a [`FragmentLoader`].
#[derive(Clone)]
pub struct LoaderContext {
    pub media: MediaType,
    pub net: Arc<dyn Net>,
    pub resolver: Arc<dyn IndexResolver>,
    pub metrics: Arc<dyn MetricsSink>,
    pub bus: EventBus,
    pub options: LoaderOptions,
    /// Receives the progress of every spawned transfer.
    pub events: mpsc::UnboundedSender<TransportEvent>,
    pub cancel: CancellationToken,
}

/// Result of one [`FragmentLoader::execute_next`] call.
#[derive(Debug)]
pub enum ExecuteOutcome {
    /// Nothing pending, concurrency limit reached, or loading is restricted.
    Idle,
    Started(RequestId),
    /// Outcome that did not need a transfer (end-of-stream sentinel, unusable URL).
    Ready(LoaderOutcome),
}

/// What the buffer controller has to react to.
#[derive(Debug)]
pub enum LoaderOutcome {
    Started(SegmentRequest),
    /// Progressive mode increment.
    Chunk {
        request: SegmentRequest,
        chunk: Bytes,
    },
    Loaded {
        request: SegmentRequest,
        body: Bytes,
    },
    Aborted(SegmentRequest),
    /// Data already delivered for this request is void: its transfer
    /// restarts from the first byte, or another request replaced it.
    Superseded(SegmentRequest),
    Failed {
        request: SegmentRequest,
        error: LoadError,
    },
    StreamEnd(SegmentRequest),
}

/// Fragment load scheduler for one media type.
///
/// Requests move `pending -> loading -> executed`. Transfers run as spawned
/// tasks that report back through [`TransportEvent`]s, which the owner feeds
/// into [`FragmentLoader::handle_event`].
pub struct FragmentLoader {
    media: MediaType,
    net: Arc<dyn Net>,
    resolver: Arc<dyn IndexResolver>,
    metrics: Arc<dyn MetricsSink>,
    bus: EventBus,
    options: LoaderOptions,
    events: mpsc::UnboundedSender<TransportEvent>,
    cancel: CancellationToken,
    adaptation: Option<Adaptation>,
    pending: Vec<SegmentRequest>,
    loading: Vec<SegmentRequest>,
    executed: VecDeque<SegmentRequest>,
    handles: HashMap<RequestId, CancellationToken>,
    restrict_multi_load: bool,
}

impl FragmentLoader {
    pub fn new(ctx: LoaderContext) -> Self {
        let net: Arc<dyn Net> = Arc::new(TimeoutNet::new(ctx.net, ctx.options.request_timeout));
        Self {
            media: ctx.media,
            net,
            resolver: ctx.resolver,
            metrics: ctx.metrics,
            bus: ctx.bus,
            options: ctx.options,
            events: ctx.events,
            cancel: ctx.cancel.child_token(),
            adaptation: None,
            pending: Vec::new(),
            loading: Vec::new(),
            executed: VecDeque::new(),
            handles: HashMap::new(),
            restrict_multi_load: false,
        }
    }

    pub fn media(&self) -> MediaType {
        self.media
    }

    /// Representations used when falling back to another quality.
    pub fn set_adaptation(&mut self, adaptation: Adaptation) {
        self.adaptation = Some(adaptation);
    }

    pub fn pending(&self) -> &[SegmentRequest] {
        &self.pending
    }

    pub fn loading(&self) -> &[SegmentRequest] {
        &self.loading
    }

    pub fn executed(&self) -> impl Iterator<Item = &SegmentRequest> {
        self.executed.iter()
    }

    pub fn is_restricted(&self) -> bool {
        self.restrict_multi_load
    }

    /// Add a request to the pending queue, kept ordered by `(period start, index)`.
    pub fn enqueue(&mut self, mut request: SegmentRequest) {
        request.timing.enqueued = Some(now());
        trace!(
            media = ?self.media,
            id = request.id,
            start = request.start_time,
            quality = request.quality,
            "loader: enqueued"
        );
        self.pending.push(request);
        self.pending.sort_by(SegmentRequest::queue_order);
    }

    /// Dequeue the pending head and start its transfer, if allowed.
    pub fn execute_next(&mut self) -> ExecuteOutcome {
        self.update_saturation();
        if self.pending.is_empty() || self.loading.len() >= self.options.concurrency_limit {
            return ExecuteOutcome::Idle;
        }
        if self.restrict_multi_load && !self.loading.is_empty() {
            trace!(media = ?self.media, "loader: multi-load restricted");
            return ExecuteOutcome::Idle;
        }

        let request = self.pending.remove(0);
        if request.is_complete() {
            debug!(media = ?self.media, index = request.index, "loader: reached end of stream");
            return ExecuteOutcome::Ready(LoaderOutcome::StreamEnd(request));
        }
        self.start(request)
    }

    /// Run [`execute_next`](Self::execute_next) until it goes idle.
    pub fn execute_pending(&mut self) -> Vec<LoaderOutcome> {
        let mut out = Vec::new();
        loop {
            match self.execute_next() {
                ExecuteOutcome::Idle => return out,
                ExecuteOutcome::Started(_) => {}
                ExecuteOutcome::Ready(outcome) => out.push(outcome),
            }
        }
    }

    fn start(&mut self, mut request: SegmentRequest) -> ExecuteOutcome {
        let url = match request.resolve_url() {
            Ok(url) => url,
            Err(e) => {
                warn!(media = ?self.media, url = %request.url, error = %e, "loader: unusable fragment URL");
                // Nothing was delivered yet, so only the terminal failure matters.
                return match self.fall_back(request, NetError::http(e.to_string())).pop() {
                    Some(outcome @ LoaderOutcome::Failed { .. }) => ExecuteOutcome::Ready(outcome),
                    _ => self.execute_next(),
                };
            }
        };

        let token = self.cancel.child_token();
        let id = request.id;
        request.loading = true;
        request.timing.started = Some(now());
        self.handles.insert(id, token.clone());
        debug!(
            media = ?self.media,
            id,
            url = %url,
            quality = request.quality,
            start = request.start_time,
            loading = self.loading.len() + 1,
            "loader: starting transfer"
        );
        // Init segments are parsed whole.
        let mode = if request.is_init() {
            TransferMode::Buffered
        } else {
            self.options.transfer_mode
        };
        let job = FetchJob {
            id,
            url,
            range: request.range,
            mode,
            retry: self.options.retry_policy.clone(),
        };
        self.loading.push(request);
        tokio::spawn(run_fetch(
            Arc::clone(&self.net),
            job,
            token,
            self.events.clone(),
        ));
        ExecuteOutcome::Started(id)
    }

    /// Apply a transfer report. Reports for requests that are no longer
    /// loading (aborted or already finished) are ignored.
    pub fn handle_event(&mut self, event: TransportEvent) -> Vec<LoaderOutcome> {
        match event {
            TransportEvent::Started { id, at } => {
                let Some(request) = self.loading.iter_mut().find(|r| r.id == id) else {
                    return Vec::new();
                };
                request.timing.started = Some(at);
                self.bus.publish(LoaderEvent::Started {
                    media: self.media,
                    request_id: id,
                    quality: request.quality,
                    start_time: request.start_time,
                });
                vec![LoaderOutcome::Started(request.clone())]
            }
            TransportEvent::Progress {
                id,
                chunk,
                loaded,
                at,
            } => {
                let progressive = self.options.transfer_mode == TransferMode::Progressive;
                let Some(request) = self.loading.iter_mut().find(|r| r.id == id) else {
                    return Vec::new();
                };
                request.timing.first_byte.get_or_insert(at);
                request.bytes_loaded = loaded;
                if progressive && request.kind == RequestKind::Media {
                    vec![LoaderOutcome::Chunk {
                        request: request.clone(),
                        chunk,
                    }]
                } else {
                    Vec::new()
                }
            }
            TransportEvent::Restarted { id, attempt } => {
                let Some(request) = self.loading.iter_mut().find(|r| r.id == id) else {
                    return Vec::new();
                };
                debug!(media = ?self.media, id, attempt, url = %request.url, "loader: transfer restarted");
                request.bytes_loaded = 0;
                request.timing.first_byte = None;
                vec![LoaderOutcome::Superseded(request.clone())]
            }
            TransportEvent::Completed { id, body, at } => {
                let Some(mut request) = self.take_loading(id) else {
                    return Vec::new();
                };
                request.timing.finished = Some(at);
                if !body.is_empty() {
                    request.bytes_loaded = body.len() as u64;
                }
                request.status = Some(200);
                self.on_completed(&request);
                let mut out = vec![LoaderOutcome::Loaded { request, body }];
                out.extend(self.execute_pending());
                out
            }
            TransportEvent::Failed { id, error, at } => {
                let Some(mut request) = self.take_loading(id) else {
                    return Vec::new();
                };
                request.timing.finished = Some(at);
                request.status = error.status_code();
                if error.is_timeout() && request.kind == RequestKind::Media {
                    self.record_metrics(&request);
                }
                let mut out = self.fall_back(request, error);
                out.extend(self.execute_pending());
                out
            }
            TransportEvent::Aborted { id } => {
                let Some(request) = self.take_loading(id) else {
                    return Vec::new();
                };
                let request = self.retire_aborted(request);
                let mut out = vec![LoaderOutcome::Aborted(request)];
                out.extend(self.execute_pending());
                out
            }
        }
    }

    fn take_loading(&mut self, id: RequestId) -> Option<SegmentRequest> {
        self.handles.remove(&id);
        let pos = self.loading.iter().position(|r| r.id == id)?;
        let mut request = self.loading.remove(pos);
        request.loading = false;
        Some(request)
    }

    fn on_completed(&mut self, request: &SegmentRequest) {
        let load_secs = request.timing.load_secs().unwrap_or(f64::NAN);
        if request.kind == RequestKind::Media && load_secs <= request.duration {
            if self.restrict_multi_load {
                debug!(media = ?self.media, "loader: multi-load restriction lifted");
            }
            self.restrict_multi_load = false;
        }

        if request.kind == RequestKind::Media {
            self.record_metrics(request);
        }
        self.bus.publish(LoaderEvent::Loaded {
            media: self.media,
            request_id: request.id,
            quality: request.quality,
            start_time: request.start_time,
            bytes: request.bytes_loaded,
        });
        debug!(
            media = ?self.media,
            id = request.id,
            quality = request.quality,
            start = request.start_time,
            bytes = request.bytes_loaded,
            elapsed_ms = (load_secs * 1000.0).round(),
            "loader: fragment loaded"
        );
        self.push_executed(request.clone());
    }

    fn record_metrics(&self, request: &SegmentRequest) {
        let (Some(start), Some(finish)) = (request.timing.started, request.timing.finished) else {
            return;
        };
        let raw = HttpSample {
            request_id: request.id,
            quality: request.quality,
            bytes: request.bytes_loaded,
            request_start: start,
            first_byte: request.timing.first_byte,
            finish,
            media_duration: request.duration,
            status: request.status,
        };
        self.metrics.add_http_request(self.media, raw);

        let previous = self
            .executed
            .iter()
            .rev()
            .find(|r| r.kind == RequestKind::Media && r.status == Some(200));
        let next = self
            .loading
            .iter()
            .filter(|r| r.kind == RequestKind::Media)
            .min_by_key(|r| r.timing.started);
        let bytes = revised_bytes(request, previous, next);
        trace!(media = ?self.media, raw = request.bytes_loaded, revised = bytes, "loader: bandwidth revised");
        self.metrics
            .add_revised_http(self.media, HttpSample { bytes, ..raw });
    }

    /// Record a failed `(origin, quality)` combination and queue the next
    /// untried one. Returns [`LoaderOutcome::Superseded`] for the failed
    /// request when a substitute was queued, the terminal failure otherwise.
    fn fall_back(&mut self, mut request: SegmentRequest, error: NetError) -> Vec<LoaderOutcome> {
        request
            .failed
            .insert((request.origin_index, request.quality), error.status_code());
        warn!(
            media = ?self.media,
            id = request.id,
            origin = request.origin_index,
            quality = request.quality,
            start = request.start_time,
            %error,
            "loader: fragment failed"
        );

        if let Some(substitute) = self.find_substitute(&request) {
            info!(
                media = ?self.media,
                start = request.start_time,
                origin = substitute.origin_index,
                quality = substitute.quality,
                "loader: falling back"
            );
            self.push_executed(request.clone());
            self.enqueue(substitute);
            return vec![LoaderOutcome::Superseded(request)];
        }

        let attempts = request.attempts();
        let error = if request.failed.values().all(|s| *s == Some(NOT_FOUND)) {
            LoadError::NotFound {
                time: request.start_time,
            }
        } else {
            LoadError::Exhausted {
                start: request.start_time,
                attempts,
            }
        };
        warn!(media = ?self.media, start = request.start_time, attempts, "loader: all sources exhausted");
        self.bus.publish(LoaderEvent::Exhausted {
            media: self.media,
            start_time: request.start_time,
            attempts: u32::try_from(attempts).unwrap_or(u32::MAX),
        });
        self.push_executed(request.clone());
        vec![LoaderOutcome::Failed { request, error }]
    }

    fn find_substitute(&self, failed: &SegmentRequest) -> Option<SegmentRequest> {
        let origin_count = failed.origins.len().max(1);
        let quality_count = match (&self.adaptation, failed.kind) {
            (Some(adaptation), RequestKind::Media) => adaptation.len(),
            _ => 0,
        };

        for origin in failed.origin_index..origin_count {
            for quality in fallback_order(failed.quality, quality_count) {
                if failed.has_failed(origin, quality) {
                    continue;
                }
                let candidate = if quality == failed.quality {
                    Some(failed.renewed())
                } else {
                    self.request_at_quality(failed, quality)
                };
                let Some(mut candidate) = candidate else {
                    continue;
                };
                if origin >= candidate.origins.len().max(1) {
                    continue;
                }
                candidate.substitute_for(failed, origin);
                return Some(candidate);
            }
        }
        None
    }

    fn request_at_quality(&self, failed: &SegmentRequest, quality: usize) -> Option<SegmentRequest> {
        let repr = self.adaptation.as_ref()?.representation(quality)?;
        match self.resolver.request_for_time(repr, failed.start_time) {
            Ok(request) if !request.is_complete() => Some(request),
            Ok(_) => None,
            Err(e) => {
                debug!(media = ?self.media, quality, error = %e, "loader: no fallback fragment");
                None
            }
        }
    }

    fn retire_aborted(&mut self, mut request: SegmentRequest) -> SegmentRequest {
        request.aborted = true;
        request.canceled = true;
        request.loading = false;
        self.bus.publish(LoaderEvent::Aborted {
            media: self.media,
            request_id: request.id,
            start_time: request.start_time,
        });
        self.push_executed(request.clone());
        request
    }

    fn push_executed(&mut self, request: SegmentRequest) {
        self.executed.push_back(request);
        while self.executed.len() > self.options.history_cap {
            self.executed.pop_front();
        }
    }

    /// Raise the multi-load restriction when a non-lowest quality transfer
    /// has already taken longer than the media it carries.
    fn update_saturation(&mut self) {
        if self.restrict_multi_load {
            return;
        }
        let at = now();
        let saturated = self.loading.iter().any(|r| {
            r.kind == RequestKind::Media
                && r.quality > 0
                && r.duration > 0.0
                && r.timing.elapsed_at(at).is_some_and(|e| e > r.duration)
        });
        if saturated {
            debug!(media = ?self.media, "loader: restricting multi-load");
            self.restrict_multi_load = true;
        }
    }

    /// Cancel every transfer in flight.
    pub fn abort(&mut self) -> Vec<SegmentRequest> {
        for (_, token) in self.handles.drain() {
            token.cancel();
        }
        self.restrict_multi_load = false;
        let loading = std::mem::take(&mut self.loading);
        if !loading.is_empty() {
            debug!(media = ?self.media, count = loading.len(), "loader: aborting all transfers");
        }
        loading
            .into_iter()
            .map(|request| self.retire_aborted(request))
            .collect()
    }

    /// Cancel the transfer of the fragment starting at `time`.
    pub fn abort_request_for_time(&mut self, time: f64) -> Option<SegmentRequest> {
        let tolerance = self.options.dedup_tolerance;
        let id = self
            .loading
            .iter()
            .find(|r| r.kind == RequestKind::Media && (r.start_time - time).abs() < tolerance)?
            .id;
        if let Some(token) = self.handles.get(&id) {
            token.cancel();
        }
        let request = self.take_loading(id)?;
        debug!(media = ?self.media, id, start = time, "loader: aborting transfer");
        Some(self.retire_aborted(request))
    }

    pub fn is_pending(&self, candidate: &SegmentRequest) -> bool {
        let tol = self.options.dedup_tolerance;
        self.pending.iter().any(|r| r.is_equivalent(candidate, tol))
    }

    pub fn is_loading(&self, candidate: &SegmentRequest) -> bool {
        let tol = self.options.dedup_tolerance;
        self.loading.iter().any(|r| r.is_equivalent(candidate, tol))
    }

    /// Whether an equivalent request already completed successfully.
    pub fn is_executed(&self, candidate: &SegmentRequest) -> bool {
        let tol = self.options.dedup_tolerance;
        self.executed
            .iter()
            .any(|r| r.status == Some(200) && !r.canceled && r.is_equivalent(candidate, tol))
    }

    /// Whether an equivalent request is pending, loading or already loaded.
    pub fn is_known(&self, candidate: &SegmentRequest) -> bool {
        self.is_pending(candidate) || self.is_loading(candidate) || self.is_executed(candidate)
    }

    pub fn has_init_for(&self, quality: usize) -> bool {
        self.pending
            .iter()
            .chain(&self.loading)
            .any(|r| r.kind == RequestKind::Init && r.quality == quality)
    }

    /// Drop pending requests without `keep` protection.
    pub fn remove_pending_unmarked(&mut self) -> usize {
        let before = self.pending.len();
        self.pending.retain(|r| r.keep);
        before - self.pending.len()
    }

    /// Drop unprotected pending requests for any quality but `quality`.
    pub fn invalidate_quality(&mut self, quality: usize) -> usize {
        let before = self.pending.len();
        self.pending.retain(|r| r.keep || r.quality == quality);
        before - self.pending.len()
    }

    /// Fragments still to request to add `wanted` seconds on top of `buffered`.
    pub fn required_fragments(&self, representation: &Representation, wanted: f64, buffered: f64) -> usize {
        if wanted <= 0.0 {
            return 0;
        }
        let in_flight = self
            .pending
            .iter()
            .chain(&self.loading)
            .filter(|r| r.kind == RequestKind::Media)
            .count();
        self.resolver
            .segment_count_for_duration(representation, wanted, buffered)
            .saturating_sub(in_flight)
    }

    /// Most recently executed media request.
    pub fn last_executed(&self) -> Option<&SegmentRequest> {
        self.executed.iter().rev().find(|r| r.kind == RequestKind::Media)
    }
}

impl Drop for FragmentLoader {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Qualities to try on one origin after `current` failed there: itself,
/// then lower tiers downwards, then higher tiers upwards.
fn fallback_order(current: usize, count: usize) -> impl Iterator<Item = usize> {
    let below = (0..current.min(count)).rev();
    let above = (current + 1)..count;
    std::iter::once(current).chain(below).chain(above)
}
