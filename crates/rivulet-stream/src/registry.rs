use std::{
    collections::HashMap,
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use parking_lot::Mutex;
use tracing::debug;

use crate::{
    loader::{ExecuteOutcome, FragmentLoader, LoaderOutcome, TransportEvent},
    types::{Adaptation, Representation, SegmentRequest},
};

static NEXT_CONTROLLER_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of one buffer controller.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ControllerId(u64);

impl ControllerId {
    pub fn next() -> Self {
        Self(NEXT_CONTROLLER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ControllerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "controller-{}", self.0)
    }
}

/// Routes each buffer controller to its own fragment loader.
///
/// Loaders are created on first attach and dropped on detach. Every other
/// method is a pass-through that does nothing for an unknown controller.
#[derive(Clone, Default)]
pub struct LoaderRegistry {
    loaders: Arc<Mutex<HashMap<ControllerId, FragmentLoader>>>,
}

impl LoaderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a loader to `id`, building it only if none exists yet.
    pub fn attach(&self, id: ControllerId, make: impl FnOnce() -> FragmentLoader) {
        self.loaders.lock().entry(id).or_insert_with(|| {
            debug!(%id, "registry: loader attached");
            make()
        });
    }

    /// Drop the loader of `id`, aborting its transfers.
    pub fn detach(&self, id: ControllerId) -> Vec<SegmentRequest> {
        let Some(mut loader) = self.loaders.lock().remove(&id) else {
            return Vec::new();
        };
        debug!(%id, "registry: loader detached");
        loader.abort()
    }

    pub fn is_attached(&self, id: ControllerId) -> bool {
        self.loaders.lock().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.loaders.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.loaders.lock().is_empty()
    }

    /// Run `f` against the loader of `id`.
    pub fn with_loader<R>(&self, id: ControllerId, f: impl FnOnce(&mut FragmentLoader) -> R) -> Option<R> {
        self.loaders.lock().get_mut(&id).map(f)
    }

    pub fn set_adaptation(&self, id: ControllerId, adaptation: Adaptation) {
        self.with_loader(id, |l| l.set_adaptation(adaptation));
    }

    pub fn enqueue(&self, id: ControllerId, request: SegmentRequest) {
        self.with_loader(id, |l| l.enqueue(request));
    }

    pub fn execute_next(&self, id: ControllerId) -> ExecuteOutcome {
        self.with_loader(id, FragmentLoader::execute_next)
            .unwrap_or(ExecuteOutcome::Idle)
    }

    pub fn execute_pending(&self, id: ControllerId) -> Vec<LoaderOutcome> {
        self.with_loader(id, FragmentLoader::execute_pending)
            .unwrap_or_default()
    }

    pub fn handle_event(&self, id: ControllerId, event: TransportEvent) -> Vec<LoaderOutcome> {
        self.with_loader(id, |l| l.handle_event(event))
            .unwrap_or_default()
    }

    pub fn abort(&self, id: ControllerId) -> Vec<SegmentRequest> {
        self.with_loader(id, FragmentLoader::abort).unwrap_or_default()
    }

    pub fn abort_request_for_time(&self, id: ControllerId, time: f64) -> Option<SegmentRequest> {
        self.with_loader(id, |l| l.abort_request_for_time(time))
            .flatten()
    }

    pub fn pending(&self, id: ControllerId) -> Vec<SegmentRequest> {
        self.with_loader(id, |l| l.pending().to_vec())
            .unwrap_or_default()
    }

    pub fn loading(&self, id: ControllerId) -> Vec<SegmentRequest> {
        self.with_loader(id, |l| l.loading().to_vec())
            .unwrap_or_default()
    }

    pub fn executed(&self, id: ControllerId) -> Vec<SegmentRequest> {
        self.with_loader(id, |l| l.executed().cloned().collect())
            .unwrap_or_default()
    }

    pub fn last_executed(&self, id: ControllerId) -> Option<SegmentRequest> {
        self.with_loader(id, |l| l.last_executed().cloned())
            .flatten()
    }

    pub fn is_known(&self, id: ControllerId, candidate: &SegmentRequest) -> bool {
        self.with_loader(id, |l| l.is_known(candidate))
            .unwrap_or(false)
    }

    pub fn is_pending(&self, id: ControllerId, candidate: &SegmentRequest) -> bool {
        self.with_loader(id, |l| l.is_pending(candidate))
            .unwrap_or(false)
    }

    pub fn is_loading(&self, id: ControllerId, candidate: &SegmentRequest) -> bool {
        self.with_loader(id, |l| l.is_loading(candidate))
            .unwrap_or(false)
    }

    pub fn is_executed(&self, id: ControllerId, candidate: &SegmentRequest) -> bool {
        self.with_loader(id, |l| l.is_executed(candidate))
            .unwrap_or(false)
    }

    pub fn has_init_for(&self, id: ControllerId, quality: usize) -> bool {
        self.with_loader(id, |l| l.has_init_for(quality))
            .unwrap_or(false)
    }

    pub fn remove_pending_unmarked(&self, id: ControllerId) -> usize {
        self.with_loader(id, FragmentLoader::remove_pending_unmarked)
            .unwrap_or(0)
    }

    pub fn invalidate_quality(&self, id: ControllerId, quality: usize) -> usize {
        self.with_loader(id, |l| l.invalidate_quality(quality))
            .unwrap_or(0)
    }

    pub fn required_fragments(
        &self,
        id: ControllerId,
        representation: &Representation,
        wanted: f64,
        buffered: f64,
    ) -> usize {
        self.with_loader(id, |l| l.required_fragments(representation, wanted, buffered))
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use rivulet_core::MediaType;
    use rivulet_events::EventBus;
    use rivulet_net::MockNet;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::{
        config::LoaderOptions,
        loader::LoaderContext,
        metrics::MemoryMetrics,
        traits::MockIndexResolver,
    };

    fn make_loader() -> FragmentLoader {
        let (tx, _rx) = mpsc::unbounded_channel();
        FragmentLoader::new(LoaderContext {
            media: MediaType::Audio,
            net: Arc::new(MockNet::new()),
            resolver: Arc::new(MockIndexResolver::new()),
            metrics: Arc::new(MemoryMetrics::default()),
            bus: EventBus::new(8),
            options: LoaderOptions::default(),
            events: tx,
            cancel: CancellationToken::new(),
        })
    }

    fn request(index: u64) -> SegmentRequest {
        let repr = Representation::new("a", 64_000);
        #[expect(clippy::cast_precision_loss)]
        let start = index as f64 * 2.0;
        SegmentRequest::media(&repr, MediaType::Audio, index, start, 2.0, "a.m4s")
    }

    #[test]
    fn attach_is_lazy_and_one_to_one() {
        let registry = LoaderRegistry::new();
        let id = ControllerId::next();
        let mut built = 0;
        registry.attach(id, || {
            built += 1;
            make_loader()
        });
        registry.attach(id, || {
            built += 1;
            make_loader()
        });
        assert_eq!(built, 1);
        assert_eq!(registry.len(), 1);

        registry.attach(ControllerId::next(), make_loader);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn pass_throughs_reach_own_loader_only() {
        let registry = LoaderRegistry::new();
        let (a, b) = (ControllerId::next(), ControllerId::next());
        registry.attach(a, make_loader);
        registry.attach(b, make_loader);

        registry.enqueue(a, request(1));
        assert_eq!(registry.pending(a).len(), 1);
        assert!(registry.pending(b).is_empty());
        assert!(registry.is_known(a, &request(1)));
        assert!(!registry.is_known(b, &request(1)));
    }

    #[test]
    fn detached_controller_is_ignored() {
        let registry = LoaderRegistry::new();
        let id = ControllerId::next();
        registry.attach(id, make_loader);
        registry.enqueue(id, request(0));
        assert!(registry.detach(id).is_empty());

        assert!(!registry.is_attached(id));
        registry.enqueue(id, request(1));
        assert!(registry.pending(id).is_empty());
        assert!(matches!(registry.execute_next(id), ExecuteOutcome::Idle));
    }
}
