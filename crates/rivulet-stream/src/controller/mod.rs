//! Per media type buffer controller.
//!
//! A [`BufferController`] owns the scheduling of one media type: it decides
//! the quality with the ABR engine, issues fragment requests through its
//! [`FragmentLoader`](crate::FragmentLoader), and feeds loaded bytes to the
//! [`MediaBufferSink`]. It runs as a spawned task driven by two timers
//! (validation and append) plus transfer reports and owner commands.

mod handle;
mod ingest;
mod pump;
mod schedule;
mod seek;

use std::{collections::HashMap, sync::Arc};

use bytes::Bytes;
use rivulet_abr::AbrController;
use rivulet_core::MediaType;
use rivulet_events::{BufferEvent, EventBus};
use rivulet_net::{Net, RetryNet};
use tokio::{
    sync::mpsc,
    time::{MissedTickBehavior, interval},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

pub use self::handle::{ControllerCommand, ControllerHandle};
use crate::{
    append::{AppendQueue, ProgressiveAssembler},
    config::StreamConfig,
    error::{StreamError, StreamResult},
    live_edge::{NetProbe, find_live_edge},
    loader::{FragmentLoader, LoaderContext, TransportEvent},
    registry::{ControllerId, LoaderRegistry},
    traits::{IndexResolver, MediaBufferSink, MetricsSink, PlaybackClock},
    types::{Adaptation, PeriodInfo, RequestId, Representation, SegmentRequest},
};

/// Gap bridged when measuring contiguous buffered media.
const RANGE_TOLERANCE: f64 = 0.1;
const COMMAND_CAPACITY: usize = 16;

/// Shared collaborators of every controller of a presentation.
#[derive(Clone)]
pub struct StreamDeps {
    pub net: Arc<dyn Net>,
    pub resolver: Arc<dyn IndexResolver>,
    pub clock: Arc<dyn PlaybackClock>,
    pub metrics: Arc<dyn MetricsSink>,
    pub registry: LoaderRegistry,
    pub bus: EventBus,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ControllerState {
    /// Not scheduling: before start, after a stop or a terminal failure.
    Waiting,
    Ready,
    /// A validation pass is choosing the next requests.
    Validating,
    /// A media fragment transfer is in flight.
    Loading,
}

/// Initialization segment cache key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
struct InitKey {
    period: usize,
    media: MediaType,
    quality: usize,
}

pub struct BufferController {
    id: ControllerId,
    media: MediaType,
    cfg: StreamConfig,
    period: PeriodInfo,
    adaptation: Adaptation,
    deps: StreamDeps,
    sink: Box<dyn MediaBufferSink>,
    abr: AbrController,
    state: ControllerState,
    scheduling: bool,
    buffer_level: f64,
    min_buffer_time: f64,
    stalled: bool,
    /// Nothing has been appended yet.
    initial_playback: bool,
    /// End-of-presentation sentinel reached.
    completed: bool,
    completion_notified: bool,
    /// Quality of the last successful append, decides when init data is sent.
    applied_quality: Option<usize>,
    init_cache: HashMap<InitKey, Bytes>,
    append_queue: AppendQueue,
    assemblers: HashMap<RequestId, ProgressiveAssembler>,
    last_request: Option<SegmentRequest>,
    next_time: f64,
    last_error: Option<StreamError>,
    transport_tx: mpsc::UnboundedSender<TransportEvent>,
    transport_rx: mpsc::UnboundedReceiver<TransportEvent>,
    cancel: CancellationToken,
}

impl BufferController {
    /// # Errors
    ///
    /// [`StreamError::NoRepresentation`] when `adaptation` is empty.
    pub fn new(
        media: MediaType,
        period: PeriodInfo,
        adaptation: Adaptation,
        sink: Box<dyn MediaBufferSink>,
        deps: StreamDeps,
        cfg: StreamConfig,
    ) -> StreamResult<Self> {
        if adaptation.is_empty() {
            return Err(StreamError::NoRepresentation);
        }
        let mut abr = AbrController::new(cfg.abr.clone());
        abr.set_variant_count(media, adaptation.len());
        let (transport_tx, transport_rx) = mpsc::unbounded_channel();
        let next_time = period.start;

        Ok(Self {
            id: ControllerId::next(),
            media,
            cfg,
            period,
            adaptation,
            deps,
            sink,
            abr,
            state: ControllerState::Waiting,
            scheduling: false,
            buffer_level: 0.0,
            min_buffer_time: 0.0,
            stalled: false,
            initial_playback: true,
            completed: false,
            completion_notified: false,
            applied_quality: None,
            init_cache: HashMap::new(),
            append_queue: AppendQueue::new(),
            assemblers: HashMap::new(),
            last_request: None,
            next_time,
            last_error: None,
            transport_tx,
            transport_rx,
            cancel: CancellationToken::new(),
        })
    }

    pub fn id(&self) -> ControllerId {
        self.id
    }

    pub fn media(&self) -> MediaType {
        self.media
    }

    pub fn state(&self) -> ControllerState {
        self.state
    }

    /// Run the controller on the current runtime.
    pub fn spawn(self) -> ControllerHandle {
        let (commands, rx) = mpsc::channel(COMMAND_CAPACITY);
        let id = self.id;
        let media = self.media;
        let cancel = self.cancel.clone();
        let task = tokio::spawn(self.run(rx));
        ControllerHandle {
            id,
            media,
            commands,
            cancel,
            task,
        }
    }

    async fn run(mut self, mut commands: mpsc::Receiver<ControllerCommand>) -> StreamResult<()> {
        let cancel = self.cancel.clone();
        if let Err(e) = self.start().await {
            self.fail(e);
        }

        let mut validate_tick = interval(self.cfg.validate_interval);
        validate_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut append_tick = interval(self.cfg.append_interval);
        append_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                command = commands.recv() => match command {
                    Some(ControllerCommand::Reset) | None => break,
                    Some(command) => self.handle_command(command),
                },
                Some(event) = self.transport_rx.recv() => self.on_transport_event(event),
                _ = validate_tick.tick() => {
                    self.check_loading_requests();
                    self.validate();
                }
                _ = append_tick.tick() => self.pump_appends(),
            }
        }

        self.teardown();
        match self.last_error.take() {
            Some(e) if e.is_terminal() => Err(e),
            _ => Ok(()),
        }
    }

    /// Attach the loader and find the first fragment time.
    async fn start(&mut self) -> StreamResult<()> {
        self.attach_loader();
        self.state = ControllerState::Ready;
        self.scheduling = true;
        self.min_buffer_time = schedule::target_min_buffer(&self.cfg, &self.period);

        if self.period.dynamic {
            let representation = self.representation()?;
            let position = self.deps.clock.current_time();
            let window = self.period.availability.unwrap_or(rivulet_core::TimeRange {
                start: position,
                end: position,
            });
            let net = RetryNet::new(Arc::clone(&self.deps.net), self.cfg.loader.retry_policy.clone());
            let probe = NetProbe::new(
                Arc::new(net),
                Arc::clone(&self.deps.resolver),
                representation.clone(),
            );
            let edge = find_live_edge(&probe, window, representation.fragment_duration).await?;
            info!(media = ?self.media, edge, "controller: live edge found");
            self.next_time = edge;
            self.deps.clock.seek_to(edge);
            self.deps.bus.publish(BufferEvent::LiveEdgeFound {
                media: self.media,
                time: edge,
            });
        } else {
            self.next_time = self.deps.clock.current_time().max(self.period.start);
        }
        debug!(media = ?self.media, id = %self.id, start = self.next_time, "controller: started");
        Ok(())
    }

    fn attach_loader(&self) {
        let ctx = LoaderContext {
            media: self.media,
            net: Arc::clone(&self.deps.net),
            resolver: Arc::clone(&self.deps.resolver),
            metrics: Arc::clone(&self.deps.metrics),
            bus: self.deps.bus.clone(),
            options: self.cfg.loader.clone(),
            events: self.transport_tx.clone(),
            cancel: self.cancel.child_token(),
        };
        self.deps.registry.attach(self.id, || FragmentLoader::new(ctx));
        self.deps
            .registry
            .set_adaptation(self.id, self.adaptation.clone());
    }

    fn handle_command(&mut self, command: ControllerCommand) {
        debug!(media = ?self.media, ?command, "controller: command");
        match command {
            ControllerCommand::Seek(time) => self.seek(time),
            ControllerCommand::Play => self.resume(),
            ControllerCommand::Pause => self.validate(),
            ControllerCommand::Stop => self.stop(),
            ControllerCommand::SwitchAdaptation(adaptation) => self.switch_adaptation(adaptation),
            ControllerCommand::Reset => {}
        }
    }

    fn resume(&mut self) {
        if self.state == ControllerState::Waiting {
            if self.last_error.as_ref().is_some_and(StreamError::is_terminal) {
                debug!(media = ?self.media, "controller: not resuming after failure");
                return;
            }
            self.state = ControllerState::Ready;
        }
        self.scheduling = !self.completed;
        self.validate();
    }

    fn stop(&mut self) {
        self.deps.registry.abort(self.id);
        self.deps.registry.remove_pending_unmarked(self.id);
        self.assemblers.clear();
        self.state = ControllerState::Waiting;
        self.scheduling = false;
    }

    /// Stop scheduling on an unrecoverable error.
    fn fail(&mut self, err: StreamError) {
        error!(media = ?self.media, error = %err, "controller: streaming failed");
        self.deps.bus.publish(BufferEvent::Failed {
            media: self.media,
            error: err.to_string(),
        });
        self.deps.registry.abort(self.id);
        self.state = ControllerState::Waiting;
        self.scheduling = false;
        self.last_error = Some(err);
    }

    fn teardown(&mut self) {
        self.deps.registry.detach(self.id);
        self.append_queue.clear();
        self.assemblers.clear();
        self.init_cache.clear();
        self.abr.reset(self.media);
        self.state = ControllerState::Waiting;
        self.scheduling = false;
        debug!(media = ?self.media, id = %self.id, "controller: torn down");
    }

    fn on_transport_event(&mut self, event: TransportEvent) {
        let outcomes = self.deps.registry.handle_event(self.id, event);
        self.on_outcomes(outcomes);
    }

    /// Representation of the required quality.
    fn representation(&self) -> StreamResult<Representation> {
        self.adaptation
            .representation(self.abr.quality(self.media))
            .or_else(|| self.adaptation.representation(0))
            .cloned()
            .ok_or(StreamError::NoRepresentation)
    }

    fn init_key(&self, quality: usize) -> InitKey {
        InitKey {
            period: self.period.index,
            media: self.media,
            quality,
        }
    }
}
