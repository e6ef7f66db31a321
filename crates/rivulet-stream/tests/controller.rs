use std::{sync::Arc, time::Duration};

use bytes::Bytes;
use rivulet_core::{MediaType, TimeRange};
use rivulet_events::{BufferEvent, Event, EventBus, LoaderEvent};
use rivulet_net::{HttpClient, Net, NetError, NetOptions};
use rivulet_stream::{
    AbrMode, AbrOptions, Adaptation, BufferController, ControllerHandle, LoadError, LoaderOptions,
    LoaderRegistry, MediaBufferSink, MemoryMetrics, PeriodInfo, Representation, RetryPolicy,
    SinkAppend, StreamConfig, StreamDeps, StreamError, TransferMode,
};
use rivulet_test_utils::{
    FakeResolver, ManualClock, MemorySink, ScriptedNet, TestHttpServer, fragment_router,
    init_tracing,
};
use rstest::rstest;
use tokio::sync::broadcast::{Receiver, error::RecvError};
use url::Url;

const FRAGMENT: f64 = 2.0;

fn adaptation(prefix: &str, origin: &Url) -> Adaptation {
    let reps = [300_000, 800_000, 2_000_000]
        .iter()
        .enumerate()
        .map(|(i, bw)| {
            Representation::new(format!("{prefix}{i}"), *bw)
                .with_fragment_duration(FRAGMENT)
                .with_base_urls(vec![origin.clone()])
        })
        .collect();
    Adaptation::new(prefix, MediaType::Video, reps)
}

fn config() -> StreamConfig {
    StreamConfig::default().with_intervals(Duration::from_millis(100), Duration::from_millis(20))
}

fn starting_at(quality: usize) -> StreamConfig {
    config().with_abr(AbrOptions::default().with_mode(AbrMode::Auto(Some(quality))))
}

fn progressive(retry: RetryPolicy) -> StreamConfig {
    config().with_loader(
        LoaderOptions::default()
            .with_transfer_mode(TransferMode::Progressive)
            .with_retry_policy(retry),
    )
}

/// Scripted network serving the box layout of `resolver`.
fn boxed_net(resolver: &FakeResolver) -> ScriptedNet {
    let bodies = resolver.clone();
    ScriptedNet::new(4_000).with_handler(move |url| bodies.fragment_body(url).map(Ok))
}

struct Harness {
    origin: Url,
    net: Arc<dyn Net>,
    clock: ManualClock,
    sink: MemorySink,
    metrics: Arc<MemoryMetrics>,
    registry: LoaderRegistry,
    bus: EventBus,
    events: Receiver<Event>,
}

impl Harness {
    fn new(net: Arc<dyn Net>, origin: Url) -> Self {
        init_tracing();
        let bus = EventBus::new(256);
        let events = bus.subscribe();
        Self {
            origin,
            net,
            clock: ManualClock::new(0.0),
            sink: MemorySink::new(),
            metrics: Arc::new(MemoryMetrics::default()),
            registry: LoaderRegistry::new(),
            bus,
            events,
        }
    }

    fn scripted(net: ScriptedNet) -> Self {
        Self::new(Arc::new(net), Url::parse("https://cdn.test/media/").unwrap())
    }

    fn spawn(&self, resolver: FakeResolver, period: PeriodInfo, cfg: StreamConfig) -> ControllerHandle {
        let deps = StreamDeps {
            net: Arc::clone(&self.net),
            resolver: Arc::new(resolver),
            clock: Arc::new(self.clock.clone()),
            metrics: self.metrics.clone(),
            registry: self.registry.clone(),
            bus: self.bus.clone(),
        };
        BufferController::new(
            MediaType::Video,
            period,
            adaptation("v", &self.origin),
            Box::new(self.sink.clone()),
            deps,
            cfg,
        )
        .unwrap()
        .spawn()
    }

    async fn wait_for(&mut self, matches: impl Fn(&BufferEvent) -> bool) -> BufferEvent {
        match self
            .wait_for_event(|e| matches!(e, Event::Buffer(event) if matches(event)))
            .await
        {
            Event::Buffer(event) => event,
            other => unreachable!("{other:?}"),
        }
    }

    async fn wait_for_event(&mut self, matches: impl Fn(&Event) -> bool) -> Event {
        let events = &mut self.events;
        tokio::time::timeout(Duration::from_secs(30), async {
            loop {
                match events.recv().await {
                    Ok(event) if matches(&event) => return event,
                    Ok(_) | Err(RecvError::Lagged(_)) => {}
                    Err(RecvError::Closed) => panic!("event bus closed"),
                }
            }
        })
        .await
        .expect("event in time")
    }

    /// Appended start times in presentation order.
    fn sorted_starts(&self) -> Vec<f64> {
        let mut starts = self.sink.appended_starts();
        starts.sort_by(f64::total_cmp);
        starts
    }

    async fn wait_until(&self, condition: impl Fn(&Self) -> bool) {
        for _ in 0..300 {
            if condition(self) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        panic!("condition not reached");
    }
}

#[tokio::test(start_paused = true)]
async fn on_demand_stream_is_appended_in_order_and_completes() {
    let net = ScriptedNet::new(4_000);
    let mut h = Harness::scripted(net.clone());
    let handle = h.spawn(
        FakeResolver::new(MediaType::Video, FRAGMENT).with_fragment_count(5),
        PeriodInfo::on_demand(10.0, 2.0),
        config(),
    );

    h.wait_for(|e| matches!(e, BufferEvent::StreamCompleted { .. }))
        .await;

    let appends = h.sink.appends();
    let starts: Vec<f64> = appends.iter().map(|a| a.start).collect();
    assert_eq!(starts, vec![0.0, 2.0, 4.0, 6.0, 8.0]);
    assert!(appends[0].init.is_some());
    assert!(appends[1..].iter().all(|a| a.init.is_none()));
    assert_eq!(net.count_calls("init.mp4"), 1);
    assert_eq!(h.sink.ranges(), vec![TimeRange { start: 0.0, end: 10.0 }]);
    assert!(!h.metrics.revised_requests(MediaType::Video).is_empty());

    handle.shutdown().await.unwrap();
    assert!(h.registry.is_empty());
}

#[tokio::test(start_paused = true)]
async fn exhausted_fragment_fails_the_stream() {
    let net = ScriptedNet::new(4_000).with_handler(|url| {
        url.path().ends_with("/2.m4s").then(|| {
            Err(NetError::HttpStatus {
                status: 503,
                url: url.to_string(),
            })
        })
    });
    let mut h = Harness::scripted(net.clone());
    let handle = h.spawn(
        FakeResolver::new(MediaType::Video, FRAGMENT).with_fragment_count(5),
        PeriodInfo::on_demand(10.0, 2.0),
        config(),
    );

    let event = h
        .wait_for(|e| matches!(e, BufferEvent::Failed { .. }))
        .await;
    assert_eq!(event.media(), MediaType::Video);
    // Every quality was tried on the single origin.
    assert_eq!(net.count_calls("/2.m4s"), 3);

    let result = handle.shutdown().await;
    assert!(
        matches!(
            result,
            Err(StreamError::Load(LoadError::Exhausted { start, .. })) if (start - 4.0).abs() < 1e-9
        ),
        "{result:?}"
    );
}

#[tokio::test(start_paused = true)]
async fn live_stream_starts_at_the_edge() {
    let net = ScriptedNet::new(4_000);
    let mut h = Harness::scripted(net.clone());
    let availability = TimeRange { start: 100.0, end: 130.0 };
    let handle = h.spawn(
        FakeResolver::new(MediaType::Video, FRAGMENT).with_live_edge_index(60),
        PeriodInfo::live(availability, 2.0),
        config(),
    );

    let found = h
        .wait_for(|e| matches!(e, BufferEvent::LiveEdgeFound { .. }))
        .await;
    assert_eq!(
        found,
        BufferEvent::LiveEdgeFound {
            media: MediaType::Video,
            time: 120.0
        }
    );
    assert_eq!(h.clock.seeks(), vec![120.0]);

    h.wait_until(|h| !h.sink.appends().is_empty()).await;
    assert_eq!(h.sink.appended_starts()[0], 120.0);
    // Nothing past the edge is fetched.
    assert_eq!(net.count_calls("/61.m4s"), 0);

    handle.shutdown().await.unwrap();
}

#[rstest]
#[case::removes_stale_ranges(false, 1)]
#[case::fast_seek_keeps_them(true, 0)]
#[tokio::test(start_paused = true)]
async fn seek_restarts_scheduling_at_the_target(#[case] fast_seek: bool, #[case] removals: usize) {
    let net = ScriptedNet::new(4_000);
    let mut h = Harness::scripted(net.clone());
    let handle = h.spawn(
        FakeResolver::new(MediaType::Video, FRAGMENT).with_fragment_count(20),
        PeriodInfo::on_demand(40.0, 2.0),
        config().with_fast_seek(fast_seek),
    );
    h.wait_until(|h| h.sink.appends().len() >= 5).await;

    h.clock.set_time(30.0);
    handle.seek(30.0).await.unwrap();
    h.wait_for(|e| matches!(e, BufferEvent::Seeked { position, .. } if *position == 30.0))
        .await;
    h.wait_until(|h| h.sink.appended_starts().contains(&30.0))
        .await;

    assert_eq!(h.sink.removals().len(), removals);
    assert_eq!(net.count_calls("v0/5.m4s"), 0);
    handle.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn switching_adaptation_fetches_the_new_init_segment() {
    let net = ScriptedNet::new(4_000);
    let h = Harness::scripted(net.clone());
    let handle = h.spawn(
        FakeResolver::new(MediaType::Video, FRAGMENT).with_fragment_count(20),
        PeriodInfo::on_demand(40.0, 2.0),
        config(),
    );
    h.wait_until(|h| h.sink.appends().len() >= 5).await;

    h.clock.set_time(8.0);
    handle
        .switch_adaptation(adaptation("w", &h.origin))
        .await
        .unwrap();
    h.wait_until(|h| h.sink.appends().iter().any(|a| a.start >= 10.0))
        .await;

    assert_eq!(net.count_calls("w0/init.mp4"), 1);
    let first_new = h
        .sink
        .appends()
        .into_iter()
        .find(|a| a.start >= 10.0)
        .unwrap();
    assert!(first_new.init.is_some());
    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn streams_over_http() {
    let server = TestHttpServer::new(fragment_router(2_048, None)).await;
    let client = HttpClient::new(NetOptions::default()).unwrap();
    let mut h = Harness::new(Arc::new(client), server.base_url().clone());
    let handle = h.spawn(
        FakeResolver::new(MediaType::Video, FRAGMENT).with_fragment_count(3),
        PeriodInfo::on_demand(6.0, 2.0),
        config(),
    );

    h.wait_for(|e| matches!(e, BufferEvent::StreamCompleted { .. }))
        .await;
    assert!((h.sink.buffered_length(0.0, 0.1) - 6.0).abs() < 1e-6);
    handle.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn missing_fragment_on_every_source_is_not_found() {
    let net = ScriptedNet::new(4_000).with_handler(|url| {
        url.path().ends_with("/1.m4s").then(|| {
            Err(NetError::HttpStatus {
                status: 404,
                url: url.to_string(),
            })
        })
    });
    let mut h = Harness::scripted(net);
    let handle = h.spawn(
        FakeResolver::new(MediaType::Video, FRAGMENT).with_fragment_count(5),
        PeriodInfo::on_demand(10.0, 2.0),
        config(),
    );

    h.wait_for(|e| matches!(e, BufferEvent::Failed { .. }))
        .await;
    let result = handle.shutdown().await;
    assert!(
        matches!(result, Err(StreamError::Load(LoadError::NotFound { .. }))),
        "{result:?}"
    );
}

#[tokio::test(start_paused = true)]
async fn progressive_fallback_drops_the_partial_fragment() {
    let resolver = FakeResolver::new(MediaType::Video, FRAGMENT)
        .with_fragment_count(5)
        .with_boxes(2, 1_000);
    let net = boxed_net(&resolver).with_body_failure("v0/2.m4s", 1);
    let mut h = Harness::scripted(net.clone());
    let handle = h.spawn(
        resolver,
        PeriodInfo::on_demand(10.0, 2.0),
        progressive(RetryPolicy::none()),
    );

    h.wait_for(|e| matches!(e, BufferEvent::StreamCompleted { .. }))
        .await;

    assert_eq!(h.sorted_starts(), vec![0.0, 2.0, 4.0, 6.0, 8.0]);
    assert_eq!(net.count_calls("v1/2.m4s"), 1);
    let replaced = h
        .sink
        .appends()
        .into_iter()
        .find(|a| a.start == 4.0)
        .unwrap();
    assert_eq!(replaced.quality, 1);
    assert_eq!(replaced.bytes.len(), 2_000);
    handle.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn broken_body_is_fetched_again_from_the_same_url() {
    let net = ScriptedNet::new(4_000).with_body_failure("v0/2.m4s", 1);
    let mut h = Harness::scripted(net.clone());
    let cfg = config().with_loader(
        LoaderOptions::default().with_retry_policy(RetryPolicy::new(1, Duration::from_millis(100))),
    );
    let handle = h.spawn(
        FakeResolver::new(MediaType::Video, FRAGMENT).with_fragment_count(5),
        PeriodInfo::on_demand(10.0, 2.0),
        cfg,
    );

    h.wait_for(|e| matches!(e, BufferEvent::StreamCompleted { .. }))
        .await;

    assert_eq!(net.count_calls("v0/2.m4s"), 2);
    assert_eq!(net.count_calls("v1/2.m4s"), 0);
    assert_eq!(h.sorted_starts(), vec![0.0, 2.0, 4.0, 6.0, 8.0]);
    assert!(h.sink.appends().iter().all(|a| a.quality == 0));
    handle.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn restarted_progressive_transfer_appends_each_box_once() {
    let resolver = FakeResolver::new(MediaType::Video, FRAGMENT)
        .with_fragment_count(5)
        .with_boxes(4, 500);
    let net = boxed_net(&resolver).with_body_failure("v0/2.m4s", 1);
    let mut h = Harness::scripted(net.clone());
    let handle = h.spawn(
        resolver,
        PeriodInfo::on_demand(10.0, 2.0),
        progressive(RetryPolicy::new(1, Duration::from_millis(100))),
    );

    h.wait_for(|e| matches!(e, BufferEvent::StreamCompleted { .. }))
        .await;

    assert_eq!(net.count_calls("v0/2.m4s"), 2);
    assert_eq!(h.sorted_starts(), vec![0.0, 2.0, 4.0, 6.0, 8.0]);
    assert!(h.sink.appends().iter().all(|a| a.bytes.len() == 2_000));
    handle.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn timed_out_request_falls_back_and_is_measured() {
    let net = ScriptedNet::new(4_000).with_slow("v0/2.m4s", Duration::from_secs(60));
    let mut h = Harness::scripted(net.clone());
    let cfg = config()
        .with_loader(LoaderOptions::default().with_request_timeout(Duration::from_secs(1)));
    let handle = h.spawn(
        FakeResolver::new(MediaType::Video, FRAGMENT).with_fragment_count(5),
        PeriodInfo::on_demand(10.0, 2.0),
        cfg,
    );

    h.wait_for(|e| matches!(e, BufferEvent::StreamCompleted { .. }))
        .await;

    assert_eq!(net.count_calls("v1/2.m4s"), 1);
    let samples = h.metrics.http_requests(MediaType::Video);
    assert_eq!(samples.iter().filter(|s| s.status == Some(408)).count(), 1);
    handle.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn stall_drops_to_lowest_quality_until_buffer_recovers() {
    let net = ScriptedNet::new(4_000);
    let mut h = Harness::scripted(net.clone());
    let handle = h.spawn(
        FakeResolver::new(MediaType::Video, FRAGMENT).with_fragment_count(20),
        PeriodInfo::on_demand(40.0, 2.0),
        starting_at(2),
    );
    h.wait_until(|h| h.sink.appends().len() >= 5).await;
    assert!(h.sink.appends().iter().all(|a| a.quality == 2));

    // Playhead runs past everything buffered.
    h.clock.set_time(11.0);
    let stalled = h
        .wait_for(|e| matches!(e, BufferEvent::Stalled { .. }))
        .await;
    assert_eq!(
        stalled,
        BufferEvent::Stalled {
            media: MediaType::Video,
            position: 11.0
        }
    );
    h.wait_for(|e| matches!(e, BufferEvent::Resumed { .. }))
        .await;

    let switches = h.metrics.switches(MediaType::Video);
    assert!(switches.iter().any(|s| s.from == 2 && s.to == 0), "{switches:?}");
    let after: Vec<_> = h
        .sink
        .appends()
        .into_iter()
        .filter(|a| a.start >= 10.0)
        .collect();
    assert!(!after.is_empty());
    assert!(after.iter().all(|a| a.quality == 0));
    assert!(after[0].init.is_some());
    handle.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn small_gap_is_jumped() {
    let net = ScriptedNet::new(4_000);
    let mut h = Harness::scripted(net);
    let handle = h.spawn(
        FakeResolver::new(MediaType::Video, FRAGMENT).with_fragment_count(20),
        PeriodInfo::on_demand(40.0, 2.0),
        config(),
    );
    h.wait_until(|h| h.sink.appends().len() >= 5).await;

    let mut sink = h.sink.clone();
    sink.append(SinkAppend {
        bytes: Bytes::from_static(b"gap"),
        init: None,
        start: 10.4,
        duration: 1.6,
        quality: 0,
    })
    .unwrap();
    h.clock.set_time(10.2);

    let skipped = h
        .wait_for(|e| matches!(e, BufferEvent::GapSkipped { .. }))
        .await;
    assert_eq!(
        skipped,
        BufferEvent::GapSkipped {
            media: MediaType::Video,
            from: 10.2,
            to: 10.4
        }
    );
    assert_eq!(h.clock.seeks(), vec![10.4]);
    handle.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn slow_fragment_is_aborted_and_fetched_again() {
    let net = ScriptedNet::new(4_000).with_slow("v1/3.m4s", Duration::from_secs(60));
    let mut h = Harness::scripted(net.clone());
    let handle = h.spawn(
        FakeResolver::new(MediaType::Video, FRAGMENT).with_fragment_count(20),
        PeriodInfo::on_demand(40.0, 2.0),
        starting_at(1),
    );

    let aborted = h
        .wait_for_event(|e| matches!(e, Event::Loader(LoaderEvent::Aborted { .. })))
        .await;
    assert!(
        matches!(aborted, Event::Loader(LoaderEvent::Aborted { start_time, .. }) if start_time == 6.0),
        "{aborted:?}"
    );
    h.wait_until(|h| h.sink.appended_starts().contains(&6.0))
        .await;

    assert_eq!(net.count_calls("v1/3.m4s"), 2);
    assert_eq!(
        h.sink.appends().iter().filter(|a| a.start == 6.0).count(),
        1
    );
    handle.shutdown().await.unwrap();
}

#[rstest]
#[case::stops(false)]
#[case::keeps_going(true)]
#[tokio::test(start_paused = true)]
async fn pause_stops_scheduling_unless_configured(#[case] while_paused: bool) {
    let net = ScriptedNet::new(4_000);
    let h = Harness::scripted(net.clone());
    let handle = h.spawn(
        FakeResolver::new(MediaType::Video, FRAGMENT).with_fragment_count(20),
        PeriodInfo::on_demand(40.0, 2.0),
        config().with_schedule_while_paused(while_paused),
    );
    h.wait_until(|h| h.sink.appends().len() >= 5).await;

    h.clock.set_paused(true);
    handle.pause().await.unwrap();
    h.clock.set_time(8.0);
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(net.count_calls("/5.m4s") > 0, while_paused);

    h.clock.set_paused(false);
    handle.play().await.unwrap();
    h.wait_until(|h| h.sink.appended_starts().contains(&10.0))
        .await;
    handle.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn quality_drop_discards_queued_requests_of_the_old_quality() {
    let net = ScriptedNet::new(4_000).with_slow("v2/5.m4s", Duration::from_secs(60));
    let h = Harness::scripted(net.clone());
    let cfg = starting_at(2).with_loader(LoaderOptions::default().with_concurrency_limit(1));
    let handle = h.spawn(
        FakeResolver::new(MediaType::Video, FRAGMENT).with_fragment_count(20),
        PeriodInfo::on_demand(40.0, 2.0),
        cfg,
    );
    h.wait_until(|h| h.sink.appends().len() >= 5).await;

    // One second left: more fragments queue up behind the slow one.
    h.clock.set_time(9.0);
    h.wait_until(|h| h.registry.pending(handle.id()).len() >= 2)
        .await;
    h.clock.set_time(10.5);
    h.wait_until(|_| net.count_calls("v0/6.m4s") > 0).await;

    assert_eq!(net.count_calls("v2/6.m4s"), 0);
    assert_eq!(net.count_calls("v2/7.m4s"), 0);
    assert!(
        h.metrics
            .switches(MediaType::Video)
            .iter()
            .any(|s| s.from == 2 && s.to == 0)
    );
    handle.shutdown().await.unwrap();
}
