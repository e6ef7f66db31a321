//! Adaptive segmented-media streaming.
//!
//! One [`BufferController`] per media type keeps its [`MediaBufferSink`]
//! filled: it asks the ABR engine for a quality, requests fragments through a
//! [`FragmentLoader`] registered in the shared [`LoaderRegistry`], and appends
//! what arrives, in pieces when fragments are long.
//!
//! Manifest parsing, decoding and playback stay outside this crate behind the
//! [`IndexResolver`], [`MediaBufferSink`] and [`PlaybackClock`] traits.

#![forbid(unsafe_code)]

mod append;
mod config;
mod controller;
mod error;
mod live_edge;
mod loader;
mod metrics;
mod registry;
mod traits;
mod types;

pub use append::{AppendChunk, AppendQueue, ProgressiveAssembler, split_fragment};
pub use config::{
    AbrMode, AbrOptions, LoaderOptions, NetOptions, RetryPolicy, StreamConfig, TransferMode,
};
pub use controller::{
    BufferController, ControllerCommand, ControllerHandle, ControllerState, StreamDeps,
};
pub use error::{IndexError, LoadError, SinkError, StreamError, StreamResult};
pub use live_edge::{EdgeProbe, NetProbe, find_live_edge};
pub use loader::{ExecuteOutcome, FragmentLoader, LoaderContext, LoaderOutcome, TransportEvent};
pub use metrics::{BufferState, HttpSample, MemoryMetrics, RepresentationSwitch};
pub use registry::{ControllerId, LoaderRegistry};
pub use traits::{IndexResolver, MediaBufferSink, MetricsSink, PlaybackClock, SinkAppend};
pub use types::{
    Adaptation, FragmentBox, PeriodInfo, Representation, RequestAction, RequestId, RequestKind,
    RequestTiming, SegmentRequest,
};
