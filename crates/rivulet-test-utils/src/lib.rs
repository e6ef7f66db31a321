#![forbid(unsafe_code)]
#![allow(
    clippy::unwrap_used,
    reason = "test utility crate, unwraps are acceptable"
)]
#![allow(
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss,
    reason = "test utility crate, fragment index arithmetic"
)]

//! Shared test utilities for the rivulet workspace.

pub mod clock;
pub mod http_server;
pub mod net;
pub mod resolver;
pub mod sink;
pub mod tracing;

pub use clock::ManualClock;
pub use http_server::{TestHttpServer, fragment_router};
pub use net::ScriptedNet;
pub use resolver::FakeResolver;
pub use sink::MemorySink;
pub use tracing::init_tracing;
