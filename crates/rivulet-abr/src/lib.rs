//! Adaptive bitrate decision engine.
//!
//! The engine looks at the most recent completed fragment download of a media
//! type and recommends the quality index to fetch next, together with the
//! direction of the switch. It works with any manifest format through the
//! [`VariantSource`] trait.
//!
//! ## Example
//!
//! ```rust
//! use std::time::{Duration, Instant};
//!
//! use rivulet_abr::{AbrContext, AbrController, AbrOptions, ThroughputSample, Variant};
//! use rivulet_core::MediaType;
//!
//! let variants = vec![
//!     Variant { variant_index: 0, bandwidth_bps: 500_000 },
//!     Variant { variant_index: 1, bandwidth_bps: 1_000_000 },
//! ];
//! let mut abr = AbrController::new(AbrOptions::default());
//! let start = Instant::now();
//! let sample = ThroughputSample {
//!     request_id: 1,
//!     bytes: 500_000,
//!     request_start: start,
//!     finish: start + Duration::from_secs(1),
//!     media_duration: 2.0,
//!     status: Some(200),
//! };
//! let ctx = AbrContext { buffer_level: 10.0, min_buffer_time: 4.0, last_request_aborted: false };
//! let decision = abr.decide(MediaType::Video, &variants, Some(&sample), &ctx);
//! assert_eq!(decision.target_quality, 1);
//! ```

#![forbid(unsafe_code)]

mod controller;
mod history;
mod types;

pub use controller::{AbrController, AbrDecision, AbrReason};
pub use history::ThroughputHistory;
pub use types::{
    AbrContext, AbrMode, AbrOptions, SwitchDirection, ThroughputSample, Variant, VariantSource,
};
