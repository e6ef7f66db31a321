#![forbid(unsafe_code)]

//! Primitives shared by every rivulet crate: the closed set of media types,
//! a fixed per-media-type map and presentation time ranges.

mod error;
mod media;
mod range;

pub use error::{CoreError, CoreResult};
pub use media::{MediaType, PerMedia};
pub use range::TimeRange;
