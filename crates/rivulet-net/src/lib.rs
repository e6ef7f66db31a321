#![forbid(unsafe_code)]

//! HTTP transport used by the fragment loader.

mod client;
mod error;
mod retry;
mod timeout;
mod traits;
mod types;

#[cfg(any(test, feature = "test-utils"))]
pub use crate::traits::MockNet;
pub use crate::{
    client::HttpClient,
    error::{NetError, NetResult},
    retry::RetryNet,
    timeout::TimeoutNet,
    traits::{ByteStream, Net, NetExt},
    types::{Headers, NetOptions, RangeSpec, RetryPolicy},
};
