use std::{future::Future, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;
use url::Url;

use crate::{
    error::{NetError, NetResult},
    traits::{ByteStream, Net},
    types::{Headers, RangeSpec},
};

/// Bounds the request/response phase of every call on the inner [`Net`].
pub struct TimeoutNet<N> {
    inner: N,
    timeout: Duration,
}

impl<N: Net> TimeoutNet<N> {
    pub fn new(inner: N, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    async fn bounded<T>(&self, fut: impl Future<Output = NetResult<T>>) -> NetResult<T> {
        tokio::time::timeout(self.timeout, fut)
            .await
            .map_err(|_| NetError::Timeout)?
    }
}

#[async_trait]
impl<N: Net> Net for TimeoutNet<N> {
    async fn get_bytes(&self, url: Url, headers: Option<Headers>) -> Result<Bytes, NetError> {
        self.bounded(self.inner.get_bytes(url, headers)).await
    }

    // Streams are bounded until the response head arrives, not for the whole body.
    async fn stream(&self, url: Url, headers: Option<Headers>) -> Result<ByteStream, NetError> {
        self.bounded(self.inner.stream(url, headers)).await
    }

    async fn get_range(
        &self,
        url: Url,
        range: RangeSpec,
        headers: Option<Headers>,
    ) -> Result<ByteStream, NetError> {
        self.bounded(self.inner.get_range(url, range, headers)).await
    }

    async fn head(&self, url: Url, headers: Option<Headers>) -> Result<Headers, NetError> {
        self.bounded(self.inner.head(url, headers)).await
    }
}
