use std::future::Future;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::time::sleep;
use tracing::debug;
use url::Url;

use crate::{
    error::{NetError, NetResult},
    traits::{ByteStream, Net},
    types::{Headers, RangeSpec, RetryPolicy},
};

/// Retry decorator for [`Net`] implementations.
///
/// Only errors for which [`NetError::is_retryable`] holds are retried; the
/// last error is wrapped in [`NetError::RetryExhausted`] once the policy runs
/// out of attempts.
pub struct RetryNet<N> {
    inner: N,
    policy: RetryPolicy,
}

impl<N: Net> RetryNet<N> {
    pub fn new(inner: N, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    async fn retrying<T, F, Fut>(&self, url: &Url, mut op: F) -> NetResult<T>
    where
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = NetResult<T>> + Send,
        T: Send,
    {
        let mut attempt = 0;
        loop {
            let delay = self.policy.delay_for_attempt(attempt);
            if !delay.is_zero() {
                sleep(delay).await;
            }
            match op().await {
                Ok(value) => return Ok(value),
                Err(error) if !error.is_retryable() => return Err(error),
                Err(error) if attempt >= self.policy.max_retries => {
                    if self.policy.max_retries == 0 {
                        return Err(error);
                    }
                    return Err(NetError::RetryExhausted {
                        max_retries: self.policy.max_retries,
                        source: Box::new(error),
                    });
                }
                Err(error) => {
                    debug!(url = %url, attempt, %error, "retrying request");
                    attempt += 1;
                }
            }
        }
    }
}

#[async_trait]
impl<N: Net> Net for RetryNet<N> {
    async fn get_bytes(&self, url: Url, headers: Option<Headers>) -> Result<Bytes, NetError> {
        self.retrying(&url, || self.inner.get_bytes(url.clone(), headers.clone()))
            .await
    }

    async fn stream(&self, url: Url, headers: Option<Headers>) -> Result<ByteStream, NetError> {
        self.retrying(&url, || self.inner.stream(url.clone(), headers.clone()))
            .await
    }

    async fn get_range(
        &self,
        url: Url,
        range: RangeSpec,
        headers: Option<Headers>,
    ) -> Result<ByteStream, NetError> {
        self.retrying(&url, || {
            self.inner.get_range(url.clone(), range, headers.clone())
        })
        .await
    }

    async fn head(&self, url: Url, headers: Option<Headers>) -> Result<Headers, NetError> {
        self.retrying(&url, || self.inner.head(url.clone(), headers.clone()))
            .await
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use bytes::Bytes;
    use mockall::Sequence;
    use rstest::rstest;

    use super::*;
    use crate::{traits::MockNet, NetExt};

    fn url() -> Url {
        Url::parse("http://localhost/video/1.m4s").expect("url")
    }

    #[tokio::test(start_paused = true)]
    async fn retries_transient_error_then_succeeds() {
        let mut inner = MockNet::new();
        let mut seq = Sequence::new();
        inner
            .expect_get_bytes()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Err(NetError::http_status(503, "u")));
        inner
            .expect_get_bytes()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(Bytes::from_static(b"moof")));

        let net = inner.with_retry(RetryPolicy::new(2, Duration::from_millis(10)));
        let body = net.get_bytes(url(), None).await.expect("retried");
        assert_eq!(body, Bytes::from_static(b"moof"));
    }

    #[rstest]
    #[case::not_found(NetError::http_status(404, "u"))]
    #[case::cancelled(NetError::Cancelled)]
    #[tokio::test(start_paused = true)]
    async fn permanent_error_is_not_retried(#[case] error: NetError) {
        let mut inner = MockNet::new();
        let returned = error.clone();
        inner
            .expect_head()
            .times(1)
            .returning(move |_, _| Err(returned.clone()));

        let net = RetryNet::new(inner, RetryPolicy::new(3, Duration::from_millis(10)));
        assert_eq!(net.head(url(), None).await, Err(error));
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_wrap_last_error() {
        let mut inner = MockNet::new();
        inner
            .expect_get_bytes()
            .times(3)
            .returning(|_, _| Err(NetError::Timeout));

        let net = RetryNet::new(inner, RetryPolicy::new(2, Duration::from_millis(10)));
        let err = net.get_bytes(url(), None).await.expect_err("must fail");
        assert_eq!(
            err,
            NetError::RetryExhausted {
                max_retries: 2,
                source: Box::new(NetError::Timeout),
            }
        );
        assert!(err.is_timeout());
    }

    #[tokio::test(start_paused = true)]
    async fn zero_retries_returns_error_unchanged() {
        let mut inner = MockNet::new();
        inner
            .expect_get_bytes()
            .times(1)
            .returning(|_, _| Err(NetError::Timeout));

        let net = RetryNet::new(inner, RetryPolicy::default());
        assert_eq!(net.get_bytes(url(), None).await, Err(NetError::Timeout));
    }
}
