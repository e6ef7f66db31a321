//! In-process [`Net`] with scripted responses.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream;
use parking_lot::Mutex;
use rivulet_net::{ByteStream, Headers, Net, NetError, RangeSpec};
use url::Url;

type Handler = Arc<dyn Fn(&Url) -> Option<Result<Bytes, NetError>> + Send + Sync>;

/// Answers every request with a fixed-size body unless a handler overrides it.
/// Each request is recorded and can be delayed on the tokio clock.
#[derive(Clone)]
pub struct ScriptedNet {
    body_len: usize,
    delay: Duration,
    slow: Arc<Mutex<Option<(String, Duration)>>>,
    handler: Option<Handler>,
    body_failures: Arc<Mutex<Vec<(String, usize)>>>,
    calls: Arc<Mutex<Vec<Url>>>,
}

impl ScriptedNet {
    pub fn new(body_len: usize) -> Self {
        Self {
            body_len,
            delay: Duration::ZERO,
            slow: Arc::new(Mutex::new(None)),
            handler: None,
            body_failures: Arc::new(Mutex::new(Vec::new())),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// The first request whose path ends with `suffix` takes `delay` to answer.
    #[must_use]
    pub fn with_slow(self, suffix: &str, delay: Duration) -> Self {
        *self.slow.lock() = Some((suffix.to_owned(), delay));
        self
    }

    /// Break the body of the next `times` streamed responses whose path ends
    /// with `suffix`: the first half arrives, then the connection drops.
    #[must_use]
    pub fn with_body_failure(self, suffix: &str, times: usize) -> Self {
        self.body_failures.lock().push((suffix.to_owned(), times));
        self
    }

    /// `handler` returning `None` falls back to the default body.
    #[must_use]
    pub fn with_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&Url) -> Option<Result<Bytes, NetError>> + Send + Sync + 'static,
    {
        self.handler = Some(Arc::new(handler));
        self
    }

    pub fn calls(&self) -> Vec<Url> {
        self.calls.lock().clone()
    }

    /// Number of requests whose path ends with `suffix`.
    pub fn count_calls(&self, suffix: &str) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|u| u.path().ends_with(suffix))
            .count()
    }

    fn take_body_failure(&self, url: &Url) -> bool {
        let mut failures = self.body_failures.lock();
        let Some((_, remaining)) = failures
            .iter_mut()
            .find(|(suffix, remaining)| *remaining > 0 && url.path().ends_with(suffix.as_str()))
        else {
            return false;
        };
        *remaining -= 1;
        true
    }

    async fn respond(&self, url: &Url) -> Result<Bytes, NetError> {
        self.calls.lock().push(url.clone());
        let delay = {
            let mut slow = self.slow.lock();
            match slow.take_if(|(suffix, _)| url.path().ends_with(suffix.as_str())) {
                Some((_, delay)) => delay,
                None => self.delay,
            }
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        match self.handler.as_ref().and_then(|h| h(url)) {
            Some(result) => result,
            None => Ok(Bytes::from(vec![0u8; self.body_len])),
        }
    }
}

#[async_trait]
impl Net for ScriptedNet {
    async fn get_bytes(&self, url: Url, _: Option<Headers>) -> Result<Bytes, NetError> {
        self.respond(&url).await
    }

    async fn stream(&self, url: Url, _: Option<Headers>) -> Result<ByteStream, NetError> {
        let body = self.respond(&url).await?;
        let half = body.len() / 2;
        let rest = if self.take_body_failure(&url) {
            Err(NetError::http("connection reset by peer"))
        } else {
            Ok(body.slice(half..))
        };
        let chunks = vec![Ok(body.slice(..half)), rest];
        Ok(Box::pin(stream::iter(chunks)))
    }

    async fn get_range(
        &self,
        url: Url,
        range: RangeSpec,
        _: Option<Headers>,
    ) -> Result<ByteStream, NetError> {
        let body = self.respond(&url).await?;
        let start = (range.start as usize).min(body.len());
        let end = range
            .end
            .map_or(body.len(), |end| (end as usize + 1).min(body.len()));
        Ok(Box::pin(stream::iter(vec![Ok(body.slice(start..end.max(start)))])))
    }

    async fn head(&self, url: Url, _: Option<Headers>) -> Result<Headers, NetError> {
        self.respond(&url).await.map(|_| Headers::new())
    }
}
