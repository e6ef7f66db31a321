use async_trait::async_trait;
use bytes::Bytes;
use futures::TryStreamExt;
use reqwest::{Client, RequestBuilder, Response};
use tracing::trace;
use url::Url;

use crate::{
    error::{NetError, NetResult},
    traits::{ByteStream, Net},
    types::{Headers, NetOptions, RangeSpec},
};

/// [`Net`] implementation backed by `reqwest`.
#[derive(Clone, Debug)]
pub struct HttpClient {
    inner: Client,
    options: NetOptions,
}

impl HttpClient {
    /// # Errors
    ///
    /// Returns [`NetError::Http`] if the underlying client cannot be built.
    pub fn new(options: NetOptions) -> NetResult<Self> {
        let inner = Client::builder()
            .pool_max_idle_per_host(options.pool_max_idle_per_host)
            .build()
            .map_err(|e| NetError::http(format!("failed to build client: {e}")))?;
        Ok(Self { inner, options })
    }

    pub fn options(&self) -> &NetOptions {
        &self.options
    }

    fn apply_headers(&self, mut req: RequestBuilder, headers: Option<Headers>) -> RequestBuilder {
        for (k, v) in self.options.headers.merged(headers.as_ref()).iter() {
            req = req.header(k, v);
        }
        req
    }

    async fn send(&self, url: &Url, req: RequestBuilder) -> NetResult<Response> {
        let resp = req.send().await.map_err(NetError::from)?;
        let status = resp.status();
        trace!(url = %url, status = status.as_u16(), "response received");
        if !status.is_success() {
            return Err(NetError::http_status(status.as_u16(), url.as_str()));
        }
        Ok(resp)
    }
}

#[async_trait]
impl Net for HttpClient {
    async fn get_bytes(&self, url: Url, headers: Option<Headers>) -> Result<Bytes, NetError> {
        let req = self
            .apply_headers(self.inner.get(url.clone()), headers)
            .timeout(self.options.request_timeout);
        let resp = self.send(&url, req).await?;
        resp.bytes().await.map_err(NetError::from)
    }

    async fn stream(&self, url: Url, headers: Option<Headers>) -> Result<ByteStream, NetError> {
        // Body transfer is not bounded by the request timeout.
        let req = self.apply_headers(self.inner.get(url.clone()), headers);
        let resp = self.send(&url, req).await?;
        Ok(Box::pin(resp.bytes_stream().map_err(NetError::from)))
    }

    async fn get_range(
        &self,
        url: Url,
        range: RangeSpec,
        headers: Option<Headers>,
    ) -> Result<ByteStream, NetError> {
        if range.end.is_some_and(|end| end < range.start) {
            return Err(NetError::InvalidRange(range.to_string()));
        }
        let req = self
            .apply_headers(self.inner.get(url.clone()), headers)
            .header("Range", range.to_header_value());
        let resp = self.send(&url, req).await?;
        Ok(Box::pin(resp.bytes_stream().map_err(NetError::from)))
    }

    async fn head(&self, url: Url, headers: Option<Headers>) -> Result<Headers, NetError> {
        let req = self
            .apply_headers(self.inner.head(url.clone()), headers)
            .timeout(self.options.request_timeout);
        let resp = self.send(&url, req).await?;

        Ok(resp
            .headers()
            .iter()
            .filter_map(|(name, value)| value.to_str().ok().map(|v| (name.as_str(), v)))
            .collect())
    }
}
