//! Shared async HTTP test server helpers.

use axum::{
    Router,
    extract::Path,
    http::StatusCode,
    response::IntoResponse,
    routing::get,
};
use tokio::net::TcpListener;
use url::Url;

/// Lightweight HTTP test server wrapper.
pub struct TestHttpServer {
    base_url: Url,
    shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
}

impl TestHttpServer {
    /// Spawn `router` on a random localhost port.
    ///
    /// # Panics
    ///
    /// Panics if listener bind or URL parsing fails.
    pub async fn new(router: Router) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind test HTTP listener");
        let addr = listener
            .local_addr()
            .expect("read test listener local addr");

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
        let server = axum::serve(listener, router).with_graceful_shutdown(async {
            shutdown_rx.await.ok();
        });

        tokio::spawn(async move {
            server.await.expect("run test HTTP server");
        });

        Self {
            base_url: Url::parse(&format!("http://{addr}/")).expect("parse base URL"),
            shutdown_tx: Some(shutdown_tx),
        }
    }

    /// Join path to server base URL.
    ///
    /// # Panics
    ///
    /// Panics if URL join fails.
    #[must_use]
    pub fn url(&self, path: &str) -> Url {
        self.base_url.join(path).expect("join server URL path")
    }

    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }
}

impl Drop for TestHttpServer {
    fn drop(&mut self) {
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(());
        }
    }
}

/// Serves `/{representation}/{file}` with a body of `size` bytes, the way
/// [`FakeResolver`](crate::FakeResolver) lays out its fragments. Fragment
/// indices at or after `missing_from` answer 404.
pub fn fragment_router(size: usize, missing_from: Option<u64>) -> Router {
    Router::new().route(
        "/{representation}/{file}",
        get(move |Path((_, file)): Path<(String, String)>| async move {
            let index = file
                .strip_suffix(".m4s")
                .and_then(|i| i.parse::<u64>().ok());
            match (index, missing_from) {
                (Some(index), Some(limit)) if index >= limit => StatusCode::NOT_FOUND.into_response(),
                _ => (StatusCode::OK, vec![0u8; size]).into_response(),
            }
        }),
    )
}
