use std::{sync::Arc, time::Instant};

use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use rivulet_net::{Net, NetError, RangeSpec, RetryPolicy};
use tokio::{sync::mpsc, time::sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};
use url::Url;

use crate::{
    config::TransferMode,
    types::{RequestId, now},
};

/// Progress report of a spawned fragment transfer.
#[derive(Debug)]
pub enum TransportEvent {
    Started {
        id: RequestId,
        at: Instant,
    },
    Progress {
        id: RequestId,
        chunk: Bytes,
        loaded: u64,
        at: Instant,
    },
    /// The transfer failed and starts over from the first byte. Progress
    /// reported so far is void.
    Restarted {
        id: RequestId,
        attempt: u32,
    },
    /// Body is empty in progressive mode, where it was already delivered as progress.
    Completed {
        id: RequestId,
        body: Bytes,
        at: Instant,
    },
    Failed {
        id: RequestId,
        error: NetError,
        at: Instant,
    },
    /// Sent instead of any other terminal event once the transfer is cancelled.
    Aborted {
        id: RequestId,
    },
}

impl TransportEvent {
    pub fn request_id(&self) -> RequestId {
        match self {
            TransportEvent::Started { id, .. }
            | TransportEvent::Progress { id, .. }
            | TransportEvent::Restarted { id, .. }
            | TransportEvent::Completed { id, .. }
            | TransportEvent::Failed { id, .. }
            | TransportEvent::Aborted { id } => *id,
        }
    }
}

pub(crate) struct FetchJob {
    pub id: RequestId,
    pub url: Url,
    pub range: Option<RangeSpec>,
    pub mode: TransferMode,
    pub retry: RetryPolicy,
}

pub(crate) async fn run_fetch(
    net: Arc<dyn Net>,
    job: FetchJob,
    cancel: CancellationToken,
    tx: mpsc::UnboundedSender<TransportEvent>,
) {
    let id = job.id;
    let _ = tx.send(TransportEvent::Started { id, at: now() });

    let outcome = tokio::select! {
        biased;
        () = cancel.cancelled() => None,
        result = transfer_with_retry(net.as_ref(), &job, &tx) => Some(result),
    };

    let event = match outcome {
        None => TransportEvent::Aborted { id },
        Some(Ok(body)) => TransportEvent::Completed {
            id,
            body,
            at: now(),
        },
        Some(Err(error)) => TransportEvent::Failed {
            id,
            error,
            at: now(),
        },
    };
    trace!(id, url = %job.url, "transfer finished");
    let _ = tx.send(event);
}

/// Run the whole transfer, opening and draining, again on retryable
/// failures until the policy runs out of attempts.
async fn transfer_with_retry(
    net: &dyn Net,
    job: &FetchJob,
    tx: &mpsc::UnboundedSender<TransportEvent>,
) -> Result<Bytes, NetError> {
    let mut attempt = 0;
    loop {
        let delay = job.retry.delay_for_attempt(attempt);
        if !delay.is_zero() {
            sleep(delay).await;
        }
        match transfer(net, job, tx).await {
            Err(error) if error.is_retryable() && attempt < job.retry.max_retries => {
                attempt += 1;
                debug!(id = job.id, url = %job.url, attempt, %error, "transfer failed, retrying");
                let _ = tx.send(TransportEvent::Restarted { id: job.id, attempt });
            }
            result => return result,
        }
    }
}

async fn transfer(
    net: &dyn Net,
    job: &FetchJob,
    tx: &mpsc::UnboundedSender<TransportEvent>,
) -> Result<Bytes, NetError> {
    let mut stream = match job.range {
        Some(range) => net.get_range(job.url.clone(), range, None).await?,
        None => net.stream(job.url.clone(), None).await?,
    };

    let mut body = BytesMut::new();
    let mut loaded = 0_u64;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        loaded += chunk.len() as u64;
        if job.mode == TransferMode::Buffered {
            body.extend_from_slice(&chunk);
        }
        let _ = tx.send(TransportEvent::Progress {
            id: job.id,
            chunk,
            loaded,
            at: now(),
        });
    }
    Ok(body.freeze())
}
