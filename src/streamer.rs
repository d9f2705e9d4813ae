use crate::filter::StreamFilter;
use crate::kubernetes::{LineStream, LogSource};
use crate::registry::{StreamLease, StreamRegistry};
use crate::sink::LineSink;
use crate::types::{PodIdentity, StreamState};
use futures::StreamExt;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Everything a per-pod streamer task needs, shared by all of them.
#[derive(Clone)]
pub struct StreamContext {
    pub source: Arc<dyn LogSource>,
    pub sink: Arc<dyn LineSink>,
    pub registry: Arc<StreamRegistry>,
    pub filter: Arc<StreamFilter>,
    pub retry_delay: Duration,
}

enum StreamEnd {
    Cancelled,
    Closed,
    Failed(io::Error),
}

enum Phase {
    Connecting,
    Streaming(LineStream),
    Backoff,
    Stopped,
}

impl Phase {
    fn state(&self) -> StreamState {
        match self {
            Phase::Connecting | Phase::Backoff => StreamState::Connecting,
            Phase::Streaming(_) => StreamState::Streaming,
            Phase::Stopped => StreamState::Stopped,
        }
    }
}

/// Follows one pod's logs until the lease is cancelled, reconnecting after
/// `retry_delay` whenever opening or reading the stream fails. Always
/// releases the lease on exit.
pub async fn stream_pod_logs(ctx: StreamContext, pod: PodIdentity, lease: StreamLease) {
    let cancel = lease.cancellation().clone();
    info!(pod = %pod, pattern = ctx.filter.pattern(), "Streaming logs");

    let mut phase = Phase::Connecting;
    loop {
        debug!(pod = %pod, state = %phase.state(), "Log streamer transition");
        phase = match phase {
            Phase::Connecting => {
                let opened = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => Err(None),
                    opened = ctx.source.follow(&pod) => opened.map_err(Some),
                };
                match opened {
                    Ok(lines) => {
                        info!(pod = %pod, "Successfully started log stream");
                        Phase::Streaming(lines)
                    }
                    Err(None) => Phase::Stopped,
                    Err(Some(e)) => {
                        error!(pod = %pod, "{}. Retrying in {:?}", e, ctx.retry_delay);
                        Phase::Backoff
                    }
                }
            }
            Phase::Streaming(lines) => match stream_lines(&ctx, lines, &cancel).await {
                StreamEnd::Cancelled => Phase::Stopped,
                StreamEnd::Closed => {
                    warn!(pod = %pod, "Log stream closed. Restarting in {:?}", ctx.retry_delay);
                    Phase::Backoff
                }
                StreamEnd::Failed(e) => {
                    error!(pod = %pod, "Error reading logs: {}. Restarting in {:?}", e, ctx.retry_delay);
                    Phase::Backoff
                }
            },
            Phase::Backoff => {
                if wait_or_cancel(&cancel, ctx.retry_delay).await {
                    Phase::Connecting
                } else {
                    Phase::Stopped
                }
            }
            Phase::Stopped => break,
        };
    }

    ctx.registry.release(&lease);
    info!(pod = %pod, "Stopped log streaming");
}

/// Forwards matching lines in arrival order. Dropping `lines` closes the
/// underlying connection.
async fn stream_lines(
    ctx: &StreamContext,
    mut lines: LineStream,
    cancel: &CancellationToken,
) -> StreamEnd {
    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return StreamEnd::Cancelled,
            next = lines.next() => next,
        };

        match next {
            Some(Ok(line)) => {
                if ctx.filter.matches(&line)
                    && let Err(e) = ctx.sink.write_line(&line)
                {
                    warn!("Failed to write log line: {}", e);
                }
            }
            Some(Err(e)) => return StreamEnd::Failed(e),
            None => return StreamEnd::Closed,
        }
    }
}

/// Sleeps for `delay`; returns `false` if cancelled first.
pub async fn wait_or_cancel(cancel: &CancellationToken, delay: Duration) -> bool {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}
