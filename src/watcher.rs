use crate::kubernetes::{EventStream, PodSource, SourceError};
use crate::streamer::{StreamContext, stream_pod_logs, wait_or_cancel};
use crate::types::PodEvent;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

/// Configuration for watching the ingress controller pods
#[derive(Debug, Clone)]
pub struct WatchConfig {
    pub namespace: String,
    pub selector: String,
    pub rewatch_delay: Duration,
    /// Cancel a pod's streamer when its Deleted event arrives, instead of
    /// only dropping the registry entry and letting the stream run out.
    pub stop_on_delete: bool,
}

pub struct PodWatcher {
    source: Arc<dyn PodSource>,
    stream_ctx: StreamContext,
    tracker: TaskTracker,
    config: WatchConfig,
}

impl PodWatcher {
    pub fn new(
        source: Arc<dyn PodSource>,
        stream_ctx: StreamContext,
        tracker: TaskTracker,
        config: WatchConfig,
    ) -> Self {
        Self {
            source,
            stream_ctx,
            tracker,
            config,
        }
    }

    /// Watches pods until `cancel` fires. Only a failure to open the first
    /// subscription is returned as an error; later closures are resubscribed
    /// after `rewatch_delay`.
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), SourceError> {
        info!(
            namespace = %self.config.namespace,
            selector = %self.config.selector,
            "Watching ingress controller pods for changes"
        );

        let mut events = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(()),
            opened = self.subscribe() => opened?,
        };

        loop {
            self.consume(&mut events, &cancel).await;
            if cancel.is_cancelled() {
                break;
            }
            warn!(
                "Pod watcher channel closed, resubscribing in {:?}",
                self.config.rewatch_delay
            );
            events = match self.resubscribe(&cancel).await {
                Some(events) => events,
                None => break,
            };
        }

        info!("Stopping pod watcher");
        Ok(())
    }

    async fn subscribe(&self) -> Result<EventStream, SourceError> {
        self.source
            .watch(&self.config.namespace, &self.config.selector)
            .await
    }

    async fn resubscribe(&self, cancel: &CancellationToken) -> Option<EventStream> {
        loop {
            if !wait_or_cancel(cancel, self.config.rewatch_delay).await {
                return None;
            }
            let opened = tokio::select! {
                biased;
                _ = cancel.cancelled() => return None,
                opened = self.subscribe() => opened,
            };
            match opened {
                Ok(events) => {
                    debug!("Pod watch re-established");
                    return Some(events);
                }
                Err(e) => error!(
                    "{}. Retrying in {:?}",
                    e, self.config.rewatch_delay
                ),
            }
        }
    }

    /// Drains one subscription until it closes or `cancel` fires.
    async fn consume(&self, events: &mut EventStream, cancel: &CancellationToken) {
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                next = events.next() => next,
            };
            match next {
                Some(Ok(event)) => self.handle_event(event),
                Some(Err(e)) => warn!("Skipping pod watch event: {}", e),
                None => return,
            }
        }
    }

    fn handle_event(&self, event: PodEvent) {
        let registry = &self.stream_ctx.registry;
        match event {
            PodEvent::Added(pod) | PodEvent::Modified(pod) => {
                debug!(pod = %pod, "Received pod event");
                if let Some(lease) = registry.try_register(&pod.name) {
                    info!(pod = %pod, "Starting log stream for new/updated pod");
                    self.tracker
                        .spawn(stream_pod_logs(self.stream_ctx.clone(), pod, lease));
                }
            }
            PodEvent::Deleted(pod) => {
                let removed = if self.config.stop_on_delete {
                    registry.cancel(&pod.name)
                } else {
                    registry.unregister(&pod.name)
                };
                if removed {
                    info!(pod = %pod, "Pod deleted, stopping log stream");
                } else {
                    debug!(pod = %pod, "Pod deleted with no active log stream");
                }
            }
            PodEvent::Other(kind) => debug!("Unhandled pod watch event: {}", kind),
        }
    }
}
