use crate::types::{PodEvent, PodIdentity};
use anyhow::Context;
use futures::future::{BoxFuture, ready};
use futures::io::{AsyncBufRead, AsyncBufReadExt};
use futures::stream::{self, BoxStream, StreamExt};
use k8s_openapi::api::core::v1::Pod;
use kube::api::{LogParams, WatchEvent, WatchParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Api, Client, Config};
use std::io;
use std::path::Path;
use tracing::{debug, info, warn};

pub type EventStream = BoxStream<'static, Result<PodEvent, SourceError>>;
/// Raw log lines with the trailing `\n` (and `\r`) removed.
pub type LineStream = BoxStream<'static, io::Result<Vec<u8>>>;

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("failed to open watch on pods in {namespace} ({selector}): {source}")]
    Subscribe {
        namespace: String,
        selector: String,
        #[source]
        source: kube::Error,
    },
    #[error("watch stream error: {0}")]
    Watch(#[source] kube::Error),
    #[error("failed to open log stream for pod {pod}: {source}")]
    Logs {
        pod: String,
        #[source]
        source: kube::Error,
    },
    #[cfg(test)]
    #[error("{0}")]
    Other(String),
}

/// A source of pod lifecycle events. Each call to `watch` opens one
/// subscription; the returned stream ending means the server closed it.
pub trait PodSource: Send + Sync {
    fn watch<'a>(
        &'a self,
        namespace: &'a str,
        selector: &'a str,
    ) -> BoxFuture<'a, Result<EventStream, SourceError>>;
}

/// A source of follow-mode pod logs, one line per item.
pub trait LogSource: Send + Sync {
    fn follow<'a>(&'a self, pod: &'a PodIdentity) -> BoxFuture<'a, Result<LineStream, SourceError>>;
}

/// Builds a client, preferring in-cluster credentials, then an explicit
/// kubeconfig path, then the default inference chain.
pub async fn connect(kubeconfig: Option<&Path>) -> anyhow::Result<Client> {
    debug!("Attempting in-cluster configuration");
    let in_cluster_err = match Config::incluster() {
        Ok(config) => {
            info!("Using in-cluster configuration");
            return Client::try_from(config)
                .context("Failed to create Kubernetes client from in-cluster config");
        }
        Err(e) => e,
    };
    warn!("In-cluster configuration unavailable: {}", in_cluster_err);

    if let Some(path) = kubeconfig {
        debug!("Loading kubeconfig from {}", path.display());
        let kubeconfig = Kubeconfig::read_from(path)
            .with_context(|| format!("Failed to read kubeconfig {}", path.display()))?;
        let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
            .await
            .with_context(|| format!("Invalid kubeconfig {}", path.display()))?;
        info!("Using kubeconfig {}", path.display());
        return Client::try_from(config)
            .context("Failed to create Kubernetes client from kubeconfig");
    }

    debug!("No kubeconfig path given, inferring configuration");
    let config = Config::infer()
        .await
        .context("Failed to configure Kubernetes client. Ensure the pod has a service account or KUBECONFIG is set")?;
    Client::try_from(config).context("Failed to create Kubernetes client")
}

/// Maps a raw watch event to a `PodEvent`. Returns `None` for pod objects
/// without a name.
pub fn translate(event: WatchEvent<Pod>, namespace: &str) -> Option<PodEvent> {
    match event {
        WatchEvent::Added(pod) => pod_identity(&pod, namespace).map(PodEvent::Added),
        WatchEvent::Modified(pod) => pod_identity(&pod, namespace).map(PodEvent::Modified),
        WatchEvent::Deleted(pod) => pod_identity(&pod, namespace).map(PodEvent::Deleted),
        WatchEvent::Bookmark(_) => Some(PodEvent::Other("Bookmark".to_string())),
        WatchEvent::Error(err) => Some(PodEvent::Other(format!("Error: {:?}", err))),
    }
}

fn pod_identity(pod: &Pod, namespace: &str) -> Option<PodIdentity> {
    let name = pod.metadata.name.as_ref()?;
    let namespace = pod.metadata.namespace.as_deref().unwrap_or(namespace);
    Some(PodIdentity::new(name.clone(), namespace))
}

#[derive(Clone)]
pub struct KubePodSource {
    client: Client,
}

impl KubePodSource {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

impl PodSource for KubePodSource {
    fn watch<'a>(
        &'a self,
        namespace: &'a str,
        selector: &'a str,
    ) -> BoxFuture<'a, Result<EventStream, SourceError>> {
        Box::pin(async move {
            let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
            let wp = WatchParams::default().labels(selector);
            // "0" replays current pods as Added before live events.
            let stream = api
                .watch(&wp, "0")
                .await
                .map_err(|source| SourceError::Subscribe {
                    namespace: namespace.to_string(),
                    selector: selector.to_string(),
                    source,
                })?;

            let ns = namespace.to_string();
            let events = stream.filter_map(move |item| {
                let mapped = match item {
                    Ok(event) => match translate(event, &ns) {
                        Some(event) => Some(Ok(event)),
                        None => {
                            warn!("Ignoring pod watch event without a pod name");
                            None
                        }
                    },
                    Err(e) => Some(Err(SourceError::Watch(e))),
                };
                ready(mapped)
            });
            Ok(events.boxed())
        })
    }
}

#[derive(Clone)]
pub struct KubeLogSource {
    client: Client,
}

impl KubeLogSource {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

impl LogSource for KubeLogSource {
    fn follow<'a>(&'a self, pod: &'a PodIdentity) -> BoxFuture<'a, Result<LineStream, SourceError>> {
        Box::pin(async move {
            let api: Api<Pod> = Api::namespaced(self.client.clone(), &pod.namespace);
            let lp = LogParams {
                follow: true,
                ..Default::default()
            };
            let reader = api
                .log_stream(&pod.name, &lp)
                .await
                .map_err(|source| SourceError::Logs {
                    pod: pod.to_string(),
                    source,
                })?;
            Ok(byte_lines(reader))
        })
    }
}

/// Splits a reader into lines on `\n` without UTF-8 validation, so one bad
/// byte doesn't end the stream.
pub fn byte_lines<R>(reader: R) -> LineStream
where
    R: AsyncBufRead + Send + 'static,
{
    stream::unfold(Box::pin(reader), |mut reader| async move {
        let mut line = Vec::new();
        match reader.read_until(b'\n', &mut line).await {
            Ok(0) => None,
            Ok(_) => {
                if line.last() == Some(&b'\n') {
                    line.pop();
                    if line.last() == Some(&b'\r') {
                        line.pop();
                    }
                }
                Some((Ok(line), reader))
            }
            Err(e) => Some((Err(e), reader)),
        }
    })
    .boxed()
}
