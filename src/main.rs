mod cli;
mod filter;
mod kubernetes;
mod registry;
mod shutdown;
mod sink;
mod streamer;
mod types;
mod watcher;

use anyhow::Context;
use clap::Parser;
use std::sync::Arc;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use cli::Cli;
use filter::StreamFilter;
use kubernetes::{KubeLogSource, KubePodSource};
use registry::StreamRegistry;
use shutdown::ShutdownCoordinator;
use sink::StdoutSink;
use streamer::StreamContext;
use watcher::{PodWatcher, WatchConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // stdout carries the shipped log lines; diagnostics go to stderr.
    let filter = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    info!("Starting reflow-ingress-logs");
    for (key, value) in cli::invalid_env_flags() {
        warn!("Error parsing {} value '{}' as bool. Using default value", key, value);
    }

    cli.validate().context("Configuration validation failed")?;
    if cli.debug {
        match cli.to_yaml() {
            Ok(yaml) => debug!("Configuration loaded:\n{}", yaml),
            Err(e) => warn!("Could not render configuration: {}", e),
        }
    }
    info!("Configuration loaded and validated");

    let client = kubernetes::connect(cli.kubeconfig.as_deref())
        .await
        .context("Failed to connect to Kubernetes")?;
    info!("Connected to Kubernetes");

    run(cli, client).await
}

async fn run(cli: Cli, client: kube::Client) -> anyhow::Result<()> {
    let shutdown = ShutdownCoordinator::new();
    let tracker = TaskTracker::new();
    let options = cli.engine_options();

    let stream_ctx = StreamContext {
        source: Arc::new(KubeLogSource::new(client.clone())),
        sink: Arc::new(StdoutSink),
        registry: Arc::new(StreamRegistry::new(shutdown.token())),
        filter: Arc::new(StreamFilter::new(&cli.filter_config())),
        retry_delay: options.retry_delay,
    };
    let watcher = PodWatcher::new(
        Arc::new(KubePodSource::new(client)),
        stream_ctx,
        tracker.clone(),
        WatchConfig {
            namespace: cli.ingress_namespace.clone(),
            selector: cli.label_selector.clone(),
            rewatch_delay: options.rewatch_delay,
            stop_on_delete: options.stop_on_delete,
        },
    );

    let token = shutdown.token();
    let mut watch_task = tokio::spawn(async move { watcher.run(token).await });

    let outcome = tokio::select! {
        res = &mut watch_task => {
            // The watcher only returns early when the first watch can't be set up.
            shutdown.trigger();
            Some(res)
        }
        res = shutdown.wait_for_signal() => {
            if let Err(e) = res {
                error!("Failed to listen for shutdown signals: {}", e);
                shutdown.trigger();
            }
            None
        }
    };
    let watch_result = match outcome {
        Some(res) => res,
        None => watch_task.await,
    };

    tracker.close();
    let grace = options.shutdown_grace;
    if tokio::time::timeout(grace, tracker.wait()).await.is_err() {
        warn!(
            "{} log streams still running after {:?}",
            tracker.len(),
            grace
        );
    }

    watch_result
        .context("Pod watcher task panicked")?
        .context("Error setting up pod watcher")?;
    info!("Shut down gracefully");
    Ok(())
}
