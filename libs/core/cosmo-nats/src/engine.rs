//! Engine lifecycle: start the selected processors, trap signals, drain.

use crate::client::BrokerClient;
use crate::config::{CosmoConfig, Settings};
use crate::error::WorkerError;
use crate::jobs::JobProcessor;
use crate::pool::BoundedPool;
use crate::registry::Registry;
use crate::streams::StreamProcessor;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Which processors the engine runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessorSelection {
    Jobs,
    Streams,
    Both,
}

impl ProcessorSelection {
    pub fn jobs(&self) -> bool {
        matches!(self, Self::Jobs | Self::Both)
    }

    pub fn streams(&self) -> bool {
        matches!(self, Self::Streams | Self::Both)
    }
}

#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub selection: ProcessorSelection,
    /// Pool size; bounds in-flight handler invocations.
    pub concurrency: usize,
    /// How long shutdown waits for running handlers.
    pub shutdown_timeout: Duration,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            selection: ProcessorSelection::Both,
            concurrency: 1,
            shutdown_timeout: Duration::from_secs(25),
        }
    }
}

impl EngineOptions {
    pub fn with_selection(mut self, selection: ProcessorSelection) -> Self {
        self.selection = selection;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}

/// Worker lifecycle: pool, processors, signal trap, shutdown ordering.
pub struct Engine {
    client: Arc<BrokerClient>,
    registry: Arc<Registry>,
    config: CosmoConfig,
    settings: Settings,
    options: EngineOptions,
}

impl Engine {
    pub fn new(
        client: Arc<BrokerClient>,
        registry: Arc<Registry>,
        config: CosmoConfig,
        settings: Settings,
        options: EngineOptions,
    ) -> Self {
        Self {
            client,
            registry,
            config,
            settings,
            options,
        }
    }

    /// Ensure every stream declared in the config file exists.
    pub async fn ensure_streams(&self) -> Result<(), WorkerError> {
        for (name, spec) in &self.config.streams {
            self.client.ensure_stream(spec.to_stream_config(name)).await?;
        }
        Ok(())
    }

    /// Start the selected processors and return a handle for shutdown.
    pub async fn start(&self) -> Result<RunningEngine, WorkerError> {
        let pool = Arc::new(BoundedPool::new(self.options.concurrency));
        let (running_tx, running_rx) = watch::channel(true);
        let mut handles: Vec<JoinHandle<()>> = Vec::new();

        if self.options.selection.jobs() {
            match JobProcessor::setup(
                self.client.clone(),
                self.registry.clone(),
                &self.config,
                &self.settings,
                pool.clone(),
                running_rx.clone(),
            )
            .await?
            {
                Some(processor) => handles.extend(processor.spawn()),
                None => info!("No jobs consumers configured, jobs processor not started"),
            }
        }

        if self.options.selection.streams() {
            match StreamProcessor::setup(
                self.client.clone(),
                self.registry.clone(),
                &self.config,
                &self.settings,
                pool.clone(),
                running_rx,
            )
            .await?
            {
                Some(processor) => handles.extend(processor.spawn()),
                None => info!("No stream handlers registered, streams processor not started"),
            }
        }

        Ok(RunningEngine {
            pool,
            running_tx,
            handles,
            shutdown_timeout: self.options.shutdown_timeout,
        })
    }

    /// Run until SIGINT or SIGTERM, then drain and return.
    pub async fn run(&self) -> Result<(), WorkerError> {
        let running = self.start().await?;
        wait_for_signal().await;
        running.shutdown().await;
        Ok(())
    }
}

/// A started engine; dropping it without `shutdown` leaves loops running.
pub struct RunningEngine {
    pool: Arc<BoundedPool>,
    running_tx: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
    shutdown_timeout: Duration,
}

impl RunningEngine {
    pub fn pool(&self) -> &Arc<BoundedPool> {
        &self.pool
    }

    /// Stop fetching, reject new pool work, drain running handlers.
    ///
    /// Ordering matters: the cleared flag stops new fetches, the closed pool
    /// turns any in-flight `post` into a rejection that breaks the loops,
    /// and the wait drains handlers up to the deadline.
    pub async fn shutdown(self) {
        info!("Engine shutting down");
        let _ = self.running_tx.send(false);
        self.pool.shutdown();

        if !self.pool.wait_for_termination(self.shutdown_timeout).await {
            warn!(
                timeout_secs = self.shutdown_timeout.as_secs(),
                "Shutdown deadline expired with handlers still running"
            );
        }

        // Loops observe the flag within one fetch timeout; bound the join.
        let joined = futures::future::join_all(self.handles);
        if tokio::time::timeout(Duration::from_secs(6), joined).await.is_err() {
            warn!("Processor loops did not exit in time, abandoning");
        }
        info!("Engine stopped");
    }
}

/// Block until SIGINT (Ctrl+C) or SIGTERM.
pub async fn wait_for_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT, initiating graceful shutdown");
        },
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selection() {
        assert!(ProcessorSelection::Both.jobs());
        assert!(ProcessorSelection::Both.streams());
        assert!(ProcessorSelection::Jobs.jobs());
        assert!(!ProcessorSelection::Jobs.streams());
        assert!(!ProcessorSelection::Streams.jobs());
    }

    #[test]
    fn test_options_defaults() {
        let options = EngineOptions::default();
        assert_eq!(options.selection, ProcessorSelection::Both);
        assert_eq!(options.concurrency, 1);
        assert_eq!(options.shutdown_timeout, Duration::from_secs(25));
    }

    #[test]
    fn test_concurrency_floor() {
        let options = EngineOptions::default().with_concurrency(0);
        assert_eq!(options.concurrency, 1);
    }
}
