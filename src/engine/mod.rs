//! The engine runs one dedicated worker thread per source of a [`Program`].
//!
//! Lifecycle: `start` initialises every sink and spawns the workers, `stop`
//! closes every source so the workers see end of stream, `join` waits for
//! them, and `close` closes sources and then sinks. `shutdown` runs the last
//! three in order so in-flight messages drain into sinks before they close.

mod worker;

pub use worker::{WorkerExit, WorkerReport};

use crate::config::EngineConfig;
use crate::expr::{EnvDataSource, ExprDataSource, SharedDataSource};
use crate::metrics::MetricsCatalog;
use crate::panic_handler::panic_message;
use crate::program::Program;
use crate::{error::StreamError, Result};
use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{error, info, warn};
use worker::Worker;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    NotStarted,
    Running,
    Draining,
    Stopped,
}

struct WorkerHandle {
    source: String,
    handle: JoinHandle<WorkerExit>,
}

pub struct Engine {
    program: Arc<Program>,
    config: EngineConfig,
    metrics: Arc<MetricsCatalog>,
    user_data: Arc<DashMap<String, Value>>,
    data_sources: Vec<Arc<dyn ExprDataSource>>,
    workers: Vec<WorkerHandle>,
    state: EngineState,
}

impl Engine {
    pub fn new(program: Arc<Program>, config: EngineConfig, metrics: Arc<MetricsCatalog>) -> Self {
        Self {
            program,
            config,
            metrics,
            user_data: Arc::new(DashMap::new()),
            data_sources: Vec::new(),
            workers: Vec::new(),
            state: EngineState::NotStarted,
        }
    }

    /// Appends a data source to every worker's fallback chain, after the
    /// engine user data and before the environment. Only workers started
    /// afterwards see it.
    pub fn add_data_source(&mut self, source: Arc<dyn ExprDataSource>) {
        self.data_sources.push(source);
    }

    /// Key/value data shared by all workers, visible to expressions as the
    /// `user` data source.
    pub fn user_data(&self) -> &Arc<DashMap<String, Value>> {
        &self.user_data
    }

    pub fn program(&self) -> &Arc<Program> {
        &self.program
    }

    pub fn metrics(&self) -> &Arc<MetricsCatalog> {
        &self.metrics
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    /// True while at least one worker thread is alive.
    pub fn is_running(&self) -> bool {
        self.workers.iter().any(|w| !w.handle.is_finished())
    }

    pub fn start(&mut self) -> Result<()> {
        if self.state != EngineState::NotStarted {
            return Err(StreamError::Engine(format!(
                "cannot start engine in state {:?}",
                self.state
            )));
        }

        for (name, sink) in self.program.sinks() {
            sink.init()?;
            info!("Sink '{}' initialised", name);
        }

        self.state = EngineState::Running;
        let program = Arc::clone(&self.program);
        for (name, source) in program.sources() {
            let worker = Worker {
                source_name: name.to_string(),
                source: Arc::clone(source),
                program: Arc::clone(&program),
                data_sources: self.chain(),
                metrics: Arc::clone(&self.metrics),
                poll_timeout: self.config.poll_timeout(),
            };

            let spawned = thread::Builder::new()
                .name(format!("{}-{}", self.config.worker_name_prefix, name))
                .spawn(move || worker.run());

            match spawned {
                Ok(handle) => self.workers.push(WorkerHandle {
                    source: name.to_string(),
                    handle,
                }),
                Err(e) => {
                    error!("Failed to spawn worker for source '{}': {}", name, e);
                    self.stop();
                    return Err(e.into());
                }
            }
        }

        info!("Engine started with {} worker(s)", self.workers.len());
        Ok(())
    }

    /// Closes every source. Workers exit once their source reports end of
    /// stream or fails to read; the engine never interrupts them.
    pub fn stop(&mut self) {
        if self.state != EngineState::Running {
            return;
        }
        info!("Stopping engine, closing {} source(s)", self.workers.len());
        self.close_sources();
        self.state = EngineState::Draining;
    }

    /// Waits for every worker and reports how each one ended.
    pub fn join(&mut self) -> Vec<WorkerReport> {
        self.workers
            .drain(..)
            .map(|worker| {
                let exit = worker
                    .handle
                    .join()
                    .unwrap_or_else(|payload| WorkerExit::Panicked(panic_message(payload.as_ref())));
                match &exit {
                    WorkerExit::Error(e) => {
                        error!("Worker for source '{}' terminated: {}", worker.source, e)
                    }
                    WorkerExit::Panicked(message) => {
                        error!("Worker for source '{}' panicked: {}", worker.source, message)
                    }
                    other => info!("Worker for source '{}' finished: {:?}", worker.source, other),
                }
                WorkerReport {
                    source: worker.source,
                    exit,
                }
            })
            .collect()
    }

    /// Closes all sources, then all sinks. Call after `join` so messages
    /// still in flight reach their sinks.
    pub fn close(&mut self) -> Result<()> {
        self.close_sources();
        let mut first_error = None;
        for (name, sink) in self.program.sinks() {
            if let Err(e) = sink.close() {
                error!("Failed to close sink '{}': {}", name, e);
                first_error.get_or_insert(e);
            }
        }
        self.state = EngineState::Stopped;
        first_error.map_or(Ok(()), Err)
    }

    pub fn shutdown(&mut self) -> Result<Vec<WorkerReport>> {
        self.stop();
        let reports = self.join();
        self.close()?;
        info!("Engine shutdown complete");
        Ok(reports)
    }

    fn close_sources(&self) {
        for (name, source) in self.program.sources() {
            if let Err(e) = source.close() {
                warn!("Failed to close source '{}': {}", name, e);
            }
        }
    }

    fn chain(&self) -> Vec<Arc<dyn ExprDataSource>> {
        let mut chain: Vec<Arc<dyn ExprDataSource>> = Vec::with_capacity(self.data_sources.len() + 2);
        chain.push(Arc::new(SharedDataSource::new("user", Arc::clone(&self.user_data))));
        chain.extend(self.data_sources.iter().cloned());
        chain.push(Arc::new(EnvDataSource::new()));
        chain
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if self.state == EngineState::Running {
            warn!("Engine dropped while running, closing sources");
            self.stop();
        }
    }
}
