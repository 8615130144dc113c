use crate::context::{MessageProcessingContext, StreamProcessingContext};
use crate::error::StreamError;
use crate::expr::ExprDataSource;
use crate::metrics::{MessageOutcome, MetricsCatalog};
use crate::program::{MessageAndRouting, Program, ServiceHandle, Source};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Why a worker stopped pulling messages from its source.
#[derive(Debug)]
pub enum WorkerExit {
    /// The source reported end of stream, usually after `close`.
    Eof,
    /// The stream context was failed by a processor.
    Failed,
    /// Reading from or acknowledging to the source failed.
    Io(String),
    /// The blocking read was interrupted.
    Interrupted,
    /// A filter or processor returned an error.
    Error(StreamError),
    /// The worker thread panicked.
    Panicked(String),
}

impl WorkerExit {
    /// True for the exits that do not indicate a problem.
    pub fn is_clean(&self) -> bool {
        matches!(self, WorkerExit::Eof | WorkerExit::Interrupted)
    }
}

#[derive(Debug)]
pub struct WorkerReport {
    pub source: String,
    pub exit: WorkerExit,
}

/// Everything one source's worker thread needs; moved into the thread.
pub(crate) struct Worker {
    pub(crate) source_name: String,
    pub(crate) source: Arc<dyn Source>,
    pub(crate) program: Arc<Program>,
    pub(crate) data_sources: Vec<Arc<dyn ExprDataSource>>,
    pub(crate) metrics: Arc<MetricsCatalog>,
    pub(crate) poll_timeout: Duration,
}

impl Worker {
    pub(crate) fn run(self) -> WorkerExit {
        let mut ctx = StreamProcessingContext::new(self.source_name.as_str(), self.metrics.scope())
            .with_source(Arc::clone(&self.source))
            .with_program(Arc::clone(&self.program));
        for data_source in &self.data_sources {
            ctx.add_data_source(Arc::clone(data_source));
        }

        let _services = ServiceGuard::start(
            &mut ctx,
            self.program.services_for(&self.source_name).to_vec(),
        );

        info!("Worker for source '{}' started", self.source_name);
        let exit = loop {
            if self.source.is_eof() {
                break WorkerExit::Eof;
            }
            if ctx.failed() {
                break WorkerExit::Failed;
            }

            let routing = match self.source.next_message(&mut ctx, self.poll_timeout) {
                Ok(Some(routing)) => routing,
                Ok(None) => continue,
                Err(e) if e.is_interruption() => {
                    info!("Worker for source '{}' interrupted", self.source_name);
                    break WorkerExit::Interrupted;
                }
                Err(e) => {
                    error!("Failed to read from source '{}': {}", self.source_name, e);
                    break WorkerExit::Io(e.to_string());
                }
            };

            if let Err(exit) = self.handle(&mut ctx, routing) {
                break exit;
            }
        };
        info!("Worker for source '{}' exiting: {:?}", self.source_name, exit);
        exit
    }

    fn handle(
        &self,
        ctx: &mut StreamProcessingContext,
        routing: MessageAndRouting,
    ) -> Result<(), WorkerExit> {
        let Some(pipeline) = self.program.pipeline(&routing.pipeline) else {
            info!(
                "[{}] no pipeline named '{}', skipping message",
                self.source_name, routing.pipeline
            );
            self.metrics
                .record_message(&self.source_name, MessageOutcome::Skipped);
            return self.complete(ctx, &routing);
        };

        let MessageAndRouting { message, pipeline: name } = routing;
        let metrics = ctx.metrics().clone();
        let (result, message) = {
            let _source = metrics.push(self.source_name.as_str());
            let _pipeline = metrics.push(name.as_str());
            let _timer = metrics.timer("time").time();

            let mut mctx = MessageProcessingContext::new(ctx, message).with_pipeline(name.as_str());
            let result = pipeline.process(&mut mctx);
            if mctx.halt_requested() {
                debug!("[{}#{}] pipeline '{}' halted", self.source_name, mctx.id(), name);
            }
            (result, mctx.into_message())
        };

        if let Err(e) = result {
            error!(
                "[{}] pipeline '{}' raised an error, terminating worker: {}",
                self.source_name, name, e
            );
            self.metrics
                .record_message(&self.source_name, MessageOutcome::Failed);
            return Err(WorkerExit::Error(e));
        }

        let outcome = if ctx.failed() {
            MessageOutcome::Failed
        } else {
            MessageOutcome::Completed
        };
        self.metrics.record_message(&self.source_name, outcome);
        self.complete(ctx, &MessageAndRouting::new(message, name))
    }

    fn complete(
        &self,
        ctx: &mut StreamProcessingContext,
        routing: &MessageAndRouting,
    ) -> Result<(), WorkerExit> {
        self.source.mark_complete(ctx, routing).map_err(|e| {
            if e.is_interruption() {
                WorkerExit::Interrupted
            } else {
                error!(
                    "Failed to mark message complete on source '{}': {}",
                    self.source_name, e
                );
                WorkerExit::Io(e.to_string())
            }
        })
    }
}

/// Starts a source's services and stops them again when dropped, so they
/// stop on every exit path of the worker, panics included.
struct ServiceGuard {
    label: String,
    services: Vec<(String, ServiceHandle)>,
}

impl ServiceGuard {
    fn start(ctx: &mut StreamProcessingContext, services: Vec<(String, ServiceHandle)>) -> Self {
        for (name, handle) in &services {
            ctx.put_object(name.as_str(), handle.object());
            match handle.service().start_background_processing() {
                Ok(()) => debug!("[{}] service '{}' started", ctx.label(), name),
                Err(e) => ctx.fail(&format!("service '{}' failed to start: {}", name, e)),
            }
        }
        Self {
            label: ctx.label().to_string(),
            services,
        }
    }
}

impl Drop for ServiceGuard {
    fn drop(&mut self) {
        for (name, handle) in &self.services {
            match handle.service().stop_background_processing() {
                Ok(()) => debug!("[{}] service '{}' stopped", self.label, name),
                Err(e) => warn!("[{}] service '{}' failed to stop: {}", self.label, name, e),
            }
        }
    }
}
