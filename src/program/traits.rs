use crate::context::{MessageProcessingContext, StreamProcessingContext};
use crate::message::Message;
use crate::Result;
use std::time::Duration;

/// A message together with the name of the pipeline it is routed to.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageAndRouting {
    pub message: Message,
    pub pipeline: String,
}

impl MessageAndRouting {
    pub fn new(message: Message, pipeline: impl Into<String>) -> Self {
        Self {
            message,
            pipeline: pipeline.into(),
        }
    }
}

/// Producer of routed messages.
///
/// A source is shared between its worker thread and the engine, so every
/// method takes `&self`. `close` must be idempotent and must make the worker
/// loop end: afterwards `is_eof` returns true or reads fail.
pub trait Source: Send + Sync {
    fn is_eof(&self) -> bool;

    /// Waits at most `timeout` for the next message. `Ok(None)` means nothing
    /// arrived in time. `StreamError::Interrupted` ends the worker cleanly.
    fn next_message(
        &self,
        ctx: &mut StreamProcessingContext,
        timeout: Duration,
    ) -> Result<Option<MessageAndRouting>>;

    /// Called once per routed message after its pipeline run, whether the run
    /// completed, halted or failed the stream.
    fn mark_complete(
        &self,
        ctx: &mut StreamProcessingContext,
        routing: &MessageAndRouting,
    ) -> Result<()>;

    fn requeue(&self, routing: MessageAndRouting) -> Result<()>;

    fn close(&self) -> Result<()>;
}

/// Consumer of processed messages, shared by every worker.
pub trait Sink: Send + Sync {
    fn init(&self) -> Result<()> {
        Ok(())
    }

    fn process(&self, ctx: &MessageProcessingContext<'_>) -> Result<()>;

    fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Auxiliary service attached to one source for the life of its worker.
pub trait ProcessingService: Send + Sync {
    fn start_background_processing(&self) -> Result<()>;

    fn stop_background_processing(&self) -> Result<()>;
}
