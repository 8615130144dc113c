use super::StreamProcessingContext;
use crate::expr::{self, ExprDataSource, FromExpression};
use crate::message::Message;
use crate::program::{Sink, Source};
use crate::Result;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::warn;

static NEXT_MESSAGE_ID: AtomicU64 = AtomicU64::new(1);

/// Process-wide, monotonically increasing message serial number.
pub fn next_message_id() -> u64 {
    NEXT_MESSAGE_ID.fetch_add(1, Ordering::Relaxed)
}

/// State for one message's trip through a pipeline.
pub struct MessageProcessingContext<'a> {
    stream: &'a mut StreamProcessingContext,
    message: Message,
    id: u64,
    pipeline: Option<String>,
    halt_requested: bool,
    halt_reason: Option<String>,
}

impl<'a> MessageProcessingContext<'a> {
    pub fn new(stream: &'a mut StreamProcessingContext, message: Message) -> Self {
        Self {
            stream,
            message,
            id: next_message_id(),
            pipeline: None,
            halt_requested: false,
            halt_reason: None,
        }
    }

    /// Records the name of the pipeline the message was routed to.
    pub fn with_pipeline(mut self, pipeline: impl Into<String>) -> Self {
        self.pipeline = Some(pipeline.into());
        self
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn pipeline_name(&self) -> Option<&str> {
        self.pipeline.as_deref()
    }

    pub fn message(&self) -> &Message {
        &self.message
    }

    pub fn message_mut(&mut self) -> &mut Message {
        &mut self.message
    }

    pub fn into_message(self) -> Message {
        self.message
    }

    pub fn stream(&self) -> &StreamProcessingContext {
        &*self.stream
    }

    pub fn stream_mut(&mut self) -> &mut StreamProcessingContext {
        &mut *self.stream
    }

    pub fn should_continue(&self) -> bool {
        !self.halt_requested && !self.stream.failed()
    }

    pub fn halt_requested(&self) -> bool {
        self.halt_requested
    }

    pub fn halt_reason(&self) -> Option<&str> {
        self.halt_reason.as_deref()
    }

    /// Ends this message's pipeline run after the current processor.
    pub fn stop_processing(&mut self) {
        self.warn("processing stopped");
        self.halt_requested = true;
    }

    pub fn stop_processing_with(&mut self, reason: &str) {
        self.warn(&format!("processing stopped: {}", reason));
        self.halt_reason = Some(reason.to_string());
        self.halt_requested = true;
    }

    pub fn warn(&self, text: &str) {
        warn!("[{}#{}] {}", self.stream.label(), self.id, text);
    }

    /// Evaluates `text` against the message first, then the stream's chain.
    pub fn eval_expression(&self, text: &str) -> String {
        expr::evaluate_text(text, &self.chain())
    }

    /// Like [`MessageProcessingContext::eval_expression`], converting the
    /// result; non-string targets fail with `StreamError::Coercion`.
    pub fn eval_expression_as<T: FromExpression>(&self, text: &str) -> Result<T> {
        expr::evaluate_as(text, &self.chain())
    }

    pub fn eval_symbol(&self, key: &str) -> Option<Value> {
        expr::evaluate_symbol(key, &self.chain())
    }

    /// Evaluates every string leaf of `template`.
    pub fn eval_json(&self, template: &Value) -> Value {
        expr::evaluate_json(template, &self.chain())
    }

    pub fn source(&self, name: &str) -> Option<Arc<dyn Source>> {
        self.stream.program().and_then(|p| p.source(name)).cloned()
    }

    pub fn sink(&self, name: &str) -> Option<Arc<dyn Sink>> {
        self.stream.program().and_then(|p| p.sink(name)).cloned()
    }

    fn chain(&self) -> Vec<&dyn ExprDataSource> {
        let mut chain: Vec<&dyn ExprDataSource> =
            Vec::with_capacity(1 + self.stream.data_sources().len());
        chain.push(&self.message);
        chain.extend(self.stream.chain());
        chain
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MetricsConfig;
    use crate::error::StreamError;
    use crate::expr::MapDataSource;
    use crate::metrics::MetricsCatalog;
    use serde_json::json;

    fn stream() -> StreamProcessingContext {
        let catalog = MetricsCatalog::new(&MetricsConfig::default()).unwrap();
        StreamProcessingContext::new("orders", catalog.scope()).with_data_source(Arc::new(
            MapDataSource::new("defaults")
                .with("region", json!("eu"))
                .with("status", json!("from-stream")),
        ))
    }

    #[test]
    fn test_ids_are_unique_and_increasing() {
        let mut stream = stream();
        let first = MessageProcessingContext::new(&mut stream, Message::new()).id();
        let second = MessageProcessingContext::new(&mut stream, Message::new()).id();
        assert!(second > first);
    }

    #[test]
    fn test_halt_is_one_way() {
        let mut stream = stream();
        let mut ctx = MessageProcessingContext::new(&mut stream, Message::new());
        assert!(ctx.should_continue());
        ctx.stop_processing_with("duplicate");
        assert!(!ctx.should_continue());
        assert_eq!(ctx.halt_reason(), Some("duplicate"));
        assert!(!ctx.stream().failed());
    }

    #[test]
    fn test_stop_without_reason() {
        let mut stream = stream();
        let mut ctx = MessageProcessingContext::new(&mut stream, Message::new());
        ctx.stop_processing();
        assert!(ctx.halt_requested());
        assert!(!ctx.should_continue());
        assert_eq!(ctx.halt_reason(), None);
    }

    #[test]
    fn test_stream_failure_stops_message() {
        let mut stream = stream();
        let mut ctx = MessageProcessingContext::new(&mut stream, Message::new());
        ctx.stream_mut().fail("bad input");
        assert!(!ctx.should_continue());
        assert!(!ctx.halt_requested());
    }

    #[test]
    fn test_message_fields_shadow_stream_chain() {
        let mut stream = stream();
        let message = Message::copy_json(&json!({"status": "error", "count": "7"})).unwrap();
        let ctx = MessageProcessingContext::new(&mut stream, message);

        assert_eq!(ctx.eval_expression("${status}/${region}"), "error/eu");
        assert_eq!(ctx.eval_expression_as::<i64>("${count}").unwrap(), 7);
        assert!(matches!(
            ctx.eval_expression_as::<i64>("${status}"),
            Err(StreamError::Coercion { target: "i64", .. })
        ));
        assert_eq!(
            ctx.eval_json(&json!({"where": "${region}", "n": 1})),
            json!({"where": "eu", "n": 1})
        );
        assert_eq!(ctx.eval_symbol("count"), Some(json!("7")));
        assert_eq!(ctx.stream().eval_expression("${status}"), "from-stream");
    }

    #[test]
    fn test_lookup_without_program() {
        let mut stream = stream();
        let ctx = MessageProcessingContext::new(&mut stream, Message::new()).with_pipeline("main");
        assert!(ctx.sink("anything").is_none());
        assert!(ctx.source("anything").is_none());
        assert_eq!(ctx.pipeline_name(), Some("main"));
    }
}
