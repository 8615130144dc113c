//! Built-in processors.
//!
//! String settings that name sinks, reasons or log lines are templates and
//! are evaluated per message. JSON values written into the message are
//! deep-evaluated the same way.

use crate::context::MessageProcessingContext;
use crate::message::Message;
use crate::pipeline::Processor;
use crate::program::MessageAndRouting;
use crate::{error::StreamError, Result};
use chrono::{SecondsFormat, Utc};
use serde_json::Value;
use std::str::FromStr;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

/// Delivers the message to a named sink. An unknown sink is warned about and
/// skipped.
pub struct SendToSink {
    sink: String,
}

impl SendToSink {
    pub fn new(sink: impl Into<String>) -> Self {
        Self { sink: sink.into() }
    }
}

impl Processor for SendToSink {
    fn process(&self, ctx: &mut MessageProcessingContext<'_>) -> Result<()> {
        let name = ctx.eval_expression(&self.sink);
        match ctx.sink(&name) {
            Some(sink) => sink.process(ctx),
            None => {
                ctx.warn(&format!("unknown sink '{}', message not delivered", name));
                Ok(())
            }
        }
    }
}

pub struct SetField {
    field: String,
    value: Value,
}

impl SetField {
    pub fn new(field: impl Into<String>, value: Value) -> Self {
        Self {
            field: field.into(),
            value,
        }
    }
}

impl Processor for SetField {
    fn process(&self, ctx: &mut MessageProcessingContext<'_>) -> Result<()> {
        let value = ctx.eval_json(&self.value);
        ctx.message_mut().put_raw(&self.field, value);
        Ok(())
    }
}

/// Copies `from` to `to`; a missing source field leaves the message alone.
pub struct CopyField {
    from: String,
    to: String,
}

impl CopyField {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
        }
    }
}

impl Processor for CopyField {
    fn process(&self, ctx: &mut MessageProcessingContext<'_>) -> Result<()> {
        if let Some(value) = ctx.message().get(&self.from).cloned() {
            ctx.message_mut().put_raw(&self.to, value);
        }
        Ok(())
    }
}

pub struct RemoveField {
    field: String,
}

impl RemoveField {
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
        }
    }
}

impl Processor for RemoveField {
    fn process(&self, ctx: &mut MessageProcessingContext<'_>) -> Result<()> {
        ctx.message_mut().clear(&self.field);
        Ok(())
    }
}

pub struct AppendValue {
    field: String,
    value: Value,
}

impl AppendValue {
    pub fn new(field: impl Into<String>, value: Value) -> Self {
        Self {
            field: field.into(),
            value,
        }
    }
}

impl Processor for AppendValue {
    fn process(&self, ctx: &mut MessageProcessingContext<'_>) -> Result<()> {
        let value = ctx.eval_json(&self.value);
        ctx.message_mut().append_raw(&self.field, value);
        Ok(())
    }
}

/// Halts the current message. The worker moves on to the next one.
pub struct Stop {
    reason: Option<String>,
}

impl Stop {
    pub fn new(reason: Option<String>) -> Self {
        Self { reason }
    }
}

impl Processor for Stop {
    fn process(&self, ctx: &mut MessageProcessingContext<'_>) -> Result<()> {
        match &self.reason {
            Some(reason) => {
                let reason = ctx.eval_expression(reason);
                ctx.stop_processing_with(&reason);
            }
            None => ctx.stop_processing(),
        }
        Ok(())
    }
}

/// Fails the whole stream; its worker exits after this message.
pub struct FailStream {
    reason: String,
}

impl FailStream {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl Processor for FailStream {
    fn process(&self, ctx: &mut MessageProcessingContext<'_>) -> Result<()> {
        let reason = ctx.eval_expression(&self.reason);
        ctx.stream_mut().fail(&reason);
        Ok(())
    }
}

pub struct SetFlag {
    flag: String,
    value: bool,
}

impl SetFlag {
    pub fn new(flag: impl Into<String>, value: bool) -> Self {
        Self {
            flag: flag.into(),
            value,
        }
    }
}

impl Processor for SetFlag {
    fn process(&self, ctx: &mut MessageProcessingContext<'_>) -> Result<()> {
        ctx.stream_mut().set_flag(&self.flag, self.value);
        Ok(())
    }
}

/// Hands a copy of the message back to the source, then halts it here.
/// Without an explicit pipeline the message keeps its current routing.
pub struct Requeue {
    pipeline: Option<String>,
}

impl Requeue {
    pub fn new(pipeline: Option<String>) -> Self {
        Self { pipeline }
    }
}

impl Processor for Requeue {
    fn process(&self, ctx: &mut MessageProcessingContext<'_>) -> Result<()> {
        let pipeline = match (&self.pipeline, ctx.pipeline_name()) {
            (Some(pipeline), _) => ctx.eval_expression(pipeline),
            (None, Some(current)) => current.to_string(),
            (None, None) => {
                return Err(StreamError::Processing(
                    "cannot requeue a message without a pipeline".to_string(),
                ))
            }
        };
        let routing = MessageAndRouting::new(ctx.message().clone(), pipeline);
        ctx.stream().requeue(routing)?;
        ctx.stop_processing();
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl FromStr for LogLevel {
    type Err = StreamError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            other => Err(StreamError::InvalidConfig(format!(
                "unknown log level '{}'",
                other
            ))),
        }
    }
}

/// Logs an evaluated template, prefixed with the stream label and message id.
pub struct Log {
    template: String,
    level: LogLevel,
}

impl Log {
    pub fn new(template: impl Into<String>, level: LogLevel) -> Self {
        Self {
            template: template.into(),
            level,
        }
    }
}

impl Processor for Log {
    fn process(&self, ctx: &mut MessageProcessingContext<'_>) -> Result<()> {
        let text = ctx.eval_expression(&self.template);
        let label = ctx.stream().label();
        let id = ctx.id();
        match self.level {
            LogLevel::Trace => trace!("[{}#{}] {}", label, id, text),
            LogLevel::Debug => debug!("[{}#{}] {}", label, id, text),
            LogLevel::Info => info!("[{}#{}] {}", label, id, text),
            LogLevel::Warn => warn!("[{}#{}] {}", label, id, text),
            LogLevel::Error => error!("[{}#{}] {}", label, id, text),
        }
        Ok(())
    }
}

/// Writes the current UTC time as RFC 3339 with millisecond precision.
pub struct AddTimestamp {
    field: String,
}

impl AddTimestamp {
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
        }
    }
}

impl Processor for AddTimestamp {
    fn process(&self, ctx: &mut MessageProcessingContext<'_>) -> Result<()> {
        let now = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        ctx.message_mut().put_raw(&self.field, Value::String(now));
        Ok(())
    }
}

pub struct AddUuid {
    field: String,
}

impl AddUuid {
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
        }
    }
}

impl Processor for AddUuid {
    fn process(&self, ctx: &mut MessageProcessingContext<'_>) -> Result<()> {
        let id = Uuid::new_v4().to_string();
        ctx.message_mut().put_raw(&self.field, Value::String(id));
        Ok(())
    }
}

/// Runs a named pipeline once per element of an array field, or once per
/// member of an object field, on a synthetic message `{item_field: element}`
/// (plus `key` for object members). Child runs share the stream context, so
/// a stream failure inside one of them ends the loop.
pub struct ForEach {
    field: String,
    pipeline: String,
    item_field: String,
}

impl ForEach {
    pub const DEFAULT_ITEM_FIELD: &'static str = "item";

    pub fn new(field: impl Into<String>, pipeline: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            pipeline: pipeline.into(),
            item_field: Self::DEFAULT_ITEM_FIELD.to_string(),
        }
    }

    pub fn with_item_field(mut self, item_field: impl Into<String>) -> Self {
        self.item_field = item_field.into();
        self
    }

    fn sub_message(&self, key: Option<String>, item: Value) -> Message {
        let mut message = Message::new();
        if let Some(key) = key {
            message.put_raw("key", Value::String(key));
        }
        message.put_raw(&self.item_field, item);
        message
    }
}

impl Processor for ForEach {
    fn process(&self, ctx: &mut MessageProcessingContext<'_>) -> Result<()> {
        let entries: Vec<(Option<String>, Value)> = match ctx.message().get(&self.field) {
            Some(Value::Array(items)) => items.iter().map(|v| (None, v.clone())).collect(),
            Some(Value::Object(members)) => members
                .iter()
                .map(|(k, v)| (Some(k.clone()), v.clone()))
                .collect(),
            Some(_) => {
                ctx.warn(&format!("field '{}' is neither an array nor an object", self.field));
                return Ok(());
            }
            None => return Ok(()),
        };

        let Some(program) = ctx.stream().program().cloned() else {
            ctx.warn("no program attached, cannot run nested pipeline");
            return Ok(());
        };
        let Some(pipeline) = program.pipeline(&self.pipeline) else {
            ctx.warn(&format!("unknown pipeline '{}'", self.pipeline));
            return Ok(());
        };

        for (key, item) in entries {
            let message = self.sub_message(key, item);
            {
                let mut child = MessageProcessingContext::new(ctx.stream_mut(), message)
                    .with_pipeline(self.pipeline.as_str());
                pipeline.process(&mut child)?;
            }
            if ctx.stream().failed() {
                break;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::sinks::MemorySink;
    use crate::components::sources::MemorySource;
    use crate::config::MetricsConfig;
    use crate::context::StreamProcessingContext;
    use crate::metrics::MetricsCatalog;
    use crate::pipeline::{Pipeline, Rule};
    use crate::program::{Program, Source};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::Arc;

    fn stream() -> StreamProcessingContext {
        let catalog = MetricsCatalog::new(&MetricsConfig::default()).unwrap();
        StreamProcessingContext::new("test", catalog.scope())
    }

    fn run(processor: &dyn Processor, stream: &mut StreamProcessingContext, body: Value) -> Value {
        let mut ctx = MessageProcessingContext::new(stream, Message::adopt_json(body).unwrap())
            .with_pipeline("main");
        processor.process(&mut ctx).unwrap();
        ctx.into_message().into_json()
    }

    #[test]
    fn test_field_editing() {
        let mut stream = stream();
        assert_eq!(
            run(
                &SetField::new("meta.copy", json!({"of": "${name}", "n": 1})),
                &mut stream,
                json!({"name": "a"})
            ),
            json!({"name": "a", "meta": {"copy": {"of": "a", "n": 1}}})
        );
        assert_eq!(
            run(&CopyField::new("a.b", "c"), &mut stream, json!({"a": {"b": 2}})),
            json!({"a": {"b": 2}, "c": 2})
        );
        assert_eq!(
            run(&CopyField::new("missing", "c"), &mut stream, json!({"a": 1})),
            json!({"a": 1})
        );
        assert_eq!(
            run(&RemoveField::new("a.b"), &mut stream, json!({"a": {"b": 2, "c": 3}})),
            json!({"a": {"c": 3}})
        );
        assert_eq!(
            run(&AppendValue::new("tags", json!("${kind}")), &mut stream, json!({"kind": "x", "tags": ["w"]})),
            json!({"kind": "x", "tags": ["w", "x"]})
        );
    }

    #[test]
    fn test_generated_fields() {
        let mut stream = stream();
        let out = run(&AddTimestamp::new("ts"), &mut stream, json!({}));
        let ts = out["ts"].as_str().unwrap();
        assert!(chrono::DateTime::parse_from_rfc3339(ts).is_ok());

        let out = run(&AddUuid::new("meta.id"), &mut stream, json!({}));
        assert!(Uuid::parse_str(out["meta"]["id"].as_str().unwrap()).is_ok());
    }

    #[test]
    fn test_control_processors() {
        let mut stream = stream();
        {
            let mut ctx = MessageProcessingContext::new(&mut stream, Message::new());
            Stop::new(Some("dup ${n|?}".to_string()))
                .process(&mut ctx)
                .unwrap();
            assert!(ctx.halt_requested());
            assert_eq!(ctx.halt_reason(), Some("dup ?"));
        }

        SetFlag::new("seen", true)
            .process(&mut MessageProcessingContext::new(&mut stream, Message::new()))
            .unwrap();
        assert!(stream.is_flag_set("seen"));

        FailStream::new("bad")
            .process(&mut MessageProcessingContext::new(&mut stream, Message::new()))
            .unwrap();
        assert!(stream.failed());
    }

    #[test]
    fn test_log_levels() {
        assert_eq!("WARNING".parse::<LogLevel>().unwrap(), LogLevel::Warn);
        assert!("loud".parse::<LogLevel>().is_err());

        let mut stream = stream();
        run(&Log::new("saw ${n}", LogLevel::Debug), &mut stream, json!({"n": 1}));
    }

    #[test]
    fn test_requeue_uses_current_pipeline() {
        let source = Arc::new(MemorySource::new());
        let mut stream = stream().with_source(source.clone());
        let mut ctx = MessageProcessingContext::new(&mut stream, Message::copy_json(&json!({"n": 1})).unwrap())
            .with_pipeline("retry");
        Requeue::new(None).process(&mut ctx).unwrap();
        assert!(ctx.halt_requested());
        drop(ctx);

        assert_eq!(source.requeue_count(), 1);
        let next = source
            .next_message(&mut stream, std::time::Duration::from_millis(10))
            .unwrap()
            .unwrap();
        assert_eq!(next.pipeline, "retry");
        assert_eq!(next.message.get_i64("n", 0), 1);

        let mut orphan = MessageProcessingContext::new(&mut stream, Message::new());
        assert!(Requeue::new(None).process(&mut orphan).is_err());
        drop(orphan);

        let message = Message::copy_json(&json!({"stage": "slow"})).unwrap();
        let mut ctx = MessageProcessingContext::new(&mut stream, message).with_pipeline("main");
        Requeue::new(Some("retry-${stage}".to_string()))
            .process(&mut ctx)
            .unwrap();
        drop(ctx);
        let next = source
            .next_message(&mut stream, std::time::Duration::from_millis(10))
            .unwrap()
            .unwrap();
        assert_eq!(next.pipeline, "retry-slow");
    }

    fn program_with_sink(sink: Arc<MemorySink>) -> Arc<Program> {
        let mut program = Program::new();
        program.add_sink("out", sink).unwrap();
        let per_item = Pipeline::builder()
            .rule(
                Rule::builder()
                    .add(SetField::new("seen", json!(true)))
                    .add(SendToSink::new("out"))
                    .build()
                    .unwrap(),
            )
            .build();
        program.add_pipeline("item", per_item).unwrap();
        Arc::new(program)
    }

    #[test]
    fn test_send_to_sink_and_for_each() {
        let sink = Arc::new(MemorySink::new());
        let mut stream = stream().with_program(program_with_sink(sink.clone()));

        run(&SendToSink::new("${target}"), &mut stream, json!({"target": "out", "n": 1}));
        run(&SendToSink::new("missing"), &mut stream, json!({"n": 2}));
        assert_eq!(sink.received().len(), 1);

        let out = run(
            &ForEach::new("lines", "item").with_item_field("line"),
            &mut stream,
            json!({"lines": ["a", "b"]}),
        );
        assert_eq!(out, json!({"lines": ["a", "b"]}));

        run(&ForEach::new("by_id", "item"), &mut stream, json!({"by_id": {"k1": 10}}));

        let received: Vec<Value> = sink.received().into_iter().map(Message::into_json).collect();
        assert_eq!(
            received,
            vec![
                json!({"target": "out", "n": 1}),
                json!({"line": "a", "seen": true}),
                json!({"line": "b", "seen": true}),
                json!({"key": "k1", "item": 10, "seen": true}),
            ]
        );
    }
}
