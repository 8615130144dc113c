//! Built-in sinks.

use crate::context::MessageProcessingContext;
use crate::message::Message;
use crate::program::Sink;
use crate::{error::StreamError, Result};
use parking_lot::Mutex;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

/// Records every message it receives.
#[derive(Default)]
pub struct MemorySink {
    received: Mutex<Vec<Message>>,
    closed: AtomicBool,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copies of every received message, in arrival order.
    pub fn received(&self) -> Vec<Message> {
        self.received.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.received.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.received.lock().is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Sink for MemorySink {
    fn process(&self, ctx: &MessageProcessingContext<'_>) -> Result<()> {
        self.received.lock().push(ctx.message().clone());
        Ok(())
    }

    fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Writes each message as one line of compact JSON, to a file or stdout.
pub struct JsonLinesSink {
    writer: Mutex<Option<Box<dyn Write + Send>>>,
    flush_each: bool,
}

impl JsonLinesSink {
    /// Creates or truncates `path`.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::create(path.as_ref())?;
        Ok(Self {
            writer: Mutex::new(Some(Box::new(BufWriter::new(file)))),
            flush_each: false,
        })
    }

    /// Writes to stdout, flushing after every line.
    pub fn stdout() -> Self {
        Self {
            writer: Mutex::new(Some(Box::new(io::stdout()))),
            flush_each: true,
        }
    }
}

impl Sink for JsonLinesSink {
    fn process(&self, ctx: &MessageProcessingContext<'_>) -> Result<()> {
        let mut writer = self.writer.lock();
        let writer = writer
            .as_mut()
            .ok_or_else(|| StreamError::Sink("JSON lines sink is closed".to_string()))?;
        writeln!(writer, "{}", ctx.message().to_line())?;
        if self.flush_each {
            writer.flush()?;
        }
        Ok(())
    }

    /// Flushes and releases the writer. Later writes fail.
    fn close(&self) -> Result<()> {
        if let Some(mut writer) = self.writer.lock().take() {
            writer.flush()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MetricsConfig;
    use crate::context::StreamProcessingContext;
    use crate::metrics::MetricsCatalog;
    use serde_json::json;

    fn deliver(sink: &dyn Sink, body: serde_json::Value) -> Result<()> {
        let catalog = MetricsCatalog::new(&MetricsConfig::default()).unwrap();
        let mut stream = StreamProcessingContext::new("test", catalog.scope());
        let ctx = MessageProcessingContext::new(&mut stream, Message::adopt_json(body).unwrap());
        sink.process(&ctx)
    }

    #[test]
    fn test_memory_sink_records_copies() {
        let sink = MemorySink::new();
        assert!(sink.is_empty());
        deliver(&sink, json!({"n": 1})).unwrap();
        deliver(&sink, json!({"n": 2})).unwrap();
        assert_eq!(sink.len(), 2);
        assert_eq!(sink.received()[1].get_i64("n", 0), 2);

        sink.close().unwrap();
        assert!(sink.is_closed());
    }

    #[test]
    fn test_json_lines_sink_writes_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.jsonl");
        let sink = JsonLinesSink::create(&path).unwrap();

        deliver(&sink, json!({"n": 1, "tag": "a"})).unwrap();
        deliver(&sink, json!({"n": 2})).unwrap();
        sink.close().unwrap();
        sink.close().unwrap();
        assert!(matches!(deliver(&sink, json!({})), Err(StreamError::Sink(_))));

        let written = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = written.lines().collect();
        assert_eq!(lines, vec![r#"{"n":1,"tag":"a"}"#, r#"{"n":2}"#]);
    }
}
