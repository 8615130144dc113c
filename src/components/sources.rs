//! Built-in sources.

use crate::context::StreamProcessingContext;
use crate::message::Message;
use crate::program::{MessageAndRouting, Source};
use crate::Result;
use parking_lot::{Condvar, Mutex};
use serde_json::Value;
use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

#[derive(Default)]
struct QueueState {
    queue: VecDeque<MessageAndRouting>,
    finished: bool,
    closed: bool,
    completed: Vec<Value>,
    requeued: u64,
}

/// In-process queue source.
///
/// Reads block on a condition variable for at most the poll timeout.
/// `finish` means no more input: the source reports end of stream once the
/// queue drains. `close` reports end of stream immediately.
#[derive(Default)]
pub struct MemorySource {
    state: Mutex<QueueState>,
    ready: Condvar,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, routing: MessageAndRouting) {
        self.state.lock().queue.push_back(routing);
        self.ready.notify_one();
    }

    pub fn push_json(&self, body: Value, pipeline: impl Into<String>) -> Result<()> {
        self.push(MessageAndRouting::new(Message::adopt_json(body)?, pipeline));
        Ok(())
    }

    pub fn finish(&self) {
        self.state.lock().finished = true;
        self.ready.notify_all();
    }

    /// Every message acknowledged through `mark_complete`, in order, as it
    /// looked when its pipeline run ended.
    pub fn completed(&self) -> Vec<Value> {
        self.state.lock().completed.clone()
    }

    pub fn pending(&self) -> usize {
        self.state.lock().queue.len()
    }

    pub fn requeue_count(&self) -> u64 {
        self.state.lock().requeued
    }
}

impl Source for MemorySource {
    fn is_eof(&self) -> bool {
        let state = self.state.lock();
        state.closed || (state.finished && state.queue.is_empty())
    }

    fn next_message(
        &self,
        _ctx: &mut StreamProcessingContext,
        timeout: Duration,
    ) -> Result<Option<MessageAndRouting>> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        loop {
            if state.closed {
                return Ok(None);
            }
            if let Some(routing) = state.queue.pop_front() {
                return Ok(Some(routing));
            }
            if state.finished {
                return Ok(None);
            }
            if self.ready.wait_until(&mut state, deadline).timed_out() {
                return Ok(if state.closed {
                    None
                } else {
                    state.queue.pop_front()
                });
            }
        }
    }

    fn mark_complete(
        &self,
        _ctx: &mut StreamProcessingContext,
        routing: &MessageAndRouting,
    ) -> Result<()> {
        self.state.lock().completed.push(routing.message.to_value());
        Ok(())
    }

    /// Requeued messages go to the front of the queue.
    fn requeue(&self, routing: MessageAndRouting) -> Result<()> {
        let mut state = self.state.lock();
        state.queue.push_front(routing);
        state.requeued += 1;
        drop(state);
        self.ready.notify_one();
        Ok(())
    }

    fn close(&self) -> Result<()> {
        self.state.lock().closed = true;
        self.ready.notify_all();
        Ok(())
    }
}

struct LineState {
    reader: Option<BufReader<File>>,
    requeued: VecDeque<MessageAndRouting>,
    line_number: u64,
    completed: u64,
    exhausted: bool,
    closed: bool,
}

/// Reads one JSON object per line from a file and routes every message to
/// one pipeline. Blank lines are ignored; malformed lines are warned about
/// and skipped.
pub struct JsonLinesSource {
    path: PathBuf,
    pipeline: String,
    state: Mutex<LineState>,
}

impl JsonLinesSource {
    pub fn open(path: impl AsRef<Path>, pipeline: impl Into<String>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        debug!("Opened JSON lines source {}", path.display());
        Ok(Self {
            path,
            pipeline: pipeline.into(),
            state: Mutex::new(LineState {
                reader: Some(BufReader::new(file)),
                requeued: VecDeque::new(),
                line_number: 0,
                completed: 0,
                exhausted: false,
                closed: false,
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn completed_count(&self) -> u64 {
        self.state.lock().completed
    }
}

impl Source for JsonLinesSource {
    fn is_eof(&self) -> bool {
        let state = self.state.lock();
        state.closed || (state.exhausted && state.requeued.is_empty())
    }

    /// File reads do not block, so the timeout is not used.
    fn next_message(
        &self,
        _ctx: &mut StreamProcessingContext,
        _timeout: Duration,
    ) -> Result<Option<MessageAndRouting>> {
        let mut state = self.state.lock();
        if state.closed {
            return Ok(None);
        }
        if let Some(routing) = state.requeued.pop_front() {
            return Ok(Some(routing));
        }

        let mut line = String::new();
        loop {
            line.clear();
            let Some(reader) = state.reader.as_mut() else {
                return Ok(None);
            };
            if reader.read_line(&mut line)? == 0 {
                state.exhausted = true;
                state.reader = None;
                return Ok(None);
            }
            state.line_number += 1;

            let text = line.trim();
            if text.is_empty() {
                continue;
            }
            match Message::from_json_str(text) {
                Ok(message) => {
                    return Ok(Some(MessageAndRouting::new(message, self.pipeline.as_str())))
                }
                Err(e) => warn!(
                    "{}:{}: skipping malformed line: {}",
                    self.path.display(),
                    state.line_number,
                    e
                ),
            }
        }
    }

    fn mark_complete(
        &self,
        _ctx: &mut StreamProcessingContext,
        _routing: &MessageAndRouting,
    ) -> Result<()> {
        self.state.lock().completed += 1;
        Ok(())
    }

    fn requeue(&self, routing: MessageAndRouting) -> Result<()> {
        self.state.lock().requeued.push_back(routing);
        Ok(())
    }

    fn close(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.closed = true;
        state.reader = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MetricsConfig;
    use crate::metrics::MetricsCatalog;
    use serde_json::json;
    use std::io::Write;
    use std::sync::Arc;
    use std::thread;

    fn stream() -> StreamProcessingContext {
        let catalog = MetricsCatalog::new(&MetricsConfig::default()).unwrap();
        StreamProcessingContext::new("test", catalog.scope())
    }

    const SHORT: Duration = Duration::from_millis(10);

    #[test]
    fn test_memory_source_order_and_eof() {
        let source = MemorySource::new();
        let mut ctx = stream();
        source.push_json(json!({"n": 1}), "main").unwrap();
        source.push_json(json!({"n": 2}), "main").unwrap();
        assert!(source.push_json(json!([1]), "main").is_err());

        assert!(source.next_message(&mut ctx, SHORT).unwrap().is_some());
        assert!(source.next_message(&mut ctx, SHORT).unwrap().is_some());
        assert!(source.next_message(&mut ctx, SHORT).unwrap().is_none());
        assert!(!source.is_eof());

        source.finish();
        assert!(source.is_eof());
    }

    #[test]
    fn test_memory_source_requeue_goes_first() {
        let source = MemorySource::new();
        let mut ctx = stream();
        source.push_json(json!({"n": 1}), "main").unwrap();
        source
            .requeue(MessageAndRouting::new(
                Message::copy_json(&json!({"n": 0})).unwrap(),
                "retry",
            ))
            .unwrap();

        let first = source.next_message(&mut ctx, SHORT).unwrap().unwrap();
        assert_eq!(first.pipeline, "retry");
        source.mark_complete(&mut ctx, &first).unwrap();
        assert_eq!(source.completed(), vec![json!({"n": 0})]);
        assert_eq!(source.requeue_count(), 1);
    }

    #[test]
    fn test_memory_source_wakes_blocked_reader() {
        let source = Arc::new(MemorySource::new());
        let producer = Arc::clone(&source);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            producer.push_json(json!({"n": 1}), "main").unwrap();
        });

        let mut ctx = stream();
        let received = source
            .next_message(&mut ctx, Duration::from_secs(5))
            .unwrap();
        assert!(received.is_some());
        handle.join().unwrap();

        source.push_json(json!({"n": 2}), "main").unwrap();
        source.close().unwrap();
        assert!(source.is_eof());
        assert!(source.next_message(&mut ctx, SHORT).unwrap().is_none());
    }

    #[test]
    fn test_json_lines_source() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, r#"{{"n": 1}}"#).unwrap();
        writeln!(file).unwrap();
        writeln!(file, "not json").unwrap();
        writeln!(file, r#"[1, 2]"#).unwrap();
        writeln!(file, r#"{{"n": 2}}"#).unwrap();
        file.flush().unwrap();

        let source = JsonLinesSource::open(file.path(), "main").unwrap();
        let mut ctx = stream();

        let first = source.next_message(&mut ctx, SHORT).unwrap().unwrap();
        assert_eq!(first.message.get_i64("n", 0), 1);
        assert_eq!(first.pipeline, "main");
        source.requeue(first).unwrap();

        let again = source.next_message(&mut ctx, SHORT).unwrap().unwrap();
        assert_eq!(again.message.get_i64("n", 0), 1);
        let second = source.next_message(&mut ctx, SHORT).unwrap().unwrap();
        assert_eq!(second.message.get_i64("n", 0), 2);
        source.mark_complete(&mut ctx, &second).unwrap();

        assert!(!source.is_eof());
        assert!(source.next_message(&mut ctx, SHORT).unwrap().is_none());
        assert!(source.is_eof());
        assert_eq!(source.completed_count(), 1);
    }

    #[test]
    fn test_json_lines_source_missing_file() {
        assert!(JsonLinesSource::open("/nonexistent/input.jsonl", "main").is_err());
    }
}
