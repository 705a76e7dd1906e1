//! Component N: a bounded log ring buffer fanned out to subscribers, layered
//! onto the process's `tracing` subscriber (§4.N). Every `tracing` event
//! that passes the configured level filter is captured here in addition to
//! being written to stdout/stderr by the formatting layer.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use mcpx_domain::config::LogLevel;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::field::{Field, Visit};
use tracing::Subscriber;
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;

const RING_CAPACITY: usize = 1000;
const BROADCAST_CAPACITY: usize = 256;

#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<serde_json::Value>,
}

pub struct LogSink {
    ring: Mutex<VecDeque<LogEntry>>,
    sender: broadcast::Sender<LogEntry>,
}

impl Default for LogSink {
    fn default() -> Self {
        LogSink::new()
    }
}

impl LogSink {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(BROADCAST_CAPACITY);
        LogSink { ring: Mutex::new(VecDeque::with_capacity(RING_CAPACITY)), sender }
    }

    pub fn push(&self, entry: LogEntry) {
        {
            let mut ring = self.ring.lock();
            if ring.len() >= RING_CAPACITY {
                ring.pop_front();
            }
            ring.push_back(entry.clone());
        }
        // No receivers is not an error: the log still lives in the ring buffer.
        let _ = self.sender.send(entry);
    }

    /// Returns a fresh receiver; dropping it is the unsubscribe operation.
    pub fn subscribe(&self) -> broadcast::Receiver<LogEntry> {
        self.sender.subscribe()
    }

    pub fn recent(&self, n: Option<usize>) -> Vec<LogEntry> {
        let ring = self.ring.lock();
        match n {
            Some(n) => ring.iter().rev().take(n).rev().cloned().collect(),
            None => ring.iter().cloned().collect(),
        }
    }

    pub fn clear(&self) {
        self.ring.lock().clear();
    }
}

struct MessageVisitor {
    message: Option<String>,
    meta: serde_json::Map<String, serde_json::Value>,
}

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        let text = format!("{value:?}");
        if field.name() == "message" {
            self.message = Some(text);
        } else {
            self.meta.insert(field.name().to_string(), serde_json::Value::String(text));
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = Some(value.to_string());
        } else {
            self.meta.insert(field.name().to_string(), serde_json::Value::String(value.to_string()));
        }
    }
}

fn level_to_log_level(level: &tracing::Level) -> LogLevel {
    match *level {
        tracing::Level::ERROR => LogLevel::Error,
        tracing::Level::WARN => LogLevel::Warn,
        tracing::Level::INFO => LogLevel::Info,
        _ => LogLevel::Debug,
    }
}

/// A `tracing_subscriber::Layer` that mirrors every event into a [`LogSink`],
/// independent of (and in addition to) the formatting layer that writes to
/// stdout/stderr.
pub struct LogSinkLayer {
    sink: std::sync::Arc<LogSink>,
}

impl LogSinkLayer {
    pub fn new(sink: std::sync::Arc<LogSink>) -> Self {
        LogSinkLayer { sink }
    }
}

impl<S: Subscriber> Layer<S> for LogSinkLayer {
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = MessageVisitor { message: None, meta: serde_json::Map::new() };
        event.record(&mut visitor);

        let entry = LogEntry {
            timestamp: Utc::now(),
            level: level_to_log_level(event.metadata().level()),
            message: visitor.message.unwrap_or_else(|| event.metadata().target().to_string()),
            meta: if visitor.meta.is_empty() { None } else { Some(serde_json::Value::Object(visitor.meta)) },
        };
        self.sink.push(entry);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(message: &str) -> LogEntry {
        LogEntry { timestamp: Utc::now(), level: LogLevel::Info, message: message.to_string(), meta: None }
    }

    #[test]
    fn recent_returns_last_n_in_order() {
        let sink = LogSink::new();
        for i in 0..5 {
            sink.push(entry(&format!("msg-{i}")));
        }
        let last_two = sink.recent(Some(2));
        assert_eq!(last_two.len(), 2);
        assert_eq!(last_two[0].message, "msg-3");
        assert_eq!(last_two[1].message, "msg-4");
    }

    #[test]
    fn ring_buffer_evicts_oldest_at_capacity() {
        let sink = LogSink::new();
        for i in 0..(RING_CAPACITY + 10) {
            sink.push(entry(&format!("msg-{i}")));
        }
        let all = sink.recent(None);
        assert_eq!(all.len(), RING_CAPACITY);
        assert_eq!(all[0].message, "msg-10");
    }

    #[test]
    fn clear_empties_ring() {
        let sink = LogSink::new();
        sink.push(entry("one"));
        sink.clear();
        assert!(sink.recent(None).is_empty());
    }

    #[tokio::test]
    async fn subscriber_receives_pushed_entry() {
        let sink = LogSink::new();
        let mut rx = sink.subscribe();
        sink.push(entry("hello"));
        let received = rx.recv().await.unwrap();
        assert_eq!(received.message, "hello");
    }

    #[tokio::test]
    async fn failing_subscriber_does_not_block_others() {
        let sink = LogSink::new();
        let mut rx1 = sink.subscribe();
        {
            let _rx2 = sink.subscribe();
            // rx2 dropped here; rx1 must still receive subsequent pushes.
        }
        sink.push(entry("still here"));
        assert_eq!(rx1.recv().await.unwrap().message, "still here");
    }
}
