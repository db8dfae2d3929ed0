//! Outbound line queue.
//!
//! A line goes straight to the transport when nothing is in flight and
//! nothing is queued. Otherwise it waits in FIFO order and the pacer, ticking
//! once per [`PACER_PERIOD`], hands queued lines over one at a time.

use crate::irc::charset::Charset;
use std::collections::VecDeque;
use std::time::Duration;

pub const PACER_PERIOD: Duration = Duration::from_secs(1);

/// The write side of a connection.
pub trait LineSink: Send {
    /// A previous write has not completed yet.
    fn is_busy(&self) -> bool;
    /// Start writing `bytes`. Completion and errors are handled by the sink.
    fn write(&mut self, bytes: Vec<u8>);
}

#[derive(Debug, Default)]
pub struct SendQueue {
    queue: VecDeque<String>,
    pacing: bool,
}

impl SendQueue {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// The pacer should tick.
    pub fn is_pacing(&self) -> bool {
        self.pacing
    }

    /// `line` must not carry its CRLF terminator.
    pub fn write_line(&mut self, sink: &mut dyn LineSink, charset: &Charset, line: &str) {
        if !sink.is_busy() && self.queue.is_empty() {
            sink.write(encode_line(charset, line));
            return;
        }
        self.queue.push_back(line.to_string());
        self.pacing = true;
    }

    /// One pacer period elapsed.
    pub fn tick(&mut self, sink: &mut dyn LineSink, charset: &Charset) {
        if sink.is_busy() {
            return;
        }
        if let Some(line) = self.queue.pop_front() {
            sink.write(encode_line(charset, &line));
        }
        self.pacing = !self.queue.is_empty();
    }

    /// Drop everything queued without sending it.
    pub fn flush(&mut self) {
        if !self.queue.is_empty() {
            tracing::debug!(dropped = self.queue.len(), "discarding queued lines");
        }
        self.queue.clear();
        self.pacing = false;
    }
}

pub fn encode_line(charset: &Charset, line: &str) -> Vec<u8> {
    let mut bytes = charset.encode(line);
    bytes.extend_from_slice(b"\r\n");
    bytes
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Records writes; a write stays in flight until `complete` is called.
    #[derive(Clone, Default)]
    pub(crate) struct RecordingSink {
        pub written: Arc<Mutex<Vec<String>>>,
        pub busy: Arc<Mutex<bool>>,
        pub hold_writes: bool,
    }

    impl RecordingSink {
        pub fn lines(&self) -> Vec<String> {
            self.written.lock().unwrap().clone()
        }

        pub fn take(&self) -> Vec<String> {
            std::mem::take(&mut *self.written.lock().unwrap())
        }

        pub fn complete(&self) {
            *self.busy.lock().unwrap() = false;
        }
    }

    impl LineSink for RecordingSink {
        fn is_busy(&self) -> bool {
            *self.busy.lock().unwrap()
        }

        fn write(&mut self, bytes: Vec<u8>) {
            let text = String::from_utf8_lossy(&bytes);
            for line in text.split_terminator("\r\n") {
                self.written.lock().unwrap().push(line.to_string());
            }
            if self.hold_writes {
                *self.busy.lock().unwrap() = true;
            }
        }
    }

    #[test]
    fn test_idle_transport_writes_immediately() {
        let mut sink = RecordingSink::default();
        let mut queue = SendQueue::new();
        queue.write_line(&mut sink, &Charset::default(), "PING :x");
        assert_eq!(sink.lines(), vec!["PING :x"]);
        assert!(!queue.is_pacing());
    }

    #[test]
    fn test_fifo_while_busy() {
        let mut sink = RecordingSink {
            hold_writes: true,
            ..Default::default()
        };
        let charset = Charset::default();
        let mut queue = SendQueue::new();

        queue.write_line(&mut sink, &charset, "L0");
        for line in ["L1", "L2", "L3"] {
            queue.write_line(&mut sink, &charset, line);
        }
        assert_eq!(queue.len(), 3);
        assert!(queue.is_pacing());

        // Still in flight: the tick is skipped, nothing is lost.
        queue.tick(&mut sink, &charset);
        assert_eq!(sink.lines(), vec!["L0"]);

        for _ in 0..3 {
            sink.complete();
            queue.tick(&mut sink, &charset);
        }
        assert_eq!(sink.lines(), vec!["L0", "L1", "L2", "L3"]);
        assert!(!queue.is_pacing());
    }

    #[test]
    fn test_queue_keeps_order_once_idle() {
        let mut sink = RecordingSink {
            hold_writes: true,
            ..Default::default()
        };
        let charset = Charset::default();
        let mut queue = SendQueue::new();
        queue.write_line(&mut sink, &charset, "first");
        queue.write_line(&mut sink, &charset, "second");
        sink.complete();
        // The transport is idle but a line is queued: this one must wait.
        queue.write_line(&mut sink, &charset, "third");
        queue.tick(&mut sink, &charset);
        sink.complete();
        queue.tick(&mut sink, &charset);
        assert_eq!(sink.lines(), vec!["first", "second", "third"]);
    }

    #[test]
    fn test_flush_discards() {
        let mut sink = RecordingSink {
            hold_writes: true,
            ..Default::default()
        };
        let charset = Charset::default();
        let mut queue = SendQueue::new();
        queue.write_line(&mut sink, &charset, "sent");
        queue.write_line(&mut sink, &charset, "dropped");
        queue.flush();
        sink.complete();
        queue.tick(&mut sink, &charset);
        assert_eq!(sink.lines(), vec!["sent"]);
        assert!(!queue.is_pacing());
    }
}
