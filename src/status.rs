//! Ordered status/text delivery from the session worker to a UI consumer
//!
//! The worker side never blocks: entries go into an unbounded FIFO. The UI side
//! drains everything pending on its own tick and renders entries verbatim, so
//! full status lines carry their own trailing newline while streamed text
//! fragments do not.

use tokio::sync::mpsc::{self, error::TryRecvError};
use tracing::debug;

/// Producer half. Cheap to clone; every clone feeds the same queue.
#[derive(Debug, Clone)]
pub struct StatusSink {
    tx: mpsc::UnboundedSender<String>,
}

/// Consumer half, owned by whatever renders status for the user
#[derive(Debug)]
pub struct StatusReceiver {
    rx: mpsc::UnboundedReceiver<String>,
}

impl StatusSink {
    pub fn channel() -> (StatusSink, StatusReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (StatusSink { tx }, StatusReceiver { rx })
    }

    /// Push an entry verbatim (text fragments, response markers)
    pub fn push(&self, entry: impl Into<String>) {
        let entry = entry.into();
        debug!(status = %entry.trim_end(), "status");
        // The receiver going away just means nobody is watching any more
        let _ = self.tx.send(entry);
    }

    /// Push a complete status line
    pub fn line(&self, message: impl AsRef<str>) {
        self.push(format!("{}\n", message.as_ref()));
    }
}

impl StatusReceiver {
    /// Take every pending entry, oldest first
    pub fn drain_all(&mut self) -> Vec<String> {
        let mut entries = Vec::new();
        loop {
            match self.rx.try_recv() {
                Ok(entry) => entries.push(entry),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drain_preserves_arrival_order() {
        let (sink, mut rx) = StatusSink::channel();
        let other = sink.clone();

        sink.push("a");
        other.push("b");
        sink.line("c");

        assert_eq!(rx.drain_all(), vec!["a", "b", "c\n"]);
        assert!(rx.drain_all().is_empty());
    }

    #[test]
    fn test_push_after_receiver_dropped_does_not_panic() {
        let (sink, rx) = StatusSink::channel();
        drop(rx);
        sink.line("nobody listening");
    }

    #[test]
    fn test_producer_on_other_thread() {
        let (sink, mut rx) = StatusSink::channel();
        let handle = std::thread::spawn(move || {
            for i in 0..100 {
                sink.push(i.to_string());
            }
        });
        handle.join().unwrap();

        let drained = rx.drain_all();
        let expected: Vec<String> = (0..100).map(|i| i.to_string()).collect();
        assert_eq!(drained, expected);
    }
}
