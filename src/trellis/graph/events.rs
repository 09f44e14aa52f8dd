// SPDX-License-Identifier: MIT

//! Run observability: the executor reports each transition to an optional sink

use crate::adk::error::RunFault;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::{self, error::TrySendError};

/// One executor transition
#[derive(Debug, Clone, PartialEq)]
pub enum RunEvent {
    RunStarted {
        run_id: String,
        graph: String,
    },
    NodeStarted {
        run_id: String,
        node: String,
        step: usize,
    },
    NodeFinished {
        run_id: String,
        node: String,
        step: usize,
        /// Channels written by the node's update
        channels: Vec<String>,
    },
    EdgeTaken {
        run_id: String,
        from: String,
        to: String,
        label: Option<String>,
    },
    RunCompleted {
        run_id: String,
        steps: usize,
    },
    RunFailed {
        run_id: String,
        fault: RunFault,
    },
    RunCancelled {
        run_id: String,
        steps: usize,
    },
}

impl RunEvent {
    pub fn run_id(&self) -> &str {
        match self {
            RunEvent::RunStarted { run_id, .. }
            | RunEvent::NodeStarted { run_id, .. }
            | RunEvent::NodeFinished { run_id, .. }
            | RunEvent::EdgeTaken { run_id, .. }
            | RunEvent::RunCompleted { run_id, .. }
            | RunEvent::RunFailed { run_id, .. }
            | RunEvent::RunCancelled { run_id, .. } => run_id,
        }
    }
}

/// Append-only event receiver. Must not block; must not fail the run.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &RunEvent);
}

/// Writes events through the `log` facade
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl EventSink for LogSink {
    fn emit(&self, event: &RunEvent) {
        match event {
            RunEvent::RunStarted { run_id, graph } => {
                log::info!("[{}] run started on graph '{}'", run_id, graph)
            }
            RunEvent::NodeStarted { run_id, node, step } => {
                log::debug!("[{}] step {}: node '{}' started", run_id, step, node)
            }
            RunEvent::NodeFinished {
                run_id,
                node,
                step,
                channels,
            } => log::debug!(
                "[{}] step {}: node '{}' wrote {:?}",
                run_id,
                step,
                node,
                channels
            ),
            RunEvent::EdgeTaken {
                run_id,
                from,
                to,
                label,
            } => match label {
                Some(label) => log::debug!("[{}] {} -[{}]-> {}", run_id, from, label, to),
                None => log::debug!("[{}] {} -> {}", run_id, from, to),
            },
            RunEvent::RunCompleted { run_id, steps } => {
                log::info!("[{}] run completed after {} steps", run_id, steps)
            }
            RunEvent::RunFailed { run_id, fault } => log::error!("[{}] run failed: {}", run_id, fault),
            RunEvent::RunCancelled { run_id, steps } => {
                log::warn!("[{}] run cancelled after {} steps", run_id, steps)
            }
        }
    }
}

/// Queue depth used by [`ChannelSink::new`]
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Forwards events to a bounded tokio channel so callers can stream a run.
/// When the consumer falls behind, new events are dropped and counted.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<RunEvent>,
    dropped: Arc<AtomicUsize>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::Receiver<RunEvent>) {
        Self::with_capacity(DEFAULT_EVENT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> (Self, mpsc::Receiver<RunEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let sink = Self {
            tx,
            dropped: Arc::new(AtomicUsize::new(0)),
        };
        (sink, rx)
    }

    /// Events lost because the queue was full
    pub fn dropped(&self) -> usize {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: &RunEvent) {
        match self.tx.try_send(event.clone()) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                if self.dropped.fetch_add(1, Ordering::Relaxed) == 0 {
                    log::warn!("Event consumer is falling behind; dropping run events");
                }
            }
            // receiver gone means nobody is listening anymore
            Err(TrySendError::Closed(_)) => {}
        }
    }
}

/// Keeps every event in memory
#[derive(Debug, Default)]
pub struct CollectingSink {
    events: Mutex<Vec<RunEvent>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<RunEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }
}

impl EventSink for CollectingSink {
    fn emit(&self, event: &RunEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_channel_sink_forwards_events() {
        let (sink, mut rx) = ChannelSink::new();
        sink.emit(&RunEvent::RunCompleted {
            run_id: "r1".to_string(),
            steps: 2,
        });
        drop(sink);

        let event = rx.recv().await.unwrap();
        assert_eq!(event.run_id(), "r1");
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_full_channel_sink_drops_instead_of_blocking() {
        let (sink, mut rx) = ChannelSink::with_capacity(2);
        for steps in 0..5 {
            sink.emit(&RunEvent::RunCompleted {
                run_id: format!("r{}", steps),
                steps,
            });
        }
        assert_eq!(sink.dropped(), 3);

        // the oldest events are the ones kept
        assert_eq!(rx.recv().await.unwrap().run_id(), "r0");
        assert_eq!(rx.recv().await.unwrap().run_id(), "r1");

        sink.emit(&RunEvent::RunCancelled {
            run_id: "late".to_string(),
            steps: 0,
        });
        assert_eq!(rx.recv().await.unwrap().run_id(), "late");
        assert_eq!(sink.dropped(), 3);
    }

    #[test]
    fn test_channel_sink_survives_dropped_receiver() {
        let (sink, rx) = ChannelSink::new();
        drop(rx);
        sink.emit(&RunEvent::RunCancelled {
            run_id: "r".to_string(),
            steps: 0,
        });
    }

    #[test]
    fn test_collecting_sink_keeps_order() {
        let sink = CollectingSink::new();
        for step in 1..=3 {
            sink.emit(&RunEvent::NodeStarted {
                run_id: "r".to_string(),
                node: "a".to_string(),
                step,
            });
        }
        let steps: Vec<usize> = sink
            .events()
            .iter()
            .filter_map(|e| match e {
                RunEvent::NodeStarted { step, .. } => Some(*step),
                _ => None,
            })
            .collect();
        assert_eq!(steps, vec![1, 2, 3]);
    }
}
