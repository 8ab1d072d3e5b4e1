use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{info, warn};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use crate::db::{EventStore, StoredEvent};
use crate::error::IndexerError;

/// Dual flush trigger: whichever of {size, time} is reached first wins.
#[derive(Debug, Clone)]
pub struct BatchWriterConfig {
    pub batch_size: usize,
    pub batch_timeout: Duration,
}

impl Default for BatchWriterConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            batch_timeout: Duration::from_millis(3000),
        }
    }
}

/// Checkpoint metadata of an event whose batch committed.
#[derive(Debug, Clone)]
pub struct CommittedEvent {
    pub event_id: String,
    /// Event timestamp, epoch milliseconds
    pub timestamp: i64,
    pub block_height: u64,
}

impl From<&StoredEvent> for CommittedEvent {
    fn from(event: &StoredEvent) -> Self {
        Self {
            event_id: event.event_id.clone(),
            timestamp: event.timestamp,
            block_height: event.block_height,
        }
    }
}

/// Observation emitted after every flush attempt, consumed by the
/// monitor task for checkpoint advancement and health alerting.
#[derive(Debug)]
pub enum WriterSignal {
    BatchWritten {
        events: Vec<CommittedEvent>,
        duration: Duration,
    },
    BatchError {
        error: String,
        count: usize,
    },
}

struct WriterState {
    queue: VecDeque<StoredEvent>,
    flushing: bool,
    timer: Option<JoinHandle<()>>,
}

struct Inner<S> {
    store: Arc<S>,
    config: BatchWriterConfig,
    state: Mutex<WriterState>,
    signals: mpsc::Sender<WriterSignal>,
}

/// Accumulates transformed events and writes them out in all-or-nothing
/// transactional batches.
///
/// A failed batch is prepended back onto the live queue, ahead of
/// anything that arrived while the flush was running, so retries keep
/// the original arrival order. Nothing bounds the retry count here: a
/// permanently failing event keeps its batch cycling until an operator
/// intervenes (the monitor raises an alert after repeated failures).
///
/// The `flushing` flag gives at-most-one concurrent flush; the size and
/// timer triggers both funnel into [`BatchWriter::flush`].
pub struct BatchWriter<S> {
    inner: Arc<Inner<S>>,
}

impl<S> Clone for BatchWriter<S> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<S: EventStore + 'static> BatchWriter<S> {
    pub fn new(
        store: Arc<S>,
        config: BatchWriterConfig,
        signals: mpsc::Sender<WriterSignal>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                config,
                state: Mutex::new(WriterState {
                    queue: VecDeque::new(),
                    flushing: false,
                    timer: None,
                }),
                signals,
            }),
        }
    }

    /// Append an event to the pending queue, flushing immediately once
    /// the size threshold is reached and otherwise arming the flush
    /// timer if none is outstanding.
    pub async fn add_event(&self, event: StoredEvent) {
        let size_reached = {
            let mut state = self.inner.state.lock().await;
            state.queue.push_back(event);

            if state.queue.len() >= self.inner.config.batch_size {
                true
            } else {
                if state.timer.is_none() {
                    self.arm_timer(&mut state);
                }
                false
            }
        };

        if size_reached {
            self.flush().await;
        }
    }

    /// Number of events waiting for the next flush.
    pub async fn pending_len(&self) -> usize {
        self.inner.state.lock().await.queue.len()
    }

    /// Flush the pending queue in one transaction.
    ///
    /// No-op while another flush is in progress or when the queue is
    /// empty, so the size trigger and the timer trigger can both call
    /// this safely. Events that pile up to a full batch while a flush is
    /// running are flushed immediately afterwards instead of waiting for
    /// the next timer.
    pub async fn flush(&self) {
        while self.flush_once().await {}
    }

    /// One flush attempt. Returns true when the queue reached the size
    /// threshold again during the flush.
    async fn flush_once(&self) -> bool {
        let batch: Vec<StoredEvent> = {
            let mut state = self.inner.state.lock().await;
            if state.flushing || state.queue.is_empty() {
                return false;
            }
            if let Some(timer) = state.timer.take() {
                timer.abort();
            }
            state.flushing = true;
            state.queue.drain(..).collect()
        };

        let started = Instant::now();
        let result = self.inner.store.write_batch(&batch).await;
        let duration = started.elapsed();

        match result {
            Ok(()) => {
                let events: Vec<CommittedEvent> =
                    batch.iter().map(CommittedEvent::from).collect();

                let size_reached = {
                    let mut state = self.inner.state.lock().await;
                    state.flushing = false;
                    if state.queue.len() >= self.inner.config.batch_size {
                        true
                    } else {
                        // Events that piled up during the flush still need a trigger
                        if !state.queue.is_empty() && state.timer.is_none() {
                            self.arm_timer(&mut state);
                        }
                        false
                    }
                };

                info!(
                    "Committed batch of {} events in {:?} ({:.0} events/s)",
                    events.len(),
                    duration,
                    events.len() as f64 / duration.as_secs_f64().max(f64::EPSILON)
                );

                let _ = self
                    .inner
                    .signals
                    .send(WriterSignal::BatchWritten {
                        events,
                        duration,
                    })
                    .await;

                size_reached
            },
            Err(e) => {
                let count = batch.len();
                let err = IndexerError::storage(format!(
                    "batch write of {} events failed: {:#}",
                    count, e
                ));

                {
                    let mut state = self.inner.state.lock().await;
                    // Prepend the failed batch so arrival order survives the retry
                    for event in batch.into_iter().rev() {
                        state.queue.push_front(event);
                    }
                    state.flushing = false;
                    if state.timer.is_none() {
                        self.arm_timer(&mut state);
                    }
                }

                warn!("{}; batch requeued for retry", err);

                let _ = self
                    .inner
                    .signals
                    .send(WriterSignal::BatchError {
                        error: err.to_string(),
                        count,
                    })
                    .await;

                false
            },
        }
    }

    /// Arm the single flush timer. Caller must hold the state lock.
    fn arm_timer(&self, state: &mut WriterState) {
        let writer = self.clone();
        let timeout = self.inner.config.batch_timeout;

        state.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            {
                // Clear the slot first so flush aborts only pending timers,
                // never this running one
                let mut state = writer.inner.state.lock().await;
                state.timer = None;
            }
            writer.flush().await;
        }));
    }
}
