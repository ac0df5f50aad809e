//! Flush scheduling and batch hand-off
//!
//! One task decides when the buffer is drained. Triggers (timer tick, full
//! buffer, critical entry, explicit flush) are coalesced: at most one batch is
//! in flight at the writer, and a trigger arriving meanwhile is deferred to a
//! single follow-up round that takes whatever has accumulated since.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, warn};

use super::file_writer::{Batch, BatchOutcome};
use super::logger::Shared;
use crate::error::WriteError;

/// Requests sent from logger handles to the scheduler
#[derive(Debug)]
pub(crate) enum FlushRequest {
    /// Drain the buffer; `done` fires once those entries are settled
    Flush { done: Option<oneshot::Sender<()>> },
    /// Final drain, then stop
    Shutdown { done: oneshot::Sender<()> },
}

type Waiters = Vec<oneshot::Sender<()>>;

fn resolve(waiters: Waiters) {
    for waiter in waiters {
        let _ = waiter.send(());
    }
}

pub(crate) struct FlushScheduler {
    shared: Arc<Shared>,
    batches: Option<mpsc::Sender<Batch>>,
    outcomes: mpsc::UnboundedReceiver<BatchOutcome>,
    /// Waiters of the batch currently at the writer
    in_flight: Option<Waiters>,
    /// A trigger arrived while a batch was in flight
    deferred: bool,
    deferred_waiters: Waiters,
    next_batch_id: u64,
}

impl FlushScheduler {
    pub(crate) fn new(
        shared: Arc<Shared>,
        batches: mpsc::Sender<Batch>,
        outcomes: mpsc::UnboundedReceiver<BatchOutcome>,
    ) -> Self {
        Self {
            shared,
            batches: Some(batches),
            outcomes,
            in_flight: None,
            deferred: false,
            deferred_waiters: Vec::new(),
            next_batch_id: 1,
        }
    }

    fn is_idle(&self) -> bool {
        self.in_flight.is_none() && !self.deferred
    }

    /// Start a round now, or defer it behind the batch in flight
    fn request(&mut self, waiter: Option<oneshot::Sender<()>>) {
        if self.in_flight.is_some() {
            self.deferred = true;
            self.deferred_waiters.extend(waiter);
            return;
        }
        self.start_round(waiter.into_iter().collect());
    }

    fn start_round(&mut self, waiters: Waiters) {
        let Some((entries, settings)) = self.shared.take_batch() else {
            resolve(waiters);
            return;
        };

        let batch = Batch {
            id: self.next_batch_id,
            entries,
            settings,
        };
        self.next_batch_id += 1;
        debug!(batch = batch.id, count = batch.entries.len(), "Handing batch to writer");

        let sent = match &self.batches {
            Some(tx) => tx.try_send(batch).map_err(|e| match e {
                mpsc::error::TrySendError::Full(b) | mpsc::error::TrySendError::Closed(b) => b,
            }),
            None => Err(batch),
        };

        match sent {
            Ok(()) => self.in_flight = Some(waiters),
            Err(batch) => {
                self.shared.record_outcome(BatchOutcome::Failed {
                    id: batch.id,
                    count: batch.entries.len(),
                    error: WriteError::Worker("background writer is not running".to_string()),
                });
                resolve(waiters);
            }
        }
    }

    fn complete(&mut self, outcome: BatchOutcome) {
        self.shared.record_outcome(outcome);
        if let Some(waiters) = self.in_flight.take() {
            resolve(waiters);
        }
        if self.deferred {
            self.deferred = false;
            let waiters = std::mem::take(&mut self.deferred_waiters);
            self.start_round(waiters);
        }
    }

    /// Writer vanished with a batch outstanding
    fn writer_lost(&mut self) {
        warn!("Background writer stopped unexpectedly");
        self.batches = None;
        if self.in_flight.is_some() {
            self.complete(BatchOutcome::Failed {
                id: self.next_batch_id - 1,
                count: 0,
                error: WriteError::Worker("background writer stopped".to_string()),
            });
        }
    }

    /// Drive the schedule until shutdown or until every logger handle is gone
    pub(crate) async fn run(
        mut self,
        mut requests: mpsc::Receiver<FlushRequest>,
        interval: Duration,
        writer: JoinHandle<()>,
    ) {
        let mut ticker = interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut stopping = false;
        let mut writer_alive = true;
        let mut shutdown_waiter: Option<oneshot::Sender<()>> = None;

        loop {
            tokio::select! {
                request = requests.recv(), if !stopping => match request {
                    Some(FlushRequest::Flush { done }) => self.request(done),
                    Some(FlushRequest::Shutdown { done }) => {
                        stopping = true;
                        shutdown_waiter = Some(done);
                        self.request(None);
                    }
                    None => {
                        stopping = true;
                        self.request(None);
                    }
                },
                _ = ticker.tick(), if !stopping => self.request(None),
                outcome = self.outcomes.recv(), if writer_alive => match outcome {
                    Some(outcome) => self.complete(outcome),
                    None => {
                        writer_alive = false;
                        self.writer_lost();
                    }
                },
                else => break,
            }

            if stopping && self.is_idle() {
                break;
            }
        }

        // Closing the queue lets the writer finish and exit
        self.batches = None;
        if let Err(e) = writer.await {
            warn!(error = %e, "Background writer task failed");
        }
        self.shared.close_sinks();
        debug!("Flush scheduler stopped");

        if let Some(done) = shutdown_waiter {
            let _ = done.send(());
        }
    }
}
