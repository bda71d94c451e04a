//! Billing pipeline - computes fares and writes the ledger off the gate path
//!
//! Exit controllers enqueue a task holding the billing start and exit time and
//! go straight back to their gate. Workers drain the shared FIFO, price each
//! stay and append it to the ledger, so file I/O latency never stalls a gate.

use crate::domain::error::{ParkingError, Result};
use crate::domain::types::{Cents, Plate};
use crate::infra::metrics::Metrics;
use crate::io::ledger::RevenueLedger;
use crate::io::surface::Rendezvous;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// A car to bill
#[derive(Debug, Clone, Copy)]
pub struct BillingTask {
    pub plate: Plate,
    /// Billing start, recorded at admission
    pub entered_at: Instant,
    /// Billing end, captured when the exit controller accepted the car
    pub exited_at: Instant,
    /// When the task was enqueued (for queue delay measurement)
    pub enqueued_at: Instant,
}

/// Fare for a stay: whole elapsed milliseconds at `rate_per_ms` dollars, in cents
pub fn fare_cents(elapsed: Duration, rate_per_ms: f64) -> Cents {
    let dollars = elapsed.as_millis() as f64 * rate_per_ms;
    Cents((dollars * 100.0).round().max(0.0) as u64)
}

#[derive(Debug, Default)]
struct QueueState {
    tasks: VecDeque<BillingTask>,
    closed: bool,
}

/// Shared FIFO of billing tasks, one lock and one condition
#[derive(Debug, Default)]
pub struct BillingQueue {
    inner: Rendezvous<QueueState>,
}

impl BillingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a task; only holds the lock for the push
    pub fn enqueue(&self, task: BillingTask) -> Result<()> {
        self.inner.publish(|queue| {
            if queue.closed {
                return Err(ParkingError::ShuttingDown);
            }
            queue
                .tasks
                .try_reserve(1)
                .map_err(|_| ParkingError::AllocationFailure("billing task"))?;
            queue.tasks.push_back(task);
            Ok(())
        })
    }

    /// Block until a task is available; None once closed and drained
    pub fn dequeue(&self) -> Option<BillingTask> {
        self.inner
            .wait_for(None, |queue| match queue.tasks.pop_front() {
                Some(task) => Some(Some(task)),
                None if queue.closed => Some(None),
                None => None,
            })
            .flatten()
    }

    /// Stop accepting tasks; workers finish what is queued and exit
    pub fn close(&self) {
        self.inner.publish(|queue| queue.closed = true);
    }

    pub fn len(&self) -> usize {
        self.inner.lock().tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Worker that prices tasks and appends them to the ledger
pub struct BillingWorker {
    id: usize,
    queue: Arc<BillingQueue>,
    ledger: Arc<RevenueLedger>,
    rate_per_ms: f64,
    metrics: Arc<Metrics>,
}

impl BillingWorker {
    pub fn new(
        id: usize,
        queue: Arc<BillingQueue>,
        ledger: Arc<RevenueLedger>,
        rate_per_ms: f64,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self { id, queue, ledger, rate_per_ms, metrics }
    }

    /// Run until the queue is closed and empty
    pub fn run(self) {
        info!(worker = self.id, "billing_worker_started");

        while let Some(task) = self.queue.dequeue() {
            let queue_delay_us = task.enqueued_at.elapsed().as_micros() as u64;
            self.metrics.record_billing_queue_delay(queue_delay_us);

            // Warn if queue delay exceeds 10ms - indicates backlog
            if queue_delay_us > 10_000 {
                warn!(
                    plate = %task.plate,
                    queue_delay_us = %queue_delay_us,
                    "billing_queue_delay_high"
                );
            }

            self.bill(task);
        }

        info!(worker = self.id, "billing_worker_stopped");
    }

    fn bill(&self, task: BillingTask) {
        let stay = task.exited_at.saturating_duration_since(task.entered_at);
        let fare = fare_cents(stay, self.rate_per_ms);

        match self.ledger.record(task.plate, fare) {
            Ok(total) => {
                self.metrics.record_bill_written();
                debug!(
                    plate = %task.plate,
                    stay_ms = %stay.as_millis(),
                    fare = %fare,
                    total = %total,
                    "bill_written"
                );
            }
            Err(e) => {
                // Task is dropped; gates keep running
                self.metrics.record_ledger_failure();
                error!(plate = %task.plate, fare = %fare, error = %e, "bill_dropped");
            }
        }
    }
}

/// Create the billing queue and its workers
///
/// Returns the queue (for exit controllers) and the workers (to be spawned)
pub fn create_billing_pipeline(
    ledger: Arc<RevenueLedger>,
    metrics: Arc<Metrics>,
    rate_per_ms: f64,
    workers: usize,
) -> (Arc<BillingQueue>, Vec<BillingWorker>) {
    let queue = Arc::new(BillingQueue::new());
    let workers = (0..workers.max(1))
        .map(|id| BillingWorker::new(id, queue.clone(), ledger.clone(), rate_per_ms, metrics.clone()))
        .collect();
    (queue, workers)
}
