//! Bounded-concurrency dispatcher
//!
//! Each tick dispatches at most one file:
//! 1. take a worker slot (fails at the `max_workers` ceiling)
//! 2. claim the next `not_read` file in round-robin order, marking it `reading`
//! 3. run a worker for it on the blocking pool
//!
//! Concurrency therefore ramps up by one worker per tick. A worker that never
//! returns keeps its slot; there is no timeout.

use crate::metrics::Metrics;
use crate::tracking::{Claim, TrackingTable};
use crate::worker::{Worker, WorkerContext, WorkerOutcome};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Counter of running workers with a hard ceiling.
#[derive(Debug)]
pub struct WorkerSlots {
    active: AtomicUsize,
    peak: AtomicUsize,
    max: usize,
}

impl WorkerSlots {
    pub fn new(max: usize) -> Arc<Self> {
        Arc::new(Self {
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            max,
        })
    }

    /// Take a slot unless `max` are already taken.
    pub fn try_acquire(self: &Arc<Self>) -> Option<WorkerSlot> {
        self.active
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n < self.max).then_some(n + 1)
            })
            .ok()?;
        Some(WorkerSlot {
            slots: Arc::clone(self),
        })
    }

    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Highest number of workers ever running at once. Slots taken and
    /// given back without a claimed file do not count.
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn max(&self) -> usize {
        self.max
    }
}

/// One taken slot; dropping it frees the slot.
#[derive(Debug)]
pub struct WorkerSlot {
    slots: Arc<WorkerSlots>,
}

impl WorkerSlot {
    /// Record that this slot now runs a worker.
    pub fn mark_busy(&self) {
        let running = self.slots.active();
        self.slots.peak.fetch_max(running, Ordering::SeqCst);
    }
}

impl Drop for WorkerSlot {
    fn drop(&mut self) {
        self.slots.active.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A worker that has been started.
pub struct Dispatched {
    pub claim: Claim,
    pub handle: JoinHandle<WorkerOutcome>,
}

pub struct Scheduler {
    table: Arc<TrackingTable>,
    slots: Arc<WorkerSlots>,
    ctx: Arc<WorkerContext>,
    metrics: Arc<Metrics>,
}

impl Scheduler {
    pub fn new(
        table: Arc<TrackingTable>,
        slots: Arc<WorkerSlots>,
        ctx: Arc<WorkerContext>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            table,
            slots,
            ctx,
            metrics,
        }
    }

    pub fn slots(&self) -> &Arc<WorkerSlots> {
        &self.slots
    }

    /// Claim the next eligible file and bind it to a slot, without starting
    /// it. `None` when at capacity or when nothing is eligible.
    pub fn next_worker(&self) -> Option<Worker> {
        let Some(slot) = self.slots.try_acquire() else {
            debug!(
                active = self.slots.active(),
                max = self.slots.max(),
                "At max workers, skipping dispatch"
            );
            return None;
        };
        // Dropping `slot` on the early return gives it back.
        let claim = self.table.claim_next()?;
        slot.mark_busy();

        self.metrics.inc_dispatches();
        info!(
            file = %claim.name,
            offset = claim.offset,
            active = self.slots.active(),
            "Dispatching worker"
        );
        Some(Worker::new(Arc::clone(&self.ctx), claim, slot))
    }

    /// One scheduler tick: start at most one worker on the blocking pool.
    ///
    /// Must be called from within a tokio runtime.
    pub fn dispatch_once(&self) -> Option<Dispatched> {
        let worker = self.next_worker()?;
        let claim = Claim {
            name: worker.file().to_string(),
            offset: worker.offset(),
        };
        let handle = tokio::task::spawn_blocking(move || worker.run());
        Some(Dispatched { claim, handle })
    }
}
