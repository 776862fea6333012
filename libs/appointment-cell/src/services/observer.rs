use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::ReservationError;
use crate::models::SchedulingMetrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Reserve,
    Confirm,
    Release,
    List,
    Sweep,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Reserve => "reserve",
            Operation::Confirm => "confirm",
            Operation::Release => "release",
            Operation::List => "list",
            Operation::Sweep => "sweep",
        }
    }
}

/// Hook invoked around every reservation operation. All methods default to no-ops.
pub trait ReservationObserver: Send + Sync {
    fn on_start(&self, _operation: Operation) {}

    fn on_finish(&self, _operation: Operation, _outcome: Result<(), &ReservationError>, _elapsed: Duration) {}

    /// The operation was dropped before it finished, e.g. the client went away.
    fn on_abandoned(&self, _operation: Operation, _elapsed: Duration) {}

    fn on_lock_contention(&self, _doctor_id: Uuid) {}

    fn on_holds_expired(&self, _count: usize) {}
}

/// One observed operation. Dropping it unfinished reports `on_abandoned`.
pub(crate) struct ObservedCall<'a> {
    observers: &'a [Arc<dyn ReservationObserver>],
    operation: Operation,
    started: Instant,
    finished: bool,
}

impl<'a> ObservedCall<'a> {
    pub(crate) fn start(observers: &'a [Arc<dyn ReservationObserver>], operation: Operation) -> Self {
        for observer in observers {
            observer.on_start(operation);
        }
        Self {
            observers,
            operation,
            started: Instant::now(),
            finished: false,
        }
    }

    pub(crate) fn finish<T>(mut self, result: &Result<T, ReservationError>) {
        self.finished = true;
        let elapsed = self.started.elapsed();
        for observer in self.observers {
            observer.on_finish(self.operation, result.as_ref().map(|_| ()), elapsed);
        }
    }
}

impl Drop for ObservedCall<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let elapsed = self.started.elapsed();
        for observer in self.observers {
            observer.on_abandoned(self.operation, elapsed);
        }
    }
}

/// Emits one structured event per operation.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl ReservationObserver for TracingObserver {
    fn on_start(&self, operation: Operation) {
        debug!(operation = operation.as_str(), "reservation operation started");
    }

    fn on_finish(&self, operation: Operation, outcome: Result<(), &ReservationError>, elapsed: Duration) {
        let elapsed_ms = elapsed.as_millis() as u64;
        match outcome {
            Ok(()) => info!(operation = operation.as_str(), elapsed_ms, "reservation operation succeeded"),
            Err(e) if e.is_client_error() => warn!(
                operation = operation.as_str(),
                elapsed_ms,
                kind = e.kind(),
                retryable = e.is_retryable(),
                "reservation operation rejected: {}",
                e
            ),
            Err(e) => error!(
                operation = operation.as_str(),
                elapsed_ms,
                kind = e.kind(),
                retryable = e.is_retryable(),
                "reservation operation failed: {}",
                e
            ),
        }
    }

    fn on_abandoned(&self, operation: Operation, elapsed: Duration) {
        warn!(
            operation = operation.as_str(),
            elapsed_ms = elapsed.as_millis() as u64,
            "reservation operation abandoned before completion"
        );
    }

    fn on_lock_contention(&self, doctor_id: Uuid) {
        debug!(%doctor_id, "scheduling scope contended");
    }
}

/// Lock-free counters behind the `/metrics` endpoint.
#[derive(Debug, Default)]
pub struct SchedulingMetricsObserver {
    attempted: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    conflicts: AtomicU64,
    reserve_micros: AtomicU64,
    in_flight: AtomicU32,
    peak_in_flight: AtomicU32,
    contention: AtomicU64,
    confirmations: AtomicU64,
    releases: AtomicU64,
    expired: AtomicU64,
}

impl SchedulingMetricsObserver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve calls currently running.
    pub fn in_flight(&self) -> u32 {
        self.in_flight.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> SchedulingMetrics {
        let attempted = self.attempted.load(Ordering::Relaxed);
        let succeeded = self.succeeded.load(Ordering::Relaxed);
        let conflicts = self.conflicts.load(Ordering::Relaxed);
        let finished = succeeded + self.failed.load(Ordering::Relaxed);

        SchedulingMetrics {
            total_bookings_attempted: attempted,
            successful_bookings: succeeded,
            failed_bookings: self.failed.load(Ordering::Relaxed),
            conflict_rate: if attempted == 0 { 0.0 } else { conflicts as f64 / attempted as f64 },
            average_booking_time_ms: if finished == 0 {
                0.0
            } else {
                self.reserve_micros.load(Ordering::Relaxed) as f64 / finished as f64 / 1000.0
            },
            peak_concurrency: self.peak_in_flight.load(Ordering::Relaxed),
            lock_contention_events: self.contention.load(Ordering::Relaxed),
            confirmations: self.confirmations.load(Ordering::Relaxed),
            releases: self.releases.load(Ordering::Relaxed),
            expired_holds: self.expired.load(Ordering::Relaxed),
            timestamp: Utc::now(),
        }
    }
}

impl ReservationObserver for SchedulingMetricsObserver {
    fn on_start(&self, operation: Operation) {
        if operation == Operation::Reserve {
            self.attempted.fetch_add(1, Ordering::Relaxed);
            let current = self.in_flight.fetch_add(1, Ordering::Relaxed) + 1;
            self.peak_in_flight.fetch_max(current, Ordering::Relaxed);
        }
    }

    fn on_finish(&self, operation: Operation, outcome: Result<(), &ReservationError>, elapsed: Duration) {
        match operation {
            Operation::Reserve => {
                self.in_flight.fetch_sub(1, Ordering::Relaxed);
                self.reserve_micros
                    .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
                match outcome {
                    Ok(()) => {
                        self.succeeded.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) => {
                        self.failed.fetch_add(1, Ordering::Relaxed);
                        if matches!(e, ReservationError::SlotTaken(_)) {
                            self.conflicts.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                }
            }
            Operation::Confirm if outcome.is_ok() => {
                self.confirmations.fetch_add(1, Ordering::Relaxed);
            }
            Operation::Release if outcome.is_ok() => {
                self.releases.fetch_add(1, Ordering::Relaxed);
            }
            _ => {}
        }
    }

    fn on_abandoned(&self, operation: Operation, elapsed: Duration) {
        if operation == Operation::Reserve {
            self.in_flight.fetch_sub(1, Ordering::Relaxed);
            self.reserve_micros
                .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
            self.failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn on_lock_contention(&self, _doctor_id: Uuid) {
        self.contention.fetch_add(1, Ordering::Relaxed);
    }

    fn on_holds_expired(&self, count: usize) {
        self.expired.fetch_add(count as u64, Ordering::Relaxed);
    }
}
