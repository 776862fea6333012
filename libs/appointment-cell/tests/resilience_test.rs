mod common;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use assert_matches::assert_matches;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use uuid::Uuid;

use appointment_cell::{
    AppointmentSlot, Clock, InMemorySlotLedger, LedgerError, PageRequest, ReservationEngine, ReservationError,
    ReservationPolicy, SlotFilter, SlotLedger, SlotPage, SlotStatus, SlotTransition,
};
use common::{at, monday, TestHarness};

/// Delegates to an in-memory ledger after injecting failures or delays.
struct FlakyLedger {
    inner: InMemorySlotLedger,
    failures_left: AtomicU32,
    /// Report the insert as failed after it was actually stored.
    lose_insert_ack: AtomicU32,
    delay: StdDuration,
    insert_delay: StdDuration,
}

impl FlakyLedger {
    fn new() -> Self {
        Self {
            inner: InMemorySlotLedger::new(),
            failures_left: AtomicU32::new(0),
            lose_insert_ack: AtomicU32::new(0),
            delay: StdDuration::ZERO,
            insert_delay: StdDuration::ZERO,
        }
    }

    async fn gate(&self) -> Result<(), LedgerError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let left = self.failures_left.load(Ordering::SeqCst);
        if left > 0 {
            self.failures_left.store(left - 1, Ordering::SeqCst);
            return Err(LedgerError::Unavailable("connection reset".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl SlotLedger for FlakyLedger {
    async fn overlapping(
        &self,
        doctor_id: Uuid,
        date: NaiveDate,
        start_time: NaiveTime,
        duration_minutes: i64,
        now: DateTime<Utc>,
    ) -> Result<Vec<AppointmentSlot>, LedgerError> {
        self.gate().await?;
        self.inner.overlapping(doctor_id, date, start_time, duration_minutes, now).await
    }

    async fn insert(&self, slot: AppointmentSlot, now: DateTime<Utc>) -> Result<AppointmentSlot, LedgerError> {
        self.gate().await?;
        if !self.insert_delay.is_zero() {
            tokio::time::sleep(self.insert_delay).await;
        }
        let stored = self.inner.insert(slot, now).await?;
        if self.lose_insert_ack.swap(0, Ordering::SeqCst) > 0 {
            return Err(LedgerError::Unavailable("response lost".to_string()));
        }
        Ok(stored)
    }

    async fn get(&self, id: Uuid) -> Result<Option<AppointmentSlot>, LedgerError> {
        self.inner.get(id).await
    }

    async fn transition(&self, id: Uuid, change: SlotTransition) -> Result<AppointmentSlot, LedgerError> {
        self.gate().await?;
        self.inner.transition(id, change).await
    }

    async fn lapsed_holds(
        &self,
        now: DateTime<Utc>,
        scope: Option<(Uuid, NaiveDate)>,
        limit: usize,
    ) -> Result<Vec<AppointmentSlot>, LedgerError> {
        self.inner.lapsed_holds(now, scope, limit).await
    }

    async fn active_on(
        &self,
        doctor_id: Uuid,
        date: NaiveDate,
        now: DateTime<Utc>,
    ) -> Result<Vec<AppointmentSlot>, LedgerError> {
        self.inner.active_on(doctor_id, date, now).await
    }

    async fn list(&self, filter: &SlotFilter, page: &PageRequest) -> Result<SlotPage, LedgerError> {
        self.inner.list(filter, page).await
    }
}

fn fast_policy() -> ReservationPolicy {
    ReservationPolicy {
        storage_retry_backoff: StdDuration::from_millis(1),
        ..ReservationPolicy::default()
    }
}

fn engine_over(h: &TestHarness, ledger: Arc<FlakyLedger>, policy: ReservationPolicy) -> ReservationEngine {
    ReservationEngine::new(ledger, h.catalog.clone(), h.clock.clone(), policy)
}

#[tokio::test]
async fn test_transient_failures_are_retried() {
    let h = TestHarness::new();
    let ledger = Arc::new(FlakyLedger::new());
    ledger.failures_left.store(2, Ordering::SeqCst);
    let engine = engine_over(&h, ledger.clone(), fast_policy());

    let hold = engine.reserve(h.request(Uuid::new_v4(), at(9, 0), 30)).await.unwrap();
    assert_eq!(hold.status, SlotStatus::Held);
}

#[tokio::test]
async fn test_retries_are_bounded() {
    let h = TestHarness::new();
    let ledger = Arc::new(FlakyLedger::new());
    ledger.failures_left.store(10, Ordering::SeqCst);
    let engine = engine_over(&h, ledger.clone(), fast_policy());

    let result = engine.reserve(h.request(Uuid::new_v4(), at(9, 0), 30)).await;
    assert_matches!(result, Err(ReservationError::StorageUnavailable(_)));
    assert!(ledger.inner.is_empty().await);
}

#[tokio::test]
async fn test_lost_insert_ack_is_recognised_as_own_write() {
    let h = TestHarness::new();
    let ledger = Arc::new(FlakyLedger::new());
    ledger.lose_insert_ack.store(1, Ordering::SeqCst);
    let engine = engine_over(&h, ledger.clone(), fast_policy());

    let hold = engine.reserve(h.request(Uuid::new_v4(), at(9, 0), 30)).await.unwrap();
    assert_eq!(ledger.inner.len().await, 1);

    let confirmed = engine.confirm(hold.slot_id, &hold.hold_key).await.unwrap();
    assert_eq!(confirmed.status, SlotStatus::Confirmed);
}

#[tokio::test]
async fn test_slow_storage_times_out() {
    let h = TestHarness::new();
    let ledger = Arc::new(FlakyLedger {
        delay: StdDuration::from_millis(200),
        ..FlakyLedger::new()
    });
    let policy = ReservationPolicy {
        operation_timeout: StdDuration::from_millis(50),
        ..fast_policy()
    };
    let engine = engine_over(&h, ledger, policy);

    let result = engine.reserve(h.request(Uuid::new_v4(), at(9, 0), 30)).await;
    assert_matches!(result, Err(ReservationError::Timeout(50)));

    // The doctor's scope was released when the operation was abandoned.
    let locks = engine.lock_table();
    assert_eq!(locks.prune_idle(), 1);
}

#[tokio::test]
async fn test_hold_stored_after_deadline_is_expired() {
    let h = TestHarness::new();
    let ledger = Arc::new(FlakyLedger {
        insert_delay: StdDuration::from_millis(150),
        ..FlakyLedger::new()
    });
    let policy = ReservationPolicy {
        operation_timeout: StdDuration::from_millis(50),
        ..fast_policy()
    };
    let engine = engine_over(&h, ledger.clone(), policy);

    let result = engine.reserve(h.request(Uuid::new_v4(), at(9, 0), 30)).await;
    assert_matches!(result, Err(ReservationError::Timeout(50)));

    // The insert still lands; it must not keep the interval blocked.
    tokio::time::sleep(StdDuration::from_millis(400)).await;
    assert_eq!(ledger.inner.len().await, 1);

    let now = h.clock.now();
    let active = ledger.inner.active_on(h.doctor_id, monday(), now).await.unwrap();
    assert!(active.is_empty());

    let lapsed = ledger.inner.lapsed_holds(now, None, 10).await.unwrap();
    assert!(lapsed.is_empty());
}
