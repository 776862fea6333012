// libs/appointment-cell/src/services/reservation.rs
//
// Hold-then-confirm reservation state machine:
//   Requested -> Held -> Confirmed | Released | Expired
//

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use tokio::sync::oneshot;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use doctor_cell::{iso_weekday, WorkingHoursCatalog};

use crate::clock::Clock;
use crate::error::{LedgerError, ReservationError};
use crate::models::{
    slot_end, AppointmentSlot, AppointmentView, Reservation, ReservationPolicy, ReserveRequest,
    SlotStatus, SlotTransition,
};
use crate::services::keys::{generate_hold_key, key_digest};
use crate::services::ledger::SlotLedger;
use crate::services::locks::DoctorLockTable;
use crate::services::observer::{ObservedCall, Operation, ReservationObserver};

/// Upper bound on lapsed holds expired inline for one doctor and day.
const INLINE_EXPIRY_LIMIT: usize = 500;

pub struct ReservationEngine {
    ledger: Arc<dyn SlotLedger>,
    catalog: Arc<dyn WorkingHoursCatalog>,
    clock: Arc<dyn Clock>,
    locks: Arc<DoctorLockTable>,
    policy: ReservationPolicy,
    observers: Vec<Arc<dyn ReservationObserver>>,
}

impl ReservationEngine {
    pub fn new(
        ledger: Arc<dyn SlotLedger>,
        catalog: Arc<dyn WorkingHoursCatalog>,
        clock: Arc<dyn Clock>,
        policy: ReservationPolicy,
    ) -> Self {
        Self {
            ledger,
            catalog,
            clock,
            locks: Arc::new(DoctorLockTable::new()),
            policy: policy.normalized(),
            observers: Vec::new(),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn ReservationObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn with_lock_table(mut self, locks: Arc<DoctorLockTable>) -> Self {
        self.locks = locks;
        self
    }

    pub fn lock_table(&self) -> Arc<DoctorLockTable> {
        Arc::clone(&self.locks)
    }

    pub fn policy(&self) -> &ReservationPolicy {
        &self.policy
    }

    // ==========================================================================
    // PUBLIC OPERATIONS
    // ==========================================================================

    /// Provisionally reserve `[start_time, start_time + duration)` for a patient.
    pub async fn reserve(&self, request: ReserveRequest) -> Result<Reservation, ReservationError> {
        self.observed(Operation::Reserve, self.bounded(self.reserve_inner(request)))
            .await
    }

    /// Finalize a hold. Replaying a successful confirmation with the same key is a no-op.
    pub async fn confirm(&self, slot_id: Uuid, hold_key: &str) -> Result<AppointmentSlot, ReservationError> {
        self.observed(Operation::Confirm, self.bounded(self.confirm_inner(slot_id, hold_key)))
            .await
    }

    /// Cancel a held or confirmed slot. The caller has already authorized `requester_id`.
    pub async fn release(&self, slot_id: Uuid, requester_id: Uuid) -> Result<AppointmentSlot, ReservationError> {
        self.observed(Operation::Release, self.bounded(self.release_inner(slot_id, requester_id)))
            .await
    }

    pub async fn get(&self, slot_id: Uuid) -> Result<AppointmentSlot, ReservationError> {
        self.bounded(self.fetch(slot_id)).await
    }

    // ==========================================================================
    // STATE MACHINE
    // ==========================================================================

    #[instrument(skip(self, request), fields(doctor_id = %request.doctor_id, date = %request.appointment_date))]
    async fn reserve_inner(&self, request: ReserveRequest) -> Result<Reservation, ReservationError> {
        let end_time = self.validate_request(&request, self.clock.now())?;

        let weekday = iso_weekday(request.appointment_date);
        let intervals = self.catalog.intervals_for(request.doctor_id, weekday).await?;
        if !intervals.iter().any(|i| i.contains(request.start_time, end_time)) {
            debug!(
                "No working interval on weekday {} covers {}-{}",
                weekday, request.start_time, end_time
            );
            return Err(ReservationError::OutsideWorkingHours {
                doctor_id: request.doctor_id,
                date: request.appointment_date,
                start: request.start_time,
                end: end_time,
            });
        }

        let guard = self.locks.acquire(request.doctor_id).await;
        if guard.contended() {
            for observer in &self.observers {
                observer.on_lock_contention(request.doctor_id);
            }
        }

        // Waiting on the scope takes time; read the clock again.
        let now = self.clock.now();
        self.expire_lapsed_for(request.doctor_id, request.appointment_date, now)
            .await?;

        let conflicts = self
            .with_storage_retry("overlap query", || {
                self.ledger.overlapping(
                    request.doctor_id,
                    request.appointment_date,
                    request.start_time,
                    request.duration_minutes,
                    now,
                )
            })
            .await?;

        if let Some(existing) = conflicts.first() {
            return Err(ReservationError::SlotTaken(format!(
                "doctor {} already has appointment {} at {}-{} on {}",
                request.doctor_id,
                existing.id,
                existing.start_time,
                existing.end_time(),
                existing.appointment_date
            )));
        }

        let hold_key = generate_hold_key();
        let expires_at = now
            .checked_add_signed(self.policy.hold_ttl)
            .ok_or_else(|| ReservationError::Validation("hold lifetime is out of range".to_string()))?;
        let slot = AppointmentSlot::held(&request, key_digest(&hold_key), expires_at, now);

        let stored = self.insert_hold(slot, now).await?;
        drop(guard);

        info!(
            "Held slot {} for patient {} with doctor {} until {}",
            stored.id, stored.patient_id, stored.doctor_id, expires_at
        );

        Ok(Reservation {
            slot_id: stored.id,
            hold_key,
            expires_at,
            status: stored.status,
            appointment: AppointmentView::from(&stored),
        })
    }

    #[instrument(skip(self, hold_key))]
    async fn confirm_inner(&self, slot_id: Uuid, hold_key: &str) -> Result<AppointmentSlot, ReservationError> {
        if hold_key.trim().is_empty() {
            return Err(ReservationError::Validation("hold key is required".to_string()));
        }
        let digest = key_digest(hold_key);

        let slot = self.fetch(slot_id).await?;
        let now = self.clock.now();

        match slot.status {
            SlotStatus::Confirmed => {
                return if slot.confirmation_digest.as_deref() == Some(digest.as_str()) {
                    debug!("Slot {} already confirmed with this key", slot_id);
                    Ok(slot)
                } else {
                    Err(ReservationError::KeyMismatch(slot_id))
                };
            }
            SlotStatus::Released | SlotStatus::Expired => return Err(ReservationError::Expired(slot_id)),
            SlotStatus::Held => {}
        }

        if slot.is_lapsed(now) {
            self.expire_quietly(&slot, now).await;
            return Err(ReservationError::Expired(slot_id));
        }

        if slot.hold_key.as_deref() != Some(digest.as_str()) {
            warn!("Confirmation of slot {} rejected: key mismatch", slot_id);
            return Err(ReservationError::KeyMismatch(slot_id));
        }

        let change = SlotTransition::confirm(now, digest.clone());
        match self
            .with_storage_retry("confirm transition", || self.ledger.transition(slot_id, change.clone()))
            .await
        {
            Ok(confirmed) => {
                info!("Confirmed slot {}", slot_id);
                Ok(confirmed)
            }
            Err(LedgerError::StaleState { .. }) => {
                // Lost the race; a duplicate confirm with the same key still counts as success.
                let current = self.fetch(slot_id).await?;
                match current.status {
                    SlotStatus::Confirmed if current.confirmation_digest.as_deref() == Some(digest.as_str()) => {
                        Ok(current)
                    }
                    SlotStatus::Expired | SlotStatus::Released => Err(ReservationError::Expired(slot_id)),
                    actual => Err(ReservationError::StaleState {
                        id: slot_id,
                        expected: SlotStatus::Held,
                        actual,
                    }),
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    #[instrument(skip(self))]
    async fn release_inner(&self, slot_id: Uuid, requester_id: Uuid) -> Result<AppointmentSlot, ReservationError> {
        let mut retried = false;

        loop {
            let slot = self.fetch(slot_id).await?;
            let now = self.clock.now();
            if slot.is_lapsed(now) {
                self.expire_quietly(&slot, now).await;
                return Err(ReservationError::Expired(slot_id));
            }

            let from = match slot.status {
                SlotStatus::Held | SlotStatus::Confirmed => slot.status,
                SlotStatus::Released => {
                    debug!("Slot {} already released", slot_id);
                    return Ok(slot);
                }
                SlotStatus::Expired => return Err(ReservationError::Expired(slot_id)),
            };

            let change = SlotTransition::release(from, now, requester_id);
            match self
                .with_storage_retry("release transition", || self.ledger.transition(slot_id, change.clone()))
                .await
            {
                Ok(released) => {
                    info!("Released slot {} (was {}) by {}", slot_id, from, requester_id);
                    return Ok(released);
                }
                // One re-read covers a hold being confirmed under us.
                Err(LedgerError::StaleState { .. }) if !retried => {
                    retried = true;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    // ==========================================================================
    // HELPERS
    // ==========================================================================

    fn validate_request(
        &self,
        request: &ReserveRequest,
        now: DateTime<Utc>,
    ) -> Result<chrono::NaiveTime, ReservationError> {
        if request.doctor_id.is_nil() || request.patient_id.is_nil() {
            return Err(ReservationError::Validation(
                "doctor_id and patient_id are required".to_string(),
            ));
        }

        let duration = request.duration_minutes;
        if duration <= 0 {
            return Err(ReservationError::Validation("duration must be positive".to_string()));
        }
        if duration < self.policy.min_duration_minutes || duration > self.policy.max_duration_minutes {
            return Err(ReservationError::Validation(format!(
                "duration must be between {} and {} minutes",
                self.policy.min_duration_minutes, self.policy.max_duration_minutes
            )));
        }

        let end_time = slot_end(request.start_time, duration).ok_or_else(|| {
            ReservationError::Validation("appointment must end before midnight".to_string())
        })?;

        let starts_at = request.appointment_date.and_time(request.start_time).and_utc();
        let earliest = now
            .checked_sub_signed(self.policy.booking_grace)
            .ok_or_else(|| ReservationError::Validation("booking grace is out of range".to_string()))?;
        let latest = now
            .checked_add_signed(self.policy.max_advance)
            .ok_or_else(|| ReservationError::Validation("booking horizon is out of range".to_string()))?;

        if starts_at < earliest {
            return Err(ReservationError::Validation(format!(
                "appointment time {} is in the past",
                starts_at
            )));
        }
        if starts_at > latest {
            return Err(ReservationError::Validation(format!(
                "appointments can be booked at most {} days ahead",
                self.policy.max_advance.num_days()
            )));
        }

        Ok(end_time)
    }

    async fn fetch(&self, slot_id: Uuid) -> Result<AppointmentSlot, ReservationError> {
        self.with_storage_retry("slot lookup", || self.ledger.get(slot_id))
            .await?
            .ok_or(ReservationError::NotFound(slot_id))
    }

    /// Lapsed holds of this doctor/day become `Expired` before the overlap check.
    async fn expire_lapsed_for(
        &self,
        doctor_id: Uuid,
        date: NaiveDate,
        now: DateTime<Utc>,
    ) -> Result<(), ReservationError> {
        let lapsed = self
            .with_storage_retry("lapsed hold scan", || {
                self.ledger.lapsed_holds(now, Some((doctor_id, date)), INLINE_EXPIRY_LIMIT)
            })
            .await?;

        for slot in &lapsed {
            self.expire_quietly(slot, now).await;
        }
        Ok(())
    }

    async fn expire_quietly(&self, slot: &AppointmentSlot, now: DateTime<Utc>) {
        match self.ledger.transition(slot.id, SlotTransition::expire(now)).await {
            Ok(_) => {
                info!("Expired lapsed hold {}", slot.id);
                for observer in &self.observers {
                    observer.on_holds_expired(1);
                }
            }
            Err(LedgerError::StaleState { .. }) | Err(LedgerError::NotFound(_)) => {
                debug!("Hold {} changed before it could be expired", slot.id);
            }
            Err(e) => warn!("Could not expire hold {}: {}", slot.id, e),
        }
    }

    /// The insert runs on its own task so that abandoning the operation cannot
    /// leave a stored hold behind: whoever sees the row arrive with nobody
    /// waiting for it expires it.
    async fn insert_hold(&self, slot: AppointmentSlot, now: DateTime<Utc>) -> Result<AppointmentSlot, ReservationError> {
        let (tx, rx) = oneshot::channel();
        let ledger = Arc::clone(&self.ledger);
        let clock = Arc::clone(&self.clock);
        let attempts = self.policy.storage_retry_attempts.max(1);
        let backoff = self.policy.storage_retry_backoff;

        tokio::spawn(async move {
            let result = insert_with_retry(ledger.as_ref(), slot, now, attempts, backoff).await;
            if let Err(Ok(orphan)) = tx.send(result) {
                expire_orphan(ledger.as_ref(), clock.as_ref(), &orphan).await;
            }
        });

        PendingInsert {
            rx: Some(rx),
            ledger: Arc::clone(&self.ledger),
            clock: Arc::clone(&self.clock),
        }
        .wait()
        .await
    }

    /// Bounded retry of transient storage failures with linear backoff.
    async fn with_storage_retry<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T, LedgerError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, LedgerError>>,
    {
        let attempts = self.policy.storage_retry_attempts.max(1);
        let mut attempt = 1;

        loop {
            match op().await {
                Err(LedgerError::Unavailable(detail)) if attempt < attempts => {
                    warn!(
                        "{} failed transiently (attempt {}/{}): {}",
                        what, attempt, attempts, detail
                    );
                    tokio::time::sleep(self.policy.storage_retry_backoff * attempt).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    /// Abandon the operation once the deadline passes. Dropping the future
    /// releases any doctor scope it held.
    async fn bounded<T, Fut>(&self, fut: Fut) -> Result<T, ReservationError>
    where
        Fut: Future<Output = Result<T, ReservationError>>,
    {
        let deadline = self.policy.operation_timeout;
        match tokio::time::timeout(deadline, fut).await {
            Ok(result) => result,
            Err(_) => Err(ReservationError::Timeout(deadline.as_millis() as u64)),
        }
    }

    async fn observed<T, Fut>(&self, operation: Operation, fut: Fut) -> Result<T, ReservationError>
    where
        Fut: Future<Output = Result<T, ReservationError>>,
    {
        let call = ObservedCall::start(&self.observers, operation);
        let result = fut.await;
        call.finish(&result);
        result
    }
}

/// Insert under retry. A conflict after an unacknowledged attempt may be our own write.
async fn insert_with_retry(
    ledger: &dyn SlotLedger,
    slot: AppointmentSlot,
    now: DateTime<Utc>,
    attempts: u32,
    backoff: Duration,
) -> Result<AppointmentSlot, ReservationError> {
    let mut attempt = 1;
    let mut uncertain = false;

    loop {
        match ledger.insert(slot.clone(), now).await {
            Ok(stored) => return Ok(stored),
            Err(LedgerError::Unavailable(detail)) if attempt < attempts => {
                warn!(
                    "Insert of slot {} failed transiently (attempt {}/{}): {}",
                    slot.id, attempt, attempts, detail
                );
                uncertain = true;
                tokio::time::sleep(backoff * attempt).await;
                attempt += 1;
            }
            Err(LedgerError::Conflict(detail)) => {
                if uncertain {
                    if let Ok(Some(existing)) = ledger.get(slot.id).await {
                        if existing.hold_key == slot.hold_key {
                            return Ok(existing);
                        }
                    }
                }
                return Err(ReservationError::SlotTaken(detail));
            }
            Err(e) => return Err(e.into()),
        }
    }
}

async fn expire_orphan(ledger: &dyn SlotLedger, clock: &dyn Clock, orphan: &AppointmentSlot) {
    warn!("Reservation of slot {} was abandoned after its insert, expiring the hold", orphan.id);
    match ledger.transition(orphan.id, SlotTransition::expire(clock.now())).await {
        Ok(_) => debug!("Expired orphaned hold {}", orphan.id),
        Err(LedgerError::StaleState { .. }) => {}
        Err(e) => warn!("Could not expire orphaned hold {}: {}", orphan.id, e),
    }
}

/// Receiving side of a detached insert. Dropped before the result was taken,
/// it expires a hold that has already been stored.
struct PendingInsert {
    rx: Option<oneshot::Receiver<Result<AppointmentSlot, ReservationError>>>,
    ledger: Arc<dyn SlotLedger>,
    clock: Arc<dyn Clock>,
}

impl PendingInsert {
    async fn wait(mut self) -> Result<AppointmentSlot, ReservationError> {
        let received = match self.rx.as_mut() {
            Some(rx) => rx.await,
            None => return Err(ReservationError::StorageUnavailable("insert result already taken".to_string())),
        };
        self.rx = None;

        match received {
            Ok(result) => result,
            Err(_) => Err(ReservationError::StorageUnavailable(
                "insert task ended without reporting a result".to_string(),
            )),
        }
    }
}

impl Drop for PendingInsert {
    fn drop(&mut self) {
        let mut rx = match self.rx.take() {
            Some(rx) => rx,
            None => return,
        };
        // A result sent after this point fails on the task side, which then expires it.
        if let Ok(Ok(orphan)) = rx.try_recv() {
            if let Ok(runtime) = tokio::runtime::Handle::try_current() {
                let ledger = Arc::clone(&self.ledger);
                let clock = Arc::clone(&self.clock);
                runtime.spawn(async move {
                    expire_orphan(ledger.as_ref(), clock.as_ref(), &orphan).await;
                });
            }
        }
    }
}
