use std::cmp::Ordering;
use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use tokio::sync::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::LedgerError;
use crate::models::{
    slot_end, AppointmentSlot, PageRequest, SlotFilter, SlotPage, SlotStatus, SlotTransition,
    SortColumn, SortDirection,
};

use super::SlotLedger;

#[derive(Default)]
struct LedgerState {
    slots: HashMap<Uuid, AppointmentSlot>,
    by_doctor_day: HashMap<(Uuid, NaiveDate), Vec<Uuid>>,
}

impl LedgerState {
    fn day(&self, doctor_id: Uuid, date: NaiveDate) -> impl Iterator<Item = &AppointmentSlot> {
        self.by_doctor_day
            .get(&(doctor_id, date))
            .into_iter()
            .flatten()
            .filter_map(|id| self.slots.get(id))
    }
}

/// Single-process ledger. All checks run under one write lock, so the
/// non-overlap invariant also holds if a caller skips the engine's doctor scope.
#[derive(Default)]
pub struct InMemorySlotLedger {
    state: RwLock<LedgerState>,
}

impl InMemorySlotLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.slots.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

fn compare(a: &AppointmentSlot, b: &AppointmentSlot, page: &PageRequest) -> Ordering {
    let primary = match page.order_by.column {
        SortColumn::AppointmentDate => a
            .appointment_date
            .cmp(&b.appointment_date)
            .then(a.start_time.cmp(&b.start_time)),
        SortColumn::StartTime => a.start_time.cmp(&b.start_time),
        SortColumn::Duration => a.duration_minutes.cmp(&b.duration_minutes),
        SortColumn::Status => a.status.as_str().cmp(b.status.as_str()),
        SortColumn::CreatedAt => a.created_at.cmp(&b.created_at),
        SortColumn::UpdatedAt => a.updated_at.cmp(&b.updated_at),
    };

    let primary = match page.order_by.direction {
        SortDirection::Asc => primary,
        SortDirection::Desc => primary.reverse(),
    };

    // Stable across pages
    primary.then(a.id.cmp(&b.id))
}

#[async_trait]
impl SlotLedger for InMemorySlotLedger {
    async fn overlapping(
        &self,
        doctor_id: Uuid,
        date: NaiveDate,
        start_time: NaiveTime,
        duration_minutes: i64,
        now: DateTime<Utc>,
    ) -> Result<Vec<AppointmentSlot>, LedgerError> {
        let end_time = slot_end(start_time, duration_minutes)
            .ok_or_else(|| LedgerError::Backend("interval runs past midnight".to_string()))?;

        let state = self.state.read().await;
        Ok(state
            .day(doctor_id, date)
            .filter(|slot| slot.is_active(now) && slot.overlaps(start_time, end_time))
            .cloned()
            .collect())
    }

    async fn insert(&self, slot: AppointmentSlot, now: DateTime<Utc>) -> Result<AppointmentSlot, LedgerError> {
        if slot.duration_minutes <= 0 {
            return Err(LedgerError::Backend("duration must be positive".to_string()));
        }
        let end_time = slot_end(slot.start_time, slot.duration_minutes)
            .ok_or_else(|| LedgerError::Backend("interval runs past midnight".to_string()))?;

        let mut state = self.state.write().await;

        if state.slots.contains_key(&slot.id) {
            return Err(LedgerError::Conflict(format!("slot {} already exists", slot.id)));
        }

        if slot.is_active(now) {
            if let Some(existing) = state
                .day(slot.doctor_id, slot.appointment_date)
                .find(|other| other.is_active(now) && other.overlaps(slot.start_time, end_time))
            {
                warn!(
                    "Rejected insert of slot {} overlapping {} for doctor {}",
                    slot.id, existing.id, slot.doctor_id
                );
                return Err(LedgerError::Conflict(format!(
                    "overlaps appointment {} ({}-{})",
                    existing.id,
                    existing.start_time,
                    existing.end_time()
                )));
            }
        }

        if let Some(key) = slot.hold_key.as_deref() {
            let duplicate = state
                .slots
                .values()
                .any(|other| other.status == SlotStatus::Held && other.hold_key.as_deref() == Some(key));
            if duplicate {
                return Err(LedgerError::Conflict("hold key already in use".to_string()));
            }
        }

        state
            .by_doctor_day
            .entry((slot.doctor_id, slot.appointment_date))
            .or_default()
            .push(slot.id);
        state.slots.insert(slot.id, slot.clone());

        debug!("Inserted slot {} as {}", slot.id, slot.status);
        Ok(slot)
    }

    async fn get(&self, id: Uuid) -> Result<Option<AppointmentSlot>, LedgerError> {
        Ok(self.state.read().await.slots.get(&id).cloned())
    }

    async fn transition(&self, id: Uuid, change: SlotTransition) -> Result<AppointmentSlot, LedgerError> {
        if !change.from.can_transition_to(&change.to) {
            return Err(LedgerError::Backend(format!("illegal transition {} -> {}", change.from, change.to)));
        }

        let mut state = self.state.write().await;
        let slot = state.slots.get_mut(&id).ok_or(LedgerError::NotFound(id))?;

        if slot.status != change.from {
            return Err(LedgerError::StaleState {
                id,
                expected: change.from,
                actual: slot.status,
            });
        }

        change.apply(slot);
        debug!("Slot {} moved {} -> {}", id, change.from, change.to);
        Ok(slot.clone())
    }

    async fn lapsed_holds(
        &self,
        now: DateTime<Utc>,
        scope: Option<(Uuid, NaiveDate)>,
        limit: usize,
    ) -> Result<Vec<AppointmentSlot>, LedgerError> {
        let state = self.state.read().await;

        let mut lapsed: Vec<AppointmentSlot> = match scope {
            Some((doctor_id, date)) => state
                .day(doctor_id, date)
                .filter(|slot| slot.is_lapsed(now))
                .cloned()
                .collect(),
            None => state.slots.values().filter(|slot| slot.is_lapsed(now)).cloned().collect(),
        };

        lapsed.sort_by_key(|slot| slot.expires_at);
        lapsed.truncate(limit);
        Ok(lapsed)
    }

    async fn active_on(
        &self,
        doctor_id: Uuid,
        date: NaiveDate,
        now: DateTime<Utc>,
    ) -> Result<Vec<AppointmentSlot>, LedgerError> {
        let state = self.state.read().await;
        let mut active: Vec<AppointmentSlot> = state
            .day(doctor_id, date)
            .filter(|slot| slot.is_active(now))
            .cloned()
            .collect();
        active.sort_by_key(|slot| slot.start_time);
        Ok(active)
    }

    async fn list(&self, filter: &SlotFilter, page: &PageRequest) -> Result<SlotPage, LedgerError> {
        let state = self.state.read().await;

        let mut matching: Vec<&AppointmentSlot> = state.slots.values().filter(|slot| filter.matches(slot)).collect();
        matching.sort_by(|a, b| compare(a, b, page));

        let count = matching.len() as u64;
        let offset = usize::try_from(page.offset()).unwrap_or(usize::MAX);
        let appointments = matching
            .into_iter()
            .skip(offset)
            .take(page.limit as usize)
            .cloned()
            .collect();

        Ok(SlotPage {
            count,
            page: page.page,
            limit: page.limit,
            appointments,
        })
    }
}
