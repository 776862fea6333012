mod memory;
mod supabase;

pub use memory::InMemorySlotLedger;
pub use supabase::SupabaseSlotLedger;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use uuid::Uuid;

use crate::error::LedgerError;
use crate::models::{AppointmentSlot, PageRequest, SlotFilter, SlotPage, SlotTransition};

/// Durable record of appointments; source of truth for overlap checks.
#[async_trait]
pub trait SlotLedger: Send + Sync {
    /// Active (held-unexpired or confirmed) slots of the doctor intersecting
    /// `[start_time, start_time + duration_minutes)` on `date`.
    async fn overlapping(
        &self,
        doctor_id: Uuid,
        date: NaiveDate,
        start_time: NaiveTime,
        duration_minutes: i64,
        now: DateTime<Utc>,
    ) -> Result<Vec<AppointmentSlot>, LedgerError>;

    /// Store a new slot, failing with `Conflict` if it would overlap an active one.
    async fn insert(&self, slot: AppointmentSlot, now: DateTime<Utc>) -> Result<AppointmentSlot, LedgerError>;

    async fn get(&self, id: Uuid) -> Result<Option<AppointmentSlot>, LedgerError>;

    /// Conditional status update; `StaleState` when the slot is no longer in `change.from`.
    async fn transition(&self, id: Uuid, change: SlotTransition) -> Result<AppointmentSlot, LedgerError>;

    /// Held slots whose window closed before `now`, optionally limited to one doctor and day.
    async fn lapsed_holds(
        &self,
        now: DateTime<Utc>,
        scope: Option<(Uuid, NaiveDate)>,
        limit: usize,
    ) -> Result<Vec<AppointmentSlot>, LedgerError>;

    /// Every active slot of the doctor on `date`, ordered by start time.
    async fn active_on(
        &self,
        doctor_id: Uuid,
        date: NaiveDate,
        now: DateTime<Utc>,
    ) -> Result<Vec<AppointmentSlot>, LedgerError>;

    async fn list(&self, filter: &SlotFilter, page: &PageRequest) -> Result<SlotPage, LedgerError>;
}
