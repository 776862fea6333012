// libs/appointment-cell/src/models.rs
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use shared_config::ReservationSettings;

// ==============================================================================
// CORE SLOT MODELS
// ==============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SlotStatus {
    Held,
    Confirmed,
    Released,
    Expired,
}

impl SlotStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SlotStatus::Held => "held",
            SlotStatus::Confirmed => "confirmed",
            SlotStatus::Released => "released",
            SlotStatus::Expired => "expired",
        }
    }

    /// Released and expired slots are kept for audit only.
    pub fn is_inactive(&self) -> bool {
        matches!(self, SlotStatus::Released | SlotStatus::Expired)
    }

    pub fn can_transition_to(&self, target: &SlotStatus) -> bool {
        use SlotStatus::*;
        matches!(
            (self, target),
            (Held, Confirmed) | (Held, Released) | (Held, Expired) | (Confirmed, Released)
        )
    }
}

impl fmt::Display for SlotStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One appointment in the ledger. `hold_key` stores the digest of the live
/// confirmation key and is only present while the slot is held.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppointmentSlot {
    pub id: Uuid,
    #[serde(default)]
    pub department_id: Option<Uuid>,
    pub doctor_id: Uuid,
    pub patient_id: Uuid,
    pub appointment_date: NaiveDate,
    pub start_time: NaiveTime,
    pub duration_minutes: i64,
    /// Carried through from the booking request, never interpreted here.
    #[serde(default)]
    pub patient_status: bool,
    pub hold_key: Option<String>,
    pub confirmation_digest: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub status: SlotStatus,
    pub released_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AppointmentSlot {
    pub fn held(
        request: &ReserveRequest,
        key_digest: String,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            department_id: request.department_id,
            doctor_id: request.doctor_id,
            patient_id: request.patient_id,
            appointment_date: request.appointment_date,
            start_time: request.start_time,
            duration_minutes: request.duration_minutes,
            patient_status: request.patient_status,
            hold_key: Some(key_digest),
            confirmation_digest: None,
            expires_at: Some(expires_at),
            status: SlotStatus::Held,
            released_by: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn end_time(&self) -> NaiveTime {
        self.start_time + Duration::minutes(self.duration_minutes)
    }

    /// Half-open intersection with `[start, end)` on the same day.
    pub fn overlaps(&self, start: NaiveTime, end: NaiveTime) -> bool {
        self.start_time < end && start < self.end_time()
    }

    /// Held-and-unexpired or confirmed: the slot blocks its interval.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        match self.status {
            SlotStatus::Confirmed => true,
            SlotStatus::Held => self.expires_at.map_or(true, |expires_at| now <= expires_at),
            SlotStatus::Released | SlotStatus::Expired => false,
        }
    }

    /// Still marked held although its window has passed.
    pub fn is_lapsed(&self, now: DateTime<Utc>) -> bool {
        self.status == SlotStatus::Held && self.expires_at.map_or(false, |expires_at| now > expires_at)
    }
}

/// End of `[start, start + duration)`, or `None` when it would run past midnight.
pub fn slot_end(start: NaiveTime, duration_minutes: i64) -> Option<NaiveTime> {
    let (end, wrapped) = start.overflowing_add_signed(Duration::minutes(duration_minutes));
    if wrapped == 0 {
        Some(end)
    } else {
        None
    }
}

/// Conditional status change applied by the ledger only if the slot is still in `from`.
#[derive(Debug, Clone, PartialEq)]
pub struct SlotTransition {
    pub from: SlotStatus,
    pub to: SlotStatus,
    pub at: DateTime<Utc>,
    pub confirmation_digest: Option<String>,
    pub released_by: Option<Uuid>,
}

impl SlotTransition {
    pub fn confirm(at: DateTime<Utc>, digest: String) -> Self {
        Self {
            from: SlotStatus::Held,
            to: SlotStatus::Confirmed,
            at,
            confirmation_digest: Some(digest),
            released_by: None,
        }
    }

    pub fn expire(at: DateTime<Utc>) -> Self {
        Self {
            from: SlotStatus::Held,
            to: SlotStatus::Expired,
            at,
            confirmation_digest: None,
            released_by: None,
        }
    }

    pub fn release(from: SlotStatus, at: DateTime<Utc>, requester_id: Uuid) -> Self {
        Self {
            from,
            to: SlotStatus::Released,
            at,
            confirmation_digest: None,
            released_by: Some(requester_id),
        }
    }

    /// Apply to an in-memory copy whose status already matched `from`.
    pub fn apply(&self, slot: &mut AppointmentSlot) {
        slot.status = self.to;
        slot.updated_at = self.at;
        slot.hold_key = None;
        slot.expires_at = None;

        if self.to == SlotStatus::Confirmed {
            slot.confirmation_digest = self.confirmation_digest.clone();
        }
        if self.released_by.is_some() {
            slot.released_by = self.released_by;
        }
    }
}

// ==============================================================================
// REQUEST/RESPONSE MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReserveRequest {
    pub doctor_id: Uuid,
    pub patient_id: Uuid,
    pub appointment_date: NaiveDate,
    pub start_time: NaiveTime,
    pub duration_minutes: i64,
    #[serde(default)]
    pub department_id: Option<Uuid>,
    #[serde(default)]
    pub patient_status: bool,
}

/// What the caller gets back from a successful reservation. The raw hold key
/// is only ever returned here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reservation {
    pub slot_id: Uuid,
    pub hold_key: String,
    pub expires_at: DateTime<Utc>,
    pub status: SlotStatus,
    pub appointment: AppointmentView,
}

/// Public projection of a slot, without key material.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppointmentView {
    pub id: Uuid,
    pub department_id: Option<Uuid>,
    pub doctor_id: Uuid,
    pub patient_id: Uuid,
    pub appointment_date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub duration_minutes: i64,
    pub patient_status: bool,
    pub status: SlotStatus,
    pub expires_at: Option<DateTime<Utc>>,
    pub released_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&AppointmentSlot> for AppointmentView {
    fn from(slot: &AppointmentSlot) -> Self {
        Self {
            id: slot.id,
            department_id: slot.department_id,
            doctor_id: slot.doctor_id,
            patient_id: slot.patient_id,
            appointment_date: slot.appointment_date,
            start_time: slot.start_time,
            end_time: slot.end_time(),
            duration_minutes: slot.duration_minutes,
            patient_status: slot.patient_status,
            status: slot.status,
            expires_at: slot.expires_at,
            released_by: slot.released_by,
            created_at: slot.created_at,
            updated_at: slot.updated_at,
        }
    }
}

// ==============================================================================
// LISTING MODELS
// ==============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListAppointmentsQuery {
    pub doctor_id: Option<Uuid>,
    pub patient_id: Option<Uuid>,
    pub from_date: Option<NaiveDate>,
    pub to_date: Option<NaiveDate>,
    pub status: Option<SlotStatus>,
    pub include_inactive: Option<bool>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
    pub order_by: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SlotFilter {
    pub doctor_id: Option<Uuid>,
    pub patient_id: Option<Uuid>,
    pub from_date: Option<NaiveDate>,
    /// Inclusive.
    pub to_date: Option<NaiveDate>,
    pub status: Option<SlotStatus>,
    pub include_inactive: bool,
    /// When set, holds lapsed at this instant count as inactive even before
    /// they are marked expired.
    pub as_of: Option<DateTime<Utc>>,
}

impl SlotFilter {
    pub fn matches(&self, slot: &AppointmentSlot) -> bool {
        if self.doctor_id.is_some_and(|id| id != slot.doctor_id) {
            return false;
        }
        if self.patient_id.is_some_and(|id| id != slot.patient_id) {
            return false;
        }
        if self.from_date.is_some_and(|from| slot.appointment_date < from) {
            return false;
        }
        if self.to_date.is_some_and(|to| slot.appointment_date > to) {
            return false;
        }
        match (self.status, self.as_of) {
            (Some(status), _) => slot.status == status,
            (None, _) if self.include_inactive => true,
            (None, Some(now)) => slot.is_active(now),
            (None, None) => !slot.status.is_inactive(),
        }
    }
}

/// Columns a listing may be sorted by. Anything else is rejected before it
/// reaches storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortColumn {
    AppointmentDate,
    StartTime,
    Duration,
    Status,
    CreatedAt,
    UpdatedAt,
}

impl SortColumn {
    pub fn column_name(&self) -> &'static str {
        match self {
            SortColumn::AppointmentDate => "appointment_date",
            SortColumn::StartTime => "start_time",
            SortColumn::Duration => "duration_minutes",
            SortColumn::Status => "status",
            SortColumn::CreatedAt => "created_at",
            SortColumn::UpdatedAt => "updated_at",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortDirection::Asc => "asc",
            SortDirection::Desc => "desc",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderBy {
    pub column: SortColumn,
    pub direction: SortDirection,
}

impl Default for OrderBy {
    fn default() -> Self {
        Self {
            column: SortColumn::AppointmentDate,
            direction: SortDirection::Asc,
        }
    }
}

impl FromStr for OrderBy {
    type Err = String;

    /// Accepts `column`, `column asc|desc` or `column.asc|desc`.
    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let raw = raw.trim();
        let (column, direction) = match raw.split_once(|c: char| c == '.' || c.is_whitespace()) {
            Some((column, direction)) => (column.trim(), Some(direction.trim())),
            None => (raw, None),
        };

        let column = match column.to_ascii_lowercase().as_str() {
            "appointment_date" | "date" => SortColumn::AppointmentDate,
            "start_time" | "appointment_time" => SortColumn::StartTime,
            "duration" | "duration_minutes" => SortColumn::Duration,
            "status" => SortColumn::Status,
            "created_at" => SortColumn::CreatedAt,
            "updated_at" => SortColumn::UpdatedAt,
            other => return Err(format!("cannot order by '{}'", other)),
        };

        let direction = match direction.map(|d| d.to_ascii_lowercase()) {
            None => SortDirection::Asc,
            Some(d) if d == "asc" => SortDirection::Asc,
            Some(d) if d == "desc" => SortDirection::Desc,
            Some(d) => return Err(format!("unknown sort direction '{}'", d)),
        };

        Ok(Self { column, direction })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: u32,
    pub limit: u32,
    pub order_by: OrderBy,
}

impl PageRequest {
    pub fn offset(&self) -> u64 {
        u64::from(self.limit) * u64::from(self.page.saturating_sub(1))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlotPage {
    pub count: u64,
    pub page: u32,
    pub limit: u32,
    pub appointments: Vec<AppointmentSlot>,
}

// ==============================================================================
// SCHEDULE VIEW MODELS
// ==============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimeRange {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DoctorScheduleView {
    pub doctor_id: Uuid,
    pub date: NaiveDate,
    pub weekday: u8,
    pub working_intervals: Vec<TimeRange>,
    pub free_intervals: Vec<TimeRange>,
}

// ==============================================================================
// POLICY AND METRICS MODELS
// ==============================================================================

#[derive(Debug, Clone)]
pub struct ReservationPolicy {
    pub hold_ttl: Duration,
    pub booking_grace: Duration,
    pub max_advance: Duration,
    pub min_duration_minutes: i64,
    pub max_duration_minutes: i64,
    pub operation_timeout: std::time::Duration,
    pub storage_retry_attempts: u32,
    pub storage_retry_backoff: std::time::Duration,
}

impl From<&ReservationSettings> for ReservationPolicy {
    fn from(settings: &ReservationSettings) -> Self {
        let settings = settings.clone().validated();
        Self {
            hold_ttl: Duration::seconds(settings.hold_ttl_seconds),
            booking_grace: Duration::seconds(settings.booking_grace_seconds),
            max_advance: Duration::days(settings.max_advance_booking_days),
            min_duration_minutes: settings.min_appointment_minutes.max(1),
            max_duration_minutes: settings.max_appointment_minutes,
            operation_timeout: std::time::Duration::from_millis(settings.request_timeout_ms),
            storage_retry_attempts: settings.storage_retry_attempts.max(1),
            storage_retry_backoff: std::time::Duration::from_millis(settings.storage_retry_backoff_ms),
        }
    }
}

impl ReservationPolicy {
    /// A hold must outlive the instant it is created and the grace window
    /// cannot reach into the future.
    pub fn normalized(mut self) -> Self {
        let defaults = Self::default();
        if self.hold_ttl <= Duration::zero() {
            warn!("Hold lifetime {} is not positive, using {}", self.hold_ttl, defaults.hold_ttl);
            self.hold_ttl = defaults.hold_ttl;
        }
        if self.booking_grace < Duration::zero() {
            warn!("Negative booking grace {}, using none", self.booking_grace);
            self.booking_grace = Duration::zero();
        }
        self
    }
}

impl Default for ReservationPolicy {
    fn default() -> Self {
        Self::from(&ReservationSettings::default())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ListingLimits {
    pub default_limit: u32,
    pub max_limit: u32,
}

impl From<&ReservationSettings> for ListingLimits {
    fn from(settings: &ReservationSettings) -> Self {
        Self {
            default_limit: settings.list_default_limit.max(1),
            max_limit: settings.list_max_limit.max(1),
        }
    }
}

impl Default for ListingLimits {
    fn default() -> Self {
        Self::from(&ReservationSettings::default())
    }
}

/// Scheduling analytics and monitoring data
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulingMetrics {
    pub total_bookings_attempted: u64,
    pub successful_bookings: u64,
    pub failed_bookings: u64,
    pub conflict_rate: f64,
    pub average_booking_time_ms: f64,
    pub peak_concurrency: u32,
    pub lock_contention_events: u64,
    pub confirmations: u64,
    pub releases: u64,
    pub expired_holds: u64,
    pub timestamp: DateTime<Utc>,
}
