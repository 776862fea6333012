use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, SecondsFormat, Utc};
use reqwest::Method;
use serde_json::{json, Map, Value};
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use shared_database::supabase::return_representation;
use shared_database::SupabaseClient;

use crate::error::LedgerError;
use crate::models::{slot_end, AppointmentSlot, PageRequest, SlotFilter, SlotPage, SlotStatus, SlotTransition, SortColumn};

use super::SlotLedger;

const TABLE: &str = "/rest/v1/appointments";

/// PostgREST-backed ledger. Non-overlap is enforced by the
/// `appointments_no_overlap` exclusion constraint from
/// `migrations/20261017000000_appointments.sql` (reported as HTTP 409) and
/// transitions are conditional PATCHes, so correctness holds across processes.
pub struct SupabaseSlotLedger {
    supabase: Arc<SupabaseClient>,
}

impl SupabaseSlotLedger {
    pub fn new(supabase: Arc<SupabaseClient>) -> Self {
        Self { supabase }
    }

    async fn fetch_day(&self, doctor_id: Uuid, date: NaiveDate) -> Result<Vec<AppointmentSlot>, LedgerError> {
        let path = format!(
            "{}?doctor_id=eq.{}&appointment_date=eq.{}&status=in.(held,confirmed)&order=start_time.asc",
            TABLE, doctor_id, date
        );
        Ok(self.supabase.request(Method::GET, &path, None).await?)
    }
}

fn timestamp(at: DateTime<Utc>) -> String {
    // PostgREST query strings need `+` escaped, so always use the Z suffix.
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn filter_params(filter: &SlotFilter) -> Vec<String> {
    let mut params = Vec::new();

    if let Some(doctor_id) = filter.doctor_id {
        params.push(format!("doctor_id=eq.{}", doctor_id));
    }
    if let Some(patient_id) = filter.patient_id {
        params.push(format!("patient_id=eq.{}", patient_id));
    }
    if let Some(from) = filter.from_date {
        params.push(format!("appointment_date=gte.{}", from));
    }
    if let Some(to) = filter.to_date {
        params.push(format!("appointment_date=lte.{}", to));
    }
    match (filter.status, filter.as_of) {
        (Some(status), _) => params.push(format!("status=eq.{}", status)),
        (None, _) if filter.include_inactive => {}
        (None, Some(now)) => params.push(format!(
            "or=(status.eq.confirmed,and(status.eq.held,expires_at.gte.\"{}\"))",
            timestamp(now)
        )),
        (None, None) => params.push("status=in.(held,confirmed)".to_string()),
    }

    params
}

fn order_param(page: &PageRequest) -> String {
    let direction = page.order_by.direction.as_str();
    let mut order = format!("{}.{}", page.order_by.column.column_name(), direction);
    if page.order_by.column == SortColumn::AppointmentDate {
        order.push_str(&format!(",start_time.{}", direction));
    }
    order.push_str(",id.asc");
    order
}

#[async_trait]
impl SlotLedger for SupabaseSlotLedger {
    #[instrument(skip(self))]
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

        let day = self.fetch_day(doctor_id, date).await?;
        Ok(day
            .into_iter()
            .filter(|slot| slot.is_active(now) && slot.overlaps(start_time, end_time))
            .collect())
    }

    #[instrument(skip(self, slot), fields(slot_id = %slot.id))]
    async fn insert(&self, slot: AppointmentSlot, _now: DateTime<Utc>) -> Result<AppointmentSlot, LedgerError> {
        let body = serde_json::to_value(&slot).map_err(|e| LedgerError::Backend(e.to_string()))?;

        let rows: Vec<AppointmentSlot> = self
            .supabase
            .request_with_headers(Method::POST, TABLE, Some(body), Some(return_representation()))
            .await?;

        rows.into_iter()
            .next()
            .ok_or_else(|| LedgerError::Backend(format!("insert of slot {} returned no row", slot.id)))
    }

    async fn get(&self, id: Uuid) -> Result<Option<AppointmentSlot>, LedgerError> {
        let path = format!("{}?id=eq.{}&limit=1", TABLE, id);
        let rows: Vec<AppointmentSlot> = self.supabase.request(Method::GET, &path, None).await?;
        Ok(rows.into_iter().next())
    }

    #[instrument(skip(self, change), fields(from = %change.from, to = %change.to))]
    async fn transition(&self, id: Uuid, change: SlotTransition) -> Result<AppointmentSlot, LedgerError> {
        if !change.from.can_transition_to(&change.to) {
            return Err(LedgerError::Backend(format!("illegal transition {} -> {}", change.from, change.to)));
        }

        let mut update = Map::new();
        update.insert("status".to_string(), json!(change.to));
        update.insert("hold_key".to_string(), Value::Null);
        update.insert("expires_at".to_string(), Value::Null);
        update.insert("updated_at".to_string(), json!(change.at));
        if change.to == SlotStatus::Confirmed {
            update.insert("confirmation_digest".to_string(), json!(change.confirmation_digest));
        }
        if let Some(requester) = change.released_by {
            update.insert("released_by".to_string(), json!(requester));
        }

        let path = format!("{}?id=eq.{}&status=eq.{}", TABLE, id, change.from);
        let rows: Vec<AppointmentSlot> = self
            .supabase
            .request_with_headers(Method::PATCH, &path, Some(Value::Object(update)), Some(return_representation()))
            .await?;

        if let Some(updated) = rows.into_iter().next() {
            debug!("Slot {} moved {} -> {}", id, change.from, change.to);
            return Ok(updated);
        }

        // Precondition failed: find out whether the row is gone or just moved on.
        match self.get(id).await? {
            Some(current) => {
                warn!("Conditional update of slot {} lost: now {}", id, current.status);
                Err(LedgerError::StaleState {
                    id,
                    expected: change.from,
                    actual: current.status,
                })
            }
            None => Err(LedgerError::NotFound(id)),
        }
    }

    async fn lapsed_holds(
        &self,
        now: DateTime<Utc>,
        scope: Option<(Uuid, NaiveDate)>,
        limit: usize,
    ) -> Result<Vec<AppointmentSlot>, LedgerError> {
        let mut path = format!(
            "{}?status=eq.held&expires_at=lt.{}&order=expires_at.asc&limit={}",
            TABLE,
            timestamp(now),
            limit
        );
        if let Some((doctor_id, date)) = scope {
            path.push_str(&format!("&doctor_id=eq.{}&appointment_date=eq.{}", doctor_id, date));
        }

        Ok(self.supabase.request(Method::GET, &path, None).await?)
    }

    async fn active_on(
        &self,
        doctor_id: Uuid,
        date: NaiveDate,
        now: DateTime<Utc>,
    ) -> Result<Vec<AppointmentSlot>, LedgerError> {
        let day = self.fetch_day(doctor_id, date).await?;
        Ok(day.into_iter().filter(|slot| slot.is_active(now)).collect())
    }

    #[instrument(skip(self))]
    async fn list(&self, filter: &SlotFilter, page: &PageRequest) -> Result<SlotPage, LedgerError> {
        let mut params = filter_params(filter);
        params.push(format!("order={}", order_param(page)));
        params.push(format!("limit={}", page.limit));
        params.push(format!("offset={}", page.offset()));

        let path = format!("{}?{}", TABLE, params.join("&"));
        let (appointments, total): (Vec<AppointmentSlot>, Option<u64>) = self.supabase.request_with_count(&path).await?;

        Ok(SlotPage {
            count: total.unwrap_or(appointments.len() as u64),
            page: page.page,
            limit: page.limit,
            appointments,
        })
    }
}
