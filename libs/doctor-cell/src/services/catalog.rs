use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Method;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use shared_database::SupabaseClient;

use crate::error::CatalogError;
use crate::models::WorkingInterval;

/// Read side of the doctors' weekly working hours.
#[async_trait]
pub trait WorkingHoursCatalog: Send + Sync {
    /// Intervals for `(doctor_id, weekday)` ordered by start time. Empty when the doctor is off.
    async fn intervals_for(&self, doctor_id: Uuid, weekday: u8) -> Result<Vec<WorkingInterval>, CatalogError>;
}

/// Reject inverted intervals and overlaps within one `(doctor, weekday)` group.
fn validate_day(intervals: &mut [WorkingInterval]) -> Result<(), CatalogError> {
    for interval in intervals.iter() {
        if interval.day_of_week > 6 {
            return Err(CatalogError::InvalidSchedule(format!(
                "day_of_week must be between 0 (Monday) and 6 (Sunday), got {}",
                interval.day_of_week
            )));
        }
        if interval.start_time >= interval.finish_time {
            return Err(CatalogError::InvalidSchedule(format!(
                "start time {} must be before finish time {}",
                interval.start_time, interval.finish_time
            )));
        }
    }

    intervals.sort_by_key(|i| i.start_time);

    for pair in intervals.windows(2) {
        if pair[0].overlaps(&pair[1]) {
            return Err(CatalogError::InvalidSchedule(format!(
                "intervals {}-{} and {}-{} overlap on weekday {}",
                pair[0].start_time, pair[0].finish_time, pair[1].start_time, pair[1].finish_time, pair[0].day_of_week
            )));
        }
    }

    Ok(())
}

#[derive(Debug, Default)]
pub struct InMemoryWorkingHoursCatalog {
    days: RwLock<HashMap<(Uuid, u8), Vec<WorkingInterval>>>,
}

impl InMemoryWorkingHoursCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_intervals(intervals: Vec<WorkingInterval>) -> Result<Self, CatalogError> {
        let mut days: HashMap<(Uuid, u8), Vec<WorkingInterval>> = HashMap::new();
        for interval in intervals {
            days.entry((interval.doctor_id, interval.day_of_week))
                .or_default()
                .push(interval);
        }

        for day in days.values_mut() {
            validate_day(day)?;
        }

        Ok(Self {
            days: RwLock::new(days),
        })
    }

    /// Load a JSON array of working intervals.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| CatalogError::Seed(format!("{}: {}", path.display(), e)))?;
        let intervals: Vec<WorkingInterval> = serde_json::from_str(&raw)
            .map_err(|e| CatalogError::Seed(format!("{}: {}", path.display(), e)))?;

        info!("Loaded {} working intervals from {}", intervals.len(), path.display());
        Self::from_intervals(intervals)
    }

    /// Replace a doctor's intervals for one weekday.
    pub async fn replace_day(
        &self,
        doctor_id: Uuid,
        weekday: u8,
        mut intervals: Vec<WorkingInterval>,
    ) -> Result<(), CatalogError> {
        if intervals.iter().any(|i| i.doctor_id != doctor_id || i.day_of_week != weekday) {
            return Err(CatalogError::InvalidSchedule(
                "all intervals must belong to the replaced doctor and weekday".to_string(),
            ));
        }
        validate_day(&mut intervals)?;

        let mut days = self.days.write().await;
        if intervals.is_empty() {
            days.remove(&(doctor_id, weekday));
        } else {
            days.insert((doctor_id, weekday), intervals);
        }
        Ok(())
    }
}

#[async_trait]
impl WorkingHoursCatalog for InMemoryWorkingHoursCatalog {
    async fn intervals_for(&self, doctor_id: Uuid, weekday: u8) -> Result<Vec<WorkingInterval>, CatalogError> {
        let days = self.days.read().await;
        Ok(days.get(&(doctor_id, weekday)).cloned().unwrap_or_default())
    }
}

pub struct SupabaseWorkingHoursCatalog {
    supabase: Arc<SupabaseClient>,
}

impl SupabaseWorkingHoursCatalog {
    pub fn new(supabase: Arc<SupabaseClient>) -> Self {
        Self { supabase }
    }
}

#[async_trait]
impl WorkingHoursCatalog for SupabaseWorkingHoursCatalog {
    #[instrument(skip(self))]
    async fn intervals_for(&self, doctor_id: Uuid, weekday: u8) -> Result<Vec<WorkingInterval>, CatalogError> {
        let path = format!(
            "/rest/v1/doctor_working_hours?doctor_id=eq.{}&day_of_week=eq.{}&order=start_time.asc",
            doctor_id, weekday
        );

        let mut intervals: Vec<WorkingInterval> = self.supabase.request(Method::GET, &path, None).await?;
        intervals.sort_by_key(|i| i.start_time);

        debug!("Doctor {} has {} working intervals on weekday {}", doctor_id, intervals.len(), weekday);
        Ok(intervals)
    }
}
