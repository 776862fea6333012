use chrono::{Datelike, NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// ISO weekday index used by the catalog: 0 = Monday .. 6 = Sunday.
pub fn iso_weekday(date: NaiveDate) -> u8 {
    date.weekday().num_days_from_monday() as u8
}

/// A doctor's declared working range on one weekday, half-open `[start_time, finish_time)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkingInterval {
    pub id: Uuid,
    pub doctor_id: Uuid,
    pub day_of_week: u8,
    pub start_time: NaiveTime,
    pub finish_time: NaiveTime,
}

impl WorkingInterval {
    pub fn new(doctor_id: Uuid, day_of_week: u8, start_time: NaiveTime, finish_time: NaiveTime) -> Self {
        Self {
            id: Uuid::new_v4(),
            doctor_id,
            day_of_week,
            start_time,
            finish_time,
        }
    }

    /// True when `[start, end)` lies entirely inside this interval.
    pub fn contains(&self, start: NaiveTime, end: NaiveTime) -> bool {
        self.start_time <= start && end <= self.finish_time
    }

    pub fn overlaps(&self, other: &WorkingInterval) -> bool {
        self.start_time < other.finish_time && other.start_time < self.finish_time
    }
}

/// A priced service a doctor offers; its duration feeds reservations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DoctorService {
    pub id: Uuid,
    pub doctor_id: Uuid,
    pub online_price: f64,
    pub offline_price: f64,
    pub duration_minutes: i64,
}
