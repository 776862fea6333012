#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use uuid::Uuid;

use appointment_cell::{
    InMemorySlotLedger, ManualClock, ReservationEngine, ReservationPolicy, ReserveRequest, SlotLedger,
};
use doctor_cell::{InMemoryWorkingHoursCatalog, WorkingHoursCatalog, WorkingInterval};

/// Monday.
pub fn monday() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 10, 19).unwrap()
}

pub fn at(hour: u32, minute: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(hour, minute, 0).unwrap()
}

/// Early Monday morning, before the doctor's shift.
pub fn start_of_day() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, 19, 7, 0, 0).unwrap()
}

pub struct TestHarness {
    pub doctor_id: Uuid,
    pub clock: Arc<ManualClock>,
    pub ledger: Arc<InMemorySlotLedger>,
    pub catalog: Arc<InMemoryWorkingHoursCatalog>,
    pub engine: Arc<ReservationEngine>,
}

impl TestHarness {
    /// One doctor working Monday 09:00-12:00, default policy.
    pub fn new() -> Self {
        Self::with_policy(ReservationPolicy::default())
    }

    pub fn with_policy(policy: ReservationPolicy) -> Self {
        let doctor_id = Uuid::new_v4();
        let clock = Arc::new(ManualClock::new(start_of_day()));
        let ledger = Arc::new(InMemorySlotLedger::new());
        let catalog = Arc::new(
            InMemoryWorkingHoursCatalog::from_intervals(vec![WorkingInterval::new(doctor_id, 0, at(9, 0), at(12, 0))])
                .unwrap(),
        );

        let engine = Arc::new(ReservationEngine::new(
            ledger.clone() as Arc<dyn SlotLedger>,
            catalog.clone() as Arc<dyn WorkingHoursCatalog>,
            clock.clone(),
            policy,
        ));

        Self {
            doctor_id,
            clock,
            ledger,
            catalog,
            engine,
        }
    }

    pub fn request(&self, patient_id: Uuid, start: NaiveTime, minutes: i64) -> ReserveRequest {
        ReserveRequest {
            doctor_id: self.doctor_id,
            patient_id,
            appointment_date: monday(),
            start_time: start,
            duration_minutes: minutes,
            department_id: None,
            patient_status: false,
        }
    }
}
