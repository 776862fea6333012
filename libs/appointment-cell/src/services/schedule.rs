use std::sync::Arc;

use chrono::NaiveDate;
use tracing::{debug, instrument};
use uuid::Uuid;

use doctor_cell::{iso_weekday, WorkingHoursCatalog};

use crate::clock::Clock;
use crate::error::ReservationError;
use crate::models::{DoctorScheduleView, TimeRange};
use crate::services::ledger::SlotLedger;

/// Read-only view of a doctor's day: declared working hours minus active slots.
pub struct ScheduleService {
    catalog: Arc<dyn WorkingHoursCatalog>,
    ledger: Arc<dyn SlotLedger>,
    clock: Arc<dyn Clock>,
}

impl ScheduleService {
    pub fn new(catalog: Arc<dyn WorkingHoursCatalog>, ledger: Arc<dyn SlotLedger>, clock: Arc<dyn Clock>) -> Self {
        Self { catalog, ledger, clock }
    }

    #[instrument(skip(self))]
    pub async fn free_intervals(&self, doctor_id: Uuid, date: NaiveDate) -> Result<DoctorScheduleView, ReservationError> {
        let weekday = iso_weekday(date);
        let working: Vec<TimeRange> = self
            .catalog
            .intervals_for(doctor_id, weekday)
            .await?
            .into_iter()
            .map(|i| TimeRange {
                start: i.start_time,
                end: i.finish_time,
            })
            .collect();

        let now = self.clock.now();
        let busy: Vec<TimeRange> = self
            .ledger
            .active_on(doctor_id, date, now)
            .await?
            .iter()
            .map(|slot| TimeRange {
                start: slot.start_time,
                end: slot.end_time(),
            })
            .collect();

        let free = subtract_busy(&working, &busy);
        debug!(
            "Doctor {} on {}: {} working ranges, {} busy, {} free",
            doctor_id,
            date,
            working.len(),
            busy.len(),
            free.len()
        );

        Ok(DoctorScheduleView {
            doctor_id,
            date,
            weekday,
            working_intervals: working,
            free_intervals: free,
        })
    }
}

/// Remove every busy range from the working ranges. Output is sorted and
/// never contains empty ranges.
pub fn subtract_busy(working: &[TimeRange], busy: &[TimeRange]) -> Vec<TimeRange> {
    let mut busy: Vec<TimeRange> = busy.iter().copied().filter(|b| b.start < b.end).collect();
    busy.sort_by_key(|b| b.start);

    let mut working: Vec<TimeRange> = working.iter().copied().filter(|w| w.start < w.end).collect();
    working.sort_by_key(|w| w.start);

    let mut free = Vec::new();
    for range in working {
        let mut cursor = range.start;
        for b in busy.iter().filter(|b| b.start < range.end && range.start < b.end) {
            if b.start > cursor {
                free.push(TimeRange {
                    start: cursor,
                    end: b.start,
                });
            }
            if b.end > cursor {
                cursor = b.end;
            }
        }
        if cursor < range.end {
            free.push(TimeRange {
                start: cursor,
                end: range.end,
            });
        }
    }
    free
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveTime;

    fn range(start: (u32, u32), end: (u32, u32)) -> TimeRange {
        TimeRange {
            start: NaiveTime::from_hms_opt(start.0, start.1, 0).unwrap(),
            end: NaiveTime::from_hms_opt(end.0, end.1, 0).unwrap(),
        }
    }

    #[test]
    fn splits_working_range_around_busy_slots() {
        let free = subtract_busy(
            &[range((9, 0), (12, 0))],
            &[range((10, 0), (10, 30)), range((9, 0), (9, 15))],
        );
        assert_eq!(
            free,
            vec![range((9, 15), (10, 0)), range((10, 30), (12, 0))]
        );
    }

    #[test]
    fn overlapping_busy_ranges_are_merged() {
        let free = subtract_busy(
            &[range((9, 0), (12, 0))],
            &[range((10, 0), (11, 0)), range((10, 30), (11, 30))],
        );
        assert_eq!(free, vec![range((9, 0), (10, 0)), range((11, 30), (12, 0))]);
    }

    #[test]
    fn fully_booked_day_has_no_free_time() {
        let free = subtract_busy(&[range((9, 0), (10, 0))], &[range((8, 0), (11, 0))]);
        assert!(free.is_empty());
    }

    #[test]
    fn multiple_working_ranges_stay_separate() {
        let free = subtract_busy(
            &[range((14, 0), (16, 0)), range((9, 0), (12, 0))],
            &[range((11, 0), (15, 0))],
        );
        assert_eq!(free, vec![range((9, 0), (11, 0)), range((15, 0), (16, 0))]);
    }
}
