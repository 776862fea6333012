mod common;

use chrono::Duration;
use uuid::Uuid;

use appointment_cell::{ScheduleService, TimeRange};
use common::{at, monday, TestHarness};

fn range(start: (u32, u32), end: (u32, u32)) -> TimeRange {
    TimeRange {
        start: at(start.0, start.1),
        end: at(end.0, end.1),
    }
}

#[tokio::test]
async fn test_free_intervals_exclude_active_slots() {
    let h = TestHarness::new();
    let service = ScheduleService::new(h.catalog.clone(), h.ledger.clone(), h.clock.clone());

    let hold = h.engine.reserve(h.request(Uuid::new_v4(), at(9, 30), 30)).await.unwrap();
    h.engine.confirm(hold.slot_id, &hold.hold_key).await.unwrap();
    h.engine.reserve(h.request(Uuid::new_v4(), at(11, 0), 15)).await.unwrap();

    let view = service.free_intervals(h.doctor_id, monday()).await.unwrap();
    assert_eq!(view.weekday, 0);
    assert_eq!(view.working_intervals, vec![range((9, 0), (12, 0))]);
    assert_eq!(
        view.free_intervals,
        vec![range((9, 0), (9, 30)), range((10, 0), (11, 0)), range((11, 15), (12, 0))]
    );
}

#[tokio::test]
async fn test_lapsed_hold_shows_as_free() {
    let h = TestHarness::new();
    let service = ScheduleService::new(h.catalog.clone(), h.ledger.clone(), h.clock.clone());

    h.engine.reserve(h.request(Uuid::new_v4(), at(10, 0), 60)).await.unwrap();
    h.clock.advance(Duration::minutes(11));

    let view = service.free_intervals(h.doctor_id, monday()).await.unwrap();
    assert_eq!(view.free_intervals, vec![range((9, 0), (12, 0))]);
}

#[tokio::test]
async fn test_day_off_has_no_intervals() {
    let h = TestHarness::new();
    let service = ScheduleService::new(h.catalog.clone(), h.ledger.clone(), h.clock.clone());

    let sunday = monday() - Duration::days(1);
    let view = service.free_intervals(h.doctor_id, sunday).await.unwrap();
    assert_eq!(view.weekday, 6);
    assert!(view.working_intervals.is_empty());
    assert!(view.free_intervals.is_empty());
}
