mod common;

use std::collections::HashSet;
use std::sync::Arc;

use assert_matches::assert_matches;
use chrono::Duration;
use uuid::Uuid;

use appointment_cell::{
    ListAppointmentsQuery, ListingLimits, ListingService, ManualClock, ReservationError, SlotStatus,
};
use common::{at, monday, start_of_day, TestHarness};

async fn seeded() -> (TestHarness, ListingService) {
    let h = TestHarness::new();
    for minute in (0..180).step_by(15) {
        let start = at(9 + minute / 60, minute % 60);
        h.engine.reserve(h.request(Uuid::new_v4(), start, 15)).await.unwrap();
    }
    let listing = ListingService::new(h.ledger.clone(), h.clock.clone(), ListingLimits::default());
    (h, listing)
}

#[tokio::test]
async fn test_pages_do_not_repeat_items() {
    let (h, listing) = seeded().await;

    let query = |page| ListAppointmentsQuery {
        doctor_id: Some(h.doctor_id),
        page: Some(page),
        limit: Some(5),
        ..Default::default()
    };

    let mut seen = HashSet::new();
    let mut total = 0;
    for page in 1..=3 {
        let result = listing.list(query(page)).await.unwrap();
        assert_eq!(result.count, 12);
        total += result.appointments.len();
        for slot in result.appointments {
            assert!(seen.insert(slot.id), "slot {} repeated on page {}", slot.id, page);
        }
    }
    assert_eq!(total, 12);

    let beyond = listing.list(query(4)).await.unwrap();
    assert!(beyond.appointments.is_empty());
}

#[tokio::test]
async fn test_default_order_is_by_start_time() {
    let (h, listing) = seeded().await;

    let result = listing
        .list(ListAppointmentsQuery {
            doctor_id: Some(h.doctor_id),
            ..Default::default()
        })
        .await
        .unwrap();

    assert_eq!(result.limit, 10);
    let starts: Vec<_> = result.appointments.iter().map(|s| s.start_time).collect();
    let mut sorted = starts.clone();
    sorted.sort();
    assert_eq!(starts, sorted);

    let desc = listing
        .list(ListAppointmentsQuery {
            doctor_id: Some(h.doctor_id),
            order_by: Some("start_time desc".to_string()),
            limit: Some(1),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(desc.appointments[0].start_time, at(11, 45));
}

#[tokio::test]
async fn test_inactive_slots_hidden_unless_requested() {
    let (h, listing) = seeded().await;
    h.clock.advance(Duration::minutes(30));

    // Lapsed holds are only marked once something observes them.
    let first = listing
        .list(ListAppointmentsQuery {
            doctor_id: Some(h.doctor_id),
            status: Some(SlotStatus::Expired),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(first.count, 0);

    // They are already left out of the default listing.
    let unswept = listing
        .list(ListAppointmentsQuery {
            doctor_id: Some(h.doctor_id),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(unswept.count, 0);
    assert!(unswept.appointments.is_empty());

    h.engine.reserve(h.request(Uuid::new_v4(), at(9, 0), 15)).await.unwrap();

    let active = listing
        .list(ListAppointmentsQuery {
            doctor_id: Some(h.doctor_id),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(active.count, 1);

    let everything = listing
        .list(ListAppointmentsQuery {
            doctor_id: Some(h.doctor_id),
            include_inactive: Some(true),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(everything.count, 13);
}

#[tokio::test]
async fn test_filters_by_patient_and_date() {
    let h = TestHarness::new();
    let patient = Uuid::new_v4();
    h.engine.reserve(h.request(patient, at(9, 0), 30)).await.unwrap();
    h.engine.reserve(h.request(Uuid::new_v4(), at(10, 0), 30)).await.unwrap();

    let listing = ListingService::new(h.ledger.clone(), h.clock.clone(), ListingLimits::default());
    let mine = listing
        .list(ListAppointmentsQuery {
            patient_id: Some(patient),
            from_date: Some(monday()),
            to_date: Some(monday()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(mine.count, 1);
    assert_eq!(mine.appointments[0].patient_id, patient);

    let tomorrow = listing
        .list(ListAppointmentsQuery {
            from_date: monday().succ_opt(),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(tomorrow.count, 0);
}

#[tokio::test]
async fn test_rejects_bad_paging_arguments() {
    let listing = ListingService::new(
        Arc::new(appointment_cell::InMemorySlotLedger::new()),
        Arc::new(ManualClock::new(start_of_day())),
        ListingLimits {
            default_limit: 10,
            max_limit: 50,
        },
    );

    let zero_page = listing
        .list(ListAppointmentsQuery {
            page: Some(0),
            ..Default::default()
        })
        .await;
    assert_matches!(zero_page, Err(ReservationError::Validation(_)));

    let huge = listing
        .list(ListAppointmentsQuery {
            limit: Some(51),
            ..Default::default()
        })
        .await;
    assert_matches!(huge, Err(ReservationError::Validation(_)));

    let inverted = listing
        .list(ListAppointmentsQuery {
            from_date: monday().succ_opt(),
            to_date: Some(monday()),
            ..Default::default()
        })
        .await;
    assert_matches!(inverted, Err(ReservationError::Validation(_)));

    let bad_order = listing
        .list(ListAppointmentsQuery {
            order_by: Some("patient_name".to_string()),
            ..Default::default()
        })
        .await;
    assert_matches!(bad_order, Err(ReservationError::Validation(_)));
}
