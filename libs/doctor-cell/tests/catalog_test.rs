use std::io::Write;
use std::sync::Arc;

use assert_matches::assert_matches;
use chrono::{NaiveDate, NaiveTime};
use serde_json::json;
use uuid::Uuid;
use wiremock::{
    matchers::{method, path, query_param},
    Mock, MockServer, ResponseTemplate,
};

use doctor_cell::{
    iso_weekday, CatalogError, InMemoryWorkingHoursCatalog, SupabaseWorkingHoursCatalog,
    WorkingHoursCatalog, WorkingInterval,
};
use shared_database::SupabaseClient;

fn hm(h: u32, m: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(h, m, 0).unwrap()
}

#[test]
fn weekday_numbering_starts_on_monday() {
    // 2024-01-01 was a Monday
    assert_eq!(iso_weekday(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()), 0);
    assert_eq!(iso_weekday(NaiveDate::from_ymd_opt(2024, 1, 7).unwrap()), 6);
}

#[test]
fn interval_containment_is_inclusive_of_both_edges() {
    let interval = WorkingInterval::new(Uuid::new_v4(), 0, hm(9, 0), hm(12, 0));

    assert!(interval.contains(hm(9, 0), hm(9, 30)));
    assert!(interval.contains(hm(11, 30), hm(12, 0)));
    assert!(!interval.contains(hm(8, 45), hm(9, 15)));
    assert!(!interval.contains(hm(11, 45), hm(12, 15)));
}

#[tokio::test]
async fn returns_sorted_intervals_and_empty_for_days_off() {
    let doctor = Uuid::new_v4();
    let catalog = InMemoryWorkingHoursCatalog::from_intervals(vec![
        WorkingInterval::new(doctor, 0, hm(14, 0), hm(17, 0)),
        WorkingInterval::new(doctor, 0, hm(9, 0), hm(12, 0)),
    ])
    .expect("valid schedule");

    let monday = catalog.intervals_for(doctor, 0).await.unwrap();
    assert_eq!(monday.len(), 2);
    assert_eq!(monday[0].start_time, hm(9, 0));
    assert_eq!(monday[1].start_time, hm(14, 0));

    assert!(catalog.intervals_for(doctor, 1).await.unwrap().is_empty());
    assert!(catalog.intervals_for(Uuid::new_v4(), 0).await.unwrap().is_empty());
}

#[tokio::test]
async fn rejects_overlapping_and_inverted_intervals() {
    let doctor = Uuid::new_v4();

    let overlapping = InMemoryWorkingHoursCatalog::from_intervals(vec![
        WorkingInterval::new(doctor, 2, hm(9, 0), hm(12, 0)),
        WorkingInterval::new(doctor, 2, hm(11, 0), hm(13, 0)),
    ]);
    assert_matches!(overlapping, Err(CatalogError::InvalidSchedule(_)));

    let inverted = InMemoryWorkingHoursCatalog::from_intervals(vec![WorkingInterval::new(
        doctor,
        2,
        hm(12, 0),
        hm(9, 0),
    )]);
    assert_matches!(inverted, Err(CatalogError::InvalidSchedule(_)));

    // Back-to-back ranges are fine
    let adjacent = InMemoryWorkingHoursCatalog::from_intervals(vec![
        WorkingInterval::new(doctor, 2, hm(9, 0), hm(12, 0)),
        WorkingInterval::new(doctor, 2, hm(12, 0), hm(13, 0)),
    ]);
    assert!(adjacent.is_ok());
}

#[tokio::test]
async fn replace_day_swaps_and_clears_a_weekday() {
    let doctor = Uuid::new_v4();
    let catalog = InMemoryWorkingHoursCatalog::new();

    catalog
        .replace_day(doctor, 4, vec![WorkingInterval::new(doctor, 4, hm(8, 0), hm(10, 0))])
        .await
        .unwrap();
    assert_eq!(catalog.intervals_for(doctor, 4).await.unwrap().len(), 1);

    let wrong_day = catalog
        .replace_day(doctor, 4, vec![WorkingInterval::new(doctor, 3, hm(8, 0), hm(10, 0))])
        .await;
    assert_matches!(wrong_day, Err(CatalogError::InvalidSchedule(_)));

    catalog.replace_day(doctor, 4, Vec::new()).await.unwrap();
    assert!(catalog.intervals_for(doctor, 4).await.unwrap().is_empty());
}

#[tokio::test]
async fn loads_seed_file() {
    let doctor = Uuid::new_v4();
    let mut file = tempfile::NamedTempFile::new().unwrap();
    let seed = json!([{
        "id": Uuid::new_v4(),
        "doctor_id": doctor,
        "day_of_week": 0,
        "start_time": "09:00:00",
        "finish_time": "12:00:00"
    }]);
    write!(file, "{}", seed).unwrap();

    let catalog = InMemoryWorkingHoursCatalog::from_json_file(file.path()).unwrap();
    let intervals = catalog.intervals_for(doctor, 0).await.unwrap();
    assert_eq!(intervals[0].finish_time, hm(12, 0));

    let missing = InMemoryWorkingHoursCatalog::from_json_file("/definitely/not/here.json");
    assert_matches!(missing, Err(CatalogError::Seed(_)));
}

#[tokio::test]
async fn supabase_catalog_queries_by_doctor_and_weekday() {
    let server = MockServer::start().await;
    let doctor = Uuid::new_v4();

    Mock::given(method("GET"))
        .and(path("/rest/v1/doctor_working_hours"))
        .and(query_param("doctor_id", format!("eq.{}", doctor)))
        .and(query_param("day_of_week", "eq.0"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
            "id": Uuid::new_v4(),
            "doctor_id": doctor,
            "day_of_week": 0,
            "start_time": "09:00:00",
            "finish_time": "12:00:00"
        }])))
        .mount(&server)
        .await;

    let client = Arc::new(SupabaseClient::with_base_url(&server.uri(), "key"));
    let catalog = SupabaseWorkingHoursCatalog::new(client);

    let intervals = catalog.intervals_for(doctor, 0).await.unwrap();
    assert_eq!(intervals.len(), 1);
    assert_eq!(intervals[0].start_time, hm(9, 0));
}

#[tokio::test]
async fn supabase_catalog_outage_is_unavailable() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/doctor_working_hours"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&server)
        .await;

    let client = Arc::new(SupabaseClient::with_base_url(&server.uri(), "key"));
    let catalog = SupabaseWorkingHoursCatalog::new(client);

    let result = catalog.intervals_for(Uuid::new_v4(), 3).await;
    assert_matches!(result, Err(CatalogError::Unavailable(_)));
}
