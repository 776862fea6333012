use std::sync::Arc;

use assert_matches::assert_matches;
use serde_json::json;
use uuid::Uuid;
use wiremock::{
    matchers::{method, path, query_param},
    Mock, MockServer, ResponseTemplate,
};

use doctor_cell::{
    CatalogError, DoctorService, DoctorServiceDirectory, InMemoryDoctorServiceDirectory,
    SupabaseDoctorServiceDirectory,
};
use shared_database::SupabaseClient;

fn service(duration_minutes: i64) -> DoctorService {
    DoctorService {
        id: Uuid::new_v4(),
        doctor_id: Uuid::new_v4(),
        online_price: 40.0,
        offline_price: 55.0,
        duration_minutes,
    }
}

#[tokio::test]
async fn in_memory_directory_resolves_known_services() {
    let consult = service(30);
    let directory = InMemoryDoctorServiceDirectory::new(vec![consult.clone()]).unwrap();

    assert_eq!(directory.service(consult.id).await.unwrap(), Some(consult));
    assert_eq!(directory.service(Uuid::new_v4()).await.unwrap(), None);
}

#[test]
fn in_memory_directory_rejects_non_positive_durations() {
    let result = InMemoryDoctorServiceDirectory::new(vec![service(0)]);
    assert_matches!(result, Err(CatalogError::InvalidSchedule(_)));
}

#[tokio::test]
async fn supabase_directory_returns_first_row_or_none() {
    let server = MockServer::start().await;
    let known = service(45);
    let unknown = Uuid::new_v4();

    Mock::given(method("GET"))
        .and(path("/rest/v1/doctor_services"))
        .and(query_param("id", format!("eq.{}", known.id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([known])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/doctor_services"))
        .and(query_param("id", format!("eq.{}", unknown)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    let client = Arc::new(SupabaseClient::with_base_url(&server.uri(), "key"));
    let directory = SupabaseDoctorServiceDirectory::new(client);

    let found = directory.service(known.id).await.unwrap().expect("service exists");
    assert_eq!(found.duration_minutes, 45);
    assert!(directory.service(unknown).await.unwrap().is_none());
}
