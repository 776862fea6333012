// libs/appointment-cell/src/handlers.rs
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{NaiveDate, NaiveTime};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;
use uuid::Uuid;

use shared_models::error::AppError;

use crate::error::ReservationError;
use crate::models::{AppointmentView, ListAppointmentsQuery, ReserveRequest};
use crate::router::AppointmentState;

// ==============================================================================
// REQUEST BODIES
// ==============================================================================

/// Either `duration_minutes` or a `service_id` whose duration is used.
#[derive(Debug, Deserialize)]
pub struct HoldRequestBody {
    pub doctor_id: Uuid,
    pub patient_id: Uuid,
    pub appointment_date: NaiveDate,
    pub start_time: NaiveTime,
    pub duration_minutes: Option<i64>,
    pub service_id: Option<Uuid>,
    pub department_id: Option<Uuid>,
    #[serde(default)]
    pub patient_status: bool,
}

#[derive(Debug, Deserialize)]
pub struct ConfirmRequestBody {
    pub hold_key: String,
}

#[derive(Debug, Deserialize)]
pub struct ReleaseRequestBody {
    pub requester_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct ScheduleQuery {
    pub date: NaiveDate,
}

// ==============================================================================
// RESERVATION HANDLERS
// ==============================================================================

pub async fn create_hold(
    State(state): State<Arc<AppointmentState>>,
    Json(body): Json<HoldRequestBody>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let duration_minutes = resolve_duration(&state, &body).await?;

    let request = ReserveRequest {
        doctor_id: body.doctor_id,
        patient_id: body.patient_id,
        appointment_date: body.appointment_date,
        start_time: body.start_time,
        duration_minutes,
        department_id: body.department_id,
        patient_status: body.patient_status,
    };

    let reservation = state.engine.reserve(request).await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "reservation": reservation,
            "message": "Slot held; confirm before the hold expires"
        })),
    ))
}

pub async fn confirm_hold(
    State(state): State<Arc<AppointmentState>>,
    Path(appointment_id): Path<Uuid>,
    Json(body): Json<ConfirmRequestBody>,
) -> Result<Json<Value>, AppError> {
    let slot = state.engine.confirm(appointment_id, &body.hold_key).await?;

    Ok(Json(json!({
        "success": true,
        "appointment": AppointmentView::from(&slot),
        "message": "Appointment confirmed"
    })))
}

pub async fn release_slot(
    State(state): State<Arc<AppointmentState>>,
    Path(appointment_id): Path<Uuid>,
    Json(body): Json<ReleaseRequestBody>,
) -> Result<Json<Value>, AppError> {
    let slot = state.engine.release(appointment_id, body.requester_id).await?;

    Ok(Json(json!({
        "success": true,
        "appointment": AppointmentView::from(&slot),
        "message": "Appointment released"
    })))
}

pub async fn get_appointment(
    State(state): State<Arc<AppointmentState>>,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let slot = state.engine.get(appointment_id).await?;
    Ok(Json(json!(AppointmentView::from(&slot))))
}

// ==============================================================================
// READ HANDLERS
// ==============================================================================

pub async fn list_appointments(
    State(state): State<Arc<AppointmentState>>,
    Query(query): Query<ListAppointmentsQuery>,
) -> Result<Json<Value>, AppError> {
    let page = state.listing.list(query).await?;
    let appointments: Vec<AppointmentView> = page.appointments.iter().map(AppointmentView::from).collect();

    Ok(Json(json!({
        "appointments": appointments,
        "count": page.count,
        "page": page.page,
        "limit": page.limit
    })))
}

pub async fn get_doctor_schedule(
    State(state): State<Arc<AppointmentState>>,
    Path(doctor_id): Path<Uuid>,
    Query(query): Query<ScheduleQuery>,
) -> Result<Json<Value>, AppError> {
    let schedule = state.schedule.free_intervals(doctor_id, query.date).await?;
    Ok(Json(json!(schedule)))
}

pub async fn get_scheduling_metrics(State(state): State<Arc<AppointmentState>>) -> Json<Value> {
    Json(json!(state.metrics.snapshot()))
}

// ==============================================================================
// HELPERS
// ==============================================================================

async fn resolve_duration(state: &AppointmentState, body: &HoldRequestBody) -> Result<i64, AppError> {
    match (body.duration_minutes, body.service_id) {
        (Some(minutes), None) => Ok(minutes),
        (None, Some(service_id)) => {
            let service = state
                .services
                .service(service_id)
                .await
                .map_err(ReservationError::from)?
                .ok_or_else(|| AppError::NotFound(format!("Doctor service {} not found", service_id)))?;

            if service.doctor_id != body.doctor_id {
                return Err(AppError::ValidationError(format!(
                    "service {} is not offered by doctor {}",
                    service_id, body.doctor_id
                )));
            }

            debug!("Using {} minute duration of service {}", service.duration_minutes, service_id);
            Ok(service.duration_minutes)
        }
        (Some(_), Some(_)) => Err(AppError::ValidationError(
            "give either duration_minutes or service_id, not both".to_string(),
        )),
        (None, None) => Err(AppError::ValidationError(
            "duration_minutes or service_id is required".to_string(),
        )),
    }
}
