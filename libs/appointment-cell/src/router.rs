// libs/appointment-cell/src/router.rs
use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};

use doctor_cell::DoctorServiceDirectory;

use crate::handlers;
use crate::services::{ListingService, ReservationEngine, ScheduleService, SchedulingMetricsObserver};

/// Everything the appointment handlers need, shared across requests.
pub struct AppointmentState {
    pub engine: Arc<ReservationEngine>,
    pub listing: Arc<ListingService>,
    pub schedule: Arc<ScheduleService>,
    pub services: Arc<dyn DoctorServiceDirectory>,
    pub metrics: Arc<SchedulingMetricsObserver>,
}

pub fn appointment_routes(state: Arc<AppointmentState>) -> Router {
    Router::new()
        // Hold-then-confirm lifecycle
        .route("/holds", post(handlers::create_hold))
        .route("/{appointment_id}/confirm", post(handlers::confirm_hold))
        .route("/{appointment_id}/release", post(handlers::release_slot))
        .route("/{appointment_id}", get(handlers::get_appointment))

        // Listings and schedule views
        .route("/", get(handlers::list_appointments))
        .route("/doctors/{doctor_id}/schedule", get(handlers::get_doctor_schedule))

        .route("/metrics", get(handlers::get_scheduling_metrics))
        .with_state(state)
}
