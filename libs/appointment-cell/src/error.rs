use chrono::{NaiveDate, NaiveTime};
use thiserror::Error;
use uuid::Uuid;

use doctor_cell::CatalogError;
use shared_database::DatabaseError;
use shared_models::error::AppError;

use crate::models::SlotStatus;

/// Failures raised by a slot ledger backend.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LedgerError {
    #[error("Slot conflicts with an active appointment: {0}")]
    Conflict(String),

    #[error("Slot {id} is {actual}, expected {expected}")]
    StaleState {
        id: Uuid,
        expected: SlotStatus,
        actual: SlotStatus,
    },

    #[error("Slot {0} not found")]
    NotFound(Uuid),

    #[error("Ledger storage unavailable: {0}")]
    Unavailable(String),

    #[error("Ledger backend error: {0}")]
    Backend(String),
}

impl From<DatabaseError> for LedgerError {
    fn from(e: DatabaseError) -> Self {
        match e {
            DatabaseError::Conflict(detail) => LedgerError::Conflict(detail),
            DatabaseError::Unavailable(detail) => LedgerError::Unavailable(detail),
            other => LedgerError::Backend(other.to_string()),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ReservationError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Doctor {doctor_id} does not work {start}-{end} on {date}")]
    OutsideWorkingHours {
        doctor_id: Uuid,
        date: NaiveDate,
        start: NaiveTime,
        end: NaiveTime,
    },

    #[error("Requested slot is already taken: {0}")]
    SlotTaken(String),

    #[error("Appointment {0} not found")]
    NotFound(Uuid),

    #[error("Hold on appointment {0} has expired")]
    Expired(Uuid),

    #[error("Hold key does not match appointment {0}")]
    KeyMismatch(Uuid),

    #[error("Appointment {id} changed concurrently: expected {expected}, found {actual}")]
    StaleState {
        id: Uuid,
        expected: SlotStatus,
        actual: SlotStatus,
    },

    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Operation exceeded its {0} ms deadline")]
    Timeout(u64),
}

impl ReservationError {
    /// Stable name of the error kind, used in logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            ReservationError::Validation(_) => "validation_error",
            ReservationError::OutsideWorkingHours { .. } => "outside_working_hours",
            ReservationError::SlotTaken(_) => "slot_taken",
            ReservationError::NotFound(_) => "not_found",
            ReservationError::Expired(_) => "expired",
            ReservationError::KeyMismatch(_) => "key_mismatch",
            ReservationError::StaleState { .. } => "stale_state",
            ReservationError::StorageUnavailable(_) => "storage_unavailable",
            ReservationError::Timeout(_) => "timeout",
        }
    }

    /// Errors the caller can fix by changing the request.
    pub fn is_client_error(&self) -> bool {
        !matches!(
            self,
            ReservationError::StorageUnavailable(_) | ReservationError::Timeout(_)
        )
    }

    /// Worth retrying with backoff on the caller side.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ReservationError::SlotTaken(_)
                | ReservationError::StaleState { .. }
                | ReservationError::StorageUnavailable(_)
                | ReservationError::Timeout(_)
        )
    }
}

impl From<LedgerError> for ReservationError {
    fn from(e: LedgerError) -> Self {
        match e {
            LedgerError::Conflict(detail) => ReservationError::SlotTaken(detail),
            LedgerError::StaleState { id, expected, actual } => ReservationError::StaleState { id, expected, actual },
            LedgerError::NotFound(id) => ReservationError::NotFound(id),
            LedgerError::Unavailable(detail) | LedgerError::Backend(detail) => {
                ReservationError::StorageUnavailable(detail)
            }
        }
    }
}

impl From<CatalogError> for ReservationError {
    fn from(e: CatalogError) -> Self {
        ReservationError::StorageUnavailable(e.to_string())
    }
}

impl From<ReservationError> for AppError {
    fn from(e: ReservationError) -> Self {
        let message = e.to_string();
        match e {
            ReservationError::Validation(msg) => AppError::ValidationError(msg),
            ReservationError::OutsideWorkingHours { .. } => AppError::Unprocessable {
                code: "outside_working_hours",
                message,
            },
            ReservationError::SlotTaken(_) => AppError::Conflict {
                code: "slot_taken",
                message,
            },
            ReservationError::NotFound(_) => AppError::NotFound(message),
            ReservationError::Expired(_) => AppError::Gone(message),
            ReservationError::KeyMismatch(_) => AppError::Forbidden(message),
            ReservationError::StaleState { .. } => AppError::Conflict {
                code: "stale_state",
                message,
            },
            ReservationError::StorageUnavailable(_) => AppError::ServiceUnavailable(message),
            ReservationError::Timeout(_) => AppError::Timeout(message),
        }
    }
}
