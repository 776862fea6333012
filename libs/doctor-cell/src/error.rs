use thiserror::Error;

use shared_database::DatabaseError;

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Invalid working hours: {0}")]
    InvalidSchedule(String),

    #[error("Directory backend unavailable: {0}")]
    Unavailable(String),

    #[error("Failed to load seed data: {0}")]
    Seed(String),
}

impl From<DatabaseError> for CatalogError {
    fn from(e: DatabaseError) -> Self {
        CatalogError::Unavailable(e.to_string())
    }
}
