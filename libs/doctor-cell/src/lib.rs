pub mod error;
pub mod models;
pub mod services;

pub use error::CatalogError;
pub use models::*;
pub use services::*;
