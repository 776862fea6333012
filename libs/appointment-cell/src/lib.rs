pub mod clock;
pub mod error;
pub mod handlers;
pub mod models;
pub mod router;
pub mod services;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{LedgerError, ReservationError};
pub use models::*;
pub use router::{appointment_routes, AppointmentState};
pub use services::*;
