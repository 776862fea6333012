pub mod keys;
pub mod ledger;
pub mod listing;
pub mod locks;
pub mod observer;
pub mod reclaimer;
pub mod reservation;
pub mod schedule;

pub use ledger::{InMemorySlotLedger, SlotLedger, SupabaseSlotLedger};
pub use listing::ListingService;
pub use locks::{DoctorGuard, DoctorLockTable};
pub use observer::{Operation, ReservationObserver, SchedulingMetricsObserver, TracingObserver};
pub use reclaimer::{ExpiryReclaimer, SweepReport};
pub use reservation::ReservationEngine;
pub use schedule::ScheduleService;
