pub mod catalog;
pub mod directory;

pub use catalog::{InMemoryWorkingHoursCatalog, SupabaseWorkingHoursCatalog, WorkingHoursCatalog};
pub use directory::{DoctorServiceDirectory, InMemoryDoctorServiceDirectory, SupabaseDoctorServiceDirectory};
