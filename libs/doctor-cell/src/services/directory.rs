use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Method;
use tracing::debug;
use uuid::Uuid;

use shared_database::SupabaseClient;

use crate::error::CatalogError;
use crate::models::DoctorService;

/// Lookup of priced doctor services, used to resolve a booking's duration.
#[async_trait]
pub trait DoctorServiceDirectory: Send + Sync {
    async fn service(&self, service_id: Uuid) -> Result<Option<DoctorService>, CatalogError>;
}

#[derive(Debug, Default)]
pub struct InMemoryDoctorServiceDirectory {
    services: HashMap<Uuid, DoctorService>,
}

impl InMemoryDoctorServiceDirectory {
    pub fn new(services: Vec<DoctorService>) -> Result<Self, CatalogError> {
        if let Some(bad) = services.iter().find(|s| s.duration_minutes <= 0) {
            return Err(CatalogError::InvalidSchedule(format!(
                "service {} has non-positive duration {}",
                bad.id, bad.duration_minutes
            )));
        }

        Ok(Self {
            services: services.into_iter().map(|s| (s.id, s)).collect(),
        })
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| CatalogError::Seed(format!("{}: {}", path.display(), e)))?;
        let services: Vec<DoctorService> = serde_json::from_str(&raw)
            .map_err(|e| CatalogError::Seed(format!("{}: {}", path.display(), e)))?;
        Self::new(services)
    }
}

#[async_trait]
impl DoctorServiceDirectory for InMemoryDoctorServiceDirectory {
    async fn service(&self, service_id: Uuid) -> Result<Option<DoctorService>, CatalogError> {
        Ok(self.services.get(&service_id).cloned())
    }
}

pub struct SupabaseDoctorServiceDirectory {
    supabase: Arc<SupabaseClient>,
}

impl SupabaseDoctorServiceDirectory {
    pub fn new(supabase: Arc<SupabaseClient>) -> Self {
        Self { supabase }
    }
}

#[async_trait]
impl DoctorServiceDirectory for SupabaseDoctorServiceDirectory {
    async fn service(&self, service_id: Uuid) -> Result<Option<DoctorService>, CatalogError> {
        debug!("Fetching doctor service {}", service_id);

        let path = format!("/rest/v1/doctor_services?id=eq.{}&limit=1", service_id);
        let rows: Vec<DoctorService> = self.supabase.request(Method::GET, &path, None).await?;

        Ok(rows.into_iter().next())
    }
}
