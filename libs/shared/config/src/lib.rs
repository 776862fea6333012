use std::env;
use std::fmt::Display;
use std::ops::RangeInclusive;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    Memory,
    Supabase,
}

impl FromStr for StorageBackend {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "memory" | "in_memory" => Ok(StorageBackend::Memory),
            "supabase" | "postgrest" => Ok(StorageBackend::Supabase),
            other => Err(format!("unknown storage backend '{}'", other)),
        }
    }
}

impl std::fmt::Display for StorageBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageBackend::Memory => write!(f, "memory"),
            StorageBackend::Supabase => write!(f, "supabase"),
        }
    }
}

/// Knobs for the hold-then-confirm booking protocol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReservationSettings {
    pub hold_ttl_seconds: i64,
    pub booking_grace_seconds: i64,
    pub max_advance_booking_days: i64,
    pub min_appointment_minutes: i64,
    pub max_appointment_minutes: i64,
    pub request_timeout_ms: u64,
    pub storage_retry_attempts: u32,
    pub storage_retry_backoff_ms: u64,
    pub list_default_limit: u32,
    pub list_max_limit: u32,
}

/// Longest booking horizon accepted from configuration.
pub const MAX_ADVANCE_BOOKING_DAYS_LIMIT: i64 = 3_650;

impl ReservationSettings {
    /// Replace out-of-range values with their defaults, warning for each one.
    pub fn validated(self) -> Self {
        let defaults = Self::default();

        let hold_ttl_seconds = in_range_or(
            "HOLD_TTL_SECONDS",
            self.hold_ttl_seconds,
            1..=86_400,
            defaults.hold_ttl_seconds,
        );
        let booking_grace_seconds = in_range_or(
            "BOOKING_GRACE_SECONDS",
            self.booking_grace_seconds,
            0..=86_400,
            defaults.booking_grace_seconds,
        );
        let max_advance_booking_days = in_range_or(
            "MAX_ADVANCE_BOOKING_DAYS",
            self.max_advance_booking_days,
            1..=MAX_ADVANCE_BOOKING_DAYS_LIMIT,
            defaults.max_advance_booking_days,
        );
        let min_appointment_minutes = in_range_or(
            "MIN_APPOINTMENT_MINUTES",
            self.min_appointment_minutes,
            1..=1_439,
            defaults.min_appointment_minutes,
        );
        let mut max_appointment_minutes = in_range_or(
            "MAX_APPOINTMENT_MINUTES",
            self.max_appointment_minutes,
            1..=1_439,
            defaults.max_appointment_minutes,
        );
        if max_appointment_minutes < min_appointment_minutes {
            warn!(
                "MAX_APPOINTMENT_MINUTES ({}) is below MIN_APPOINTMENT_MINUTES ({}), using {}",
                max_appointment_minutes, min_appointment_minutes, min_appointment_minutes
            );
            max_appointment_minutes = min_appointment_minutes;
        }
        let list_max_limit = in_range_or("LIST_MAX_LIMIT", self.list_max_limit, 1..=1_000, defaults.list_max_limit);
        let list_default_limit = in_range_or(
            "LIST_DEFAULT_LIMIT",
            self.list_default_limit,
            1..=list_max_limit,
            defaults.list_default_limit.min(list_max_limit),
        );

        Self {
            hold_ttl_seconds,
            booking_grace_seconds,
            max_advance_booking_days,
            min_appointment_minutes,
            max_appointment_minutes,
            request_timeout_ms: in_range_or(
                "REQUEST_TIMEOUT_MS",
                self.request_timeout_ms,
                1..=600_000,
                defaults.request_timeout_ms,
            ),
            storage_retry_attempts: in_range_or(
                "STORAGE_RETRY_ATTEMPTS",
                self.storage_retry_attempts,
                1..=10,
                defaults.storage_retry_attempts,
            ),
            storage_retry_backoff_ms: in_range_or(
                "STORAGE_RETRY_BACKOFF_MS",
                self.storage_retry_backoff_ms,
                0..=60_000,
                defaults.storage_retry_backoff_ms,
            ),
            list_default_limit,
            list_max_limit,
        }
    }
}

impl Default for ReservationSettings {
    fn default() -> Self {
        Self {
            hold_ttl_seconds: 600,
            booking_grace_seconds: 300,
            max_advance_booking_days: 90,
            min_appointment_minutes: 1,
            max_appointment_minutes: 480,
            request_timeout_ms: 5_000,
            storage_retry_attempts: 3,
            storage_retry_backoff_ms: 100,
            list_default_limit: 10,
            list_max_limit: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReclaimerSettings {
    pub interval_seconds: u64,
    pub batch_size: usize,
    pub transition_timeout_ms: u64,
}

impl Default for ReclaimerSettings {
    fn default() -> Self {
        Self {
            interval_seconds: 30,
            batch_size: 200,
            transition_timeout_ms: 2_000,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server_port: u16,
    pub storage_backend: StorageBackend,
    pub supabase_url: String,
    pub supabase_service_key: String,
    pub working_hours_seed: Option<String>,
    pub doctor_services_seed: Option<String>,
    pub reservation: ReservationSettings,
    pub reclaimer: ReclaimerSettings,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server_port: 3000,
            storage_backend: StorageBackend::Memory,
            supabase_url: String::new(),
            supabase_service_key: String::new(),
            working_hours_seed: None,
            doctor_services_seed: None,
            reservation: ReservationSettings::default(),
            reclaimer: ReclaimerSettings::default(),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        let defaults = ReservationSettings::default();
        let reclaimer_defaults = ReclaimerSettings::default();

        let config = Self {
            server_port: parse_or("SERVER_PORT", 3000),
            storage_backend: parse_or("STORAGE_BACKEND", StorageBackend::Memory),
            supabase_url: env::var("SUPABASE_URL")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_URL not set, using empty value");
                    String::new()
                }),
            supabase_service_key: env::var("SUPABASE_SERVICE_KEY")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_SERVICE_KEY not set, using empty value");
                    String::new()
                }),
            working_hours_seed: env::var("WORKING_HOURS_SEED").ok(),
            doctor_services_seed: env::var("DOCTOR_SERVICES_SEED").ok(),
            reservation: ReservationSettings {
                hold_ttl_seconds: parse_or("HOLD_TTL_SECONDS", defaults.hold_ttl_seconds),
                booking_grace_seconds: parse_or("BOOKING_GRACE_SECONDS", defaults.booking_grace_seconds),
                max_advance_booking_days: parse_or("MAX_ADVANCE_BOOKING_DAYS", defaults.max_advance_booking_days),
                min_appointment_minutes: parse_or("MIN_APPOINTMENT_MINUTES", defaults.min_appointment_minutes),
                max_appointment_minutes: parse_or("MAX_APPOINTMENT_MINUTES", defaults.max_appointment_minutes),
                request_timeout_ms: parse_or("REQUEST_TIMEOUT_MS", defaults.request_timeout_ms),
                storage_retry_attempts: parse_or("STORAGE_RETRY_ATTEMPTS", defaults.storage_retry_attempts),
                storage_retry_backoff_ms: parse_or("STORAGE_RETRY_BACKOFF_MS", defaults.storage_retry_backoff_ms),
                list_default_limit: parse_or("LIST_DEFAULT_LIMIT", defaults.list_default_limit),
                list_max_limit: parse_or("LIST_MAX_LIMIT", defaults.list_max_limit),
            }
            .validated(),
            reclaimer: ReclaimerSettings {
                interval_seconds: parse_or("RECLAIM_INTERVAL_SECONDS", reclaimer_defaults.interval_seconds),
                batch_size: parse_or("RECLAIM_BATCH_SIZE", reclaimer_defaults.batch_size),
                transition_timeout_ms: parse_or("RECLAIM_TRANSITION_TIMEOUT_MS", reclaimer_defaults.transition_timeout_ms),
            },
        };

        if config.storage_backend == StorageBackend::Supabase && !config.is_supabase_configured() {
            warn!("Supabase storage selected but SUPABASE_URL / SUPABASE_SERVICE_KEY are missing");
        }

        config
    }

    pub fn is_supabase_configured(&self) -> bool {
        !self.supabase_url.is_empty() && !self.supabase_service_key.is_empty()
    }
}

fn parse_or<T>(key: &str, default: T) -> T
where
    T: FromStr + Display,
    T::Err: Display,
{
    match env::var(key) {
        Ok(raw) => raw.parse().unwrap_or_else(|e| {
            warn!("{} has invalid value '{}' ({}), using default {}", key, raw, e, default);
            default
        }),
        Err(_) => default,
    }
}

fn in_range_or<T>(key: &str, value: T, range: RangeInclusive<T>, default: T) -> T
where
    T: PartialOrd + Display + Copy,
{
    if range.contains(&value) {
        value
    } else {
        warn!(
            "{} value {} is outside {}..={}, using default {}",
            key,
            value,
            range.start(),
            range.end(),
            default
        );
        default
    }
}
