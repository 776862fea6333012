use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{bail, Context};
use dotenv::dotenv;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::{self, TraceLayer};
use tracing::{info, warn, Level};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod router;

use appointment_cell::{
    AppointmentState, Clock, ExpiryReclaimer, InMemorySlotLedger, ListingLimits, ListingService,
    ReservationEngine, ReservationObserver, ReservationPolicy, ScheduleService, SchedulingMetricsObserver,
    SlotLedger, SupabaseSlotLedger, SystemClock, TracingObserver,
};
use doctor_cell::{
    DoctorServiceDirectory, InMemoryDoctorServiceDirectory, InMemoryWorkingHoursCatalog,
    SupabaseDoctorServiceDirectory, SupabaseWorkingHoursCatalog, WorkingHoursCatalog,
};
use shared_config::{AppConfig, StorageBackend};
use shared_database::SupabaseClient;

struct Backends {
    ledger: Arc<dyn SlotLedger>,
    catalog: Arc<dyn WorkingHoursCatalog>,
    services: Arc<dyn DoctorServiceDirectory>,
}

fn build_backends(config: &AppConfig) -> anyhow::Result<Backends> {
    match config.storage_backend {
        StorageBackend::Supabase => {
            if !config.is_supabase_configured() {
                bail!("STORAGE_BACKEND=supabase requires SUPABASE_URL and SUPABASE_SERVICE_KEY");
            }
            let supabase = Arc::new(SupabaseClient::new(config));
            info!("Using Supabase storage at {}", supabase.get_base_url());

            Ok(Backends {
                ledger: Arc::new(SupabaseSlotLedger::new(supabase.clone())),
                catalog: Arc::new(SupabaseWorkingHoursCatalog::new(supabase.clone())),
                services: Arc::new(SupabaseDoctorServiceDirectory::new(supabase)),
            })
        }
        StorageBackend::Memory => {
            let catalog = match &config.working_hours_seed {
                Some(path) => InMemoryWorkingHoursCatalog::from_json_file(path)
                    .with_context(|| format!("loading working hours from {}", path))?,
                None => {
                    warn!("WORKING_HOURS_SEED not set; every reservation will be outside working hours");
                    InMemoryWorkingHoursCatalog::new()
                }
            };
            let services = match &config.doctor_services_seed {
                Some(path) => InMemoryDoctorServiceDirectory::from_json_file(path)
                    .with_context(|| format!("loading doctor services from {}", path))?,
                None => InMemoryDoctorServiceDirectory::new(Vec::new())?,
            };
            info!("Using in-memory storage");

            Ok(Backends {
                ledger: Arc::new(InMemorySlotLedger::new()),
                catalog: Arc::new(catalog),
                services: Arc::new(services),
            })
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Loading Env Vars
    dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting hospital reservation API server");

    // Load configuration
    let config = AppConfig::from_env();
    let backends = build_backends(&config)?;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let metrics = Arc::new(SchedulingMetricsObserver::new());
    let tracing_observer: Arc<dyn ReservationObserver> = Arc::new(TracingObserver);

    let engine = ReservationEngine::new(
        backends.ledger.clone(),
        backends.catalog.clone(),
        clock.clone(),
        ReservationPolicy::from(&config.reservation),
    )
    .with_observer(tracing_observer.clone())
    .with_observer(metrics.clone());

    let reclaimer = Arc::new(
        ExpiryReclaimer::new(
            backends.ledger.clone(),
            clock.clone(),
            engine.lock_table(),
            config.reclaimer.clone(),
        )
        .with_observer(tracing_observer.clone())
        .with_observer(metrics.clone()),
    );
    let reclaimer_task = tokio::spawn({
        let reclaimer = Arc::clone(&reclaimer);
        async move { reclaimer.run().await }
    });

    // Create shared state
    let state = Arc::new(AppointmentState {
        engine: Arc::new(engine),
        listing: Arc::new(
            ListingService::new(backends.ledger.clone(), clock.clone(), ListingLimits::from(&config.reservation))
                .with_observer(tracing_observer.clone()),
        ),
        schedule: Arc::new(ScheduleService::new(backends.catalog, backends.ledger, clock)),
        services: backends.services,
        metrics,
    });

    // Set up CORS
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Build the application router
    let app = router::create_router(state)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(trace::DefaultMakeSpan::new()
                    .level(Level::INFO))
                .on_response(trace::DefaultOnResponse::new()
                    .level(Level::INFO)),
        )
        .layer(cors);

    // Run the server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    info!("Listening on {}", addr);

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {}", addr))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    reclaimer.shutdown();
    if let Err(e) = reclaimer_task.await {
        warn!("Reclaimer task ended abnormally: {}", e);
    }

    info!("Server stopped");
    Ok(())
}
