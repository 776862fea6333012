use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use shared_config::ReclaimerSettings;

use crate::clock::Clock;
use crate::error::{LedgerError, ReservationError};
use crate::models::SlotTransition;
use crate::services::ledger::SlotLedger;
use crate::services::locks::DoctorLockTable;
use crate::services::observer::{ObservedCall, Operation, ReservationObserver};

/// Outcome of one reclamation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub scanned: usize,
    pub expired: usize,
    /// Holds confirmed or released between the scan and the update.
    pub raced: usize,
    pub pruned_locks: usize,
    pub interrupted: bool,
}

/// Background task that moves lapsed holds to `Expired` so they stop
/// occupying their interval in listings and schedules.
pub struct ExpiryReclaimer {
    ledger: Arc<dyn SlotLedger>,
    clock: Arc<dyn Clock>,
    locks: Arc<DoctorLockTable>,
    settings: ReclaimerSettings,
    observers: Vec<Arc<dyn ReservationObserver>>,
    shutdown: watch::Sender<bool>,
}

impl ExpiryReclaimer {
    pub fn new(
        ledger: Arc<dyn SlotLedger>,
        clock: Arc<dyn Clock>,
        locks: Arc<DoctorLockTable>,
        settings: ReclaimerSettings,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            ledger,
            clock,
            locks,
            settings,
            observers: Vec::new(),
            shutdown,
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn ReservationObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    /// Sweep on a fixed interval until [`shutdown`](Self::shutdown) is called.
    pub async fn run(&self) {
        let mut stop = self.shutdown.subscribe();
        let mut ticker = tokio::time::interval(Duration::from_secs(self.settings.interval_seconds.max(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            "Expiry reclaimer started (every {}s, batch {})",
            self.settings.interval_seconds, self.settings.batch_size
        );

        loop {
            if *stop.borrow() {
                break;
            }

            tokio::select! {
                _ = ticker.tick() => {
                    match self.sweep_once().await {
                        Ok(report) if report.expired > 0 || report.raced > 0 => {
                            info!(
                                "Reclaimed {} lapsed holds ({} raced, {} scanned)",
                                report.expired, report.raced, report.scanned
                            );
                        }
                        Ok(_) => debug!("Reclaimer sweep found nothing to expire"),
                        Err(e) => error!("Reclaimer sweep failed: {}", e),
                    }
                }
                changed = stop.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!("Expiry reclaimer stopped");
    }

    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    pub fn is_shut_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// One pass over the lapsed holds, at most `batch_size` of them.
    pub async fn sweep_once(&self) -> Result<SweepReport, ReservationError> {
        let call = ObservedCall::start(&self.observers, Operation::Sweep);
        let result = self.sweep().await;
        call.finish(&result);
        result
    }

    async fn sweep(&self) -> Result<SweepReport, ReservationError> {
        let now = self.clock.now();
        let lapsed = self
            .ledger
            .lapsed_holds(now, None, self.settings.batch_size.max(1))
            .await?;

        let mut report = SweepReport {
            scanned: lapsed.len(),
            ..SweepReport::default()
        };
        let step_timeout = Duration::from_millis(self.settings.transition_timeout_ms.max(1));

        for slot in lapsed {
            if self.is_shut_down() {
                report.interrupted = true;
                break;
            }

            let change = SlotTransition::expire(now);
            match tokio::time::timeout(step_timeout, self.ledger.transition(slot.id, change)).await {
                Ok(Ok(_)) => {
                    debug!("Expired hold {} of doctor {}", slot.id, slot.doctor_id);
                    report.expired += 1;
                }
                Ok(Err(LedgerError::StaleState { .. })) | Ok(Err(LedgerError::NotFound(_))) => {
                    report.raced += 1;
                }
                Ok(Err(e)) => {
                    warn!("Stopping sweep after failing to expire {}: {}", slot.id, e);
                    report.interrupted = true;
                    break;
                }
                Err(_) => {
                    warn!(
                        "Expiring hold {} exceeded {} ms, stopping sweep",
                        slot.id, self.settings.transition_timeout_ms
                    );
                    report.interrupted = true;
                    break;
                }
            }
        }

        if report.expired > 0 {
            for observer in &self.observers {
                observer.on_holds_expired(report.expired);
            }
        }

        report.pruned_locks = self.locks.prune_idle();
        Ok(report)
    }
}
