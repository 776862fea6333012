use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;
use uuid::Uuid;

/// In-process exclusion scopes keyed by doctor. Holding a [`DoctorGuard`]
/// serializes check-then-insert for that doctor only.
#[derive(Default)]
pub struct DoctorLockTable {
    locks: DashMap<Uuid, Arc<Mutex<()>>>,
}

/// Released on drop, including when the owning future is cancelled.
#[derive(Debug)]
pub struct DoctorGuard {
    _guard: OwnedMutexGuard<()>,
    contended: bool,
}

impl DoctorGuard {
    /// Whether another caller held the scope when this one asked for it.
    pub fn contended(&self) -> bool {
        self.contended
    }
}

impl DoctorLockTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, doctor_id: Uuid) -> DoctorGuard {
        // The shard lock is dropped before awaiting.
        let lock = self
            .locks
            .entry(doctor_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        match lock.clone().try_lock_owned() {
            Ok(guard) => DoctorGuard {
                _guard: guard,
                contended: false,
            },
            Err(_) => {
                debug!("Waiting for scheduling scope of doctor {}", doctor_id);
                DoctorGuard {
                    _guard: lock.lock_owned().await,
                    contended: true,
                }
            }
        }
    }

    /// Drop entries nobody holds or waits on. Returns how many were removed.
    pub fn prune_idle(&self) -> usize {
        let before = self.locks.len();
        self.locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        before.saturating_sub(self.locks.len())
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn second_acquire_waits_for_the_first() {
        let table = Arc::new(DoctorLockTable::new());
        let doctor = Uuid::new_v4();

        let first = table.acquire(doctor).await;
        assert!(!first.contended());

        let waiter = {
            let table = Arc::clone(&table);
            tokio::spawn(async move { table.acquire(doctor).await.contended() })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(first);
        assert!(waiter.await.unwrap());
    }

    #[tokio::test]
    async fn different_doctors_do_not_block_each_other() {
        let table = DoctorLockTable::new();
        let _a = table.acquire(Uuid::new_v4()).await;
        let b = tokio::time::timeout(Duration::from_millis(50), table.acquire(Uuid::new_v4())).await;
        assert!(b.is_ok());
    }

    #[tokio::test]
    async fn prune_keeps_held_scopes() {
        let table = DoctorLockTable::new();
        let held = Uuid::new_v4();

        let _guard = table.acquire(held).await;
        drop(table.acquire(Uuid::new_v4()).await);

        assert_eq!(table.len(), 2);
        assert_eq!(table.prune_idle(), 1);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn waiter_is_woken_when_scope_is_released() {
        let table = DoctorLockTable::new();
        let doctor = Uuid::new_v4();

        let mut first = tokio_test::task::spawn(table.acquire(doctor));
        let guard = tokio_test::assert_ready!(first.poll());

        let mut second = tokio_test::task::spawn(table.acquire(doctor));
        tokio_test::assert_pending!(second.poll());

        drop(guard);
        assert!(second.is_woken());
        let guard = tokio_test::assert_ready!(second.poll());
        assert!(guard.contended());
    }
}
