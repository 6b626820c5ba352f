//! services/result_locks.rs
//! Registro de mutex por destinatario: una mutación a la vez por `r_id`,
//! destinatarios distintos en paralelo.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

#[derive(Debug, Default)]
pub struct ResultLocks {
    slots: Mutex<HashMap<String, Slot>>,
}

/// Mutex de una clave y cuántos `lock()` lo usan (esperando o con el turno).
#[derive(Debug, Default)]
struct Slot {
    mutex: Arc<AsyncMutex<()>>,
    users: usize,
}

/// Turno exclusivo sobre un destinatario. Se libera al hacer drop, en cualquier
/// camino de salida (incluidos `?` y panics).
pub struct ResultTurn<'a> {
    guard: Option<OwnedMutexGuard<()>>,
    _slot: SlotRef<'a>,
}

/// Referencia a la entrada del registro. Existe desde antes de esperar el mutex,
/// así un `lock()` abandonado a mitad de la espera también limpia su clave.
struct SlotRef<'a> {
    registry: &'a ResultLocks,
    key: String,
}

impl ResultLocks {
    pub fn new() -> Self {
        ResultLocks::default()
    }

    pub async fn lock(&self, key: &str) -> ResultTurn<'_> {
        let mutex = {
            let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            let slot = slots.entry(key.to_string()).or_default();
            slot.users += 1;
            slot.mutex.clone()
        };
        let slot = SlotRef {
            registry: self,
            key: key.to_string(),
        };
        let guard = mutex.lock_owned().await;

        ResultTurn {
            guard: Some(guard),
            _slot: slot,
        }
    }

    /// Cantidad de mutex vivos en el registro.
    pub fn active_slots(&self) -> usize {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl Drop for ResultTurn<'_> {
    fn drop(&mut self) {
        // Primero el mutex, después `_slot` descuenta su uso de la clave
        drop(self.guard.take());
    }
}

impl Drop for SlotRef<'_> {
    fn drop(&mut self) {
        let mut slots = self
            .registry
            .slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let idle = match slots.get_mut(&self.key) {
            Some(slot) => {
                slot.users = slot.users.saturating_sub(1);
                slot.users == 0
            }
            None => false,
        };
        if idle {
            slots.remove(&self.key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[actix_rt::test]
    async fn same_key_is_serialized() {
        let locks = Arc::new(ResultLocks::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let max_inside = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let locks = locks.clone();
            let inside = inside.clone();
            let max_inside = max_inside.clone();
            handles.push(tokio::spawn(async move {
                let _turn = locks.lock("abc1234").await;
                let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                max_inside.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                inside.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for result in futures_util::future::join_all(handles).await {
            result.unwrap();
        }

        assert_eq!(max_inside.load(Ordering::SeqCst), 1);
        assert_eq!(locks.active_slots(), 0);
    }

    #[actix_rt::test]
    async fn different_keys_do_not_block_each_other() {
        let locks = ResultLocks::new();
        let _first = locks.lock("aaaaaaa").await;

        let second = tokio::time::timeout(Duration::from_millis(200), locks.lock("bbbbbbb")).await;
        assert!(second.is_ok(), "otra clave no debería esperar");
        assert_eq!(locks.active_slots(), 2);
    }

    #[actix_rt::test]
    async fn turn_is_released_on_error_path() {
        async fn failing(locks: &ResultLocks) -> anyhow::Result<()> {
            let _turn = locks.lock("ccccccc").await;
            anyhow::bail!("fallo a mitad de la mutación");
        }

        let locks = ResultLocks::new();
        assert!(failing(&locks).await.is_err());
        assert_eq!(locks.active_slots(), 0);

        let again = tokio::time::timeout(Duration::from_millis(200), locks.lock("ccccccc")).await;
        assert!(again.is_ok());
    }

    #[actix_rt::test]
    async fn abandoned_wait_does_not_leave_its_key_behind() {
        let locks = ResultLocks::new();
        let holder = locks.lock("ddddddd").await;

        let mut waiter = Box::pin(locks.lock("ddddddd"));
        let waited = tokio::time::timeout(Duration::from_millis(20), &mut waiter).await;
        assert!(waited.is_err(), "el turno sigue tomado");

        drop(holder);
        assert_eq!(locks.active_slots(), 1);

        // El que esperaba se va sin llegar a tener el turno
        drop(waiter);
        assert_eq!(locks.active_slots(), 0);
    }
}
