//! # Lock module
//!
//! This module provide a lock table keyed by the namespace and name of a
//! kubernetes resource. Handlers holding the guard of an identity run one at a
//! time, handlers of different identities run concurrently.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::trace;

// -----------------------------------------------------------------------------
// Locks structure

#[derive(Default, Debug)]
pub struct Locks {
    table: Mutex<HashMap<(String, String), Arc<AsyncMutex<()>>>>,
}

impl Locks {
    /// wait until no other handler holds the identity, the identity is
    /// released when the returned guard is dropped
    pub async fn acquire(&self, namespace: &str, name: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);

            // entries only referenced by the table are neither held nor awaited
            table.retain(|_, lock| Arc::strong_count(lock) > 1);
            table
                .entry((namespace.to_string(), name.to_string()))
                .or_default()
                .to_owned()
        };

        trace!(namespace = namespace, name = name, "Wait for identity lock");
        lock.lock_owned().await
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::timeout;

    use super::*;

    fn tracked(locks: &Locks) -> usize {
        locks.table.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    #[tokio::test]
    async fn same_identity_is_serialized() {
        let locks = Locks::default();
        let guard = locks.acquire("shop", "orders").await;

        let pending = timeout(Duration::from_millis(50), locks.acquire("shop", "orders")).await;
        assert!(pending.is_err(), "second acquisition should wait");

        drop(guard);
        let acquired = timeout(Duration::from_millis(50), locks.acquire("shop", "orders")).await;
        assert!(acquired.is_ok());
    }

    #[tokio::test]
    async fn different_identities_do_not_block() {
        let locks = Locks::default();
        let _orders = locks.acquire("shop", "orders").await;

        let other = timeout(Duration::from_millis(50), locks.acquire("shop", "billing")).await;
        assert!(other.is_ok());

        let namespaced = timeout(Duration::from_millis(50), locks.acquire("blog", "orders")).await;
        assert!(namespaced.is_ok());
    }

    #[tokio::test]
    async fn released_identities_are_pruned() {
        let locks = Locks::default();

        for name in ["a", "b", "c"] {
            let _guard = locks.acquire("shop", name).await;
        }

        // the last acquisition prunes every previously released identity
        assert_eq!(tracked(&locks), 1);

        let _guard = locks.acquire("shop", "d").await;
        assert_eq!(tracked(&locks), 1);
    }
}
