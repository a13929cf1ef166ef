// SPDX-License-Identifier: MIT OR Apache-2.0

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use bubbles_core::ids::ContactId;
use tokio::sync::OwnedMutexGuard;

/// One async mutex per contact.
///
/// Held around every read-ratchet-write sequence so two calls for the same contact never
/// derive from the same chain key. Calls for different contacts don't wait on each other.
#[derive(Debug, Default)]
pub(crate) struct ContactLocks {
    locks: Mutex<HashMap<ContactId, Arc<tokio::sync::Mutex<()>>>>,
}

impl ContactLocks {
    pub(crate) async fn lock(&self, id: &ContactId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            locks.entry(*id).or_default().clone()
        };
        lock.lock_owned().await
    }

    pub(crate) fn remove(&self, id: &ContactId) {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id);
    }
}

#[cfg(test)]
mod tests {
    use bubbles_core::crypto::Rng;
    use bubbles_core::ids::ContactId;

    use super::ContactLocks;

    #[tokio::test]
    async fn contacts_lock_independently() {
        let rng = Rng::from_seed([1; 32]);
        let alice = ContactId::random(&rng).unwrap();
        let bob = ContactId::random(&rng).unwrap();
        let locks = ContactLocks::default();

        let _alice_guard = locks.lock(&alice).await;
        // Would never resolve if both contacts shared a lock.
        let _bob_guard = locks.lock(&bob).await;

        assert!(
            tokio::time::timeout(std::time::Duration::from_millis(10), locks.lock(&alice))
                .await
                .is_err()
        );
    }
}
