use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use callhook_core::domain::business::BusinessId;

const PRUNE_THRESHOLD: usize = 1024;

/// Serializes state updates per (business, phone). Duplicate provider webhooks
/// for the same caller queue up here instead of racing each other.
///
/// Guards are dropped before any outbound network call.
#[derive(Default)]
pub struct KeyedLocks {
    slots: DashMap<(BusinessId, String), Arc<Mutex<()>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, business_id: &BusinessId, phone: &str) -> OwnedMutexGuard<()> {
        if self.slots.len() > PRUNE_THRESHOLD {
            self.prune();
        }
        let slot = self
            .slots
            .entry((business_id.clone(), phone.to_string()))
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        slot.lock_owned().await
    }

    /// Drops slots nobody holds or waits on.
    pub fn prune(&self) {
        self.slots.retain(|_, slot| Arc::strong_count(slot) > 1);
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
