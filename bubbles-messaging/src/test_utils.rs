// SPDX-License-Identifier: MIT OR Apache-2.0

use bubbles_core::crypto::Rng;
use bubbles_core::keys::MasterKey;
use bubbles_store::MemoryStore;

use crate::{Config, MessagingContext};

/// Prints logs to stderr when `RUST_LOG` is set.
pub fn setup_logging() {
    if std::env::var("RUST_LOG").is_ok() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
    }
}

/// Context on an unlocked in-memory store with deterministic randomness.
pub fn memory_context(seed: [u8; 32]) -> MessagingContext<MemoryStore> {
    let rng = Rng::from_seed(seed);
    let master_key = MasterKey::generate(&rng).expect("randomness for master key");
    let store = MemoryStore::with_master_key(master_key);
    MessagingContext::new(store, rng, Config::default())
}
