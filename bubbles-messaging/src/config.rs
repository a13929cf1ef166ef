// SPDX-License-Identifier: MIT OR Apache-2.0

use serde::{Deserialize, Serialize};

/// Default for [`Config::max_skipped_message_keys`].
pub const DEFAULT_MAX_SKIPPED_MESSAGE_KEYS: u32 = 1000;

/// Configuration of a messaging context.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// How many message keys a single incoming message may make us derive ahead of the last
    /// one we received. Bounds the work (and the number of cached keys) a malicious or broken
    /// header can cause.
    pub max_skipped_message_keys: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_skipped_message_keys: DEFAULT_MAX_SKIPPED_MESSAGE_KEYS,
        }
    }
}

impl Config {
    pub fn max_skipped_message_keys(mut self, max: u32) -> Self {
        self.max_skipped_message_keys = max;
        self
    }
}
