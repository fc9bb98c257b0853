//! Decorator settings
//!
//! A small serde struct updated wholesale or key-by-key from host-delivered
//! settings-changed events. Persistence across processes is the host's
//! business.

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Settings key: bridge notifications to wearables
pub const PREF_WEAR: &str = "wear";

/// Runtime-tunable decorator behavior
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DecoratorSettings {
    /// Remove the local-only flag so notifications bridge to wearables
    #[serde(default)]
    pub wear: bool,
}

impl DecoratorSettings {
    /// Apply one key/value pair from a settings-changed event
    pub fn apply_update(&mut self, key: &str, value: bool) {
        match key {
            PREF_WEAR => self.wear = value,
            _ => debug!("ignoring unknown settings key: {key}"),
        }
    }
}
