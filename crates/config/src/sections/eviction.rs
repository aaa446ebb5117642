// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use std::time::Duration;

use camino::Utf8PathBuf;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::ConfigurationSection;

fn default_state_file() -> Utf8PathBuf {
    Utf8PathBuf::from("/config/inactive_users.json")
}

fn default_threshold() -> u64 {
    // One week
    7 * 24 * 60 * 60
}

fn default_pace_ms() -> u64 {
    100
}

/// Configuration of the inactive-user eviction
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct EvictionConfig {
    /// Path of the JSON presence ledger mapping user IDs to their last
    /// recorded activity, in epoch seconds
    #[serde(default = "default_state_file")]
    #[schemars(with = "String")]
    pub state_file: Utf8PathBuf,

    /// Inactivity threshold in seconds after which a user is evicted
    #[serde(default = "default_threshold")]
    pub threshold: u64,

    /// Pause between consecutive homeserver calls, in milliseconds
    #[serde(default = "default_pace_ms")]
    pub pace_ms: u64,
}

impl EvictionConfig {
    /// Inactivity threshold
    #[must_use]
    pub fn threshold(&self) -> Duration {
        Duration::from_secs(self.threshold)
    }

    /// Pause between consecutive homeserver calls
    #[must_use]
    pub fn pace(&self) -> Duration {
        Duration::from_millis(self.pace_ms)
    }
}

impl Default for EvictionConfig {
    fn default() -> Self {
        Self {
            state_file: default_state_file(),
            threshold: default_threshold(),
            pace_ms: default_pace_ms(),
        }
    }
}

impl ConfigurationSection for EvictionConfig {
    const PATH: Option<&'static str> = Some("eviction");
}
