// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use std::time::Duration;

use camino::Utf8PathBuf;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use url::Url;

use super::ConfigurationSection;

fn default_synapse_config() -> Utf8PathBuf {
    Utf8PathBuf::from("/config/synapse.yaml")
}

fn default_interval() -> u64 {
    3600
}

/// Configuration of the federation whitelist watcher
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct FederationConfig {
    /// URL of the YAML document listing the known federation servers
    ///
    /// Can also be set through the `URL_KNOWN_FEDERATION_SERVERS` environment
    /// variable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub known_servers_url: Option<Url>,

    /// Path of the homeserver configuration carrying the
    /// `federation_domain_whitelist` to keep up to date
    #[serde(default = "default_synapse_config")]
    #[schemars(with = "String")]
    pub synapse_config: Utf8PathBuf,

    /// How often to refetch the known servers document, in seconds
    #[serde(default = "default_interval")]
    pub interval: u64,

    /// If set, restart all running containers carrying this label when the
    /// whitelist changed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub docker_restart_label: Option<String>,
}

impl FederationConfig {
    /// Interval between refetches of the known servers document
    #[must_use]
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval)
    }
}

impl Default for FederationConfig {
    fn default() -> Self {
        Self {
            known_servers_url: None,
            synapse_config: default_synapse_config(),
            interval: default_interval(),
            docker_restart_label: None,
        }
    }
}

impl ConfigurationSection for FederationConfig {
    const PATH: Option<&'static str> = Some("federation");
}
