// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use std::time::Duration;

use camino::Utf8PathBuf;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::ConfigurationSection;

fn default_acme_json() -> Utf8PathBuf {
    Utf8PathBuf::from("/data/acme.json")
}

fn default_output() -> Utf8PathBuf {
    Utf8PathBuf::from("/certs")
}

fn default_poll_interval() -> u64 {
    10
}

/// Configuration of the TLS certificate extraction
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CertsConfig {
    /// Path of the ACME account file maintained by the edge proxy
    #[serde(default = "default_acme_json")]
    #[schemars(with = "String")]
    pub acme_json: Utf8PathBuf,

    /// Directory the PEM files are written to
    #[serde(default = "default_output")]
    #[schemars(with = "String")]
    pub output: Utf8PathBuf,

    /// File touched with a timestamp after every successful extraction,
    /// usable as a healthcheck target
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schemars(with = "Option<String>")]
    pub status_file: Option<Utf8PathBuf>,

    /// How often to check the ACME file for changes, in seconds
    #[serde(default = "default_poll_interval")]
    pub poll_interval: u64,
}

impl CertsConfig {
    /// Interval between checks of the ACME file
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval)
    }
}

impl Default for CertsConfig {
    fn default() -> Self {
        Self {
            acme_json: default_acme_json(),
            output: default_output(),
            status_file: None,
            poll_interval: default_poll_interval(),
        }
    }
}

impl ConfigurationSection for CertsConfig {
    const PATH: Option<&'static str> = Some("certs");
}
