// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use camino::Utf8PathBuf;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::ConfigurationSection;

fn default_template() -> Utf8PathBuf {
    Utf8PathBuf::from("/config/synapse.template.yaml")
}

fn default_output() -> Utf8PathBuf {
    Utf8PathBuf::from("/config/synapse.yaml")
}

fn default_macaroon_key_path() -> Utf8PathBuf {
    Utf8PathBuf::from("/data/keys/macaroon.key")
}

fn default_known_servers_cache() -> Utf8PathBuf {
    Utf8PathBuf::from("/data/known_federation_servers.yaml")
}

/// Configuration of the homeserver config rendering
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RenderConfig {
    /// Path of the homeserver configuration template
    #[serde(default = "default_template")]
    #[schemars(with = "String")]
    pub template: Utf8PathBuf,

    /// Path the rendered configuration is written to
    #[serde(default = "default_output")]
    #[schemars(with = "String")]
    pub output: Utf8PathBuf,

    /// Path of the macaroon secret key. Generated and persisted on first use
    /// if missing.
    #[serde(default = "default_macaroon_key_path")]
    #[schemars(with = "String")]
    pub macaroon_key_path: Utf8PathBuf,

    /// Server name injected into the template
    ///
    /// Can also be set through the `SERVER_NAME` environment variable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_name: Option<String>,

    /// Local cache of the known federation servers document, reused when the
    /// upstream fetch fails
    #[serde(default = "default_known_servers_cache")]
    #[schemars(with = "String")]
    pub known_servers_cache: Utf8PathBuf,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            template: default_template(),
            output: default_output(),
            macaroon_key_path: default_macaroon_key_path(),
            server_name: None,
            known_servers_cache: default_known_servers_cache(),
        }
    }
}

impl ConfigurationSection for RenderConfig {
    const PATH: Option<&'static str> = Some("render");
}
