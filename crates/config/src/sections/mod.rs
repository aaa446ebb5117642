// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

mod certs;
mod credentials;
mod database;
mod eviction;
mod federation;
mod matrix;
mod purge;
mod render;
mod rooms;

pub use self::{
    certs::CertsConfig,
    credentials::{Credentials, CredentialsConfig},
    database::DatabaseConfig,
    eviction::EvictionConfig,
    federation::FederationConfig,
    matrix::MatrixConfig,
    purge::PurgeConfig,
    render::RenderConfig,
    rooms::RoomsConfig,
};
use crate::util::ConfigurationSection;

/// Application configuration root
#[derive(Debug, Default, Serialize, Deserialize, JsonSchema)]
pub struct RootConfig {
    /// Configuration related to the Matrix homeserver
    #[serde(default)]
    pub matrix: MatrixConfig,

    /// Homeserver database connection configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Admin credentials used to log in to the homeserver
    #[serde(default)]
    pub credentials: CredentialsConfig,

    /// Configuration of the history purger
    #[serde(default)]
    pub purge: PurgeConfig,

    /// Configuration of the federated room ensurer
    #[serde(default)]
    pub rooms: RoomsConfig,

    /// Configuration of the inactive-user eviction
    #[serde(default)]
    pub eviction: EvictionConfig,

    /// Configuration of the TLS certificate extraction
    #[serde(default)]
    pub certs: CertsConfig,

    /// Configuration of the homeserver config rendering
    #[serde(default)]
    pub render: RenderConfig,

    /// Configuration of the federation whitelist watcher
    #[serde(default)]
    pub federation: FederationConfig,
}

impl ConfigurationSection for RootConfig {}

#[cfg(test)]
mod tests {
    use figment::{
        Figment, Jail,
        providers::{Format, Yaml},
    };

    use super::*;

    #[test]
    fn load_empty_config() {
        Jail::expect_with(|jail| {
            jail.create_file("config.yaml", "{}")?;

            let config = Figment::new()
                .merge(Yaml::file("config.yaml"))
                .extract::<RootConfig>()?;

            assert_eq!(config.purge.parallel_purges, 10);
            assert_eq!(&config.matrix.homeserver, "localhost:8008");

            Ok(())
        });
    }
}
