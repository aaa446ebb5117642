// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use anyhow::Context;
use mms_config::{Credentials, DatabaseConfig, MatrixConfig};
use mms_matrix_synapse::SynapseConnection;
use sqlx::{
    ConnectOptions, PgConnection,
    postgres::PgConnectOptions,
};
use tracing::log::LevelFilter;

fn database_connect_options_from_config(
    config: &DatabaseConfig,
) -> Result<PgConnectOptions, anyhow::Error> {
    let options = if let Some(uri) = config.uri.as_deref() {
        uri.parse()
            .context("could not parse database connection string")?
    } else {
        let mut opts = PgConnectOptions::new().application_name("matrix-maintenance-service");

        if let Some(host) = config.host.as_deref() {
            opts = opts.host(host);
        }

        if let Some(port) = config.port {
            opts = opts.port(port);
        }

        if let Some(username) = config.username.as_deref() {
            opts = opts.username(username);
        }

        if let Some(password) = config.password.as_deref() {
            opts = opts.password(password);
        }

        if let Some(database) = config.database.as_deref() {
            opts = opts.database(database);
        }

        opts
    };

    Ok(options.log_statements(LevelFilter::Debug))
}

/// Create a single database connection from the configuration
#[tracing::instrument(name = "db.connect", skip_all)]
pub async fn database_connection_from_config(
    config: &DatabaseConfig,
) -> Result<PgConnection, anyhow::Error> {
    database_connect_options_from_config(config)?
        .connect()
        .await
        .context("could not connect to the database")
}

/// Log in to the homeserver with the admin credentials
pub async fn admin_connection_from_config(
    config: &MatrixConfig,
    credentials: &Credentials,
    http_client: reqwest::Client,
) -> Result<SynapseConnection, anyhow::Error> {
    SynapseConnection::login_with_password(
        config.homeserver.clone(),
        config.endpoint.clone(),
        &credentials.username,
        &credentials.password,
        http_client,
    )
    .await
    .with_context(|| format!("could not log in to server {}", config.endpoint))
}

/// The localpart of a user ID; full Matrix IDs get their sigil and server
/// name stripped, bare localparts pass through.
#[must_use]
pub fn localpart_of(username: &str) -> &str {
    let without_sigil = username.strip_prefix('@').unwrap_or(username);
    without_sigil
        .split_once(':')
        .map_or(without_sigil, |(localpart, _)| localpart)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_localpart_of() {
        assert_eq!(localpart_of("@admin:example.com"), "admin");
        assert_eq!(localpart_of("admin"), "admin");
        assert_eq!(localpart_of("admin:example.com"), "admin");
    }
}
