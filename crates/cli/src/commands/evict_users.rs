// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use std::process::ExitCode;

use anyhow::Context;
use camino::Utf8PathBuf;
use clap::Parser;
use figment::Figment;
use mms_config::{ConfigurationSectionExt, CredentialsConfig, EvictionConfig, MatrixConfig, RoomsConfig};
use mms_matrix::HomeserverConnection;
use mms_tasks::eviction::{evict_inactive_users, load_ledger, store_ledger};
use tracing::{debug, info, info_span};
use url::Url;

use crate::util::admin_connection_from_config;

#[derive(Parser, Debug)]
pub(super) struct Options {
    /// Homeserver client API URL, e.g.: http://hostname
    #[arg(env = "MATRIX_SERVER")]
    server: Option<Url>,

    /// JSON file holding the admin username and password
    #[arg(short = 'c', long, env = "MATRIX_CREDENTIALS_FILE")]
    credentials_file: Option<Utf8PathBuf>,

    /// Path of the presence ledger file
    #[arg(long, env = "MATRIX_INACTIVE_USERS_FILE")]
    state_file: Option<Utf8PathBuf>,
}

impl Options {
    pub async fn run(self, figment: &Figment) -> anyhow::Result<ExitCode> {
        let _span = info_span!("cli.evict_users").entered();

        let matrix_config =
            MatrixConfig::extract_or_default(figment).map_err(anyhow::Error::from_boxed)?;
        let credentials_config =
            CredentialsConfig::extract_or_default(figment).map_err(anyhow::Error::from_boxed)?;
        let rooms_config =
            RoomsConfig::extract_or_default(figment).map_err(anyhow::Error::from_boxed)?;
        let eviction_config =
            EvictionConfig::extract_or_default(figment).map_err(anyhow::Error::from_boxed)?;

        let matrix_config = MatrixConfig {
            endpoint: self.server.unwrap_or(matrix_config.endpoint),
            ..matrix_config
        };
        let credentials_config = CredentialsConfig {
            file: self.credentials_file.or(credentials_config.file),
            ..credentials_config
        };
        let state_file = self.state_file.unwrap_or(eviction_config.state_file.clone());

        let Some(mut ledger) = load_ledger(&state_file).await? else {
            info!(path = %state_file, "No presence ledger, nothing to do");
            return Ok(ExitCode::SUCCESS);
        };

        let credentials = credentials_config.load().await?;
        let connection = admin_connection_from_config(
            &matrix_config,
            &credentials,
            mms_matrix_synapse::http_client(),
        )
        .await?;

        // Resolve the broadcast rooms; aliases that cannot be resolved are
        // skipped rather than blocking the eviction of everyone else
        let mut broadcast_rooms = Vec::new();
        for alias_localpart in &rooms_config.aliases {
            let alias = format!("#{alias_localpart}:{}", matrix_config.homeserver);
            match connection.join_room(&alias).await {
                Ok(room_id) => broadcast_rooms.push(room_id),
                Err(error) => debug!(
                    room_alias = alias,
                    error = &*error as &dyn std::error::Error,
                    "Could not resolve broadcast room"
                ),
            }
        }

        let outcome = evict_inactive_users(
            &connection,
            &mut ledger,
            &broadcast_rooms,
            eviction_config.threshold(),
            eviction_config.pace(),
            chrono::Utc::now().timestamp(),
        )
        .await?;

        store_ledger(&state_file, &ledger)
            .await
            .context("could not persist the updated presence ledger")?;

        info!(
            evicted = outcome.evicted.len(),
            refreshed = outcome.refreshed,
            "Eviction run finished"
        );

        Ok(ExitCode::SUCCESS)
    }
}
