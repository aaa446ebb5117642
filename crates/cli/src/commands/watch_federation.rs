// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use std::{process::ExitCode, time::Duration};

use anyhow::Context;
use camino::Utf8PathBuf;
use clap::Parser;
use figment::Figment;
use mms_config::{ConfigurationSectionExt, FederationConfig};
use mms_tasks::{DockerCli, federation};
use tracing::info_span;
use url::Url;

#[derive(Parser, Debug)]
pub(super) struct Options {
    /// URL of the known federation servers list
    #[arg(long, env = "URL_KNOWN_FEDERATION_SERVERS")]
    known_servers_url: Option<Url>,

    /// Path of the homeserver configuration to keep up to date
    #[arg(long)]
    synapse_config: Option<Utf8PathBuf>,

    /// How often to refetch the known servers list, in seconds
    #[arg(short, long)]
    interval: Option<u64>,

    /// If set, search all containers with given label and, if they're
    /// running, restart them when the whitelist changed
    #[arg(long, env = "MATRIX_DOCKER_RESTART_LABEL")]
    docker_restart_label: Option<String>,
}

impl Options {
    pub async fn run(self, figment: &Figment) -> anyhow::Result<ExitCode> {
        let _span = info_span!("cli.watch_federation").entered();

        let federation_config =
            FederationConfig::extract_or_default(figment).map_err(anyhow::Error::from_boxed)?;

        let known_servers_url = self
            .known_servers_url
            .or(federation_config.known_servers_url.clone())
            .context("no known servers URL configured")?;
        let synapse_config = self
            .synapse_config
            .unwrap_or(federation_config.synapse_config.clone());
        let interval = self
            .interval
            .map_or(federation_config.interval(), Duration::from_secs);
        let restart_label = self
            .docker_restart_label
            .or(federation_config.docker_restart_label.clone());

        let http_client = mms_matrix_synapse::http_client();
        federation::watch(
            &http_client,
            &known_servers_url,
            &synapse_config,
            &DockerCli,
            restart_label.as_deref(),
            interval,
        )
        .await;

        Ok(ExitCode::SUCCESS)
    }
}
