// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::Parser;
use figment::Figment;
use mms_config::{CertsConfig, ConfigurationSectionExt};
use mms_tasks::certs;
use tracing::{info, info_span};

#[derive(Parser, Debug)]
pub(super) struct Options {
    /// Path of the ACME account file to watch
    acme_json: Option<Utf8PathBuf>,

    /// Directory the PEM files are written to
    output: Option<Utf8PathBuf>,

    /// File stamped with a timestamp after every successful extraction
    #[arg(long)]
    status_file: Option<Utf8PathBuf>,

    /// Extract once and exit instead of watching for changes
    #[arg(long)]
    once: bool,
}

impl Options {
    pub async fn run(self, figment: &Figment) -> anyhow::Result<ExitCode> {
        let _span = info_span!("cli.extract_certs").entered();

        let certs_config =
            CertsConfig::extract_or_default(figment).map_err(anyhow::Error::from_boxed)?;

        let acme_json = self.acme_json.unwrap_or(certs_config.acme_json.clone());
        let output = self.output.unwrap_or(certs_config.output.clone());
        let status_file = self.status_file.or(certs_config.status_file.clone());

        if self.once {
            let count = certs::extract_to(&acme_json, &output).await?;
            info!(count, "Extraction done");
            return Ok(ExitCode::SUCCESS);
        }

        info!(path = %acme_json, "Starting...");
        certs::watch(
            &acme_json,
            &output,
            status_file.as_deref(),
            certs_config.poll_interval(),
        )
        .await?;

        Ok(ExitCode::SUCCESS)
    }
}
