// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use std::process::ExitCode;

use anyhow::Context;
use camino::Utf8PathBuf;
use clap::Parser;
use figment::Figment;
use mms_config::{ConfigurationSectionExt, FederationConfig, RenderConfig};
use mms_tasks::render::{
    TemplateContext, fetch_known_servers_document, load_or_generate_macaroon_key,
    render_config_file,
};
use tracing::info_span;
use url::Url;

#[derive(Parser, Debug)]
pub(super) struct Options {
    /// Path of the homeserver configuration template
    #[arg(long)]
    template: Option<Utf8PathBuf>,

    /// Path the rendered configuration is written to
    #[arg(long)]
    output: Option<Utf8PathBuf>,

    /// Server name injected into the template
    #[arg(long, env = "SERVER_NAME")]
    server_name: Option<String>,

    /// URL of the known federation servers list
    #[arg(long, env = "URL_KNOWN_FEDERATION_SERVERS")]
    known_servers_url: Option<Url>,
}

impl Options {
    pub async fn run(self, figment: &Figment) -> anyhow::Result<ExitCode> {
        let _span = info_span!("cli.render_config").entered();

        let render_config =
            RenderConfig::extract_or_default(figment).map_err(anyhow::Error::from_boxed)?;
        let federation_config =
            FederationConfig::extract_or_default(figment).map_err(anyhow::Error::from_boxed)?;

        let template = self.template.unwrap_or(render_config.template.clone());
        let output = self.output.unwrap_or(render_config.output.clone());
        let server_name = self
            .server_name
            .or(render_config.server_name.clone())
            .context("no server name configured")?;
        let known_servers_url = self
            .known_servers_url
            .or(federation_config.known_servers_url.clone());

        let macaroon_key =
            load_or_generate_macaroon_key(&render_config.macaroon_key_path).await?;

        let http_client = mms_matrix_synapse::http_client();
        let known_servers = fetch_known_servers_document(
            &http_client,
            known_servers_url.as_ref(),
            &render_config.known_servers_cache,
        )
        .await?;

        let template_context = TemplateContext {
            macaroon_key,
            server_name,
            known_servers,
        };
        render_config_file(&template, &output, &template_context).await?;

        Ok(ExitCode::SUCCESS)
    }
}
