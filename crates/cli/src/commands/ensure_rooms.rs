// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use std::{collections::BTreeMap, process::ExitCode, time::Duration};

use anyhow::{Context, bail};
use camino::Utf8PathBuf;
use clap::Parser;
use figment::Figment;
use futures_util::future::join_all;
use mms_config::{ConfigurationSectionExt, Credentials, CredentialsConfig, MatrixConfig, RoomsConfig};
use mms_matrix_synapse::SynapseConnection;
use mms_tasks::{RoomEnsurer, federation::fetch_known_servers};
use tracing::{info, info_span, warn};
use url::Url;

use crate::util::localpart_of;

/// How long to wait before retrying after a failed ensure run
const RETRY_DELAY: Duration = Duration::from_secs(60);

#[derive(Parser, Debug)]
pub(super) struct Options {
    /// Server name of the server this process runs next to
    #[arg(long, env = "MATRIX_OWN_SERVER")]
    own_server: Option<String>,

    /// How often to perform the room check, in seconds. Set to 0 to run
    /// once.
    #[arg(short, long)]
    interval: Option<u64>,

    /// JSON file holding the admin username and password
    #[arg(short = 'c', long, env = "MATRIX_CREDENTIALS_FILE")]
    credentials_file: Option<Utf8PathBuf>,

    /// URL of the known federation servers list
    #[arg(long, env = "URL_KNOWN_FEDERATION_SERVERS")]
    known_servers_url: Option<Url>,
}

impl Options {
    pub async fn run(self, figment: &Figment) -> anyhow::Result<ExitCode> {
        let _span = info_span!("cli.ensure_rooms").entered();

        let matrix_config =
            MatrixConfig::extract_or_default(figment).map_err(anyhow::Error::from_boxed)?;
        let credentials_config =
            CredentialsConfig::extract_or_default(figment).map_err(anyhow::Error::from_boxed)?;
        let rooms_config =
            RoomsConfig::extract_or_default(figment).map_err(anyhow::Error::from_boxed)?;

        let credentials_config = CredentialsConfig {
            file: self.credentials_file.or(credentials_config.file),
            ..credentials_config
        };
        let credentials = credentials_config.load().await?;

        let own_server = self
            .own_server
            .unwrap_or_else(|| matrix_config.homeserver.clone());
        let known_servers_url = self
            .known_servers_url
            .or(rooms_config.known_servers_url.clone())
            .context("no known servers URL configured")?;
        let interval = match self.interval {
            Some(0) => None,
            Some(secs) => Some(Duration::from_secs(secs)),
            None => rooms_config.interval(),
        };

        if rooms_config.aliases.is_empty() {
            bail!("no room aliases configured, nothing to ensure");
        }

        let http_client = mms_matrix_synapse::http_client();

        loop {
            let result = ensure_once(
                &http_client,
                &known_servers_url,
                &credentials,
                &own_server,
                &rooms_config.aliases,
            )
            .await;

            match result {
                Ok(()) => {
                    let Some(interval) = interval else {
                        return Ok(ExitCode::SUCCESS);
                    };
                    info!(duration = ?interval, "Run finished, sleeping.");
                    tokio::time::sleep(interval).await;
                }
                Err(error) => {
                    warn!(
                        error = &*error as &dyn std::error::Error,
                        "Failure while ensuring rooms. Retrying in 60s."
                    );
                    tokio::time::sleep(RETRY_DELAY).await;
                }
            }
        }
    }
}

async fn ensure_once(
    http_client: &reqwest::Client,
    known_servers_url: &Url,
    credentials: &Credentials,
    own_server: &str,
    aliases: &[String],
) -> Result<(), anyhow::Error> {
    let known_servers = fetch_known_servers(http_client, known_servers_url)
        .await?
        .all_servers;
    if known_servers.is_empty() {
        bail!("no known servers found from the list at {known_servers_url}");
    }

    // Servers are listed as URLs; their host part is the server name
    let servers: Vec<(String, Url)> = known_servers
        .iter()
        .map(|server| {
            let url = Url::parse(server)
                .or_else(|_| Url::parse(&format!("https://{server}")))
                .with_context(|| format!("invalid server entry {server:?}"))?;
            let name = url
                .host_str()
                .map(|host| match url.port() {
                    Some(port) => format!("{host}:{port}"),
                    None => host.to_owned(),
                })
                .with_context(|| format!("server entry {server:?} has no host"))?;
            Ok((name, url))
        })
        .collect::<Result<_, anyhow::Error>>()?;

    let connections = connect_all(http_client, &servers, credentials).await;

    let ensurer = RoomEnsurer::new(
        localpart_of(&credentials.username).to_owned(),
        own_server.to_owned(),
        servers.into_iter().map(|(name, _)| name).collect(),
        connections,
    )?;

    ensurer.ensure_rooms(aliases).await
}

/// Log in to every known server concurrently; unreachable servers are
/// skipped with a warning.
async fn connect_all(
    http_client: &reqwest::Client,
    servers: &[(String, Url)],
    credentials: &Credentials,
) -> BTreeMap<String, SynapseConnection> {
    let logins = servers.iter().map(|(name, url)| async move {
        let connection = SynapseConnection::login_with_password(
            name.clone(),
            url.clone(),
            &credentials.username,
            &credentials.password,
            http_client.clone(),
        )
        .await;

        match connection {
            Ok(connection) => Some((name.clone(), connection)),
            Err(error) => {
                warn!(
                    server_name = name,
                    error = &*error as &dyn std::error::Error,
                    "Could not connect to server"
                );
                None
            }
        }
    });

    join_all(logins).await.into_iter().flatten().collect()
}
