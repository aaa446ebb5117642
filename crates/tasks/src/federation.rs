// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

//! Keeping the federation whitelist of the local homeserver in sync with the
//! published known-servers document, restarting the labelled containers when
//! it changed.

use std::time::Duration;

use anyhow::Context as _;
use camino::Utf8Path;
use figment::{
    Figment,
    providers::{Format, Yaml},
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use url::Url;

use crate::containers::{ContainerRuntime, restart_labelled};

/// The published list of known federation servers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnownServers {
    /// Every known server, as URL or bare domain
    pub all_servers: Vec<String>,
}

impl KnownServers {
    /// The server names (host, plus port if any) of every known server
    #[must_use]
    pub fn server_names(&self) -> Vec<String> {
        self.all_servers
            .iter()
            .map(String::as_str)
            .map(server_name_of)
            .collect()
    }
}

/// Extract the `host[:port]` part of a server URL, passing bare domains
/// through
fn server_name_of(server: &str) -> String {
    let Ok(url) = Url::parse(server) else {
        return server.to_owned();
    };
    let Some(host) = url.host_str() else {
        return server.to_owned();
    };

    match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_owned(),
    }
}

/// Fetch and parse the known-servers document.
///
/// # Errors
///
/// Returns an error if the document cannot be fetched or is not of the
/// expected shape.
pub async fn fetch_known_servers(
    http_client: &reqwest::Client,
    url: &Url,
) -> Result<KnownServers, anyhow::Error> {
    let response = http_client
        .get(url.clone())
        .send()
        .await
        .context("could not fetch the known servers document")?
        .error_for_status()
        .context("fetching the known servers document was not successful")?;

    let body = response
        .text()
        .await
        .context("could not read the known servers document")?;

    serde_yaml::from_str(&body).context("the known servers document is missing `all_servers`")
}

/// Read the `federation_domain_whitelist` of the local homeserver
/// configuration, `None` when the key is absent.
///
/// # Errors
///
/// Returns an error if the configuration cannot be read.
pub fn read_local_whitelist(
    synapse_config: &Utf8Path,
) -> Result<Option<Vec<String>>, anyhow::Error> {
    let figment = Figment::new().merge(Yaml::file(synapse_config));
    if !figment.contains("federation_domain_whitelist") {
        return Ok(None);
    }

    let whitelist = figment
        .extract_inner("federation_domain_whitelist")
        .with_context(|| format!("could not read the whitelist from {synapse_config:?}"))?;
    Ok(Some(whitelist))
}

/// Rewrite the `federation_domain_whitelist` of the local homeserver
/// configuration, leaving every other key untouched.
///
/// # Errors
///
/// Returns an error if the configuration cannot be read back or written.
pub async fn write_local_whitelist(
    synapse_config: &Utf8Path,
    whitelist: &[String],
) -> Result<(), anyhow::Error> {
    let contents = tokio::fs::read_to_string(synapse_config)
        .await
        .with_context(|| format!("could not read {synapse_config:?}"))?;
    let mut config: serde_yaml::Value =
        serde_yaml::from_str(&contents).with_context(|| format!("invalid YAML in {synapse_config:?}"))?;

    config
        .as_mapping_mut()
        .with_context(|| format!("{synapse_config:?} is not a YAML mapping"))?
        .insert(
            serde_yaml::Value::from("federation_domain_whitelist"),
            serde_yaml::to_value(whitelist)?,
        );

    let rendered = serde_yaml::to_string(&config)?;
    tokio::fs::write(synapse_config, rendered)
        .await
        .with_context(|| format!("could not write {synapse_config:?}"))?;

    Ok(())
}

/// Compare the published whitelist against the local one and rewrite the
/// local configuration when they differ. Returns whether a change was made.
///
/// # Errors
///
/// Returns an error if the document cannot be fetched or the local
/// configuration cannot be updated.
pub async fn check_and_update(
    http_client: &reqwest::Client,
    url: &Url,
    synapse_config: &Utf8Path,
) -> Result<bool, anyhow::Error> {
    let known_servers = fetch_known_servers(http_client, url).await?;
    let remote_whitelist = known_servers.server_names();

    let local_whitelist = read_local_whitelist(synapse_config)?;
    if local_whitelist.as_deref() == Some(&remote_whitelist[..]) {
        return Ok(false);
    }

    info!(
        new_list = ?remote_whitelist,
        "Federation whitelist changed, updating the local configuration"
    );
    write_local_whitelist(synapse_config, &remote_whitelist).await?;

    Ok(true)
}

/// Periodically refetch the known-servers document, and restart the labelled
/// containers whenever the whitelist changed.
///
/// Fetch and update failures are logged and retried on the next tick.
pub async fn watch(
    http_client: &reqwest::Client,
    url: &Url,
    synapse_config: &Utf8Path,
    runtime: &dyn ContainerRuntime,
    restart_label: Option<&str>,
    interval: Duration,
) {
    loop {
        match check_and_update(http_client, url, synapse_config).await {
            Ok(false) => {}
            Ok(true) => {
                if let Some(label) = restart_label {
                    match restart_labelled(runtime, label).await {
                        Ok(count) => info!(count, "Restarted containers"),
                        Err(error) => warn!(
                            error = &*error as &dyn std::error::Error,
                            "Could not restart the labelled containers"
                        ),
                    }
                }
            }
            Err(error) => {
                warn!(
                    error = &*error as &dyn std::error::Error,
                    "Error updating the federation whitelist. Will retry later."
                );
            }
        }

        tokio::time::sleep(interval).await;
    }
}

#[cfg(test)]
mod tests {
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{method, path},
    };

    use super::*;

    /// Ensure a rustls crypto provider is installed for the process. reqwest is
    /// built with the `-no-provider` feature, so a provider must be installed
    /// before any client is built. Idempotent and concurrency-safe.
    fn install_crypto_provider() {
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
    }

    #[test]
    fn server_names_strip_scheme_and_path() {
        let servers = KnownServers {
            all_servers: vec![
                "https://transport01.example.com".to_owned(),
                "https://transport02.example.com:8448/".to_owned(),
                "bare.example.com".to_owned(),
            ],
        };

        assert_eq!(
            servers.server_names(),
            &[
                "transport01.example.com",
                "transport02.example.com:8448",
                "bare.example.com"
            ]
        );
    }

    #[tokio::test]
    async fn fetches_and_parses_known_servers() {
        install_crypto_provider();
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/known_servers.yaml"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                "all_servers:\n- https://one.example.com\n- https://two.example.com\n",
            ))
            .expect(1)
            .mount(&mock_server)
            .await;

        let url = Url::parse(&format!("{}/known_servers.yaml", mock_server.uri())).unwrap();
        let known = fetch_known_servers(&reqwest::Client::new(), &url)
            .await
            .unwrap();

        assert_eq!(known.all_servers.len(), 2);
    }

    #[tokio::test]
    async fn rejects_document_without_all_servers() {
        install_crypto_provider();
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/known_servers.yaml"))
            .respond_with(ResponseTemplate::new(200).set_body_string("something_else: true\n"))
            .expect(1)
            .mount(&mock_server)
            .await;

        let url = Url::parse(&format!("{}/known_servers.yaml", mock_server.uri())).unwrap();
        assert!(
            fetch_known_servers(&reqwest::Client::new(), &url)
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn whitelist_roundtrip() {
        let dir = camino::Utf8PathBuf::try_from(std::env::temp_dir())
            .unwrap()
            .join(format!("mms-federation-{}", std::process::id()));
        tokio::fs::create_dir_all(&dir).await.unwrap();
        let config = dir.join("synapse.yaml");

        tokio::fs::write(
            &config,
            "server_name: example.com\nfederation_domain_whitelist:\n- old.example.com\n",
        )
        .await
        .unwrap();

        assert_eq!(
            read_local_whitelist(&config).unwrap(),
            Some(vec!["old.example.com".to_owned()])
        );

        let updated = vec!["one.example.com".to_owned(), "two.example.com".to_owned()];
        write_local_whitelist(&config, &updated).await.unwrap();

        assert_eq!(read_local_whitelist(&config).unwrap(), Some(updated));
        // The rest of the configuration is left alone
        let contents = tokio::fs::read_to_string(&config).await.unwrap();
        assert!(contents.contains("server_name: example.com"));

        tokio::fs::remove_dir_all(&dir).await.unwrap();
    }
}
