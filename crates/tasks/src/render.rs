// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

//! Rendering of the homeserver configuration from a template.
//!
//! The template gets three variables: the macaroon secret key (generated and
//! persisted on first use), the server name, and the current known-servers
//! document for the federation whitelist.

use anyhow::Context as _;
use camino::Utf8Path;
use minijinja::{Environment, UndefinedBehavior, context};
use rand::Rng;
use tracing::{info, warn};
use url::Url;

/// Alphabet the macaroon key is drawn from
const MACAROON_ALPHABET: &[u8] =
    b"0123456789abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ!@#$%^&*()_-=+{}[]";

/// Length of a generated macaroon key
const MACAROON_KEY_LENGTH: usize = 30;

/// Variables available to the homeserver configuration template
#[derive(Debug)]
pub struct TemplateContext {
    /// The macaroon secret key
    pub macaroon_key: String,

    /// The server name of the homeserver
    pub server_name: String,

    /// The known-servers YAML document, verbatim
    pub known_servers: String,
}

/// Read the macaroon key from the key file, generating and persisting a new
/// one if the file does not exist yet.
///
/// # Errors
///
/// Returns an error if the key file cannot be read or written.
pub async fn load_or_generate_macaroon_key(path: &Utf8Path) -> Result<String, anyhow::Error> {
    match tokio::fs::read_to_string(path).await {
        Ok(key) => Ok(key),
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
            // Scoped so the thread-local RNG is not held across an await
            let key: String = {
                let mut rng = rand::thread_rng();
                (0..MACAROON_KEY_LENGTH)
                    .map(|_| {
                        char::from(MACAROON_ALPHABET[rng.gen_range(0..MACAROON_ALPHABET.len())])
                    })
                    .collect()
            };

            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .with_context(|| format!("could not create the key directory {parent:?}"))?;
            }
            tokio::fs::write(path, &key)
                .await
                .with_context(|| format!("could not persist the macaroon key to {path:?}"))?;
            info!(path = %path, "Generated a new macaroon key");

            Ok(key)
        }
        Err(error) => {
            Err(error).with_context(|| format!("could not read the macaroon key from {path:?}"))
        }
    }
}

/// Fetch the known-servers document, falling back to the local cache.
///
/// A successful fetch refreshes the cache; on failure the stale cache is
/// used, and an absent cache yields an empty document with a warning.
///
/// # Errors
///
/// Returns an error if the cache cannot be written.
pub async fn fetch_known_servers_document(
    http_client: &reqwest::Client,
    url: Option<&Url>,
    cache: &Utf8Path,
) -> Result<String, anyhow::Error> {
    if let Some(url) = url {
        info!(%url, "Fetching known federation servers");
        match fetch_document(http_client, url).await {
            Ok(document) => {
                if let Some(parent) = cache.parent() {
                    tokio::fs::create_dir_all(parent).await.with_context(|| {
                        format!("could not create the cache directory {parent:?}")
                    })?;
                }
                tokio::fs::write(cache, &document)
                    .await
                    .with_context(|| format!("could not cache the known servers to {cache:?}"))?;
                return Ok(document);
            }
            Err(error) => {
                warn!(
                    error = &*error as &dyn std::error::Error,
                    "Error fetching the known servers list"
                );
            }
        }
    }

    match tokio::fs::read_to_string(cache).await {
        Ok(document) => Ok(document),
        Err(_) => {
            warn!(cache = %cache, "No cached known servers document either, rendering without");
            Ok(String::new())
        }
    }
}

async fn fetch_document(
    http_client: &reqwest::Client,
    url: &Url,
) -> Result<String, anyhow::Error> {
    let response = http_client
        .get(url.clone())
        .send()
        .await
        .context("request failed")?
        .error_for_status()
        .context("request was not successful")?;

    response.text().await.context("could not read the response")
}

/// Render the homeserver configuration template.
///
/// Referencing a variable the context does not provide is a hard error, so a
/// template drift cannot silently produce a broken homeserver config.
///
/// # Errors
///
/// Returns an error if the template is invalid or references unknown
/// variables.
pub fn render_template(
    template: &str,
    template_context: &TemplateContext,
) -> Result<String, anyhow::Error> {
    let mut env = Environment::new();
    env.set_undefined_behavior(UndefinedBehavior::Strict);

    let rendered = env
        .render_str(
            template,
            context! {
                macaroon_key => template_context.macaroon_key,
                server_name => template_context.server_name,
                known_servers => template_context.known_servers,
            },
        )
        .context("could not render the homeserver configuration")?;

    Ok(rendered)
}

/// Render the homeserver configuration template file into the output file.
///
/// # Errors
///
/// Returns an error if reading, rendering or writing fails.
pub async fn render_config_file(
    template_path: &Utf8Path,
    output_path: &Utf8Path,
    template_context: &TemplateContext,
) -> Result<(), anyhow::Error> {
    let template = tokio::fs::read_to_string(template_path)
        .await
        .with_context(|| format!("could not read the template {template_path:?}"))?;

    let rendered = render_template(&template, template_context)?;

    tokio::fs::write(output_path, rendered)
        .await
        .with_context(|| format!("could not write the rendered config to {output_path:?}"))?;
    info!(output = %output_path, "Homeserver configuration rendered");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn template_context() -> TemplateContext {
        TemplateContext {
            macaroon_key: "secret".to_owned(),
            server_name: "example.com".to_owned(),
            known_servers: "all_servers:\n- one.example.com\n".to_owned(),
        }
    }

    #[test]
    fn renders_all_variables() {
        let template = "server_name: \"{{ server_name }}\"\n\
                        macaroon_secret_key: \"{{ macaroon_key }}\"\n\
                        {{ known_servers }}";

        let rendered = render_template(template, &template_context()).unwrap();

        assert!(rendered.contains("server_name: \"example.com\""));
        assert!(rendered.contains("macaroon_secret_key: \"secret\""));
        assert!(rendered.contains("- one.example.com"));
    }

    #[test]
    fn unknown_variable_is_an_error() {
        let template = "oops: {{ not_a_variable }}";
        assert!(render_template(template, &template_context()).is_err());
    }

    #[tokio::test]
    async fn macaroon_key_is_generated_once() {
        let dir = camino::Utf8PathBuf::try_from(std::env::temp_dir())
            .unwrap()
            .join(format!("mms-macaroon-{}", std::process::id()));
        let path = dir.join("macaroon.key");

        let key = load_or_generate_macaroon_key(&path).await.unwrap();
        assert_eq!(key.len(), MACAROON_KEY_LENGTH);

        // A second call returns the persisted key instead of a fresh one
        let again = load_or_generate_macaroon_key(&path).await.unwrap();
        assert_eq!(key, again);

        tokio::fs::remove_dir_all(&dir).await.unwrap();
    }
}
