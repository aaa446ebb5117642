// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use anyhow::Context;
use camino::Utf8PathBuf;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::ConfigurationSection;

/// Admin credentials used to log in to the homeserver
///
/// Credentials can be given inline or through a JSON file of the shape
/// `{"username": "...", "password": "..."}`, which is how deployments mount
/// them as a secret.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct CredentialsConfig {
    /// Path to a JSON file holding the username and password
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schemars(with = "Option<String>")]
    pub file: Option<Utf8PathBuf>,

    /// Username of the admin user, e.g. `@admin:example.com`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    /// Password of the admin user
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

/// Username and password loaded from a [`CredentialsConfig`]
#[derive(Debug, Clone, Deserialize)]
pub struct Credentials {
    /// Username of the admin user
    pub username: String,

    /// Password of the admin user
    pub password: String,
}

impl CredentialsConfig {
    /// Resolve the credentials, reading the credentials file if one is set.
    ///
    /// Inline values take precedence over the file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing or malformed, or if no source
    /// yields both a username and a password.
    pub async fn load(&self) -> Result<Credentials, anyhow::Error> {
        let from_file: Option<Credentials> = if let Some(path) = &self.file {
            let contents = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("could not read credentials file {path:?}"))?;
            Some(
                serde_json::from_str(&contents)
                    .with_context(|| format!("invalid credentials file {path:?}"))?,
            )
        } else {
            None
        };

        let username = self
            .username
            .clone()
            .or_else(|| from_file.as_ref().map(|c| c.username.clone()))
            .context("no admin username configured")?;
        let password = self
            .password
            .clone()
            .or_else(|| from_file.map(|c| c.password))
            .context("no admin password configured")?;

        Ok(Credentials { username, password })
    }
}

impl ConfigurationSection for CredentialsConfig {
    const PATH: Option<&'static str> = Some("credentials");
}

#[cfg(test)]
mod tests {
    use figment::{
        Figment, Jail,
        providers::{Format, Yaml},
    };

    use super::*;

    #[test]
    fn load_config() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "credentials.json",
                r#"{"username": "@admin:example.com", "password": "hunter2"}"#,
            )?;
            jail.create_file(
                "config.yaml",
                r"
                    credentials:
                      file: credentials.json
                ",
            )?;

            let config = Figment::new()
                .merge(Yaml::file("config.yaml"))
                .extract_inner::<CredentialsConfig>("credentials")?;

            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            let credentials = rt.block_on(config.load()).unwrap();

            assert_eq!(&credentials.username, "@admin:example.com");
            assert_eq!(&credentials.password, "hunter2");

            Ok(())
        });
    }

    #[tokio::test]
    async fn inline_overrides_file() {
        let config = CredentialsConfig {
            file: None,
            username: Some("@admin:example.com".to_owned()),
            password: Some("hunter2".to_owned()),
        };

        let credentials = config.load().await.unwrap();
        assert_eq!(&credentials.username, "@admin:example.com");
    }

    #[tokio::test]
    async fn missing_credentials() {
        let config = CredentialsConfig::default();
        assert!(config.load().await.is_err());
    }
}
