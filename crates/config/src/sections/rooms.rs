// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use std::time::Duration;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use url::Url;

use super::ConfigurationSection;

fn default_interval() -> u64 {
    3600
}

/// Configuration of the federated room ensurer
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RoomsConfig {
    /// Alias localparts of the broadcast rooms to ensure, e.g. `discovery`
    #[serde(default)]
    pub aliases: Vec<String>,

    /// URL of the YAML document listing the known federation servers
    ///
    /// Can also be set through the `URL_KNOWN_FEDERATION_SERVERS` environment
    /// variable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub known_servers_url: Option<Url>,

    /// How often to perform the room check, in seconds. Zero runs the check
    /// once and exits.
    #[serde(default = "default_interval")]
    pub interval: u64,
}

impl RoomsConfig {
    /// Interval between room checks, `None` for a one-shot run
    #[must_use]
    pub fn interval(&self) -> Option<Duration> {
        (self.interval > 0).then(|| Duration::from_secs(self.interval))
    }
}

impl Default for RoomsConfig {
    fn default() -> Self {
        Self {
            aliases: Vec::new(),
            known_servers_url: None,
            interval: default_interval(),
        }
    }
}

impl ConfigurationSection for RoomsConfig {
    const PATH: Option<&'static str> = Some("rooms");
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
                "config.yaml",
                r"
                    rooms:
                      aliases: [discovery, monitoring]
                      known_servers_url: https://example.com/known_servers.yaml
                      interval: 0
                ",
            )?;

            let config = Figment::new()
                .merge(Yaml::file("config.yaml"))
                .extract_inner::<RoomsConfig>("rooms")?;

            assert_eq!(config.aliases, &["discovery", "monitoring"]);
            assert_eq!(config.interval(), None);

            Ok(())
        });
    }
}
