// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use std::time::Duration;

use camino::Utf8PathBuf;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::ConfigurationSection;

fn default_parallel_purges() -> usize {
    10
}

fn default_poll_interval() -> u64 {
    1
}

/// Configuration of the history purger
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PurgeConfig {
    /// Keep events newer than this number of days
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keep_newer_days: Option<u32>,

    /// Keep at least this number of message events per room, regardless of
    /// `keep_newer_days`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keep_min_messages: Option<u64>,

    /// Max number of purges to run in parallel on the homeserver
    #[serde(default = "default_parallel_purges")]
    pub parallel_purges: usize,

    /// How long to wait between purge status polls, in seconds
    #[serde(default = "default_poll_interval")]
    pub poll_interval: u64,

    /// SQL script to run on the database after purging, e.g. a janitor script
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schemars(with = "Option<String>")]
    pub post_sql: Option<Utf8PathBuf>,

    /// If set, restart all running containers carrying this label once the
    /// purge run is over
    #[serde(skip_serializing_if = "Option::is_none")]
    pub docker_restart_label: Option<String>,
}

impl PurgeConfig {
    /// Interval between purge status polls
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval)
    }
}

impl Default for PurgeConfig {
    fn default() -> Self {
        Self {
            keep_newer_days: None,
            keep_min_messages: None,
            parallel_purges: default_parallel_purges(),
            poll_interval: default_poll_interval(),
            post_sql: None,
            docker_restart_label: None,
        }
    }
}

impl ConfigurationSection for PurgeConfig {
    const PATH: Option<&'static str> = Some("purge");
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
                    purge:
                      keep_newer_days: 30
                      keep_min_messages: 100
                      parallel_purges: 4
                ",
            )?;

            let config = Figment::new()
                .merge(Yaml::file("config.yaml"))
                .extract_inner::<PurgeConfig>("purge")?;

            assert_eq!(config.keep_newer_days, Some(30));
            assert_eq!(config.keep_min_messages, Some(100));
            assert_eq!(config.parallel_purges, 4);
            // Unset fields fall back to the defaults
            assert_eq!(config.poll_interval(), Duration::from_secs(1));

            Ok(())
        });
    }
}
