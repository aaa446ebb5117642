// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::Parser;
use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};

mod config;
mod ensure_rooms;
mod evict_users;
mod extract_certs;
mod purge_history;
mod render_config;
mod watch_federation;

#[derive(Parser, Debug)]
enum Subcommand {
    /// Configuration-related commands
    Config(self::config::Options),

    /// Ensure the federated broadcast rooms exist and are correctly set up
    EnsureRooms(self::ensure_rooms::Options),

    /// Evict long-inactive users from the broadcast rooms
    EvictUsers(self::evict_users::Options),

    /// Extract TLS certificates out of the proxy's ACME account file
    ExtractCerts(self::extract_certs::Options),

    /// Purge historic data from the rooms of the homeserver
    PurgeHistory(self::purge_history::Options),

    /// Render the homeserver configuration from its template
    RenderConfig(self::render_config::Options),

    /// Keep the federation whitelist in sync, restarting containers on change
    WatchFederation(self::watch_federation::Options),
}

#[derive(Parser, Debug)]
#[command(version)]
pub struct Options {
    /// Path to the configuration file, can be given multiple times
    #[arg(short, long, global = true, env = "MMS_CONFIG", action = clap::ArgAction::Append)]
    config: Vec<Utf8PathBuf>,

    #[command(subcommand)]
    subcommand: Subcommand,
}

impl Options {
    /// Build the configuration loader out of the given config files and the
    /// `MMS_*` environment
    pub fn figment(&self) -> Figment {
        let mut figment = Figment::new();

        if self.config.is_empty() {
            figment = figment.merge(Yaml::file("config.yaml"));
        } else {
            for path in &self.config {
                figment = figment.merge(Yaml::file(path));
            }
        }

        figment.merge(Env::prefixed("MMS_").split("__"))
    }

    pub async fn run(self, figment: &Figment) -> anyhow::Result<ExitCode> {
        match self.subcommand {
            Subcommand::Config(c) => c.run(figment).await,
            Subcommand::EnsureRooms(c) => c.run(figment).await,
            Subcommand::EvictUsers(c) => c.run(figment).await,
            Subcommand::ExtractCerts(c) => c.run(figment).await,
            Subcommand::PurgeHistory(c) => c.run(figment).await,
            Subcommand::RenderConfig(c) => c.run(figment).await,
            Subcommand::WatchFederation(c) => c.run(figment).await,
        }
    }
}
