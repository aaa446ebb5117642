// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

//! Restarting of labelled containers through the container runtime.
//!
//! The runtime is wrapped in a trait so the tasks that trigger restarts can
//! be tested without a container daemon; the real implementation shells out
//! to the `docker` CLI.

use std::time::Duration;

use anyhow::{Context as _, bail};
use async_trait::async_trait;
use tokio::process::Command;
use tracing::info;

/// Grace period containers get to stop before being killed on restart
const RESTART_TIMEOUT: Duration = Duration::from_secs(30);

/// Trait for the container runtime operations the maintenance tasks need
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// List the IDs of the running containers carrying the given label
    async fn running_with_label(&self, label: &str) -> Result<Vec<String>, anyhow::Error>;

    /// Restart a container, giving it `timeout` to stop gracefully
    async fn restart(&self, container_id: &str, timeout: Duration) -> Result<(), anyhow::Error>;
}

/// [`ContainerRuntime`] implementation backed by the `docker` CLI
pub struct DockerCli;

impl DockerCli {
    async fn run(&self, args: &[&str]) -> Result<String, anyhow::Error> {
        let output = Command::new("docker")
            .args(args)
            .output()
            .await
            .context("could not run the docker CLI")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("docker {} failed: {}", args.join(" "), stderr.trim());
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl ContainerRuntime for DockerCli {
    async fn running_with_label(&self, label: &str) -> Result<Vec<String>, anyhow::Error> {
        let label_filter = format!("label={label}");
        let stdout = self
            .run(&[
                "ps",
                "-q",
                "--filter",
                &label_filter,
                "--filter",
                "status=running",
            ])
            .await?;

        Ok(stdout
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(ToOwned::to_owned)
            .collect())
    }

    async fn restart(&self, container_id: &str, timeout: Duration) -> Result<(), anyhow::Error> {
        let timeout = timeout.as_secs().to_string();
        self.run(&["restart", "-t", &timeout, container_id]).await?;
        Ok(())
    }
}

/// Restart every running container carrying the given label. Returns the
/// number of containers restarted.
///
/// # Errors
///
/// Returns an error if the runtime could not list or restart containers.
pub async fn restart_labelled(
    runtime: &dyn ContainerRuntime,
    label: &str,
) -> Result<usize, anyhow::Error> {
    let containers = runtime.running_with_label(label).await?;

    for container_id in &containers {
        info!(container_id, label, "Restarting container");
        runtime.restart(container_id, RESTART_TIMEOUT).await?;
    }

    Ok(containers.len())
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    struct FakeRuntime {
        containers: Vec<String>,
        restarted: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ContainerRuntime for FakeRuntime {
        async fn running_with_label(&self, _label: &str) -> Result<Vec<String>, anyhow::Error> {
            Ok(self.containers.clone())
        }

        async fn restart(
            &self,
            container_id: &str,
            _timeout: Duration,
        ) -> Result<(), anyhow::Error> {
            self.restarted.lock().unwrap().push(container_id.to_owned());
            Ok(())
        }
    }

    #[tokio::test]
    async fn restarts_every_labelled_container() {
        let runtime = FakeRuntime {
            containers: vec!["aaa".to_owned(), "bbb".to_owned()],
            restarted: Mutex::new(Vec::new()),
        };

        let count = restart_labelled(&runtime, "com.example.restart").await.unwrap();

        assert_eq!(count, 2);
        assert_eq!(*runtime.restarted.lock().unwrap(), &["aaa", "bbb"]);
    }

    #[tokio::test]
    async fn nothing_to_restart() {
        let runtime = FakeRuntime::default();
        let count = restart_labelled(&runtime, "com.example.restart").await.unwrap();
        assert_eq!(count, 0);
    }
}
