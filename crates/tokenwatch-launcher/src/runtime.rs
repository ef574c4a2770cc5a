//! The container runtime port and its Docker Engine implementation. Workers
//! run as one container each, named after the indexer row, joined to the
//! shared network so they can reach the database by hostname.

use anyhow::{Context, Result};
use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, LogOutput, LogsOptions, RemoveContainerOptions,
    StartContainerOptions,
};
use bollard::models::HostConfig;
use bollard::Docker;
use futures::StreamExt;

/// Image every worker container runs.
pub const INDEXER_IMAGE: &str = "tokenwatch-indexer";
/// Network the workers and the database share.
pub const CONTAINER_NETWORK: &str = "tokenwatch-default";

#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Create and start a detached container under `name`.
    async fn run(&self, name: &str, env: Vec<String>) -> Result<()>;
    /// Force-remove the container named `name`.
    async fn remove(&self, name: &str) -> Result<()>;
    /// The last `lines` lines of the container's output.
    async fn logs_tail(&self, name: &str, lines: usize) -> Result<String>;
}

pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    pub fn connect() -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()
            .context("failed to reach the Docker daemon")?;
        Ok(Self { docker })
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn run(&self, name: &str, env: Vec<String>) -> Result<()> {
        let options = CreateContainerOptions {
            name: name.to_string(),
            platform: None,
        };
        let config = Config {
            image: Some(INDEXER_IMAGE.to_string()),
            env: Some(env),
            host_config: Some(HostConfig {
                network_mode: Some(CONTAINER_NETWORK.to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };
        self.docker
            .create_container(Some(options), config)
            .await
            .with_context(|| format!("failed to create container {name}"))?;
        self.docker
            .start_container(name, None::<StartContainerOptions<String>>)
            .await
            .with_context(|| format!("failed to start container {name}"))?;
        Ok(())
    }

    async fn remove(&self, name: &str) -> Result<()> {
        self.docker
            .remove_container(
                name,
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await
            .with_context(|| format!("failed to remove container {name}"))?;
        Ok(())
    }

    async fn logs_tail(&self, name: &str, lines: usize) -> Result<String> {
        let options = LogsOptions::<String> {
            stdout: true,
            stderr: true,
            tail: lines.to_string(),
            ..Default::default()
        };
        let mut stream = self.docker.logs(name, Some(options));
        let mut output = String::new();
        while let Some(chunk) = stream.next().await {
            let chunk: LogOutput =
                chunk.with_context(|| format!("failed to read logs of container {name}"))?;
            output.push_str(&chunk.to_string());
        }
        Ok(output)
    }
}
