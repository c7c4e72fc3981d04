//! Container runtime seam.
//!
//! The harness only talks to containers through [`ContainerRuntime`]. The
//! production implementation shells out to the `docker` CLI; tests use the
//! scripted [`crate::fakes::FakeRuntime`].

pub mod docker;

use async_trait::async_trait;
use ctgate_core::{HarnessConfig, HarnessResult, SecurityProfile};
use serde::{Deserialize, Serialize};

pub use docker::DockerCli;

/// Identifier of a running container.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContainerId(pub String);

impl ContainerId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ContainerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Everything needed to start the container under test.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSpec {
    pub image: String,
    pub name: String,
    /// `host:container` port mapping.
    pub publish: String,
    pub security: SecurityProfile,
}

impl RunSpec {
    pub fn from_config(config: &HarnessConfig) -> Self {
        Self {
            image: config.image.clone(),
            name: config.container_name.clone(),
            publish: config.port_mapping(),
            security: config.security.clone(),
        }
    }

    /// Full argument list for `docker run`, without the leading `docker`.
    pub fn docker_run_args(&self) -> Vec<String> {
        let mut args = vec![
            "run".to_string(),
            "-d".to_string(),
            "--name".to_string(),
            self.name.clone(),
            "-p".to_string(),
            self.publish.clone(),
        ];
        args.extend(self.security.docker_args());
        args.push(self.image.clone());
        args
    }
}

/// Output of a command executed inside the container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Operations the harness needs from a container engine.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Whether the image exists locally.
    async fn image_exists(&self, image: &str) -> HarnessResult<bool>;

    /// Force-remove a container by name or id. Absence is not an error.
    async fn remove_container(&self, name: &str) -> HarnessResult<()>;

    /// Start a detached container.
    async fn run_container(&self, spec: &RunSpec) -> HarnessResult<ContainerId>;

    /// Whether the container process is still running.
    async fn is_running(&self, id: &ContainerId) -> HarnessResult<bool>;

    /// Run a command inside the container.
    async fn exec(&self, id: &ContainerId, command: &[&str]) -> HarnessResult<ExecOutput>;

    /// Captured stdout and stderr of the container.
    async fn logs(&self, id: &ContainerId) -> HarnessResult<String>;

    /// Synchronous forced removal, used when the async path cannot run
    /// (guard dropped by cancellation or panic).
    fn release_blocking(&self, id: &ContainerId);
}
