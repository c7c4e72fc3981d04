//! `docker` CLI backed container runtime.

use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use ctgate_core::{HarnessError, HarnessResult};
use tokio::process::Command;
use tracing::debug;

use super::{ContainerId, ContainerRuntime, ExecOutput, RunSpec};

/// Runtime that drives containers through the `docker` binary.
#[derive(Debug, Clone)]
pub struct DockerCli {
    binary: String,
    command_timeout: Duration,
}

impl Default for DockerCli {
    fn default() -> Self {
        Self {
            binary: "docker".to_string(),
            command_timeout: Duration::from_secs(60),
        }
    }
}

impl DockerCli {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a different client binary (e.g. `podman`).
    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    /// Limit applied to every single CLI invocation.
    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// Run one CLI invocation and capture its output.
    async fn invoke(&self, args: &[&str]) -> HarnessResult<ExecOutput> {
        let start = Instant::now();
        let child = Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| HarnessError::Runtime(format!("failed to spawn {}: {}", self.binary, e)))?;

        let output = tokio::time::timeout(self.command_timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                HarnessError::Runtime(format!(
                    "`{} {}` timed out after {}ms",
                    self.binary,
                    args.join(" "),
                    self.command_timeout.as_millis()
                ))
            })??;

        let result = ExecOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        };
        debug!(
            command = %args.first().copied().unwrap_or_default(),
            exit_code = result.exit_code,
            duration_ms = start.elapsed().as_millis() as u64,
            "docker invocation finished"
        );
        Ok(result)
    }
}

#[async_trait]
impl ContainerRuntime for DockerCli {
    async fn image_exists(&self, image: &str) -> HarnessResult<bool> {
        let out = self.invoke(&["image", "inspect", image]).await?;
        Ok(out.success())
    }

    async fn remove_container(&self, name: &str) -> HarnessResult<()> {
        let out = self.invoke(&["rm", "-f", name]).await?;
        if out.success() || out.stderr.contains("No such container") {
            Ok(())
        } else {
            Err(HarnessError::Runtime(format!(
                "failed to remove container {}: {}",
                name,
                out.stderr.trim()
            )))
        }
    }

    async fn run_container(&self, spec: &RunSpec) -> HarnessResult<ContainerId> {
        let args = spec.docker_run_args();
        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        let out = self.invoke(&arg_refs).await?;
        if !out.success() {
            return Err(HarnessError::StartupFailed {
                reason: format!("docker run exited with code {}", out.exit_code),
                logs: out.stderr,
            });
        }
        let id = out.stdout.trim();
        if id.is_empty() {
            return Err(HarnessError::StartupFailed {
                reason: "docker run returned no container id".to_string(),
                logs: out.stderr,
            });
        }
        Ok(ContainerId(id.to_string()))
    }

    async fn is_running(&self, id: &ContainerId) -> HarnessResult<bool> {
        let out = self
            .invoke(&["inspect", "-f", "{{.State.Running}}", id.as_str()])
            .await?;
        if !out.success() {
            return Err(HarnessError::Runtime(format!(
                "failed to inspect container {}: {}",
                id,
                out.stderr.trim()
            )));
        }
        Ok(out.stdout.trim() == "true")
    }

    async fn exec(&self, id: &ContainerId, command: &[&str]) -> HarnessResult<ExecOutput> {
        let mut args = vec!["exec", id.as_str()];
        args.extend_from_slice(command);
        self.invoke(&args).await
    }

    async fn logs(&self, id: &ContainerId) -> HarnessResult<String> {
        let out = self.invoke(&["logs", id.as_str()]).await?;
        if !out.success() {
            return Err(HarnessError::Runtime(format!(
                "failed to read logs of {}: {}",
                id,
                out.stderr.trim()
            )));
        }
        // The application logs to both streams.
        let mut combined = out.stdout;
        if !out.stderr.is_empty() {
            if !combined.is_empty() && !combined.ends_with('\n') {
                combined.push('\n');
            }
            combined.push_str(&out.stderr);
        }
        Ok(combined)
    }

    fn release_blocking(&self, id: &ContainerId) {
        let status = std::process::Command::new(&self.binary)
            .args(["rm", "-f", id.as_str()])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();
        match status {
            Ok(s) if s.success() => ctgate_core::emit_teardown(id.as_str(), true, None),
            Ok(s) => {
                let err = format!("docker rm exited with {}", s);
                ctgate_core::emit_teardown(id.as_str(), false, Some(&err));
            }
            Err(e) => ctgate_core::emit_teardown(id.as_str(), false, Some(&e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_binary_is_runtime_error() {
        let docker = DockerCli::new().with_binary("ctgate-definitely-not-installed");
        match docker.image_exists("demo:v1.0.0").await {
            Err(HarnessError::Runtime(msg)) => assert!(msg.contains("failed to spawn")),
            other => panic!("expected runtime error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_invoke_captures_output() {
        // `echo` stands in for the client binary: it prints its arguments.
        let echo = DockerCli::new().with_binary("echo");
        let out = echo.invoke(&["image", "inspect", "demo"]).await.unwrap();
        assert!(out.success());
        assert_eq!(out.stdout.trim(), "image inspect demo");
    }

    #[tokio::test]
    async fn test_run_container_parses_id_from_stdout() {
        let echo = DockerCli::new().with_binary("echo");
        let spec = RunSpec::from_config(&ctgate_core::HarnessConfig::default());
        let id = echo.run_container(&spec).await.unwrap();
        assert!(id.as_str().starts_with("run -d --name devops-demo-app-test"));
    }

    #[tokio::test]
    async fn test_failing_client_reports_missing_image() {
        let failing = DockerCli::new().with_binary("false");
        assert!(!failing.image_exists("demo").await.unwrap());
    }

    /// Client stand-in that fails `rm` with the given stderr line.
    #[cfg(unix)]
    fn failing_rm_client(dir: &std::path::Path, stderr: &str) -> DockerCli {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join("docker");
        let script = format!("#!/bin/sh\necho \"{}\" >&2\nexit 1\n", stderr);
        std::fs::write(&path, script).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        DockerCli::new().with_binary(path.to_string_lossy().into_owned())
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_remove_missing_container_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        let docker = failing_rm_client(
            dir.path(),
            "Error response from daemon: No such container: devops-demo-app-test",
        );
        docker.remove_container("devops-demo-app-test").await.unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_remove_other_failure_is_runtime_error() {
        let dir = tempfile::tempdir().unwrap();
        let docker = failing_rm_client(
            dir.path(),
            "Error response from daemon: cannot remove container: permission denied",
        );
        match docker.remove_container("devops-demo-app-test").await {
            Err(HarnessError::Runtime(msg)) => assert!(msg.contains("permission denied")),
            other => panic!("expected runtime error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_command_timeout() {
        let sleepy = DockerCli::new()
            .with_binary("sleep")
            .with_command_timeout(Duration::from_millis(50));
        match sleepy.invoke(&["5"]).await {
            Err(HarnessError::Runtime(msg)) => assert!(msg.contains("timed out")),
            other => panic!("expected timeout, got {:?}", other),
        }
    }
}
