//! Harness configuration.
//!
//! Every knob the harness recognises lives on [`HarnessConfig`]. Defaults
//! target the demo application image; `from_env` applies `CTGATE_*`
//! overrides on top of them.

use crate::error::{HarnessError, HarnessResult};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::str::FromStr;

pub const DEFAULT_IMAGE: &str = "devops-demo-app:latest";
pub const DEFAULT_CONTAINER_NAME: &str = "devops-demo-app-test";
pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_EXPECTED_USER: &str = "appuser";
pub const DEFAULT_EXPECTED_UID: u32 = 1000;
pub const DEFAULT_METRICS_SERIES: &str = "http_requests_total";

/// Runtime restrictions applied when the container under test is started.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SecurityProfile {
    /// Mount the root filesystem read-only.
    pub read_only_root: bool,

    /// Writable tmpfs mounts (general temp dir and the runtime cache dir).
    pub tmpfs_mounts: Vec<String>,

    /// Forbid privilege escalation via setuid binaries.
    pub no_new_privileges: bool,

    /// Drop every Linux capability.
    pub drop_all_capabilities: bool,
}

impl Default for SecurityProfile {
    fn default() -> Self {
        Self {
            read_only_root: true,
            tmpfs_mounts: vec!["/tmp".to_string(), "/app/.cache".to_string()],
            no_new_privileges: true,
            drop_all_capabilities: true,
        }
    }
}

impl SecurityProfile {
    /// Render the profile as `docker run` flags.
    pub fn docker_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if self.read_only_root {
            args.push("--read-only".to_string());
        }
        for mount in &self.tmpfs_mounts {
            args.push("--tmpfs".to_string());
            args.push(mount.clone());
        }
        if self.no_new_privileges {
            args.push("--security-opt".to_string());
            args.push("no-new-privileges".to_string());
        }
        if self.drop_all_capabilities {
            args.push("--cap-drop".to_string());
            args.push("ALL".to_string());
        }
        args
    }
}

/// Configuration for a single harness run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HarnessConfig {
    /// Image reference to test; must already exist locally.
    pub image: String,

    /// Fixed container name; a leftover container with this name is removed
    /// before each run.
    pub container_name: String,

    /// Host port the container port is published on.
    pub host_port: u16,

    /// Port the application listens on inside the container.
    pub container_port: u16,

    /// Maximum total time to wait for the container to come up.
    pub settle_timeout_ms: u64,

    /// Timeout for each HTTP probe.
    pub http_timeout_ms: u64,

    /// First backoff delay of the readiness poll.
    pub backoff_base_ms: u64,

    /// Cap on a single backoff delay.
    pub backoff_max_ms: u64,

    /// How long the container must keep running after it is first seen up.
    /// `docker run -d` reports a crashing app as running for a moment.
    pub stable_window_ms: u64,

    /// Unprivileged account the container must run as.
    pub expected_user: String,

    /// Numeric uid the container must run as.
    pub expected_uid: u32,

    /// Counter series that must appear on the metrics endpoint.
    pub metrics_series: String,

    pub security: SecurityProfile,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            image: DEFAULT_IMAGE.to_string(),
            container_name: DEFAULT_CONTAINER_NAME.to_string(),
            host_port: DEFAULT_PORT,
            container_port: DEFAULT_PORT,
            settle_timeout_ms: 30_000,
            http_timeout_ms: 5_000,
            backoff_base_ms: 250,
            backoff_max_ms: 4_000,
            stable_window_ms: 1_000,
            expected_user: DEFAULT_EXPECTED_USER.to_string(),
            expected_uid: DEFAULT_EXPECTED_UID,
            metrics_series: DEFAULT_METRICS_SERIES.to_string(),
            security: SecurityProfile::default(),
        }
    }
}

impl HarnessConfig {
    /// Defaults with `CTGATE_*` environment overrides applied.
    pub fn from_env() -> HarnessResult<Self> {
        let defaults = Self::default();
        Ok(Self {
            image: env_or("CTGATE_IMAGE", defaults.image)?,
            container_name: env_or("CTGATE_CONTAINER_NAME", defaults.container_name)?,
            host_port: env_or("CTGATE_HOST_PORT", defaults.host_port)?,
            container_port: env_or("CTGATE_CONTAINER_PORT", defaults.container_port)?,
            settle_timeout_ms: env_or("CTGATE_SETTLE_TIMEOUT_MS", defaults.settle_timeout_ms)?,
            http_timeout_ms: env_or("CTGATE_HTTP_TIMEOUT_MS", defaults.http_timeout_ms)?,
            stable_window_ms: env_or("CTGATE_STABLE_WINDOW_MS", defaults.stable_window_ms)?,
            expected_user: env_or("CTGATE_EXPECTED_USER", defaults.expected_user)?,
            expected_uid: env_or("CTGATE_EXPECTED_UID", defaults.expected_uid)?,
            ..defaults
        })
    }

    /// Reject values the harness cannot run with.
    pub fn validate(&self) -> HarnessResult<()> {
        if self.image.trim().is_empty() {
            return Err(HarnessError::Config("image must not be empty".into()));
        }
        if self.container_name.trim().is_empty() {
            return Err(HarnessError::Config("container name must not be empty".into()));
        }
        if self.host_port == 0 || self.container_port == 0 {
            return Err(HarnessError::Config(format!(
                "ports must be between 1 and 65535, got host {} container {}",
                self.host_port, self.container_port
            )));
        }
        if self.settle_timeout_ms == 0 || self.http_timeout_ms == 0 {
            return Err(HarnessError::Config("timeouts must be greater than zero".into()));
        }
        if self.backoff_base_ms == 0 || self.backoff_base_ms > self.backoff_max_ms {
            return Err(HarnessError::Config(format!(
                "backoff base {}ms must be non-zero and not exceed max {}ms",
                self.backoff_base_ms, self.backoff_max_ms
            )));
        }
        if self.metrics_series.trim().is_empty() {
            return Err(HarnessError::Config("metrics series must not be empty".into()));
        }
        Ok(())
    }

    /// Base URL the published port is reachable on.
    pub fn base_url(&self) -> String {
        format!("http://127.0.0.1:{}", self.host_port)
    }

    /// `host:container` port mapping for `docker run -p`.
    pub fn port_mapping(&self) -> String {
        format!("{}:{}", self.host_port, self.container_port)
    }

    /// Command that builds the configured image.
    pub fn build_hint(&self) -> String {
        format!("docker build -t {} .", self.image)
    }

    /// Deterministic SHA-256 digest of the configuration.
    pub fn digest(&self) -> HarnessResult<String> {
        let bytes = serde_json::to_vec(self)?;
        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        Ok(hex::encode(hasher.finalize()))
    }

    /// Configuration view safe for logging.
    pub fn display(&self) -> serde_json::Value {
        serde_json::json!({
            "image": self.image,
            "container_name": self.container_name,
            "host_port": self.host_port,
            "container_port": self.container_port,
            "settle_timeout_ms": self.settle_timeout_ms,
            "http_timeout_ms": self.http_timeout_ms,
            "stable_window_ms": self.stable_window_ms,
            "expected_user": self.expected_user,
            "expected_uid": self.expected_uid,
            "metrics_series": self.metrics_series,
            "security_args": self.security.docker_args(),
        })
    }
}

fn env_or<T>(key: &str, default: T) -> HarnessResult<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| HarnessError::Config(format!("{key}={raw:?}: {e}"))),
        Err(_) => Ok(default),
    }
}
