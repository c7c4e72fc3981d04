//! Check catalogue: the ordered battery a container must pass.

use serde::{Deserialize, Serialize};

use crate::contract::{self, EndpointContract};

/// One check of the harness, in run order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum CheckKind {
    /// Image exists locally (precondition).
    ImagePresent,

    /// Stale container removed and a new one started under the security
    /// profile.
    ContainerStarted,

    /// Container process is up and has not exited.
    ContainerAlive,

    /// `whoami` is the expected unprivileged account.
    RuntimeIdentity,

    /// GET /health
    Health,

    /// GET /ready
    Readiness,

    /// GET /
    Root,

    /// GET /metrics
    Metrics,

    /// GET /stores
    Stores,

    /// Container logs carry structured records.
    StructuredLogs,

    /// Writing to the root filesystem is rejected.
    ReadOnlyFilesystem,

    /// `id -u` is the expected uid.
    NumericUid,
}

impl CheckKind {
    /// Every check, in the order it runs.
    pub const ALL: [CheckKind; 12] = [
        CheckKind::ImagePresent,
        CheckKind::ContainerStarted,
        CheckKind::ContainerAlive,
        CheckKind::RuntimeIdentity,
        CheckKind::Health,
        CheckKind::Readiness,
        CheckKind::Root,
        CheckKind::Metrics,
        CheckKind::Stores,
        CheckKind::StructuredLogs,
        CheckKind::ReadOnlyFilesystem,
        CheckKind::NumericUid,
    ];

    /// Stable snake_case name used in the transcript, logs and report.
    pub fn name(&self) -> &'static str {
        match self {
            CheckKind::ImagePresent => "image_present",
            CheckKind::ContainerStarted => "container_started",
            CheckKind::ContainerAlive => "container_alive",
            CheckKind::RuntimeIdentity => "runtime_identity",
            CheckKind::Health => "health",
            CheckKind::Readiness => "readiness",
            CheckKind::Root => "root",
            CheckKind::Metrics => "metrics",
            CheckKind::Stores => "stores",
            CheckKind::StructuredLogs => "structured_logs",
            CheckKind::ReadOnlyFilesystem => "read_only_filesystem",
            CheckKind::NumericUid => "numeric_uid",
        }
    }

    /// Position in the run order.
    pub fn ordinal(&self) -> usize {
        *self as usize
    }

    /// Human-readable description for the transcript.
    pub fn description(&self) -> &'static str {
        match self {
            CheckKind::ImagePresent => "image exists locally",
            CheckKind::ContainerStarted => "container started with restricted security profile",
            CheckKind::ContainerAlive => "container is running",
            CheckKind::RuntimeIdentity => "container runs as unprivileged user",
            CheckKind::Health => "liveness endpoint reports healthy",
            CheckKind::Readiness => "readiness endpoint returns a status",
            CheckKind::Root => "root endpoint returns a message",
            CheckKind::Metrics => "metrics endpoint exposes request counter",
            CheckKind::Stores => "stores endpoint returns data or a structured error",
            CheckKind::StructuredLogs => "logs contain structured records",
            CheckKind::ReadOnlyFilesystem => "root filesystem rejects writes",
            CheckKind::NumericUid => "effective uid matches",
        }
    }

    /// Endpoint contract for HTTP checks.
    pub fn endpoint(&self) -> Option<&'static EndpointContract> {
        match self {
            CheckKind::Health => Some(&contract::HEALTH),
            CheckKind::Readiness => Some(&contract::READINESS),
            CheckKind::Root => Some(&contract::ROOT),
            CheckKind::Metrics => Some(&contract::METRICS),
            CheckKind::Stores => Some(&contract::STORES),
            _ => None,
        }
    }

    /// Whether this check sends an HTTP request.
    pub fn is_http(&self) -> bool {
        self.endpoint().is_some()
    }

    /// Parse a check name as printed by [`CheckKind::name`].
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|c| c.name() == name)
    }
}

impl std::fmt::Display for CheckKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
