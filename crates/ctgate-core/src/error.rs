//! Error taxonomy for harness runs.
//!
//! Every variant is fatal to the current run. The harness never retries a
//! failed check; the only waiting it does is the bounded readiness poll,
//! whose exhaustion is reported as [`HarnessError::ReadinessTimeout`].

/// Errors produced while driving a container through its checks.
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    #[error("image {image} not found locally; build it first with `{fix}`")]
    ImageMissing { image: String, fix: String },

    #[error("container failed to start: {reason}\n--- container logs ---\n{logs}")]
    StartupFailed { reason: String, logs: String },

    #[error("container never became ready after {waited_ms}ms: {last_observation}")]
    ReadinessTimeout {
        waited_ms: u64,
        last_observation: String,
    },

    #[error("container runs as {actual:?}, expected unprivileged user {expected:?}")]
    Identity { expected: String, actual: String },

    #[error("{check} contract violated: expected {expected}, observed {observed}")]
    Contract {
        check: String,
        expected: String,
        observed: String,
    },

    #[error("structured logs incomplete: missing {missing}")]
    Observability { missing: String },

    #[error("security enforcement failed: {0}")]
    SecurityEnforcement(String),

    #[error("container runtime error: {0}")]
    Runtime(String),

    #[error("http probe error: {0}")]
    Probe(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("run interrupted")]
    Interrupted,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl HarnessError {
    /// Stable category name, used in reports and log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            HarnessError::ImageMissing { .. } => "precondition",
            HarnessError::StartupFailed { .. } => "startup",
            HarnessError::ReadinessTimeout { .. } => "readiness_timeout",
            HarnessError::Identity { .. } => "identity",
            HarnessError::Contract { .. } => "contract",
            HarnessError::Observability { .. } => "observability",
            HarnessError::SecurityEnforcement(_) => "security_enforcement",
            HarnessError::Runtime(_) => "runtime",
            HarnessError::Probe(_) => "probe",
            HarnessError::Config(_) => "config",
            HarnessError::Interrupted => "interrupted",
            HarnessError::Io(_) => "io",
            HarnessError::Json(_) => "serialization",
        }
    }

    /// Process exit code for this failure.
    ///
    /// `2` for problems detected before any container exists, `130` for an
    /// interrupt, `1` for everything else.
    pub fn exit_code(&self) -> u8 {
        match self {
            HarnessError::ImageMissing { .. } | HarnessError::Config(_) => 2,
            HarnessError::Interrupted => 130,
            _ => 1,
        }
    }

    /// Shorthand for a contract violation.
    pub fn contract(
        check: impl Into<String>,
        expected: impl Into<String>,
        observed: impl Into<String>,
    ) -> Self {
        HarnessError::Contract {
            check: check.into(),
            expected: expected.into(),
            observed: observed.into(),
        }
    }
}

/// Result type for harness operations.
pub type HarnessResult<T> = std::result::Result<T, HarnessError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_missing_names_fix_command() {
        let err = HarnessError::ImageMissing {
            image: "demo:v1.0.0".to_string(),
            fix: "docker build -t demo:v1.0.0 .".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("docker build -t demo:v1.0.0 ."));
        assert_eq!(err.kind(), "precondition");
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_security_enforcement_distinct_from_contract() {
        let sec = HarnessError::SecurityEnforcement("write succeeded".to_string());
        let contract = HarnessError::contract("health", "HTTP 200", "HTTP 500");
        assert_ne!(sec.kind(), contract.kind());
        assert!(contract.to_string().contains("health contract violated"));
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(HarnessError::Interrupted.exit_code(), 130);
        assert_eq!(HarnessError::Config("bad".into()).exit_code(), 2);
        assert_eq!(
            HarnessError::Observability {
                missing: "event".into()
            }
            .exit_code(),
            1
        );
    }
}
