//! Single-check execution.

use std::time::{Duration, Instant};

use ctgate_core::{
    poll_with_backoff, Attempt, BackoffPolicy, HarnessConfig, HarnessError, HarnessResult,
};
use serde::{Deserialize, Serialize};

use crate::check::CheckKind;
use crate::contract::{self, EndpointContract};
use crate::probe::{HttpProbe, ProbeResponse};
use crate::runtime::{ContainerId, ContainerRuntime, ExecOutput};

/// File the read-only check tries to create.
pub const WRITE_PROBE_PATH: &str = "/testfile";

/// Result of one check.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CheckResult {
    pub check: CheckKind,

    pub passed: bool,

    /// Duration in milliseconds.
    pub duration_ms: u64,

    /// What was observed on success; observed vs expected on failure.
    pub detail: String,

    /// Error category on failure (see `HarnessError::kind`).
    pub error_kind: Option<String>,
}

impl CheckResult {
    pub fn pass(check: CheckKind, duration_ms: u64, detail: impl Into<String>) -> Self {
        Self {
            check,
            passed: true,
            duration_ms,
            detail: detail.into(),
            error_kind: None,
        }
    }

    pub fn fail(check: CheckKind, duration_ms: u64, error: &HarnessError) -> Self {
        Self {
            check,
            passed: false,
            duration_ms,
            detail: error.to_string(),
            error_kind: Some(error.kind().to_string()),
        }
    }
}

/// Everything a check needs once the container exists.
pub struct CheckContext<'a> {
    pub config: &'a HarnessConfig,
    pub runtime: &'a dyn ContainerRuntime,
    pub probe: &'a dyn HttpProbe,
    pub container: &'a ContainerId,
}

/// Executes individual checks against a running container.
pub struct CheckRunner;

impl CheckRunner {
    /// Precondition: the image must already exist locally.
    pub async fn check_image(
        runtime: &dyn ContainerRuntime,
        config: &HarnessConfig,
    ) -> HarnessResult<String> {
        if runtime.image_exists(&config.image).await? {
            Ok(format!("image {} found", config.image))
        } else {
            Err(HarnessError::ImageMissing {
                image: config.image.clone(),
                fix: config.build_hint(),
            })
        }
    }

    /// Run `check` and time it.
    pub async fn run(check: CheckKind, ctx: &CheckContext<'_>) -> (CheckResult, Option<HarnessError>) {
        let start = Instant::now();
        let outcome = Self::execute(check, ctx).await;
        let duration_ms = start.elapsed().as_millis() as u64;
        match outcome {
            Ok(detail) => (CheckResult::pass(check, duration_ms, detail), None),
            Err(err) => (CheckResult::fail(check, duration_ms, &err), Some(err)),
        }
    }

    /// Execute one in-container check, returning a detail line on success.
    pub async fn execute(check: CheckKind, ctx: &CheckContext<'_>) -> HarnessResult<String> {
        match check {
            CheckKind::ImagePresent | CheckKind::ContainerStarted => Err(HarnessError::Runtime(
                format!("{} runs before a container exists", check),
            )),
            CheckKind::ContainerAlive => Self::container_alive(ctx).await,
            CheckKind::RuntimeIdentity => Self::runtime_identity(ctx).await,
            CheckKind::Health => {
                let response = Self::wait_for_liveness(ctx).await?;
                Self::verify_endpoint(check, &contract::HEALTH, &response, ctx)
            }
            CheckKind::Readiness | CheckKind::Root | CheckKind::Metrics | CheckKind::Stores => {
                let endpoint = check.endpoint().ok_or_else(|| {
                    HarnessError::Runtime(format!("{} has no endpoint contract", check))
                })?;
                let response = match ctx.probe.get(endpoint.path).await {
                    Ok(response) => response,
                    Err(e) => return Err(Self::exited_or(ctx, endpoint.path, e).await),
                };
                Self::verify_endpoint(check, endpoint, &response, ctx)
            }
            CheckKind::StructuredLogs => Self::structured_logs(ctx).await,
            CheckKind::ReadOnlyFilesystem => Self::read_only_filesystem(ctx).await,
            CheckKind::NumericUid => Self::numeric_uid(ctx).await,
        }
    }

    fn verify_endpoint(
        check: CheckKind,
        endpoint: &EndpointContract,
        response: &ProbeResponse,
        ctx: &CheckContext<'_>,
    ) -> HarnessResult<String> {
        endpoint.verify(check.name(), response, &ctx.config.metrics_series)?;
        Ok(format!("GET {} -> HTTP {}", endpoint.path, response.status))
    }

    async fn startup_failure(ctx: &CheckContext<'_>, reason: String) -> HarnessError {
        let logs = ctx
            .runtime
            .logs(ctx.container)
            .await
            .unwrap_or_else(|e| format!("<logs unavailable: {}>", e));
        HarnessError::StartupFailed { reason, logs }
    }

    /// `error` happened while talking to the container. If the container has
    /// exited in the meantime, report that with its logs instead.
    async fn exited_or(ctx: &CheckContext<'_>, action: &str, error: HarnessError) -> HarnessError {
        match ctx.runtime.is_running(ctx.container).await {
            Ok(false) => {
                Self::startup_failure(
                    ctx,
                    format!("container {} exited before `{}`", ctx.container, action),
                )
                .await
            }
            _ => error,
        }
    }

    /// Run `command` in the container. A failed exec in a container that
    /// has since exited is a startup failure.
    async fn exec_checked(ctx: &CheckContext<'_>, command: &[&str]) -> HarnessResult<ExecOutput> {
        let action = command.join(" ");
        match ctx.runtime.exec(ctx.container, command).await {
            Ok(out) if out.success() => Ok(out),
            Ok(out) => match ctx.runtime.is_running(ctx.container).await {
                Ok(false) => Err(Self::startup_failure(
                    ctx,
                    format!("container {} exited before `{}`", ctx.container, action),
                )
                .await),
                _ => Ok(out),
            },
            Err(e) => Err(Self::exited_or(ctx, &action, e).await),
        }
    }

    async fn container_alive(ctx: &CheckContext<'_>) -> HarnessResult<String> {
        let policy = BackoffPolicy::from_config(ctx.config);
        let polled = poll_with_backoff(&policy, "container state", move || async move {
            match ctx.runtime.is_running(ctx.container).await {
                Ok(true) => Attempt::Ready(()),
                Ok(false) => Attempt::Abort(
                    Self::startup_failure(ctx, format!("container {} exited", ctx.container)).await,
                ),
                Err(e) => Attempt::Pending(e.to_string()),
            }
        })
        .await?;

        let window = Duration::from_millis(ctx.config.stable_window_ms);
        if !window.is_zero() {
            tokio::time::sleep(window).await;
            if !ctx.runtime.is_running(ctx.container).await? {
                return Err(Self::startup_failure(
                    ctx,
                    format!(
                        "container {} exited within {}ms of starting",
                        ctx.container, ctx.config.stable_window_ms
                    ),
                )
                .await);
            }
        }
        Ok(format!(
            "running after {} attempt(s), stable for {}ms",
            polled.attempts, ctx.config.stable_window_ms
        ))
    }

    /// Poll the liveness endpoint until it answers at all. A container that
    /// dies while we wait is a startup failure, not a timeout.
    async fn wait_for_liveness(ctx: &CheckContext<'_>) -> HarnessResult<ProbeResponse> {
        let policy = BackoffPolicy::from_config(ctx.config);
        let polled = poll_with_backoff(&policy, contract::HEALTH.path, move || async move {
            match ctx.probe.get(contract::HEALTH.path).await {
                Ok(response) => Attempt::Ready(response),
                Err(probe_err) => match ctx.runtime.is_running(ctx.container).await {
                    Ok(false) => Attempt::Abort(
                        Self::startup_failure(
                            ctx,
                            format!("container {} exited before answering", ctx.container),
                        )
                        .await,
                    ),
                    _ => Attempt::Pending(probe_err.to_string()),
                },
            }
        })
        .await?;
        Ok(polled.value)
    }

    async fn runtime_identity(ctx: &CheckContext<'_>) -> HarnessResult<String> {
        let expected = &ctx.config.expected_user;
        let out = Self::exec_checked(ctx, &["whoami"]).await?;
        if !out.success() {
            return Err(HarnessError::Identity {
                expected: expected.clone(),
                actual: format!("<whoami exited {}: {}>", out.exit_code, out.stderr.trim()),
            });
        }
        let user = out.stdout.trim();
        if user == "root" || user != expected.as_str() {
            return Err(HarnessError::Identity {
                expected: expected.clone(),
                actual: user.to_string(),
            });
        }
        Ok(format!("user {}", user))
    }

    async fn structured_logs(ctx: &CheckContext<'_>) -> HarnessResult<String> {
        let logs = ctx.runtime.logs(ctx.container).await?;
        let scan = contract::scan_structured_logs(&logs);
        if !scan.satisfied() {
            return Err(HarnessError::Observability {
                missing: format!(
                    "{} field(s) across {} structured record(s) in {} line(s)",
                    scan.missing().join(" and "),
                    scan.records,
                    scan.lines
                ),
            });
        }
        Ok(format!("{} structured record(s)", scan.records))
    }

    async fn read_only_filesystem(ctx: &CheckContext<'_>) -> HarnessResult<String> {
        let out = Self::exec_checked(ctx, &["touch", WRITE_PROBE_PATH]).await?;
        if out.success() {
            return Err(HarnessError::SecurityEnforcement(format!(
                "write to {} succeeded; root filesystem is writable",
                WRITE_PROBE_PATH
            )));
        }
        if !contract::is_read_only_rejection(&out.stderr) {
            return Err(HarnessError::SecurityEnforcement(format!(
                "write to {} failed without a read-only error: {}",
                WRITE_PROBE_PATH,
                out.stderr.trim()
            )));
        }
        Ok(format!("write to {} rejected", WRITE_PROBE_PATH))
    }

    async fn numeric_uid(ctx: &CheckContext<'_>) -> HarnessResult<String> {
        let expected = ctx.config.expected_uid;
        let out = Self::exec_checked(ctx, &["id", "-u"]).await?;
        let raw = out.stdout.trim();
        match raw.parse::<u32>() {
            Ok(uid) if out.success() && uid == expected => Ok(format!("uid {}", uid)),
            Ok(uid) => Err(HarnessError::SecurityEnforcement(format!(
                "effective uid {} does not match expected {}",
                uid, expected
            ))),
            Err(_) => Err(HarnessError::SecurityEnforcement(format!(
                "could not read effective uid (exit {}): {:?}",
                out.exit_code, raw
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::{FakeProbe, FakeRuntime};
    use crate::runtime::RunSpec;

    fn config() -> HarnessConfig {
        HarnessConfig {
            settle_timeout_ms: 1_000,
            backoff_base_ms: 10,
            backoff_max_ms: 100,
            stable_window_ms: 20,
            ..HarnessConfig::default()
        }
    }

    async fn start(runtime: &FakeRuntime, cfg: &HarnessConfig) -> ContainerId {
        runtime
            .run_container(&RunSpec::from_config(cfg))
            .await
            .expect("fake start")
    }

    async fn execute(
        check: CheckKind,
        runtime: &FakeRuntime,
        probe: &FakeProbe,
    ) -> HarnessResult<String> {
        let cfg = config();
        let id = start(runtime, &cfg).await;
        let ctx = CheckContext {
            config: &cfg,
            runtime,
            probe,
            container: &id,
        };
        CheckRunner::execute(check, &ctx).await
    }

    #[test]
    fn test_check_result_fail_records_kind() {
        let err = HarnessError::SecurityEnforcement("writable".into());
        let result = CheckResult::fail(CheckKind::ReadOnlyFilesystem, 3, &err);
        assert!(!result.passed);
        assert_eq!(result.error_kind.as_deref(), Some("security_enforcement"));
        assert!(result.detail.contains("writable"));
    }

    #[tokio::test]
    async fn test_identity_rejects_root() {
        let runtime = FakeRuntime::conforming().with_user("root", 0);
        let probe = FakeProbe::conforming();
        match execute(CheckKind::RuntimeIdentity, &runtime, &probe).await {
            Err(HarnessError::Identity { actual, expected }) => {
                assert_eq!(actual, "root");
                assert_eq!(expected, "appuser");
            }
            other => panic!("expected identity error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_uid_mismatch_is_security_error() {
        let runtime = FakeRuntime::conforming().with_user("appuser", 1001);
        let probe = FakeProbe::conforming();
        let err = execute(CheckKind::NumericUid, &runtime, &probe)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "security_enforcement");
        assert!(err.to_string().contains("1001"));
    }

    #[tokio::test]
    async fn test_write_rejected_for_wrong_reason_fails() {
        let runtime = FakeRuntime::conforming()
            .with_write_result(1, "touch: cannot touch '/testfile': Permission denied");
        let probe = FakeProbe::conforming();
        let err = execute(CheckKind::ReadOnlyFilesystem, &runtime, &probe)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("without a read-only error"));
    }

    #[tokio::test]
    async fn test_read_only_rejection_passes() {
        let runtime = FakeRuntime::conforming();
        let probe = FakeProbe::conforming();
        let detail = execute(CheckKind::ReadOnlyFilesystem, &runtime, &probe)
            .await
            .unwrap();
        assert_eq!(detail, "write to /testfile rejected");
    }

    #[tokio::test]
    async fn test_logs_missing_timestamp() {
        let runtime = FakeRuntime::conforming().with_logs("{\"event\":\"request_received\"}\n");
        let probe = FakeProbe::conforming();
        match execute(CheckKind::StructuredLogs, &runtime, &probe).await {
            Err(HarnessError::Observability { missing }) => assert!(missing.contains("timestamp")),
            other => panic!("expected observability error, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_liveness_never_answers_times_out() {
        let runtime = FakeRuntime::conforming();
        let probe = FakeProbe::conforming().unreachable("/health");
        let err = execute(CheckKind::Health, &runtime, &probe)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "readiness_timeout");
    }

    #[tokio::test]
    async fn test_exited_container_reports_logs() {
        let runtime = FakeRuntime::conforming()
            .exited()
            .with_logs("ValueError: PORT must be between 1 and 65535\n");
        let probe = FakeProbe::conforming();
        match execute(CheckKind::ContainerAlive, &runtime, &probe).await {
            Err(HarnessError::StartupFailed { logs, .. }) => assert!(logs.contains("ValueError")),
            other => panic!("expected startup failure, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_crash_within_stable_window_is_startup_failure() {
        // Running on the first inspect, gone on the next.
        let runtime = FakeRuntime::conforming()
            .crashes_after(1)
            .with_logs("ModuleNotFoundError: No module named 'app'\n");
        let probe = FakeProbe::conforming();
        match execute(CheckKind::ContainerAlive, &runtime, &probe).await {
            Err(HarnessError::StartupFailed { reason, logs }) => {
                assert!(reason.contains("within 20ms"));
                assert!(logs.contains("ModuleNotFoundError"));
            }
            other => panic!("expected startup failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_exec_in_exited_container_is_startup_failure() {
        let runtime = FakeRuntime::conforming()
            .crashes_after(0)
            .with_logs("Traceback (most recent call last):\n");
        let probe = FakeProbe::conforming();
        match execute(CheckKind::RuntimeIdentity, &runtime, &probe).await {
            Err(HarnessError::StartupFailed { reason, logs }) => {
                assert!(reason.contains("before `whoami`"));
                assert!(logs.contains("Traceback"));
            }
            other => panic!("expected startup failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_http_error_from_exited_container_is_startup_failure() {
        let runtime = FakeRuntime::conforming().crashes_after(0);
        let probe = FakeProbe::conforming().unreachable("/ready");
        let err = execute(CheckKind::Readiness, &runtime, &probe)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "startup");
    }

    #[tokio::test]
    async fn test_pre_container_checks_are_rejected() {
        let runtime = FakeRuntime::conforming();
        let probe = FakeProbe::conforming();
        assert!(execute(CheckKind::ImagePresent, &runtime, &probe).await.is_err());
    }
}
