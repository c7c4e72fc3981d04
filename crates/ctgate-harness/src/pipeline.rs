//! Harness orchestration: start the container, run the checks in order, and
//! always tear the container down.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use ctgate_core::{
    emit_check_failed, emit_check_passed, emit_run_finished, emit_run_started, emit_teardown,
    run_span, HarnessConfig, HarnessError, HarnessResult,
};
use tracing::{debug, info, warn, Instrument};
use uuid::Uuid;

use crate::check::CheckKind;
use crate::gate::HarnessGate;
use crate::probe::{HttpProbe, ReqwestProbe};
use crate::report::{FailureSummary, RunReport, REPORT_SCHEMA_VERSION};
use crate::runner::{CheckContext, CheckResult, CheckRunner};
use crate::runtime::{ContainerId, ContainerRuntime, DockerCli, RunSpec};

/// Owns a started container until it is released.
///
/// `release` removes the container asynchronously. A guard that is dropped
/// while still armed (early return, panic, cancelled future) falls back to
/// [`ContainerRuntime::release_blocking`].
pub struct ContainerGuard {
    runtime: Arc<dyn ContainerRuntime>,
    id: ContainerId,
    armed: bool,
}

impl ContainerGuard {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, id: ContainerId) -> Self {
        Self {
            runtime,
            id,
            armed: true,
        }
    }

    pub fn id(&self) -> &ContainerId {
        &self.id
    }

    /// Remove the container. On error the guard stays armed, so `Drop`
    /// retries synchronously.
    pub async fn release(mut self) -> HarnessResult<()> {
        match self.runtime.remove_container(self.id.as_str()).await {
            Ok(()) => {
                self.armed = false;
                emit_teardown(self.id.as_str(), true, None);
                Ok(())
            }
            Err(e) => {
                emit_teardown(self.id.as_str(), false, Some(&e));
                Err(e)
            }
        }
    }
}

impl Drop for ContainerGuard {
    fn drop(&mut self) {
        if self.armed {
            self.runtime.release_blocking(&self.id);
        }
    }
}

/// Running transcript of a harness run.
struct Transcript<'o> {
    checks: Vec<CheckResult>,
    failure: Option<FailureSummary>,
    observer: &'o mut (dyn FnMut(&CheckResult) + 'o),
}

impl Transcript<'_> {
    /// Record a finished check. Returns `false` once the run must halt.
    fn record(&mut self, result: CheckResult, error: Option<HarnessError>) -> bool {
        let ordinal = result.check.ordinal();
        match &error {
            None => emit_check_passed(result.check.name(), ordinal, result.duration_ms),
            Some(e) => emit_check_failed(result.check.name(), ordinal, e.kind(), &result.detail),
        }
        (self.observer)(&result);
        if let Some(e) = error {
            self.failure = Some(FailureSummary::new(result.check, &e));
        }
        self.checks.push(result);
        self.failure.is_none()
    }

    fn record_outcome(
        &mut self,
        check: CheckKind,
        start: Instant,
        outcome: HarnessResult<String>,
    ) -> bool {
        let duration_ms = start.elapsed().as_millis() as u64;
        match outcome {
            Ok(detail) => self.record(CheckResult::pass(check, duration_ms, detail), None),
            Err(e) => self.record(CheckResult::fail(check, duration_ms, &e), Some(e)),
        }
    }
}

/// Container validation harness.
pub struct Harness {
    config: HarnessConfig,
    runtime: Arc<dyn ContainerRuntime>,
    probe: Arc<dyn HttpProbe>,
}

impl Harness {
    /// Build a harness over explicit runtime and probe implementations.
    pub fn new(
        config: HarnessConfig,
        runtime: Arc<dyn ContainerRuntime>,
        probe: Arc<dyn HttpProbe>,
    ) -> HarnessResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            runtime,
            probe,
        })
    }

    /// Production wiring: the `docker` CLI and a reqwest probe against the
    /// published port.
    pub fn with_docker(config: HarnessConfig) -> HarnessResult<Self> {
        let probe = ReqwestProbe::new(
            config.base_url(),
            Duration::from_millis(config.http_timeout_ms),
        )?;
        Self::new(config, Arc::new(DockerCli::new()), Arc::new(probe))
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Execute the full check sequence.
    ///
    /// Check failures are part of the report, not errors: the returned
    /// report carries the failing check and its category. `observer` sees
    /// each check as it completes.
    pub async fn run<F>(&self, mut observer: F) -> HarnessResult<RunReport>
    where
        F: FnMut(&CheckResult),
    {
        let run_id = Uuid::new_v4().to_string();
        let span = run_span(&run_id, &self.config.image);
        self.execute(run_id, &mut observer).instrument(span).await
    }

    /// Race the run against `shutdown`. If `shutdown` completes first the
    /// run is cancelled, its container removed, and `Interrupted` returned.
    pub async fn run_until<F, S>(&self, observer: F, shutdown: S) -> HarnessResult<RunReport>
    where
        F: FnMut(&CheckResult),
        S: Future<Output = ()>,
    {
        tokio::select! {
            report = self.run(observer) => report,
            () = shutdown => {
                info!(container = %self.config.container_name, "Run interrupted, removing container");
                // Covers a container whose `docker run` was still in flight.
                if let Err(e) = self.runtime.remove_container(&self.config.container_name).await {
                    debug!(error = %e, "Removal by name after interrupt failed");
                }
                Err(HarnessError::Interrupted)
            }
        }
    }

    /// [`Harness::run_until`] with [`shutdown_signal`] as the shutdown.
    pub async fn run_until_interrupted<F>(&self, observer: F) -> HarnessResult<RunReport>
    where
        F: FnMut(&CheckResult),
    {
        self.run_until(observer, shutdown_signal()).await
    }

    async fn execute(
        &self,
        run_id: String,
        observer: &mut dyn FnMut(&CheckResult),
    ) -> HarnessResult<RunReport> {
        let started_at = Utc::now();
        let clock = Instant::now();
        let config_digest = self.config.digest()?;

        emit_run_started(&run_id, &self.config.image, &self.config.container_name);

        let mut transcript = Transcript {
            checks: Vec::new(),
            failure: None,
            observer,
        };
        self.run_checks(&mut transcript).await;

        let verdict = HarnessGate::evaluate(&transcript.checks);
        let duration_ms = clock.elapsed().as_millis() as u64;
        let report = RunReport {
            schema_version: REPORT_SCHEMA_VERSION.to_string(),
            run_id,
            image: self.config.image.clone(),
            container_name: self.config.container_name.clone(),
            config_digest,
            started_at,
            finished_at: Utc::now(),
            duration_ms,
            checks: transcript.checks,
            verdict,
            failure: transcript.failure,
        };

        emit_run_finished(
            &report.run_id,
            duration_ms,
            report.checks.len(),
            report.success(),
        );
        Ok(report)
    }

    async fn run_checks(&self, transcript: &mut Transcript<'_>) {
        let start = Instant::now();
        let outcome = CheckRunner::check_image(self.runtime.as_ref(), &self.config).await;
        if !transcript.record_outcome(CheckKind::ImagePresent, start, outcome) {
            return;
        }

        let start = Instant::now();
        let spec = RunSpec::from_config(&self.config);
        let guard = match self.start_container(&spec).await {
            Ok(guard) => {
                let detail = format!("container {} ({})", spec.name, guard.id());
                transcript.record_outcome(CheckKind::ContainerStarted, start, Ok(detail));
                guard
            }
            Err(e) => {
                transcript.record_outcome(CheckKind::ContainerStarted, start, Err(e));
                return;
            }
        };

        let ctx = CheckContext {
            config: &self.config,
            runtime: self.runtime.as_ref(),
            probe: self.probe.as_ref(),
            container: guard.id(),
        };
        for check in &CheckKind::ALL[2..] {
            let (result, error) = CheckRunner::run(*check, &ctx).await;
            if !transcript.record(result, error) {
                break;
            }
        }

        if guard.release().await.is_err() && transcript.failure.is_none() {
            warn!(
                container = %self.config.container_name,
                "All checks passed but container removal failed"
            );
        }
    }

    /// Remove any leftover container with the same name, then start a new one.
    async fn start_container(&self, spec: &RunSpec) -> HarnessResult<ContainerGuard> {
        self.runtime.remove_container(&spec.name).await?;
        match self.runtime.run_container(spec).await {
            Ok(id) => Ok(ContainerGuard::new(self.runtime.clone(), id)),
            Err(e) => {
                // `docker run -d` can leave a created container behind on failure.
                if let Err(rm) = self.runtime.remove_container(&spec.name).await {
                    debug!(error = %rm, "Cleanup after failed start failed");
                }
                Err(e)
            }
        }
    }
}

/// Completes on Ctrl-C or, on unix, SIGTERM.
///
/// The SIGTERM handler is installed when this is called rather than when the
/// future is first polled, so a signal arriving after the call cannot kill
/// the process with the container still running.
pub fn shutdown_signal() -> impl Future<Output = ()> {
    #[cfg(unix)]
    let terminate = terminate();

    async move {
        #[cfg(unix)]
        {
            tokio::select! {
                _ = ctrl_c() => {},
                _ = terminate => {},
            }
        }

        #[cfg(not(unix))]
        {
            ctrl_c().await;
        }
    }
}

/// Never completes if the handler cannot be installed.
async fn ctrl_c() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(?err, "failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
}

#[cfg(unix)]
fn terminate() -> impl Future<Output = ()> {
    use tokio::signal::unix::{signal, SignalKind};

    let installed = signal(SignalKind::terminate());
    async move {
        match installed {
            Ok(mut term) => {
                term.recv().await;
            }
            Err(err) => {
                warn!(?err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::{FakeProbe, FakeRuntime};

    fn harness(runtime: Arc<FakeRuntime>, probe: FakeProbe) -> Harness {
        let config = HarnessConfig {
            settle_timeout_ms: 2_000,
            backoff_base_ms: 10,
            backoff_max_ms: 200,
            stable_window_ms: 10,
            ..HarnessConfig::default()
        };
        Harness::new(config, runtime, Arc::new(probe)).unwrap()
    }

    #[tokio::test]
    async fn test_guard_drop_releases_container() {
        let runtime = Arc::new(FakeRuntime::conforming());
        let spec = RunSpec::from_config(&HarnessConfig::default());
        let id = runtime.run_container(&spec).await.unwrap();
        {
            let _guard = ContainerGuard::new(runtime.clone(), id.clone());
        }
        assert_eq!(runtime.live_count(), 0);
        assert!(runtime.calls().contains(&format!("release_blocking {}", id)));
    }

    #[tokio::test]
    async fn test_guard_release_disarms() {
        let runtime = Arc::new(FakeRuntime::conforming());
        let spec = RunSpec::from_config(&HarnessConfig::default());
        let id = runtime.run_container(&spec).await.unwrap();
        let guard = ContainerGuard::new(runtime.clone(), id);
        guard.release().await.unwrap();
        assert_eq!(runtime.live_count(), 0);
        assert!(!runtime
            .calls()
            .iter()
            .any(|c| c.starts_with("release_blocking")));
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let config = HarnessConfig {
            image: String::new(),
            ..HarnessConfig::default()
        };
        let result = Harness::new(
            config,
            Arc::new(FakeRuntime::conforming()),
            Arc::new(FakeProbe::conforming()),
        );
        assert!(matches!(result, Err(HarnessError::Config(_))));
    }

    #[tokio::test]
    async fn test_observer_sees_every_check() {
        let runtime = Arc::new(FakeRuntime::conforming());
        let h = harness(runtime, FakeProbe::conforming());
        let mut seen = Vec::new();
        let report = h.run(|r| seen.push(r.check)).await.unwrap();
        assert!(report.success());
        assert_eq!(seen, CheckKind::ALL.to_vec());
    }

    #[tokio::test]
    async fn test_failed_start_leaves_nothing_running() {
        let runtime = Arc::new(FakeRuntime::conforming().exited());
        let h = harness(runtime.clone(), FakeProbe::conforming());
        let report = h.run(|_| {}).await.unwrap();
        let failure = report.failure.unwrap();
        assert_eq!(failure.check, CheckKind::ContainerAlive);
        assert_eq!(failure.kind, "startup");
        assert_eq!(runtime.live_count(), 0);
    }
}
