//! Scripted in-memory fakes for the runtime and probe seams (testing only).
//!
//! `FakeRuntime::conforming()` and `FakeProbe::conforming()` describe a
//! container that satisfies every check; builder methods break one property
//! at a time.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use ctgate_core::{HarnessError, HarnessResult};

use crate::probe::{HttpProbe, ProbeResponse};
use crate::runtime::{ContainerId, ContainerRuntime, ExecOutput, RunSpec};

// ---------------------------------------------------------------------------
// FakeRuntime
// ---------------------------------------------------------------------------

/// Canned answers of a [`FakeRuntime`].
#[derive(Debug, Clone)]
struct Script {
    image_present: bool,
    running: bool,
    /// The process exits once it has been inspected this many times.
    crash_after_inspects: Option<u32>,
    user: String,
    uid: u32,
    write_exit: i32,
    write_stderr: String,
    logs: String,
}

/// In-memory container runtime. Enforces docker's unique-name rule so a
/// leftover container blocks a new run until it is removed.
#[derive(Debug)]
pub struct FakeRuntime {
    script: Script,
    /// name -> id of live containers
    live: Mutex<HashMap<String, String>>,
    calls: Mutex<Vec<String>>,
    next_id: AtomicU32,
    inspections: AtomicU32,
}

impl FakeRuntime {
    /// A container that passes every check.
    pub fn conforming() -> Self {
        Self {
            script: Script {
                image_present: true,
                running: true,
                crash_after_inspects: None,
                user: "appuser".to_string(),
                uid: 1000,
                write_exit: 1,
                write_stderr: "touch: cannot touch '/testfile': Read-only file system\n"
                    .to_string(),
                logs: concat!(
                    "{\"timestamp\": \"2024-01-01T00:00:00Z\", \"level\": \"INFO\", \"event\": \"application_starting\"}\n",
                    "{\"timestamp\": \"2024-01-01T00:00:01Z\", \"level\": \"INFO\", \"event\": \"request_completed\"}\n",
                )
                .to_string(),
            },
            live: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            next_id: AtomicU32::new(1),
            inspections: AtomicU32::new(0),
        }
    }

    pub fn without_image(mut self) -> Self {
        self.script.image_present = false;
        self
    }

    /// The container process exits right after start.
    pub fn exited(mut self) -> Self {
        self.script.running = false;
        self
    }

    /// The container reports running for the first `inspects` state
    /// inspections, then exits. Execs fail from that point on.
    pub fn crashes_after(mut self, inspects: u32) -> Self {
        self.script.crash_after_inspects = Some(inspects);
        self
    }

    pub fn with_user(mut self, user: &str, uid: u32) -> Self {
        self.script.user = user.to_string();
        self.script.uid = uid;
        self
    }

    /// Result of the root-filesystem write attempt.
    pub fn with_write_result(mut self, exit_code: i32, stderr: &str) -> Self {
        self.script.write_exit = exit_code;
        self.script.write_stderr = stderr.to_string();
        self
    }

    /// Root filesystem accepts writes.
    pub fn writable_root(self) -> Self {
        self.with_write_result(0, "")
    }

    pub fn with_logs(mut self, logs: &str) -> Self {
        self.script.logs = logs.to_string();
        self
    }

    /// Pretend a container with this name survived an earlier run.
    pub fn with_leftover(self, name: &str) -> Self {
        self.live_map()
            .insert(name.to_string(), format!("leftover-{}", name));
        self
    }

    /// Every call made so far, e.g. `"run demo-test"`, `"exec whoami"`.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Number of containers currently alive.
    pub fn live_count(&self) -> usize {
        self.live_map().len()
    }

    fn live_map(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        self.live.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn record(&self, call: String) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }
    }

    fn is_live_id(&self, id: &ContainerId) -> bool {
        self.live_map().values().any(|v| v == id.as_str())
    }

    fn has_crashed(&self) -> bool {
        match self.script.crash_after_inspects {
            Some(limit) => self.inspections.load(Ordering::Relaxed) >= limit,
            None => false,
        }
    }

    fn remove_key(&self, key: &str) {
        self.live_map().retain(|name, id| name != key && id != key);
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn image_exists(&self, image: &str) -> HarnessResult<bool> {
        self.record(format!("image_exists {}", image));
        Ok(self.script.image_present)
    }

    async fn remove_container(&self, name: &str) -> HarnessResult<()> {
        self.record(format!("rm {}", name));
        self.remove_key(name);
        Ok(())
    }

    async fn run_container(&self, spec: &RunSpec) -> HarnessResult<ContainerId> {
        self.record(format!("run {}", spec.name));
        let mut live = self.live_map();
        if live.contains_key(&spec.name) {
            return Err(HarnessError::StartupFailed {
                reason: format!(
                    "Conflict. The container name \"/{}\" is already in use",
                    spec.name
                ),
                logs: String::new(),
            });
        }
        let id = format!("fake-{}", self.next_id.fetch_add(1, Ordering::Relaxed));
        live.insert(spec.name.clone(), id.clone());
        Ok(ContainerId(id))
    }

    async fn is_running(&self, id: &ContainerId) -> HarnessResult<bool> {
        self.record(format!("inspect {}", id));
        if !self.is_live_id(id) {
            return Err(HarnessError::Runtime(format!("No such container: {}", id)));
        }
        let seen = self.inspections.fetch_add(1, Ordering::Relaxed);
        let crashed = matches!(self.script.crash_after_inspects, Some(limit) if seen >= limit);
        Ok(self.script.running && !crashed)
    }

    async fn exec(&self, id: &ContainerId, command: &[&str]) -> HarnessResult<ExecOutput> {
        self.record(format!("exec {}", command.join(" ")));
        if !self.is_live_id(id) {
            return Err(HarnessError::Runtime(format!("No such container: {}", id)));
        }
        if !self.script.running || self.has_crashed() {
            return Ok(ExecOutput {
                exit_code: 1,
                stdout: String::new(),
                stderr: format!(
                    "Error response from daemon: container {} is not running\n",
                    id
                ),
            });
        }
        let output = match command.first().copied() {
            Some("whoami") => ExecOutput {
                exit_code: 0,
                stdout: format!("{}\n", self.script.user),
                stderr: String::new(),
            },
            Some("id") => ExecOutput {
                exit_code: 0,
                stdout: format!("{}\n", self.script.uid),
                stderr: String::new(),
            },
            Some("touch") => ExecOutput {
                exit_code: self.script.write_exit,
                stdout: String::new(),
                stderr: self.script.write_stderr.clone(),
            },
            other => ExecOutput {
                exit_code: 127,
                stdout: String::new(),
                stderr: format!("{}: not found", other.unwrap_or_default()),
            },
        };
        Ok(output)
    }

    async fn logs(&self, id: &ContainerId) -> HarnessResult<String> {
        self.record(format!("logs {}", id));
        Ok(self.script.logs.clone())
    }

    fn release_blocking(&self, id: &ContainerId) {
        self.record(format!("release_blocking {}", id));
        self.remove_key(id.as_str());
    }
}

// ---------------------------------------------------------------------------
// FakeProbe
// ---------------------------------------------------------------------------

/// Metrics body with one `http_requests_total` sample.
pub const CONFORMING_METRICS: &str = "\
# HELP http_requests_total Total number of HTTP requests
# TYPE http_requests_total counter
http_requests_total{endpoint=\"health_check\",method=\"GET\",status_code=\"200\"} 1.0
";

/// Scripted HTTP probe that records every path requested.
#[derive(Debug)]
pub struct FakeProbe {
    responses: HashMap<String, ProbeResponse>,
    unreachable: HashSet<String>,
    /// Requests that fail with a transport error before the server "starts".
    warmup_failures: AtomicU32,
    requests: Mutex<Vec<String>>,
}

impl FakeProbe {
    /// An application that honours the full endpoint contract.
    pub fn conforming() -> Self {
        let mut responses = HashMap::new();
        responses.insert(
            "/health".to_string(),
            ProbeResponse::new(200, r#"{"status":"healthy"}"#),
        );
        responses.insert(
            "/ready".to_string(),
            ProbeResponse::new(200, r#"{"status":"ready"}"#),
        );
        responses.insert("/".to_string(), ProbeResponse::new(200, r#"{"message":"ok"}"#));
        responses.insert(
            "/metrics".to_string(),
            ProbeResponse::new(200, CONFORMING_METRICS),
        );
        responses.insert(
            "/stores".to_string(),
            ProbeResponse::new(200, r#"{"stores":[]}"#),
        );
        Self {
            responses,
            unreachable: HashSet::new(),
            warmup_failures: AtomicU32::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn with_response(mut self, path: &str, status: u16, body: &str) -> Self {
        self.responses
            .insert(path.to_string(), ProbeResponse::new(status, body));
        self
    }

    /// Every request to `path` fails with a connection error.
    pub fn unreachable(mut self, path: &str) -> Self {
        self.unreachable.insert(path.to_string());
        self
    }

    /// The first `n` requests fail as if the server were still booting.
    pub fn with_warmup(self, n: u32) -> Self {
        self.warmup_failures.store(n, Ordering::Relaxed);
        self
    }

    /// Paths requested so far, in order.
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl HttpProbe for FakeProbe {
    async fn get(&self, path: &str) -> HarnessResult<ProbeResponse> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(path.to_string());
        }
        let warming = self
            .warmup_failures
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1))
            .is_ok();
        if warming || self.unreachable.contains(path) {
            return Err(HarnessError::Probe(format!(
                "GET {}: connection refused",
                path
            )));
        }
        Ok(self
            .responses
            .get(path)
            .cloned()
            .unwrap_or_else(|| ProbeResponse::new(404, r#"{"error":"Not found"}"#)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ctgate_core::HarnessConfig;

    #[tokio::test]
    async fn test_fake_runtime_enforces_unique_names() {
        let runtime = FakeRuntime::conforming();
        let spec = RunSpec::from_config(&HarnessConfig::default());
        runtime.run_container(&spec).await.unwrap();
        assert!(runtime.run_container(&spec).await.is_err());
        runtime.remove_container(&spec.name).await.unwrap();
        assert!(runtime.run_container(&spec).await.is_ok());
        assert_eq!(runtime.live_count(), 1);
    }

    #[tokio::test]
    async fn test_fake_runtime_crash_after_inspects() {
        let runtime = FakeRuntime::conforming().crashes_after(1);
        let spec = RunSpec::from_config(&HarnessConfig::default());
        let id = runtime.run_container(&spec).await.unwrap();

        let whoami = runtime.exec(&id, &["whoami"]).await.unwrap();
        assert!(whoami.success());
        assert!(runtime.is_running(&id).await.unwrap());

        assert!(!runtime.exec(&id, &["whoami"]).await.unwrap().success());
        assert!(!runtime.is_running(&id).await.unwrap());
    }

    #[tokio::test]
    async fn test_fake_probe_warmup_then_answers() {
        let probe = FakeProbe::conforming().with_warmup(2);
        assert!(probe.get("/health").await.is_err());
        assert!(probe.get("/health").await.is_err());
        let resp = probe.get("/health").await.unwrap();
        assert_eq!(resp.status, 200);
        assert_eq!(probe.requests().len(), 3);
    }

    #[tokio::test]
    async fn test_fake_probe_unknown_path_is_404() {
        let probe = FakeProbe::conforming();
        assert_eq!(probe.get("/nope").await.unwrap().status, 404);
    }
}
