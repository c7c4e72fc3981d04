//! Contract predicates over endpoint bodies, log streams and exec output.
//!
//! Everything here is pure: the check runner fetches the data and these
//! functions decide whether it satisfies the container's contract.

use ctgate_core::{HarnessError, HarnessResult};
use serde::Serialize;
use serde_json::Value;

use crate::probe::ProbeResponse;

/// Status value the liveness endpoint must report.
pub const HEALTHY_STATUS: &str = "healthy";

/// Error text the kernel reports for writes to a read-only mount.
pub const READ_ONLY_MARKER: &str = "read-only file system";

fn parse_object(body: &str) -> Option<serde_json::Map<String, Value>> {
    match serde_json::from_str::<Value>(body.trim()) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

/// JSON object body whose `status` field is `"healthy"`.
pub fn is_healthy(body: &str) -> bool {
    parse_object(body)
        .and_then(|map| map.get("status").and_then(Value::as_str).map(str::to_owned))
        .map(|status| status == HEALTHY_STATUS)
        .unwrap_or(false)
}

/// JSON object body carrying `field`, whatever its value.
pub fn has_json_field(body: &str, field: &str) -> bool {
    parse_object(body)
        .map(|map| map.contains_key(field))
        .unwrap_or(false)
}

/// Prometheus text exposition carries at least one sample of `name`.
///
/// `# HELP` and `# TYPE` lines do not count: a declared but never
/// incremented counter is not evidence of working instrumentation.
pub fn has_metric_series(body: &str, name: &str) -> bool {
    body.lines()
        .map(str::trim_start)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .any(|line| match line.strip_prefix(name) {
            Some(rest) => rest.starts_with('{') || rest.starts_with(' ') || rest.starts_with('\t'),
            None => false,
        })
}

/// Whether `stderr` shows a write rejected by a read-only mount.
pub fn is_read_only_rejection(stderr: &str) -> bool {
    stderr.to_ascii_lowercase().contains(READ_ONLY_MARKER)
}

/// Summary of the structured records found in a log stream.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LogScan {
    pub lines: usize,
    pub records: usize,
    pub has_event: bool,
    pub has_timestamp: bool,
}

impl LogScan {
    /// Names of the required fields no record carried.
    pub fn missing(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if !self.has_event {
            missing.push("event");
        }
        if !self.has_timestamp {
            missing.push("timestamp");
        }
        missing
    }

    pub fn satisfied(&self) -> bool {
        self.has_event && self.has_timestamp
    }
}

/// Scan a log stream line by line. Lines that are JSON objects are
/// structured records; anything else (server banners, tracebacks) is
/// ignored. The two required fields may come from different records.
pub fn scan_structured_logs(logs: &str) -> LogScan {
    let mut scan = LogScan::default();
    for line in logs.lines() {
        scan.lines += 1;
        let Some(record) = parse_object(line) else {
            continue;
        };
        scan.records += 1;
        scan.has_event |= record.contains_key("event");
        scan.has_timestamp |= record.contains_key("timestamp");
    }
    scan
}

/// What an endpoint's body must contain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyRule {
    /// `status` field equal to `"healthy"`.
    HealthyMarker,
    /// A JSON field with any value.
    Field(&'static str),
    /// At least one of several JSON fields.
    AnyField(&'static [&'static str]),
    /// A sample of the configured counter series.
    MetricSeries,
}

/// Status and body contract of one endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndpointContract {
    pub path: &'static str,
    pub accepted: &'static [u16],
    pub rule: BodyRule,
}

pub const HEALTH: EndpointContract = EndpointContract {
    path: "/health",
    accepted: &[200],
    rule: BodyRule::HealthyMarker,
};

/// 503 is a legitimate "not ready" answer.
pub const READINESS: EndpointContract = EndpointContract {
    path: "/ready",
    accepted: &[200, 503],
    rule: BodyRule::Field("status"),
};

pub const ROOT: EndpointContract = EndpointContract {
    path: "/",
    accepted: &[200],
    rule: BodyRule::Field("message"),
};

pub const METRICS: EndpointContract = EndpointContract {
    path: "/metrics",
    accepted: &[200],
    rule: BodyRule::MetricSeries,
};

/// 503 with an `error` body is the degraded-dependency answer.
pub const STORES: EndpointContract = EndpointContract {
    path: "/stores",
    accepted: &[200, 503],
    rule: BodyRule::AnyField(&["stores", "error"]),
};

impl EndpointContract {
    fn expected_status(&self) -> String {
        let codes: Vec<String> = self.accepted.iter().map(u16::to_string).collect();
        format!("HTTP {}", codes.join(" or "))
    }

    /// Check a response against this contract.
    pub fn verify(
        &self,
        check: &str,
        response: &ProbeResponse,
        metrics_series: &str,
    ) -> HarnessResult<()> {
        if !self.accepted.contains(&response.status) {
            return Err(HarnessError::contract(
                check,
                format!("{} from {}", self.expected_status(), self.path),
                format!("HTTP {} body {}", response.status, excerpt(&response.body)),
            ));
        }

        let (ok, expected) = match self.rule {
            BodyRule::HealthyMarker => (
                is_healthy(&response.body),
                format!("body with \"status\": \"{}\"", HEALTHY_STATUS),
            ),
            BodyRule::Field(field) => (
                has_json_field(&response.body, field),
                format!("body with a \"{}\" field", field),
            ),
            BodyRule::AnyField(fields) => (
                fields.iter().any(|f| has_json_field(&response.body, f)),
                format!("body with one of {:?}", fields),
            ),
            BodyRule::MetricSeries => (
                has_metric_series(&response.body, metrics_series),
                format!("metrics with a {} sample", metrics_series),
            ),
        };

        if ok {
            Ok(())
        } else {
            Err(HarnessError::contract(
                check,
                expected,
                format!("HTTP {} body {}", response.status, excerpt(&response.body)),
            ))
        }
    }
}

/// First 200 characters of a body, for failure messages.
pub fn excerpt(body: &str) -> String {
    const MAX: usize = 200;
    let trimmed = body.trim();
    if trimmed.chars().count() <= MAX {
        format!("{:?}", trimmed)
    } else {
        let head: String = trimmed.chars().take(MAX).collect();
        format!("{:?}...", head)
    }
}
