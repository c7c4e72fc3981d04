//! Container validation harness
//!
//! Starts an image under a hardened security profile, runs an ordered list
//! of contract checks against it, and removes the container on every exit
//! path.
//!
//! # Example
//!
//! ```no_run
//! use ctgate_core::HarnessConfig;
//! use ctgate_harness::{render_transcript_line, Harness};
//!
//! # async fn demo() -> ctgate_core::HarnessResult<()> {
//! let harness = Harness::with_docker(HarnessConfig::from_env()?)?;
//! let report = harness
//!     .run_until_interrupted(|result| println!("{}", render_transcript_line(result)))
//!     .await?;
//! std::process::exit(report.exit_code() as i32);
//! # }
//! ```

pub mod check;
pub mod contract;
pub mod fakes;
pub mod gate;
pub mod pipeline;
pub mod probe;
pub mod report;
pub mod runner;
pub mod runtime;

pub use check::CheckKind;
pub use gate::{GateVerdict, HarnessGate};
pub use pipeline::{shutdown_signal, ContainerGuard, Harness};
pub use probe::{HttpProbe, ProbeResponse, ReqwestProbe};
pub use report::{
    render_banner, render_transcript_line, write_report_json, FailureSummary, RunReport,
};
pub use runner::{CheckContext, CheckResult, CheckRunner};
pub use runtime::{ContainerId, ContainerRuntime, DockerCli, ExecOutput, RunSpec};
