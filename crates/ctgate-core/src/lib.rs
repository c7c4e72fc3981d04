//! ctgate core library
//!
//! Configuration, error taxonomy, tracing setup and the bounded readiness
//! poll shared by the harness and the CLI.

pub mod config;
pub mod error;
pub mod obs;
pub mod retry;
pub mod telemetry;

pub use config::{HarnessConfig, SecurityProfile};
pub use error::{HarnessError, HarnessResult};
pub use obs::{
    emit_check_failed, emit_check_passed, emit_readiness_attempt, emit_run_finished,
    emit_run_started, emit_teardown, run_span,
};
pub use retry::{poll_with_backoff, Attempt, BackoffPolicy, Polled};
pub use telemetry::init_tracing;

/// ctgate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
