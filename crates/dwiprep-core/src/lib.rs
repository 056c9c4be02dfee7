//! dwiprep core - shared infrastructure for the DWI preprocessing pipeline
//!
//! Logging, progress reporting, cooperative shutdown, bounded concurrency
//! primitives and the external-tool execution layer used by the pipeline
//! and dispatch crates.

pub mod exec;
pub mod logging;
pub mod progress;
pub mod semaphore;
pub mod shutdown;
pub mod work_queue;

// Re-exports for convenience
pub use exec::{ProcessRunner, ToolError, ToolInvocation, ToolRunner};
pub use logging::{IndicatifLogger, init_logging};
pub use progress::ProgressContext;
pub use semaphore::{Semaphore, SemaphoreGuard};
pub use shutdown::{
    install_signal_handlers, is_shutdown_requested, request_shutdown, shutdown_flag,
};
pub use work_queue::WorkQueue;
