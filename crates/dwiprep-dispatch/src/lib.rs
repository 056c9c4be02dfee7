//! dwiprep-dispatch: running many subjects
//!
//! - [`Dispatcher`]: bounded local pool, K subjects in flight, FIFO claims
//! - [`SubjectList`]: the newline-delimited subject list shared by all modes
//! - [`slurm`]: array-job submission with a dependent report job
//! - [`StatusDir`]: per-subject done markers written by array tasks

pub mod config;
pub mod error;
pub mod pool;
pub mod slurm;
pub mod status;
pub mod subjects;

pub use config::DispatchConfig;
pub use error::DispatchError;
pub use pool::{BatchSummary, Dispatcher};
pub use slurm::{ArrayJob, SubmissionFiles, SubmitError, WorkerCommand};
pub use status::StatusDir;
pub use subjects::{SubjectList, parse_task_id, task_id_from_env};
