//! `[dispatch]` settings: local parallelism and cluster job resources

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Subjects in flight at once (local pool size, SLURM `%K` throttle)
    pub max_parallel: usize,
    /// CPUs per array task, also exported as `OMP_NUM_THREADS` for eddy
    pub cpus_per_task: usize,
    pub mem: String,
    pub partition: String,
    pub job_name: String,
    /// Directory for SLURM job logs
    pub log_dir: PathBuf,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_parallel: 2,
            cpus_per_task: 4,
            mem: "4G".into(),
            partition: "batch".into(),
            job_name: "dwiprep".into(),
            log_dir: PathBuf::from("logs"),
        }
    }
}
