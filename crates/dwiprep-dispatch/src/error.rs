//! Dispatch-level errors. Per-subject failures are not errors here; they
//! end up in [`BatchSummary`](crate::BatchSummary).

use std::fmt;
use std::io;
use std::path::PathBuf;

#[derive(Debug)]
pub enum DispatchError {
    /// Subject list could not be read.
    Unreadable { path: PathBuf, source: io::Error },
    /// Subject list has no non-blank lines.
    EmptyList { path: PathBuf },
    /// 1-based ordinal outside `1..=len`.
    OrdinalOutOfRange { ordinal: usize, len: usize },
    /// Array task id is not a positive integer.
    InvalidTaskId(String),
    /// Array task id variable is not set.
    MissingTaskId(&'static str),
    /// Worker thread pool could not be built.
    Pool(rayon::ThreadPoolBuildError),
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unreadable { path, source } => {
                write!(f, "cannot read subject list {}: {source}", path.display())
            }
            Self::EmptyList { path } => write!(f, "subject list {} is empty", path.display()),
            Self::OrdinalOutOfRange { ordinal, len } => write!(
                f,
                "task {ordinal} is out of range: subject list has {len} entries (1..={len})"
            ),
            Self::InvalidTaskId(raw) => write!(f, "invalid array task id {raw:?}"),
            Self::MissingTaskId(var) => write!(f, "{var} is not set; is this running as an array task?"),
            Self::Pool(e) => write!(f, "failed to create worker pool: {e}"),
        }
    }
}

impl std::error::Error for DispatchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Unreadable { source, .. } => Some(source),
            Self::Pool(e) => Some(e),
            _ => None,
        }
    }
}
