//! Error taxonomy for one subject's pipeline run
//!
//! Every variant of [`SubjectError`] is fatal for the subject and for the
//! subject only; the dispatcher records it and moves on.

use std::fmt;
use std::io;
use std::path::PathBuf;

use dwiprep_core::ToolError;

use crate::artifact::Artifact;
use crate::layout::InputFile;
use crate::stage::Stage;

/// Fatal failure of one subject's pipeline.
#[derive(Debug)]
pub enum SubjectError {
    /// Subject or session identifier cannot be used to build paths.
    InvalidSubject { id: String, reason: &'static str },
    /// Required raw input is not present in the local BIDS tree.
    InputMissing { input: InputFile, path: PathBuf },
    /// Fetching a raw input from the remote source failed.
    Transfer(TransferError),
    /// Parameter files could not be synthesized from the staged inputs.
    Parameters(ParamError),
    /// An external stage failed; later stages never ran.
    Stage(StageFailure),
    /// Workspace I/O outside any stage.
    Io { context: String, source: io::Error },
}

impl fmt::Display for SubjectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidSubject { id, reason } => write!(f, "invalid identifier {id:?}: {reason}"),
            Self::InputMissing { input, path } => write!(
                f,
                "required input missing: expected {} at {}",
                input.description(),
                path.display()
            ),
            Self::Transfer(e) => write!(f, "transfer failed: {e}"),
            Self::Parameters(e) => write!(f, "parameter synthesis failed: {e}"),
            Self::Stage(e) => write!(f, "{e}"),
            Self::Io { context, source } => write!(f, "{context}: {source}"),
        }
    }
}

impl std::error::Error for SubjectError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Transfer(e) => Some(e),
            Self::Parameters(e) => Some(e),
            Self::Stage(e) => Some(e),
            Self::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<TransferError> for SubjectError {
    fn from(e: TransferError) -> Self {
        Self::Transfer(e)
    }
}

impl From<ParamError> for SubjectError {
    fn from(e: ParamError) -> Self {
        Self::Parameters(e)
    }
}

impl From<StageFailure> for SubjectError {
    fn from(e: StageFailure) -> Self {
        Self::Stage(e)
    }
}

impl SubjectError {
    pub(crate) fn io(context: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// The stage that failed, if the failure came from the sequencer.
    pub fn failed_stage(&self) -> Option<Stage> {
        match self {
            Self::Stage(f) => Some(f.stage),
            _ => None,
        }
    }
}

/// Remote fetch of one raw input failed.
#[derive(Debug)]
pub enum TransferError {
    /// The copy command failed (host unreachable, file absent, permission denied).
    Copy { remote: String, source: ToolError },
    /// The copy reported success but left no file behind.
    Incomplete { remote: String, local: PathBuf },
    /// Local filesystem error while placing the file.
    Io { path: PathBuf, source: io::Error },
}

impl fmt::Display for TransferError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Copy { remote, source } => write!(f, "fetching {remote}: {source}"),
            Self::Incomplete { remote, local } => write!(
                f,
                "fetching {remote}: copy succeeded but {} was not written",
                local.display()
            ),
            Self::Io { path, source } => write!(f, "{}: {source}", path.display()),
        }
    }
}

impl std::error::Error for TransferError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Copy { source, .. } => Some(source),
            Self::Io { source, .. } => Some(source),
            Self::Incomplete { .. } => None,
        }
    }
}

/// An artifact hand-off between stages did not hold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactError {
    /// A stage needs an artifact no earlier step registered.
    Unregistered(Artifact),
    /// The producing tool exited successfully but the file is absent.
    Missing { artifact: Artifact, path: PathBuf },
    /// The file exists but is empty.
    Empty { artifact: Artifact, path: PathBuf },
}

impl fmt::Display for ArtifactError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unregistered(a) => write!(f, "artifact {} was never produced", a.file_name()),
            Self::Missing { artifact, path } => write!(
                f,
                "expected {} at {}, found nothing",
                artifact.file_name(),
                path.display()
            ),
            Self::Empty { artifact, path } => write!(
                f,
                "expected {} at {}, found an empty file",
                artifact.file_name(),
                path.display()
            ),
        }
    }
}

impl std::error::Error for ArtifactError {}

/// Why a stage failed.
#[derive(Debug)]
pub enum StageCause {
    Tool(ToolError),
    Artifact(ArtifactError),
}

impl fmt::Display for StageCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tool(e) => write!(f, "{e}"),
            Self::Artifact(e) => write!(f, "{e}"),
        }
    }
}

impl From<ToolError> for StageCause {
    fn from(e: ToolError) -> Self {
        Self::Tool(e)
    }
}

impl From<ArtifactError> for StageCause {
    fn from(e: ArtifactError) -> Self {
        Self::Artifact(e)
    }
}

/// A stage of the sequencer failed; the sequencer halted there.
#[derive(Debug)]
pub struct StageFailure {
    pub stage: Stage,
    pub cause: StageCause,
}

impl fmt::Display for StageFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stage {} failed: {}", self.stage, self.cause)
    }
}

impl std::error::Error for StageFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self.cause {
            StageCause::Tool(e) => Some(e),
            StageCause::Artifact(e) => Some(e),
        }
    }
}

/// Parameter files could not be derived from the gradient tables.
#[derive(Debug)]
pub enum ParamError {
    Read { path: PathBuf, source: io::Error },
    Write { path: PathBuf, source: io::Error },
    /// Table has the wrong number of rows (bval: 1, bvec: 3).
    RowCount {
        table: String,
        expected: usize,
        found: usize,
    },
    /// Rows of one table disagree on column count.
    Ragged {
        table: String,
        row: usize,
        expected: usize,
        found: usize,
    },
    /// A token is not a finite number.
    Malformed { table: String, token: String },
    /// bval and bvec of the same direction describe different volume counts.
    VolumeMismatch {
        direction: &'static str,
        bvals: usize,
        bvecs: usize,
    },
    /// A direction has no volumes; an index vector would be silently wrong.
    NoVolumes { direction: &'static str },
    /// Concatenating tables with different row counts.
    ShapeMismatch { left: usize, right: usize },
    Artifact(ArtifactError),
}

impl fmt::Display for ParamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Read { path, source } => write!(f, "reading {}: {source}", path.display()),
            Self::Write { path, source } => write!(f, "writing {}: {source}", path.display()),
            Self::RowCount {
                table,
                expected,
                found,
            } => write!(f, "{table}: expected {expected} rows, found {found}"),
            Self::Ragged {
                table,
                row,
                expected,
                found,
            } => write!(
                f,
                "{table}: row {row} has {found} columns, expected {expected}"
            ),
            Self::Malformed { table, token } => {
                write!(f, "{table}: {token:?} is not a finite number")
            }
            Self::VolumeMismatch {
                direction,
                bvals,
                bvecs,
            } => write!(
                f,
                "{direction}: bval lists {bvals} volumes but bvec lists {bvecs}"
            ),
            Self::NoVolumes { direction } => write!(f, "{direction}: no diffusion volumes"),
            Self::ShapeMismatch { left, right } => write!(
                f,
                "cannot concatenate gradient tables with {left} and {right} rows"
            ),
            Self::Artifact(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for ParamError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Read { source, .. } | Self::Write { source, .. } => Some(source),
            Self::Artifact(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ArtifactError> for ParamError {
    fn from(e: ArtifactError) -> Self {
        Self::Artifact(e)
    }
}

/// Protocol constants rejected at startup.
#[derive(Debug, Clone, PartialEq)]
pub enum ProtocolError {
    EchoSpacing(f64),
    EpiFactor(u32),
    BetFraction { name: &'static str, value: f64 },
    EmptyTopupConfig,
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EchoSpacing(v) => write!(f, "echo_spacing_ms must be positive, got {v}"),
            Self::EpiFactor(v) => write!(f, "epi_factor must be at least 2, got {v}"),
            Self::BetFraction { name, value } => {
                write!(f, "{name} must be in (0, 1), got {value}")
            }
            Self::EmptyTopupConfig => write!(f, "topup_config must not be empty"),
        }
    }
}

impl std::error::Error for ProtocolError {}

/// Scanning the BIDS tree for processable subjects failed.
#[derive(Debug)]
pub enum DiscoveryError {
    Pattern(glob::PatternError),
    /// The remote scan over ssh failed.
    Remote(ToolError),
    Read { path: PathBuf, source: io::Error },
    /// The session label cannot be spliced into paths or the scan script.
    InvalidSession(SubjectError),
}

impl fmt::Display for DiscoveryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pattern(e) => write!(f, "invalid subject pattern: {e}"),
            Self::Remote(e) => write!(f, "remote subject scan failed: {e}"),
            Self::Read { path, source } => write!(f, "reading {}: {source}", path.display()),
            Self::InvalidSession(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for DiscoveryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Pattern(e) => Some(e),
            Self::Remote(e) => Some(e),
            Self::Read { source, .. } => Some(source),
            Self::InvalidSession(e) => Some(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_failure_names_stage() {
        let err = StageFailure {
            stage: Stage::EstimateField,
            cause: StageCause::Artifact(ArtifactError::Unregistered(Artifact::AcqParams)),
        };
        let msg = err.to_string();
        assert!(msg.starts_with("stage estimate_field failed"));
        assert!(msg.contains("acqparams.txt"));
    }

    #[test]
    fn input_missing_is_actionable() {
        let err = SubjectError::InputMissing {
            input: InputFile::DwiAp,
            path: PathBuf::from("/bids/sub-01/ses-01/dwi/x.nii.gz"),
        };
        let msg = err.to_string();
        assert!(msg.contains("DWI AP"));
        assert!(msg.contains("/bids/sub-01/ses-01/dwi/x.nii.gz"));
    }

    #[test]
    fn failed_stage_only_for_stage_errors() {
        let stage = SubjectError::Stage(StageFailure {
            stage: Stage::FitTensor,
            cause: StageCause::Tool(ToolError::Interrupted {
                program: "dtifit".into(),
            }),
        });
        assert_eq!(stage.failed_stage(), Some(Stage::FitTensor));
        let params = SubjectError::Parameters(ParamError::NoVolumes { direction: "AP" });
        assert_eq!(params.failed_stage(), None);
    }

    #[test]
    fn protocol_error_messages() {
        assert!(ProtocolError::EpiFactor(1).to_string().contains("at least 2"));
        let e = ProtocolError::BetFraction {
            name: "reference_bet_frac",
            value: 1.5,
        };
        assert!(e.to_string().contains("reference_bet_frac"));
    }
}
