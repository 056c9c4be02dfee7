//! dwiprep-pipeline: the fixed per-subject DWI preprocessing pipeline
//!
//! Stages raw BIDS inputs, synthesizes the FSL parameter files
//! (acquisition table, index vector, concatenated gradient tables) and
//! drives the external tools in their fixed order:
//!
//! ```text
//! merge_references → estimate_field → extract_brain_mask → merge_diffusion
//!   → eddy_correction → register_anatomical → expand_mask → fit_tensor
//! ```
//!
//! Stages hand artifacts to each other by file name inside the subject
//! workspace; [`ArtifactRegistry`] checks each hand-off on disk.
//!
//! # Example
//!
//! ```ignore
//! use dwiprep_pipeline::{Layout, Protocol, SubjectPipeline, SubjectSession, Toolset};
//!
//! let layout = Layout::new("/data/BIDS", "/data/derivatives");
//! let pipeline = SubjectPipeline::new(&layout, &protocol, &tools, &runner);
//! let outcome = pipeline.process(&SubjectSession::new("sub-01", "ses-01")?, &pb)?;
//! ```

pub mod artifact;
pub mod discovery;
pub mod error;
pub mod layout;
pub mod params;
pub mod protocol;
pub mod runner;
pub mod sequencer;
pub mod stage;
pub mod stager;
pub mod subject;

pub use artifact::{Artifact, ArtifactRegistry};
pub use discovery::{ScanEntry, ScanStatus, ready_subjects, scan_local, scan_remote};
pub use error::{
    ArtifactError, DiscoveryError, ParamError, ProtocolError, StageCause, StageFailure,
    SubjectError, TransferError,
};
pub use layout::{InputFile, Layout, Modality, PathKind, Workspace};
pub use protocol::Protocol;
pub use runner::{SubjectOutcome, SubjectPipeline};
pub use sequencer::{Sequencer, fit_completed};
pub use stage::{Stage, StageContext, Toolset};
pub use stager::{Fetch, InputSource, RemoteFetcher, StagedInputs, stage_inputs};
pub use subject::{SubjectSession, validate_session};
