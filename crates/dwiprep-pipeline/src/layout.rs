//! Path resolution for every file the pipeline touches.
//!
//! All subject/session templating lives in [`Layout::path`]; the stager,
//! synthesizer, sequencer and discovery code never build paths themselves.
//!
//! ```text
//! {bids_root}/{sub}/{ses}/{dwi,fmap,anat}/{sub}_{ses}_...   raw source
//! {output_root}/{sub}_{ses}/                               workspace
//! ├── raw/{dwi,fmap,anat}/...                              staged copies (remote mode)
//! ├── logs/{stage}.log                                     tool output
//! ├── acqparams.txt, index.txt, *_concat_APPA.*            parameter files
//! ├── sbref_APPA.nii.gz, hifi_b0.nii.gz, ...               stage artifacts
//! └── manifest.json
//! ```

use std::fmt;
use std::path::{Path, PathBuf};

use crate::artifact::Artifact;
use crate::subject::SubjectSession;

/// Raw-input modality directory in a BIDS session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Modality {
    Diffusion,
    Fieldmap,
    Anatomical,
}

impl Modality {
    pub const ALL: [Modality; 3] = [Self::Diffusion, Self::Fieldmap, Self::Anatomical];

    pub fn dir_name(self) -> &'static str {
        match self {
            Self::Diffusion => "dwi",
            Self::Fieldmap => "fmap",
            Self::Anatomical => "anat",
        }
    }
}

/// One of the required raw input files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum InputFile {
    FieldmapAp,
    FieldmapPa,
    DwiAp,
    DwiPa,
    BvalAp,
    BvalPa,
    BvecAp,
    BvecPa,
    T1w,
}

impl InputFile {
    pub const ALL: [InputFile; 9] = [
        Self::FieldmapAp,
        Self::FieldmapPa,
        Self::DwiAp,
        Self::DwiPa,
        Self::BvalAp,
        Self::BvalPa,
        Self::BvecAp,
        Self::BvecPa,
        Self::T1w,
    ];

    /// Images whose presence decides whether a subject is processable.
    pub const KEY_IMAGES: [InputFile; 5] = [
        Self::DwiAp,
        Self::DwiPa,
        Self::FieldmapAp,
        Self::FieldmapPa,
        Self::T1w,
    ];

    pub fn modality(self) -> Modality {
        match self {
            Self::FieldmapAp | Self::FieldmapPa => Modality::Fieldmap,
            Self::T1w => Modality::Anatomical,
            _ => Modality::Diffusion,
        }
    }

    /// Human label used in logs and errors.
    pub fn description(self) -> &'static str {
        match self {
            Self::FieldmapAp => "FMAP AP",
            Self::FieldmapPa => "FMAP PA",
            Self::DwiAp => "DWI AP",
            Self::DwiPa => "DWI PA",
            Self::BvalAp => "BVAL AP",
            Self::BvalPa => "BVAL PA",
            Self::BvecAp => "BVEC AP",
            Self::BvecPa => "BVEC PA",
            Self::T1w => "T1w",
        }
    }

    /// BIDS file name for this subject/session.
    pub fn file_name(self, s: &SubjectSession) -> String {
        self.name_for(s.subject(), s.session())
    }

    /// BIDS file name from raw identifiers (also used to template shell scripts).
    pub fn name_for(self, sub: &str, ses: &str) -> String {
        match self {
            Self::FieldmapAp => format!("{sub}_{ses}_acq-dwisefm_dir-ap_run-01_epi.nii.gz"),
            Self::FieldmapPa => format!("{sub}_{ses}_acq-dwisefm_dir-pa_run-01_epi.nii.gz"),
            Self::DwiAp => format!("{sub}_{ses}_dir-ap_run-01_dwi.nii.gz"),
            Self::DwiPa => format!("{sub}_{ses}_dir-pa_run-01_dwi.nii.gz"),
            Self::BvalAp => format!("{sub}_{ses}_dir-ap_run-01_dwi.bval"),
            Self::BvalPa => format!("{sub}_{ses}_dir-pa_run-01_dwi.bval"),
            Self::BvecAp => format!("{sub}_{ses}_dir-ap_run-01_dwi.bvec"),
            Self::BvecPa => format!("{sub}_{ses}_dir-pa_run-01_dwi.bvec"),
            Self::T1w => format!("{sub}_{ses}_run-01_T1w.nii.gz"),
        }
    }
}

impl fmt::Display for InputFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// What a path is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathKind {
    /// Raw input in the BIDS tree (local, or on the remote host).
    Source(InputFile),
    /// Local staged copy of a raw input.
    Staged(InputFile),
    /// Staging directory of one modality.
    StagingDir(Modality),
    /// Parent of all staging directories.
    StagingRoot,
    /// Subject workspace.
    Workspace,
    /// Tool output logs.
    Logs,
    /// On-disk file of an artifact.
    Artifact(Artifact),
    /// Name handed to FSL tools (without the image extension).
    ArtifactStem(Artifact),
}

/// Root directories of one deployment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    bids_root: PathBuf,
    output_root: PathBuf,
}

impl Layout {
    pub fn new(bids_root: impl Into<PathBuf>, output_root: impl Into<PathBuf>) -> Self {
        Self {
            bids_root: bids_root.into(),
            output_root: output_root.into(),
        }
    }

    pub fn bids_root(&self) -> &Path {
        &self.bids_root
    }

    pub fn output_root(&self) -> &Path {
        &self.output_root
    }

    /// Canonical path of `kind` for subject `s`.
    pub fn path(&self, s: &SubjectSession, kind: PathKind) -> PathBuf {
        let workspace = self.output_root.join(s.key());
        match kind {
            PathKind::Source(input) => self
                .bids_root
                .join(s.subject())
                .join(s.session())
                .join(input.modality().dir_name())
                .join(input.file_name(s)),
            PathKind::Staged(input) => self
                .path(s, PathKind::StagingDir(input.modality()))
                .join(input.file_name(s)),
            PathKind::StagingDir(m) => workspace.join("raw").join(m.dir_name()),
            PathKind::StagingRoot => workspace.join("raw"),
            PathKind::Workspace => workspace,
            PathKind::Logs => workspace.join("logs"),
            PathKind::Artifact(a) => workspace.join(a.file_name()),
            PathKind::ArtifactStem(a) => workspace.join(a.stem()),
        }
    }

    pub fn workspace(&self, s: &SubjectSession) -> Workspace {
        Workspace {
            root: self.path(s, PathKind::Workspace),
            logs: self.path(s, PathKind::Logs),
        }
    }
}

/// The directory holding one subject's artifacts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workspace {
    root: PathBuf,
    logs: PathBuf,
}

impl Workspace {
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn logs_dir(&self) -> &Path {
        &self.logs
    }

    pub fn file(&self, a: Artifact) -> PathBuf {
        self.root.join(a.file_name())
    }

    pub fn stem(&self, a: Artifact) -> PathBuf {
        self.root.join(a.stem())
    }
}
