//! Named stage artifacts and the per-subject registry of what exists

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::ArtifactError;

/// A file produced in the workspace and consumed by name by a later step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Artifact {
    // Parameter files
    AcqParams,
    IndexVector,
    BvecConcat,
    BvalConcat,
    // merge_references
    MergedReference,
    // estimate_field
    TopupResults,
    TopupMovpar,
    HifiB0,
    // extract_brain_mask
    MeanHifiB0,
    ReferenceBrain,
    ReferenceBrainMask,
    // merge_diffusion
    MergedDwi,
    // eddy_correction
    EddyCorrected,
    EddyRotatedBvecs,
    // register_anatomical
    AnatomicalToDwiXfm,
    AnatomicalBrain,
    AnatomicalBrainMask,
    AnatomicalMaskDwi,
    // expand_mask
    ExpandedMask,
    // fit_tensor
    TensorFit,
    TensorMd,
    TensorV1,
}

impl Artifact {
    /// Written by the parameter synthesizer rather than a tool.
    pub const PARAMETERS: [Artifact; 4] = [
        Self::AcqParams,
        Self::IndexVector,
        Self::BvecConcat,
        Self::BvalConcat,
    ];

    /// Name handed to FSL tools. For images this is the basename without
    /// extension; for topup and dtifit it is the output prefix.
    pub fn stem(self) -> &'static str {
        match self {
            Self::AcqParams => "acqparams.txt",
            Self::IndexVector => "index.txt",
            Self::BvecConcat => "BVEC_concat_APPA.bvec",
            Self::BvalConcat => "BVAL_concat_APPA.bval",
            Self::MergedReference => "sbref_APPA",
            Self::TopupResults => "topup_results",
            Self::TopupMovpar => "topup_results_movpar.txt",
            Self::HifiB0 => "hifi_b0",
            Self::MeanHifiB0 => "mean_hifi_b0",
            Self::ReferenceBrain => "mean_hifi_b0_brain",
            Self::ReferenceBrainMask => "mean_hifi_b0_brain_mask",
            Self::MergedDwi => "alldirections_APPA",
            Self::EddyCorrected => "eddy_corrected_data",
            Self::EddyRotatedBvecs => "eddy_corrected_data.eddy_rotated_bvecs",
            Self::AnatomicalToDwiXfm => "T1w2SBdMRI",
            Self::AnatomicalBrain => "T1w_brain",
            Self::AnatomicalBrainMask => "T1w_brain_mask",
            Self::AnatomicalMaskDwi => "T1w_brain_mask_dMRIres",
            Self::ExpandedMask => "T1w_brain_mask_dMRIres_exp",
            Self::TensorFit => "dti_fit_data",
            Self::TensorMd => "dti_fit_data_MD",
            Self::TensorV1 => "dti_fit_data_V1",
        }
    }

    /// File that proves the artifact exists on disk.
    pub fn file_name(self) -> &'static str {
        match self {
            Self::MergedReference => "sbref_APPA.nii.gz",
            Self::TopupResults => "topup_results_fieldcoef.nii.gz",
            Self::HifiB0 => "hifi_b0.nii.gz",
            Self::MeanHifiB0 => "mean_hifi_b0.nii.gz",
            Self::ReferenceBrain => "mean_hifi_b0_brain.nii.gz",
            Self::ReferenceBrainMask => "mean_hifi_b0_brain_mask.nii.gz",
            Self::MergedDwi => "alldirections_APPA.nii.gz",
            Self::EddyCorrected => "eddy_corrected_data.nii.gz",
            Self::AnatomicalBrain => "T1w_brain.nii.gz",
            Self::AnatomicalBrainMask => "T1w_brain_mask.nii.gz",
            Self::AnatomicalMaskDwi => "T1w_brain_mask_dMRIres.nii.gz",
            Self::ExpandedMask => "T1w_brain_mask_dMRIres_exp.nii.gz",
            Self::TensorFit => "dti_fit_data_FA.nii.gz",
            Self::TensorMd => "dti_fit_data_MD.nii.gz",
            Self::TensorV1 => "dti_fit_data_V1.nii.gz",
            other => other.stem(),
        }
    }
}

/// Artifacts verified to exist in one subject's workspace.
#[derive(Debug, Default)]
pub struct ArtifactRegistry {
    entries: BTreeMap<Artifact, PathBuf>,
}

impl ArtifactRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `artifact` at `path` after checking it is a non-empty file.
    pub fn register(&mut self, artifact: Artifact, path: PathBuf) -> Result<(), ArtifactError> {
        check_non_empty(artifact, &path)?;
        self.entries.insert(artifact, path);
        Ok(())
    }

    /// Path of a previously registered artifact.
    pub fn require(&self, artifact: Artifact) -> Result<&Path, ArtifactError> {
        self.entries
            .get(&artifact)
            .map(PathBuf::as_path)
            .ok_or(ArtifactError::Unregistered(artifact))
    }

    pub fn contains(&self, artifact: Artifact) -> bool {
        self.entries.contains_key(&artifact)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Artifact file exists and has content.
pub fn check_non_empty(artifact: Artifact, path: &Path) -> Result<(), ArtifactError> {
    match std::fs::metadata(path) {
        Ok(m) if m.is_file() && m.len() > 0 => Ok(()),
        Ok(m) if m.is_file() => Err(ArtifactError::Empty {
            artifact,
            path: path.to_path_buf(),
        }),
        _ => Err(ArtifactError::Missing {
            artifact,
            path: path.to_path_buf(),
        }),
    }
}
