//! The fixed stage list and the FSL command lines of each stage

use std::fmt;
use std::time::Duration;

use dwiprep_core::ToolInvocation;
use serde::{Deserialize, Serialize};

use crate::artifact::Artifact;
use crate::layout::{InputFile, Workspace};
use crate::protocol::Protocol;
use crate::stager::StagedInputs;

/// External tool binaries. Names are resolved on the FSL-prefixed `PATH`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Toolset {
    pub fslmerge: String,
    pub topup: String,
    pub fslmaths: String,
    pub bet: String,
    pub eddy: String,
    pub flirt: String,
    pub dtifit: String,
    pub scp: String,
    pub ssh: String,
    /// Per-command wall-clock limit in seconds; 0 disables it
    pub timeout_secs: u64,
}

impl Default for Toolset {
    fn default() -> Self {
        Self {
            fslmerge: "fslmerge".into(),
            topup: "topup".into(),
            fslmaths: "fslmaths".into(),
            bet: "bet".into(),
            eddy: "eddy_openmp".into(),
            flirt: "flirt".into(),
            dtifit: "dtifit".into(),
            scp: "scp".into(),
            ssh: "ssh".into(),
            timeout_secs: 0,
        }
    }
}

impl Toolset {
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs))
    }
}

/// Everything a stage needs to render its command lines.
pub struct StageContext<'a> {
    pub workspace: &'a Workspace,
    pub inputs: &'a StagedInputs,
    pub protocol: &'a Protocol,
    pub tools: &'a Toolset,
}

/// One step of the pipeline, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Stage {
    MergeReferences,
    EstimateField,
    ExtractBrainMask,
    MergeDiffusion,
    EddyCorrection,
    RegisterAnatomical,
    ExpandMask,
    FitTensor,
}

impl Stage {
    pub const ALL: [Stage; 8] = [
        Self::MergeReferences,
        Self::EstimateField,
        Self::ExtractBrainMask,
        Self::MergeDiffusion,
        Self::EddyCorrection,
        Self::RegisterAnatomical,
        Self::ExpandMask,
        Self::FitTensor,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Self::MergeReferences => "merge_references",
            Self::EstimateField => "estimate_field",
            Self::ExtractBrainMask => "extract_brain_mask",
            Self::MergeDiffusion => "merge_diffusion",
            Self::EddyCorrection => "eddy_correction",
            Self::RegisterAnatomical => "register_anatomical",
            Self::ExpandMask => "expand_mask",
            Self::FitTensor => "fit_tensor",
        }
    }

    pub fn from_label(label: &str) -> Option<Stage> {
        Self::ALL.into_iter().find(|s| s.label() == label)
    }

    /// 1-based position in the pipeline.
    pub fn position(self) -> usize {
        self as usize + 1
    }

    /// Artifacts that must be registered before the stage starts.
    pub fn consumes(self) -> &'static [Artifact] {
        use Artifact::*;
        match self {
            Self::MergeReferences | Self::MergeDiffusion => &[],
            Self::EstimateField => &[MergedReference, AcqParams],
            Self::ExtractBrainMask => &[HifiB0],
            Self::EddyCorrection => &[
                MergedDwi,
                ReferenceBrainMask,
                AcqParams,
                IndexVector,
                BvecConcat,
                BvalConcat,
                TopupResults,
            ],
            Self::RegisterAnatomical => &[MeanHifiB0],
            Self::ExpandMask => &[AnatomicalMaskDwi],
            Self::FitTensor => &[EddyCorrected, ExpandedMask, EddyRotatedBvecs, BvalConcat],
        }
    }

    /// Artifacts the stage must leave behind, non-empty.
    pub fn produces(self) -> &'static [Artifact] {
        use Artifact::*;
        match self {
            Self::MergeReferences => &[MergedReference],
            Self::EstimateField => &[TopupResults, TopupMovpar, HifiB0],
            Self::ExtractBrainMask => &[MeanHifiB0, ReferenceBrain, ReferenceBrainMask],
            Self::MergeDiffusion => &[MergedDwi],
            Self::EddyCorrection => &[EddyCorrected, EddyRotatedBvecs],
            Self::RegisterAnatomical => &[
                AnatomicalToDwiXfm,
                AnatomicalBrain,
                AnatomicalBrainMask,
                AnatomicalMaskDwi,
            ],
            Self::ExpandMask => &[ExpandedMask],
            Self::FitTensor => &[TensorFit, TensorMd, TensorV1],
        }
    }

    /// Commands run in order; each is labelled with the stage label.
    pub fn commands(self, ctx: &StageContext<'_>) -> Vec<ToolInvocation> {
        let ws = ctx.workspace;
        let t = ctx.tools;
        let p = ctx.protocol;
        let label = self.label();
        let cmd = |program: &str| ToolInvocation::new(label, program);
        let raw = |input: InputFile| ctx.inputs.get(input);

        match self {
            Self::MergeReferences => vec![cmd(&t.fslmerge)
                .arg("-t")
                .path(&ws.stem(Artifact::MergedReference))
                .path(raw(InputFile::FieldmapAp))
                .path(raw(InputFile::FieldmapPa))],

            Self::EstimateField => vec![cmd(&t.topup)
                .flag_path("--imain", &ws.stem(Artifact::MergedReference))
                .flag_path("--datain", &ws.file(Artifact::AcqParams))
                .arg(format!("--config={}", p.topup_config))
                .flag_path("--out", &ws.stem(Artifact::TopupResults))
                .flag_path("--iout", &ws.stem(Artifact::HifiB0))],

            Self::ExtractBrainMask => vec![
                cmd(&t.fslmaths)
                    .path(&ws.stem(Artifact::HifiB0))
                    .arg("-Tmean")
                    .path(&ws.stem(Artifact::MeanHifiB0)),
                cmd(&t.bet)
                    .path(&ws.stem(Artifact::MeanHifiB0))
                    .path(&ws.stem(Artifact::ReferenceBrain))
                    .arg("-f")
                    .arg(p.reference_bet_frac.to_string())
                    .arg("-m"),
            ],

            Self::MergeDiffusion => vec![cmd(&t.fslmerge)
                .arg("-t")
                .path(&ws.stem(Artifact::MergedDwi))
                .path(raw(InputFile::DwiAp))
                .path(raw(InputFile::DwiPa))],

            Self::EddyCorrection => {
                let mut eddy = cmd(&t.eddy)
                    .flag_path("--imain", &ws.stem(Artifact::MergedDwi))
                    .flag_path("--mask", &ws.stem(Artifact::ReferenceBrainMask))
                    .flag_path("--acqp", &ws.file(Artifact::AcqParams))
                    .flag_path("--index", &ws.file(Artifact::IndexVector))
                    .flag_path("--bvecs", &ws.file(Artifact::BvecConcat))
                    .flag_path("--bvals", &ws.file(Artifact::BvalConcat))
                    .flag_path("--topup", &ws.stem(Artifact::TopupResults));
                if p.replace_outliers {
                    eddy = eddy.arg("--repol");
                }
                vec![eddy.flag_path("--out", &ws.stem(Artifact::EddyCorrected))]
            }

            Self::RegisterAnatomical => vec![
                cmd(&t.flirt)
                    .arg("-ref")
                    .path(&ws.stem(Artifact::MeanHifiB0))
                    .arg("-in")
                    .path(raw(InputFile::T1w))
                    .arg("-omat")
                    .path(&ws.file(Artifact::AnatomicalToDwiXfm)),
                cmd(&t.bet)
                    .path(raw(InputFile::T1w))
                    .path(&ws.stem(Artifact::AnatomicalBrain))
                    .arg("-f")
                    .arg(p.anatomical_bet_frac.to_string())
                    .arg("-m")
                    .arg("-R")
                    .arg("-B"),
                cmd(&t.flirt)
                    .arg("-in")
                    .path(&ws.stem(Artifact::AnatomicalBrainMask))
                    .arg("-ref")
                    .path(&ws.stem(Artifact::MeanHifiB0))
                    .arg("-applyxfm")
                    .arg("-init")
                    .path(&ws.file(Artifact::AnatomicalToDwiXfm))
                    .arg("-out")
                    .path(&ws.stem(Artifact::AnatomicalMaskDwi)),
            ],

            // -kernel must precede the dilation it configures
            Self::ExpandMask => vec![cmd(&t.fslmaths)
                .path(&ws.stem(Artifact::AnatomicalMaskDwi))
                .arg("-kernel")
                .arg("3D")
                .arg("-dilD")
                .path(&ws.stem(Artifact::ExpandedMask))],

            Self::FitTensor => vec![cmd(&t.dtifit)
                .arg("-k")
                .path(&ws.stem(Artifact::EddyCorrected))
                .arg("-o")
                .path(&ws.stem(Artifact::TensorFit))
                .arg("-m")
                .path(&ws.stem(Artifact::ExpandedMask))
                .arg("-r")
                .path(&ws.file(Artifact::EddyRotatedBvecs))
                .arg("-b")
                .path(&ws.file(Artifact::BvalConcat))],
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
