//! One subject end to end: stage, synthesize, sequence, record, clean up

use std::fs;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use dwiprep_core::ToolRunner;
use dwiprep_provenance::{RunEnvironment, SubjectManifest};
use indicatif::ProgressBar;

use crate::artifact::{Artifact, ArtifactRegistry};
use crate::error::SubjectError;
use crate::layout::{Layout, Workspace};
use crate::params;
use crate::protocol::Protocol;
use crate::sequencer::{Sequencer, fit_completed};
use crate::stage::Toolset;
use crate::stager::{self, Fetch, InputSource};
use crate::subject::SubjectSession;

/// Outputs recorded in the subject manifest.
const MANIFEST_ARTIFACTS: [Artifact; 7] = [
    Artifact::TensorFit,
    Artifact::TensorMd,
    Artifact::TensorV1,
    Artifact::EddyCorrected,
    Artifact::EddyRotatedBvecs,
    Artifact::ExpandedMask,
    Artifact::BvalConcat,
];

/// Result of a successful subject run.
#[derive(Debug)]
pub struct SubjectOutcome {
    pub subject: SubjectSession,
    /// Raw files copied from the remote host
    pub fetched: usize,
    /// Staged raw inputs were deleted
    pub cleaned_up: bool,
    pub manifest: Option<PathBuf>,
    pub elapsed: Duration,
}

/// Shared, read-only configuration for processing any number of subjects.
pub struct SubjectPipeline<'a> {
    layout: &'a Layout,
    protocol: &'a Protocol,
    tools: &'a Toolset,
    runner: &'a dyn ToolRunner,
    fetcher: Option<&'a dyn Fetch>,
    environment: Option<&'a RunEnvironment>,
}

impl<'a> SubjectPipeline<'a> {
    pub fn new(
        layout: &'a Layout,
        protocol: &'a Protocol,
        tools: &'a Toolset,
        runner: &'a dyn ToolRunner,
    ) -> Self {
        Self {
            layout,
            protocol,
            tools,
            runner,
            fetcher: None,
            environment: None,
        }
    }

    /// Stage inputs from a remote host instead of reading the BIDS tree in place.
    pub fn with_fetcher(mut self, fetcher: &'a dyn Fetch) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    /// Write a provenance manifest after a successful fit.
    pub fn with_environment(mut self, env: &'a RunEnvironment) -> Self {
        self.environment = Some(env);
        self
    }

    /// Run the whole pipeline for `subject`.
    ///
    /// Any error leaves the workspace as it is for inspection; staged inputs
    /// are only removed after the final FA map has been verified.
    pub fn process(
        &self,
        subject: &SubjectSession,
        pb: &ProgressBar,
    ) -> Result<SubjectOutcome, SubjectError> {
        let start = Instant::now();
        let ws = self.layout.workspace(subject);
        fs::create_dir_all(ws.logs_dir())
            .map_err(|e| SubjectError::io(format!("creating {}", ws.logs_dir().display()), e))?;

        pb.set_message("staging inputs");
        let source = match self.fetcher {
            Some(f) => InputSource::Remote(f),
            None => InputSource::Local,
        };
        let inputs = stager::stage_inputs(self.layout, subject, source)?;
        if inputs.fetched() > 0 {
            log::info!("[{subject}] fetched {} raw files", inputs.fetched());
        }

        pb.set_message("writing parameters");
        let counts = params::synthesize(&ws, &inputs, self.protocol)?;
        log::info!(
            "[{subject}] {} volumes (AP {}, PA {})",
            counts.total(),
            counts.ap,
            counts.pa
        );
        let mut registry = ArtifactRegistry::new();
        for a in Artifact::PARAMETERS {
            registry
                .register(a, ws.file(a))
                .map_err(crate::error::ParamError::from)?;
        }

        Sequencer::new(self.runner, self.protocol, self.tools).run(
            subject,
            &ws,
            &inputs,
            &mut registry,
            pb,
        )?;

        let manifest = self.environment.and_then(|env| {
            pb.set_message("writing manifest");
            match write_manifest(subject, &ws, env) {
                Ok(path) => Some(path),
                Err(e) => {
                    log::warn!("[{subject}] manifest not written: {e:#}");
                    None
                }
            }
        });

        let cleaned_up = inputs.is_staged() && fit_completed(&ws) && {
            pb.set_message("cleaning up");
            match stager::remove_staged(self.layout, subject) {
                Ok(()) => true,
                Err(e) => {
                    log::warn!("[{subject}] could not remove staged inputs: {e}");
                    false
                }
            }
        };

        let elapsed = start.elapsed();
        log::info!(
            "[{subject}] completed in {:.1} min",
            elapsed.as_secs_f64() / 60.0
        );
        Ok(SubjectOutcome {
            subject: subject.clone(),
            fetched: inputs.fetched(),
            cleaned_up,
            manifest,
            elapsed,
        })
    }
}

fn write_manifest(
    subject: &SubjectSession,
    ws: &Workspace,
    env: &RunEnvironment,
) -> anyhow::Result<PathBuf> {
    let files: Vec<PathBuf> = MANIFEST_ARTIFACTS.iter().map(|a| ws.file(*a)).collect();
    let manifest = SubjectManifest::build(subject.subject(), subject.session(), env, &files)?;
    manifest.write_to(ws.root())
}
