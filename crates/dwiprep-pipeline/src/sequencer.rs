//! Strictly ordered execution of the eight stages of one subject

use std::path::{Path, PathBuf};
use std::time::Instant;

use dwiprep_core::{ToolError, ToolRunner, is_shutdown_requested};
use indicatif::ProgressBar;

use crate::artifact::{Artifact, ArtifactRegistry, check_non_empty};
use crate::error::{StageCause, StageFailure};
use crate::layout::Workspace;
use crate::protocol::Protocol;
use crate::stage::{Stage, StageContext, Toolset};
use crate::stager::StagedInputs;
use crate::subject::SubjectSession;

/// Runs the stage list in order and stops at the first failure.
pub struct Sequencer<'a> {
    runner: &'a dyn ToolRunner,
    protocol: &'a Protocol,
    tools: &'a Toolset,
}

impl<'a> Sequencer<'a> {
    pub fn new(runner: &'a dyn ToolRunner, protocol: &'a Protocol, tools: &'a Toolset) -> Self {
        Self {
            runner,
            protocol,
            tools,
        }
    }

    /// Run every stage. `registry` must already hold the parameter files.
    pub fn run(
        &self,
        subject: &SubjectSession,
        ws: &Workspace,
        inputs: &StagedInputs,
        registry: &mut ArtifactRegistry,
        pb: &ProgressBar,
    ) -> Result<(), StageFailure> {
        let ctx = StageContext {
            workspace: ws,
            inputs,
            protocol: self.protocol,
            tools: self.tools,
        };
        for stage in Stage::ALL {
            if is_shutdown_requested() {
                return Err(StageFailure {
                    stage,
                    cause: StageCause::Tool(ToolError::Interrupted {
                        program: stage.label().to_string(),
                    }),
                });
            }
            pb.set_message(format!("{stage} ({}/{})", stage.position(), Stage::ALL.len()));
            let start = Instant::now();
            self.run_stage(stage, &ctx, registry)
                .map_err(|cause| StageFailure { stage, cause })?;
            log::info!(
                "[{subject}] {stage} done in {:.1}s",
                start.elapsed().as_secs_f64()
            );
        }
        Ok(())
    }

    fn run_stage(
        &self,
        stage: Stage,
        ctx: &StageContext<'_>,
        registry: &mut ArtifactRegistry,
    ) -> Result<(), StageCause> {
        for artifact in stage.consumes() {
            registry.require(*artifact)?;
        }

        let commands = stage.commands(ctx);
        let multi = commands.len() > 1;
        for (i, invocation) in commands.iter().enumerate() {
            let log_path = stage_log_path(ctx.workspace.logs_dir(), stage, multi.then_some(i + 1));
            log::debug!("{invocation}");
            self.runner.run(invocation, &log_path)?;
        }

        for artifact in stage.produces() {
            registry.register(*artifact, ctx.workspace.file(*artifact))?;
        }
        Ok(())
    }
}

/// `{logs}/{stage}.log`, or `{stage}-{n}.log` for stages with several commands.
pub fn stage_log_path(logs: &Path, stage: Stage, step: Option<usize>) -> PathBuf {
    match step {
        Some(n) => logs.join(format!("{}-{n}.log", stage.label())),
        None => logs.join(format!("{}.log", stage.label())),
    }
}

/// The final FA map exists and is non-empty. Gates cleanup of staged inputs.
pub fn fit_completed(ws: &Workspace) -> bool {
    check_non_empty(Artifact::TensorFit, &ws.file(Artifact::TensorFit)).is_ok()
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::sync::Mutex;

    use dwiprep_core::ToolInvocation;

    use super::*;
    use crate::layout::Layout;

    /// Writes every artifact of the invoking stage; fails on request.
    struct ScriptedRunner {
        ws: Workspace,
        fail_at: Option<Stage>,
        skip_output: Option<Artifact>,
        calls: Mutex<Vec<(Stage, PathBuf)>>,
    }

    impl ScriptedRunner {
        fn new(ws: Workspace) -> Self {
            Self {
                ws,
                fail_at: None,
                skip_output: None,
                calls: Mutex::new(Vec::new()),
            }
        }

        fn stages(&self) -> Vec<Stage> {
            let mut v: Vec<Stage> = self.calls.lock().unwrap().iter().map(|c| c.0).collect();
            v.dedup();
            v
        }
    }

    impl ToolRunner for ScriptedRunner {
        fn run(&self, inv: &ToolInvocation, log_path: &Path) -> Result<(), ToolError> {
            let stage = Stage::from_label(&inv.label).unwrap();
            self.calls
                .lock()
                .unwrap()
                .push((stage, log_path.to_path_buf()));
            if self.fail_at == Some(stage) {
                return Err(ToolError::Failed {
                    program: inv.program.clone(),
                    code: Some(1),
                    log_tail: String::new(),
                });
            }
            for a in stage.produces() {
                if Some(*a) != self.skip_output {
                    fs::write(self.ws.file(*a), b"img").unwrap();
                }
            }
            Ok(())
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        subject: SubjectSession,
        ws: Workspace,
        inputs: StagedInputs,
        registry: ArtifactRegistry,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let layout = Layout::new(dir.path().join("bids"), dir.path().join("out"));
        let subject = SubjectSession::new("sub-01", "ses-01").unwrap();
        let ws = layout.workspace(&subject);
        fs::create_dir_all(ws.root()).unwrap();
        let mut registry = ArtifactRegistry::new();
        for a in Artifact::PARAMETERS {
            fs::write(ws.file(a), b"param").unwrap();
            registry.register(a, ws.file(a)).unwrap();
        }
        let inputs = StagedInputs::in_place(&layout, &subject);
        Fixture {
            _dir: dir,
            subject,
            ws,
            inputs,
            registry,
        }
    }

    fn run(f: &mut Fixture, runner: &ScriptedRunner) -> Result<(), StageFailure> {
        let protocol = Protocol::default();
        let tools = Toolset::default();
        Sequencer::new(runner, &protocol, &tools).run(
            &f.subject,
            &f.ws,
            &f.inputs,
            &mut f.registry,
            &ProgressBar::hidden(),
        )
    }

    #[test]
    fn runs_all_stages_in_order() {
        let mut f = fixture();
        let runner = ScriptedRunner::new(f.ws.clone());
        run(&mut f, &runner).unwrap();
        assert_eq!(runner.stages(), Stage::ALL.to_vec());
        assert!(fit_completed(&f.ws));
        assert!(f.registry.contains(Artifact::ExpandedMask));
    }

    #[test]
    fn halts_at_first_failure() {
        let mut f = fixture();
        let mut runner = ScriptedRunner::new(f.ws.clone());
        runner.fail_at = Some(Stage::EstimateField);
        let err = run(&mut f, &runner).unwrap_err();
        assert_eq!(err.stage, Stage::EstimateField);
        assert!(matches!(err.cause, StageCause::Tool(ToolError::Failed { .. })));
        assert_eq!(
            runner.stages(),
            vec![Stage::MergeReferences, Stage::EstimateField]
        );
        assert!(!fit_completed(&f.ws));
    }

    #[test]
    fn missing_output_fails_stage_despite_success() {
        let mut f = fixture();
        let mut runner = ScriptedRunner::new(f.ws.clone());
        runner.skip_output = Some(Artifact::ReferenceBrainMask);
        let err = run(&mut f, &runner).unwrap_err();
        assert_eq!(err.stage, Stage::ExtractBrainMask);
        assert!(matches!(
            err.cause,
            StageCause::Artifact(crate::error::ArtifactError::Missing {
                artifact: Artifact::ReferenceBrainMask,
                ..
            })
        ));
        assert!(!runner.stages().contains(&Stage::MergeDiffusion));
    }

    #[test]
    fn unregistered_parameters_block_topup() {
        let mut f = fixture();
        f.registry = ArtifactRegistry::new();
        let runner = ScriptedRunner::new(f.ws.clone());
        let err = run(&mut f, &runner).unwrap_err();
        assert_eq!(err.stage, Stage::EstimateField);
        assert_eq!(runner.stages(), vec![Stage::MergeReferences]);
    }

    #[test]
    fn multi_command_stages_get_numbered_logs() {
        let mut f = fixture();
        let runner = ScriptedRunner::new(f.ws.clone());
        run(&mut f, &runner).unwrap();
        let logs: Vec<String> = runner
            .calls
            .lock()
            .unwrap()
            .iter()
            .map(|(_, p)| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert!(logs.contains(&"estimate_field.log".to_string()));
        assert!(logs.contains(&"register_anatomical-3.log".to_string()));
        assert_eq!(logs.len(), 11);
    }

    #[test]
    fn empty_fa_is_not_completed() {
        let f = fixture();
        fs::write(f.ws.file(Artifact::TensorFit), b"").unwrap();
        assert!(!fit_completed(&f.ws));
    }
}
