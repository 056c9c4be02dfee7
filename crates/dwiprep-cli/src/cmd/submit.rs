//! `dwiprep submit` - discover subjects and hand them to SLURM as an array job

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Args;
use dwiprep_dispatch::slurm::{self, TIMESTAMP_FORMAT};
use dwiprep_dispatch::{ArrayJob, SubjectList, SubmissionFiles, WorkerCommand};
use dwiprep_pipeline::ready_subjects;

use crate::context::AppContext;

#[derive(Args, Debug)]
pub struct SubmitArgs {
    /// Write the subject list and array script without calling sbatch
    #[arg(long)]
    pub dry_run: bool,

    /// Directory for the subject list and job scripts
    #[arg(long, default_value = ".")]
    pub dir: PathBuf,

    /// Concurrent array tasks (default: [dispatch] max_parallel)
    #[arg(short = 'j', long)]
    pub max_parallel: Option<usize>,
}

fn create_dir(path: &Path) -> Result<PathBuf> {
    fs::create_dir_all(path).with_context(|| format!("failed to create {}", path.display()))?;
    fs::canonicalize(path).with_context(|| format!("failed to resolve {}", path.display()))
}

pub fn run(args: SubmitArgs, ctx: &AppContext, config_path: Option<&Path>) -> Result<()> {
    let mut dispatch = ctx.config.dispatch.clone();
    if let Some(k) = args.max_parallel {
        dispatch.max_parallel = k.max(1);
    }

    let entries = ctx.discover(&dispatch.log_dir)?;
    let subjects = ready_subjects(&entries);
    log::info!(
        "{} of {} subjects need processing",
        subjects.len(),
        entries.len()
    );
    if subjects.is_empty() {
        log::info!("Nothing to submit");
        return Ok(());
    }

    let dir = create_dir(&args.dir)?;
    create_dir(&dispatch.log_dir)?;
    let timestamp = chrono::Local::now().format(TIMESTAMP_FORMAT).to_string();
    let files = SubmissionFiles::new(&dir, &timestamp);
    SubjectList::write(&files.subjects_list, &subjects)
        .with_context(|| format!("failed to write {}", files.subjects_list.display()))?;

    let config = config_path
        .map(|p| fs::canonicalize(p).with_context(|| format!("failed to resolve {}", p.display())))
        .transpose()?;
    let worker = WorkerCommand {
        program: std::env::current_exe().context("cannot locate the dwiprep executable")?,
        config,
        session: ctx.session.clone(),
    };
    let job = ArrayJob {
        config: &dispatch,
        files,
        count: subjects.len(),
        worker,
    };
    let array_script = job.write_array_script()?;

    if args.dry_run {
        log::info!("Dry run: wrote {}", job.files.subjects_list.display());
        log::info!("Dry run: wrote {}", array_script.display());
        return Ok(());
    }

    let array_id = slurm::submit(array_script)?;
    log::info!(
        "Submitted array job {array_id}: {} subjects, at most {} at once",
        job.count,
        dispatch.max_parallel
    );

    let report_script = job.write_report_script(&array_id)?;
    let report_id = slurm::submit(report_script)
        .with_context(|| format!("array job {array_id} is queued but the report job failed"))?;
    log::info!("Submitted report job {report_id} (runs after {array_id})");
    Ok(())
}
