//! `dwiprep worker` - one SLURM array task: one subject from the list

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use dwiprep_core::ProgressContext;
use dwiprep_dispatch::{StatusDir, SubjectList, parse_task_id, task_id_from_env};

use crate::context::AppContext;

#[derive(Args, Debug)]
pub struct WorkerArgs {
    /// Subject list written by `dwiprep submit`
    #[arg(long, env = "DWIPREP_SUBJECTS_LIST")]
    pub subjects_list: PathBuf,

    /// 1-indexed position in the list (default: SLURM_ARRAY_TASK_ID)
    #[arg(long)]
    pub task_id: Option<String>,
}

pub fn run(args: WorkerArgs, ctx: &AppContext, progress: &ProgressContext) -> Result<()> {
    let ordinal = match &args.task_id {
        Some(raw) => parse_task_id(raw)?,
        None => task_id_from_env()?,
    };
    let list = SubjectList::read(&args.subjects_list)?;
    let id = list.select(ordinal)?;
    log::info!(
        "task {ordinal}/{}: {id} (from {})",
        list.len(),
        list.path().display()
    );

    let subject = ctx.subject(id)?;
    let pb = progress.subject_line(&subject.to_string());
    let result = ctx.pipeline().process(&subject, &pb);
    pb.finish_and_clear();
    result.with_context(|| format!("task {ordinal} ({subject}) failed"))?;

    let marker = StatusDir::new(ctx.output_dir())
        .mark_done(subject.subject())
        .with_context(|| format!("failed to write done marker for {subject}"))?;
    log::info!("[{subject}] marked done: {}", marker.display());
    Ok(())
}
