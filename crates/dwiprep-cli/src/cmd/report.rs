//! `dwiprep report` - runs after the array job: summarize and tidy up

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Args;
use dwiprep_dispatch::{StatusDir, SubjectList, SubmissionFiles};
use dwiprep_provenance::DatasetDescription;

use crate::context::AppContext;

#[derive(Args, Debug)]
pub struct ReportArgs {
    /// Subject list the array job ran over
    #[arg(long, env = "DWIPREP_SUBJECTS_LIST")]
    pub subjects_list: PathBuf,

    /// Keep done markers and submission files
    #[arg(long)]
    pub keep: bool,
}

/// Write `dataset_description_{today}.json` into the output directory.
pub fn write_dataset_description(ctx: &AppContext, subjects: Vec<String>) -> Result<PathBuf> {
    let output_dir = ctx.output_dir();
    std::fs::create_dir_all(output_dir)
        .with_context(|| format!("failed to create {}", output_dir.display()))?;
    let today = chrono::Local::now().date_naive();
    DatasetDescription::new(today, ctx.environment(), subjects).write(output_dir, today)
}

/// Split list entries into (done, not done) by marker presence.
fn partition_done(list: &SubjectList, done: &[String]) -> (Vec<String>, Vec<String>) {
    list.subjects()
        .iter()
        .cloned()
        .partition(|s| done.contains(s))
}

pub fn run(args: ReportArgs, ctx: &AppContext) -> Result<()> {
    let list = SubjectList::read(&args.subjects_list)?;
    let status = StatusDir::new(ctx.output_dir());
    let done = status
        .done_subjects()
        .with_context(|| format!("failed to read {}", status.root().display()))?;
    let (processed, missing) = partition_done(&list, &done);

    log::info!("=== Processing Report ===");
    log::info!(
        "Subjects: {}/{} completed",
        processed.len(),
        list.len()
    );
    for subject in &missing {
        log::warn!("[{subject}] no done marker; check its array task log");
    }

    write_dataset_description(ctx, processed)?;

    if args.keep {
        return Ok(());
    }
    status
        .clear()
        .with_context(|| format!("failed to remove {}", status.root().display()))?;
    remove_submission_files(list.path());
    Ok(())
}

fn remove_submission_files(list: &Path) {
    match SubmissionFiles::from_subjects_list(list) {
        Some(files) => {
            let removed = files.remove_all();
            log::info!("Removed {removed} submission files");
        }
        None => log::debug!(
            "{} is not a submission list; leaving it in place",
            list.display()
        ),
    }
}
