//! `dwiprep batch` - many subjects on this machine, K at a time

use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use dwiprep_core::ProgressContext;
use dwiprep_dispatch::{Dispatcher, SubjectList};
use dwiprep_pipeline::ready_subjects;

use crate::cmd::report::write_dataset_description;
use crate::context::AppContext;

#[derive(Args, Debug)]
pub struct BatchArgs {
    /// Subject list (one id per line); discovered from the BIDS tree when omitted
    #[arg(long)]
    pub subjects_list: Option<PathBuf>,

    /// Explicit subject ids, comma-separated
    #[arg(long, value_delimiter = ',', conflicts_with = "subjects_list")]
    pub subjects: Vec<String>,

    /// Subjects in flight at once (default: [dispatch] max_parallel)
    #[arg(short = 'j', long)]
    pub max_parallel: Option<usize>,
}

pub fn run(args: BatchArgs, ctx: &AppContext, progress: &ProgressContext) -> Result<()> {
    let subjects = if !args.subjects.is_empty() {
        args.subjects
    } else if let Some(path) = &args.subjects_list {
        SubjectList::read(path)?.subjects().to_vec()
    } else {
        let entries = ctx.discover(&ctx.config.dispatch.log_dir)?;
        ready_subjects(&entries)
    };

    if subjects.is_empty() {
        log::info!("No subjects to process");
        return Ok(());
    }

    let dispatcher =
        Dispatcher::new(args.max_parallel.unwrap_or(ctx.config.dispatch.max_parallel));
    let pipeline = ctx.pipeline();
    let summary = dispatcher.run(&subjects, progress, |id, pb| {
        let subject = ctx.subject(id).map_err(|e| format!("{e:#}"))?;
        pipeline.process(&subject, pb).map_err(|e| e.to_string())?;
        Ok::<(), String>(())
    })?;
    summary.log();

    if !summary.completed.is_empty() {
        let mut processed = summary.completed.clone();
        processed.sort();
        write_dataset_description(ctx, processed)?;
    }

    if !summary.all_succeeded() {
        anyhow::bail!(
            "{} of {} subjects did not complete",
            summary.failed.len() + summary.skipped.len(),
            summary.total
        );
    }
    Ok(())
}
