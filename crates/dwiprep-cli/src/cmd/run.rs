//! `dwiprep run` - process one subject in the foreground

use anyhow::Result;
use clap::Args;
use dwiprep_core::ProgressContext;

use crate::context::AppContext;

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Subject id (e.g. sub-01)
    pub subject: String,
}

pub fn run(args: RunArgs, ctx: &AppContext, progress: &ProgressContext) -> Result<()> {
    let subject = ctx.subject(&args.subject)?;
    let pb = progress.subject_line(&subject.to_string());
    let result = ctx.pipeline().process(&subject, &pb);
    pb.finish_and_clear();

    let outcome = result?;
    log::info!(
        "[{subject}] {} files fetched, staged inputs removed: {}",
        outcome.fetched,
        outcome.cleaned_up
    );
    if let Some(manifest) = &outcome.manifest {
        log::info!("[{subject}] manifest: {}", manifest.display());
    }
    Ok(())
}
