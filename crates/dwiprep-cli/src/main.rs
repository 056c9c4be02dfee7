//! dwiprep - diffusion MRI preprocessing orchestrator
//!
//! Runs the FSL distortion-correction and tensor-fitting chain per subject,
//! locally with bounded parallelism or as a SLURM array job.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dwiprep_core::{ProgressContext, install_signal_handlers};

mod cmd;
mod config;
mod context;

use config::Config;
use context::AppContext;

#[derive(Parser)]
#[command(name = "dwiprep")]
#[command(about = "Diffusion MRI preprocessing with FSL")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    /// Config file path (default: ./dwiprep.toml or ~/.config/dwiprep/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Session label, overriding [paths] session
    #[arg(long, global = true, env = "DWIPREP_SESSION")]
    session: Option<String>,
}

#[derive(Subcommand)]
enum Command {
    /// Process one subject
    Run(cmd::run::RunArgs),
    /// Process many subjects on this machine
    Batch(cmd::batch::BatchArgs),
    /// Process the subject of one SLURM array task
    Worker(cmd::worker::WorkerArgs),
    /// Discover pending subjects and submit a SLURM array job
    Submit(cmd::submit::SubmitArgs),
    /// Summarize a finished array job and write the dataset description
    Report(cmd::report::ReportArgs),
    /// Show current configuration
    Config,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Progress context (TTY auto-detect)
    let progress = ProgressContext::new();

    // Logging:
    //   TTY:     quiet (warn) unless --debug; spinners show activity
    //   non-TTY: info unless --debug; SLURM logs are the only record
    let is_tty = progress.is_tty();
    let multi = if is_tty { Some(progress.multi()) } else { None };
    let quiet = is_tty && !cli.debug;
    dwiprep_core::init_logging(quiet, cli.debug, multi);

    let config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::load()?,
    };

    if let Command::Config = cli.command {
        config.validate()?;
        print_config(&config, cli.session.as_deref());
        return Ok(());
    }

    install_signal_handlers().context("failed to install signal handlers")?;
    let ctx = AppContext::new(config, cli.session)?;

    match cli.command {
        Command::Run(args) => cmd::run::run(args, &ctx, &progress),
        Command::Batch(args) => cmd::batch::run(args, &ctx, &progress),
        Command::Worker(args) => cmd::worker::run(args, &ctx, &progress),
        Command::Submit(args) => cmd::submit::run(args, &ctx, cli.config.as_deref()),
        Command::Report(args) => cmd::report::run(args, &ctx),
        Command::Config => Ok(()),
    }
}

fn print_config(config: &Config, session: Option<&str>) {
    use comfy_table::{Cell, Color, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL};

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec![
            Cell::new("Setting").fg(Color::Cyan),
            Cell::new("Value").fg(Color::Cyan),
        ]);

    let paths = &config.paths;
    let protocol = &config.protocol;
    let dispatch = &config.dispatch;
    table.add_row(vec!["BIDS directory", &paths.bids_dir.display().to_string()]);
    table.add_row(vec!["Output directory", &paths.output_dir.display().to_string()]);
    table.add_row(vec![
        "Published directory",
        &paths.published_dir().display().to_string(),
    ]);
    table.add_row(vec!["Session", session.unwrap_or(&paths.session)]);
    table.add_row(vec!["FSL directory", &config.fsl.dir.display().to_string()]);
    table.add_row(vec![
        "Remote host",
        &match &config.remote.host {
            Some(host) => format!("{host} ({} transfers)", config.remote.max_transfers),
            None => "not set (read BIDS in place)".to_string(),
        },
    ]);
    table.add_row(vec![
        "Readout time",
        &format!(
            "{:.5}s ({}ms x {})",
            protocol.total_readout_time(),
            protocol.echo_spacing_ms,
            protocol.epi_factor.saturating_sub(1)
        ),
    ]);
    table.add_row(vec!["topup config", &protocol.topup_config]);
    table.add_row(vec![
        "bet -f (b0 / T1w)",
        &format!(
            "{} / {}",
            protocol.reference_bet_frac, protocol.anatomical_bet_frac
        ),
    ]);
    table.add_row(vec![
        "eddy",
        &format!(
            "{}{}",
            config.tools.eddy,
            if protocol.replace_outliers { " --repol" } else { "" }
        ),
    ]);
    table.add_row(vec![
        "Tool timeout",
        &match config.tools.timeout() {
            Some(t) => format!("{}s", t.as_secs()),
            None => "none".to_string(),
        },
    ]);
    table.add_row(vec!["Max parallel", &dispatch.max_parallel.to_string()]);
    table.add_row(vec![
        "SLURM resources",
        &format!(
            "{} / {} CPUs / {}",
            dispatch.partition, dispatch.cpus_per_task, dispatch.mem
        ),
    ]);
    table.add_row(vec!["SLURM log dir", &dispatch.log_dir.display().to_string()]);

    eprintln!("\n{table}");
}
