//! Runtime objects built once from the loaded config and shared by every
//! subcommand.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use dwiprep_core::{ProcessRunner, ToolRunner};
use dwiprep_pipeline::{
    Layout, RemoteFetcher, ScanEntry, SubjectPipeline, SubjectSession, scan_local, scan_remote,
    validate_session,
};
use dwiprep_provenance::RunEnvironment;

use crate::config::Config;

pub struct AppContext {
    pub config: Config,
    pub session: String,
    pub layout: Layout,
    runner: Arc<dyn ToolRunner>,
    fetcher: Option<RemoteFetcher>,
    environment: RunEnvironment,
}

impl AppContext {
    /// `session` overrides `[paths] session` when given on the command line.
    pub fn new(config: Config, session: Option<String>) -> Result<Self> {
        config.validate()?;
        let session = session.unwrap_or_else(|| config.paths.session.clone());
        validate_session(&session).with_context(|| format!("invalid session {session:?}"))?;
        let layout = Layout::new(config.paths.bids_dir.clone(), config.paths.output_dir.clone());

        let runner: Arc<dyn ToolRunner> = Arc::new(
            ProcessRunner::fsl(&config.fsl.dir).with_timeout(config.tools.timeout()),
        );
        let fetcher = config.remote.host.as_ref().map(|host| {
            log::debug!(
                "staging inputs from {host} ({} concurrent transfers)",
                config.remote.max_transfers
            );
            RemoteFetcher::new(host.clone(), Arc::clone(&runner), config.remote.max_transfers)
                .with_program(config.tools.scp.clone())
        });
        let environment = RunEnvironment::detect(&config.fsl.dir);
        log::debug!(
            "host {} user {} FSL {}",
            environment.host,
            environment.user,
            environment.fsl_version
        );

        Ok(Self {
            config,
            session,
            layout,
            runner,
            fetcher,
            environment,
        })
    }

    pub fn environment(&self) -> &RunEnvironment {
        &self.environment
    }

    pub fn output_dir(&self) -> &Path {
        &self.config.paths.output_dir
    }

    pub fn subject(&self, id: &str) -> Result<SubjectSession> {
        SubjectSession::new(id.trim(), self.session.as_str())
            .with_context(|| format!("invalid subject id {id:?}"))
    }

    pub fn pipeline(&self) -> SubjectPipeline<'_> {
        let pipeline = SubjectPipeline::new(
            &self.layout,
            &self.config.protocol,
            &self.config.tools,
            self.runner.as_ref(),
        )
        .with_environment(&self.environment);
        match &self.fetcher {
            Some(f) => pipeline.with_fetcher(f),
            None => pipeline,
        }
    }

    /// Subjects whose inputs are complete and whose FA map is not published.
    ///
    /// Scans the BIDS tree in place when it exists here, otherwise over ssh
    /// on the configured remote host.
    pub fn discover(&self, scan_log_dir: &Path) -> Result<Vec<ScanEntry>> {
        let paths = &self.config.paths;
        if paths.bids_dir.is_dir() {
            log::info!("scanning {} for subjects", paths.bids_dir.display());
            return scan_local(&paths.bids_dir, paths.published_dir(), &self.session)
                .context("subject discovery failed");
        }
        let Some(host) = self.config.remote.host.as_deref() else {
            anyhow::bail!(
                "BIDS directory {} does not exist and no [remote] host is configured",
                paths.bids_dir.display()
            );
        };
        std::fs::create_dir_all(scan_log_dir)
            .with_context(|| format!("failed to create {}", scan_log_dir.display()))?;
        let log_path: PathBuf = scan_log_dir.join("remote_scan.log");
        scan_remote(
            self.runner.as_ref(),
            &self.config.tools.ssh,
            host,
            &paths.bids_dir,
            paths.published_dir(),
            &self.session,
            &log_path,
        )
        .with_context(|| format!("remote subject discovery on {host} failed"))
    }
}
