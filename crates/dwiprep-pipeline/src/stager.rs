//! Input staging: make the nine raw inputs of a subject available locally.
//!
//! Remote mode copies missing files from the repository host into the
//! workspace `raw/` tree and never overwrites a file that is already there.
//! Local mode reads the BIDS tree in place.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dwiprep_core::{Semaphore, ToolInvocation, ToolRunner};

use crate::error::{SubjectError, TransferError};
use crate::layout::{InputFile, Layout, PathKind};
use crate::subject::SubjectSession;

/// Copies one file from the remote repository.
pub trait Fetch: Send + Sync {
    /// Copy `remote` (path on the repository host) to `local`.
    ///
    /// On success `local` exists and is complete; on failure it does not.
    fn fetch(&self, remote: &Path, local: &Path) -> Result<(), TransferError>;
}

/// `scp` from an ssh host, with a process-wide cap on concurrent transfers.
pub struct RemoteFetcher {
    host: String,
    program: String,
    runner: Arc<dyn ToolRunner>,
    slots: Arc<Semaphore>,
}

impl RemoteFetcher {
    pub fn new(host: impl Into<String>, runner: Arc<dyn ToolRunner>, max_transfers: usize) -> Self {
        Self {
            host: host.into(),
            program: "scp".into(),
            runner,
            slots: Arc::new(Semaphore::new(max_transfers)),
        }
    }

    /// Use a different copy binary (must accept scp arguments).
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    pub fn host(&self) -> &str {
        &self.host
    }
}

fn part_path(local: &Path) -> PathBuf {
    let mut name = local.file_name().unwrap_or_default().to_os_string();
    name.push(".part");
    local.with_file_name(name)
}

fn transfer_log_path(local: &Path) -> PathBuf {
    let mut name = std::ffi::OsString::from(".");
    name.push(local.file_name().unwrap_or_default());
    name.push(".scp.log");
    local.with_file_name(name)
}

impl Fetch for RemoteFetcher {
    fn fetch(&self, remote: &Path, local: &Path) -> Result<(), TransferError> {
        let source = format!("{}:{}", self.host, remote.display());
        if let Some(parent) = local.parent() {
            fs::create_dir_all(parent).map_err(|e| TransferError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let part = part_path(local);
        let log = transfer_log_path(local);
        let invocation = ToolInvocation::new("fetch", &self.program)
            .arg("-q")
            .arg("-o")
            .arg("BatchMode=yes")
            .arg(source.clone())
            .path(&part);

        let copied = {
            let _slot = self.slots.acquire();
            self.runner.run(&invocation, &log)
        };
        if let Err(e) = copied {
            let _ = fs::remove_file(&part);
            return Err(TransferError::Copy {
                remote: source,
                source: e,
            });
        }
        if !part.is_file() {
            return Err(TransferError::Incomplete {
                remote: source,
                local: local.to_path_buf(),
            });
        }
        fs::rename(&part, local).map_err(|e| TransferError::Io {
            path: local.to_path_buf(),
            source: e,
        })?;
        let _ = fs::remove_file(&log);
        Ok(())
    }
}

/// Where raw inputs come from.
#[derive(Clone, Copy)]
pub enum InputSource<'a> {
    /// Read the BIDS tree in place.
    Local,
    /// Copy from the repository host into the workspace.
    Remote(&'a dyn Fetch),
}

/// Resolved local paths of all raw inputs.
#[derive(Debug, Clone)]
pub struct StagedInputs {
    paths: BTreeMap<InputFile, PathBuf>,
    staged: bool,
    fetched: usize,
}

impl StagedInputs {
    /// Inputs read directly from the BIDS tree; nothing was copied.
    pub fn in_place(layout: &Layout, s: &SubjectSession) -> Self {
        Self::resolve(layout, s, PathKind::Source, false)
    }

    fn resolve(
        layout: &Layout,
        s: &SubjectSession,
        kind: impl Fn(InputFile) -> PathKind,
        staged: bool,
    ) -> Self {
        let paths = InputFile::ALL
            .into_iter()
            .map(|i| (i, layout.path(s, kind(i))))
            .collect();
        Self {
            paths,
            staged,
            fetched: 0,
        }
    }

    pub fn get(&self, input: InputFile) -> &Path {
        // Every constructor fills all of InputFile::ALL
        &self.paths[&input]
    }

    /// Inputs are copies in the workspace and may be deleted after a fit.
    pub fn is_staged(&self) -> bool {
        self.staged
    }

    /// Files copied during this staging call.
    pub fn fetched(&self) -> usize {
        self.fetched
    }
}

/// Make every raw input of `s` available locally.
pub fn stage_inputs(
    layout: &Layout,
    s: &SubjectSession,
    source: InputSource<'_>,
) -> Result<StagedInputs, SubjectError> {
    match source {
        InputSource::Local => {
            let inputs = StagedInputs::in_place(layout, s);
            for input in InputFile::ALL {
                let path = inputs.get(input);
                if !path.is_file() {
                    return Err(SubjectError::InputMissing {
                        input,
                        path: path.to_path_buf(),
                    });
                }
            }
            Ok(inputs)
        }
        InputSource::Remote(fetcher) => {
            let mut inputs = StagedInputs::resolve(layout, s, PathKind::Staged, true);
            for input in InputFile::ALL {
                let local = inputs.get(input).to_path_buf();
                if local.exists() {
                    log::debug!("[{s}] {} already staged", input.description());
                    continue;
                }
                let remote = layout.path(s, PathKind::Source(input));
                log::info!("[{s}] fetching {}", input.description());
                fetcher.fetch(&remote, &local)?;
                inputs.fetched += 1;
            }
            Ok(inputs)
        }
    }
}

/// Delete the staged `raw/` tree. Never touches the BIDS source.
pub fn remove_staged(layout: &Layout, s: &SubjectSession) -> std::io::Result<()> {
    let root = layout.path(s, PathKind::StagingRoot);
    match fs::remove_dir_all(&root) {
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}
