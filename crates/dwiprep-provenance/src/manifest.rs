//! Subject manifest: what was produced for one subject/session, and where

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::hash;
use crate::host::RunEnvironment;

/// File name of the manifest inside a subject workspace
pub const MANIFEST_FILE: &str = "manifest.json";

/// Manifest stored in the subject workspace after a successful run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubjectManifest {
    pub pipeline_name: String,
    pub pipeline_version: String,
    pub subject: String,
    pub session: String,
    pub host: String,
    pub user: String,
    pub fsl_version: String,
    /// Final artifacts (file name → blake3 hex).
    pub artifacts: BTreeMap<String, String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl SubjectManifest {
    /// Hash `artifacts` (in parallel) and assemble the manifest.
    pub fn build(
        subject: &str,
        session: &str,
        env: &RunEnvironment,
        artifacts: &[PathBuf],
    ) -> Result<Self> {
        let hashed: Vec<(String, String)> = artifacts
            .par_iter()
            .map(|path| {
                let h = hash::hash_file(path)
                    .with_context(|| format!("failed to hash {}", path.display()))?;
                let name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| path.display().to_string());
                Ok((name, h.to_hex().to_string()))
            })
            .collect::<Result<_>>()?;

        Ok(Self {
            pipeline_name: crate::PIPELINE_NAME.to_string(),
            pipeline_version: crate::PIPELINE_VERSION.to_string(),
            subject: subject.to_string(),
            session: session.to_string(),
            host: env.host.clone(),
            user: env.user.clone(),
            fsl_version: env.fsl_version.clone(),
            artifacts: hashed.into_iter().collect(),
            created_at: chrono::Utc::now(),
        })
    }

    /// Write manifest to `dir/manifest.json`, replacing any previous one.
    pub fn write_to(&self, dir: &Path) -> Result<PathBuf> {
        let path = dir.join(MANIFEST_FILE);
        let json = serde_json::to_string_pretty(self).context("failed to serialize manifest")?;
        std::fs::write(&path, json)
            .with_context(|| format!("failed to write {}", path.display()))?;
        Ok(path)
    }

    /// Read manifest from `dir/manifest.json`
    pub fn read_from(dir: &Path) -> Result<Self> {
        let path = dir.join(MANIFEST_FILE);
        let json = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        serde_json::from_str(&json).with_context(|| format!("failed to parse {}", path.display()))
    }
}
