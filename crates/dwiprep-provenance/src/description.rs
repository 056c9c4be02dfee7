//! BIDS `dataset_description.json` for the derivatives of one run

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::host::RunEnvironment;

/// BIDS version the derivatives declare
pub const BIDS_VERSION: &str = "1.10.1";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DatasetDescription {
    pub name: String,
    #[serde(rename = "BIDSVersion")]
    pub bids_version: String,
    pub pipeline_description: PipelineDescription,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PipelineDescription {
    pub name: String,
    pub version: String,
    pub run_on_machine: String,
    pub run_by_user: String,
    pub software: Vec<Software>,
    pub subjects_processed: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Software {
    pub name: String,
    pub version: String,
}

impl DatasetDescription {
    pub fn new(date: chrono::NaiveDate, env: &RunEnvironment, subjects: Vec<String>) -> Self {
        Self {
            name: format!("dMRI Preprocessing Output {}", date.format("%Y-%m-%d")),
            bids_version: BIDS_VERSION.to_string(),
            pipeline_description: PipelineDescription {
                name: crate::PIPELINE_NAME.to_string(),
                version: crate::PIPELINE_VERSION.to_string(),
                run_on_machine: env.host.clone(),
                run_by_user: env.user.clone(),
                software: vec![Software {
                    name: "FSL".into(),
                    version: env.fsl_version.clone(),
                }],
                subjects_processed: subjects,
            },
        }
    }

    /// Write `dataset_description_{date}.json` into `output_dir`.
    pub fn write(&self, output_dir: &Path, date: chrono::NaiveDate) -> Result<PathBuf> {
        let path = output_dir.join(format!(
            "dataset_description_{}.json",
            date.format("%Y-%m-%d")
        ));
        let json =
            serde_json::to_string_pretty(self).context("failed to serialize dataset description")?;
        std::fs::write(&path, json)
            .with_context(|| format!("failed to write {}", path.display()))?;
        log::info!("Created dataset description at {}", path.display());
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date() -> chrono::NaiveDate {
        chrono::NaiveDate::from_ymd_opt(2026, 3, 14).unwrap()
    }

    fn env() -> RunEnvironment {
        RunEnvironment {
            host: "node01".into(),
            user: "oriol".into(),
            fsl_version: "6.0.4".into(),
        }
    }

    #[test]
    fn bids_field_names() {
        let d = DatasetDescription::new(date(), &env(), vec!["sub-01".into()]);
        let v: serde_json::Value = serde_json::to_value(&d).unwrap();
        assert_eq!(v["Name"], "dMRI Preprocessing Output 2026-03-14");
        assert_eq!(v["BIDSVersion"], BIDS_VERSION);
        assert_eq!(v["PipelineDescription"]["RunOnMachine"], "node01");
        assert_eq!(v["PipelineDescription"]["Software"][0]["Name"], "FSL");
        assert_eq!(v["PipelineDescription"]["Software"][0]["Version"], "6.0.4");
        assert_eq!(v["PipelineDescription"]["SubjectsProcessed"][0], "sub-01");
    }

    #[test]
    fn write_uses_dated_name() {
        let dir = tempfile::tempdir().unwrap();
        let d = DatasetDescription::new(date(), &env(), vec![]);
        let path = d.write(dir.path(), date()).unwrap();
        assert_eq!(
            path.file_name().unwrap().to_str().unwrap(),
            "dataset_description_2026-03-14.json"
        );
        let back: DatasetDescription =
            serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert!(back.pipeline_description.subjects_processed.is_empty());
    }
}
