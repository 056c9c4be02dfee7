//! Facts about the machine and installation a run executed on

use std::path::Path;

/// Host, user and external tool release for provenance records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunEnvironment {
    pub host: String,
    pub user: String,
    pub fsl_version: String,
}

impl RunEnvironment {
    /// Inspect the current machine. `fsl_dir` is the FSL installation in use.
    pub fn detect(fsl_dir: &Path) -> Self {
        Self {
            host: sysinfo::System::host_name().unwrap_or_else(|| "unknown".into()),
            user: std::env::var("USER")
                .or_else(|_| std::env::var("LOGNAME"))
                .unwrap_or_else(|_| "unknown".into()),
            fsl_version: fsl_version(fsl_dir),
        }
    }
}

/// FSL release from `{fsl_dir}/etc/fslversion`, or `"unknown"`.
pub fn fsl_version(fsl_dir: &Path) -> String {
    let path = fsl_dir.join("etc").join("fslversion");
    match std::fs::read_to_string(&path) {
        Ok(s) => {
            // Some releases append ":<git hash>"
            let v = s.trim().split(':').next().unwrap_or("").trim();
            if v.is_empty() {
                "unknown".into()
            } else {
                v.to_string()
            }
        }
        Err(e) => {
            log::debug!("no FSL version at {}: {e}", path.display());
            "unknown".into()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_fsl_version() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("etc")).unwrap();
        std::fs::write(dir.path().join("etc/fslversion"), "6.0.4:ddd0a010\n").unwrap();
        assert_eq!(fsl_version(dir.path()), "6.0.4");
    }

    #[test]
    fn missing_version_is_unknown() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(fsl_version(dir.path()), "unknown");
    }

    #[test]
    fn detect_fills_all_fields() {
        let dir = tempfile::tempdir().unwrap();
        let env = RunEnvironment::detect(dir.path());
        assert!(!env.host.is_empty());
        assert!(!env.user.is_empty());
        assert_eq!(env.fsl_version, "unknown");
    }
}
