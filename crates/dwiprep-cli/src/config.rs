//! Configuration loading from TOML files

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use dwiprep_dispatch::DispatchConfig;
use dwiprep_pipeline::{Protocol, Toolset, validate_session};
use serde::Deserialize;

/// Global configuration for dwiprep
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub paths: PathsConfig,
    pub fsl: FslConfig,
    pub remote: RemoteConfig,
    pub protocol: Protocol,
    pub tools: Toolset,
    pub dispatch: DispatchConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// BIDS root; on the repository host when `remote.host` is set
    pub bids_dir: PathBuf,
    pub output_dir: PathBuf,
    pub session: String,
    /// Where finished FA maps are looked up during discovery
    /// (defaults to `output_dir`)
    pub published_dir: Option<PathBuf>,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            bids_dir: PathBuf::from("./BIDS"),
            output_dir: PathBuf::from("./derivatives/dwiprep"),
            session: "ses-01".to_string(),
            published_dir: None,
        }
    }
}

impl PathsConfig {
    pub fn published_dir(&self) -> &Path {
        self.published_dir.as_deref().unwrap_or(&self.output_dir)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FslConfig {
    pub dir: PathBuf,
}

impl Default for FslConfig {
    fn default() -> Self {
        Self {
            dir: std::env::var_os("FSLDIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("/usr/local/fsl")),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// `user@host` holding the BIDS tree; inputs are read in place when unset
    #[serde(deserialize_with = "deserialize_env_var")]
    pub host: Option<String>,
    /// Concurrent scp transfers across all subjects
    pub max_transfers: usize,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            host: std::env::var("DWIPREP_REMOTE_HOST").ok(),
            max_transfers: 2,
        }
    }
}

/// Deserialize a string that may contain environment variable reference like ${VAR}
fn deserialize_env_var<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let opt: Option<String> = Option::deserialize(deserializer)?;
    Ok(opt.and_then(|s| expand_env_var(&s)))
}

/// Expand ${VAR} to environment variable value
fn expand_env_var(s: &str) -> Option<String> {
    let expanded = match s.strip_prefix("${").and_then(|s| s.strip_suffix('}')) {
        Some(var_name) => std::env::var(var_name).ok()?,
        None => s.to_string(),
    };
    (!expanded.trim().is_empty()).then_some(expanded)
}

impl Config {
    /// Load configuration from default locations
    ///
    /// Search order:
    /// 1. ./dwiprep.toml (current directory)
    /// 2. ~/.config/dwiprep/config.toml
    ///
    /// If no config file found, returns default config.
    pub fn load() -> Result<Self> {
        let local_config = PathBuf::from("dwiprep.toml");
        if local_config.exists() {
            return Self::from_file(&local_config);
        }

        if let Some(config_dir) = directories::ProjectDirs::from("", "", "dwiprep") {
            let user_config = config_dir.config_dir().join("config.toml");
            if user_config.exists() {
                return Self::from_file(&user_config);
            }
        }

        log::debug!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Load configuration from a specific file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        log::info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Startup checks that would otherwise fail mid-batch.
    pub fn validate(&self) -> Result<()> {
        self.protocol
            .validate()
            .context("invalid [protocol] settings")?;
        validate_session(&self.paths.session).context("invalid [paths] session")?;
        if self.remote.max_transfers == 0 {
            anyhow::bail!("[remote] max_transfers must be at least 1");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert_eq!(config.paths.session, "ses-01");
        assert_eq!(config.paths.published_dir(), config.paths.output_dir);
        assert_eq!(config.dispatch.max_parallel, 2);
        assert_eq!(config.tools.eddy, "eddy_openmp");
        config.validate().unwrap();
    }

    #[test]
    fn expand_env_var_simple() {
        std::env::set_var("DWIPREP_TEST_HOST", "alice@repo");
        assert_eq!(
            expand_env_var("${DWIPREP_TEST_HOST}"),
            Some("alice@repo".to_string())
        );
        std::env::remove_var("DWIPREP_TEST_HOST");
    }

    #[test]
    fn expand_env_var_literal() {
        assert_eq!(expand_env_var("repo.lab.org"), Some("repo.lab.org".to_string()));
    }

    #[test]
    fn expand_env_var_missing_or_blank() {
        assert_eq!(expand_env_var("${NONEXISTENT_VAR_12345}"), None);
        assert_eq!(expand_env_var("  "), None);
    }

    #[test]
    fn parse_config_toml() {
        let toml = r#"
[paths]
bids_dir = "/data/BIDS"
output_dir = "/scratch/dwi"
session = "ses-02"
published_dir = "/archive/dwi"

[remote]
host = "repo.lab.org"
max_transfers = 4

[protocol]
epi_factor = 128

[tools]
eddy = "eddy_cpu"
timeout_secs = 7200

[dispatch]
max_parallel = 6
partition = "long"
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.paths.bids_dir, PathBuf::from("/data/BIDS"));
        assert_eq!(config.paths.session, "ses-02");
        assert_eq!(config.paths.published_dir(), Path::new("/archive/dwi"));
        assert_eq!(config.remote.host.as_deref(), Some("repo.lab.org"));
        assert_eq!(config.remote.max_transfers, 4);
        assert_eq!(config.protocol.epi_factor, 128);
        assert_eq!(config.protocol.echo_spacing_ms, 0.69);
        assert_eq!(config.tools.eddy, "eddy_cpu");
        assert_eq!(config.tools.bet, "bet");
        assert_eq!(config.dispatch.max_parallel, 6);
        assert_eq!(config.dispatch.partition, "long");
        assert_eq!(config.dispatch.cpus_per_task, 4);
    }

    #[test]
    fn invalid_protocol_fails_validation() {
        let config: Config = toml::from_str("[protocol]\nreference_bet_frac = 1.5\n").unwrap();
        let err = config.validate().unwrap_err();
        assert!(format!("{err:#}").contains("reference_bet_frac"));
    }

    #[test]
    fn session_with_shell_syntax_fails_validation() {
        let config: Config = toml::from_str("[paths]\nsession = \"ses-01$(id)\"\n").unwrap();
        let err = config.validate().unwrap_err();
        assert!(format!("{err:#}").contains("[paths] session"));
    }

    #[test]
    fn from_file_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dwiprep.toml");
        std::fs::write(&path, "[paths\n").unwrap();
        let err = Config::from_file(&path).unwrap_err();
        assert!(err.to_string().contains("dwiprep.toml"));
    }
}
