//! SLURM array submission.
//!
//! `submit` writes three files stamped with the submission time, submits
//! the array script, then a report job that depends on the whole array
//! (`afterany`, so it runs even when some tasks fail):
//!
//! ```text
//! subjects_to_process_{ts}.txt
//! submit_array_{ts}.sh     #SBATCH --array=1-N%K   → dwiprep worker
//! submit_report_{ts}.sh    #SBATCH --dependency=afterany:{id} → dwiprep report
//! ```

use std::fmt::{self, Write as _};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::config::DispatchConfig;

const LIST_PREFIX: &str = "subjects_to_process_";
const ARRAY_PREFIX: &str = "submit_array_";
const REPORT_PREFIX: &str = "submit_report_";

/// Submission timestamp format used in file names.
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

#[derive(Debug)]
pub enum SubmitError {
    Io { path: PathBuf, source: io::Error },
    /// `sbatch` could not be started.
    Spawn(io::Error),
    /// `sbatch` exited unsuccessfully.
    Rejected { status: Option<i32>, stderr: String },
    /// `sbatch` succeeded but printed no job id.
    NoJobId(String),
}

impl fmt::Display for SubmitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io { path, source } => write!(f, "{}: {source}", path.display()),
            Self::Spawn(e) => write!(f, "failed to run sbatch: {e} (is SLURM available?)"),
            Self::Rejected { status, stderr } => match status {
                Some(c) => write!(f, "sbatch exited with status {c}: {}", stderr.trim()),
                None => write!(f, "sbatch terminated by signal: {}", stderr.trim()),
            },
            Self::NoJobId(out) => write!(f, "no job id in sbatch output {:?}", out.trim()),
        }
    }
}

impl std::error::Error for SubmitError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io { source, .. } | Self::Spawn(source) => Some(source),
            _ => None,
        }
    }
}

/// Files of one submission, all sharing a timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionFiles {
    pub subjects_list: PathBuf,
    pub array_script: PathBuf,
    pub report_script: PathBuf,
}

impl SubmissionFiles {
    pub fn new(dir: &Path, timestamp: &str) -> Self {
        Self {
            subjects_list: dir.join(format!("{LIST_PREFIX}{timestamp}.txt")),
            array_script: dir.join(format!("{ARRAY_PREFIX}{timestamp}.sh")),
            report_script: dir.join(format!("{REPORT_PREFIX}{timestamp}.sh")),
        }
    }

    /// Recover the sibling files from a subject list written by `submit`.
    pub fn from_subjects_list(list: &Path) -> Option<Self> {
        let name = list.file_name()?.to_str()?;
        let ts = name.strip_prefix(LIST_PREFIX)?.strip_suffix(".txt")?;
        Some(Self::new(list.parent().unwrap_or(Path::new("")), ts))
    }

    /// Delete every file that exists. Returns how many were removed.
    pub fn remove_all(&self) -> usize {
        [&self.subjects_list, &self.array_script, &self.report_script]
            .into_iter()
            .filter(|p| match fs::remove_file(p) {
                Ok(()) => true,
                Err(e) => {
                    if e.kind() != io::ErrorKind::NotFound {
                        log::warn!("could not remove {}: {e}", p.display());
                    }
                    false
                }
            })
            .count()
    }
}

/// How array tasks call back into this binary.
#[derive(Debug, Clone)]
pub struct WorkerCommand {
    pub program: PathBuf,
    pub config: Option<PathBuf>,
    pub session: String,
}

impl WorkerCommand {
    fn render(&self, subcommand: &str, list: &Path) -> String {
        let mut cmd = shell_quote(&self.program.to_string_lossy());
        if let Some(c) = &self.config {
            cmd.push_str(" --config ");
            cmd.push_str(&shell_quote(&c.to_string_lossy()));
        }
        cmd.push_str(" --session ");
        cmd.push_str(&shell_quote(&self.session));
        cmd.push(' ');
        cmd.push_str(subcommand);
        cmd.push_str(" --subjects-list ");
        cmd.push_str(&shell_quote(&list.to_string_lossy()));
        cmd
    }
}

/// An array job over a written subject list.
#[derive(Debug, Clone)]
pub struct ArrayJob<'a> {
    pub config: &'a DispatchConfig,
    pub files: SubmissionFiles,
    pub count: usize,
    pub worker: WorkerCommand,
}

impl ArrayJob<'_> {
    fn header(&self, out: &mut String, job_name: &str, log_name: &str, cpus: usize, mem: &str) {
        let c = self.config;
        let log = c.log_dir.join(log_name);
        // fmt::Write into a String cannot fail
        let _ = writeln!(out, "#!/bin/bash");
        let _ = writeln!(out, "#SBATCH --job-name={job_name}");
        let _ = writeln!(out, "#SBATCH --output={}", log.display());
        let _ = writeln!(out, "#SBATCH --partition={}", c.partition);
        let _ = writeln!(out, "#SBATCH --nodes=1");
        let _ = writeln!(out, "#SBATCH --ntasks=1");
        let _ = writeln!(out, "#SBATCH --cpus-per-task={cpus}");
        let _ = writeln!(out, "#SBATCH --mem={mem}");
    }

    pub fn array_script(&self) -> String {
        let c = self.config;
        let mut s = String::new();
        self.header(
            &mut s,
            &c.job_name,
            &format!("{}-%A_%a.log", c.job_name),
            c.cpus_per_task,
            &c.mem,
        );
        let _ = writeln!(s, "#SBATCH --array=1-{}%{}", self.count, c.max_parallel.max(1));
        let _ = writeln!(s);
        let _ = writeln!(s, "set -euo pipefail");
        let _ = writeln!(s, "export OMP_NUM_THREADS={}", c.cpus_per_task);
        let _ = writeln!(
            s,
            "exec {}",
            self.worker.render("worker", &self.files.subjects_list)
        );
        s
    }

    pub fn report_script(&self, array_job_id: &str) -> String {
        let c = self.config;
        let name = format!("{}_report", c.job_name);
        let mut s = String::new();
        self.header(&mut s, &name, &format!("{name}-%j.log"), 1, "1G");
        let _ = writeln!(s, "#SBATCH --dependency=afterany:{array_job_id}");
        let _ = writeln!(s);
        let _ = writeln!(s, "set -euo pipefail");
        let _ = writeln!(
            s,
            "exec {}",
            self.worker.render("report", &self.files.subjects_list)
        );
        s
    }

    pub fn write_array_script(&self) -> Result<&Path, SubmitError> {
        write_script(&self.files.array_script, &self.array_script())?;
        Ok(&self.files.array_script)
    }

    pub fn write_report_script(&self, array_job_id: &str) -> Result<&Path, SubmitError> {
        write_script(&self.files.report_script, &self.report_script(array_job_id))?;
        Ok(&self.files.report_script)
    }
}

fn write_script(path: &Path, body: &str) -> Result<(), SubmitError> {
    fs::write(path, body).map_err(|source| SubmitError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn shell_quote(s: &str) -> String {
    if !s.is_empty()
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:@%+".contains(c))
    {
        s.to_string()
    } else {
        format!("'{}'", s.replace('\'', r"'\''"))
    }
}

/// Job id from `sbatch` output ("Submitted batch job 12345").
pub fn parse_job_id(output: &str) -> Option<&str> {
    output
        .split_whitespace()
        .last()
        .filter(|t| t.chars().all(|c| c.is_ascii_digit()))
}

/// Submit `script` with `sbatch` and return the job id.
pub fn submit(script: &Path) -> Result<String, SubmitError> {
    let output = Command::new("sbatch")
        .arg(script)
        .output()
        .map_err(SubmitError::Spawn)?;
    let stdout = String::from_utf8_lossy(&output.stdout);
    if !output.status.success() {
        return Err(SubmitError::Rejected {
            status: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        });
    }
    parse_job_id(&stdout)
        .map(str::to_string)
        .ok_or_else(|| SubmitError::NoJobId(stdout.into_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(config: &DispatchConfig) -> ArrayJob<'_> {
        ArrayJob {
            config,
            files: SubmissionFiles::new(Path::new("/work"), "20260101_120000"),
            count: 37,
            worker: WorkerCommand {
                program: PathBuf::from("/opt/dwiprep/bin/dwiprep"),
                config: Some(PathBuf::from("/etc/dwiprep config.toml")),
                session: "ses-01".into(),
            },
        }
    }

    #[test]
    fn file_names_share_timestamp() {
        let f = SubmissionFiles::new(Path::new("/work"), "20260101_120000");
        assert_eq!(
            f.subjects_list,
            PathBuf::from("/work/subjects_to_process_20260101_120000.txt")
        );
        assert_eq!(
            f.array_script,
            PathBuf::from("/work/submit_array_20260101_120000.sh")
        );
        assert_eq!(
            SubmissionFiles::from_subjects_list(&f.subjects_list),
            Some(f.clone())
        );
        assert_eq!(
            SubmissionFiles::from_subjects_list(Path::new("/work/mylist.txt")),
            None
        );
    }

    #[test]
    fn array_script_throttles_to_k() {
        let config = DispatchConfig {
            max_parallel: 3,
            ..DispatchConfig::default()
        };
        let script = job(&config).array_script();
        assert!(script.starts_with("#!/bin/bash\n"));
        assert!(script.contains("#SBATCH --array=1-37%3\n"));
        assert!(script.contains("#SBATCH --output=logs/dwiprep-%A_%a.log\n"));
        assert!(script.contains("#SBATCH --cpus-per-task=4\n"));
        assert!(script.contains("#SBATCH --mem=4G\n"));
        assert!(script.contains("#SBATCH --partition=batch\n"));
        assert!(script.contains(
            "exec /opt/dwiprep/bin/dwiprep --config '/etc/dwiprep config.toml' --session ses-01 \
             worker --subjects-list /work/subjects_to_process_20260101_120000.txt"
        ));
    }

    #[test]
    fn report_script_depends_on_array() {
        let config = DispatchConfig::default();
        let script = job(&config).report_script("4242");
        assert!(script.contains("#SBATCH --dependency=afterany:4242\n"));
        assert!(script.contains("#SBATCH --job-name=dwiprep_report\n"));
        assert!(script.contains("#SBATCH --mem=1G\n"));
        assert!(script.contains(" report --subjects-list "));
        assert!(!script.contains("--array"));
    }

    #[test]
    fn job_id_is_last_token() {
        assert_eq!(parse_job_id("Submitted batch job 12345\n"), Some("12345"));
        assert_eq!(parse_job_id("12345"), Some("12345"));
        assert_eq!(parse_job_id("sbatch: error: invalid partition"), None);
        assert_eq!(parse_job_id(""), None);
    }

    #[test]
    fn remove_all_counts_existing() {
        let dir = tempfile::tempdir().unwrap();
        let f = SubmissionFiles::new(dir.path(), "ts");
        fs::write(&f.subjects_list, "sub-01\n").unwrap();
        fs::write(&f.array_script, "#!/bin/bash\n").unwrap();
        assert_eq!(f.remove_all(), 2);
        assert!(!f.subjects_list.exists());
        assert_eq!(f.remove_all(), 0);
    }

    #[test]
    fn write_scripts() {
        let dir = tempfile::tempdir().unwrap();
        let config = DispatchConfig::default();
        let mut j = job(&config);
        j.files = SubmissionFiles::new(dir.path(), "ts");
        let array = j.write_array_script().unwrap().to_path_buf();
        let report = j.write_report_script("7").unwrap().to_path_buf();
        assert!(fs::read_to_string(array).unwrap().contains("--array=1-37%2"));
        assert!(fs::read_to_string(report).unwrap().contains("afterany:7"));
    }
}
