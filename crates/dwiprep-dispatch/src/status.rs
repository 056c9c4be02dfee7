//! Done markers: `{output_dir}/status/{subject}.done`, one per finished array task

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

const MARKER_EXT: &str = "done";

#[derive(Debug, Clone)]
pub struct StatusDir {
    root: PathBuf,
}

impl StatusDir {
    pub fn new(output_dir: &Path) -> Self {
        Self {
            root: output_dir.join("status"),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn marker_path(&self, subject: &str) -> PathBuf {
        self.root.join(format!("{subject}.{MARKER_EXT}"))
    }

    /// Record `subject` as done. The marker holds an RFC 3339 timestamp.
    pub fn mark_done(&self, subject: &str) -> io::Result<PathBuf> {
        fs::create_dir_all(&self.root)?;
        let path = self.marker_path(subject);
        fs::write(&path, format!("{}\n", chrono::Utc::now().to_rfc3339()))?;
        Ok(path)
    }

    /// Subjects with a marker, sorted. A missing directory means none.
    pub fn done_subjects(&self) -> io::Result<Vec<String>> {
        let entries = match fs::read_dir(&self.root) {
            Ok(e) => e,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let mut done = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().is_some_and(|e| e == MARKER_EXT) {
                if let Some(stem) = path.file_stem() {
                    done.push(stem.to_string_lossy().into_owned());
                }
            }
        }
        done.sort();
        Ok(done)
    }

    /// Remove all markers.
    pub fn clear(&self) -> io::Result<()> {
        match fs::remove_dir_all(&self.root) {
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mark_and_list() {
        let dir = tempfile::tempdir().unwrap();
        let status = StatusDir::new(dir.path());
        assert!(status.done_subjects().unwrap().is_empty());

        status.mark_done("sub-02").unwrap();
        let p = status.mark_done("sub-01").unwrap();
        fs::write(status.root().join("stray.txt"), b"").unwrap();

        assert!(p.ends_with("status/sub-01.done"));
        assert!(status.marker_path("sub-01").is_file());
        assert!(!status.marker_path("sub-03").exists());
        assert_eq!(status.done_subjects().unwrap(), vec!["sub-01", "sub-02"]);

        let stamp = fs::read_to_string(p).unwrap();
        assert!(chrono::DateTime::parse_from_rfc3339(stamp.trim()).is_ok());
    }

    #[test]
    fn clear_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let status = StatusDir::new(dir.path());
        status.mark_done("sub-01").unwrap();
        status.clear().unwrap();
        assert!(!status.root().exists());
        status.clear().unwrap();
    }
}
