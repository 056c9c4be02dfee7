//! Subject list file: one subject id per line

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::error::DispatchError;

/// Environment variable carrying the 1-based array task id.
pub const TASK_ID_VAR: &str = "SLURM_ARRAY_TASK_ID";

/// Ordered, non-empty list of subject ids.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubjectList {
    path: PathBuf,
    subjects: Vec<String>,
}

impl SubjectList {
    /// Read a list file. Lines are trimmed; blank lines are skipped.
    pub fn read(path: &Path) -> Result<Self, DispatchError> {
        let text = fs::read_to_string(path).map_err(|source| DispatchError::Unreadable {
            path: path.to_path_buf(),
            source,
        })?;
        let subjects = parse_lines(&text);
        if subjects.is_empty() {
            return Err(DispatchError::EmptyList {
                path: path.to_path_buf(),
            });
        }
        Ok(Self {
            path: path.to_path_buf(),
            subjects,
        })
    }

    /// Write `subjects` one per line, replacing `path`.
    pub fn write(path: &Path, subjects: &[String]) -> io::Result<()> {
        let mut body = subjects.join("\n");
        body.push('\n');
        fs::write(path, body)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Subject at 1-based `ordinal`.
    pub fn select(&self, ordinal: usize) -> Result<&str, DispatchError> {
        ordinal
            .checked_sub(1)
            .and_then(|i| self.subjects.get(i))
            .map(String::as_str)
            .ok_or(DispatchError::OrdinalOutOfRange {
                ordinal,
                len: self.subjects.len(),
            })
    }

    pub fn len(&self) -> usize {
        self.subjects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subjects.is_empty()
    }

    pub fn subjects(&self) -> &[String] {
        &self.subjects
    }
}

fn parse_lines(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}

/// Parse an array task id (a positive integer).
pub fn parse_task_id(raw: &str) -> Result<usize, DispatchError> {
    match raw.trim().parse::<usize>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(DispatchError::InvalidTaskId(raw.to_string())),
    }
}

/// Task id of the current array task.
pub fn task_id_from_env() -> Result<usize, DispatchError> {
    let raw = std::env::var(TASK_ID_VAR).map_err(|_| DispatchError::MissingTaskId(TASK_ID_VAR))?;
    parse_task_id(&raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list(body: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("subjects.txt");
        fs::write(&path, body).unwrap();
        (dir, path)
    }

    #[test]
    fn select_is_one_indexed() {
        let (_dir, path) = list("S1\nS2\nS3\n");
        let l = SubjectList::read(&path).unwrap();
        assert_eq!(l.len(), 3);
        assert_eq!(l.select(1).unwrap(), "S1");
        assert_eq!(l.select(2).unwrap(), "S2");
        assert_eq!(l.select(3).unwrap(), "S3");
    }

    #[test]
    fn select_out_of_range() {
        let (_dir, path) = list("S1\nS2\nS3\n");
        let l = SubjectList::read(&path).unwrap();
        assert!(matches!(
            l.select(0),
            Err(DispatchError::OrdinalOutOfRange { ordinal: 0, len: 3 })
        ));
        assert!(matches!(
            l.select(4),
            Err(DispatchError::OrdinalOutOfRange { ordinal: 4, len: 3 })
        ));
    }

    #[test]
    fn trims_and_skips_blank_lines() {
        let (_dir, path) = list("  sub-01 \n\n\t\nsub-02\r\n");
        let l = SubjectList::read(&path).unwrap();
        assert_eq!(l.subjects(), ["sub-01", "sub-02"]);
    }

    #[test]
    fn empty_and_missing_lists() {
        let (_dir, path) = list("\n   \n");
        assert!(matches!(
            SubjectList::read(&path),
            Err(DispatchError::EmptyList { .. })
        ));
        let missing = path.with_file_name("nope.txt");
        assert!(matches!(
            SubjectList::read(&missing),
            Err(DispatchError::Unreadable { .. })
        ));
    }

    #[test]
    fn write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("l.txt");
        SubjectList::write(&path, &["sub-01".into(), "sub-02".into()]).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "sub-01\nsub-02\n");
        assert_eq!(SubjectList::read(&path).unwrap().select(2).unwrap(), "sub-02");
    }

    #[test]
    fn task_ids() {
        assert_eq!(parse_task_id("7").unwrap(), 7);
        assert_eq!(parse_task_id(" 12\n").unwrap(), 12);
        assert!(matches!(parse_task_id("0"), Err(DispatchError::InvalidTaskId(_))));
        assert!(matches!(parse_task_id("-1"), Err(DispatchError::InvalidTaskId(_))));
        assert!(matches!(parse_task_id("abc"), Err(DispatchError::InvalidTaskId(_))));
    }
}
