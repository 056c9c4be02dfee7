//! Subject discovery: which subjects of a BIDS tree still need processing.
//!
//! A subject is ready when all five key images exist and its FA map is not
//! yet in the published output tree. The same rule runs locally (glob) or,
//! when the BIDS tree only exists on the repository host, as a shell script
//! over ssh whose tagged output lines are parsed here.

use std::fs;
use std::path::Path;

use dwiprep_core::{ToolInvocation, ToolRunner};

use crate::artifact::Artifact;
use crate::error::DiscoveryError;
use crate::layout::{InputFile, Layout, PathKind};
use crate::subject::{SubjectSession, validate_session};

/// What the scan found for one `sub-*` directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanStatus {
    /// All key images present, no published FA map.
    Ready,
    /// FA map already published.
    Published,
    /// Some key images missing (descriptions listed).
    Incomplete(Vec<String>),
    /// No key image present at all.
    Empty,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanEntry {
    pub subject: String,
    pub status: ScanStatus,
}

/// Subjects to process, in scan order. Skips are logged.
pub fn ready_subjects(entries: &[ScanEntry]) -> Vec<String> {
    let mut ready = Vec::new();
    for e in entries {
        match &e.status {
            ScanStatus::Ready => ready.push(e.subject.clone()),
            ScanStatus::Published => log::debug!("skipping {}: output already exists", e.subject),
            ScanStatus::Empty => log::debug!("skipping {}: missing all data", e.subject),
            ScanStatus::Incomplete(missing) => {
                log::info!("skipping {}: missing inputs [{}]", e.subject, missing.join(", "))
            }
        }
    }
    ready
}

fn classify(present: impl Fn(InputFile) -> bool, published: bool) -> ScanStatus {
    let missing: Vec<String> = InputFile::KEY_IMAGES
        .into_iter()
        .filter(|i| !present(*i))
        .map(|i| i.description().to_string())
        .collect();
    if missing.len() == InputFile::KEY_IMAGES.len() {
        ScanStatus::Empty
    } else if !missing.is_empty() {
        ScanStatus::Incomplete(missing)
    } else if published {
        ScanStatus::Published
    } else {
        ScanStatus::Ready
    }
}

/// Scan `{bids_root}/sub-*` on the local filesystem.
pub fn scan_local(
    bids_root: &Path,
    published_root: &Path,
    session: &str,
) -> Result<Vec<ScanEntry>, DiscoveryError> {
    validate_session(session).map_err(DiscoveryError::InvalidSession)?;
    let pattern = bids_root.join("sub-*");
    let layout = Layout::new(bids_root, published_root);

    let mut dirs: Vec<_> = glob::glob(&pattern.to_string_lossy())
        .map_err(DiscoveryError::Pattern)?
        .filter_map(Result::ok)
        .filter(|p| p.is_dir())
        .collect();
    dirs.sort();

    let mut entries = Vec::with_capacity(dirs.len());
    for dir in dirs {
        let Some(name) = dir.file_name().map(|n| n.to_string_lossy().into_owned()) else {
            continue;
        };
        let subject = match SubjectSession::new(name.as_str(), session) {
            Ok(s) => s,
            Err(e) => {
                log::warn!("ignoring {}: {e}", dir.display());
                continue;
            }
        };
        let published = layout
            .path(&subject, PathKind::Artifact(Artifact::TensorFit))
            .is_file();
        let status = classify(
            |i| layout.path(&subject, PathKind::Source(i)).is_file(),
            published,
        );
        entries.push(ScanEntry {
            subject: name,
            status,
        });
    }
    log::info!("scanned {} subjects in {}", entries.len(), bids_root.display());
    Ok(entries)
}

fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

/// Shell script performing [`scan_local`]'s checks on the repository host.
///
/// `session` is spliced in unquoted; callers pass it through
/// [`validate_session`] first, as [`scan_remote`] does.
pub fn remote_scan_script(bids_root: &Path, published_root: &Path, session: &str) -> String {
    let mut script = String::new();
    script.push_str(&format!(
        "for s_dir in {}/sub-*; do\n",
        shell_quote(&bids_root.to_string_lossy())
    ));
    script.push_str("  [ -d \"$s_dir\" ] || continue\n");
    script.push_str("  subject=$(basename \"$s_dir\")\n");
    script.push_str("  missing=\"\"\n  n=0\n");
    for input in InputFile::KEY_IMAGES {
        let rel = format!(
            "$s_dir/{session}/{}/{}",
            input.modality().dir_name(),
            input.name_for("${subject}", session)
        );
        script.push_str(&format!(
            "  [ -f \"{rel}\" ] || {{ missing=\"$missing,{}\"; n=$((n+1)); }}\n",
            input.description()
        ));
    }
    script.push_str(&format!(
        "  if [ \"$n\" -eq 0 ]; then\n    if [ -f {}/\"${{subject}}_{session}\"/{} ]; then echo \"EXIST:$subject\"; else echo \"FOUND:$subject\"; fi\n",
        shell_quote(&published_root.to_string_lossy()),
        Artifact::TensorFit.file_name(),
    ));
    script.push_str(&format!(
        "  elif [ \"$n\" -eq {} ]; then echo \"SKIP_ALL:$subject\"\n",
        InputFile::KEY_IMAGES.len()
    ));
    script.push_str("  else echo \"MISSING:$subject:${missing#,}\"; fi\ndone\n");
    script
}

/// Parse the tagged lines printed by [`remote_scan_script`]. Other lines are ignored.
pub fn parse_remote_scan(output: &str) -> Vec<ScanEntry> {
    output
        .lines()
        .map(str::trim)
        .filter_map(|line| {
            let (tag, rest) = line.split_once(':')?;
            let (subject, detail) = match rest.split_once(':') {
                Some((s, d)) => (s, Some(d)),
                None => (rest, None),
            };
            if subject.is_empty() {
                return None;
            }
            let status = match tag {
                "FOUND" => ScanStatus::Ready,
                "EXIST" => ScanStatus::Published,
                "SKIP_ALL" => ScanStatus::Empty,
                "MISSING" => ScanStatus::Incomplete(
                    detail
                        .unwrap_or_default()
                        .split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(str::to_string)
                        .collect(),
                ),
                _ => return None,
            };
            Some(ScanEntry {
                subject: subject.to_string(),
                status,
            })
        })
        .collect()
}

/// Run the scan script over ssh. Output is captured in `log_path`.
pub fn scan_remote(
    runner: &dyn ToolRunner,
    ssh: &str,
    host: &str,
    bids_root: &Path,
    published_root: &Path,
    session: &str,
    log_path: &Path,
) -> Result<Vec<ScanEntry>, DiscoveryError> {
    validate_session(session).map_err(DiscoveryError::InvalidSession)?;
    log::info!("scanning {host}:{} for subjects", bids_root.display());
    let invocation = ToolInvocation::new("scan", ssh)
        .arg("-o")
        .arg("BatchMode=yes")
        .arg(host)
        .arg(remote_scan_script(bids_root, published_root, session));
    runner
        .run(&invocation, log_path)
        .map_err(DiscoveryError::Remote)?;
    let output = fs::read_to_string(log_path).map_err(|source| DiscoveryError::Read {
        path: log_path.to_path_buf(),
        source,
    })?;
    Ok(parse_remote_scan(&output))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"x").unwrap();
    }

    fn make_subject(bids: &Path, sub: &str, inputs: &[InputFile]) {
        let layout = Layout::new(bids, "/unused");
        let s = SubjectSession::new(sub, "ses-01").unwrap();
        fs::create_dir_all(bids.join(sub)).unwrap();
        for i in inputs {
            touch(&layout.path(&s, PathKind::Source(*i)));
        }
    }

    #[test]
    fn local_scan_classifies_subjects() {
        let dir = tempfile::tempdir().unwrap();
        let bids = dir.path().join("bids");
        let published = dir.path().join("published");

        make_subject(&bids, "sub-01", &InputFile::KEY_IMAGES);
        make_subject(&bids, "sub-02", &InputFile::KEY_IMAGES);
        make_subject(&bids, "sub-03", &[InputFile::DwiAp, InputFile::DwiPa]);
        make_subject(&bids, "sub-04", &[]);
        touch(&published.join("sub-02_ses-01/dti_fit_data_FA.nii.gz"));
        fs::write(bids.join("sub-05"), b"not a dir").unwrap();

        let entries = scan_local(&bids, &published, "ses-01").unwrap();
        let statuses: Vec<_> = entries
            .iter()
            .map(|e| (e.subject.as_str(), e.status.clone()))
            .collect();
        assert_eq!(
            statuses,
            vec![
                ("sub-01", ScanStatus::Ready),
                ("sub-02", ScanStatus::Published),
                (
                    "sub-03",
                    ScanStatus::Incomplete(vec![
                        "FMAP AP".into(),
                        "FMAP PA".into(),
                        "T1w".into()
                    ])
                ),
                ("sub-04", ScanStatus::Empty),
            ]
        );
        assert_eq!(ready_subjects(&entries), vec!["sub-01".to_string()]);
    }

    #[test]
    fn parse_tagged_lines() {
        let out = "\
Warning: Permanently added host\n\
FOUND:sub-01\n\
EXIST:sub-02\n\
MISSING:sub-03:DWI PA,T1w\n\
SKIP_ALL:sub-04\n\
\n\
BOGUS:sub-05\n";
        let entries = parse_remote_scan(out);
        assert_eq!(entries.len(), 4);
        assert_eq!(entries[0].status, ScanStatus::Ready);
        assert_eq!(entries[1].status, ScanStatus::Published);
        assert_eq!(
            entries[2].status,
            ScanStatus::Incomplete(vec!["DWI PA".into(), "T1w".into()])
        );
        assert_eq!(entries[3].status, ScanStatus::Empty);
        assert_eq!(ready_subjects(&entries), vec!["sub-01".to_string()]);
    }

    #[test]
    fn script_checks_key_images_and_fa() {
        let script = remote_scan_script(Path::new("/data/BIDS"), Path::new("/data/out"), "ses-01");
        assert!(script.starts_with("for s_dir in '/data/BIDS'/sub-*; do"));
        assert!(script.contains("$s_dir/ses-01/fmap/${subject}_ses-01_acq-dwisefm_dir-ap_run-01_epi.nii.gz"));
        assert!(script.contains("$s_dir/ses-01/anat/${subject}_ses-01_run-01_T1w.nii.gz"));
        assert!(script.contains("'/data/out'/\"${subject}_ses-01\"/dti_fit_data_FA.nii.gz"));
        assert!(script.contains("-eq 5"));
        // bval/bvec are not key images
        assert!(!script.contains(".bval"));
    }

    /// Fails the test if invoked; the session check must run before ssh.
    struct NoSsh;

    impl ToolRunner for NoSsh {
        fn run(&self, inv: &ToolInvocation, _log: &Path) -> Result<(), dwiprep_core::ToolError> {
            panic!("ssh must not run: {inv}");
        }
    }

    #[test]
    fn remote_scan_rejects_injected_session() {
        let dir = tempfile::tempdir().unwrap();
        let err = scan_remote(
            &NoSsh,
            "ssh",
            "repo",
            Path::new("/data/BIDS"),
            Path::new("/data/out"),
            "ses-01$(touch PWNED)",
            &dir.path().join("scan.log"),
        )
        .unwrap_err();
        assert!(matches!(err, DiscoveryError::InvalidSession(_)));
        assert!(scan_local(dir.path(), dir.path(), "ses-01;id").is_err());
    }

    #[test]
    fn quote_escapes_single_quotes() {
        assert_eq!(shell_quote("/a b/it's"), r"'/a b/it'\''s'");
    }
}
