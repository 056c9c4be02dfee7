//! Parameter synthesis: the plain-text files topup and eddy read.
//!
//! Everything here is derived from the protocol and the staged gradient
//! tables. Files are always rewritten in full so a rerun never sees
//! stale parameters from an earlier, different input set.

use std::fs;
use std::path::Path;

use crate::artifact::Artifact;
use crate::error::ParamError;
use crate::layout::{InputFile, Workspace};
use crate::protocol::Protocol;
use crate::stager::StagedInputs;

/// Phase-encoding index of each direction in the acquisition table.
const AP_INDEX: u8 = 1;
const PA_INDEX: u8 = 2;

/// Whitespace-separated numeric table (bval: 1 row, bvec: 3 rows).
///
/// Token text is kept verbatim so concatenation never reformats numbers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GradientTable {
    rows: Vec<Vec<String>>,
}

impl GradientTable {
    /// Parse `text` expecting exactly `expected_rows` non-blank rows of equal length.
    pub fn parse(text: &str, expected_rows: usize, label: &str) -> Result<Self, ParamError> {
        let rows: Vec<Vec<String>> = text
            .lines()
            .map(|l| l.split_whitespace().map(str::to_owned).collect::<Vec<_>>())
            .filter(|r| !r.is_empty())
            .collect();

        if rows.len() != expected_rows {
            return Err(ParamError::RowCount {
                table: label.to_string(),
                expected: expected_rows,
                found: rows.len(),
            });
        }
        let width = rows[0].len();
        for (i, row) in rows.iter().enumerate() {
            if row.len() != width {
                return Err(ParamError::Ragged {
                    table: label.to_string(),
                    row: i + 1,
                    expected: width,
                    found: row.len(),
                });
            }
            if let Some(bad) = row
                .iter()
                .find(|t| t.parse::<f64>().map_or(true, |v| !v.is_finite()))
            {
                return Err(ParamError::Malformed {
                    table: label.to_string(),
                    token: bad.clone(),
                });
            }
        }
        Ok(Self { rows })
    }

    pub fn read(path: &Path, expected_rows: usize) -> Result<Self, ParamError> {
        let text = fs::read_to_string(path).map_err(|source| ParamError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let label = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Self::parse(&text, expected_rows, &label)
    }

    /// Number of volumes described.
    pub fn columns(&self) -> usize {
        self.rows.first().map_or(0, Vec::len)
    }

    pub fn rows(&self) -> usize {
        self.rows.len()
    }

    /// Row-wise join: every row of `self` followed by the same row of `other`.
    pub fn concat(&self, other: &GradientTable) -> Result<GradientTable, ParamError> {
        if self.rows() != other.rows() {
            return Err(ParamError::ShapeMismatch {
                left: self.rows(),
                right: other.rows(),
            });
        }
        let rows = self
            .rows
            .iter()
            .zip(&other.rows)
            .map(|(a, b)| a.iter().chain(b).cloned().collect())
            .collect();
        Ok(GradientTable { rows })
    }

    pub fn to_text(&self) -> String {
        let mut out = String::new();
        for row in &self.rows {
            out.push_str(&row.join(" "));
            out.push('\n');
        }
        out
    }
}

/// The two-row acquisition table: AP then PA, readout time in seconds.
pub fn acquisition_table(protocol: &Protocol) -> String {
    let t = protocol.total_readout_time();
    format!("0 -1 0 {t:.5}\n0 1 0 {t:.5}\n")
}

/// `n_ap` ones followed by `n_pa` twos.
pub fn index_vector(n_ap: usize, n_pa: usize) -> Result<Vec<u8>, ParamError> {
    if n_ap == 0 {
        return Err(ParamError::NoVolumes { direction: "AP" });
    }
    if n_pa == 0 {
        return Err(ParamError::NoVolumes { direction: "PA" });
    }
    let mut v = vec![AP_INDEX; n_ap];
    v.resize(n_ap + n_pa, PA_INDEX);
    Ok(v)
}

pub fn index_text(index: &[u8]) -> String {
    let tokens: Vec<String> = index.iter().map(u8::to_string).collect();
    format!("{}\n", tokens.join(" "))
}

/// Volume counts of the two phase-encoding directions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VolumeCounts {
    pub ap: usize,
    pub pa: usize,
}

impl VolumeCounts {
    pub fn total(&self) -> usize {
        self.ap + self.pa
    }
}

/// Gradient tables of one direction, checked against each other.
fn direction_tables(
    inputs: &StagedInputs,
    bval: InputFile,
    bvec: InputFile,
    direction: &'static str,
) -> Result<(GradientTable, GradientTable), ParamError> {
    let bvals = GradientTable::read(inputs.get(bval), 1)?;
    let bvecs = GradientTable::read(inputs.get(bvec), 3)?;
    if bvals.columns() != bvecs.columns() {
        return Err(ParamError::VolumeMismatch {
            direction,
            bvals: bvals.columns(),
            bvecs: bvecs.columns(),
        });
    }
    Ok((bvals, bvecs))
}

fn write(path: &Path, contents: &str) -> Result<(), ParamError> {
    fs::write(path, contents).map_err(|source| ParamError::Write {
        path: path.to_path_buf(),
        source,
    })
}

/// Write all four parameter files into `ws`.
pub fn synthesize(
    ws: &Workspace,
    inputs: &StagedInputs,
    protocol: &Protocol,
) -> Result<VolumeCounts, ParamError> {
    let (bval_ap, bvec_ap) = direction_tables(inputs, InputFile::BvalAp, InputFile::BvecAp, "AP")?;
    let (bval_pa, bvec_pa) = direction_tables(inputs, InputFile::BvalPa, InputFile::BvecPa, "PA")?;
    let counts = VolumeCounts {
        ap: bval_ap.columns(),
        pa: bval_pa.columns(),
    };
    let index = index_vector(counts.ap, counts.pa)?;

    write(&ws.file(Artifact::AcqParams), &acquisition_table(protocol))?;
    write(&ws.file(Artifact::IndexVector), &index_text(&index))?;
    write(
        &ws.file(Artifact::BvecConcat),
        &bvec_ap.concat(&bvec_pa)?.to_text(),
    )?;
    write(
        &ws.file(Artifact::BvalConcat),
        &bval_ap.concat(&bval_pa)?.to_text(),
    )?;
    Ok(counts)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquisition_table_default_protocol() {
        assert_eq!(
            acquisition_table(&Protocol::default()),
            "0 -1 0 0.09591\n0 1 0 0.09591\n"
        );
    }

    #[test]
    fn acquisition_table_is_pure() {
        let p = Protocol {
            echo_spacing_ms: 0.5,
            epi_factor: 101,
            ..Protocol::default()
        };
        assert_eq!(acquisition_table(&p), acquisition_table(&p));
        assert_eq!(acquisition_table(&p), "0 -1 0 0.05000\n0 1 0 0.05000\n");
    }

    #[test]
    fn index_vector_ones_then_twos() {
        let v = index_vector(3, 2).unwrap();
        assert_eq!(v, vec![1, 1, 1, 2, 2]);
        assert_eq!(index_text(&v), "1 1 1 2 2\n");

        let v = index_vector(64, 64).unwrap();
        assert_eq!(v.len(), 128);
        assert!(v[..64].iter().all(|&x| x == 1));
        assert!(v[64..].iter().all(|&x| x == 2));
    }

    #[test]
    fn index_vector_rejects_zero() {
        assert!(matches!(
            index_vector(0, 5),
            Err(ParamError::NoVolumes { direction: "AP" })
        ));
        assert!(matches!(
            index_vector(5, 0),
            Err(ParamError::NoVolumes { direction: "PA" })
        ));
    }

    #[test]
    fn concat_preserves_tokens_and_order() {
        let ap = GradientTable::parse("0 1000 1000\n", 1, "ap").unwrap();
        let pa = GradientTable::parse("5 995\n", 1, "pa").unwrap();
        let joined = ap.concat(&pa).unwrap();
        assert_eq!(joined.columns(), 5);
        assert_eq!(joined.to_text(), "0 1000 1000 5 995\n");

        let ap = GradientTable::parse("1 0\n0 1\n0 0\n", 3, "ap").unwrap();
        let pa = GradientTable::parse("-1\n0\n0.000\n", 3, "pa").unwrap();
        assert_eq!(
            ap.concat(&pa).unwrap().to_text(),
            "1 0 -1\n0 1 0\n0 0 0.000\n"
        );
    }

    #[test]
    fn concat_shape_mismatch() {
        let a = GradientTable::parse("1\n", 1, "a").unwrap();
        let b = GradientTable::parse("1\n2\n3\n", 3, "b").unwrap();
        assert!(matches!(
            a.concat(&b),
            Err(ParamError::ShapeMismatch { left: 1, right: 3 })
        ));
    }

    #[test]
    fn parse_rejects_bad_tables() {
        assert!(matches!(
            GradientTable::parse("1 2\n3 4\n", 1, "t"),
            Err(ParamError::RowCount { found: 2, .. })
        ));
        assert!(matches!(
            GradientTable::parse("1 2 3\n4 5\n6 7 8\n", 3, "t"),
            Err(ParamError::Ragged { row: 2, .. })
        ));
        assert!(matches!(
            GradientTable::parse("0 abc\n", 1, "t"),
            Err(ParamError::Malformed { .. })
        ));
        assert!(matches!(
            GradientTable::parse("\n\n", 1, "t"),
            Err(ParamError::RowCount { found: 0, .. })
        ));
    }

    #[test]
    fn parse_rejects_non_finite_values() {
        for bad in ["0 nan 1000\n", "0 inf\n", "-infinity 0\n", "0 NaN\n"] {
            assert!(
                matches!(
                    GradientTable::parse(bad, 1, "t"),
                    Err(ParamError::Malformed { .. })
                ),
                "{bad:?} was accepted"
            );
        }
        assert!(GradientTable::parse("0 1e3 -0.5\n", 1, "t").is_ok());
    }

    #[test]
    fn synthesize_rewrites_files_on_rerun() {
        use crate::layout::{Layout, PathKind};
        use crate::subject::SubjectSession;

        let dir = tempfile::tempdir().unwrap();
        let layout = Layout::new(dir.path().join("bids"), dir.path().join("out"));
        let s = SubjectSession::new("sub-01", "ses-01").unwrap();
        let write_input = |input: InputFile, text: &str| {
            let path = layout.path(&s, PathKind::Source(input));
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, text).unwrap();
        };
        write_input(InputFile::BvalAp, "0 1000 1000\n");
        write_input(InputFile::BvecAp, "1 0 0\n0 1 0\n0 0 1\n");
        write_input(InputFile::BvalPa, "0 1000\n");
        write_input(InputFile::BvecPa, "1 0\n0 1\n0 0\n");

        let ws = layout.workspace(&s);
        fs::create_dir_all(ws.root()).unwrap();
        let inputs = StagedInputs::in_place(&layout, &s);
        let protocol = Protocol::default();

        let first = synthesize(&ws, &inputs, &protocol).unwrap();
        assert_eq!(first, VolumeCounts { ap: 3, pa: 2 });
        fs::write(ws.file(Artifact::IndexVector), "9 9 9 9 9 9 9 9\n").unwrap();

        let second = synthesize(&ws, &inputs, &protocol).unwrap();
        assert_eq!(second, first);
        let read = |a: Artifact| fs::read_to_string(ws.file(a)).unwrap();
        assert_eq!(read(Artifact::IndexVector), "1 1 1 2 2\n");
        assert_eq!(read(Artifact::BvalConcat), "0 1000 1000 0 1000\n");
        assert_eq!(read(Artifact::BvecConcat), "1 0 0 1 0\n0 1 0 0 1\n0 0 1 0 0\n");
        assert_eq!(read(Artifact::AcqParams), acquisition_table(&protocol));

        // a different PA table replaces, never extends, the previous output
        write_input(InputFile::BvalPa, "5\n");
        write_input(InputFile::BvecPa, "1\n0\n0\n");
        let third = synthesize(&ws, &inputs, &protocol).unwrap();
        assert_eq!(third, VolumeCounts { ap: 3, pa: 1 });
        assert_eq!(read(Artifact::IndexVector), "1 1 1 2\n");
        assert_eq!(read(Artifact::BvalConcat), "0 1000 1000 5\n");
    }

    #[test]
    fn parse_tolerates_trailing_whitespace() {
        let t = GradientTable::parse("  0 1000\t1000  \n\n", 1, "t").unwrap();
        assert_eq!(t.columns(), 3);
    }
}
