// ============================================================
// Layer 4 — Pre-tokenised TSV Reader
// ============================================================
// Reads examples that were tokenised offline. Every cell except
// the label is a JSON array of integers:
//
//   labeled:    input_ids  input_mask  segment_ids  label
//   unlabeled:  ori_input_ids  ori_input_mask  ori_segment_ids
//               aug_input_ids  aug_input_mask  aug_segment_ids
//
// An optional header row is recognised by its first cell not
// starting with '['. Blank lines are skipped. Any other malformed
// row is a UdaError::Data carrying the file and the 1-based line.

use std::{
    fs,
    marker::PhantomData,
    path::{Path, PathBuf},
};

use crate::domain::{
    error::{Result, UdaError},
    example::{LabeledExample, TokenSequence, UnlabeledPair},
    traits::ExampleSource,
};

const LABELED_COLUMNS:   usize = 4;
const UNLABELED_COLUMNS: usize = 6;

/// Row layout of one kind of TSV file
pub trait TsvRow: Sized {
    const COLUMNS: usize;

    fn parse(cells: &[&str], num_classes: usize) -> std::result::Result<Self, String>;

    fn seq_len(&self) -> usize;
}

fn id_list(cell: &str, column: &str) -> std::result::Result<Vec<u32>, String> {
    serde_json::from_str::<Vec<u32>>(cell.trim())
        .map_err(|e| format!("column '{column}' is not a JSON integer list: {e}"))
}

/// ids, mask, segments in file order → TokenSequence
fn sequence(cells: &[&str], prefix: &str) -> std::result::Result<TokenSequence, String> {
    let ids  = id_list(cells[0], &format!("{prefix}input_ids"))?;
    let mask = id_list(cells[1], &format!("{prefix}input_mask"))?;
    let segs = id_list(cells[2], &format!("{prefix}segment_ids"))?;
    TokenSequence::new(ids, segs, mask).map_err(|e| e.to_string())
}

impl TsvRow for LabeledExample {
    const COLUMNS: usize = LABELED_COLUMNS;

    fn parse(cells: &[&str], num_classes: usize) -> std::result::Result<Self, String> {
        let tokens = sequence(&cells[..3], "")?;
        let label: usize = cells[3]
            .trim()
            .parse()
            .map_err(|_| format!("label '{}' is not a class index", cells[3].trim()))?;
        if label >= num_classes {
            return Err(format!("label {label} out of range for {num_classes} classes"));
        }
        Ok(LabeledExample::new(tokens, label))
    }

    fn seq_len(&self) -> usize { self.tokens.len() }
}

impl TsvRow for UnlabeledPair {
    const COLUMNS: usize = UNLABELED_COLUMNS;

    fn parse(cells: &[&str], _num_classes: usize) -> std::result::Result<Self, String> {
        let original  = sequence(&cells[..3], "ori_")?;
        let augmented = sequence(&cells[3..], "aug_")?;
        if original.len() != augmented.len() {
            return Err(format!(
                "original and augmented views differ in length ({} vs {})",
                original.len(),
                augmented.len()
            ));
        }
        Ok(UnlabeledPair::new(original, augmented))
    }

    fn seq_len(&self) -> usize { self.original.len() }
}

/// Reads one TSV file of rows of type `T`.
/// Implements the ExampleSource trait from Layer 3.
pub struct TsvExampleReader<T> {
    path:        PathBuf,
    num_classes: usize,
    _row:        PhantomData<T>,
}

impl TsvExampleReader<LabeledExample> {
    pub fn labeled(path: impl Into<PathBuf>, num_classes: usize) -> Self {
        Self { path: path.into(), num_classes, _row: PhantomData }
    }
}

impl TsvExampleReader<UnlabeledPair> {
    pub fn unlabeled(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), num_classes: 0, _row: PhantomData }
    }
}

impl<T> TsvExampleReader<T> {
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn data_error(&self, line: usize, message: impl Into<String>) -> UdaError {
        UdaError::Data { path: self.path.clone(), line, message: message.into() }
    }
}

impl<T: TsvRow> ExampleSource<T> for TsvExampleReader<T> {
    fn load_all(&self) -> Result<Vec<T>> {
        let text = fs::read_to_string(&self.path)?;
        let mut rows: Vec<T> = Vec::new();
        let mut seq_len      = None;
        let mut first_line   = true;

        for (i, line) in text.lines().enumerate() {
            let line_no = i + 1;
            if line.trim().is_empty() {
                continue;
            }
            let cells: Vec<&str> = line.split('\t').collect();

            // Header: first cell is a column name rather than a list
            let is_header = first_line && !cells[0].trim_start().starts_with('[');
            first_line = false;
            if is_header {
                tracing::debug!("Skipping header of '{}'", self.path.display());
                continue;
            }
            if cells.len() != T::COLUMNS {
                return Err(self.data_error(
                    line_no,
                    format!("expected {} tab-separated columns, found {}", T::COLUMNS, cells.len()),
                ));
            }

            let row = T::parse(&cells, self.num_classes).map_err(|m| self.data_error(line_no, m))?;
            let len = row.seq_len();
            match seq_len {
                None => seq_len = Some(len),
                Some(expected) if expected != len => {
                    return Err(UdaError::shape(
                        format!("'{}' line {line_no} (seq_len)", self.path.display()),
                        &[expected],
                        &[len],
                    ));
                }
                Some(_) => {}
            }
            rows.push(row);
        }

        if rows.is_empty() {
            tracing::warn!("'{}' contains no examples", self.path.display());
        } else {
            tracing::info!("Loaded {} examples from '{}'", rows.len(), self.path.display());
        }
        Ok(rows)
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn tsv(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_reads_labeled_rows_with_header() {
        let file = tsv(
            "input_ids\tinput_mask\tsegment_ids\tlabel\n\
             [101, 7, 102]\t[1, 1, 1]\t[0, 0, 0]\t1\n\
             [101, 9, 0]\t[1, 1, 0]\t[0, 0, 0]\t0\n",
        );
        let rows = TsvExampleReader::labeled(file.path(), 2).load_all().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].label, 1);
        assert_eq!(rows[1].tokens.input_ids, vec![101, 9, 0]);
        assert_eq!(rows[1].tokens.attention_mask, vec![1, 1, 0]);
    }

    #[test]
    fn test_reads_unlabeled_pairs_without_header() {
        let file = tsv("[1, 2]\t[1, 1]\t[0, 0]\t[1, 5]\t[1, 1]\t[0, 0]\n");
        let rows = TsvExampleReader::unlabeled(file.path()).load_all().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].augmented.input_ids, vec![1, 5]);
    }

    #[test]
    fn test_bad_cell_reports_line() {
        let file = tsv("input_ids\tinput_mask\tsegment_ids\tlabel\n[1, 2]\t[1, x]\t[0, 0]\t0\n");
        let err  = TsvExampleReader::labeled(file.path(), 2).load_all().unwrap_err();
        match err {
            UdaError::Data { line, message, .. } => {
                assert_eq!(line, 2);
                assert!(message.contains("input_mask"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_label_out_of_range() {
        let file = tsv("[1, 2]\t[1, 1]\t[0, 0]\t4\n");
        let err  = TsvExampleReader::labeled(file.path(), 3).load_all().unwrap_err();
        assert!(matches!(err, UdaError::Data { line: 1, .. }));
    }

    #[test]
    fn test_ragged_rows_are_shape_mismatch() {
        let file = tsv("[1, 2]\t[1, 1]\t[0, 0]\t0\n[1, 2, 3]\t[1, 1, 1]\t[0, 0, 0]\t1\n");
        let err  = TsvExampleReader::labeled(file.path(), 2).load_all().unwrap_err();
        assert!(matches!(err, UdaError::ShapeMismatch { .. }));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = TsvExampleReader::labeled("/definitely/not/here.tsv", 2).load_all().unwrap_err();
        assert!(matches!(err, UdaError::Io(_)));
    }
}
