// src/table.rs
//! CSV input/output: the input table, the annotated results table and the
//! human review sheet.
//!
//! Results append `flagged`, `reason`, `details` to the input columns. The review
//! sheet keeps only flagged rows and adds two empty columns for reviewers. A run
//! with no flagged rows writes no review sheet at all.

use crate::decision::ModerationDecision;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const FLAGGED_COLUMN: &str = "flagged";
pub const REASON_COLUMN: &str = "reason";
pub const DETAILS_COLUMN: &str = "details";
pub const DECISION_COLUMNS: [&str; 3] = [FLAGGED_COLUMN, REASON_COLUMN, DETAILS_COLUMN];
pub const REVIEW_COLUMNS: [&str; 2] = ["reviewer_decision", "reviewer_comments"];

#[derive(Debug, Error)]
pub enum TableError {
    #[error("input file not found at {0}")]
    NotFound(PathBuf),

    #[error("column '{column}' not found in {path} (available: {available})")]
    MissingColumn {
        column: String,
        path: PathBuf,
        available: String,
    },

    #[error("csv error in {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("writing {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// One input row. The text column is designated by index; other fields are opaque.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputRecord {
    pub fields: Vec<String>,
    text_index: usize,
}

impl InputRecord {
    pub fn new(fields: Vec<String>, text_index: usize) -> Self {
        Self { fields, text_index }
    }

    /// Moderation input; a short row yields "".
    pub fn text(&self) -> &str {
        self.fields
            .get(self.text_index)
            .map(String::as_str)
            .unwrap_or("")
    }
}

/// An input record with its decision attached (one output row).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModeratedRecord {
    pub record: InputRecord,
    pub decision: ModerationDecision,
}

#[derive(Debug, Clone)]
pub struct InputTable {
    headers: Vec<String>,
    text_column: String,
    records: Vec<InputRecord>,
}

impl InputTable {
    /// Read a CSV file; fails before any processing if the file or column is missing.
    pub fn read(path: &Path, text_column: &str) -> Result<Self, TableError> {
        if !path.exists() {
            return Err(TableError::NotFound(path.to_path_buf()));
        }
        let file = fs::File::open(path).map_err(|source| TableError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_reader(file, text_column, path)
    }

    /// `origin` is only used in error messages.
    pub fn from_reader<R: Read>(
        reader: R,
        text_column: &str,
        origin: &Path,
    ) -> Result<Self, TableError> {
        let csv_err = |source| TableError::Csv {
            path: origin.to_path_buf(),
            source,
        };
        let mut rdr = csv::ReaderBuilder::new().has_headers(true).from_reader(reader);
        let headers: Vec<String> = rdr
            .headers()
            .map_err(csv_err)?
            .iter()
            .map(str::to_string)
            .collect();
        let text_index = column_index(&headers, text_column, origin)?;

        let mut records = Vec::new();
        for row in rdr.records() {
            let row = row.map_err(csv_err)?;
            records.push(InputRecord::new(
                row.iter().map(str::to_string).collect(),
                text_index,
            ));
        }

        Ok(Self {
            headers,
            text_column: text_column.to_string(),
            records,
        })
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn text_column(&self) -> &str {
        &self.text_column
    }

    pub fn records(&self) -> &[InputRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn into_parts(self) -> (Vec<String>, Vec<InputRecord>) {
        (self.headers, self.records)
    }
}

fn column_index(headers: &[String], column: &str, origin: &Path) -> Result<usize, TableError> {
    headers
        .iter()
        .position(|h| h == column)
        .ok_or_else(|| TableError::MissingColumn {
            column: column.to_string(),
            path: origin.to_path_buf(),
            available: headers.join(", "),
        })
}

/// Input columns that survive into the results table: any input column that collides
/// with a decision column name is replaced by the fresh decision.
fn kept_input_columns(headers: &[String]) -> Vec<usize> {
    headers
        .iter()
        .enumerate()
        .filter(|(_, h)| !DECISION_COLUMNS.contains(&h.as_str()))
        .map(|(i, _)| i)
        .collect()
}

fn output_header(headers: &[String], kept: &[usize]) -> Vec<String> {
    kept.iter()
        .map(|&i| headers[i].clone())
        .chain(DECISION_COLUMNS.iter().map(|c| c.to_string()))
        .collect()
}

fn output_row(row: &ModeratedRecord, kept: &[usize]) -> Vec<String> {
    kept.iter()
        .map(|&i| row.record.fields.get(i).cloned().unwrap_or_default())
        .chain([
            row.decision.flagged.to_string(),
            row.decision.reason.as_str().to_string(),
            row.decision.details.clone(),
        ])
        .collect()
}

pub(crate) fn write_csv<I>(path: &Path, header: &[String], rows: I) -> Result<(), TableError>
where
    I: IntoIterator<Item = Vec<String>>,
{
    let csv_err = |source| TableError::Csv {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|source| TableError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    let mut writer = csv::Writer::from_path(path).map_err(csv_err)?;
    writer.write_record(header).map_err(csv_err)?;
    for row in rows {
        writer.write_record(&row).map_err(csv_err)?;
    }
    writer.flush().map_err(|source| TableError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(())
}

/// Write the annotated results table (all rows, input order).
pub fn write_results(
    path: &Path,
    headers: &[String],
    rows: &[ModeratedRecord],
) -> Result<(), TableError> {
    let kept = kept_input_columns(headers);
    write_csv(
        path,
        &output_header(headers, &kept),
        rows.iter().map(|r| output_row(r, &kept)),
    )
}

/// Write the review sheet for flagged rows. Returns the number of rows written;
/// with zero flagged rows no file is left at `path` (a stale sheet is removed).
pub fn write_review_sheet(
    path: &Path,
    headers: &[String],
    rows: &[ModeratedRecord],
) -> Result<usize, TableError> {
    let kept = kept_input_columns(headers);
    let flagged: Vec<Vec<String>> = rows
        .iter()
        .filter(|r| r.decision.flagged)
        .map(|r| with_review_columns(output_row(r, &kept)))
        .collect();
    if flagged.is_empty() {
        remove_stale(path)?;
        return Ok(0);
    }
    let count = flagged.len();
    let header = with_review_header(output_header(headers, &kept));
    write_csv(path, &header, flagged)?;
    Ok(count)
}

/// Build a review sheet from an existing results CSV (any table with a `flagged` column).
/// Same zero-rows rule as `write_review_sheet`.
pub fn derive_review_sheet(results: &Path, review: &Path) -> Result<usize, TableError> {
    if !results.exists() {
        return Err(TableError::NotFound(results.to_path_buf()));
    }
    let csv_err = |source| TableError::Csv {
        path: results.to_path_buf(),
        source,
    };
    let mut rdr = csv::Reader::from_path(results).map_err(csv_err)?;
    let headers: Vec<String> = rdr
        .headers()
        .map_err(csv_err)?
        .iter()
        .map(str::to_string)
        .collect();
    let flag_idx = column_index(&headers, FLAGGED_COLUMN, results)?;

    let mut flagged = Vec::new();
    for row in rdr.records() {
        let row = row.map_err(csv_err)?;
        if row.get(flag_idx).is_some_and(is_truthy) {
            flagged.push(with_review_columns(row.iter().map(str::to_string).collect()));
        }
    }
    if flagged.is_empty() {
        remove_stale(review)?;
        return Ok(0);
    }
    let count = flagged.len();
    write_csv(review, &with_review_header(headers), flagged)?;
    Ok(count)
}

/// Data rows: reviewer cells start empty.
fn with_review_columns(mut row: Vec<String>) -> Vec<String> {
    row.extend(REVIEW_COLUMNS.iter().map(|_| String::new()));
    row
}

fn with_review_header(mut header: Vec<String>) -> Vec<String> {
    header.extend(REVIEW_COLUMNS.iter().map(|c| c.to_string()));
    header
}

/// A sheet left over from an earlier run would no longer match the results.
fn remove_stale(path: &Path) -> Result<(), TableError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(TableError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

fn is_truthy(cell: &str) -> bool {
    matches!(cell.trim().to_ascii_lowercase().as_str(), "true" | "1" | "yes")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decision::Reason;

    fn decided(fields: &[&str], flagged: bool) -> ModeratedRecord {
        ModeratedRecord {
            record: InputRecord::new(fields.iter().map(|s| s.to_string()).collect(), 1),
            decision: if flagged {
                ModerationDecision::keyword_match("x")
            } else {
                ModerationDecision::new(false, Reason::LlmOk, "LLM response: 'ok'")
            },
        }
    }

    #[test]
    fn reads_designated_column() {
        let data = "id,text\n1,hello\n2,\"a, quoted\"\n3,\n";
        let t = InputTable::from_reader(data.as_bytes(), "text", Path::new("mem")).unwrap();
        assert_eq!(t.len(), 3);
        assert_eq!(t.records()[1].text(), "a, quoted");
        assert_eq!(t.records()[2].text(), "");
    }

    #[test]
    fn missing_column_is_an_input_error() {
        let data = "id,body\n1,hello\n";
        let err = InputTable::from_reader(data.as_bytes(), "text", Path::new("mem")).unwrap_err();
        match err {
            TableError::MissingColumn { available, .. } => assert_eq!(available, "id, body"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn ragged_rows_are_rejected() {
        let data = "id,text\n1,hello,extra\n";
        assert!(matches!(
            InputTable::from_reader(data.as_bytes(), "text", Path::new("mem")),
            Err(TableError::Csv { .. })
        ));
    }

    #[test]
    fn colliding_input_columns_are_replaced() {
        let headers = vec!["id".to_string(), "text".to_string(), "reason".to_string()];
        let kept = kept_input_columns(&headers);
        assert_eq!(kept, vec![0, 1]);
        assert_eq!(
            output_header(&headers, &kept),
            vec!["id", "text", "flagged", "reason", "details"]
        );
    }

    #[test]
    fn review_sheet_counts_and_columns() {
        let dir = tempfile::tempdir().unwrap();
        let headers = vec!["id".to_string(), "text".to_string()];
        let rows = vec![
            decided(&["1", "bad"], true),
            decided(&["2", "fine"], false),
            decided(&["3", "worse"], true),
        ];
        let review = dir.path().join("review.csv");
        assert_eq!(write_review_sheet(&review, &headers, &rows).unwrap(), 2);

        let mut rdr = csv::Reader::from_path(&review).unwrap();
        let hdr: Vec<String> = rdr.headers().unwrap().iter().map(str::to_string).collect();
        assert_eq!(
            hdr,
            vec![
                "id",
                "text",
                "flagged",
                "reason",
                "details",
                "reviewer_decision",
                "reviewer_comments"
            ]
        );
        let recs: Vec<csv::StringRecord> = rdr.records().map(Result::unwrap).collect();
        assert_eq!(recs.len(), 2);
        assert_eq!(&recs[1][0], "3");
        assert_eq!(&recs[1][5], "");
        assert_eq!(&recs[1][6], "");
    }

    #[test]
    fn no_flagged_rows_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let headers = vec!["id".to_string(), "text".to_string()];
        let rows = vec![decided(&["1", "fine"], false)];
        let review = dir.path().join("review.csv");
        assert_eq!(write_review_sheet(&review, &headers, &rows).unwrap(), 0);
        assert!(!review.exists());
    }

    #[test]
    fn rerun_without_flags_removes_old_sheet() {
        let dir = tempfile::tempdir().unwrap();
        let headers = vec!["id".to_string(), "text".to_string()];
        let review = dir.path().join("review.csv");

        let first = vec![decided(&["1", "bad"], true)];
        assert_eq!(write_review_sheet(&review, &headers, &first).unwrap(), 1);
        assert!(review.exists());

        let second = vec![decided(&["1", "fine"], false)];
        assert_eq!(write_review_sheet(&review, &headers, &second).unwrap(), 0);
        assert!(!review.exists());
    }

    #[test]
    fn derived_sheet_has_reviewer_header_and_clears_stale_file() {
        let dir = tempfile::tempdir().unwrap();
        let results = dir.path().join("results.csv");
        let review = dir.path().join("review.csv");
        fs::write(
            &results,
            "id,text,flagged,reason,details\n1,bad,true,keyword_match,x\n2,ok,false,llm_ok,y\n",
        )
        .unwrap();

        assert_eq!(derive_review_sheet(&results, &review).unwrap(), 1);
        let mut rdr = csv::Reader::from_path(&review).unwrap();
        let hdr: Vec<String> = rdr.headers().unwrap().iter().map(str::to_string).collect();
        assert_eq!(
            hdr,
            vec![
                "id",
                "text",
                "flagged",
                "reason",
                "details",
                "reviewer_decision",
                "reviewer_comments"
            ]
        );

        fs::write(&results, "id,text,flagged,reason,details\n2,ok,false,llm_ok,y\n").unwrap();
        assert_eq!(derive_review_sheet(&results, &review).unwrap(), 0);
        assert!(!review.exists());
    }

    #[test]
    fn truthy_cells() {
        assert!(is_truthy("True"));
        assert!(is_truthy(" true "));
        assert!(is_truthy("1"));
        assert!(!is_truthy("false"));
        assert!(!is_truthy(""));
    }
}
