// ============================================================
// Layer 4 — Sentence Tables
// ============================================================
// The segmentation step exports one CSV per document
// (`{doc:02}_sent_db.csv`) with a row per sentence: its text,
// paragraph / sentence positions and bookkeeping columns.
// Error analysis joins predictions back to these rows by
// (par_idx_in_doc, sent_idx_in_par).
//
// pandas writes integer columns as floats ("3.0"), so the two
// position columns are parsed through f64.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::domain::document::DocId;
use crate::domain::error::{PipelineError, Result};

pub const PAR_IDX_COLUMN: &str = "par_idx_in_doc";
pub const SENT_IDX_COLUMN: &str = "sent_idx_in_par";

#[derive(Debug, Clone, PartialEq)]
pub struct SentenceRow {
    pub par_idx_in_doc: i64,
    pub sent_idx_in_par: i64,
    /// Every column of the row, by header name
    pub columns: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SentenceTable {
    rows: Vec<SentenceRow>,
}

impl SentenceTable {
    pub fn new(rows: Vec<SentenceRow>) -> Self {
        Self { rows }
    }

    /// File name used by the segmentation export.
    pub fn file_name(doc_id: DocId) -> String {
        format!("{doc_id:02}_sent_db.csv")
    }

    pub fn path_for(dir: impl AsRef<Path>, doc_id: DocId) -> PathBuf {
        dir.as_ref().join(Self::file_name(doc_id))
    }

    /// Read a sentence table from any CSV source.
    pub fn from_reader<R: std::io::Read>(reader: R) -> Result<Self> {
        let mut csv = csv::Reader::from_reader(reader);
        let headers = csv.headers()?.clone();
        for required in [PAR_IDX_COLUMN, SENT_IDX_COLUMN] {
            if !headers.iter().any(|h| h == required) {
                return Err(PipelineError::invalid_input(format!(
                    "sentence table is missing column '{required}'"
                )));
            }
        }

        let mut rows = Vec::new();
        for (line, record) in csv.records().enumerate() {
            let record = record?;
            let columns: BTreeMap<String, String> = headers
                .iter()
                .zip(record.iter())
                .map(|(h, v)| (h.to_string(), v.to_string()))
                .collect();
            rows.push(SentenceRow {
                par_idx_in_doc: parse_position(&columns, PAR_IDX_COLUMN, line)?,
                sent_idx_in_par: parse_position(&columns, SENT_IDX_COLUMN, line)?,
                columns,
            });
        }
        Ok(Self { rows })
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let file = std::fs::File::open(path.as_ref())?;
        Self::from_reader(file)
    }

    pub fn rows(&self) -> &[SentenceRow] {
        &self.rows
    }

    /// All rows at the given paragraph / sentence position.
    pub fn matches(&self, par_idx: i64, sent_idx: i64) -> Vec<&SentenceRow> {
        self.rows
            .iter()
            .filter(|r| r.par_idx_in_doc == par_idx && r.sent_idx_in_par == sent_idx)
            .collect()
    }
}

fn parse_position(columns: &BTreeMap<String, String>, name: &str, line: usize) -> Result<i64> {
    let raw = columns.get(name).map(String::as_str).unwrap_or("");
    raw.trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.fract() == 0.0)
        .map(|v| v as i64)
        .ok_or_else(|| PipelineError::invalid_input(format!("row {line}: '{name}' = '{raw}' is not an integer")))
}

/// Load the tables of the given documents from `dir`.
pub fn load_tables<'i>(
    dir: impl AsRef<Path>,
    doc_ids: impl IntoIterator<Item = &'i DocId>,
) -> Result<BTreeMap<DocId, SentenceTable>> {
    let mut tables = BTreeMap::new();
    for &doc_id in doc_ids {
        let path = SentenceTable::path_for(dir.as_ref(), doc_id);
        let table = SentenceTable::load(&path).map_err(|e| {
            PipelineError::invalid_input(format!("cannot read '{}': {e}", path.display()))
        })?;
        tables.insert(doc_id, table);
    }
    Ok(tables)
}

#[cfg(test)]
mod tests {
    use super::*;

    const CSV: &str = "text,par_idx_in_doc,sent_idx_in_par,is_nar,par_type\n\
                       Hello there,0.0,0.0,0,therapist\n\
                       I remember,1.0,0.0,1,client\n\
                       it was cold,1.0,1.0,1,client\n";

    #[test]
    fn test_reads_float_positions() {
        let table = SentenceTable::from_reader(CSV.as_bytes()).unwrap();
        assert_eq!(table.rows().len(), 3);
        assert_eq!(table.rows()[2].par_idx_in_doc, 1);
        assert_eq!(table.rows()[2].sent_idx_in_par, 1);
        assert_eq!(table.rows()[1].columns["text"], "I remember");
    }

    #[test]
    fn test_matches() {
        let table = SentenceTable::from_reader(CSV.as_bytes()).unwrap();
        assert_eq!(table.matches(1, 0).len(), 1);
        assert!(table.matches(4, 0).is_empty());
    }

    #[test]
    fn test_missing_position_column() {
        let err = SentenceTable::from_reader("text,sent_idx_in_par\nx,0\n".as_bytes()).unwrap_err();
        assert!(err.to_string().contains("par_idx_in_doc"));
    }

    #[test]
    fn test_file_name_is_zero_padded() {
        assert_eq!(SentenceTable::file_name(3), "03_sent_db.csv");
        assert_eq!(SentenceTable::file_name(12), "12_sent_db.csv");
    }

    #[test]
    fn test_load_tables_from_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(SentenceTable::path_for(dir.path(), 7), CSV).unwrap();
        let tables = load_tables(dir.path(), &[7]).unwrap();
        assert_eq!(tables[&7].rows().len(), 3);
        assert!(load_tables(dir.path(), &[8]).is_err());
    }
}
