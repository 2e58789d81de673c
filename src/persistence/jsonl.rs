use crate::error::{PipelineError, Result};
use crate::persistence::{analysis_id_of, Row, RowStore, Table, TableRows};
use chrono::Utc;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

const SYNOPSIS_FILE: &str = "analyses.jsonl";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SynopsisRecord {
    analysis_id: i64,
    tool_version: String,
    saved_at: String,
    synopsis: String,
}

/// One JSON object per line, one file per table, under a single directory.
///
/// A replacement rewrites each touched table into a temp file in the same directory and
/// renames them into place only after every table has been written.
pub struct JsonlRowStore {
    root: PathBuf,
}

impl JsonlRowStore {
    pub fn open(root: &Path) -> Result<Self> {
        fs::create_dir_all(root)?;
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    pub fn table_path(&self, table: Table) -> PathBuf {
        self.root.join(format!("{}.jsonl", table.name()))
    }

    fn stage<T: Serialize>(&self, records: &[T]) -> Result<NamedTempFile> {
        let mut temp = NamedTempFile::new_in(&self.root)?;
        {
            let mut writer = BufWriter::new(temp.as_file_mut());
            for record in records {
                serde_json::to_writer(&mut writer, record)?;
                writer.write_all(b"\n")?;
            }
            writer.flush()?;
        }
        Ok(temp)
    }
}

fn read_lines<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<Vec<T>> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let mut records = Vec::new();
    for (idx, line) in BufReader::new(File::open(path)?).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let record = serde_json::from_str(&line).map_err(|e| {
            PipelineError::Persistence(format!("{} line {}: {}", path.display(), idx + 1, e))
        })?;
        records.push(record);
    }
    Ok(records)
}

impl RowStore for JsonlRowStore {
    fn replace_rows(&mut self, analysis_id: i64, tables: Vec<TableRows>) -> Result<()> {
        let mut merged: BTreeMap<Table, Vec<Row>> = BTreeMap::new();
        for batch in tables {
            merged.entry(batch.table).or_default().extend(batch.rows);
        }

        let mut staged = Vec::with_capacity(merged.len());
        for (table, rows) in merged {
            let path = self.table_path(table);
            let mut kept: Vec<Row> = read_lines(&path)?;
            let before = kept.len();
            kept.retain(|row| analysis_id_of(row) != Some(analysis_id));
            debug!("{}: deleted {} rows for analysis {}", table, before - kept.len(), analysis_id);

            info!("{}: inserting {} rows for analysis {}", table, rows.len(), analysis_id);
            kept.extend(rows);
            staged.push((self.stage(&kept)?, path));
        }

        for (temp, path) in staged {
            temp.persist(&path)?;
        }
        Ok(())
    }

    fn save_synopsis(&mut self, analysis_id: i64, synopsis: &str) -> Result<()> {
        let path = self.root.join(SYNOPSIS_FILE);
        let mut records: Vec<SynopsisRecord> = read_lines(&path)?;
        records.retain(|r| r.analysis_id != analysis_id);
        records.push(SynopsisRecord {
            analysis_id,
            tool_version: env!("CARGO_PKG_VERSION").to_string(),
            saved_at: Utc::now().to_rfc3339(),
            synopsis: synopsis.to_string(),
        });

        self.stage(&records)?.persist(&path)?;
        Ok(())
    }

    fn rows(&self, table: Table, analysis_id: i64) -> Result<Vec<Row>> {
        let rows: Vec<Row> = read_lines(&self.table_path(table))?;
        Ok(rows
            .into_iter()
            .filter(|row| analysis_id_of(row) == Some(analysis_id))
            .collect())
    }

    fn synopsis(&self, analysis_id: i64) -> Result<Option<String>> {
        let records: Vec<SynopsisRecord> = read_lines(&self.root.join(SYNOPSIS_FILE))?;
        Ok(records
            .into_iter()
            .find(|r| r.analysis_id == analysis_id)
            .map(|r| r.synopsis))
    }
}
