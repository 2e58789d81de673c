//! Row-shaped output of the aggregators and the stores that keep it.
//!
//! Every aggregator writes through [`RowStore::replace_rows`]: rows already stored for the
//! analysis are dropped and the new ones inserted as one unit, so a re-run never leaves a mix
//! of old and new rows behind.

pub mod jsonl;
pub mod memory;

pub use jsonl::JsonlRowStore;
pub use memory::MemoryRowStore;

use crate::error::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// One output record, column name to value.
pub type Row = BTreeMap<String, Value>;

pub const ANALYSIS_ID: &str = "analysis_id";

/// Logical output tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    Coverage,
    NtSnpsByPos,
    AaSnpsByCodon,
    AaSnpsByRead,
    AlignmentSummary,
    AlignmentSummaryJunction,
    AlignmentMetrics,
}

impl Table {
    pub fn name(&self) -> &'static str {
        match self {
            Table::Coverage => "sequence_coverage",
            Table::NtSnpsByPos => "nt_snps_by_pos",
            Table::AaSnpsByCodon => "aa_snps_by_codon",
            Table::AaSnpsByRead => "aa_snps_by_read",
            Table::AlignmentSummary => "alignment_summary",
            Table::AlignmentSummaryJunction => "alignment_summary_junction",
            Table::AlignmentMetrics => "alignment_metrics",
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Rows for one table, as produced by one aggregator.
#[derive(Debug, Clone, PartialEq)]
pub struct TableRows {
    pub table: Table,
    pub rows: Vec<Row>,
}

impl TableRows {
    pub fn new(table: Table, rows: Vec<Row>) -> Self {
        Self { table, rows }
    }
}

/// The analysis that output rows belong to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisModel {
    pub analysis_id: i64,
    /// Id of the alignment file in the caller's records, when it has one.
    pub alignment_file: Option<i64>,
}

impl AnalysisModel {
    pub fn new(analysis_id: i64) -> Self {
        Self {
            analysis_id,
            alignment_file: None,
        }
    }

    pub fn with_alignment_file(mut self, file_id: i64) -> Self {
        self.alignment_file = Some(file_id);
        self
    }

    /// A fresh row carrying this analysis' id.
    pub fn row(&self) -> Row {
        let mut row = Row::new();
        row.insert(ANALYSIS_ID.to_string(), Value::from(self.analysis_id));
        row
    }
}

pub fn analysis_id_of(row: &Row) -> Option<i64> {
    row.get(ANALYSIS_ID).and_then(Value::as_i64)
}

/// Destination for aggregator output.
pub trait RowStore {
    /// Deletes every row of `analysis_id` from the given tables, then inserts `tables`.
    /// Either all of it becomes visible or none of it does.
    fn replace_rows(&mut self, analysis_id: i64, tables: Vec<TableRows>) -> Result<()>;

    /// Stores the human-readable parameter dump of a pass against the analysis.
    fn save_synopsis(&mut self, analysis_id: i64, synopsis: &str) -> Result<()>;

    fn rows(&self, table: Table, analysis_id: i64) -> Result<Vec<Row>>;

    fn synopsis(&self, analysis_id: i64) -> Result<Option<String>>;
}
