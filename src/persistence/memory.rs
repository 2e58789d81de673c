use crate::error::Result;
use crate::persistence::{analysis_id_of, Row, RowStore, Table, TableRows};
use std::collections::HashMap;

/// Keeps rows in memory. Used by library callers that post-process results themselves,
/// and by the tests.
#[derive(Debug, Default)]
pub struct MemoryRowStore {
    tables: HashMap<Table, Vec<Row>>,
    synopses: HashMap<i64, String>,
    commits: usize,
}

impl MemoryRowStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful [`replace_rows`](RowStore::replace_rows) calls.
    pub fn commits(&self) -> usize {
        self.commits
    }

    pub fn row_count(&self, table: Table) -> usize {
        self.tables.get(&table).map(Vec::len).unwrap_or(0)
    }
}

impl RowStore for MemoryRowStore {
    fn replace_rows(&mut self, analysis_id: i64, tables: Vec<TableRows>) -> Result<()> {
        for batch in &tables {
            if let Some(rows) = self.tables.get_mut(&batch.table) {
                rows.retain(|row| analysis_id_of(row) != Some(analysis_id));
            }
        }
        for batch in tables {
            self.tables.entry(batch.table).or_default().extend(batch.rows);
        }
        self.commits += 1;
        Ok(())
    }

    fn save_synopsis(&mut self, analysis_id: i64, synopsis: &str) -> Result<()> {
        self.synopses.insert(analysis_id, synopsis.to_string());
        Ok(())
    }

    fn rows(&self, table: Table, analysis_id: i64) -> Result<Vec<Row>> {
        Ok(self
            .tables
            .get(&table)
            .map(|rows| {
                rows.iter()
                    .filter(|row| analysis_id_of(row) == Some(analysis_id))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    fn synopsis(&self, analysis_id: i64) -> Result<Option<String>> {
        Ok(self.synopses.get(&analysis_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::AnalysisModel;
    use serde_json::json;

    fn row(model: &AnalysisModel, depth: u32) -> Row {
        let mut row = model.row();
        row.insert("depth".to_string(), json!(depth));
        row
    }

    #[test]
    fn replacing_drops_only_rows_of_the_same_analysis() {
        let first = AnalysisModel::new(1);
        let second = AnalysisModel::new(2);
        let mut store = MemoryRowStore::new();

        store
            .replace_rows(1, vec![TableRows::new(Table::Coverage, vec![row(&first, 5), row(&first, 6)])])
            .unwrap();
        store
            .replace_rows(2, vec![TableRows::new(Table::Coverage, vec![row(&second, 7)])])
            .unwrap();
        store
            .replace_rows(1, vec![TableRows::new(Table::Coverage, vec![row(&first, 9)])])
            .unwrap();

        let rows = store.rows(Table::Coverage, 1).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["depth"], json!(9));
        assert_eq!(store.rows(Table::Coverage, 2).unwrap().len(), 1);
        assert_eq!(store.commits(), 3);
    }

    #[test]
    fn synopsis_is_kept_per_analysis() {
        let mut store = MemoryRowStore::new();
        store.save_synopsis(4, "NT Coverage Aggregator:\n").unwrap();
        assert_eq!(store.synopsis(4).unwrap().as_deref(), Some("NT Coverage Aggregator:\n"));
        assert!(store.synopsis(5).unwrap().is_none());
    }
}
