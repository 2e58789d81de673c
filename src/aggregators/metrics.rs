use crate::aggregators::{AlignmentAggregator, AlignmentContext};
use crate::alignment::PositionKind;
use crate::config::{AggregatorSettings, QualityThresholds};
use crate::error::Result;
use crate::persistence::{AnalysisModel, Table, TableRows};
use crate::reference::ReferenceLibrary;
use log::info;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::rc::Rc;

#[derive(Debug, Clone, Default, PartialEq)]
struct ReferenceMetrics {
    alignments: u64,
    mapq_sum: u64,
    mapq_count: u64,
    aligned_bases: u64,
    hq_mismatches: u64,
}

impl ReferenceMetrics {
    fn avg_mapq(&self) -> f64 {
        if self.mapq_count > 0 {
            self.mapq_sum as f64 / self.mapq_count as f64
        } else {
            0.0
        }
    }
}

/// Summary statistics of one pass: per-reference alignment counts, mapping quality, aligned
/// bases and high-quality mismatches, plus totals for records that were not counted.
pub struct MetricsAggregator {
    thresholds: QualityThresholds,
    library: Rc<ReferenceLibrary>,
    by_reference: BTreeMap<String, ReferenceMetrics>,
    unmapped: u64,
    duplicates: u64,
    not_primary: u64,
}

impl MetricsAggregator {
    pub fn new(settings: &AggregatorSettings, library: Rc<ReferenceLibrary>) -> Self {
        Self {
            thresholds: settings.quality,
            library,
            by_reference: BTreeMap::new(),
            unmapped: 0,
            duplicates: 0,
            not_primary: 0,
        }
    }

    pub fn alignments_for(&self, reference_name: &str) -> u64 {
        self.by_reference.get(reference_name).map_or(0, |m| m.alignments)
    }

    pub fn avg_mapq_for(&self, reference_name: &str) -> Option<f64> {
        self.by_reference.get(reference_name).map(ReferenceMetrics::avg_mapq)
    }

    pub fn aligned_bases_for(&self, reference_name: &str) -> u64 {
        self.by_reference.get(reference_name).map_or(0, |m| m.aligned_bases)
    }

    pub fn hq_mismatches_for(&self, reference_name: &str) -> u64 {
        self.by_reference.get(reference_name).map_or(0, |m| m.hq_mismatches)
    }

    /// Unmapped, duplicate and secondary or supplementary record counts.
    pub fn skipped(&self) -> (u64, u64, u64) {
        (self.unmapped, self.duplicates, self.not_primary)
    }
}

impl AlignmentAggregator for MetricsAggregator {
    fn inspect_alignment(&mut self, ctx: &mut AlignmentContext<'_>) -> Result<()> {
        let record = ctx.record;
        let reference_name = match (&record.reference_name, ctx.reference) {
            (Some(name), Some(_)) if !record.is_unmapped() => name,
            _ => {
                self.unmapped += 1;
                return Ok(());
            }
        };
        if record.is_duplicate() {
            self.duplicates += 1;
            return Ok(());
        }
        if record.is_secondary_or_supplementary() {
            self.not_primary += 1;
            return Ok(());
        }

        let mut hq_mismatches = 0;
        for snp in ctx.snps.values().flatten() {
            if ctx.evaluator.is_passing(record, snp)? {
                hq_mismatches += 1;
            }
        }

        let metrics = self.by_reference.entry(reference_name.clone()).or_default();
        metrics.alignments += 1;
        // 0 and 255 mean the aligner did not assign a quality
        if record.mapq > 0 && record.mapq != 255 {
            metrics.mapq_sum += u64::from(record.mapq);
            metrics.mapq_count += 1;
        }
        metrics.aligned_bases += record
            .positions()
            .filter(|p| p.kind == PositionKind::Aligned)
            .count() as u64;
        metrics.hq_mismatches += hq_mismatches;
        Ok(())
    }

    fn results(&self, model: &AnalysisModel) -> Result<Vec<TableRows>> {
        info!("Saving Alignment Metrics");
        let mut rows = Vec::with_capacity(self.by_reference.len() + 1);
        for (name, metrics) in &self.by_reference {
            info!("\t{}: {} alignments", name, metrics.alignments);
            let mut row = model.row();
            row.insert(
                "ref_nt_id".into(),
                self.library.resolve_sequence_id(name).map(Value::from).unwrap_or(Value::Null),
            );
            row.insert("ref_nt_name".into(), json!(name));
            row.insert("alignments".into(), json!(metrics.alignments));
            row.insert("avg_mapq".into(), json!(super::round2(metrics.avg_mapq())));
            row.insert("aligned_bases".into(), json!(metrics.aligned_bases));
            row.insert("hq_mismatches".into(), json!(metrics.hq_mismatches));
            rows.push(row);
        }

        if rows.is_empty() && self.skipped() == (0, 0, 0) {
            return Ok(vec![TableRows::new(Table::AlignmentMetrics, rows)]);
        }

        let mut totals = model.row();
        totals.insert("ref_nt_id".into(), Value::Null);
        totals.insert("ref_nt_name".into(), Value::Null);
        totals.insert("unmapped".into(), json!(self.unmapped));
        totals.insert("duplicates".into(), json!(self.duplicates));
        totals.insert("not_primary".into(), json!(self.not_primary));
        rows.push(totals);
        info!(
            "\tunmapped: {}, duplicates: {}, not primary: {}",
            self.unmapped, self.duplicates, self.not_primary
        );

        Ok(vec![TableRows::new(Table::AlignmentMetrics, rows)])
    }

    fn synopsis(&self) -> String {
        format!("Alignment Metrics Aggregator:\n{}", self.thresholds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregators::test_support::{evaluator, feed};
    use crate::alignment::record::fixtures::record;
    use crate::persistence::{MemoryRowStore, RowStore};
    use crate::reference::ReferenceSequence;

    fn run(lines: &[&str]) -> MetricsAggregator {
        let settings = AggregatorSettings::default();
        let library = Rc::new(ReferenceLibrary::new().with_sequence_id("chr1", 7));
        let reference = Rc::new(ReferenceSequence::new("chr1", b"ACGTACGTAC"));
        let mut aggregator = MetricsAggregator::new(&settings, library);
        let mut evaluator = evaluator(settings.quality);
        let records: Vec<_> = lines.iter().map(|l| record(l)).collect();
        feed(&mut aggregator, &mut evaluator, &reference, &records);
        aggregator
    }

    #[test]
    fn counts_per_reference() {
        let aggregator = run(&[
            "r1\t0\tchr1\t1\t60\t4M\t*\t0\t0\tACGT\tIIII",
            "r2\t16\tchr1\t3\t20\t2M1D2M\t*\t0\t0\tGTCG\tIIII",
            "r3\t0\tchr1\t1\t30\t4M\t*\t0\t0\tACGA\tIIII",
        ]);

        assert_eq!(aggregator.alignments_for("chr1"), 3);
        assert_eq!(aggregator.avg_mapq_for("chr1"), Some(110.0 / 3.0));
        assert_eq!(aggregator.aligned_bases_for("chr1"), 12);
        // the deletion of r2 and the T>A of r3
        assert_eq!(aggregator.hq_mismatches_for("chr1"), 2);
        assert_eq!(aggregator.avg_mapq_for("chr2"), None);
    }

    #[test]
    fn skipped_records_are_tallied() {
        let aggregator = run(&[
            "u1\t4\t*\t0\t0\t*\t*\t0\t0\tACGT\tIIII",
            "d1\t1024\tchr1\t1\t60\t4M\t*\t0\t0\tACGT\tIIII",
            "s1\t256\tchr1\t1\t60\t4M\t*\t0\t0\tACGT\tIIII",
            "s2\t2048\tchr1\t1\t60\t4M\t*\t0\t0\tACGT\tIIII",
        ]);
        assert_eq!(aggregator.skipped(), (1, 1, 2));
        assert_eq!(aggregator.alignments_for("chr1"), 0);
    }

    #[test]
    fn writes_one_row_per_reference_and_totals() {
        let mut aggregator = run(&[
            "r1\t0\tchr1\t1\t60\t4M\t*\t0\t0\tACGT\tIIII",
            "u1\t4\t*\t0\t0\t*\t*\t0\t0\tACGT\tIIII",
        ]);
        let mut store = MemoryRowStore::new();
        aggregator.write_output(&mut store, &AnalysisModel::new(5)).unwrap();

        let rows = store.rows(Table::AlignmentMetrics, 5).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["ref_nt_id"], json!(7));
        assert_eq!(rows[0]["avg_mapq"], json!(60.0));
        assert_eq!(rows[0]["aligned_bases"], json!(4));
        assert_eq!(rows[1]["unmapped"], json!(1));
        assert!(aggregator.synopsis().starts_with("Alignment Metrics Aggregator:"));
    }
}
