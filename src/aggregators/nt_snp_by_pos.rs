use crate::aggregators::nt_coverage::{NtCoverageAggregator, SharedCoverage};
use crate::aggregators::{
    is_passing_alignment, AlignmentAggregator, AlignmentContext, AlignmentCounters,
};
use crate::alignment::{AlignmentRecord, NtSnp};
use crate::config::{AggregatorSettings, QualityThresholds};
use crate::error::Result;
use crate::persistence::{AnalysisModel, Row, Table, TableRows};
use crate::quality::SnpEvaluator;
use crate::reference::ReferenceLibrary;
use log::info;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::rc::Rc;

/// Where an NT SNP aggregator gets its depths from.
pub enum CoverageTracking {
    /// Counted alongside the SNPs by a private coverage aggregator.
    Internal(Box<NtCoverageAggregator>),
    /// Counted by a coverage aggregator registered separately with the iterator.
    External(SharedCoverage),
}

impl CoverageTracking {
    fn read<R>(&self, f: impl FnOnce(&NtCoverageAggregator) -> R) -> R {
        match self {
            CoverageTracking::Internal(coverage) => f(coverage.as_ref()),
            CoverageTracking::External(shared) => f(&*shared.borrow()),
        }
    }
}

/// (reference, 0-based position, insert index, read base)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NtSnpKey {
    pub reference_name: String,
    pub position: u32,
    pub insert_index: u32,
    pub read_base: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct NtSnpTally {
    reference_base: u8,
    count: u32,
}

/// Counts passing NT SNPs by position and read base.
pub struct NtSnpByPosAggregator {
    thresholds: QualityThresholds,
    library: Rc<ReferenceLibrary>,
    coverage: CoverageTracking,
    snps: BTreeMap<NtSnpKey, NtSnpTally>,
    counters: AlignmentCounters,
    log_progress: bool,
}

impl NtSnpByPosAggregator {
    /// Tracks coverage on its own.
    pub fn new(settings: &AggregatorSettings, library: Rc<ReferenceLibrary>) -> Self {
        let coverage = NtCoverageAggregator::new(settings, Rc::clone(&library));
        Self::with_coverage(settings, library, CoverageTracking::Internal(Box::new(coverage)))
    }

    /// Reads depths from `coverage`, which the caller registers with the iterator.
    pub fn with_shared_coverage(
        settings: &AggregatorSettings,
        library: Rc<ReferenceLibrary>,
        coverage: SharedCoverage,
    ) -> Self {
        Self::with_coverage(settings, library, CoverageTracking::External(coverage))
    }

    fn with_coverage(settings: &AggregatorSettings, library: Rc<ReferenceLibrary>, coverage: CoverageTracking) -> Self {
        Self {
            thresholds: settings.quality,
            library,
            coverage,
            snps: BTreeMap::new(),
            counters: AlignmentCounters::default(),
            log_progress: true,
        }
    }

    /// Switches to an externally counted coverage. Counts already made internally are dropped.
    pub fn set_coverage_aggregator(&mut self, coverage: SharedCoverage) {
        self.coverage = CoverageTracking::External(coverage);
    }

    pub fn counters(&self) -> AlignmentCounters {
        self.counters
    }

    pub fn count(&self, reference: &str, position: u32, insert_index: u32, read_base: u8) -> u32 {
        let key = NtSnpKey {
            reference_name: reference.to_string(),
            position,
            insert_index,
            read_base,
        };
        self.snps.get(&key).map(|t| t.count).unwrap_or(0)
    }

    pub fn depth_at(&self, reference: &str, position: u32, insert_index: u32) -> u32 {
        self.coverage.read(|c| c.depth_at(reference, position, insert_index))
    }

    pub fn hc_depth_at(&self, reference: &str, position: u32, insert_index: u32) -> u32 {
        self.coverage.read(|c| c.hc_depth_at(reference, position, insert_index))
    }

    /// Distinct SNP rows per reference name.
    pub fn snps_by_reference(&self) -> BTreeMap<&str, usize> {
        let mut totals = BTreeMap::new();
        for key in self.snps.keys() {
            *totals.entry(key.reference_name.as_str()).or_insert(0) += 1;
        }
        totals
    }

    /// Tallies `snp` when it passes. Returns whether it passed.
    pub(crate) fn inspect_snp(
        &mut self,
        record: &AlignmentRecord,
        snp: &NtSnp,
        evaluator: &mut SnpEvaluator,
    ) -> Result<bool> {
        if snp.reference_base == snp.read_base {
            return Ok(true);
        }
        if !evaluator.is_passing(record, snp)? {
            self.counters.filtered_snps += 1;
            return Ok(false);
        }

        let key = NtSnpKey {
            reference_name: snp.reference_name.clone(),
            position: snp.last_ref_position(),
            insert_index: snp.insert_index,
            read_base: snp.read_base,
        };
        self.snps
            .entry(key)
            .or_insert(NtSnpTally {
                reference_base: snp.reference_base,
                count: 0,
            })
            .count += 1;
        Ok(true)
    }

    fn build_rows(&self, model: &AnalysisModel, coverage: &NtCoverageAggregator) -> Vec<Row> {
        let mut rows = Vec::with_capacity(self.snps.len());
        for (key, tally) in &self.snps {
            let ref_nt_id = self
                .library
                .resolve_sequence_id(&key.reference_name)
                .map(Value::from)
                .unwrap_or(Value::Null);
            let q_nt = (key.read_base as char).to_string();

            let mut row = model.row();
            row.insert("ref_nt_id".into(), ref_nt_id);
            row.insert("ref_nt_name".into(), json!(key.reference_name));
            row.insert("ref_nt_position".into(), json!(key.position + 1));
            row.insert("ref_nt_insert_index".into(), json!(key.insert_index));
            row.insert("ref_nt".into(), json!((tally.reference_base as char).to_string()));
            row.insert("q_nt".into(), json!(q_nt));
            row.insert("readcount".into(), json!(tally.count));
            row.insert("depth".into(), json!(coverage.depth_at(&key.reference_name, key.position, 0)));

            // ambiguous calls only report counts
            if q_nt != "N" {
                let adj_depth = coverage.hc_depth_at(&key.reference_name, key.position, 0);
                let pct = if adj_depth == 0 {
                    0.0
                } else {
                    f64::from(tally.count) / f64::from(adj_depth) * 100.0
                };
                row.insert("adj_depth".into(), json!(adj_depth));
                row.insert("pct".into(), json!(pct));
            }

            rows.push(row);
            if self.log_progress && rows.len() % 10_000 == 0 {
                info!("{} NT SNP rows prepared", rows.len());
            }
        }
        rows
    }

    pub(crate) fn nt_rows(&self, model: &AnalysisModel) -> Vec<Row> {
        self.coverage.read(|coverage| self.build_rows(model, coverage))
    }

    pub(crate) fn read_coverage<R>(&self, f: impl FnOnce(&NtCoverageAggregator) -> R) -> R {
        self.coverage.read(f)
    }
}

impl AlignmentAggregator for NtSnpByPosAggregator {
    fn inspect_alignment(&mut self, ctx: &mut AlignmentContext<'_>) -> Result<()> {
        if let CoverageTracking::Internal(coverage) = &mut self.coverage {
            coverage.inspect_alignment(ctx)?;
        }

        if !is_passing_alignment(ctx.record, &self.thresholds, &mut self.counters) {
            return Ok(());
        }
        if ctx.reference.is_none() {
            return Ok(());
        }
        self.counters.total_alignments += 1;

        for snp in ctx.snps.values().flatten() {
            self.inspect_snp(ctx.record, snp, ctx.evaluator)?;
        }
        Ok(())
    }

    fn results(&self, model: &AnalysisModel) -> Result<Vec<TableRows>> {
        info!("Saving NT SNP Results");
        let rows = self.nt_rows(model);
        info!(
            "Alignments inspected: {}, low mapping quality: {}, filtered SNPs: {}",
            self.counters.total_alignments, self.counters.low_mapping_qual, self.counters.filtered_snps
        );
        info!("SNPs saved by reference:");
        for (reference, total) in self.snps_by_reference() {
            info!("\t{}: {}", reference, total);
        }
        Ok(vec![TableRows::new(Table::NtSnpsByPos, rows)])
    }

    fn synopsis(&self) -> String {
        format!("NT SNP Aggregator:\n{}", self.thresholds)
    }

    fn set_log_progress(&mut self, log_progress: bool) {
        self.log_progress = log_progress;
        if let CoverageTracking::Internal(coverage) = &mut self.coverage {
            coverage.set_log_progress(log_progress);
        }
    }
}
