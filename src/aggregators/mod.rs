//! Per-alignment accumulators fed by the [`BamIterator`](crate::bam_iterator::BamIterator).
//!
//! Each aggregator sees every record of the pass once, in file order, together with the
//! reference it aligned to and the candidate SNPs extracted for it. SNP quality verdicts come
//! from the shared [`SnpEvaluator`], so every aggregator agrees on which SNPs pass.

pub mod aa_snp;
pub mod metrics;
pub mod nt_coverage;
pub mod nt_snp_by_pos;
pub mod sbt;

pub use aa_snp::{AaSnpByCodonAggregator, AaSnpByReadAggregator, AaTranslationStep};
pub use metrics::MetricsAggregator;
pub use nt_coverage::{NtCoverageAggregator, SharedCoverage};
pub use nt_snp_by_pos::{CoverageTracking, NtSnpByPosAggregator};
pub use sbt::{HitSet, SequenceBasedTypingAggregator};

use crate::alignment::{AlignmentRecord, SnpMap};
use crate::config::QualityThresholds;
use crate::error::Result;
use crate::persistence::{AnalysisModel, RowStore, TableRows};
use crate::quality::SnpEvaluator;
use crate::reference::ReferenceSequence;
use log::info;
use std::rc::Rc;

/// Everything an aggregator may look at for one record.
pub struct AlignmentContext<'a> {
    pub record: &'a AlignmentRecord,
    /// `None` for unmapped records.
    pub reference: Option<&'a Rc<ReferenceSequence>>,
    pub snps: &'a SnpMap,
    pub evaluator: &'a mut SnpEvaluator,
}

pub trait AlignmentAggregator {
    fn inspect_alignment(&mut self, ctx: &mut AlignmentContext<'_>) -> Result<()>;

    /// Output rows for `model`. Calling this does not change the accumulated state.
    fn results(&self, model: &AnalysisModel) -> Result<Vec<TableRows>>;

    /// Human-readable dump of the parameters this aggregator ran with.
    fn synopsis(&self) -> String;

    /// Replaces this aggregator's rows for the analysis in one transaction.
    fn write_output(&mut self, store: &mut dyn RowStore, model: &AnalysisModel) -> Result<()> {
        let tables = self.results(model)?;
        for batch in &tables {
            info!("Saving {} rows to {}", batch.rows.len(), batch.table);
        }
        store.replace_rows(model.analysis_id, tables)
    }

    /// Turns per-row progress logging on or off while writing.
    fn set_log_progress(&mut self, _log_progress: bool) {}
}

/// Counters shared by the aggregators that apply the alignment-level filters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AlignmentCounters {
    pub total_alignments: u64,
    pub low_mapping_qual: u64,
    pub filtered_snps: u64,
}

/// Duplicates, secondary and supplementary alignments and unmapped reads never count.
/// Alignments below the mapping quality cutoff count towards `low_mapping_qual`.
pub(crate) fn is_passing_alignment(
    record: &AlignmentRecord,
    thresholds: &QualityThresholds,
    counters: &mut AlignmentCounters,
) -> bool {
    if record.is_unmapped() || record.is_duplicate() || record.is_secondary_or_supplementary() {
        return false;
    }
    if !thresholds.passes_mapping_quality(record.mapq) {
        counters.low_mapping_qual += 1;
        return false;
    }
    true
}

/// Rounds to two decimals for depth and percentage columns.
pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::alignment::record::fixtures::record;
    use crate::config::AggregatorSettings;

    #[test]
    fn alignment_filters() {
        let thresholds = AggregatorSettings::builder().min_map_qual(20).build().quality;
        let mut counters = AlignmentCounters::default();

        let good = record("r\t0\tchr1\t1\t30\t3M\t*\t0\t0\tACG\tIII");
        let unset = record("r\t0\tchr1\t1\t0\t3M\t*\t0\t0\tACG\tIII");
        let low = record("r\t0\tchr1\t1\t10\t3M\t*\t0\t0\tACG\tIII");
        let dup = record("r\t1024\tchr1\t1\t30\t3M\t*\t0\t0\tACG\tIII");
        let secondary = record("r\t256\tchr1\t1\t30\t3M\t*\t0\t0\tACG\tIII");
        let unmapped = record("r\t4\t*\t0\t0\t*\t*\t0\t0\tACG\tIII");

        assert!(is_passing_alignment(&good, &thresholds, &mut counters));
        assert!(is_passing_alignment(&unset, &thresholds, &mut counters));
        assert!(!is_passing_alignment(&low, &thresholds, &mut counters));
        assert!(!is_passing_alignment(&dup, &thresholds, &mut counters));
        assert!(!is_passing_alignment(&secondary, &thresholds, &mut counters));
        assert!(!is_passing_alignment(&unmapped, &thresholds, &mut counters));
        assert_eq!(counters.low_mapping_qual, 1);
    }

    #[test]
    fn rounds_to_two_places() {
        assert_eq!(round2(140.0 / 3.0), 46.67);
        assert_eq!(round2(50.0), 50.0);
    }
}
