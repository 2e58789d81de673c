use crate::alignment::{AlignmentRecord, NtSnp, SnpId};
use crate::config::QualityThresholds;
use crate::error::Result;
use crate::quality::avg_quality::AverageQualitySource;
use log::error;
use std::collections::HashMap;
use std::fmt;

/// Average quality assumed when a position/base pair is absent from the average table.
pub const MISSING_AVG_QUAL_DEFAULT: f64 = 95.0;

/// Why a SNP was excluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterReason {
    BelowMinDipQual,
    BelowAvgMinDipQual,
    BelowMinSnpQual,
    BelowAvgMinSnpQual,
}

impl fmt::Display for FilterReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            FilterReason::BelowMinDipQual => "Below Minimum DIP Quality",
            FilterReason::BelowAvgMinDipQual => "Below Avg. Minimum DIP Quality",
            FilterReason::BelowMinSnpQual => "Below Minimum SNP Quality",
            FilterReason::BelowAvgMinSnpQual => "Below Avg. Minimum SNP Quality",
        };
        f.write_str(msg)
    }
}

/// Quality filter for candidate SNPs, shared by every aggregator of a pass.
///
/// Verdicts are cached per SNP of the current alignment, so the first aggregator to ask
/// decides for all the others. The driver calls [`begin_alignment`](Self::begin_alignment)
/// before fanning out each record.
pub struct SnpEvaluator {
    thresholds: QualityThresholds,
    source: Box<dyn AverageQualitySource>,
    cache: HashMap<SnpId, Option<FilterReason>>,
    missing_avg_quals: u64,
}

impl SnpEvaluator {
    pub fn new(thresholds: QualityThresholds, source: Box<dyn AverageQualitySource>) -> Self {
        Self {
            thresholds,
            source,
            cache: HashMap::new(),
            missing_avg_quals: 0,
        }
    }

    pub fn thresholds(&self) -> &QualityThresholds {
        &self.thresholds
    }

    pub fn begin_alignment(&mut self) {
        self.cache.clear();
    }

    /// Number of lookups that fell back to [`MISSING_AVG_QUAL_DEFAULT`].
    pub fn missing_avg_quals(&self) -> u64 {
        self.missing_avg_quals
    }

    /// Cached verdict for `snp`: `None` if not yet evaluated, `Some(None)` if passing.
    pub fn flag(&self, snp: &NtSnp) -> Option<Option<FilterReason>> {
        self.cache.get(&snp.id).copied()
    }

    pub fn is_passing(&mut self, record: &AlignmentRecord, snp: &NtSnp) -> Result<bool> {
        if let Some(flag) = self.cache.get(&snp.id) {
            return Ok(flag.is_none());
        }

        let avg_qual = self.average_quality(record, snp)?;
        let qual = u32::from(snp.position.quality);
        let t = &self.thresholds;

        let flag = if snp.is_indel() {
            if qual < t.min_dip_qual {
                Some(FilterReason::BelowMinDipQual)
            } else if avg_qual < f64::from(t.min_avg_dip_qual) {
                Some(FilterReason::BelowAvgMinDipQual)
            } else {
                None
            }
        } else if qual < t.min_snp_qual {
            Some(FilterReason::BelowMinSnpQual)
        } else if avg_qual < f64::from(t.min_avg_snp_qual) {
            Some(FilterReason::BelowAvgMinSnpQual)
        } else {
            None
        };

        self.cache.insert(snp.id, flag);
        Ok(flag.is_none())
    }

    /// Inserted bases are looked up by the read base at their anchor position.
    fn average_quality(&mut self, record: &AlignmentRecord, snp: &NtSnp) -> Result<f64> {
        let position = snp.last_ref_position();
        let base = if snp.is_insertion() {
            record
                .bases
                .get(snp.position.anchor_read_position)
                .copied()
                .unwrap_or(b'N')
        } else {
            snp.position.read_base
        };

        let table = if record.tid >= 0 {
            self.source.quals_for_reference(record.tid as u32)?
        } else {
            None
        };

        if let Some(avg) = table.and_then(|t| t.get(position, base)) {
            return Ok(avg);
        }

        let available: Vec<String> = table
            .map(|t| t.bases_at(position).iter().map(char::to_string).collect())
            .unwrap_or_default();
        error!(
            "missing avgQual: read {} / indel offset {} / read position {} / read base [{}] / lastRef: {} / bases with quals: {}",
            record.name,
            snp.position.indel_offset,
            snp.position.read_position,
            base as char,
            position,
            available.join(";")
        );
        self.missing_avg_quals += 1;
        Ok(MISSING_AVG_QUAL_DEFAULT)
    }
}
