//! Thresholds shared by every aggregator in one pass.
//!
//! Settings arrive as a string map (`minSnpQual` -> `"20"`). They are parsed once into an
//! immutable [`AggregatorSettings`] that each aggregator receives by value.

use crate::error::{PipelineError, Result};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

pub const MIN_SNP_QUAL: &str = "minSnpQual";
pub const MIN_AVG_SNP_QUAL: &str = "minAvgSnpQual";
pub const MIN_DIP_QUAL: &str = "minDipQual";
pub const MIN_AVG_DIP_QUAL: &str = "minAvgDipQual";
pub const MIN_MAP_QUAL: &str = "minMapQual";
pub const MAX_SNPS: &str = "maxSNPs";
pub const MIN_COUNT_FOR_REF: &str = "minCountForRef";
pub const MIN_PCT_FOR_REF: &str = "minPctForRef";
pub const MIN_PCT_WITHIN_GROUP: &str = "minPctWithinGroup";
pub const ONLY_IMPORT_VALID_PAIRS: &str = "onlyImportValidPairs";
pub const MIN_ALIGNMENT_LENGTH: &str = "minAlignmentLength";

/// Per-SNP and per-alignment quality cutoffs. DIP thresholds apply to insertions and deletions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QualityThresholds {
    pub min_snp_qual: u32,
    pub min_avg_snp_qual: u32,
    pub min_dip_qual: u32,
    pub min_avg_dip_qual: u32,
    /// A mapping quality of zero is treated as "not set by the aligner" and always passes.
    pub min_map_qual: u32,
}

impl QualityThresholds {
    pub fn passes_mapping_quality(&self, mapq: u8) -> bool {
        mapq == 0 || u32::from(mapq) >= self.min_map_qual
    }
}

impl fmt::Display for QualityThresholds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "\tMinMapQual: {}", self.min_map_qual)?;
        writeln!(f, "\tMinSnpQual: {}", self.min_snp_qual)?;
        writeln!(f, "\tMinAvgSnpQual: {}", self.min_avg_snp_qual)?;
        writeln!(f, "\tMinDipQual: {}", self.min_dip_qual)?;
        writeln!(f, "\tMinAvgDipQual: {}", self.min_avg_dip_qual)
    }
}

/// Options for sequence-based typing.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TypingSettings {
    pub max_snps: u32,
    pub min_count_for_ref: Option<f64>,
    pub min_pct_for_ref: Option<f64>,
    pub min_pct_within_group: Option<f64>,
    pub only_import_valid_pairs: bool,
    pub min_alignment_length: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AggregatorSettings {
    pub quality: QualityThresholds,
    pub typing: TypingSettings,
}

impl AggregatorSettings {
    pub fn builder() -> AggregatorSettingsBuilder {
        AggregatorSettingsBuilder::default()
    }

    /// Parses the recognised keys of a settings map. Unknown keys are ignored.
    pub fn from_map(settings: &HashMap<String, String>) -> Result<Self> {
        let mut builder = AggregatorSettingsBuilder::default();
        builder.min_snp_qual = parse_opt(settings, MIN_SNP_QUAL)?;
        builder.min_avg_snp_qual = parse_opt(settings, MIN_AVG_SNP_QUAL)?;
        builder.min_dip_qual = parse_opt(settings, MIN_DIP_QUAL)?;
        builder.min_avg_dip_qual = parse_opt(settings, MIN_AVG_DIP_QUAL)?;
        builder.min_map_qual = parse_opt(settings, MIN_MAP_QUAL)?;
        builder.max_snps = parse_opt(settings, MAX_SNPS)?;
        builder.min_count_for_ref = parse_opt(settings, MIN_COUNT_FOR_REF)?;
        builder.min_pct_for_ref = parse_opt(settings, MIN_PCT_FOR_REF)?;
        builder.min_pct_within_group = parse_opt(settings, MIN_PCT_WITHIN_GROUP)?;
        builder.only_import_valid_pairs = parse_bool(settings, ONLY_IMPORT_VALID_PAIRS)?;
        builder.min_alignment_length = parse_opt(settings, MIN_ALIGNMENT_LENGTH)?;

        Ok(builder.build())
    }
}

fn parse_opt<T: FromStr>(settings: &HashMap<String, String>, key: &str) -> Result<Option<T>> {
    match settings.get(key).map(|v| v.trim()) {
        None | Some("") => Ok(None),
        Some(value) => value.parse::<T>().map(Some).map_err(|_| PipelineError::InvalidSetting {
            key: key.to_string(),
            value: value.to_string(),
        }),
    }
}

fn parse_bool(settings: &HashMap<String, String>, key: &str) -> Result<Option<bool>> {
    match settings.get(key).map(|v| v.trim().to_ascii_lowercase()) {
        None => Ok(None),
        Some(value) if value.is_empty() => Ok(None),
        Some(value) => match value.as_str() {
            "true" | "on" | "yes" | "1" => Ok(Some(true)),
            "false" | "off" | "no" | "0" => Ok(Some(false)),
            _ => Err(PipelineError::InvalidSetting {
                key: key.to_string(),
                value,
            }),
        },
    }
}

/// Collects optional thresholds and resolves defaults in [`build`](Self::build).
///
/// When only the SNP thresholds are supplied, the DIP thresholds inherit them.
/// An explicit DIP value always wins.
#[derive(Debug, Clone, Default)]
pub struct AggregatorSettingsBuilder {
    min_snp_qual: Option<u32>,
    min_avg_snp_qual: Option<u32>,
    min_dip_qual: Option<u32>,
    min_avg_dip_qual: Option<u32>,
    min_map_qual: Option<u32>,
    max_snps: Option<u32>,
    min_count_for_ref: Option<f64>,
    min_pct_for_ref: Option<f64>,
    min_pct_within_group: Option<f64>,
    only_import_valid_pairs: Option<bool>,
    min_alignment_length: Option<u32>,
}

impl AggregatorSettingsBuilder {
    pub fn min_snp_qual(mut self, value: u32) -> Self {
        self.min_snp_qual = Some(value);
        self
    }

    pub fn min_avg_snp_qual(mut self, value: u32) -> Self {
        self.min_avg_snp_qual = Some(value);
        self
    }

    pub fn min_dip_qual(mut self, value: u32) -> Self {
        self.min_dip_qual = Some(value);
        self
    }

    pub fn min_avg_dip_qual(mut self, value: u32) -> Self {
        self.min_avg_dip_qual = Some(value);
        self
    }

    pub fn min_map_qual(mut self, value: u32) -> Self {
        self.min_map_qual = Some(value);
        self
    }

    pub fn max_snps(mut self, value: u32) -> Self {
        self.max_snps = Some(value);
        self
    }

    pub fn min_count_for_ref(mut self, value: f64) -> Self {
        self.min_count_for_ref = Some(value);
        self
    }

    pub fn min_pct_for_ref(mut self, value: f64) -> Self {
        self.min_pct_for_ref = Some(value);
        self
    }

    pub fn min_pct_within_group(mut self, value: f64) -> Self {
        self.min_pct_within_group = Some(value);
        self
    }

    pub fn only_import_valid_pairs(mut self, value: bool) -> Self {
        self.only_import_valid_pairs = Some(value);
        self
    }

    pub fn min_alignment_length(mut self, value: u32) -> Self {
        self.min_alignment_length = Some(value);
        self
    }

    pub fn build(self) -> AggregatorSettings {
        let min_snp_qual = self.min_snp_qual.unwrap_or(0);
        let min_avg_snp_qual = self.min_avg_snp_qual.unwrap_or(0);

        AggregatorSettings {
            quality: QualityThresholds {
                min_snp_qual,
                min_avg_snp_qual,
                min_dip_qual: self.min_dip_qual.unwrap_or(min_snp_qual),
                min_avg_dip_qual: self.min_avg_dip_qual.unwrap_or(min_avg_snp_qual),
                min_map_qual: self.min_map_qual.unwrap_or(0),
            },
            typing: TypingSettings {
                max_snps: self.max_snps.unwrap_or(0),
                min_count_for_ref: self.min_count_for_ref,
                min_pct_for_ref: self.min_pct_for_ref,
                min_pct_within_group: self.min_pct_within_group,
                only_import_valid_pairs: self.only_import_valid_pairs.unwrap_or(false),
                min_alignment_length: self.min_alignment_length.unwrap_or(0),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn snp_thresholds_also_govern_indels() {
        let settings = AggregatorSettings::from_map(&map(&[("minSnpQual", "20"), ("minAvgSnpQual", "25")])).unwrap();
        assert_eq!(settings.quality.min_dip_qual, 20);
        assert_eq!(settings.quality.min_avg_dip_qual, 25);
    }

    #[test]
    fn explicit_dip_threshold_wins() {
        let settings = AggregatorSettings::from_map(&map(&[
            ("minSnpQual", "20"),
            ("minDipQual", "5"),
        ]))
        .unwrap();
        assert_eq!(settings.quality.min_snp_qual, 20);
        assert_eq!(settings.quality.min_dip_qual, 5);
        assert_eq!(settings.quality.min_avg_dip_qual, 0);
    }

    #[test]
    fn unset_keys_use_defaults() {
        let settings = AggregatorSettings::from_map(&HashMap::new()).unwrap();
        assert_eq!(settings, AggregatorSettings::default());
        assert!(settings.typing.min_pct_for_ref.is_none());
    }

    #[test]
    fn typing_options_are_parsed() {
        let settings = AggregatorSettings::from_map(&map(&[
            ("minCountForRef", "5"),
            ("minPctForRef", "0.25"),
            ("onlyImportValidPairs", "true"),
            ("minAlignmentLength", "40"),
        ]))
        .unwrap();
        assert_eq!(settings.typing.min_count_for_ref, Some(5.0));
        assert_eq!(settings.typing.min_pct_for_ref, Some(0.25));
        assert!(settings.typing.only_import_valid_pairs);
        assert_eq!(settings.typing.min_alignment_length, 40);
    }

    #[test]
    fn garbage_value_is_rejected() {
        let err = AggregatorSettings::from_map(&map(&[("minMapQual", "high")])).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidSetting { ref key, .. } if key == "minMapQual"));
    }

    #[test]
    fn zero_mapping_quality_always_passes() {
        let thresholds = AggregatorSettings::builder().min_map_qual(30).build().quality;
        assert!(thresholds.passes_mapping_quality(0));
        assert!(!thresholds.passes_mapping_quality(29));
        assert!(thresholds.passes_mapping_quality(30));
    }
}
