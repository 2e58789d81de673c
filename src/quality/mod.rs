pub mod avg_quality;
pub mod evaluator;

pub use avg_quality::{AverageQualitySource, AvgBaseQualityAggregator, AvgQualityTable};
pub use evaluator::{FilterReason, SnpEvaluator, MISSING_AVG_QUAL_DEFAULT};
