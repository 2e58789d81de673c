pub mod aggregators;
pub mod alignment;
pub mod bam_iterator;
pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod persistence;
pub mod quality;
pub mod reference;
pub mod translation;
pub mod utils;

pub use aggregators::{AlignmentAggregator, AlignmentContext};
pub use bam_iterator::BamIterator;
pub use config::AggregatorSettings;
pub use error::{PipelineError, Result};
pub use persistence::{AnalysisModel, JsonlRowStore, MemoryRowStore, RowStore, Table};
