pub mod bam_reader;
pub mod progress_bar_builder;
