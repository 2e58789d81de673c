pub mod config;
pub mod metrics;
pub mod snp_analysis;
pub mod typing;

use crate::bam_iterator::BamIterator;
use crate::cli::PassArgs;
use crate::config::{AggregatorSettings, Config};
use crate::persistence::{AnalysisModel, JsonlRowStore};
use crate::reference::ReferenceLibrary;
use anyhow::{Context, Result};
use log::info;
use std::path::Path;
use std::rc::Rc;

/// Settings, reference ids and the iterator for one command invocation.
pub struct Pass {
    pub settings: AggregatorSettings,
    pub library: Rc<ReferenceLibrary>,
    pub iterator: BamIterator,
    pub model: AnalysisModel,
}

impl Pass {
    pub fn prepare(args: &PassArgs, peptides: Option<&Path>) -> Result<Self> {
        let config = Config::load();
        let settings = AggregatorSettings::from_map(&config.merged_settings(&args.settings))
            .context("Failed to parse aggregator settings")?;

        let library = ReferenceLibrary::load(&args.fasta_file, peptides)
            .with_context(|| format!("Failed to load reference ids for {}", args.fasta_file.display()))?;

        let mut iterator = BamIterator::new(&args.bam_file, &args.fasta_file, settings.quality)
            .with_context(|| format!("Failed to open {}", args.bam_file.display()))?;
        iterator.set_progress_interval(config.progress_interval);
        iterator.set_show_progress(!args.no_progress);

        let mut model = AnalysisModel::new(args.analysis_id);
        if let Some(file_id) = args.alignment_file_id {
            model = model.with_alignment_file(file_id);
        }

        Ok(Self {
            settings,
            library: Rc::new(library),
            iterator,
            model,
        })
    }

    /// Scans the whole file, or only `--region` when given.
    pub fn scan(&mut self, args: &PassArgs) -> Result<u64> {
        let processed = match &args.region {
            Some(region) => self
                .iterator
                .iterate_region(&region.name, region.start, region.stop)
                .with_context(|| format!("Failed to scan {}:{}-{}", region.name, region.start, region.stop))?,
            None => self
                .iterator
                .iterate_reads()
                .with_context(|| format!("Failed to scan {}", args.bam_file.display()))?,
        };
        Ok(processed)
    }

    pub fn save(&mut self, args: &PassArgs) -> Result<()> {
        let mut store = JsonlRowStore::open(&args.output_dir)
            .with_context(|| format!("Failed to open output directory {}", args.output_dir.display()))?;
        self.iterator
            .write_outputs(&mut store, &self.model)
            .context("Failed to save results")?;
        info!(
            "Saved results of analysis {} to {}",
            self.model.analysis_id,
            args.output_dir.display()
        );
        Ok(())
    }
}
