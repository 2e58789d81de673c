//! Single-pass driver: reads each alignment of an indexed BAM once, looks up its reference,
//! extracts candidate SNPs and hands the lot to every registered aggregator in order.

use crate::aggregators::{AlignmentAggregator, AlignmentContext};
use crate::alignment::{extract_snps, AlignmentRecord, SnpMap};
use crate::config::QualityThresholds;
use crate::error::{PipelineError, Result};
use crate::persistence::{AnalysisModel, RowStore, TableRows};
use crate::quality::{AvgBaseQualityAggregator, SnpEvaluator};
use crate::reference::FastaReferenceCache;
use crate::utils::bam_reader::{find_tid, BamReaderFactory};
use crate::utils::progress_bar_builder::ProgressBarBuilder;
use log::{info, warn};
use rust_htslib::bam::{self, FetchDefinition, Read};
use std::path::{Path, PathBuf};
use std::time::Instant;

pub const DEFAULT_PROGRESS_INTERVAL: u64 = 25_000;

pub struct BamIterator {
    bam: PathBuf,
    fasta: PathBuf,
    reader: bam::IndexedReader,
    header: bam::HeaderView,
    references: FastaReferenceCache,
    evaluator: SnpEvaluator,
    aggregators: Vec<Box<dyn AlignmentAggregator>>,
    progress_interval: u64,
    show_progress: bool,
}

impl std::fmt::Debug for BamIterator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BamIterator")
            .field("bam", &self.bam)
            .field("fasta", &self.fasta)
            .finish_non_exhaustive()
    }
}

impl BamIterator {
    /// Both files must be indexed. Average base qualities are computed from `bam` on the
    /// first SNP that needs one.
    pub fn new(bam: &Path, fasta: &Path, thresholds: QualityThresholds) -> Result<Self> {
        let reader = BamReaderFactory::open_indexed(bam)?;
        let header = reader.header().clone();
        let references = FastaReferenceCache::open(fasta)?;
        let avg_quals = AvgBaseQualityAggregator::new(bam, fasta)?;

        Ok(Self {
            bam: bam.to_path_buf(),
            fasta: fasta.to_path_buf(),
            reader,
            header,
            references,
            evaluator: SnpEvaluator::new(thresholds, Box::new(avg_quals)),
            aggregators: Vec::new(),
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
            show_progress: false,
        })
    }

    pub fn set_progress_interval(&mut self, interval: u64) {
        self.progress_interval = interval.max(1);
    }

    /// Draws a spinner on stderr while scanning.
    pub fn set_show_progress(&mut self, show: bool) {
        self.show_progress = show;
    }

    /// Registers `aggregator` and returns its position for [`results_of`](Self::results_of).
    pub fn add_aggregator(&mut self, aggregator: Box<dyn AlignmentAggregator>) -> usize {
        self.aggregators.push(aggregator);
        self.aggregators.len() - 1
    }

    pub fn aggregator_count(&self) -> usize {
        self.aggregators.len()
    }

    /// Lookups that fell back to the default average quality so far.
    pub fn missing_avg_quals(&self) -> u64 {
        self.evaluator.missing_avg_quals()
    }

    /// Scans every record of the file, unmapped reads included.
    pub fn iterate_reads(&mut self) -> Result<u64> {
        info!("Iterating all alignments of {}", self.bam.display());
        self.reader.fetch(FetchDefinition::All)?;
        self.scan("all alignments")
    }

    /// Scans the records overlapping `ref_name:start-stop`, 1-based and inclusive. Average
    /// qualities are computed over the same interval.
    pub fn iterate_region(&mut self, ref_name: &str, start: u64, stop: u64) -> Result<u64> {
        if start == 0 || stop < start {
            return Err(PipelineError::InvalidRegion(format!("{}:{}-{}", ref_name, start, stop)));
        }
        let tid = find_tid(&self.header, ref_name)
            .ok_or_else(|| PipelineError::InvalidRegion(format!("unknown reference {}", ref_name)))?;

        let mut avg_quals = AvgBaseQualityAggregator::new(&self.bam, &self.fasta)?;
        avg_quals.calculate_avg_quals_for_region(ref_name, start, stop)?;
        let thresholds = *self.evaluator.thresholds();
        self.evaluator = SnpEvaluator::new(thresholds, Box::new(avg_quals));

        info!("Iterating alignments of {}:{}-{}", ref_name, start, stop);
        self.reader
            .fetch(FetchDefinition::Region(tid as i32, (start - 1) as i64, stop as i64))?;
        self.scan(&format!("{}:{}-{}", ref_name, start, stop))
    }

    fn scan(&mut self, label: &str) -> Result<u64> {
        let progress = ProgressBarBuilder::new(format!("scanning {}", label))
            .hidden(!self.show_progress)
            .with_tick()
            .build()?;

        let Self {
            reader,
            header,
            references,
            evaluator,
            aggregators,
            progress_interval,
            ..
        } = self;

        let started = Instant::now();
        let mut record = bam::Record::new();
        let mut processed: u64 = 0;
        while let Some(result) = reader.read(&mut record) {
            result?;
            let alignment = AlignmentRecord::from_bam(&record, header);
            inspect(&alignment, references, evaluator, aggregators)?;

            processed += 1;
            progress.inc(1);
            if processed % *progress_interval == 0 {
                info!(
                    "processed {} alignments in {}s",
                    processed,
                    started.elapsed().as_secs()
                );
            }
        }

        progress.finish_and_clear();
        info!(
            "Finished {}: {} alignments in {}s",
            label,
            processed,
            started.elapsed().as_secs()
        );
        if evaluator.missing_avg_quals() > 0 {
            warn!(
                "{} SNPs used the default average quality because none was calculated",
                evaluator.missing_avg_quals()
            );
        }
        Ok(processed)
    }

    /// Parameter dumps of every aggregator, in registration order.
    pub fn synopsis(&self) -> String {
        self.aggregators
            .iter()
            .map(|a| a.synopsis())
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn results_of(&self, index: usize, model: &AnalysisModel) -> Result<Vec<TableRows>> {
        match self.aggregators.get(index) {
            Some(aggregator) => aggregator.results(model),
            None => Err(PipelineError::Persistence(format!("no aggregator at position {}", index))),
        }
    }

    /// Saves each aggregator in its own transaction, then the synopsis. Aggregators that cannot
    /// be saved are skipped with a warning; their rows stay reachable through `results_of`.
    pub fn write_outputs(&mut self, store: &mut dyn RowStore, model: &AnalysisModel) -> Result<()> {
        for aggregator in self.aggregators.iter_mut() {
            match aggregator.write_output(store, model) {
                Ok(()) => {}
                Err(PipelineError::Unsupported(reason)) => warn!("Skipping output: {}", reason),
                Err(e) => return Err(e),
            }
        }
        store.save_synopsis(model.analysis_id, &self.synopsis())
    }
}

fn inspect(
    alignment: &AlignmentRecord,
    references: &mut FastaReferenceCache,
    evaluator: &mut SnpEvaluator,
    aggregators: &mut [Box<dyn AlignmentAggregator>],
) -> Result<()> {
    evaluator.begin_alignment();

    let reference = match alignment.reference_name.as_deref() {
        Some(name) if !alignment.is_unmapped() => Some(references.get(name)?),
        _ => None,
    };
    let snps = match &reference {
        Some(reference) => extract_snps(alignment, &reference.bases),
        None => SnpMap::new(),
    };

    for aggregator in aggregators.iter_mut() {
        let mut ctx = AlignmentContext {
            record: alignment,
            reference: reference.as_ref(),
            snps: &snps,
            evaluator: &mut *evaluator,
        };
        aggregator.inspect_alignment(&mut ctx)?;
    }
    Ok(())
}
