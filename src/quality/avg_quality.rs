use crate::alignment::{AlignmentRecord, PositionKind};
use crate::error::{PipelineError, Result};
use crate::utils::bam_reader::{find_tid, BamReaderFactory};
use log::{debug, info};
use rust_htslib::bam::{self, FetchDefinition, Read};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

/// Running mean of base qualities for one base at one position.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct RunningMean {
    mean: f64,
    count: u64,
}

impl RunningMean {
    fn push(&mut self, value: f64) {
        self.count += 1;
        self.mean += (value - self.mean) / self.count as f64;
    }
}

/// Average base quality per 0-based position and observed base, for one reference.
#[derive(Debug, Clone, Default)]
pub struct AvgQualityTable {
    positions: HashMap<u32, BTreeMap<u8, RunningMean>>,
}

impl AvgQualityTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, position: u32, base: u8, quality: u8) {
        self.positions
            .entry(position)
            .or_default()
            .entry(base.to_ascii_uppercase())
            .or_default()
            .push(f64::from(quality));
    }

    pub fn get(&self, position: u32, base: u8) -> Option<f64> {
        self.positions
            .get(&position)
            .and_then(|bases| bases.get(&base.to_ascii_uppercase()))
            .map(|m| m.mean)
    }

    /// Bases observed at `position`, for diagnostics.
    pub fn bases_at(&self, position: u32) -> Vec<char> {
        self.positions
            .get(&position)
            .map(|bases| bases.keys().map(|b| *b as char).collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}

/// Lookup of average base qualities by reference index.
pub trait AverageQualitySource {
    /// Table for one reference, or `None` when nothing aligned to it.
    fn quals_for_reference(&mut self, tid: u32) -> Result<Option<&AvgQualityTable>>;
}

/// Precomputed tables, handy when the qualities are already known.
impl AverageQualitySource for HashMap<u32, AvgQualityTable> {
    fn quals_for_reference(&mut self, tid: u32) -> Result<Option<&AvgQualityTable>> {
        Ok(self.get(&tid))
    }
}

/// One pass over a BAM computing average base quality per position and base.
///
/// Both the BAM and the FASTA must be indexed; that is checked when the aggregator is built.
/// Results are computed lazily on the first lookup and kept for the life of the instance.
pub struct AvgBaseQualityAggregator {
    bam: PathBuf,
    quals: Option<HashMap<u32, AvgQualityTable>>,
}

impl AvgBaseQualityAggregator {
    pub fn new(bam: &Path, reference_fasta: &Path) -> Result<Self> {
        BamReaderFactory::require_bam_index(bam)?;
        BamReaderFactory::require_fasta_index(reference_fasta)?;

        Ok(Self {
            bam: bam.to_path_buf(),
            quals: None,
        })
    }

    pub fn is_calculated(&self) -> bool {
        self.quals.is_some()
    }

    /// Scans every reference in the BAM header.
    pub fn calculate_avg_quals(&mut self) -> Result<()> {
        let mut reader = BamReaderFactory::open_indexed(&self.bam)?;
        let header = reader.header().clone();

        let mut quals = HashMap::new();
        for tid in 0..header.target_count() {
            reader.fetch(FetchDefinition::CompleteTid(tid as i32))?;
            let table = accumulate(&mut reader, &header, None)?;
            debug!(
                "average qualities for {}: {} positions",
                String::from_utf8_lossy(header.tid2name(tid)),
                table.len()
            );
            quals.insert(tid, table);
        }

        info!("Calculated average base qualities for {} references", quals.len());
        self.quals = Some(quals);
        Ok(())
    }

    /// Scans one interval, `start` and `stop` 1-based and inclusive. Reference names resolve
    /// through [`find_tid`].
    pub fn calculate_avg_quals_for_region(&mut self, ref_name: &str, start: u64, stop: u64) -> Result<()> {
        if start == 0 || stop < start {
            return Err(PipelineError::InvalidRegion(format!("{}:{}-{}", ref_name, start, stop)));
        }

        let mut reader = BamReaderFactory::open_indexed(&self.bam)?;
        let header = reader.header().clone();
        let tid = find_tid(&header, ref_name)
            .ok_or_else(|| PipelineError::Reference(format!("Unknown reference: {}", ref_name)))?;

        reader.fetch(FetchDefinition::Region(tid as i32, (start - 1) as i64, stop as i64))?;
        let window = (start - 1) as u32..stop as u32;
        let table = accumulate(&mut reader, &header, Some(window))?;

        let mut quals = HashMap::new();
        quals.insert(tid, table);
        self.quals = Some(quals);
        Ok(())
    }
}

impl AverageQualitySource for AvgBaseQualityAggregator {
    fn quals_for_reference(&mut self, tid: u32) -> Result<Option<&AvgQualityTable>> {
        if self.quals.is_none() {
            self.calculate_avg_quals()?;
        }
        Ok(self.quals.as_ref().and_then(|q| q.get(&tid)))
    }
}

/// Records skipped by the locus walk: unmapped, duplicate, secondary and supplementary.
fn is_counted(record: &AlignmentRecord) -> bool {
    !(record.is_unmapped() || record.is_duplicate() || record.is_secondary_or_supplementary())
}

fn accumulate(
    reader: &mut bam::IndexedReader,
    header: &bam::HeaderView,
    window: Option<std::ops::Range<u32>>,
) -> Result<AvgQualityTable> {
    let mut table = AvgQualityTable::new();
    let mut record = bam::Record::new();
    let mut processed: u64 = 0;

    while let Some(result) = reader.read(&mut record) {
        result?;
        let alignment = AlignmentRecord::from_bam(&record, header);
        if !is_counted(&alignment) {
            continue;
        }

        add_alignment(&mut table, &alignment, window.as_ref());

        processed += 1;
        if processed % 100_000 == 0 {
            debug!("processed {} alignments in AvgBaseQualityAggregator", processed);
        }
    }

    Ok(table)
}

/// Adds the reference-position bases of one alignment. Deleted positions are recorded
/// under `-` with the quality of the preceding read base.
pub(crate) fn add_alignment(table: &mut AvgQualityTable, alignment: &AlignmentRecord, window: Option<&std::ops::Range<u32>>) {
    for pi in alignment.positions() {
        if !matches!(pi.kind, PositionKind::Aligned | PositionKind::Deletion) {
            continue;
        }
        if let Some(window) = window {
            if !window.contains(&pi.ref_position) {
                continue;
            }
        }
        table.add(pi.ref_position, pi.read_base, pi.quality);
    }
}
