use crate::aggregators::{
    is_passing_alignment, round2, AlignmentAggregator, AlignmentContext, AlignmentCounters,
};
use crate::alignment::{PositionInfo, SnpId};
use crate::config::{AggregatorSettings, QualityThresholds};
use crate::error::Result;
use crate::persistence::{AnalysisModel, Row, Table, TableRows};
use crate::reference::{ReferenceLibrary, ReferenceSequence};
use log::{error, info, warn};
use serde_json::{json, Value};
use std::cell::{Ref, RefCell};
use std::collections::BTreeMap;
use std::rc::Rc;

/// Bases tallied per position, with their column suffixes. Anything else counts as `N`.
const BASES: [(u8, &str); 6] = [
    (b'A', "a"),
    (b'T', "t"),
    (b'G', "g"),
    (b'C', "c"),
    (b'N', "n"),
    (b'-', "del"),
];
const N_INDEX: usize = 4;

const INITIAL_INSERT_SLOTS: usize = 4;
const INSERT_SLOT_EXTENSION: usize = 20;

fn base_index(base: u8) -> usize {
    let base = base.to_ascii_uppercase();
    BASES
        .iter()
        .position(|(b, _)| *b == base)
        .unwrap_or(N_INDEX)
}

/// Counts for one (position, insert index) cell.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct CoverageCell {
    depth: u32,
    qual_total: u64,
    hc_depth: u32,
    hc_qual_total: u64,
    base_depth: [u32; 6],
    base_qual_total: [u64; 6],
}

impl CoverageCell {
    fn add(&mut self, base: u8, quality: u8, high_confidence: bool) {
        let idx = base_index(base);
        self.depth += 1;
        self.qual_total += u64::from(quality);
        self.base_depth[idx] += 1;
        self.base_qual_total[idx] += u64::from(quality);
        if high_confidence {
            self.hc_depth += 1;
            self.hc_qual_total += u64::from(quality);
        }
    }

    fn avg_qual(&self, idx: usize) -> Option<f64> {
        (self.base_depth[idx] > 0).then(|| self.base_qual_total[idx] as f64 / f64::from(self.base_depth[idx]))
    }
}

/// Coverage of one reference, one slot per 0-based position. Each slot holds its
/// insert-index cells, allocated on first touch and extended when a longer insertion shows up.
#[derive(Debug)]
struct ReferenceCoverage {
    reference: Rc<ReferenceSequence>,
    positions: Vec<Vec<CoverageCell>>,
}

impl ReferenceCoverage {
    fn new(reference: Rc<ReferenceSequence>) -> Self {
        let positions = vec![Vec::new(); reference.len() + 1];
        Self {
            reference,
            positions,
        }
    }

    fn cell_mut(&mut self, position: u32, insert_index: u32) -> &mut CoverageCell {
        let position = position as usize;
        let insert_index = insert_index as usize;
        if position >= self.positions.len() {
            warn!(
                "position {} is past the end of {} ({} bp)",
                position + 1,
                self.reference.name,
                self.reference.len()
            );
            self.positions.resize(position + 1, Vec::new());
        }

        let slot = &mut self.positions[position];
        if slot.is_empty() {
            slot.resize(INITIAL_INSERT_SLOTS, CoverageCell::default());
        }
        if insert_index >= slot.len() {
            slot.resize(insert_index + 1 + INSERT_SLOT_EXTENSION, CoverageCell::default());
        }
        &mut slot[insert_index]
    }

    fn cell(&self, position: u32, insert_index: u32) -> Option<&CoverageCell> {
        self.positions
            .get(position as usize)
            .and_then(|slot| slot.get(insert_index as usize))
    }

    fn insert_slots(&self, position: u32) -> usize {
        self.positions.get(position as usize).map(Vec::len).unwrap_or(0)
    }
}

/// Per-position, per-base depth and quality, split into total and high-confidence counts.
///
/// Bases of SNPs that fail the quality filter are tallied as `N` and left out of the
/// high-confidence depth, so every base of the alignment lands in exactly one bucket.
pub struct NtCoverageAggregator {
    thresholds: QualityThresholds,
    library: Rc<ReferenceLibrary>,
    coverage: BTreeMap<String, ReferenceCoverage>,
    counters: AlignmentCounters,
    log_progress: bool,
}

impl NtCoverageAggregator {
    pub fn new(settings: &AggregatorSettings, library: Rc<ReferenceLibrary>) -> Self {
        Self {
            thresholds: settings.quality,
            library,
            coverage: BTreeMap::new(),
            counters: AlignmentCounters::default(),
            log_progress: true,
        }
    }

    /// Wraps this aggregator so several SNP aggregators can read one set of counts.
    pub fn into_shared(self) -> SharedCoverage {
        SharedCoverage(Rc::new(RefCell::new(self)))
    }

    pub fn counters(&self) -> AlignmentCounters {
        self.counters
    }

    /// Total depth at a 0-based position and insert index.
    pub fn depth_at(&self, reference: &str, position: u32, insert_index: u32) -> u32 {
        self.cell(reference, position, insert_index)
            .map(|c| c.depth)
            .unwrap_or(0)
    }

    /// Depth counting only bases that passed the quality filter.
    pub fn hc_depth_at(&self, reference: &str, position: u32, insert_index: u32) -> u32 {
        self.cell(reference, position, insert_index)
            .map(|c| c.hc_depth)
            .unwrap_or(0)
    }

    pub fn base_depth_at(&self, reference: &str, position: u32, insert_index: u32, base: u8) -> u32 {
        self.cell(reference, position, insert_index)
            .map(|c| c.base_depth[base_index(base)])
            .unwrap_or(0)
    }

    pub fn avg_base_quality_at(&self, reference: &str, position: u32, insert_index: u32, base: u8) -> Option<f64> {
        self.cell(reference, position, insert_index)
            .and_then(|c| c.avg_qual(base_index(base)))
    }

    /// Insert-index cells currently allocated at `position`.
    pub fn insert_slots_at(&self, reference: &str, position: u32) -> usize {
        self.coverage
            .get(reference)
            .map(|c| c.insert_slots(position))
            .unwrap_or(0)
    }

    fn cell(&self, reference: &str, position: u32, insert_index: u32) -> Option<&CoverageCell> {
        self.coverage
            .get(reference)
            .and_then(|c| c.cell(position, insert_index))
    }

    fn rows_for(&self, model: &AnalysisModel, coverage: &ReferenceCoverage, rows: &mut Vec<Row>) {
        let name = &coverage.reference.name;
        let ref_nt_id = self
            .library
            .resolve_sequence_id(name)
            .map(Value::from)
            .unwrap_or(Value::Null);

        let before = rows.len();
        for (position, slot) in coverage.positions.iter().enumerate() {
            for (insert_index, cell) in slot.iter().enumerate() {
                if cell.depth == 0 {
                    continue;
                }
                check_consistency(name, position, insert_index, cell);

                let mut row = model.row();
                row.insert("ref_nt_id".into(), ref_nt_id.clone());
                row.insert("ref_nt_name".into(), json!(name));
                row.insert("ref_nt_position".into(), json!(position + 1));
                row.insert("ref_nt_insert_index".into(), json!(insert_index));
                row.insert("depth".into(), json!(cell.depth));
                row.insert("adj_depth".into(), json!(cell.hc_depth));
                row.insert("avgqual".into(), json!(round2(cell.qual_total as f64 / f64::from(cell.depth))));
                row.insert("adj_avgqual".into(), mean(cell.hc_qual_total, cell.hc_depth));
                for (idx, (_, suffix)) in BASES.iter().enumerate() {
                    row.insert(format!("total_{}", suffix), json!(cell.base_depth[idx]));
                    row.insert(
                        format!("avgqual_{}", suffix),
                        mean(cell.base_qual_total[idx], cell.base_depth[idx]),
                    );
                }

                if insert_index == 0 {
                    if let Some(ref_base) = coverage.reference.base_at(position as u32) {
                        if let Some(idx) = BASES.iter().position(|(b, _)| *b == ref_base) {
                            row.insert("wt".into(), json!(cell.base_depth[idx]));
                        }
                    }
                }

                rows.push(row);
                if self.log_progress && (rows.len() - before) % 10_000 == 0 {
                    info!("{} coverage rows prepared for {}", rows.len() - before, name);
                }
            }
        }
        info!("{}: {} positions with coverage", name, rows.len() - before);
    }
}

fn mean(total: u64, count: u32) -> Value {
    if count == 0 {
        Value::Null
    } else {
        json!(round2(total as f64 / f64::from(count)))
    }
}

/// The per-base counts must add up to the depth, and without `N` to the high-confidence depth.
fn check_consistency(name: &str, position: usize, insert_index: usize, cell: &CoverageCell) {
    let total: u32 = cell.base_depth.iter().sum();
    if total != cell.depth {
        error!(
            "Coverage mismatch for {} at {}.{}: per-base total {} does not match depth {}",
            name,
            position + 1,
            insert_index,
            total,
            cell.depth
        );
    }

    let without_n = total - cell.base_depth[N_INDEX];
    if cell.hc_depth > 0 && without_n != cell.hc_depth {
        error!(
            "Coverage mismatch for {} at {}.{}: per-base total without N {} does not match adjusted depth {}",
            name,
            position + 1,
            insert_index,
            without_n,
            cell.hc_depth
        );
    }
}

impl AlignmentAggregator for NtCoverageAggregator {
    fn inspect_alignment(&mut self, ctx: &mut AlignmentContext<'_>) -> Result<()> {
        if !is_passing_alignment(ctx.record, &self.thresholds, &mut self.counters) {
            return Ok(());
        }
        let Some(reference) = ctx.reference else {
            return Ok(());
        };
        self.counters.total_alignments += 1;

        let coverage = self
            .coverage
            .entry(reference.name.clone())
            .or_insert_with(|| ReferenceCoverage::new(Rc::clone(reference)));

        for pi in ctx.record.positions().filter(PositionInfo::include_in_snp_count) {
            let id = SnpId {
                ref_position: pi.ref_position,
                insert_index: pi.insert_index,
            };
            let snp = ctx
                .snps
                .get(&pi.ref_position)
                .and_then(|list| list.iter().find(|s| s.id == id));

            let cell = coverage.cell_mut(pi.ref_position, pi.insert_index);
            match snp {
                Some(snp) => {
                    if ctx.evaluator.is_passing(ctx.record, snp)? {
                        cell.add(snp.read_base, pi.quality, base_index(snp.read_base) != N_INDEX);
                    } else {
                        self.counters.filtered_snps += 1;
                        cell.add(b'N', pi.quality, false);
                    }
                }
                None => {
                    let base = pi.read_base.to_ascii_uppercase();
                    cell.add(base, pi.quality, base_index(base) != N_INDEX);
                }
            }
        }
        Ok(())
    }

    fn results(&self, model: &AnalysisModel) -> Result<Vec<TableRows>> {
        info!("Saving Coverage Results");
        let mut rows = Vec::new();
        for coverage in self.coverage.values() {
            self.rows_for(model, coverage, &mut rows);
        }
        info!("Reference sequences saved: {}", self.coverage.len());
        info!(
            "Alignments inspected: {}, low mapping quality: {}, filtered SNPs: {}",
            self.counters.total_alignments, self.counters.low_mapping_qual, self.counters.filtered_snps
        );
        Ok(vec![TableRows::new(Table::Coverage, rows)])
    }

    fn synopsis(&self) -> String {
        format!("NT Coverage Aggregator:\n{}", self.thresholds)
    }

    fn set_log_progress(&mut self, log_progress: bool) {
        self.log_progress = log_progress;
    }
}

/// One coverage aggregator read by several others in the same pass.
///
/// Register it with the iterator once; the SNP aggregators holding clones only read from it
/// when they build their rows.
#[derive(Clone)]
pub struct SharedCoverage(Rc<RefCell<NtCoverageAggregator>>);

impl SharedCoverage {
    pub fn borrow(&self) -> Ref<'_, NtCoverageAggregator> {
        self.0.borrow()
    }
}

impl AlignmentAggregator for SharedCoverage {
    fn inspect_alignment(&mut self, ctx: &mut AlignmentContext<'_>) -> Result<()> {
        self.0.borrow_mut().inspect_alignment(ctx)
    }

    fn results(&self, model: &AnalysisModel) -> Result<Vec<TableRows>> {
        self.0.borrow().results(model)
    }

    fn synopsis(&self) -> String {
        self.0.borrow().synopsis()
    }

    fn set_log_progress(&mut self, log_progress: bool) {
        self.0.borrow_mut().set_log_progress(log_progress);
    }
}
