//! Sequence-based typing: calls the references a sample carries by letting each read vote for
//! the references it aligns to without high-quality mismatches.
//!
//! Votes pass three filters before they are reported:
//!
//! 1. per read pair, where both mates must agree on at least one reference to make a pair call
//! 2. per reference, by read count and by percent of all calling reads
//! 3. per hit set, dropping references far weaker than the strongest one in the same set

use crate::aggregators::{AlignmentAggregator, AlignmentContext};
use crate::config::{AggregatorSettings, QualityThresholds, TypingSettings};
use crate::error::{PipelineError, Result};
use crate::persistence::{AnalysisModel, Row, RowStore, Table, TableRows};
use crate::reference::ReferenceLibrary;
use log::{debug, error, info};
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::rc::Rc;

const KEY_SEPARATOR: &str = "||";

/// Reads that share one set of passing references.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HitSet {
    pub ref_names: BTreeSet<String>,
    pub read_names: BTreeSet<String>,
    pub forward: u32,
    pub reverse: u32,
    pub valid_pairs: u32,
}

impl HitSet {
    fn new(ref_names: BTreeSet<String>) -> Self {
        Self {
            ref_names,
            ..Self::default()
        }
    }

    /// Sorted reference names joined with `||`.
    pub fn key(&self) -> String {
        join_key(&self.ref_names)
    }

    pub fn total(&self) -> usize {
        self.read_names.len()
    }

    fn append(&mut self, other: &HitSet) {
        self.forward += other.forward;
        self.reverse += other.reverse;
        self.valid_pairs += other.valid_pairs;
        self.read_names.extend(other.read_names.iter().cloned());
    }
}

fn join_key(ref_names: &BTreeSet<String>) -> String {
    ref_names.iter().cloned().collect::<Vec<_>>().join(KEY_SEPARATOR)
}

/// Hit sets that survived all three filters, and the reads that ended up without a call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AlignmentSummary {
    pub hit_sets: BTreeMap<String, HitSet>,
    pub unaligned: BTreeSet<String>,
}

#[derive(Debug, Clone, Copy, Default)]
struct FilterStats {
    alignments_helped_by_mate: u64,
    pairs_without_shared_hits: u64,
    paired_calls: u64,
    singleton_calls: u64,
    rejected_singletons: u64,
    skipped_references_by_read: u64,
    skipped_references_by_pct: u64,
    alignments_helped_by_allele_filters: u64,
    alleles_filtered_within_group: u64,
}

/// Tab-separated diagnostics of the filter stages, gzip-compressed when the path ends in `.gz`.
struct SummaryLog {
    writer: Option<Box<dyn Write>>,
}

impl SummaryLog {
    fn open(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self { writer: None });
        };

        let writer: Box<dyn Write> = if path.extension().is_some_and(|ext| ext == "gz") {
            niffler::to_path(path, niffler::compression::Format::Gzip, niffler::Level::Six)
                .map_err(|e| PipelineError::Persistence(format!("{}: {}", path.display(), e)))?
        } else {
            Box::new(BufWriter::new(File::create(path)?))
        };
        Ok(Self {
            writer: Some(writer),
        })
    }

    fn line<S: AsRef<str>>(&mut self, fields: &[S]) -> Result<()> {
        if let Some(writer) = self.writer.as_mut() {
            let fields: Vec<&str> = fields.iter().map(AsRef::as_ref).collect();
            writeln!(writer, "{}", fields.join("\t"))?;
        }
        Ok(())
    }

    fn finish(mut self) -> Result<()> {
        if let Some(writer) = self.writer.as_mut() {
            writer.flush()?;
        }
        Ok(())
    }
}

/// Sum of reads per reference over all hit sets, and the number of reads with any call.
fn totals_by_reference(hit_sets: &BTreeMap<String, HitSet>) -> (BTreeMap<String, usize>, usize) {
    let mut by_reference: BTreeMap<String, usize> = BTreeMap::new();
    let mut distinct_reads = 0;
    for hit_set in hit_sets.values() {
        for ref_name in &hit_set.ref_names {
            *by_reference.entry(ref_name.clone()).or_default() += hit_set.total();
        }
        if !hit_set.ref_names.is_empty() {
            distinct_reads += hit_set.total();
        }
    }
    (by_reference, distinct_reads)
}

fn merge_into(hit_sets: &mut BTreeMap<String, HitSet>, ref_names: BTreeSet<String>, from: &HitSet) {
    hit_sets
        .entry(join_key(&ref_names))
        .or_insert_with(|| HitSet::new(ref_names))
        .append(from);
}

fn display_opt(value: Option<f64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_else(|| "none".to_string())
}

pub struct SequenceBasedTypingAggregator {
    thresholds: QualityThresholds,
    settings: TypingSettings,
    library: Rc<ReferenceLibrary>,
    output_log: Option<PathBuf>,
    table_output: Option<PathBuf>,

    distinct_references: BTreeSet<String>,
    accepted_alignments: HashMap<(String, String, bool), u32>,
    unique_reads: HashSet<String>,
    /// Passing references of single-end reads and first mates.
    by_read_m1: BTreeMap<String, BTreeSet<String>>,
    /// Passing references of second mates.
    by_read_m2: BTreeMap<String, BTreeSet<String>>,
    unaligned: BTreeSet<String>,

    total_alignments_inspected: u64,
    short_alignments: u64,
    alignments_including_discarded_snps: u64,
}

impl SequenceBasedTypingAggregator {
    pub fn new(settings: &AggregatorSettings, library: Rc<ReferenceLibrary>) -> Self {
        Self {
            thresholds: settings.quality,
            settings: settings.typing.clone(),
            library,
            output_log: None,
            table_output: None,
            distinct_references: BTreeSet::new(),
            accepted_alignments: HashMap::new(),
            unique_reads: HashSet::new(),
            by_read_m1: BTreeMap::new(),
            by_read_m2: BTreeMap::new(),
            unaligned: BTreeSet::new(),
            total_alignments_inspected: 0,
            short_alignments: 0,
            alignments_including_discarded_snps: 0,
        }
    }

    /// Writes the per-stage diagnostics to `path` whenever the summary is computed.
    pub fn set_output_log(&mut self, path: impl Into<PathBuf>) {
        self.output_log = Some(path.into());
    }

    pub fn output_log(&self) -> Option<&Path> {
        self.output_log.as_deref()
    }

    /// Also writes the [`write_table`](Self::write_table) TSV to `path` when saving.
    pub fn set_table_output(&mut self, path: impl Into<PathBuf>) {
        self.table_output = Some(path.into());
    }

    pub fn unique_reads(&self) -> usize {
        self.unique_reads.len()
    }

    pub fn short_alignments(&self) -> u64 {
        self.short_alignments
    }

    pub fn accepted_alignments(&self) -> usize {
        self.accepted_alignments.len()
    }

    /// Runs the three filter stages over the votes collected so far.
    pub fn alignment_summary(&self) -> Result<AlignmentSummary> {
        let mut log = SummaryLog::open(self.output_log.as_deref())?;
        let mut unaligned = self.unaligned.clone();
        let mut stats = FilterStats::default();

        let stage1 = self.filter_by_read_pair(&mut log, &mut unaligned, &mut stats)?;
        let stage2 = self.filter_by_reference(&mut log, stage1, &mut unaligned, &mut stats)?;
        let stage3 = self.filter_within_hit_sets(&mut log, stage2, &mut unaligned, &mut stats)?;
        log.finish()?;

        let (by_reference, distinct_reads) = totals_by_reference(&stage3);
        info!("after filters:");
        info!("\tpassing references: {}", by_reference.len());
        info!("\ttotal passing reads: {}", distinct_reads);
        info!("\ttotal allele groups: {}", stage3.len());
        info!("\ttotal unaligned reads: {}", unaligned.len());
        self.log_summary(&stage3, &unaligned, &stats);

        Ok(AlignmentSummary {
            hit_sets: stage3,
            unaligned,
        })
    }

    /// Mates must share a reference to make a pair call. A first mate whose mate shares nothing
    /// still calls its own references as a singleton, unless only valid pairs are imported.
    fn filter_by_read_pair(
        &self,
        log: &mut SummaryLog,
        unaligned: &mut BTreeSet<String>,
        stats: &mut FilterStats,
    ) -> Result<BTreeMap<String, HitSet>> {
        let only_valid_pairs = self.settings.only_import_valid_pairs;
        let mut totals = BTreeMap::new();

        log.line(&[""])?;
        log.line(&["*****Summary By Read*****"])?;
        log.line(&[
            "Orientation",
            "ReadName",
            "InitialRefs",
            "PassingRefs",
            "RefName",
            "PassedFilters",
            "Has Aligned Mate?",
        ])?;

        info!("starting stage 1 filters (by read pair)");
        info!("\tinitial references: {}", self.distinct_references.len());
        info!("\tinitial reads: {}", self.unique_reads.len());
        info!("\tinitial unaligned reads: {}", unaligned.len());

        for (read_name, refs1) in &self.by_read_m1 {
            let mut calls = refs1.clone();
            let mut has_mate = false;

            if let Some(refs2) = self.by_read_m2.get(read_name).filter(|r| !r.is_empty()) {
                let shared: BTreeSet<String> = refs1.intersection(refs2).cloned().collect();
                if shared.is_empty() {
                    stats.pairs_without_shared_hits += 1;
                } else {
                    if shared.len() != refs1.len() {
                        stats.alignments_helped_by_mate += 1;
                    }
                    has_mate = true;
                    calls = shared;
                }
            }

            for ref_name in refs1 {
                log.line(&[
                    "Forward".to_string(),
                    read_name.clone(),
                    refs1.len().to_string(),
                    calls.len().to_string(),
                    ref_name.clone(),
                    calls.contains(ref_name).to_string(),
                    has_mate.to_string(),
                ])?;
            }

            if calls.is_empty() {
                unaligned.insert(read_name.clone());
            } else if !only_valid_pairs || has_mate {
                append_read(&mut totals, read_name, calls, true, has_mate);
                if has_mate {
                    stats.paired_calls += 1;
                } else {
                    stats.singleton_calls += 1;
                }
            } else {
                stats.rejected_singletons += 1;
                unaligned.insert(read_name.clone());
            }
        }

        for (read_name, refs2) in &self.by_read_m2 {
            if self.by_read_m1.contains_key(read_name) {
                continue;
            }

            if only_valid_pairs {
                stats.rejected_singletons += 1;
                unaligned.insert(read_name.clone());
            } else if refs2.is_empty() {
                unaligned.insert(read_name.clone());
            } else {
                append_read(&mut totals, read_name, refs2.clone(), false, true);
                stats.singleton_calls += 1;
            }

            for ref_name in refs2 {
                log.line(&[
                    "Reverse".to_string(),
                    read_name.clone(),
                    refs2.len().to_string(),
                    refs2.len().to_string(),
                    ref_name.clone(),
                    (!only_valid_pairs).to_string(),
                ])?;
            }
        }

        info!("\talignments helped using paired read: {}", stats.alignments_helped_by_mate);
        info!("\trejected singleton reads: {}", stats.rejected_singletons);
        Ok(totals)
    }

    /// Drops references below `minCountForRef` reads or `minPctForRef` percent of all calling
    /// reads, then regroups the hit sets by what is left.
    fn filter_by_reference(
        &self,
        log: &mut SummaryLog,
        stage1: BTreeMap<String, HitSet>,
        unaligned: &mut BTreeSet<String>,
        stats: &mut FilterStats,
    ) -> Result<BTreeMap<String, HitSet>> {
        let (by_reference, distinct_reads) = totals_by_reference(&stage1);

        info!("starting stage 2 filters:");
        info!("\tinitial references: {}", by_reference.len());
        info!("\tinitial distinct reads: {}", distinct_reads);
        info!("\tinitial allele groups: {}", stage1.len());
        info!("\tinitial unaligned reads: {}", unaligned.len());

        log.line(&["*****Summary By Reference*****"])?;
        log.line(&["RefName", "PassingReadsForRef", "TotalReads", "PctOfTotal"])?;

        let mut disallowed: BTreeSet<String> = BTreeSet::new();
        for (ref_name, total) in &by_reference {
            // entered by users as 0-100
            let pct = *total as f64 / distinct_reads as f64 * 100.0;
            let mut msg = "";
            if self.settings.min_count_for_ref.is_some_and(|min| (*total as f64) < min) {
                stats.skipped_references_by_read += 1;
                debug!(
                    "Reference discarded due to read count: {} / {} / {} / {}%",
                    ref_name, distinct_reads, total, pct
                );
                msg = "**skipped due to read count";
                disallowed.insert(ref_name.clone());
            } else if self.settings.min_pct_for_ref.is_some_and(|min| pct < min) {
                stats.skipped_references_by_pct += 1;
                debug!(
                    "Reference discarded due to percent: {} / {} / {} / {}%",
                    ref_name, distinct_reads, total, pct
                );
                msg = "**skipped due to percent";
                disallowed.insert(ref_name.clone());
            }

            log.line(&[
                ref_name.clone(),
                total.to_string(),
                distinct_reads.to_string(),
                pct.to_string(),
                msg.to_string(),
            ])?;
        }

        let mut stage2 = BTreeMap::new();
        for hit_set in stage1.values() {
            let remaining: BTreeSet<String> = hit_set.ref_names.difference(&disallowed).cloned().collect();
            if remaining.is_empty() {
                unaligned.extend(hit_set.read_names.iter().cloned());
                continue;
            }
            if remaining.len() != hit_set.ref_names.len() {
                stats.alignments_helped_by_allele_filters += 1;
            }
            merge_into(&mut stage2, remaining, hit_set);
        }
        Ok(stage2)
    }

    /// Within each hit set, drops references whose read total is below `minPctWithinGroup`
    /// percent of the strongest reference in the set.
    fn filter_within_hit_sets(
        &self,
        log: &mut SummaryLog,
        stage2: BTreeMap<String, HitSet>,
        unaligned: &mut BTreeSet<String>,
        stats: &mut FilterStats,
    ) -> Result<BTreeMap<String, HitSet>> {
        let (by_reference, distinct_reads) = totals_by_reference(&stage2);

        info!("starting stage 3 filters:");
        info!("\tinitial references: {}", by_reference.len());
        info!("\tinitial distinct reads: {}", distinct_reads);
        info!("\tinitial allele groups: {}", stage2.len());
        info!("\tinitial unaligned reads: {}", unaligned.len());

        log.line(&["*****Summary By Hit Set*****"])?;
        log.line(&[
            "Alleles",
            "RefName",
            "TotalReadsInGroup",
            "TotalReadsForRef",
            "RefPctOfTotal",
            "PctWithinGroup",
        ])?;

        let total_for = |ref_name: &String| by_reference.get(ref_name).copied().unwrap_or(0);

        let mut stage3 = BTreeMap::new();
        for (group, hit_set) in &stage2 {
            let max_for_set = hit_set.ref_names.iter().map(total_for).max().unwrap_or(0);

            let mut passing: BTreeSet<String> = BTreeSet::new();
            for (idx, ref_name) in hit_set.ref_names.iter().enumerate() {
                let total = total_for(ref_name);
                let pct = if max_for_set == 0 {
                    0.0
                } else {
                    100.0 * total as f64 / max_for_set as f64
                };

                let mut msg = "";
                if self.settings.min_pct_within_group.is_some_and(|min| pct < min) {
                    msg = "**discarded due to group pct filter";
                    stats.alleles_filtered_within_group += 1;
                } else {
                    passing.insert(ref_name.clone());
                }

                log.line(&[
                    if idx == 0 { group.clone() } else { String::new() },
                    ref_name.clone(),
                    hit_set.total().to_string(),
                    total.to_string(),
                    (100.0 * total as f64 / distinct_reads as f64).to_string(),
                    pct.to_string(),
                    msg.to_string(),
                ])?;
            }

            if passing.is_empty() {
                unaligned.extend(hit_set.read_names.iter().cloned());
            } else {
                merge_into(&mut stage3, passing, hit_set);
            }
        }

        info!("\ttotal alleles filtered: {}", stats.alleles_filtered_within_group);
        Ok(stage3)
    }

    fn log_summary(&self, hit_sets: &BTreeMap<String, HitSet>, unaligned: &BTreeSet<String>, stats: &FilterStats) {
        let accepted = self.accepted_alignments.len() as u64;
        info!("Saving SBT Results");
        info!("\tTotal alignments inspected: {}", self.total_alignments_inspected);
        info!("\tTotal reads inspected: {}", self.unique_reads.len());
        info!("\tAlignments discarded due to short length: {}", self.short_alignments);
        info!("\tAlignments retained (lacking high quality SNPs): {}", accepted);
        info!(
            "\tAlignments discarded (due to presence of high quality SNPs): {}",
            self.total_alignments_inspected.saturating_sub(accepted)
        );
        info!(
            "\tAlignments retained that contained low qual SNPs: {}",
            self.alignments_including_discarded_snps
        );
        info!("\tReferences with at least 1 aligned read: {}", self.distinct_references.len());
        info!("\tReferences disallowed due to read count filters: {}", stats.skipped_references_by_read);
        info!("\tReferences disallowed due to percent filters: {}", stats.skipped_references_by_pct);
        info!("\tReads with no alignments: {}", unaligned.len());
        info!("\tFirst mate or single reads with a passing alignment: {}", self.by_read_m1.len());
        info!("\tSecond mate reads with a passing alignment: {}", self.by_read_m2.len());
        info!("\tAlignment calls improved by paired read: {}", stats.alignments_helped_by_mate);
        info!(
            "\tAlignment calls improved by allele filters: {}",
            stats.alignments_helped_by_allele_filters
        );
        info!("\tPaired reads without common alignments: {}", stats.pairs_without_shared_hits);
        info!("\tAlignment calls using paired reads: {}", stats.paired_calls);
        info!("\tAlignment calls using only 1 read: {}", stats.singleton_calls);

        let accepted_references: BTreeSet<&String> = hit_sets.values().flat_map(|h| &h.ref_names).collect();
        if !self.distinct_references.is_empty() {
            info!(
                "\tTotal references retained: {} ({:.2}%)",
                accepted_references.len(),
                100.0 * accepted_references.len() as f64 / self.distinct_references.len() as f64
            );
        }
        if self.settings.only_import_valid_pairs {
            info!("\tOnly alignments representing valid pairs will be included");
            info!("\tAlignments rejected because they lacked a valid pair: {}", stats.rejected_singletons);
        }

        let with_hits: HashSet<&String> = self.by_read_m1.keys().chain(self.by_read_m2.keys()).collect();
        let no_hits = self.unique_reads.len().saturating_sub(with_hits.len());
        info!("\tReads discarded due to no passing alignments: {}", no_hits);
    }

    /// Writes `key, total, forward, reverse, valid pairs` per hit set, then the unaligned
    /// count on a row with an empty key.
    pub fn write_table(&self, output: &Path) -> Result<AlignmentSummary> {
        let summary = self.alignment_summary()?;
        let mut writer = BufWriter::new(File::create(output)?);
        for (key, hit_set) in &summary.hit_sets {
            writeln!(
                writer,
                "{}\t{}\t{}\t{}\t{}",
                key,
                hit_set.total(),
                hit_set.forward,
                hit_set.reverse,
                hit_set.valid_pairs
            )?;
        }
        writeln!(writer, "\t{}\t\t\t", summary.unaligned.len())?;
        writer.flush()?;
        Ok(summary)
    }

    fn summary_tables(&self, model: &AnalysisModel, summary: &AlignmentSummary) -> Vec<TableRows> {
        let (summary_rows, junction_rows) = self.summary_rows(model, summary);
        vec![
            TableRows::new(Table::AlignmentSummary, summary_rows),
            TableRows::new(Table::AlignmentSummaryJunction, junction_rows),
        ]
    }

    fn summary_rows(&self, model: &AnalysisModel, summary: &AlignmentSummary) -> (Vec<Row>, Vec<Row>) {
        let file_id = model.alignment_file.map(Value::from).unwrap_or(Value::Null);
        let mut summary_rows = Vec::with_capacity(summary.hit_sets.len() + 1);
        let mut junction_rows = Vec::new();

        for (idx, hit_set) in summary.hit_sets.values().enumerate() {
            let rowid = idx as i64 + 1;
            let mut row = model.row();
            row.insert("rowid".into(), json!(rowid));
            row.insert("file_id".into(), file_id.clone());
            row.insert("total".into(), json!(hit_set.total()));
            row.insert("total_forward".into(), json!(hit_set.forward));
            row.insert("total_reverse".into(), json!(hit_set.reverse));
            row.insert("valid_pairs".into(), json!(hit_set.valid_pairs));
            summary_rows.push(row);

            for ref_name in &hit_set.ref_names {
                let ref_nt_id = self.library.resolve_sequence_id(ref_name);
                if ref_nt_id.is_none() {
                    error!("unknown reference id: [{}]", ref_name);
                }
                let mut junction = model.row();
                junction.insert("alignment_id".into(), json!(rowid));
                junction.insert("ref_nt_id".into(), ref_nt_id.map(Value::from).unwrap_or(Value::Null));
                junction.insert("ref_nt_name".into(), json!(ref_name));
                junction.insert("status".into(), json!(true));
                junction_rows.push(junction);
            }
        }

        if summary.hit_sets.is_empty() && summary.unaligned.is_empty() {
            return (summary_rows, junction_rows);
        }
        let mut row = model.row();
        row.insert("rowid".into(), json!(summary.hit_sets.len() as i64 + 1));
        row.insert("file_id".into(), file_id);
        row.insert("total".into(), json!(summary.unaligned.len()));
        row.insert("total_forward".into(), Value::Null);
        row.insert("total_reverse".into(), Value::Null);
        row.insert("valid_pairs".into(), Value::Null);
        summary_rows.push(row);

        (summary_rows, junction_rows)
    }
}

fn append_read(
    totals: &mut BTreeMap<String, HitSet>,
    read_name: &str,
    ref_names: BTreeSet<String>,
    forward: bool,
    reverse: bool,
) {
    let hit_set = totals
        .entry(join_key(&ref_names))
        .or_insert_with(|| HitSet::new(ref_names));
    if forward {
        hit_set.forward += 1;
    }
    if reverse {
        hit_set.reverse += 1;
    }
    if forward && reverse {
        hit_set.valid_pairs += 1;
    }
    hit_set.read_names.insert(read_name.to_string());
}

impl AlignmentAggregator for SequenceBasedTypingAggregator {
    /// Every alignment of a read is a vote, secondary alignments included.
    fn inspect_alignment(&mut self, ctx: &mut AlignmentContext<'_>) -> Result<()> {
        let record = ctx.record;
        self.unique_reads.insert(record.name.clone());

        let reference_name = match (&record.reference_name, ctx.reference) {
            (Some(name), Some(_)) if !record.is_unmapped() => name.clone(),
            _ => {
                if !record.is_paired() || record.is_mate_unmapped() {
                    self.unaligned.insert(record.name.clone());
                }
                return Ok(());
            }
        };

        self.total_alignments_inspected += 1;
        if record.reference_length() < self.settings.min_alignment_length {
            self.short_alignments += 1;
            return Ok(());
        }

        let mut candidates = 0u32;
        let mut high_quality = 0u32;
        for snp in ctx.snps.values().flatten() {
            candidates += 1;
            if ctx.evaluator.is_passing(record, snp)? {
                high_quality += 1;
            }
        }
        if high_quality > self.settings.max_snps {
            return Ok(());
        }

        *self
            .accepted_alignments
            .entry((record.name.clone(), reference_name.clone(), record.is_reverse()))
            .or_default() += 1;
        if high_quality != candidates {
            self.alignments_including_discarded_snps += 1;
        }

        let by_read = if !record.is_paired() || record.is_first_in_pair() {
            &mut self.by_read_m1
        } else {
            &mut self.by_read_m2
        };
        by_read
            .entry(record.name.clone())
            .or_default()
            .insert(reference_name.clone());
        self.distinct_references.insert(reference_name);
        Ok(())
    }

    fn results(&self, model: &AnalysisModel) -> Result<Vec<TableRows>> {
        let summary = self.alignment_summary()?;
        Ok(self.summary_tables(model, &summary))
    }

    fn write_output(&mut self, store: &mut dyn RowStore, model: &AnalysisModel) -> Result<()> {
        let summary = match self.table_output.as_deref() {
            Some(path) => {
                info!("Writing hit set table to {}", path.display());
                self.write_table(path)?
            }
            None => self.alignment_summary()?,
        };
        let tables = self.summary_tables(model, &summary);
        for batch in &tables {
            info!("Saving {} rows to {}", batch.rows.len(), batch.table);
        }
        store.replace_rows(model.analysis_id, tables)
    }

    fn synopsis(&self) -> String {
        format!(
            "Sequence Based Typing Aggregator:\n\
             \tMaxSnpsTolerated: {}\n\
             \tOnlyImportValidPairs: {}\n\
             \tMinSnpQual: {}\n\
             \tMinAvgSnpQual: {}\n\
             \tMinDipQual: {}\n\
             \tMinAvgDipQual: {}\n\
             \tMinCountForRef: {}\n\
             \tMinPctForRef: {}\n\
             \tMinPctWithinGroup: {}\n",
            self.settings.max_snps,
            self.settings.only_import_valid_pairs,
            self.thresholds.min_snp_qual,
            self.thresholds.min_avg_snp_qual,
            self.thresholds.min_dip_qual,
            self.thresholds.min_avg_dip_qual,
            display_opt(self.settings.min_count_for_ref),
            display_opt(self.settings.min_pct_for_ref),
            display_opt(self.settings.min_pct_within_group),
        )
    }
}
