use crate::aggregators::nt_coverage::NtCoverageAggregator;
use crate::aggregators::nt_snp_by_pos::NtSnpByPosAggregator;
use crate::aggregators::{
    is_passing_alignment, round2, AlignmentAggregator, AlignmentContext, AlignmentCounters,
};
use crate::alignment::{renumber_insert_indices, SnpMap};
use crate::config::{AggregatorSettings, QualityThresholds};
use crate::error::{PipelineError, Result};
use crate::persistence::{AnalysisModel, Row, RowStore, Table, TableRows};
use crate::reference::{ReferenceLibrary, ReferenceSequence};
use crate::translation::codon::FRAMESHIFT;
use crate::translation::{AaSnp, TranslatingReferenceSequence};
use log::info;
use serde_json::{json, Value};
use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::rc::Rc;

/// NT aggregation followed by translation of the passing SNPs of each read.
///
/// The NT step is owned, so its SNP tallies and coverage come along with the AA calls.
pub struct AaTranslationStep {
    nt: NtSnpByPosAggregator,
    thresholds: QualityThresholds,
    library: Rc<ReferenceLibrary>,
    translators: HashMap<String, TranslatingReferenceSequence>,
    counters: AlignmentCounters,
}

impl AaTranslationStep {
    pub fn new(settings: &AggregatorSettings, library: Rc<ReferenceLibrary>, nt: NtSnpByPosAggregator) -> Self {
        Self {
            nt,
            thresholds: settings.quality,
            library,
            translators: HashMap::new(),
            counters: AlignmentCounters::default(),
        }
    }

    pub fn nt(&self) -> &NtSnpByPosAggregator {
        &self.nt
    }

    pub fn nt_mut(&mut self) -> &mut NtSnpByPosAggregator {
        &mut self.nt
    }

    pub fn counters(&self) -> AlignmentCounters {
        self.counters
    }

    /// Runs the NT step, then translates the SNPs of `ctx` that pass the quality filter.
    /// Insert indices are renumbered first, since filtering can leave gaps in an insertion.
    pub fn translate_alignment(&mut self, ctx: &mut AlignmentContext<'_>) -> Result<Vec<AaSnp>> {
        self.nt.inspect_alignment(ctx)?;

        if !is_passing_alignment(ctx.record, &self.thresholds, &mut self.counters) {
            return Ok(Vec::new());
        }
        let Some(reference) = ctx.reference else {
            return Ok(Vec::new());
        };
        self.counters.total_alignments += 1;

        let mut passing = SnpMap::new();
        for (position, snps) in ctx.snps {
            let mut kept = Vec::with_capacity(snps.len());
            for snp in snps {
                if ctx.evaluator.is_passing(ctx.record, snp)? {
                    kept.push(snp.clone());
                } else {
                    self.counters.filtered_snps += 1;
                }
            }
            if !kept.is_empty() {
                passing.insert(*position, renumber_insert_indices(&kept));
            }
        }

        if passing.is_empty() {
            return Ok(Vec::new());
        }
        let translator = self.translator_for(reference)?;
        Ok(translator.translate_snps_for_read(&passing))
    }

    /// Fails for references the library cannot resolve to an id.
    fn translator_for(&mut self, reference: &Rc<ReferenceSequence>) -> Result<&TranslatingReferenceSequence> {
        match self.translators.entry(reference.name.clone()) {
            Entry::Occupied(entry) => Ok(&*entry.into_mut()),
            Entry::Vacant(entry) => {
                let ref_nt_id = self.library.require_sequence_id(&reference.name)?;
                let peptides = self.library.peptides_for(ref_nt_id).to_vec();
                info!(
                    "Translating {} (id {}) with {} peptides",
                    reference.name,
                    ref_nt_id,
                    peptides.len()
                );
                Ok(&*entry.insert(TranslatingReferenceSequence::new(
                    ref_nt_id,
                    Rc::clone(reference),
                    peptides,
                )))
            }
        }
    }

    /// Mean depth at insert index 0 of each position, or `None` without positions.
    fn mean_depth(
        coverage: &NtCoverageAggregator,
        reference: &str,
        positions: &BTreeSet<(u32, u32)>,
        high_confidence: bool,
    ) -> Option<f64> {
        if positions.is_empty() {
            return None;
        }
        let total: u32 = positions
            .iter()
            .map(|(position, _)| {
                if high_confidence {
                    coverage.hc_depth_at(reference, *position, 0)
                } else {
                    coverage.depth_at(reference, *position, 0)
                }
            })
            .sum();
        Some(f64::from(total) / positions.len() as f64)
    }
}

/// (peptide id, 1-based AA position, AA insert index, codon)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AaCodonKey {
    pub peptide_id: i64,
    pub aa_position: u32,
    pub aa_insert_index: u32,
    pub codon: String,
}

#[derive(Debug, Clone)]
struct CodonCall {
    peptide_name: String,
    ref_nt_id: i64,
    ref_nt_name: String,
    reference_residue: String,
    read_residue: String,
    nt_positions: BTreeSet<(u32, u32)>,
    read_names: BTreeSet<String>,
    /// Reads per NT description, each read counted once.
    nt_position_reads: BTreeMap<String, BTreeSet<String>>,
}

impl CodonCall {
    fn new(snp: &AaSnp) -> Self {
        Self {
            peptide_name: snp.peptide_name.clone(),
            ref_nt_id: snp.ref_nt_id,
            ref_nt_name: snp.nt_snp.reference_name.clone(),
            reference_residue: snp.reference_residue.clone(),
            read_residue: snp.read_residue.clone(),
            nt_positions: BTreeSet::new(),
            read_names: BTreeSet::new(),
            nt_position_reads: BTreeMap::new(),
        }
    }

    fn add(&mut self, snp: &AaSnp) {
        self.nt_positions
            .insert((snp.nt_snp.last_ref_position(), snp.nt_snp.insert_index));
        self.read_names.insert(snp.nt_snp.read_name.clone());
        self.nt_position_reads
            .entry(snp.nt_position_string())
            .or_default()
            .insert(snp.nt_snp.read_name.clone());
    }

    fn nt_position_string(&self) -> String {
        let descriptions = self
            .nt_position_reads
            .iter()
            .map(|(description, reads)| format!("{} ({})", description, reads.len()));
        join_nt_positions(descriptions)
    }
}

/// One NT description per line.
fn join_nt_positions(descriptions: impl IntoIterator<Item = String>) -> String {
    descriptions.into_iter().collect::<Vec<_>>().join(",\n")
}

/// Unique amino acid calls by peptide position and codon, with read support and the mean
/// depth of the nucleotides behind each call.
pub struct AaSnpByCodonAggregator {
    step: AaTranslationStep,
    calls: BTreeMap<AaCodonKey, CodonCall>,
    log_progress: bool,
}

impl AaSnpByCodonAggregator {
    pub fn new(settings: &AggregatorSettings, library: Rc<ReferenceLibrary>) -> Self {
        let nt = NtSnpByPosAggregator::new(settings, Rc::clone(&library));
        Self::with_nt_step(settings, library, nt)
    }

    /// Uses a preconfigured NT step, e.g. one reading a shared coverage aggregator.
    pub fn with_nt_step(settings: &AggregatorSettings, library: Rc<ReferenceLibrary>, nt: NtSnpByPosAggregator) -> Self {
        Self {
            step: AaTranslationStep::new(settings, library, nt),
            calls: BTreeMap::new(),
            log_progress: true,
        }
    }

    pub fn step(&self) -> &AaTranslationStep {
        &self.step
    }

    /// Distinct reads supporting `key`.
    pub fn read_count(&self, key: &AaCodonKey) -> usize {
        self.calls.get(key).map(|c| c.read_names.len()).unwrap_or(0)
    }

    pub fn keys(&self) -> impl Iterator<Item = &AaCodonKey> {
        self.calls.keys()
    }

    fn add_snp(&mut self, snp: &AaSnp) {
        let key = AaCodonKey {
            peptide_id: snp.peptide_id,
            aa_position: snp.aa_position,
            aa_insert_index: snp.aa_insert_index,
            codon: snp.codon.clone(),
        };
        self.calls
            .entry(key)
            .or_insert_with(|| CodonCall::new(snp))
            .add(snp);
    }

    fn build_rows(&self, model: &AnalysisModel, coverage: &NtCoverageAggregator) -> Vec<Row> {
        let mut rows = Vec::with_capacity(self.calls.len());
        let mut by_reference: BTreeMap<String, usize> = BTreeMap::new();

        for (key, call) in &self.calls {
            let read_count = call.read_names.len();
            let depth = AaTranslationStep::mean_depth(coverage, &call.ref_nt_name, &call.nt_positions, false);

            let mut row = model.row();
            row.insert("ref_aa_id".into(), json!(key.peptide_id));
            row.insert("ref_aa_name".into(), json!(call.peptide_name));
            row.insert("ref_nt_id".into(), json!(call.ref_nt_id));
            row.insert("ref_nt_name".into(), json!(call.ref_nt_name));
            row.insert("ref_aa_position".into(), json!(key.aa_position));
            row.insert("ref_aa_insert_index".into(), json!(key.aa_insert_index));
            row.insert("ref_aa".into(), json!(call.reference_residue));
            row.insert("q_aa".into(), json!(call.read_residue));
            row.insert("codon".into(), json!(key.codon));
            row.insert("readcount".into(), json!(read_count));
            row.insert("ref_nt_positions".into(), json!(call.nt_position_string()));
            row.insert("depth".into(), depth.map(|d| json!(round2(d))).unwrap_or(Value::Null));

            if let Some(depth) = depth {
                if call.read_residue != FRAMESHIFT {
                    let adj_depth = AaTranslationStep::mean_depth(coverage, &call.ref_nt_name, &call.nt_positions, true)
                        .unwrap_or(0.0);
                    let pct = if depth == 0.0 || adj_depth == 0.0 {
                        0.0
                    } else {
                        read_count as f64 / adj_depth * 100.0
                    };
                    row.insert("adj_depth".into(), json!(round2(adj_depth)));
                    row.insert("pct".into(), json!(round2(pct)));
                }
            }

            *by_reference
                .entry(format!("{} {}", call.ref_nt_name, call.peptide_name))
                .or_default() += 1;
            rows.push(row);
            if self.log_progress && rows.len() % 10_000 == 0 {
                info!("{} AA SNP rows prepared", rows.len());
            }
        }

        info!("\tTotal AA Reference sequences encountered: {}", by_reference.len());
        for (reference, count) in &by_reference {
            info!("\t{}: {}", reference, count);
        }
        rows
    }
}

impl AlignmentAggregator for AaSnpByCodonAggregator {
    fn inspect_alignment(&mut self, ctx: &mut AlignmentContext<'_>) -> Result<()> {
        for snp in self.step.translate_alignment(ctx)? {
            self.add_snp(&snp);
        }
        Ok(())
    }

    fn results(&self, model: &AnalysisModel) -> Result<Vec<TableRows>> {
        info!("Saving AA SNP Results");
        let rows = self.step.nt().read_coverage(|coverage| self.build_rows(model, coverage));
        let counters = self.step.counters();
        info!(
            "\tTotal alignments discarded due to low mapping quality: {}",
            counters.low_mapping_qual
        );
        info!("\tTotal filtered SNPs: {}", counters.filtered_snps);
        info!("\tTotal alignments inspected: {}", counters.total_alignments);
        Ok(vec![TableRows::new(Table::AaSnpsByCodon, rows)])
    }

    fn synopsis(&self) -> String {
        format!("AA SNP By Codon Aggregator:\n{}", self.step.thresholds)
    }

    fn set_log_progress(&mut self, log_progress: bool) {
        self.log_progress = log_progress;
        self.step.nt_mut().set_log_progress(log_progress);
    }
}

/// Like [`AaCodonKey`], additionally split by read.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AaReadKey {
    pub peptide_id: i64,
    pub aa_position: u32,
    pub codon: String,
    pub read_name: String,
}

#[derive(Debug, Clone)]
struct ReadCall {
    peptide_name: String,
    ref_nt_name: String,
    reference_residue: String,
    read_residue: String,
    nt_positions: BTreeSet<(u32, u32)>,
    nt_position_strings: BTreeSet<String>,
}

/// Amino acid calls kept per read. Synonymous calls are tracked but not counted.
///
/// Rows can be inspected with [`results`](AlignmentAggregator::results), but there is no
/// table to persist them to.
pub struct AaSnpByReadAggregator {
    step: AaTranslationStep,
    reference_bases: HashMap<String, Rc<ReferenceSequence>>,
    calls: BTreeMap<AaReadKey, ReadCall>,
    mismatches: BTreeMap<AaReadKey, u32>,
}

impl AaSnpByReadAggregator {
    pub fn new(settings: &AggregatorSettings, library: Rc<ReferenceLibrary>) -> Self {
        let nt = NtSnpByPosAggregator::new(settings, Rc::clone(&library));
        Self {
            step: AaTranslationStep::new(settings, library, nt),
            reference_bases: HashMap::new(),
            calls: BTreeMap::new(),
            mismatches: BTreeMap::new(),
        }
    }

    pub fn step(&self) -> &AaTranslationStep {
        &self.step
    }

    /// Non-synonymous calls made by one read at `key`.
    pub fn mismatch_count(&self, key: &AaReadKey) -> u32 {
        self.mismatches.get(key).copied().unwrap_or(0)
    }

    pub fn tracked_calls(&self) -> usize {
        self.calls.len()
    }

    fn add_snp(&mut self, snp: &AaSnp) {
        let key = AaReadKey {
            peptide_id: snp.peptide_id,
            aa_position: snp.aa_position,
            codon: snp.codon.clone(),
            read_name: snp.nt_snp.read_name.clone(),
        };

        let call = self.calls.entry(key.clone()).or_insert_with(|| ReadCall {
            peptide_name: snp.peptide_name.clone(),
            ref_nt_name: snp.nt_snp.reference_name.clone(),
            reference_residue: snp.reference_residue.clone(),
            read_residue: snp.read_residue.clone(),
            nt_positions: BTreeSet::new(),
            nt_position_strings: BTreeSet::new(),
        });
        call.nt_positions
            .insert((snp.nt_snp.last_ref_position(), snp.nt_snp.insert_index));
        call.nt_position_strings.insert(snp.nt_position_string());

        if !snp.is_synonymous() {
            *self.mismatches.entry(key).or_default() += 1;
        }
    }

    /// Reference bases under a call, `-` for inserted positions.
    fn reference_bases_for(&self, call: &ReadCall) -> String {
        let Some(reference) = self.reference_bases.get(&call.ref_nt_name) else {
            return String::new();
        };
        call.nt_positions
            .iter()
            .map(|(position, insert_index)| {
                if *insert_index > 0 {
                    '-'
                } else {
                    reference.base_at(*position).map(char::from).unwrap_or('N')
                }
            })
            .collect()
    }
}

impl AlignmentAggregator for AaSnpByReadAggregator {
    fn inspect_alignment(&mut self, ctx: &mut AlignmentContext<'_>) -> Result<()> {
        let calls = self.step.translate_alignment(ctx)?;
        if let Some(reference) = ctx.reference {
            // TODO: insert only when absent, the entry is replaced on every alignment
            self.reference_bases
                .insert(reference.name.clone(), Rc::clone(reference));
        }
        for snp in &calls {
            self.add_snp(snp);
        }
        Ok(())
    }

    fn results(&self, model: &AnalysisModel) -> Result<Vec<TableRows>> {
        let rows: Vec<Row> = self.step.nt().read_coverage(|coverage| {
            self.mismatches
                .iter()
                .filter_map(|(key, count)| self.calls.get(key).map(|call| (key, count, call)))
                .map(|(key, count, call)| {
                    let depth =
                        AaTranslationStep::mean_depth(coverage, &call.ref_nt_name, &call.nt_positions, false);
                    let mut row = model.row();
                    row.insert("ref_aa_id".into(), json!(key.peptide_id));
                    row.insert("ref_aa_name".into(), json!(call.peptide_name));
                    row.insert("ref_nt_name".into(), json!(call.ref_nt_name));
                    row.insert("ref_aa_position".into(), json!(key.aa_position));
                    row.insert("ref_aa".into(), json!(call.reference_residue));
                    row.insert("q_aa".into(), json!(call.read_residue));
                    row.insert("codon".into(), json!(key.codon));
                    row.insert("readname".into(), json!(key.read_name));
                    row.insert("mismatches".into(), json!(count));
                    row.insert("ref_nt_bases".into(), json!(self.reference_bases_for(call)));
                    row.insert(
                        "ref_nt_positions".into(),
                        json!(join_nt_positions(call.nt_position_strings.iter().cloned())),
                    );
                    row.insert("depth".into(), depth.map(|d| json!(round2(d))).unwrap_or(Value::Null));
                    row
                })
                .collect()
        });
        Ok(vec![TableRows::new(Table::AaSnpsByRead, rows)])
    }

    fn synopsis(&self) -> String {
        format!("AA SNP By Read Aggregator:\n{}", self.step.thresholds)
    }

    fn write_output(&mut self, _store: &mut dyn RowStore, _model: &AnalysisModel) -> Result<()> {
        Err(PipelineError::Unsupported("AA SNP by read results cannot be saved"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregators::test_support::{evaluator, feed};
    use crate::alignment::record::fixtures::record;
    use crate::alignment::AlignmentRecord;
    use crate::persistence::MemoryRowStore;
    use crate::reference::PeptideModel;

    // codons from position 1: ATG GCA AAT
    const REFERENCE: &[u8] = b"ATGGCAAATTGACCC";

    fn reference() -> Rc<ReferenceSequence> {
        Rc::new(ReferenceSequence::new("chr1", REFERENCE))
    }

    fn library() -> Rc<ReferenceLibrary> {
        Rc::new(
            ReferenceLibrary::new()
                .with_sequence_id("chr1", 1)
                .with_peptide(PeptideModel {
                    id: 10,
                    name: "orf1".to_string(),
                    ref_nt_id: 1,
                    exons: vec![(1, 12)],
                    complement: false,
                    sequence: "MAN*".to_string(),
                }),
        )
    }

    #[test]
    fn codon_depth_is_the_mean_of_its_positions() {
        let settings = AggregatorSettings::default();
        let mut aggregator = AaSnpByCodonAggregator::new(&settings, library());
        let mut evaluator = evaluator(settings.quality);

        // GCA -> TTT at positions 4-6 in 40 reads, plus 10 reads covering 4-5 only
        let mut records: Vec<AlignmentRecord> = (0..40)
            .map(|i| record(&format!("m{}\t0\tchr1\t4\t60\t3M\t*\t0\t0\tTTT\tIII", i)))
            .collect();
        records.extend((0..10).map(|i| record(&format!("w{}\t0\tchr1\t4\t60\t2M\t*\t0\t0\tGC\tII", i))));
        feed(&mut aggregator, &mut evaluator, &reference(), &records);

        let key = AaCodonKey {
            peptide_id: 10,
            aa_position: 2,
            aa_insert_index: 0,
            codon: "TTT".to_string(),
        };
        assert_eq!(aggregator.read_count(&key), 40);

        let tables = aggregator.results(&AnalysisModel::new(1)).unwrap();
        assert_eq!(tables[0].table, Table::AaSnpsByCodon);
        let rows = &tables[0].rows;
        assert_eq!(rows.len(), 1);

        let row = &rows[0];
        assert_eq!(row["ref_aa"], json!("A"));
        assert_eq!(row["q_aa"], json!("F"));
        assert_eq!(row["readcount"], json!(40));
        assert_eq!(row["depth"], json!(46.67));
        assert_eq!(row["adj_depth"], json!(46.67));
        assert_eq!(row["pct"], json!(85.71));
        assert_eq!(row["ref_nt_positions"], json!("G4T;C5T;A6T (40)"));
    }

    #[test]
    fn nt_positions_are_listed_one_per_line() {
        let joined = join_nt_positions(vec!["G4T;C5T (3)".to_string(), "G4T;C5T;A6T (40)".to_string()]);
        assert_eq!(joined, "G4T;C5T (3),\nG4T;C5T;A6T (40)");
        assert_eq!(join_nt_positions(vec!["A6T (1)".to_string()]), "A6T (1)");
    }

    #[test]
    fn frameshift_calls_skip_percentages() {
        let settings = AggregatorSettings::default();
        let mut aggregator = AaSnpByCodonAggregator::new(&settings, library());
        let mut evaluator = evaluator(settings.quality);

        feed(
            &mut aggregator,
            &mut evaluator,
            &reference(),
            &[record("r1\t0\tchr1\t1\t60\t4M1D4M\t*\t0\t0\tATGGAAAT\tIIIIIIII")],
        );

        let rows = &aggregator.results(&AnalysisModel::new(1)).unwrap()[0].rows;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["q_aa"], json!(":"));
        assert_eq!(rows[0]["codon"], json!("G-A"));
        assert_eq!(rows[0]["depth"], json!(1.0));
        assert!(!rows[0].contains_key("pct"));
    }

    #[test]
    fn filtered_snps_are_not_translated() {
        let settings = AggregatorSettings::builder().min_snp_qual(30).build();
        let mut aggregator = AaSnpByCodonAggregator::new(&settings, library());
        let mut evaluator = evaluator(settings.quality);

        feed(
            &mut aggregator,
            &mut evaluator,
            &reference(),
            &[record("r1\t0\tchr1\t4\t60\t3M\t*\t0\t0\tGTA\tI+I")],
        );

        assert_eq!(aggregator.keys().count(), 0);
        assert_eq!(aggregator.step().counters().filtered_snps, 1);
    }

    #[test]
    fn unknown_reference_is_fatal() {
        let settings = AggregatorSettings::default();
        let mut aggregator = AaSnpByCodonAggregator::new(&settings, Rc::new(ReferenceLibrary::new()));
        let mut evaluator = evaluator(settings.quality);
        let reference = reference();

        let rec = record("r1\t0\tchr1\t4\t60\t3M\t*\t0\t0\tGTA\tIII");
        let snps = crate::alignment::extract_snps(&rec, &reference.bases);
        let mut ctx = AlignmentContext {
            record: &rec,
            reference: Some(&reference),
            snps: &snps,
            evaluator: &mut evaluator,
        };
        let err = aggregator.inspect_alignment(&mut ctx).unwrap_err();
        assert_eq!(err.to_string(), "Improper sequence name format: chr1");
    }

    #[test]
    fn by_read_counts_only_non_synonymous_calls() {
        let settings = AggregatorSettings::default();
        let mut aggregator = AaSnpByReadAggregator::new(&settings, library());
        let mut evaluator = evaluator(settings.quality);

        // GCA -> GCG keeps alanine, GCA -> GTA gives valine
        feed(
            &mut aggregator,
            &mut evaluator,
            &reference(),
            &[
                record("syn\t0\tchr1\t4\t60\t3M\t*\t0\t0\tGCG\tIII"),
                record("mis\t0\tchr1\t4\t60\t3M\t*\t0\t0\tGTA\tIII"),
            ],
        );

        assert_eq!(aggregator.tracked_calls(), 2);
        let synonymous = AaReadKey {
            peptide_id: 10,
            aa_position: 2,
            codon: "GCG".to_string(),
            read_name: "syn".to_string(),
        };
        let missense = AaReadKey {
            peptide_id: 10,
            aa_position: 2,
            codon: "GTA".to_string(),
            read_name: "mis".to_string(),
        };
        assert_eq!(aggregator.mismatch_count(&synonymous), 0);
        assert_eq!(aggregator.mismatch_count(&missense), 1);

        let rows = &aggregator.results(&AnalysisModel::new(1)).unwrap()[0].rows;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["readname"], json!("mis"));
        assert_eq!(rows[0]["ref_nt_bases"], json!("C"));

        let mut store = MemoryRowStore::new();
        let err = aggregator
            .write_output(&mut store, &AnalysisModel::new(1))
            .unwrap_err();
        assert!(matches!(err, PipelineError::Unsupported(_)));
    }
}
