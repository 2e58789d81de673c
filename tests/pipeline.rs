mod common;

use common::Fixture;
use sequence_analysis::aggregators::{
    AaSnpByCodonAggregator, AaSnpByReadAggregator, MetricsAggregator, NtCoverageAggregator, NtSnpByPosAggregator,
    SequenceBasedTypingAggregator,
};
use sequence_analysis::reference::ReferenceLibrary;
use sequence_analysis::{
    AggregatorSettings, AnalysisModel, BamIterator, MemoryRowStore, PipelineError, RowStore, Table,
};
use serde_json::json;
use std::fs;
use std::path::PathBuf;
use std::rc::Rc;

// codons from position 1: ATG GCA AAT TGA
const ORF: &str = "ATGGCAAATTGACCC";

fn peptides(fixture: &Fixture) -> PathBuf {
    let path = fixture.dir.path().join("peptides.json");
    fs::write(
        &path,
        r#"[{"id": 10, "name": "orf1", "ref_nt_id": 7, "exons": [[1, 12]], "sequence": "MAN*"}]"#,
    )
    .unwrap();
    path
}

fn register_all(iterator: &mut BamIterator, settings: &AggregatorSettings, library: &Rc<ReferenceLibrary>) {
    let coverage = NtCoverageAggregator::new(settings, Rc::clone(library)).into_shared();
    iterator.add_aggregator(Box::new(coverage.clone()));
    iterator.add_aggregator(Box::new(NtSnpByPosAggregator::with_shared_coverage(
        settings,
        Rc::clone(library),
        coverage.clone(),
    )));
    let nt = NtSnpByPosAggregator::with_shared_coverage(settings, Rc::clone(library), coverage);
    iterator.add_aggregator(Box::new(AaSnpByCodonAggregator::with_nt_step(settings, Rc::clone(library), nt)));
    iterator.add_aggregator(Box::new(AaSnpByReadAggregator::new(settings, Rc::clone(library))));
    iterator.add_aggregator(Box::new(SequenceBasedTypingAggregator::new(settings, Rc::clone(library))));
    iterator.add_aggregator(Box::new(MetricsAggregator::new(settings, Rc::clone(library))));
}

const TABLES: [Table; 6] = [
    Table::Coverage,
    Table::NtSnpsByPos,
    Table::AaSnpsByCodon,
    Table::AlignmentSummary,
    Table::AlignmentSummaryJunction,
    Table::AlignmentMetrics,
];

#[test]
fn empty_bam_gives_no_rows() {
    let fixture = Fixture::new(&[("orf", ORF)], &[]).with_id_key(&[(7, "orf")]);
    let settings = AggregatorSettings::default();
    let peptides = peptides(&fixture);
    let library = Rc::new(ReferenceLibrary::load(&fixture.fasta, Some(peptides.as_path())).unwrap());

    let mut iterator = BamIterator::new(&fixture.bam, &fixture.fasta, settings.quality).unwrap();
    register_all(&mut iterator, &settings, &library);
    assert_eq!(iterator.aggregator_count(), 6);
    assert_eq!(iterator.iterate_reads().unwrap(), 0);

    let mut store = MemoryRowStore::new();
    iterator.write_outputs(&mut store, &AnalysisModel::new(1)).unwrap();
    for table in TABLES {
        assert_eq!(store.row_count(table), 0, "{}", table);
    }
    assert!(store.synopsis(1).unwrap().is_some());
}

#[test]
fn full_pass_translates_codons() {
    let mut records = vec!["w0\t0\torf\t1\t60\t12M\t*\t0\t0\tATGGCAAATTGA\tIIIIIIIIIIII".to_string()];
    records.extend((0..3).map(|i| format!("m{}\t0\torf\t4\t60\t3M\t*\t0\t0\tTTT\tIII", i)));
    records.push("u0\t4\t*\t0\t0\t*\t*\t0\t0\tACGT\tIIII".to_string());
    let lines: Vec<&str> = records.iter().map(String::as_str).collect();
    let fixture = Fixture::new(&[("orf", ORF)], &lines).with_id_key(&[(7, "orf")]);

    let settings = AggregatorSettings::default();
    let peptides = peptides(&fixture);
    let library = Rc::new(ReferenceLibrary::load(&fixture.fasta, Some(peptides.as_path())).unwrap());
    let mut iterator = BamIterator::new(&fixture.bam, &fixture.fasta, settings.quality).unwrap();
    register_all(&mut iterator, &settings, &library);
    assert_eq!(iterator.iterate_reads().unwrap(), 5);

    let mut store = MemoryRowStore::new();
    iterator.write_outputs(&mut store, &AnalysisModel::new(4)).unwrap();

    let codons = store.rows(Table::AaSnpsByCodon, 4).unwrap();
    assert_eq!(codons.len(), 1);
    assert_eq!(codons[0]["ref_aa_id"], json!(10));
    assert_eq!(codons[0]["ref_nt_id"], json!(7));
    assert_eq!(codons[0]["ref_aa_position"], json!(2));
    assert_eq!(codons[0]["ref_aa"], json!("A"));
    assert_eq!(codons[0]["q_aa"], json!("F"));
    assert_eq!(codons[0]["readcount"], json!(3));
    assert_eq!(codons[0]["depth"], json!(4.0));
    assert_eq!(codons[0]["pct"], json!(75.0));

    let metrics = store.rows(Table::AlignmentMetrics, 4).unwrap();
    assert_eq!(metrics.len(), 2);
    assert_eq!(metrics[0]["alignments"], json!(4));
    assert_eq!(metrics[1]["unmapped"], json!(1));

    // the per-read aggregator has nowhere to save and is skipped
    assert_eq!(store.row_count(Table::AaSnpsByRead), 0);
    assert_eq!(store.row_count(Table::Coverage), 12);
}

#[test]
fn missing_indexes_are_fatal() {
    let fixture = Fixture::unindexed(&[("orf", ORF)], &["r1\t0\torf\t1\t60\t3M\t*\t0\t0\tATG\tIII"]);
    let settings = AggregatorSettings::default();
    let err = BamIterator::new(&fixture.bam, &fixture.fasta, settings.quality).unwrap_err();
    assert!(matches!(err, PipelineError::MissingIndex { kind: "BAM", .. }));

    let fixture = Fixture::new(&[("orf", ORF)], &["r1\t0\torf\t1\t60\t3M\t*\t0\t0\tATG\tIII"]);
    fs::remove_file(fixture.dir.path().join("ref.fasta.fai")).unwrap();
    let err = BamIterator::new(&fixture.bam, &fixture.fasta, settings.quality).unwrap_err();
    assert!(matches!(err, PipelineError::MissingIndex { kind: "FASTA", .. }));
}

#[test]
fn unknown_reference_aborts_translation() {
    let fixture = Fixture::new(&[("orf", ORF)], &["r1\t0\torf\t4\t60\t3M\t*\t0\t0\tTTT\tIII"]);
    let settings = AggregatorSettings::default();
    // no id key, and "orf" has no id prefix
    let library = Rc::new(ReferenceLibrary::load(&fixture.fasta, None).unwrap());
    let mut iterator = BamIterator::new(&fixture.bam, &fixture.fasta, settings.quality).unwrap();
    iterator.add_aggregator(Box::new(AaSnpByCodonAggregator::new(&settings, library)));

    let err = iterator.iterate_reads().unwrap_err();
    assert_eq!(err.to_string(), "Improper sequence name format: orf");
}
