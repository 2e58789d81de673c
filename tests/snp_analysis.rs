mod common;

use common::Fixture;
use sequence_analysis::aggregators::{NtCoverageAggregator, NtSnpByPosAggregator};
use sequence_analysis::persistence::Row;
use sequence_analysis::reference::ReferenceLibrary;
use sequence_analysis::{AggregatorSettings, AnalysisModel, BamIterator, MemoryRowStore, RowStore, Table};
use serde_json::json;
use std::rc::Rc;

const REF1: &str = "ACGTACGTACGTACGTACGT";

fn fixture() -> Fixture {
    Fixture::new(
        &[("ref1", REF1)],
        &[
            "r1\t0\tref1\t1\t60\t10M\t*\t0\t0\tACGTACGTAC\tIIIIIIIIII",
            "r2\t16\tref1\t1\t60\t10M\t*\t0\t0\tACGTTCGTAC\tIIIIIIIIII",
            "r3\t4\t*\t0\t0\t*\t*\t0\t0\tACGT\tIIII",
        ],
    )
    .with_id_key(&[(41, "ref1")])
}

fn run_pass(fixture: &Fixture, store: &mut MemoryRowStore) -> u64 {
    let settings = AggregatorSettings::default();
    let library = Rc::new(ReferenceLibrary::load(&fixture.fasta, None).unwrap());
    let mut iterator = BamIterator::new(&fixture.bam, &fixture.fasta, settings.quality).unwrap();

    let coverage = NtCoverageAggregator::new(&settings, Rc::clone(&library)).into_shared();
    iterator.add_aggregator(Box::new(coverage.clone()));
    iterator.add_aggregator(Box::new(NtSnpByPosAggregator::with_shared_coverage(
        &settings,
        library,
        coverage,
    )));

    let processed = iterator.iterate_reads().unwrap();
    iterator.write_outputs(store, &AnalysisModel::new(1)).unwrap();
    processed
}

fn at_position(rows: &[Row], position: u64) -> Vec<&Row> {
    rows.iter()
        .filter(|r| r["ref_nt_position"] == json!(position))
        .collect()
}

#[test]
fn counts_coverage_and_snps() {
    let fixture = fixture();
    let mut store = MemoryRowStore::new();
    assert_eq!(run_pass(&fixture, &mut store), 3);

    let coverage = store.rows(Table::Coverage, 1).unwrap();
    assert_eq!(coverage.len(), 10);
    let fifth = at_position(&coverage, 5);
    assert_eq!(fifth.len(), 1);
    assert_eq!(fifth[0]["ref_nt_id"], json!(41));
    assert_eq!(fifth[0]["depth"], json!(2));
    assert_eq!(fifth[0]["total_a"], json!(1));
    assert_eq!(fifth[0]["total_t"], json!(1));
    assert_eq!(fifth[0]["wt"], json!(1));

    let snps = store.rows(Table::NtSnpsByPos, 1).unwrap();
    assert_eq!(snps.len(), 1);
    assert_eq!(snps[0]["ref_nt_position"], json!(5));
    assert_eq!(snps[0]["ref_nt"], json!("A"));
    assert_eq!(snps[0]["q_nt"], json!("T"));
    assert_eq!(snps[0]["readcount"], json!(1));
    assert_eq!(snps[0]["depth"], json!(2));
    assert_eq!(snps[0]["pct"], json!(50.0));

    let synopsis = store.synopsis(1).unwrap().unwrap();
    assert!(synopsis.contains("NT Coverage Aggregator"));
    assert!(synopsis.contains("NT SNP Aggregator"));
}

#[test]
fn rerun_replaces_rows_with_identical_ones() {
    let fixture = fixture();
    let mut store = MemoryRowStore::new();
    run_pass(&fixture, &mut store);
    let first = (
        store.rows(Table::Coverage, 1).unwrap(),
        store.rows(Table::NtSnpsByPos, 1).unwrap(),
    );

    run_pass(&fixture, &mut store);
    let second = (
        store.rows(Table::Coverage, 1).unwrap(),
        store.rows(Table::NtSnpsByPos, 1).unwrap(),
    );
    assert_eq!(first, second);
}

#[test]
fn region_scan_only_sees_overlapping_reads() {
    let fixture = Fixture::new(
        &[("ref1", REF1)],
        &[
            "r1\t0\tref1\t1\t60\t4M\t*\t0\t0\tACGT\tIIII",
            "r2\t0\tref1\t11\t60\t4M\t*\t0\t0\tTTAC\tIIII",
        ],
    );
    let settings = AggregatorSettings::default();
    let library = Rc::new(ReferenceLibrary::load(&fixture.fasta, None).unwrap());
    let mut iterator = BamIterator::new(&fixture.bam, &fixture.fasta, settings.quality).unwrap();
    iterator.add_aggregator(Box::new(NtSnpByPosAggregator::new(&settings, library)));

    assert_eq!(iterator.iterate_region("ref1", 9, 20).unwrap(), 1);
    assert!(iterator.iterate_region("ref1", 0, 5).is_err());
    assert!(iterator.iterate_region("chrUn", 1, 5).is_err());
    // same name rule as the average quality scan
    assert_eq!(iterator.iterate_region("REF1", 9, 20).unwrap(), 1);

    let mut store = MemoryRowStore::new();
    iterator.write_outputs(&mut store, &AnalysisModel::new(2)).unwrap();
    let snps = store.rows(Table::NtSnpsByPos, 2).unwrap();
    // both region scans fed the same aggregator
    assert_eq!(snps.len(), 1);
    assert_eq!(snps[0]["readcount"], json!(2));
    assert_eq!(snps[0]["ref_nt_position"], json!(11));
    // no id key and no id prefix in the name
    assert_eq!(snps[0]["ref_nt_id"], serde_json::Value::Null);
}
