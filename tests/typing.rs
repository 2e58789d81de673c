mod common;

use common::Fixture;
use sequence_analysis::aggregators::SequenceBasedTypingAggregator;
use sequence_analysis::reference::ReferenceLibrary;
use sequence_analysis::{AggregatorSettings, AnalysisModel, BamIterator, JsonlRowStore, RowStore, Table};
use serde_json::json;
use std::rc::Rc;

// identical over the first ten bases
const ALLELE_A: &str = "ACGTACGTACGT";
const ALLELE_B: &str = "ACGTACGTACGA";

fn fixture() -> Fixture {
    Fixture::new(
        &[("1|A", ALLELE_A), ("2|B", ALLELE_B)],
        &[
            "r1\t0\t1|A\t1\t60\t10M\t*\t0\t0\tACGTACGTAC\tIIIIIIIIII",
            "r2\t0\t1|A\t3\t60\t10M\t*\t0\t0\tGTACGTACGT\tIIIIIIIIII",
            "r1\t256\t2|B\t1\t60\t10M\t*\t0\t0\tACGTACGTAC\tIIIIIIIIII",
            "r2\t256\t2|B\t3\t60\t10M\t*\t0\t0\tGTACGTACGT\tIIIIIIIIII",
            "r3\t0\t2|B\t3\t60\t10M\t*\t0\t0\tGTACGTACGA\tIIIIIIIIII",
            "u1\t4\t*\t0\t0\t*\t*\t0\t0\tACGT\tIIII",
        ],
    )
}

#[test]
fn typing_pass_is_saved_as_jsonl() {
    let fixture = fixture();
    let settings = AggregatorSettings::default();
    let library = Rc::new(ReferenceLibrary::load(&fixture.fasta, None).unwrap());
    let mut iterator = BamIterator::new(&fixture.bam, &fixture.fasta, settings.quality).unwrap();

    let mut typing = SequenceBasedTypingAggregator::new(&settings, library);
    let table = fixture.dir.path().join("hits.txt");
    typing.set_table_output(&table);
    iterator.add_aggregator(Box::new(typing));
    assert_eq!(iterator.iterate_reads().unwrap(), 6);

    let output = fixture.dir.path().join("out");
    let mut store = JsonlRowStore::open(&output).unwrap();
    let model = AnalysisModel::new(3).with_alignment_file(12);
    iterator.write_outputs(&mut store, &model).unwrap();

    // r1 hits both alleles, r2 mismatches B at its last base, r3 only matches B
    let tsv = std::fs::read_to_string(&table).unwrap();
    assert_eq!(tsv, "1|A\t1\t1\t0\t0\n1|A||2|B\t1\t1\t0\t0\n2|B\t1\t1\t0\t0\n\t1\t\t\t\n");

    let reopened = JsonlRowStore::open(&output).unwrap();
    let summary = reopened.rows(Table::AlignmentSummary, 3).unwrap();
    assert_eq!(summary.len(), 4);
    assert!(summary.iter().all(|r| r["file_id"] == json!(12)));
    assert_eq!(summary[3]["total"], json!(1));

    let junction = reopened.rows(Table::AlignmentSummaryJunction, 3).unwrap();
    let ids: Vec<_> = junction.iter().map(|r| r["ref_nt_id"].clone()).collect();
    assert_eq!(ids, vec![json!(1), json!(1), json!(2), json!(2)]);

    let synopsis = reopened.synopsis(3).unwrap().unwrap();
    assert!(synopsis.starts_with("Sequence Based Typing Aggregator:"));
}

#[test]
fn count_filter_moves_reads_to_the_remaining_allele() {
    let fixture = fixture();
    let settings = AggregatorSettings::builder().min_count_for_ref(3.0).build();
    let library = Rc::new(ReferenceLibrary::load(&fixture.fasta, None).unwrap());
    let mut iterator = BamIterator::new(&fixture.bam, &fixture.fasta, settings.quality).unwrap();
    let typing = SequenceBasedTypingAggregator::new(&settings, library);
    let index = iterator.add_aggregator(Box::new(typing));
    iterator.iterate_reads().unwrap();

    // A has 2 supporting reads, B has 2: both fall below 3 and every read is unaligned
    let tables = iterator.results_of(index, &AnalysisModel::new(1)).unwrap();
    let summary = &tables[0].rows;
    assert_eq!(summary.len(), 1);
    assert_eq!(summary[0]["total"], json!(4));
}
