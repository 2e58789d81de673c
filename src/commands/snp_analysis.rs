use crate::aggregators::{AaSnpByCodonAggregator, AaSnpByReadAggregator, NtCoverageAggregator, NtSnpByPosAggregator};
use crate::cli::PassArgs;
use crate::commands::Pass;
use anyhow::{Context, Result};
use log::info;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::rc::Rc;

pub fn run(args: PassArgs, peptides: Option<PathBuf>, by_read: Option<PathBuf>) -> Result<()> {
    let mut pass = Pass::prepare(&args, peptides.as_deref())?;
    let settings = pass.settings.clone();

    let coverage = NtCoverageAggregator::new(&settings, Rc::clone(&pass.library)).into_shared();
    pass.iterator.add_aggregator(Box::new(coverage.clone()));
    pass.iterator.add_aggregator(Box::new(NtSnpByPosAggregator::with_shared_coverage(
        &settings,
        Rc::clone(&pass.library),
        coverage.clone(),
    )));

    let mut by_read_index = None;
    if peptides.is_some() {
        let nt = NtSnpByPosAggregator::with_shared_coverage(&settings, Rc::clone(&pass.library), coverage.clone());
        pass.iterator.add_aggregator(Box::new(AaSnpByCodonAggregator::with_nt_step(
            &settings,
            Rc::clone(&pass.library),
            nt,
        )));

        if by_read.is_some() {
            by_read_index = Some(
                pass.iterator
                    .add_aggregator(Box::new(AaSnpByReadAggregator::new(&settings, Rc::clone(&pass.library)))),
            );
        }
    }

    let processed = pass.scan(&args)?;
    info!("Inspected {} alignments", processed);
    pass.save(&args)?;

    if let (Some(index), Some(path)) = (by_read_index, by_read) {
        let tables = pass
            .iterator
            .results_of(index, &pass.model)
            .context("Failed to collect per-read amino acid calls")?;
        let mut writer = BufWriter::new(
            File::create(&path).with_context(|| format!("Failed to create {}", path.display()))?,
        );
        let mut written = 0;
        for batch in tables {
            for row in batch.rows {
                serde_json::to_writer(&mut writer, &row)?;
                writeln!(writer)?;
                written += 1;
            }
        }
        writer.flush()?;
        info!("Wrote {} per-read amino acid calls to {}", written, path.display());
    }

    Ok(())
}
