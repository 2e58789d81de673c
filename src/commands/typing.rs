use crate::aggregators::SequenceBasedTypingAggregator;
use crate::cli::PassArgs;
use crate::commands::Pass;
use anyhow::Result;
use log::info;
use std::path::PathBuf;
use std::rc::Rc;

pub fn run(args: PassArgs, log: Option<PathBuf>, table: Option<PathBuf>) -> Result<()> {
    let mut pass = Pass::prepare(&args, None)?;

    let mut typing = SequenceBasedTypingAggregator::new(&pass.settings, Rc::clone(&pass.library));
    if let Some(path) = log {
        typing.set_output_log(path);
    }
    if let Some(path) = table {
        typing.set_table_output(path);
    }
    pass.iterator.add_aggregator(Box::new(typing));

    let processed = pass.scan(&args)?;
    info!("Inspected {} alignments", processed);
    pass.save(&args)
}
