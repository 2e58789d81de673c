use crate::aggregators::MetricsAggregator;
use crate::cli::PassArgs;
use crate::commands::Pass;
use anyhow::Result;
use log::info;
use std::rc::Rc;

pub fn run(args: PassArgs) -> Result<()> {
    let mut pass = Pass::prepare(&args, None)?;
    pass.iterator
        .add_aggregator(Box::new(MetricsAggregator::new(&pass.settings, Rc::clone(&pass.library))));

    let processed = pass.scan(&args)?;
    info!("Inspected {} alignments", processed);
    pass.save(&args)
}
