use clap::Parser;
use sequence_analysis::{cli, commands};

fn main() {
    let args = cli::Args::parse();

    let default_filter = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter)).init();

    let result = match args.command {
        cli::Commands::SnpAnalysis {
            pass,
            peptides,
            by_read,
        } => commands::snp_analysis::run(pass, peptides, by_read),
        cli::Commands::Typing { pass, log, table } => commands::typing::run(pass, log, table),
        cli::Commands::Metrics { pass } => commands::metrics::run(pass),
        cli::Commands::Config { action } => commands::config::run(action),
    };

    if let Err(e) = result {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
