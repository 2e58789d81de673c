use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Log debug output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Inputs shared by every pass over a BAM file.
#[derive(ClapArgs, Debug, Clone)]
pub struct PassArgs {
    /// Indexed, coordinate-sorted BAM file
    pub bam_file: PathBuf,

    /// Indexed reference FASTA the BAM was aligned to
    pub fasta_file: PathBuf,

    /// Directory receiving the result tables
    #[arg(short = 'o', long = "output", default_value = "sequence_analysis")]
    pub output_dir: PathBuf,

    /// Analysis the rows are saved under; earlier rows of the same analysis are replaced
    #[arg(long, default_value = "1")]
    pub analysis_id: i64,

    /// Alignment file id recorded on typing summary rows
    #[arg(long)]
    pub alignment_file_id: Option<i64>,

    /// Only scan this interval, as name:start-stop (1-based, inclusive)
    #[arg(long, value_parser = parse_region)]
    pub region: Option<Region>,

    /// Aggregator setting as key=value, e.g. -s minSnpQual=20 (repeatable)
    #[arg(short = 's', long = "setting", value_parser = parse_key_val)]
    pub settings: Vec<(String, String)>,

    /// Hide the progress spinner
    #[arg(long)]
    pub no_progress: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Region {
    pub name: String,
    pub start: u64,
    pub stop: u64,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Count coverage and nucleotide SNPs, and amino acid SNPs when peptides are given
    SnpAnalysis {
        #[command(flatten)]
        pass: PassArgs,

        /// JSON array of peptide annotations for amino acid translation
        #[arg(long)]
        peptides: Option<PathBuf>,

        /// Also dump amino acid calls per read to this JSONL file (needs --peptides)
        #[arg(long, requires = "peptides")]
        by_read: Option<PathBuf>,
    },

    /// Call the references a sample carries from per-read votes
    Typing {
        #[command(flatten)]
        pass: PassArgs,

        /// Detailed filter log, gzip-compressed when the name ends in .gz
        #[arg(long)]
        log: Option<PathBuf>,

        /// Tab-separated summary of the surviving hit sets
        #[arg(long)]
        table: Option<PathBuf>,
    },

    /// Per-reference alignment statistics
    Metrics {
        #[command(flatten)]
        pass: PassArgs,
    },

    /// Show or edit the default settings file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Print the config file location and contents
    Show,
    /// Set a default aggregator setting
    Set { key: String, value: String },
    /// Remove a default aggregator setting
    Unset { key: String },
    /// Set the number of alignments between progress log lines
    ProgressInterval { interval: u64 },
}

fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("invalid KEY=value: no `=` found in `{}`", s))?;
    if key.trim().is_empty() {
        return Err(format!("invalid KEY=value: empty key in `{}`", s));
    }
    Ok((key.trim().to_string(), value.trim().to_string()))
}

fn parse_region(s: &str) -> Result<Region, String> {
    let invalid = || format!("invalid region `{}`, expected name:start-stop", s);
    let (name, range) = s.rsplit_once(':').ok_or_else(invalid)?;
    let (start, stop) = range.split_once('-').ok_or_else(invalid)?;
    let start: u64 = start.replace(',', "").parse().map_err(|_| invalid())?;
    let stop: u64 = stop.replace(',', "").parse().map_err(|_| invalid())?;
    if name.is_empty() || start == 0 || stop < start {
        return Err(invalid());
    }
    Ok(Region {
        name: name.to_string(),
        start,
        stop,
    })
}
