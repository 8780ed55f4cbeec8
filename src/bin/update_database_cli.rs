use std::error::Error;
use std::path::PathBuf;

use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};

use lpiclassify_rs::update_database::{LpiDatabaseBuilder, DEFAULT_DB_FILE};

/// Create/update the LPI SQLite database from FASTA.
///
/// FASTA headers must be space delimited: >seq_id taxon_id taxonomy;string
#[derive(Parser, Debug)]
#[command(name = "lpi-update-database", version, about)]
struct Cli {
    /// FASTA file (.gz and .bz2 accepted)
    fasta: PathBuf,
    /// Output database file
    #[arg(short, long, default_value = DEFAULT_DB_FILE)]
    output: PathBuf,
    /// Also store the sequences themselves
    #[arg(short, long = "seq")]
    store_sequences: bool,
    /// Warnings only, no spinner
    #[arg(short, long)]
    quiet: bool,
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();

    let default_filter = if cli.quiet { "warn" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter)).init();

    let mut builder = LpiDatabaseBuilder::open(&cli.output)?;

    let spinner = if cli.quiet {
        ProgressBar::hidden()
    } else {
        ProgressBar::new_spinner()
    };
    spinner.set_style(
        ProgressStyle::default_spinner()
            .tick_strings(&[
                "⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏",
            ])
            .template("{spinner:.blue} {msg}")
            .expect("Invalid spinner template"),
    );
    spinner.enable_steady_tick(std::time::Duration::from_millis(100));
    spinner.set_message(format!("reading {}...", cli.fasta.display()));

    builder.ingest_fasta_file(&cli.fasta, cli.store_sequences)?;
    spinner.set_message("writing database...");
    let counts = builder.commit()?;
    spinner.finish_with_message("database updated.");

    log::info!("total seqs:         {}", counts.total_seqs);
    log::info!("[insert ] peptide   {}", counts.peptide);
    log::info!("[insert ] organism  {}", counts.organism);
    log::info!("[insert ] pep_org   {}", counts.pep_org);
    log::info!("[insert ] tax_node  {}", counts.tax_node);
    if cli.store_sequences {
        log::info!("[insert ] sequence  {}", counts.sequence);
    }
    Ok(())
}
