use std::error::Error;
use std::fs::File;
use std::io::{self, BufRead, BufWriter, Write};
use std::path::{Path, PathBuf};

use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};

use lpiclassify_rs::classify_reader;
use lpiclassify_rs::config::{ClassifyConfig, DEFAULT_BATCH_SIZE, DEFAULT_MIN_SCORE_WEIGHT};
use lpiclassify_rs::error::Result as LpiResult;
use lpiclassify_rs::hits::{is_stdin_path, open_input, open_reader, Compression};
use lpiclassify_rs::sqlite_store::SqliteTaxonomyStore;
use lpiclassify_rs::taxdb::load_flat_store;
use lpiclassify_rs::types::{LpiOutputLine, SubjectIdKind};
use lpiclassify_rs::update_database::DEFAULT_DB_FILE;

/// Taxonomic classification of query peptides based on BLAST m8 output
#[derive(Parser, Debug)]
#[command(name = "lpiclassify-rs", version, about)]
struct Cli {
    /// BLAST m8 file (use '-' for STDIN, .gz and .bz2 accepted)
    #[arg(short, long)]
    input: PathBuf,
    /// Database file
    #[arg(short, long, default_value = DEFAULT_DB_FILE)]
    db: PathBuf,
    /// Minimum score weight
    #[arg(short = 'a', long, default_value_t = DEFAULT_MIN_SCORE_WEIGHT)]
    min_score_weight: f64,
    /// Output file (default: STDOUT)
    #[arg(short, long)]
    output: Option<PathBuf>,
    /// BLAST subject IDs are seguids instead of sequence IDs
    #[arg(short, long)]
    seguids: bool,
    /// Worker threads; 1 classifies sequentially
    #[arg(short = 'n', long, default_value_t = 1)]
    threads: usize,
    /// Query groups per parallel batch
    #[arg(long, default_value_t = DEFAULT_BATCH_SIZE)]
    batch_size: usize,
    /// Flat taxonomy file (taxid, parent, name, weight) used instead of the database
    #[arg(long, requires = "seqmap")]
    taxdb: Option<PathBuf>,
    /// Sequence to taxid map for --taxdb
    #[arg(long, requires = "taxdb")]
    seqmap: Option<PathBuf>,
    /// No progress bar, warnings only
    #[arg(short, long)]
    quiet: bool,
}

/// Opens the hit file, with a byte progress bar unless reading stdin or quiet.
fn open_hits(path: &Path, quiet: bool) -> LpiResult<(Box<dyn BufRead>, Option<ProgressBar>)> {
    if quiet || is_stdin_path(path) {
        return Ok((open_input(path)?, None));
    }

    let file = File::open(path)?;
    let pb = ProgressBar::new(file.metadata()?.len());
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})")
            .expect("Invalid progress template")
            .progress_chars("#>-"),
    );
    let reader = open_reader(pb.wrap_read(file), Compression::from_path(path));
    Ok((reader, Some(pb)))
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();

    let default_filter = if cli.quiet { "warn" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter)).init();

    let config = ClassifyConfig {
        db_path: cli.db.clone(),
        min_score_weight: cli.min_score_weight,
        subject_ids: if cli.seguids {
            SubjectIdKind::Seguid
        } else {
            SubjectIdKind::SeqId
        },
        threads: cli.threads,
        batch_size: cli.batch_size,
    };
    config.validate()?;

    // Open the store first so a missing database fails before any input is read
    let sqlite_store = match &cli.taxdb {
        Some(_) => None,
        None => Some(SqliteTaxonomyStore::open(&config.db_path, config.subject_ids)?),
    };

    log::info!("reading file: {}", cli.input.display());
    let (reader, progress) = open_hits(&cli.input, cli.quiet)?;

    let mut out: Box<dyn Write> = match &cli.output {
        Some(path) => Box::new(BufWriter::new(File::create(path)?)),
        None => Box::new(BufWriter::new(io::stdout().lock())),
    };
    let sink = |line: LpiOutputLine| -> LpiResult<()> {
        writeln!(out, "{line}")?;
        Ok(())
    };

    match (sqlite_store, &cli.taxdb, &cli.seqmap) {
        (Some(store), _, _) => classify_reader(store, reader, &config, sink)?,
        (None, Some(taxdb), Some(seqmap)) => {
            let store = load_flat_store(taxdb, seqmap)?;
            classify_reader(store, reader, &config, sink)?
        }
        _ => return Err("--taxdb requires --seqmap".into()),
    };
    out.flush()?;

    if let Some(pb) = progress {
        pb.finish_and_clear();
    }
    Ok(())
}
