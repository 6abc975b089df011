mod cli;
mod fasta;

use std::fs::File;
use std::io::{stdout, Write};

use clap::Parser;
use cli::{Args, Commands};
use eyre::{Context, Result};
use human_panic::setup_panic;
#[cfg(feature = "mimalloc")]
use mimalloc::MiMalloc;
use rayon::prelude::*;

use libphmm::{
    io, Alphabet, Background, Builder, BuilderOptions, DigitalSequenceBlock, Hmm, OptimizedProfile, Pipeline,
    PipelineConfig, Profile, TopHits,
};

#[cfg(feature = "mimalloc")]
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

fn main() -> Result<()> {
    setup_panic!();

    let args = Args::parse();
    env_logger::Builder::new()
        .filter_level(args.verbose.log_level_filter())
        .init();

    match args.command {
        Commands::Search {
            hmm,
            targets,
            alphabet,
            num_threads,
            output,
        } => run_search(hmm, targets, alphabet, num_threads, output)?,
        Commands::Scan {
            db,
            target,
            alphabet,
            output,
        } => run_scan(db, target, alphabet, output)?,
        Commands::Build { seed, alphabet, output } => run_build(seed, alphabet, output)?,
        Commands::Iterate {
            seed,
            targets,
            alphabet,
            max_rounds,
            output,
        } => run_iterate(seed, targets, alphabet, max_rounds, output)?,
        Commands::Press { hmm, out } => run_press(hmm, out)?,
    }
    Ok(())
}

fn open_output(output: Option<std::path::PathBuf>) -> Result<Box<dyn Write>> {
    Ok(match output {
        Some(path) => Box::new(File::create(&path).wrap_err_with(|| format!("creating {}", path.display()))?),
        None => Box::new(stdout()),
    })
}

/// Splits the target stream across `num_cpus::get()` (or `num_threads`)
/// worker threads, each with its own cloned `Pipeline`, merging the shards
/// with `TopHits::merge` (§5, the "one Pipeline per worker thread" pattern).
fn run_search(
    hmm_path: std::path::PathBuf,
    targets_path: std::path::PathBuf,
    alphabet: Alphabet,
    num_threads: Option<usize>,
    output: Option<std::path::PathBuf>,
) -> Result<()> {
    if io::HMMFile::is_pressed(&hmm_path)? {
        eyre::bail!("{} is a pressed-database file; use `phmmer scan` instead", hmm_path.display());
    }
    let mut hmm_file = io::HMMFile::open(&hmm_path)?;
    let query = hmm_file
        .next_hmm()?
        .ok_or_else(|| eyre::eyre!("{} contains no models", hmm_path.display()))?;
    if query.alphabet() != alphabet {
        eyre::bail!(
            "query HMM alphabet {} does not match --alphabet {}",
            query.alphabet(),
            alphabet
        );
    }

    let targets = fasta::read_block(&targets_path, alphabet)?;
    log::info!("searching {} targets", targets.len());

    let threads = num_threads.unwrap_or_else(num_cpus::get).max(1);
    let chunk_size = targets.len().div_ceil(threads).max(1);
    let pipeline = Pipeline::new(alphabet, PipelineConfig::default());

    let shards: Vec<TopHits> = targets
        .par_chunks(chunk_size)
        .map(|chunk| -> Result<TopHits> {
            let block: DigitalSequenceBlock = chunk.iter().cloned().collect();
            let mut worker = pipeline.clone();
            Ok(worker.search_hmm(libphmm::pipeline::Query::Hmm(&query), &block)?)
        })
        .collect::<Result<Vec<_>>>()?;

    let mut shards = shards.into_iter();
    let first = shards.next().unwrap_or_else(|| TopHits::new(libphmm::tophits::SearchMode::Search));
    let mut merged = first.merge(shards)?;
    merged.sort(libphmm::tophits::SortBy::Key);

    let mut out = open_output(output)?;
    merged.write(&mut out, libphmm::tophits::WriteFormat::Targets, true)?;
    Ok(())
}

fn run_scan(
    db_stem: std::path::PathBuf,
    target_path: std::path::PathBuf,
    alphabet: Alphabet,
    output: Option<std::path::PathBuf>,
) -> Result<()> {
    let mut h3f = File::open(db_stem.with_extension("h3f")).wrap_err("opening .h3f")?;
    let optimized = io::pressed::read_optimized_profiles(&mut h3f)?;
    let mut h3p = File::open(db_stem.with_extension("h3p")).wrap_err("opening .h3p")?;
    let profiles = io::pressed::read_profiles(&mut h3p)?;
    if optimized.len() != profiles.len() {
        eyre::bail!(".h3f and .h3p record counts disagree ({} vs {})", optimized.len(), profiles.len());
    }

    let target = fasta::read_first(&target_path, alphabet)?;
    log::info!("scanning {} models", profiles.len());

    let models = profiles
        .iter()
        .zip(optimized.iter())
        .map(|(profile, optimized)| libphmm::pipeline::ScanModel { profile, optimized });

    let mut pipeline = Pipeline::new(alphabet, PipelineConfig::default());
    let mut hits = pipeline.scan_seq(&target, models)?;
    hits.sort(libphmm::tophits::SortBy::Key);

    let mut out = open_output(output)?;
    hits.write(&mut out, libphmm::tophits::WriteFormat::Targets, true)?;
    Ok(())
}

fn run_build(seed_path: std::path::PathBuf, alphabet: Alphabet, output: std::path::PathBuf) -> Result<()> {
    let seed = fasta::read_first(&seed_path, alphabet)?;
    let builder = Builder::new(BuilderOptions::default());
    let background = Background::new(alphabet, seed.len().max(1));
    let hmm = builder.build(&seed, &background)?;
    io::write_text_file(&output, &hmm)?;
    log::info!("wrote {} match states to {}", hmm.m(), output.display());
    Ok(())
}

fn run_iterate(
    seed_path: std::path::PathBuf,
    targets_path: std::path::PathBuf,
    alphabet: Alphabet,
    max_rounds: usize,
    output: Option<std::path::PathBuf>,
) -> Result<()> {
    let seed = fasta::read_first(&seed_path, alphabet)?;
    let targets: DigitalSequenceBlock = fasta::read_block(&targets_path, alphabet)?.into_iter().collect();

    let pipeline = Pipeline::new(alphabet, PipelineConfig::default());
    let builder = Builder::new(BuilderOptions::default());
    let search = pipeline.iterate_seq(&seed, targets, builder)?;

    let mut last_hmm: Option<Hmm> = None;
    for result in search.take(max_rounds) {
        let result = result?;
        log::info!(
            "round {}: {} included hits, converged = {}",
            result.iteration,
            result.hits.included().count(),
            result.converged
        );
        let converged = result.converged;
        last_hmm = Some(result.hmm);
        if converged {
            break;
        }
    }

    if let (Some(hmm), Some(path)) = (last_hmm, output) {
        io::write_text_file(&path, &hmm)?;
    }
    Ok(())
}

fn run_press(hmm_path: std::path::PathBuf, out_stem: std::path::PathBuf) -> Result<()> {
    let mut hmm_file = io::HMMFile::open(&hmm_path)?;
    let mut hmms = Vec::new();
    while let Some(hmm) = hmm_file.next_hmm()? {
        hmms.push(hmm);
    }
    if hmms.is_empty() {
        eyre::bail!("{} contains no models", hmm_path.display());
    }

    let mut profiles = Vec::with_capacity(hmms.len());
    let mut optimized = Vec::with_capacity(hmms.len());
    for hmm in &hmms {
        let length = hmm.m().max(1);
        let background = Background::new(hmm.alphabet(), length);
        let profile = Profile::configure(hmm, &background, length, true, true)?;
        optimized.push(OptimizedProfile::from_profile(&profile)?);
        profiles.push(profile);
    }

    io::press(&out_stem, &hmms, &profiles, &optimized)?;
    log::info!("pressed {} models into {}.h3{{m,f,p,i}}", hmms.len(), out_stem.display());
    Ok(())
}
