use std::path::PathBuf;

use clap::{Parser, Subcommand};
use clap_verbosity_flag::Verbosity;

fn parse_alphabet(src: &str) -> Result<libphmm::Alphabet, String> {
    libphmm::Alphabet::parse(src).map_err(|e| e.to_string())
}

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
/// Profile hidden Markov model database search.
pub struct Args {
    #[clap(flatten)]
    pub verbose: Verbosity,

    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Search one query HMM against a FASTA file of targets.
    Search {
        /// Text-format HMM file (one model)
        #[clap(long)]
        hmm: PathBuf,

        /// FASTA file of target sequences
        #[clap(long)]
        targets: PathBuf,

        #[clap(long, value_parser = parse_alphabet, default_value = "amino")]
        alphabet: libphmm::Alphabet,

        /// Number of worker threads splitting the target stream
        #[clap(short = 'j', long)]
        num_threads: Option<usize>,

        /// Tab-separated hits table, stdout if omitted
        #[clap(short, long)]
        output: Option<PathBuf>,
    },

    /// Scan one target sequence against a pressed model database.
    Scan {
        /// Pressed-database stem (expects `<stem>.h3f` and `<stem>.h3p`)
        #[clap(long)]
        db: PathBuf,

        /// FASTA file holding the target sequence (first record is used)
        #[clap(long)]
        target: PathBuf,

        #[clap(long, value_parser = parse_alphabet, default_value = "amino")]
        alphabet: libphmm::Alphabet,

        #[clap(short, long)]
        output: Option<PathBuf>,
    },

    /// Build an HMM from a single seed sequence.
    Build {
        /// FASTA file holding the seed sequence (first record is used)
        #[clap(long)]
        seed: PathBuf,

        #[clap(long, value_parser = parse_alphabet, default_value = "amino")]
        alphabet: libphmm::Alphabet,

        /// Text-format HMM output path
        #[clap(short, long)]
        output: PathBuf,
    },

    /// Iteratively refine a model by alternating search and rebuild.
    Iterate {
        #[clap(long)]
        seed: PathBuf,

        #[clap(long)]
        targets: PathBuf,

        #[clap(long, value_parser = parse_alphabet, default_value = "amino")]
        alphabet: libphmm::Alphabet,

        /// Stop after this many rounds even if the search has not converged
        #[clap(long, default_value_t = 5)]
        max_rounds: usize,

        /// Text-format HMM output path for the final round's model
        #[clap(short, long)]
        output: Option<PathBuf>,
    },

    /// Compile one or more text-format HMMs into a pressed binary database.
    Press {
        /// Text-format HMM file, possibly containing several models
        #[clap(long)]
        hmm: PathBuf,

        /// Output stem; writes `<stem>.h3m/.h3f/.h3p/.h3i`
        #[clap(long)]
        out: PathBuf,
    },
}
