//! Profile hidden Markov model database search.
//!
//! A [`crate::hmm::Hmm`] is built from a sequence or alignment, configured
//! into a [`crate::profile::Profile`] for a target length, and run through
//! the filter cascade in [`crate::pipeline::Pipeline`] against a stream of
//! target sequences, producing a [`crate::tophits::TopHits`].

pub mod alignment;
pub mod alphabet;
pub mod background;
pub mod builder;
pub mod error;
pub mod hmm;
pub mod io;
pub mod iterative_search;
pub mod long_targets;
pub mod metadata;
pub mod optimized_profile;
pub mod pipeline;
pub mod profile;
pub mod rng;
pub mod score_data;
pub mod sequence;
pub mod tophits;
pub mod trace;
pub mod trace_aligner;

pub use alignment::{Alignment, Domain, Domains, Hit};
pub use alphabet::Alphabet;
pub use background::Background;
pub use builder::{Builder, BuilderOptions};
pub use error::{PHmmError, Result};
pub use hmm::Hmm;
pub use io::{HMMFile, HMMPressedFile};
pub use iterative_search::{IterationResult, IterativeSearch};
pub use long_targets::{LongTargetsConfig, LongTargetsPipeline, Strand};
pub use optimized_profile::OptimizedProfile;
pub use pipeline::{Pipeline, PipelineConfig};
pub use profile::Profile;
pub use tophits::TopHits;
pub use trace::{Trace, Traces};
pub use trace_aligner::{AlignedMsa, TraceAligner};
