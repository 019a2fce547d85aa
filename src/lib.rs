//! # ffpe-finder - FFPE artifact detection for somatic SNVs
//!
//! Separates real somatic single-nucleotide variants from formalin-fixation
//! and sequencing artifacts by comparing how alt-supporting and ref-supporting
//! reads behave across the rest of their aligned sequence, in a matched
//! case/control pair of BAM files.

pub mod analysis;
pub mod bam;
pub mod evidence;
pub mod maf;
pub mod mask;
pub mod partition;
pub mod pileup;
pub mod score;
pub mod table;
pub mod utils;
pub mod window;

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::evidence::EvidenceError;

/// Smoothing added to margins and p-values before taking logarithms
pub const EPS: f64 = 2.2204460492503131e-16;

/// A half-open reference interval, 0-based. Single-base loci have `end == start + 1`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Locus {
    pub chrom: String,
    pub start: u64,
    pub end: u64,
}

impl Locus {
    pub fn new(chrom: &str, start: u64, end: u64) -> Self {
        Self {
            chrom: chrom.to_string(),
            start,
            end,
        }
    }

    pub fn single_base(chrom: &str, position: u64) -> Self {
        Self::new(chrom, position, position + 1)
    }

    /// Canonical `chrom:start:end` key
    pub fn key(&self) -> String {
        format!("{}:{}:{}", self.chrom, self.start, self.end)
    }

    /// Split the interval into its single-base loci
    pub fn bases(&self) -> impl Iterator<Item = Locus> + '_ {
        (self.start..self.end.max(self.start + 1)).map(move |p| Locus::single_base(&self.chrom, p))
    }
}

impl fmt::Display for Locus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.chrom, self.start, self.end)
    }
}

/// A called somatic mutation. `start` is 0-based; input files carry 1-based starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SomaticMutation {
    pub chrom: String,
    pub start: u64,
    pub end: u64,
    pub ref_allele: String,
    pub alt_allele: String,
    pub case_sample_id: String,
    pub control_sample_id: String,
}

impl SomaticMutation {
    pub fn new(
        chrom: String,
        start: u64,
        end: u64,
        ref_allele: String,
        alt_allele: String,
        case_sample_id: String,
        control_sample_id: String,
    ) -> Self {
        Self {
            chrom,
            start,
            end,
            ref_allele,
            alt_allele,
            case_sample_id,
            control_sample_id,
        }
    }

    pub fn locus(&self) -> Locus {
        Locus::new(&self.chrom, self.start, self.end)
    }

    /// The candidate column the pileup is evaluated at
    pub fn candidate_locus(&self) -> Locus {
        Locus::single_base(&self.chrom, self.start)
    }

    /// 1-based start, as written in the input file
    pub fn one_based_start(&self) -> u64 {
        self.start + 1
    }

    /// Same site and alleles, regardless of sample
    pub fn same_call(&self, other: &SomaticMutation) -> bool {
        self.chrom == other.chrom
            && self.start == other.start
            && self.end == other.end
            && self.ref_allele == other.ref_allele
            && self.alt_allele == other.alt_allele
    }
}

/// Tunable constants of the artifact model
#[derive(Debug, Clone)]
pub struct ArtifactConfig {
    /// Radius used to collect nearby called mutations for the somatic mask
    pub read_length: u64,
    /// Reads whose substitution-only mismatch rate exceeds this are dropped
    pub max_mismatch_rate: f64,
    /// Binomial null alt fraction for the germline mask
    pub germline_alt_fraction: f64,
    /// Binomial CDF threshold above which a control locus is masked
    pub germline_significance: f64,
    /// Count each indel or soft-clip event as one base pair
    pub binarize_lengths: bool,
    /// Reads kept per pileup column
    pub max_depth: usize,
}

impl Default for ArtifactConfig {
    fn default() -> Self {
        Self {
            read_length: 75,
            max_mismatch_rate: 0.10,
            germline_alt_fraction: 0.45,
            germline_significance: 0.05,
            binarize_lengths: true,
            max_depth: pileup::DEFAULT_MAX_DEPTH,
        }
    }
}

/// Error types for the ffpe-finder library
#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTSlib error: {0}")]
    Htslib(#[from] rust_htslib::errors::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Invalid mutation record: {0}")]
    InvalidMutation(String),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Unknown contig: {0}")]
    UnknownContig(String),

    #[error(transparent)]
    Evidence(#[from] EvidenceError),

    #[error("Missing {0} tag")]
    MissingTag(String),

    #[error("No reference base available at {0}")]
    UncoveredLocus(Locus),

    #[error("Intersected position mask has no unmasked loci")]
    EmptyMask,

    #[error("Numerical invariant violated: {0}")]
    NumericalInvariant(String),

    #[error("Fisher's exact test failed: {0}")]
    FisherTest(String),
}

pub type ArtifactResult<T> = Result<T, ArtifactError>;
