//! Command-line front end: scores every somatic SNV of a MAF for FFPE artifact evidence

use clap::Parser;
use env_logger::Env;
use ffpe_finder_rs::{
    analysis::{calculate_artifact_features, validate_config, write_features, MutationFeatures},
    maf::{group_by_sample_pair, load_mutations, read_sample_table},
    pileup::DEFAULT_MAX_DEPTH,
    utils::{get_num_cpus, log_progress, validate_file_readable, Timer},
    ArtifactConfig, ArtifactError, ArtifactResult,
};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "ffpe_finder")]
#[command(about = "FFPE artifact detection for somatic single-nucleotide variants")]
#[command(long_about = "
ffpe_finder compares, for every somatic SNV in a MAF file, how the reads supporting
the alternate allele and the reads supporting the reference allele behave across the
rest of their aligned sequence. Formalin fixation artifacts tend to sit on reads that
carry an excess of other mismatches, indels and soft clips.

For each mutation, the case (tumor) and control (normal) BAMs are piled up around the
site. Nearby called mutations are masked in the case, and likely germline sites are
masked in the control. Two 2x2 tables (with and without soft clips) are scored with
Fisher's exact test, both two-sided and one-sided.

BAM files are either given directly (--case-bam/--control-bam) or looked up per sample
pair in a table with sample_id and clean_bam_file_capture columns (--sample-bam-table).
The BAM index file (.bai) must be present next to each BAM file.
")]
struct Args {
    /// Path to the input MAF file (optionally gzipped)
    #[arg(long, value_name = "FILE")]
    input_maf: PathBuf,

    /// Path to the indexed reference FASTA
    #[arg(long, value_name = "FILE")]
    reference: PathBuf,

    /// Path to the case (tumor) BAM file
    #[arg(long, value_name = "FILE", requires = "control_bam")]
    case_bam: Option<PathBuf>,

    /// Path to the control (normal) BAM file
    #[arg(long, value_name = "FILE", requires = "case_bam")]
    control_bam: Option<PathBuf>,

    /// TSV mapping sample barcodes to BAM files
    #[arg(long, value_name = "FILE", conflicts_with_all = ["case_bam", "control_bam"])]
    sample_bam_table: Option<PathBuf>,

    /// Path to the output TSV file (gzip compressed when ending in .gz)
    #[arg(long, value_name = "FILE")]
    output: PathBuf,

    /// Radius around a mutation in which other calls are masked
    #[arg(long, default_value_t = 75)]
    read_length: u64,

    /// Maximum substitution mismatch rate of a read at the candidate site
    #[arg(long, default_value_t = 0.10)]
    max_mismatch_rate: f64,

    /// Alt allele fraction of the germline binomial test
    #[arg(long, default_value_t = 0.45)]
    germline_alt_fraction: f64,

    /// CDF threshold above which a control locus is treated as germline
    #[arg(long, default_value_t = 0.05)]
    germline_significance: f64,

    /// Maximum number of reads kept per pileup column
    #[arg(long, default_value_t = DEFAULT_MAX_DEPTH)]
    max_depth: usize,

    /// Count true indel and soft clip lengths instead of one per event
    #[arg(long)]
    no_binarize: bool,

    /// Analyse every SNP, not only coding variant classifications
    #[arg(long)]
    all_variants: bool,

    /// Number of processes to use for parallel processing
    #[arg(long, default_value_t = get_num_cpus())]
    num_processes: usize,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Force overwrite of output file if it exists
    #[arg(short, long)]
    force: bool,
}

fn analyze_sample_table(
    args: &Args,
    table: &Path,
    config: &ArtifactConfig,
) -> ArtifactResult<Vec<MutationFeatures>> {
    validate_file_readable(table)?;
    let samples = read_sample_table(table)?;
    log::info!("Read {} samples from {:?}", samples.len(), table);

    let mutations = load_mutations(&args.input_maf, args.all_variants)?;
    let groups = group_by_sample_pair(mutations, &samples);

    let mut features = Vec::new();
    for (i, group) in groups.iter().enumerate() {
        log::info!(
            "Sample pair {}/{}: {} vs {} ({} mutations)",
            i + 1,
            groups.len(),
            group.case_sample_id,
            group.control_sample_id,
            group.mutations.len()
        );
        let _timer = Timer::new(&format!("{}/{}", group.case_sample_id, group.control_sample_id));
        features.extend(calculate_artifact_features(
            &group.mutations,
            Path::new(&group.case_bam),
            Path::new(&group.control_bam),
            &args.reference,
            config,
            args.num_processes,
        )?);
        log_progress(i + 1, groups.len(), "Sample pairs processed");
    }
    Ok(features)
}

fn run() -> ArtifactResult<()> {
    let args = Args::parse();

    let log_level = if args.debug {
        "debug"
    } else if args.verbose {
        "info"
    } else {
        "warn"
    };

    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_timestamp_secs()
        .init();

    log::info!("Starting FFPE artifact analysis");
    log::info!("Input MAF: {:?}", args.input_maf);
    log::info!("Reference: {:?}", args.reference);
    log::info!("Output: {:?}", args.output);
    log::info!("Number of processes: {}", args.num_processes);

    validate_file_readable(&args.input_maf)?;
    validate_file_readable(&args.reference)?;

    if args.output.exists() && !args.force {
        return Err(ArtifactError::Io(std::io::Error::new(
            std::io::ErrorKind::AlreadyExists,
            format!("Output file {:?} already exists. Use --force to overwrite.", args.output),
        )));
    }

    let config = ArtifactConfig {
        read_length: args.read_length,
        max_mismatch_rate: args.max_mismatch_rate,
        germline_alt_fraction: args.germline_alt_fraction,
        germline_significance: args.germline_significance,
        binarize_lengths: !args.no_binarize,
        max_depth: args.max_depth,
    };
    validate_config(&config)?;
    log::info!("Configuration: {:?}", config);

    let features = match (&args.case_bam, &args.control_bam, &args.sample_bam_table) {
        (Some(case_bam), Some(control_bam), _) => {
            validate_file_readable(case_bam)?;
            validate_file_readable(control_bam)?;

            let mutations = {
                let _timer = Timer::new("Reading MAF");
                load_mutations(&args.input_maf, args.all_variants)?
            };
            if mutations.is_empty() {
                log::warn!("No mutations left to analyze after filtering");
            }

            let _timer = Timer::new("Scoring mutations");
            calculate_artifact_features(
                &mutations,
                case_bam,
                control_bam,
                &args.reference,
                &config,
                args.num_processes,
            )?
        }
        (_, _, Some(table)) => analyze_sample_table(&args, table, &config)?,
        _ => {
            return Err(ArtifactError::InvalidConfig(
                "either --case-bam and --control-bam or --sample-bam-table is required".to_string(),
            ))
        }
    };

    log::info!("Scored {} mutations", features.len());
    write_features(&features, &args.output)?;
    log::info!("Features written to: {:?}", args.output);

    Ok(())
}

/// Handle application errors and provide user-friendly messages
fn handle_error(error: ArtifactError) -> ! {
    match error {
        ArtifactError::FileNotFound(path) => {
            eprintln!("Error: File not found: {}", path);
            eprintln!("Please check that the file exists and is readable.");
            eprintln!("For BAM files, ensure the index file (.bai) is present.");
        }
        ArtifactError::InvalidMutation(msg) => {
            eprintln!("Error: Invalid mutation data: {}", msg);
            eprintln!("Please check that your MAF file is properly formatted.");
        }
        ArtifactError::InvalidConfig(msg) => {
            eprintln!("Error: Invalid configuration: {}", msg);
        }
        ArtifactError::Htslib(ref e) => {
            eprintln!("Error: BAM/FASTA processing error: {}", e);
            eprintln!("Please check that your BAM files are valid and indexed, and that the FASTA has a .fai index.");
        }
        ArtifactError::Io(ref e) => {
            eprintln!("Error: I/O error: {}", e);
            eprintln!("Please check file permissions and disk space.");
        }
        ArtifactError::Csv(ref e) => {
            eprintln!("Error: Table parsing error: {}", e);
            eprintln!("Please check the MAF and sample table columns.");
        }
        ArtifactError::NumericalInvariant(msg) => {
            eprintln!("Error: Internal numerical error: {}", msg);
            eprintln!("This indicates a bug. Please report this issue.");
        }
        other => {
            eprintln!("Error: {}", other);
        }
    }
    std::process::exit(1);
}

fn main() {
    if let Err(e) = run() {
        handle_error(e);
    }
}
