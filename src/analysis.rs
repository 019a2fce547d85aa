//! Per-mutation artifact analysis and batch processing

use crate::bam::{BamPileup, FastaReference};
use crate::mask::PositionMask;
use crate::partition::partition;
use crate::pileup::{PileupProvider, ReferenceProvider};
use crate::score::{score, ScoreRecord};
use crate::table::ContingencyTable;
use crate::utils::{chunkify, create_output};
use crate::window::WindowIndex;
use crate::{ArtifactConfig, ArtifactError, ArtifactResult, SomaticMutation};
use rayon::prelude::*;
use std::io::Write;
use std::path::Path;
use std::time::Instant;

/// Mutation columns leading every output row
pub const MUTATION_COLUMNS: [&str; 7] = [
    "Chromosome",
    "Start_position",
    "End_position",
    "Reference_Allele",
    "Tumor_Seq_Allele2",
    "Tumor_Sample_Barcode",
    "Matched_Norm_Sample_Barcode",
];

/// Validate artifact model parameters
pub fn validate_config(config: &ArtifactConfig) -> ArtifactResult<()> {
    if config.read_length == 0 {
        return Err(ArtifactError::InvalidConfig(
            "read length must be positive".to_string(),
        ));
    }

    if !(0.0..=1.0).contains(&config.max_mismatch_rate) {
        return Err(ArtifactError::InvalidConfig(
            "max mismatch rate must be between 0 and 1".to_string(),
        ));
    }

    if config.germline_alt_fraction <= 0.0 || config.germline_alt_fraction >= 1.0 {
        return Err(ArtifactError::InvalidConfig(
            "germline alt fraction must be strictly between 0 and 1".to_string(),
        ));
    }

    if config.germline_significance <= 0.0 || config.germline_significance >= 1.0 {
        return Err(ArtifactError::InvalidConfig(
            "germline significance must be strictly between 0 and 1".to_string(),
        ));
    }

    if config.max_depth == 0 {
        return Err(ArtifactError::InvalidConfig(
            "max depth must be positive".to_string(),
        ));
    }

    Ok(())
}

/// Other calls of the same tumor sample within `radius` of `mutation`
pub fn nearby_mutations(
    mutation: &SomaticMutation,
    mutations: &[SomaticMutation],
    radius: u64,
) -> Vec<SomaticMutation> {
    mutations
        .iter()
        .filter(|other| {
            other.chrom == mutation.chrom
                && other.case_sample_id == mutation.case_sample_id
                && !other.same_call(mutation)
                && other.start.abs_diff(mutation.start) < radius
        })
        .cloned()
        .collect()
}

/// Output row for one mutation
#[derive(Debug, Clone, PartialEq)]
pub struct MutationFeatures {
    pub mutation: SomaticMutation,
    pub case: ScoreRecord,
    pub control: ScoreRecord,
}

impl MutationFeatures {
    pub fn header() -> Vec<String> {
        let mut header: Vec<String> = MUTATION_COLUMNS.iter().map(|c| c.to_string()).collect();
        header.extend(ScoreRecord::header("case_"));
        header.extend(ScoreRecord::header("control_"));
        header
    }

    pub fn fields(&self) -> Vec<String> {
        let m = &self.mutation;
        let mut fields = vec![
            m.chrom.clone(),
            m.one_based_start().to_string(),
            m.end.to_string(),
            m.ref_allele.clone(),
            m.alt_allele.clone(),
            m.case_sample_id.clone(),
            m.control_sample_id.clone(),
        ];
        fields.extend(self.case.fields());
        fields.extend(self.control.fields());
        fields
    }
}

/// Case loci open under the somatic mask and control loci open under the germline mask
fn shared_mask(
    case_window: &WindowIndex,
    control_window: &WindowIndex,
    nearby: &[SomaticMutation],
    config: &ArtifactConfig,
) -> ArtifactResult<PositionMask> {
    let case_mask = PositionMask::build_somatic(case_window.loci(), nearby);
    let control_mask = PositionMask::build_germline(control_window, config)?;
    let mask = case_mask.intersect(&control_mask);
    if mask.unmasked_count() == 0 {
        return Err(ArtifactError::EmptyMask);
    }
    Ok(mask)
}

/// Partition, count and score one sample. `None` when no read covers the candidate.
fn score_sample<P>(
    mutation: &SomaticMutation,
    pileup: &mut P,
    window: &WindowIndex,
    mask: &PositionMask,
    config: &ArtifactConfig,
) -> ArtifactResult<Option<ScoreRecord>>
where
    P: PileupProvider + ?Sized,
{
    let candidate = window.candidate();
    let column = pileup
        .pileup(&candidate.chrom, candidate.start, candidate.end, true)?
        .into_iter()
        .find(|c| c.position == candidate.start);
    let Some(column) = column else {
        return Ok(None);
    };

    let sets = partition(&column.reads, candidate.start, &mutation.ref_allele, &mutation.alt_allele, config);
    let table = ContingencyTable::build(window, mask, &window.ref_alleles(), &sets, config);
    Ok(Some(score(&table)?))
}

/// Run the full pipeline for one mutation. `None` when the mutation yields no
/// row: no unmasked locus is shared by case and control, or a sample has no
/// coverage at the candidate.
pub fn analyze_mutation<C, N, R>(
    mutation: &SomaticMutation,
    nearby: &[SomaticMutation],
    case: &mut C,
    control: &mut N,
    reference: &mut R,
    config: &ArtifactConfig,
) -> ArtifactResult<Option<MutationFeatures>>
where
    C: PileupProvider + ?Sized,
    N: PileupProvider + ?Sized,
    R: ReferenceProvider + ?Sized,
{
    let candidate = mutation.candidate_locus();
    let case_window = WindowIndex::build(&candidate, case, reference)?;
    let control_window = WindowIndex::build(&candidate, control, reference)?;

    let mask = match shared_mask(&case_window, &control_window, nearby, config) {
        Ok(mask) => mask,
        Err(ArtifactError::EmptyMask) => {
            log::debug!("Skipping {}: no unmasked loci", mutation.locus());
            return Ok(None);
        }
        Err(e) => return Err(e),
    };

    let Some(case_score) = score_sample(mutation, case, &case_window, &mask, config)? else {
        log::debug!("Skipping {}: no case coverage", mutation.locus());
        return Ok(None);
    };
    let Some(control_score) = score_sample(mutation, control, &control_window, &mask, config)? else {
        log::debug!("Skipping {}: no control coverage", mutation.locus());
        return Ok(None);
    };

    Ok(Some(MutationFeatures {
        mutation: mutation.clone(),
        case: case_score,
        control: control_score,
    }))
}

/// Analyze `chunk` in order against already opened providers. Nearby
/// mutations are looked up in `all`.
pub fn analyze_mutations<C, N, R>(
    chunk: &[SomaticMutation],
    all: &[SomaticMutation],
    case: &mut C,
    control: &mut N,
    reference: &mut R,
    config: &ArtifactConfig,
) -> ArtifactResult<Vec<MutationFeatures>>
where
    C: PileupProvider + ?Sized,
    N: PileupProvider + ?Sized,
    R: ReferenceProvider + ?Sized,
{
    let mut features = Vec::new();

    for mutation in chunk {
        let started = Instant::now();
        let nearby = nearby_mutations(mutation, all, config.read_length);

        match analyze_mutation(mutation, &nearby, case, control, reference, config) {
            Ok(Some(f)) => features.push(f),
            Ok(None) => {}
            Err(ArtifactError::UnknownContig(chrom)) => {
                log::warn!("Skipping {}: contig {} not in alignment header", mutation.locus(), chrom);
            }
            Err(e) => return Err(e),
        }

        log::debug!(
            "chrom:{}, start:{}, end:{}, ref:{}, alt:{}, time:{:.2?}",
            mutation.chrom,
            mutation.one_based_start(),
            mutation.end,
            mutation.ref_allele,
            mutation.alt_allele,
            started.elapsed()
        );
    }

    Ok(features)
}

/// Open per-thread readers and analyze one chunk
pub fn process_mutation_chunk(
    chunk: &[SomaticMutation],
    all: &[SomaticMutation],
    case_bam: &Path,
    control_bam: &Path,
    reference_path: &Path,
    config: &ArtifactConfig,
) -> ArtifactResult<Vec<MutationFeatures>> {
    let mut case = BamPileup::new(case_bam)?.with_max_depth(config.max_depth);
    let mut control = BamPileup::new(control_bam)?.with_max_depth(config.max_depth);
    let mut reference = FastaReference::new(reference_path)?;

    analyze_mutations(chunk, all, &mut case, &mut control, &mut reference, config)
}

/// Analyze every mutation of one case/control pair, in parallel, keeping input order
pub fn calculate_artifact_features(
    mutations: &[SomaticMutation],
    case_bam: &Path,
    control_bam: &Path,
    reference_path: &Path,
    config: &ArtifactConfig,
    num_processes: usize,
) -> ArtifactResult<Vec<MutationFeatures>> {
    if mutations.is_empty() {
        return Ok(Vec::new());
    }

    let num_processes = std::cmp::min(num_processes.max(1), mutations.len());
    let chunks = chunkify(mutations, num_processes);

    let chunk_results: Result<Vec<Vec<_>>, ArtifactError> = chunks
        .into_par_iter()
        .map(|chunk| process_mutation_chunk(&chunk, mutations, case_bam, control_bam, reference_path, config))
        .collect();

    Ok(chunk_results?.into_iter().flatten().collect())
}

/// Write features as TSV, gzip compressed when the path ends in `.gz`.
/// The header is written even when there are no rows.
pub fn write_features(features: &[MutationFeatures], output_path: &Path) -> ArtifactResult<()> {
    let mut writer = csv::WriterBuilder::new()
        .delimiter(b'\t')
        .from_writer(create_output(output_path)?);

    writer.write_record(MutationFeatures::header())?;
    for f in features {
        writer.write_record(f.fields())?;
    }

    let mut inner = writer
        .into_inner()
        .map_err(|e| ArtifactError::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string())))?;
    inner.flush()?;
    Ok(())
}
