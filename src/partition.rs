//! Splits the reads at a candidate locus into ref- and alt-supporting templates

use crate::evidence::{classify, CallKind};
use crate::pileup::{AlignedBaseCall, CigarOp};
use crate::{ArtifactConfig, ArtifactError, ArtifactResult};
use std::collections::BTreeSet;

/// Read names at the candidate locus. The three sets are disjoint.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadSupportSets {
    pub ref_supporting: BTreeSet<String>,
    pub alt_supporting: BTreeSet<String>,
    pub excluded: BTreeSet<String>,
    /// Further mates of a template already counted as ref-supporting
    pub ref_overlapping_aligned_segment_count: u32,
    pub alt_overlapping_aligned_segment_count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Support {
    Ref,
    Alt,
    Neither,
}

/// The `NM` edit distance, or `MissingTag` when the aligner did not write one
pub fn required_edit_distance(read: &impl AlignedBaseCall) -> ArtifactResult<i64> {
    read.edit_distance()
        .ok_or_else(|| ArtifactError::MissingTag("NM".to_string()))
}

/// Substitution-only mismatch rate test. Reads without an edit distance pass.
pub fn passes_quality_gate(read: &impl AlignedBaseCall, max_mismatch_rate: f64) -> bool {
    let edit_distance = match required_edit_distance(read) {
        Ok(nm) => nm,
        Err(e) => {
            log::debug!("Read {} passes the mismatch gate unchecked: {}", read.query_name(), e);
            return true;
        }
    };
    let length = read.query_sequence().len();
    if length == 0 {
        return true;
    }

    let indel_bp: i64 = read
        .cigar()
        .iter()
        .filter(|(op, _)| matches!(op, CigarOp::Insertion | CigarOp::Deletion))
        .map(|(_, len)| *len as i64)
        .sum();
    let substitutions = (edit_distance - indel_bp).max(0);

    substitutions as f64 / length as f64 <= max_mismatch_rate
}

fn support(read: &impl AlignedBaseCall, position: u64, ref_base: char, alt_base: char) -> Support {
    match classify(read, position, ref_base) {
        Ok(evidence) => match evidence.kind {
            CallKind::Ref => Support::Ref,
            CallKind::Alt if evidence.base == Some(alt_base) => Support::Alt,
            _ => Support::Neither,
        },
        Err(e) => {
            log::debug!("Read {} not classified at {}: {}", read.query_name(), position, e);
            Support::Neither
        }
    }
}

fn first_base(allele: &str) -> Option<char> {
    allele.chars().next().map(|c| c.to_ascii_uppercase())
}

/// Partition the reads piled up at the candidate `position`. When several
/// alignments share a name the first one decides; agreeing mates are counted
/// as overlapping segments and discordant mates are ignored.
pub fn partition<T: AlignedBaseCall>(
    reads: &[T],
    position: u64,
    ref_allele: &str,
    alt_allele: &str,
    config: &ArtifactConfig,
) -> ReadSupportSets {
    let mut sets = ReadSupportSets::default();
    let (Some(ref_base), Some(alt_base)) = (first_base(ref_allele), first_base(alt_allele)) else {
        sets.excluded = reads.iter().map(|r| r.query_name().to_string()).collect();
        return sets;
    };

    let mut dropped = BTreeSet::new();

    for read in reads {
        let name = read.query_name();

        if !passes_quality_gate(read, config.max_mismatch_rate) {
            log::debug!("Read {} fails the mismatch gate at {}", name, position);
            dropped.insert(name.to_string());
            continue;
        }

        match support(read, position, ref_base, alt_base) {
            Support::Ref if sets.ref_supporting.contains(name) => {
                sets.ref_overlapping_aligned_segment_count += 1;
            }
            Support::Alt if sets.alt_supporting.contains(name) => {
                sets.alt_overlapping_aligned_segment_count += 1;
            }
            Support::Ref | Support::Alt
                if sets.ref_supporting.contains(name) || sets.alt_supporting.contains(name) => {}
            Support::Ref => {
                sets.ref_supporting.insert(name.to_string());
            }
            Support::Alt => {
                sets.alt_supporting.insert(name.to_string());
            }
            Support::Neither => {
                dropped.insert(name.to_string());
            }
        }
    }

    sets.excluded = dropped
        .into_iter()
        .filter(|n| !sets.ref_supporting.contains(n) && !sets.alt_supporting.contains(n))
        .collect();
    sets
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pileup::{pile_up, AlignedSegment, PileupRead, DEFAULT_MAX_DEPTH};
    use std::sync::Arc;

    const POS: u64 = 102;

    fn read(name: &str, seq: &str) -> AlignedSegment {
        AlignedSegment::from_cigar(name, 100, vec![(CigarOp::Match, seq.len() as u32)], seq.as_bytes().to_vec())
    }

    fn column(segments: Vec<AlignedSegment>) -> Vec<PileupRead> {
        let segments: Vec<Arc<AlignedSegment>> = segments.into_iter().map(Arc::new).collect();
        pile_up(&segments, POS, POS + 1, true, DEFAULT_MAX_DEPTH)
            .into_iter()
            .next()
            .map(|c| c.reads)
            .unwrap_or_default()
    }

    fn run(segments: Vec<AlignedSegment>) -> ReadSupportSets {
        partition(&column(segments), POS, "A", "T", &ArtifactConfig::default())
    }

    #[test]
    fn test_ref_and_alt_counts() {
        let mut segments = Vec::new();
        for i in 0..6 {
            segments.push(read(&format!("ref{}", i), "CCACCCCCCC"));
        }
        for i in 0..4 {
            segments.push(read(&format!("alt{}", i), "CCTCCCCCCC"));
        }

        let sets = run(segments);
        assert_eq!(sets.ref_supporting.len(), 6);
        assert_eq!(sets.alt_supporting.len(), 4);
        assert!(sets.excluded.is_empty());
        assert_eq!(sets.ref_overlapping_aligned_segment_count, 0);
        assert_eq!(sets.alt_overlapping_aligned_segment_count, 0);
    }

    #[test]
    fn test_overlapping_mates_counted_once() {
        let sets = run(vec![read("pair", "CCTCCCCCCC"), read("pair", "CCTCC")]);
        assert_eq!(sets.alt_supporting.len(), 1);
        assert_eq!(sets.alt_overlapping_aligned_segment_count, 1);
        assert_eq!(sets.ref_overlapping_aligned_segment_count, 0);
    }

    #[test]
    fn test_discordant_mates_keep_first_call() {
        let sets = run(vec![read("pair", "CCACCCCCCC"), read("pair", "CCTCCCCCCC")]);
        assert!(sets.ref_supporting.contains("pair"));
        assert!(sets.alt_supporting.is_empty());
        assert_eq!(sets.ref_overlapping_aligned_segment_count, 0);
        assert_eq!(sets.alt_overlapping_aligned_segment_count, 0);
        assert!(sets.excluded.is_empty());
    }

    #[test]
    fn test_indels_and_third_alleles_are_excluded() {
        let insertion = AlignedSegment::from_cigar(
            "ins",
            100,
            vec![(CigarOp::Match, 3), (CigarOp::Insertion, 2), (CigarOp::Match, 3)],
            b"CCAGGCCC".to_vec(),
        );
        let deletion = AlignedSegment::from_cigar(
            "del",
            100,
            vec![(CigarOp::Match, 2), (CigarOp::Deletion, 1), (CigarOp::Match, 3)],
            b"CCCCC".to_vec(),
        );
        let sets = run(vec![insertion, deletion, read("third", "CCGCCCCCCC"), read("ok", "CCACCCCCCC")]);

        assert_eq!(sets.ref_supporting.len(), 1);
        assert!(sets.alt_supporting.is_empty());
        let excluded: Vec<&str> = sets.excluded.iter().map(String::as_str).collect();
        assert_eq!(excluded, vec!["del", "ins", "third"]);
    }

    #[test]
    fn test_quality_gate() {
        let noisy = read("noisy", "CCTCCCCCCC").with_tag("NM", 3);
        let clean = read("clean", "CCTCCCCCCC").with_tag("NM", 1);
        let untagged = read("untagged", "CCTCCCCCCC");

        let sets = run(vec![noisy, clean, untagged]);
        assert!(sets.excluded.contains("noisy"));
        assert!(sets.alt_supporting.contains("clean"));
        assert!(sets.alt_supporting.contains("untagged"));
    }

    #[test]
    fn test_missing_edit_distance_is_recoverable() {
        let untagged = column(vec![read("untagged", "CCTCCCCCCC")]);
        assert!(matches!(
            required_edit_distance(&untagged[0]),
            Err(ArtifactError::MissingTag(ref tag)) if tag == "NM"
        ));
        assert!(passes_quality_gate(&untagged[0], 0.0));

        let tagged = column(vec![read("tagged", "CCTCCCCCCC").with_tag("NM", 1)]);
        assert_eq!(required_edit_distance(&tagged[0]).unwrap(), 1);
    }

    #[test]
    fn test_quality_gate_ignores_indel_edits() {
        let segments: Vec<Arc<AlignedSegment>> = vec![Arc::new(
            AlignedSegment::from_cigar(
                "r",
                0,
                vec![(CigarOp::Match, 5), (CigarOp::Deletion, 2), (CigarOp::Match, 5)],
                b"ACGTACGTAC".to_vec(),
            )
            .with_tag("NM", 3),
        )];
        let read = &pile_up(&segments, 0, 1, true, DEFAULT_MAX_DEPTH)[0].reads[0];
        // one substitution over ten bases
        assert!(passes_quality_gate(read, 0.10));
        assert!(!passes_quality_gate(read, 0.05));
    }

    #[test]
    fn test_failed_gate_does_not_shadow_supporting_mate() {
        let sets = run(vec![
            read("pair", "CCTCCCCCCC"),
            read("pair", "CCTCCCCCCC").with_tag("NM", 5),
        ]);
        assert!(sets.alt_supporting.contains("pair"));
        assert!(sets.excluded.is_empty());
    }

    #[test]
    fn test_support_sets_are_disjoint() {
        let sets = run(vec![
            read("a", "CCACCCCCCC"),
            read("a", "CCTCCCCCCC"),
            read("b", "CCTCCCCCCC"),
            read("b", "CCACCCCCCC"),
            read("c", "CCGCCCCCCC"),
            read("c", "CCACCCCCCC"),
        ]);
        assert!(sets.ref_supporting.is_disjoint(&sets.alt_supporting));
        assert!(sets.ref_supporting.is_disjoint(&sets.excluded));
        assert!(sets.alt_supporting.is_disjoint(&sets.excluded));
        assert!(sets.ref_supporting.contains("c"));
    }
}
