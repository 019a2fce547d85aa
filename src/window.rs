//! Read evidence around a candidate mutation, indexed by locus and read name

use crate::evidence::{classify, BaseCallEvidence};
use crate::pileup::{AlignedBaseCall, PileupProvider, ReferenceProvider};
use crate::{ArtifactResult, Locus};
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

/// Evidence of every read at one window locus
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowColumn {
    pub ref_base: char,
    pub reads: BTreeMap<String, BaseCallEvidence>,
}

/// Loci covered by the reads overlapping a candidate site, in genomic order.
/// The candidate locus itself is not part of the index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowIndex {
    candidate: Locus,
    columns: BTreeMap<Locus, WindowColumn>,
}

impl WindowIndex {
    /// Pile up the reads overlapping `candidate` and classify each of them at
    /// every other locus they cover. Loci without a reference base are skipped,
    /// as are reads that cannot be classified at a locus. When mates overlap,
    /// the first aligned call for a name wins over any projected soft clip.
    pub fn build<P, R>(candidate: &Locus, pileup: &mut P, reference: &mut R) -> ArtifactResult<Self>
    where
        P: PileupProvider + ?Sized,
        R: ReferenceProvider + ?Sized,
    {
        let mut columns = BTreeMap::new();

        for column in pileup.pileup(&candidate.chrom, candidate.start, candidate.end, false)? {
            if column.position == candidate.start {
                continue;
            }
            let locus = Locus::single_base(&candidate.chrom, column.position);

            let ref_base = match reference.fetch(&locus.chrom, locus.start, locus.end) {
                Ok(bases) => match bases.chars().next() {
                    Some(b) => b.to_ascii_uppercase(),
                    None => {
                        log::debug!("Skipping {}: empty reference", locus);
                        continue;
                    }
                },
                Err(e) => {
                    log::debug!("Skipping {}: {}", locus, e);
                    continue;
                }
            };

            let mut reads = BTreeMap::new();
            for read in &column.reads {
                match classify(read, column.position, ref_base) {
                    Ok(evidence) => match reads.entry(read.query_name().to_string()) {
                        Entry::Vacant(entry) => {
                            entry.insert(evidence);
                        }
                        Entry::Occupied(mut entry) => {
                            if entry.get().is_soft_clipped() && evidence.is_aligned() {
                                entry.insert(evidence);
                            }
                        }
                    },
                    Err(e) => log::debug!("Skipping read {} at {}: {}", read.query_name(), locus, e),
                }
            }

            columns.insert(locus, WindowColumn { ref_base, reads });
        }

        Ok(Self {
            candidate: candidate.clone(),
            columns,
        })
    }

    pub fn candidate(&self) -> &Locus {
        &self.candidate
    }

    pub fn loci(&self) -> impl Iterator<Item = &Locus> {
        self.columns.keys()
    }

    pub fn columns(&self) -> impl Iterator<Item = (&Locus, &WindowColumn)> {
        self.columns.iter()
    }

    pub fn column(&self, locus: &Locus) -> Option<&WindowColumn> {
        self.columns.get(locus)
    }

    pub fn evidence(&self, locus: &Locus, read_name: &str) -> Option<&BaseCallEvidence> {
        self.columns.get(locus)?.reads.get(read_name)
    }

    pub fn ref_alleles(&self) -> BTreeMap<Locus, char> {
        self.columns
            .iter()
            .map(|(locus, column)| (locus.clone(), column.ref_base))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evidence::{CallKind, ClipSide};
    use crate::pileup::{
        pile_up, AlignedSegment, CigarOp, PileupColumn, PileupRead, SegmentPileup, SequenceReference,
        DEFAULT_MAX_DEPTH,
    };
    use std::sync::Arc;

    fn reference() -> SequenceReference {
        let mut reference = SequenceReference::new();
        reference.add("chr1", "ACGTACGTAC");
        reference
    }

    /// Serves the same columns for any query
    struct FixedPileup(Vec<PileupColumn>);

    impl PileupProvider for FixedPileup {
        fn pileup(&mut self, _chrom: &str, _start: u64, _end: u64, _truncate: bool) -> ArtifactResult<Vec<PileupColumn>> {
            Ok(self.0.clone())
        }
    }

    fn fixture() -> (SegmentPileup, SequenceReference) {
        let mut reference = SequenceReference::new();
        reference.add("chr1", "ACGTACGTAC");

        let mut pileup = SegmentPileup::new();
        pileup.add("chr1", AlignedSegment::from_cigar("a", 2, vec![(CigarOp::Match, 5)], b"GTTCG".to_vec()));
        pileup.add("chr1", AlignedSegment::from_cigar("b", 4, vec![(CigarOp::Match, 6)], b"ACGTAC".to_vec()));
        // does not reach the candidate
        pileup.add("chr1", AlignedSegment::from_cigar("c", 0, vec![(CigarOp::Match, 3)], b"ACG".to_vec()));
        (pileup, reference)
    }

    #[test]
    fn test_build_excludes_candidate_locus() {
        let (mut pileup, mut reference) = fixture();
        let candidate = Locus::single_base("chr1", 5);
        let index = WindowIndex::build(&candidate, &mut pileup, &mut reference).unwrap();

        let positions: Vec<u64> = index.loci().map(|l| l.start).collect();
        assert_eq!(positions, vec![2, 3, 4, 6, 7, 8, 9]);
        assert!(index.column(&candidate).is_none());
    }

    #[test]
    fn test_build_classifies_reads() {
        let (mut pileup, mut reference) = fixture();
        let index = WindowIndex::build(&Locus::single_base("chr1", 5), &mut pileup, &mut reference).unwrap();

        let locus = Locus::single_base("chr1", 3);
        assert!(index.evidence(&locus, "a").unwrap().is_ref());
        assert!(index.evidence(&locus, "b").is_none());
        assert!(index.evidence(&locus, "c").is_none());

        let locus = Locus::single_base("chr1", 4);
        let evidence = index.evidence(&locus, "a").unwrap();
        assert!(evidence.is_alt());
        assert_eq!(evidence.base, Some('T'));
        assert!(index.evidence(&locus, "b").unwrap().is_ref());
        assert_eq!(index.ref_alleles()[&locus], 'A');
    }

    #[test]
    fn test_build_skips_unfetchable_loci() {
        let (mut pileup, _) = fixture();
        let mut short_reference = SequenceReference::new();
        short_reference.add("chr1", "ACGTACGT");

        let index = WindowIndex::build(&Locus::single_base("chr1", 5), &mut pileup, &mut short_reference).unwrap();
        let positions: Vec<u64> = index.loci().map(|l| l.start).collect();
        assert_eq!(positions, vec![2, 3, 4, 6, 7]);
    }

    #[test]
    fn test_build_is_deterministic() {
        let (mut pileup, mut reference) = fixture();
        let candidate = Locus::single_base("chr1", 5);
        let first = WindowIndex::build(&candidate, &mut pileup, &mut reference).unwrap();
        let second = WindowIndex::build(&candidate, &mut pileup, &mut reference).unwrap();
        assert_eq!(first, second);
    }

    fn mates(clipped_first: bool) -> SegmentPileup {
        // 2S4M from 4: the clip projects onto 2 and 3
        let clipped = AlignedSegment::from_cigar(
            "t",
            4,
            vec![(CigarOp::SoftClip, 2), (CigarOp::Match, 4)],
            b"GGACGT".to_vec(),
        );
        // mismatch at 3
        let aligned = AlignedSegment::from_cigar("t", 2, vec![(CigarOp::Match, 6)], b"GAACGT".to_vec());

        let mut pileup = SegmentPileup::new();
        if clipped_first {
            pileup.add("chr1", clipped);
            pileup.add("chr1", aligned);
        } else {
            pileup.add("chr1", aligned);
            pileup.add("chr1", clipped);
        }
        pileup
    }

    #[test]
    fn test_aligned_mate_replaces_projected_clip() {
        for clipped_first in [true, false] {
            let mut pileup = mates(clipped_first);
            let index = WindowIndex::build(&Locus::single_base("chr1", 5), &mut pileup, &mut reference()).unwrap();

            let evidence = index.evidence(&Locus::single_base("chr1", 3), "t").unwrap();
            assert!(evidence.is_alt());
            assert_eq!(evidence.base, Some('A'));
            assert!(index.evidence(&Locus::single_base("chr1", 2), "t").unwrap().is_ref());
            assert_eq!(index.column(&Locus::single_base("chr1", 3)).unwrap().reads.len(), 1);
        }
    }

    #[test]
    fn test_clip_only_locus_stays_clipped() {
        let mut pileup = SegmentPileup::new();
        pileup.add(
            "chr1",
            AlignedSegment::from_cigar("t", 4, vec![(CigarOp::SoftClip, 2), (CigarOp::Match, 4)], b"GGACGT".to_vec()),
        );
        pileup.add("chr1", AlignedSegment::from_cigar("t", 5, vec![(CigarOp::SoftClip, 1), (CigarOp::Match, 3)], b"GCGT".to_vec()));

        let index = WindowIndex::build(&Locus::single_base("chr1", 5), &mut pileup, &mut reference()).unwrap();
        assert_eq!(
            index.evidence(&Locus::single_base("chr1", 3), "t").unwrap().kind,
            CallKind::SoftClipped(ClipSide::Leading)
        );
        // an aligned call is never replaced by a later projected clip
        assert!(index.evidence(&Locus::single_base("chr1", 4), "t").unwrap().is_ref());
    }

    #[test]
    fn test_disagreeing_aligned_mates_keep_first_call() {
        let mut pileup = SegmentPileup::new();
        pileup.add("chr1", AlignedSegment::from_cigar("u", 2, vec![(CigarOp::Match, 6)], b"GTACGT".to_vec()));
        pileup.add("chr1", AlignedSegment::from_cigar("u", 3, vec![(CigarOp::Match, 5)], b"AACGT".to_vec()));

        let index = WindowIndex::build(&Locus::single_base("chr1", 5), &mut pileup, &mut reference()).unwrap();
        assert!(index.evidence(&Locus::single_base("chr1", 3), "u").unwrap().is_ref());
    }

    #[test]
    fn test_unclassifiable_read_is_skipped_alone() {
        let good = Arc::new(AlignedSegment::from_cigar("good", 2, vec![(CigarOp::Match, 6)], b"GTACGT".to_vec()));
        let mut columns = pile_up(&[good], 5, 6, false, DEFAULT_MAX_DEPTH);
        assert_eq!(columns[1].position, 3);
        // no mapped base at all
        columns[1].reads.push(PileupRead {
            segment: Arc::new(AlignedSegment::from_cigar("broken", 3, vec![(CigarOp::SoftClip, 4)], b"AAAA".to_vec())),
            query_position: Some(0),
            indel: 0,
            is_del: false,
        });

        let candidate = Locus::single_base("chr1", 5);
        let index = WindowIndex::build(&candidate, &mut FixedPileup(columns), &mut reference()).unwrap();

        let locus = Locus::single_base("chr1", 3);
        assert!(index.evidence(&locus, "good").unwrap().is_ref());
        assert!(index.evidence(&locus, "broken").is_none());
        assert_eq!(index.len(), 5);
        assert_eq!(index.candidate(), &candidate);
    }
}
