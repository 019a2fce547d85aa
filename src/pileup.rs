//! Pileup snapshot types and the collaborator interfaces the core consumes
//!
//! The analysis code never touches htslib records directly. Alignment sources
//! are adapted into [`AlignedSegment`]s, piled up into [`PileupColumn`]s, and
//! read back through the [`AlignedBaseCall`] capability trait.

use crate::{ArtifactError, ArtifactResult, Locus};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Reads kept per pileup column, as in the htslib pileup iterator
pub const DEFAULT_MAX_DEPTH: usize = 8000;

/// `(query offset, reference position)`; `None` on the side an operation does not consume
pub type AlignedPair = (Option<usize>, Option<u64>);

/// CIGAR operation kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CigarOp {
    Match,
    Insertion,
    Deletion,
    RefSkip,
    SoftClip,
    HardClip,
    Padding,
    Equal,
    Diff,
}

/// What the core needs to know about one read at one pileup column
pub trait AlignedBaseCall {
    fn query_name(&self) -> &str;

    fn query_sequence(&self) -> &[u8];

    /// Length of the indel following this column: >0 insertion, <0 deletion, 0 none
    fn indel(&self) -> i32;

    fn aligned_pairs(&self) -> &[AlignedPair];

    fn cigar(&self) -> &[(CigarOp, u32)];

    fn integer_tag(&self, tag: &str) -> Option<i64>;

    /// Edit distance from the `NM` tag
    fn edit_distance(&self) -> Option<i64> {
        self.integer_tag("NM")
    }

    /// First and last reference positions covered by the alignment
    fn mapped_range(&self) -> Option<(u64, u64)> {
        let pairs = self.aligned_pairs();
        let first = pairs.iter().find_map(|p| p.1)?;
        let last = pairs.iter().rev().find_map(|p| p.1)?;
        Some((first, last))
    }

    /// Index into `aligned_pairs()` of the pair at `position`
    fn pair_index(&self, position: u64) -> Option<usize> {
        self.aligned_pairs().iter().position(|p| p.1 == Some(position))
    }

    /// `position` falls in a skipped region (`N`), where the read has no call
    fn in_ref_skip(&self, position: u64) -> bool {
        let Some((mut rpos, _)) = self.mapped_range() else {
            return false;
        };
        for &(op, len) in self.cigar() {
            let len = len as u64;
            match op {
                CigarOp::RefSkip if (rpos..rpos + len).contains(&position) => return true,
                CigarOp::Match | CigarOp::Equal | CigarOp::Diff | CigarOp::Deletion | CigarOp::RefSkip => {
                    rpos += len
                }
                _ => {}
            }
        }
        false
    }
}

/// One alignment record, with its aligned pairs precomputed
#[derive(Debug, Clone)]
pub struct AlignedSegment {
    pub name: String,
    pub sequence: Vec<u8>,
    pub cigar: Vec<(CigarOp, u32)>,
    pub aligned_pairs: Vec<AlignedPair>,
    pub tags: HashMap<String, i64>,
    leading_clip: usize,
    trailing_clip: usize,
    // indices into aligned_pairs of the reference-consuming pairs, in reference order
    ref_pairs: Vec<usize>,
    // half-open reference intervals skipped by N operations
    ref_skips: Vec<(u64, u64)>,
}

impl AlignedSegment {
    /// Build a segment from its leftmost mapped position and CIGAR, the way an aligner reports it
    pub fn from_cigar(
        name: &str,
        reference_start: u64,
        cigar: Vec<(CigarOp, u32)>,
        sequence: Vec<u8>,
    ) -> Self {
        let mut aligned_pairs = Vec::with_capacity(sequence.len());
        let mut ref_pairs = Vec::new();
        let mut ref_skips = Vec::new();
        let mut qpos = 0usize;
        let mut rpos = reference_start;

        for &(op, len) in &cigar {
            if op == CigarOp::RefSkip {
                ref_skips.push((rpos, rpos + len as u64));
            }
            for _ in 0..len {
                match op {
                    CigarOp::Match | CigarOp::Equal | CigarOp::Diff => {
                        ref_pairs.push(aligned_pairs.len());
                        aligned_pairs.push((Some(qpos), Some(rpos)));
                        qpos += 1;
                        rpos += 1;
                    }
                    CigarOp::Insertion | CigarOp::SoftClip => {
                        aligned_pairs.push((Some(qpos), None));
                        qpos += 1;
                    }
                    CigarOp::Deletion | CigarOp::RefSkip => {
                        ref_pairs.push(aligned_pairs.len());
                        aligned_pairs.push((None, Some(rpos)));
                        rpos += 1;
                    }
                    CigarOp::HardClip | CigarOp::Padding => {}
                }
            }
        }

        let leading_clip = cigar
            .iter()
            .take_while(|(op, _)| matches!(op, CigarOp::SoftClip | CigarOp::HardClip))
            .filter(|(op, _)| *op == CigarOp::SoftClip)
            .map(|(_, len)| *len as usize)
            .sum();
        let trailing_clip = cigar
            .iter()
            .rev()
            .take_while(|(op, _)| matches!(op, CigarOp::SoftClip | CigarOp::HardClip))
            .filter(|(op, _)| *op == CigarOp::SoftClip)
            .map(|(_, len)| *len as usize)
            .sum();

        Self {
            name: name.to_string(),
            sequence,
            cigar,
            aligned_pairs,
            tags: HashMap::new(),
            leading_clip,
            trailing_clip,
            ref_pairs,
            ref_skips,
        }
    }

    pub fn with_tag(mut self, tag: &str, value: i64) -> Self {
        self.tags.insert(tag.to_string(), value);
        self
    }

    pub fn mapped_range(&self) -> Option<(u64, u64)> {
        let first = *self.ref_pairs.first()?;
        let last = *self.ref_pairs.last()?;
        Some((self.aligned_pairs[first].1?, self.aligned_pairs[last].1?))
    }

    pub fn pair_index(&self, position: u64) -> Option<usize> {
        let (first, _) = self.mapped_range()?;
        let offset = position.checked_sub(first)? as usize;
        self.ref_pairs.get(offset).copied()
    }

    pub fn in_ref_skip(&self, position: u64) -> bool {
        self.ref_skips.iter().any(|&(start, end)| (start..end).contains(&position))
    }

    /// Reference interval (inclusive) the read covers once soft-clipped bases are projected
    fn footprint(&self) -> Option<(u64, u64)> {
        let (first, last) = self.mapped_range()?;
        Some((
            first.saturating_sub(self.leading_clip as u64),
            last + self.trailing_clip as u64,
        ))
    }

    fn is_insertion_pair(&self, index: usize) -> bool {
        index >= self.leading_clip
            && index + self.trailing_clip < self.aligned_pairs.len()
            && matches!(self.aligned_pairs[index], (Some(_), None))
    }

    /// The read as seen by the pileup column at `position`
    fn at(self: &Arc<Self>, position: u64) -> Option<PileupRead> {
        let (first, last) = self.mapped_range()?;
        if position < first {
            let offset = (first - position) as usize;
            return Some(PileupRead::clipped(self, self.leading_clip.checked_sub(offset)?));
        }
        if position > last {
            let offset = (position - last - 1) as usize;
            let clip_start = self.sequence.len().checked_sub(self.trailing_clip)?;
            return Some(PileupRead::clipped(self, clip_start + offset));
        }

        if self.in_ref_skip(position) {
            return None;
        }

        let index = self.pair_index(position)?;
        let (qpos, _) = self.aligned_pairs[index];
        if qpos.is_none() {
            return Some(PileupRead {
                segment: Arc::clone(self),
                query_position: None,
                indel: 0,
                is_del: true,
            });
        }

        let following = &self.aligned_pairs[index + 1..];
        let indel = if self.is_insertion_pair(index + 1) {
            following.iter().take_while(|p| matches!(p, (Some(_), None))).count() as i32
        } else {
            -(following
                .iter()
                .take_while(|p| matches!(p, (None, Some(r)) if !self.in_ref_skip(*r)))
                .count() as i32)
        };

        Some(PileupRead {
            segment: Arc::clone(self),
            query_position: qpos,
            indel,
            is_del: false,
        })
    }
}

/// A read at a single pileup column
#[derive(Debug, Clone)]
pub struct PileupRead {
    pub segment: Arc<AlignedSegment>,
    pub query_position: Option<usize>,
    pub indel: i32,
    pub is_del: bool,
}

impl PileupRead {
    fn clipped(segment: &Arc<AlignedSegment>, query_position: usize) -> Self {
        PileupRead {
            segment: Arc::clone(segment),
            query_position: Some(query_position),
            indel: 0,
            is_del: false,
        }
    }
}

impl AlignedBaseCall for PileupRead {
    fn query_name(&self) -> &str {
        &self.segment.name
    }

    fn query_sequence(&self) -> &[u8] {
        &self.segment.sequence
    }

    fn indel(&self) -> i32 {
        self.indel
    }

    fn aligned_pairs(&self) -> &[AlignedPair] {
        &self.segment.aligned_pairs
    }

    fn cigar(&self) -> &[(CigarOp, u32)] {
        &self.segment.cigar
    }

    fn integer_tag(&self, tag: &str) -> Option<i64> {
        self.segment.tags.get(tag).copied()
    }

    fn mapped_range(&self) -> Option<(u64, u64)> {
        self.segment.mapped_range()
    }

    fn pair_index(&self, position: u64) -> Option<usize> {
        self.segment.pair_index(position)
    }

    fn in_ref_skip(&self, position: u64) -> bool {
        self.segment.in_ref_skip(position)
    }
}

/// All reads overlapping one reference position
#[derive(Debug, Clone)]
pub struct PileupColumn {
    pub position: u64,
    pub reads: Vec<PileupRead>,
}

/// Source of pileup columns for one alignment file
pub trait PileupProvider {
    /// Columns for the reads overlapping `[start, end)`. With `truncate` only
    /// columns inside the interval are returned; otherwise every column those
    /// reads cover, soft-clipped bases included.
    fn pileup(
        &mut self,
        chrom: &str,
        start: u64,
        end: u64,
        truncate: bool,
    ) -> ArtifactResult<Vec<PileupColumn>>;
}

/// Source of reference bases
pub trait ReferenceProvider {
    /// Bases of the half-open, 0-based interval `[start, end)`
    fn fetch(&mut self, chrom: &str, start: u64, end: u64) -> ArtifactResult<String>;
}

/// Pile up the segments overlapping `[start, end)` into ordered columns.
/// Columns stop taking reads once they hold `max_depth`.
pub fn pile_up(
    segments: &[Arc<AlignedSegment>],
    start: u64,
    end: u64,
    truncate: bool,
    max_depth: usize,
) -> Vec<PileupColumn> {
    let mut columns: BTreeMap<u64, Vec<PileupRead>> = BTreeMap::new();
    let mut capped = 0usize;

    for segment in segments {
        let Some((first, last)) = segment.mapped_range() else {
            continue;
        };
        if first >= end || last < start {
            continue;
        }
        let Some((mut lo, mut hi)) = segment.footprint() else {
            continue;
        };
        if truncate {
            lo = lo.max(start);
            hi = hi.min(end.saturating_sub(1));
        }
        for position in lo..=hi {
            if let Some(read) = segment.at(position) {
                let column = columns.entry(position).or_default();
                if column.len() < max_depth {
                    column.push(read);
                } else {
                    capped += 1;
                }
            }
        }
    }

    if capped > 0 {
        log::debug!("Dropped {} reads beyond max depth {} in [{}, {})", capped, max_depth, start, end);
    }

    columns
        .into_iter()
        .map(|(position, reads)| PileupColumn { position, reads })
        .collect()
}

/// Pileup provider over segments already held in memory, keyed by contig
#[derive(Debug, Clone)]
pub struct SegmentPileup {
    segments: HashMap<String, Vec<Arc<AlignedSegment>>>,
    max_depth: usize,
}

impl Default for SegmentPileup {
    fn default() -> Self {
        Self {
            segments: HashMap::new(),
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

impl SegmentPileup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn add(&mut self, chrom: &str, segment: AlignedSegment) {
        self.segments
            .entry(chrom.to_string())
            .or_default()
            .push(Arc::new(segment));
    }
}

impl PileupProvider for SegmentPileup {
    fn pileup(
        &mut self,
        chrom: &str,
        start: u64,
        end: u64,
        truncate: bool,
    ) -> ArtifactResult<Vec<PileupColumn>> {
        Ok(self
            .segments
            .get(chrom)
            .map(|segments| pile_up(segments, start, end, truncate, self.max_depth))
            .unwrap_or_default())
    }
}

/// Reference provider over contig sequences held in memory
#[derive(Debug, Clone, Default)]
pub struct SequenceReference {
    contigs: HashMap<String, String>,
}

impl SequenceReference {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, chrom: &str, sequence: &str) {
        self.contigs.insert(chrom.to_string(), sequence.to_string());
    }
}

impl ReferenceProvider for SequenceReference {
    fn fetch(&mut self, chrom: &str, start: u64, end: u64) -> ArtifactResult<String> {
        let sequence = self
            .contigs
            .get(chrom)
            .ok_or_else(|| ArtifactError::UnknownContig(chrom.to_string()))?;
        sequence
            .get(start as usize..end as usize)
            .map(str::to_string)
            .ok_or_else(|| ArtifactError::UncoveredLocus(Locus::new(chrom, start, end)))
    }
}
