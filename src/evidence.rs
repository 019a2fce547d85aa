//! Per-read, per-locus base call classification

use crate::pileup::{AlignedBaseCall, CigarOp};

/// Raised when a read has no aligned pair at all to classify against
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EvidenceError {
    #[error("locus {0} is not covered by any mapped base of the read")]
    LocusNotCovered(u64),
}

/// Which end of the read a soft clip sits on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClipSide {
    Leading,
    Trailing,
}

/// The single category a read falls into at a locus. Indel and soft-clip
/// states win over base comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallKind {
    Ref,
    Alt,
    Insertion,
    Deletion,
    SoftClipped(ClipSide),
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BaseCallEvidence {
    pub kind: CallKind,
    /// Observed base, whenever the read has one aligned here
    pub base: Option<char>,
    /// Indel following this locus in the read (>0 insertion, <0 deletion)
    pub indel: i32,
    /// Length of the soft clip this locus falls in, 0 otherwise
    pub soft_clip_length: u32,
}

impl BaseCallEvidence {
    fn new(kind: CallKind, base: Option<char>, indel: i32) -> Self {
        Self {
            kind,
            base,
            indel,
            soft_clip_length: 0,
        }
    }

    pub fn is_ref(&self) -> bool {
        self.kind == CallKind::Ref
    }

    pub fn is_alt(&self) -> bool {
        self.kind == CallKind::Alt
    }

    pub fn is_insertion(&self) -> bool {
        self.kind == CallKind::Insertion
    }

    pub fn is_deletion(&self) -> bool {
        self.kind == CallKind::Deletion
    }

    pub fn is_soft_clipped(&self) -> bool {
        matches!(self.kind, CallKind::SoftClipped(_))
    }

    pub fn is_other(&self) -> bool {
        self.kind == CallKind::Other
    }

    /// The read has a base or a deletion here, not just a projected clip
    pub fn is_aligned(&self) -> bool {
        matches!(
            self.kind,
            CallKind::Ref | CallKind::Alt | CallKind::Insertion | CallKind::Deletion
        )
    }

    /// Alt, insertion or deletion evidence
    pub fn is_non_ref(&self) -> bool {
        matches!(self.kind, CallKind::Alt | CallKind::Insertion | CallKind::Deletion)
    }

    /// The observed base differs from `ref_base`
    pub fn mismatches(&self, ref_base: char) -> bool {
        self.base
            .map(|b| !b.eq_ignore_ascii_case(&ref_base))
            .unwrap_or(false)
    }
}

fn clip_length(read: &impl AlignedBaseCall, side: ClipSide) -> u32 {
    let cigar = read.cigar();
    let ops: Box<dyn Iterator<Item = &(CigarOp, u32)>> = match side {
        ClipSide::Leading => Box::new(cigar.iter()),
        ClipSide::Trailing => Box::new(cigar.iter().rev()),
    };
    ops.take_while(|(op, _)| matches!(op, CigarOp::SoftClip | CigarOp::HardClip))
        .filter(|(op, _)| *op == CigarOp::SoftClip)
        .map(|(_, len)| *len)
        .sum()
}

/// Classify `read` at reference `position` against `ref_base`
pub fn classify(
    read: &impl AlignedBaseCall,
    position: u64,
    ref_base: char,
) -> Result<BaseCallEvidence, EvidenceError> {
    let (first, last) = read
        .mapped_range()
        .ok_or(EvidenceError::LocusNotCovered(position))?;

    if position < first || position > last {
        let side = if position < first {
            ClipSide::Leading
        } else {
            ClipSide::Trailing
        };
        let mut evidence = BaseCallEvidence::new(CallKind::SoftClipped(side), None, 0);
        evidence.soft_clip_length = clip_length(read, side);
        return Ok(evidence);
    }

    if read.in_ref_skip(position) {
        return Err(EvidenceError::LocusNotCovered(position));
    }

    let pairs = read.aligned_pairs();
    let index = read
        .pair_index(position)
        .ok_or(EvidenceError::LocusNotCovered(position))?;

    let Some(qpos) = pairs[index].0 else {
        return Ok(BaseCallEvidence::new(CallKind::Deletion, None, 0));
    };

    let base = read.query_sequence().get(qpos).map(|b| b.to_ascii_uppercase() as char);
    let indel = read.indel();

    // unmapped pairs strictly inside the mapped span are insertions, outside it soft clips
    let lo = read.pair_index(first).unwrap_or(0);
    let hi = read.pair_index(last).unwrap_or(pairs.len());
    let is_inserted = |i: usize| i > lo && i < hi && pairs[i].1.is_none();
    if (index > 0 && is_inserted(index - 1)) || is_inserted(index + 1) {
        return Ok(BaseCallEvidence::new(CallKind::Insertion, base, indel));
    }

    let kind = match base {
        None => CallKind::Other,
        Some(b) if b.eq_ignore_ascii_case(&ref_base) => CallKind::Ref,
        Some(_) => CallKind::Alt,
    };
    Ok(BaseCallEvidence::new(kind, base, indel))
}
