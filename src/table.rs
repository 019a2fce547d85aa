//! Base-pair contingency tables of alt- versus ref-supporting reads

use crate::evidence::{BaseCallEvidence, CallKind, ClipSide};
use crate::mask::PositionMask;
use crate::partition::ReadSupportSets;
use crate::window::WindowIndex;
use crate::{ArtifactConfig, ArtifactError, ArtifactResult, Locus, EPS};
use std::collections::{BTreeMap, BTreeSet, HashSet};

/// One 2x2 table laid out as `[[alt_non_ref, ref_non_ref], [alt_ref, ref_ref]]`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cells {
    pub alt_non_ref: u32,
    pub ref_non_ref: u32,
    pub alt_ref: u32,
    pub ref_ref: u32,
}

/// Independence-model expectation of each cell
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExpectedCounts {
    pub alt_non_ref: f64,
    pub ref_non_ref: f64,
    pub alt_ref: f64,
    pub ref_ref: f64,
}

/// Natural logs of the EPS-smoothed margins
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LogMargins {
    pub alt_column: f64,
    pub ref_column: f64,
    pub non_ref_row: f64,
    pub ref_row: f64,
    pub total: f64,
}

fn log_margin(count: u64, name: &str) -> ArtifactResult<f64> {
    let value = (count as f64 + EPS).ln();
    if value.is_finite() {
        Ok(value)
    } else {
        Err(ArtifactError::NumericalInvariant(format!(
            "log of {} margin ({}) is not finite",
            name, count
        )))
    }
}

impl Cells {
    /// Row-major order expected by Fisher's exact test
    pub fn as_array(&self) -> [u32; 4] {
        [self.alt_non_ref, self.ref_non_ref, self.alt_ref, self.ref_ref]
    }

    pub fn log_margins(&self) -> ArtifactResult<LogMargins> {
        let (a, b, c, d) = (
            self.alt_non_ref as u64,
            self.ref_non_ref as u64,
            self.alt_ref as u64,
            self.ref_ref as u64,
        );
        Ok(LogMargins {
            alt_column: log_margin(a + c, "alt column")?,
            ref_column: log_margin(b + d, "ref column")?,
            non_ref_row: log_margin(a + b, "non-ref row")?,
            ref_row: log_margin(c + d, "ref row")?,
            total: log_margin(a + b + c + d, "total")?,
        })
    }

    pub fn expected(&self) -> ArtifactResult<ExpectedCounts> {
        let m = self.log_margins()?;
        Ok(ExpectedCounts {
            alt_non_ref: (m.alt_column + m.non_ref_row - m.total).exp(),
            ref_non_ref: (m.ref_column + m.non_ref_row - m.total).exp(),
            alt_ref: (m.alt_column + m.ref_row - m.total).exp(),
            ref_ref: (m.ref_column + m.ref_row - m.total).exp(),
        })
    }

    /// Any empty row or column
    pub fn is_degenerate(&self) -> bool {
        self.alt_non_ref + self.alt_ref == 0
            || self.ref_non_ref + self.ref_ref == 0
            || self.alt_non_ref + self.ref_non_ref == 0
            || self.alt_ref + self.ref_ref == 0
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct SideCounts {
    ref_bp: u32,
    non_ref_bp: u32,
    soft_clipped_bp: u32,
}

/// Observed counts for one sample at one candidate mutation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ContingencyTable {
    pub alt_non_ref_bp_count: u32,
    pub alt_ref_bp_count: u32,
    pub ref_non_ref_bp_count: u32,
    pub ref_ref_bp_count: u32,
    pub alt_soft_clipped_bp_count: u32,
    pub ref_soft_clipped_bp_count: u32,
    pub alt_overlapping_aligned_segment_count: u32,
    pub ref_overlapping_aligned_segment_count: u32,
}

/// Non-reference base pairs a read contributes at one locus. Deleted bases
/// and soft clips contribute nothing here.
pub fn non_ref_length(evidence: &BaseCallEvidence, ref_base: char, binarize: bool) -> u32 {
    match evidence.kind {
        CallKind::Deletion | CallKind::SoftClipped(_) | CallKind::Other => 0,
        _ => {
            let indel = match evidence.indel {
                0 => 0,
                _ if binarize => 1,
                n => n.unsigned_abs(),
            };
            indel + evidence.mismatches(ref_base) as u32
        }
    }
}

fn count_side(
    window: &WindowIndex,
    mask: &PositionMask,
    ref_alleles: &BTreeMap<Locus, char>,
    names: &BTreeSet<String>,
    binarize: bool,
) -> SideCounts {
    let mut counts = SideCounts::default();
    let mut clip_events: HashSet<(&str, ClipSide)> = HashSet::new();

    for (locus, column) in window.columns() {
        if mask.is_masked(locus) {
            continue;
        }
        let Some(&ref_base) = ref_alleles.get(locus) else {
            continue;
        };

        for (name, evidence) in column.reads.iter().filter(|(n, _)| names.contains(*n)) {
            if evidence.is_ref() {
                counts.ref_bp += 1;
            }
            counts.non_ref_bp += non_ref_length(evidence, ref_base, binarize);

            if let CallKind::SoftClipped(side) = evidence.kind {
                if clip_events.insert((name.as_str(), side)) {
                    counts.soft_clipped_bp += if binarize { 1 } else { evidence.soft_clip_length };
                }
            }
        }
    }

    counts
}

impl ContingencyTable {
    /// Walk the unmasked window loci once per support set
    pub fn build(
        window: &WindowIndex,
        mask: &PositionMask,
        ref_alleles: &BTreeMap<Locus, char>,
        sets: &ReadSupportSets,
        config: &ArtifactConfig,
    ) -> Self {
        let alt = count_side(window, mask, ref_alleles, &sets.alt_supporting, config.binarize_lengths);
        let reference = count_side(window, mask, ref_alleles, &sets.ref_supporting, config.binarize_lengths);

        Self {
            alt_non_ref_bp_count: alt.non_ref_bp,
            alt_ref_bp_count: alt.ref_bp,
            ref_non_ref_bp_count: reference.non_ref_bp,
            ref_ref_bp_count: reference.ref_bp,
            alt_soft_clipped_bp_count: alt.soft_clipped_bp,
            ref_soft_clipped_bp_count: reference.soft_clipped_bp,
            alt_overlapping_aligned_segment_count: sets.alt_overlapping_aligned_segment_count,
            ref_overlapping_aligned_segment_count: sets.ref_overlapping_aligned_segment_count,
        }
    }

    pub fn alt_non_ref_soft_clipped_bp_count(&self) -> u32 {
        self.alt_non_ref_bp_count + self.alt_soft_clipped_bp_count
    }

    pub fn alt_ref_soft_clipped_bp_count(&self) -> u32 {
        self.alt_ref_bp_count
    }

    pub fn ref_non_ref_soft_clipped_bp_count(&self) -> u32 {
        self.ref_non_ref_bp_count + self.ref_soft_clipped_bp_count
    }

    pub fn ref_ref_soft_clipped_bp_count(&self) -> u32 {
        self.ref_ref_bp_count
    }

    pub fn raw(&self) -> Cells {
        Cells {
            alt_non_ref: self.alt_non_ref_bp_count,
            ref_non_ref: self.ref_non_ref_bp_count,
            alt_ref: self.alt_ref_bp_count,
            ref_ref: self.ref_ref_bp_count,
        }
    }

    /// Soft clips folded into the non-reference row
    pub fn soft_clipped(&self) -> Cells {
        Cells {
            alt_non_ref: self.alt_non_ref_soft_clipped_bp_count(),
            ref_non_ref: self.ref_non_ref_soft_clipped_bp_count(),
            alt_ref: self.alt_ref_soft_clipped_bp_count(),
            ref_ref: self.ref_ref_soft_clipped_bp_count(),
        }
    }
}
