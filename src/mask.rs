//! Loci excluded from contingency-table aggregation

use crate::window::WindowIndex;
use crate::{ArtifactConfig, ArtifactError, ArtifactResult, Locus, SomaticMutation};
use statrs::distribution::{Binomial, DiscreteCDF};
use std::collections::BTreeMap;

/// `true` marks a locus as excluded
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PositionMask {
    mask: BTreeMap<Locus, bool>,
}

/// Whether a control locus with `non_ref` of `total` non-reference reads
/// looks like a heterozygous or homozygous germline site
pub fn is_germline_like(non_ref: u64, total: u64, config: &ArtifactConfig) -> ArtifactResult<bool> {
    if non_ref == 0 {
        return Ok(false);
    }
    let binomial = Binomial::new(config.germline_alt_fraction, total)
        .map_err(|e| ArtifactError::InvalidConfig(format!("germline binomial: {}", e)))?;
    Ok(binomial.cdf(non_ref) > config.germline_significance)
}

impl PositionMask {
    /// Germline mode: mask window loci whose non-reference burden is not
    /// improbably low under the germline alt fraction
    pub fn build_germline(window: &WindowIndex, config: &ArtifactConfig) -> ArtifactResult<Self> {
        let mut mask = BTreeMap::new();
        for (locus, column) in window.columns() {
            let non_ref = column.reads.values().filter(|e| e.is_non_ref()).count() as u64;
            let reference = column.reads.values().filter(|e| e.is_ref()).count() as u64;
            let masked = is_germline_like(non_ref, non_ref + reference, config)?;
            mask.insert(locus.clone(), masked);
        }
        Ok(Self { mask })
    }

    /// Somatic mode: mask every base of the nearby called mutations, leave the rest of the window open
    pub fn build_somatic<'a>(
        loci: impl IntoIterator<Item = &'a Locus>,
        nearby: &[SomaticMutation],
    ) -> Self {
        let mut mask: BTreeMap<Locus, bool> = loci.into_iter().map(|l| (l.clone(), false)).collect();
        for mutation in nearby {
            for base in mutation.locus().bases() {
                mask.insert(base, true);
            }
        }
        Self { mask }
    }

    /// Loci present in both masks, masked when either masks them
    pub fn intersect(&self, other: &PositionMask) -> PositionMask {
        let mask = self
            .mask
            .iter()
            .filter_map(|(locus, &masked)| {
                other
                    .mask
                    .get(locus)
                    .map(|&other_masked| (locus.clone(), masked || other_masked))
            })
            .collect();
        PositionMask { mask }
    }

    pub fn get(&self, locus: &Locus) -> Option<bool> {
        self.mask.get(locus).copied()
    }

    /// Absent loci count as masked
    pub fn is_masked(&self, locus: &Locus) -> bool {
        self.mask.get(locus).copied().unwrap_or(true)
    }

    pub fn unmasked(&self) -> impl Iterator<Item = &Locus> {
        self.mask.iter().filter(|(_, &m)| !m).map(|(l, _)| l)
    }

    pub fn unmasked_count(&self) -> usize {
        self.unmasked().count()
    }

    pub fn len(&self) -> usize {
        self.mask.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mask.is_empty()
    }
}

impl FromIterator<(Locus, bool)> for PositionMask {
    fn from_iter<I: IntoIterator<Item = (Locus, bool)>>(iter: I) -> Self {
        Self {
            mask: iter.into_iter().collect(),
        }
    }
}
