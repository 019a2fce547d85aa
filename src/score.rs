//! Fisher's exact test scoring of a contingency table

use crate::table::{Cells, ContingencyTable, ExpectedCounts};
use crate::{ArtifactError, ArtifactResult, EPS};
use fishers_exact::fishers_exact;

/// Per-sample output columns, in output order, without the `case_`/`control_` prefix
pub const FIELD_NAMES: [&str; 24] = [
    "alt_non_ref_bp_count",
    "alt_ref_bp_count",
    "expected_alt_non_ref_bp_count",
    "expected_alt_ref_bp_count",
    "alt_non_ref_soft_clipped_bp_count",
    "alt_ref_soft_clipped_bp_count",
    "expected_alt_non_ref_soft_clipped_bp_count",
    "expected_alt_ref_soft_clipped_bp_count",
    "alt_soft_clipped_bp_count",
    "alt_overlapping_aligned_segment_count",
    "ref_non_ref_bp_count",
    "ref_ref_bp_count",
    "expected_ref_non_ref_bp_count",
    "expected_ref_ref_bp_count",
    "ref_non_ref_soft_clipped_bp_count",
    "ref_ref_soft_clipped_bp_count",
    "expected_ref_non_ref_soft_clipped_bp_count",
    "expected_ref_ref_soft_clipped_bp_count",
    "ref_soft_clipped_bp_count",
    "ref_overlapping_aligned_segment_count",
    "log_two_sided",
    "log_greater",
    "clipped_log_two_sided",
    "clipped_log_greater",
];

/// Scores and counts for one sample at one mutation
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreRecord {
    pub table: ContingencyTable,
    pub expected: ExpectedCounts,
    pub expected_soft_clipped: ExpectedCounts,
    pub log_two_sided: f64,
    pub log_greater: f64,
    pub clipped_log_two_sided: f64,
    pub clipped_log_greater: f64,
}

/// Two-sided and "greater" p-values. Tables with an empty margin carry no
/// evidence either way and score 1.
fn fisher_pvalues(cells: &Cells) -> ArtifactResult<(f64, f64)> {
    if cells.is_degenerate() {
        return Ok((1.0, 1.0));
    }
    let result = fishers_exact(&cells.as_array())
        .map_err(|_| ArtifactError::FisherTest(format!("table {:?} is too large", cells.as_array())))?;
    Ok((result.two_tail_pvalue, result.greater_pvalue))
}

/// log10 of an EPS-smoothed p-value, never above 0
pub fn log_pvalue(p: f64) -> ArtifactResult<f64> {
    let value = (p + EPS).log10().min(0.0);
    if value.is_finite() {
        Ok(value)
    } else {
        Err(ArtifactError::NumericalInvariant(format!("log10 of p-value {} is not finite", p)))
    }
}

pub fn score(table: &ContingencyTable) -> ArtifactResult<ScoreRecord> {
    let raw = table.raw();
    let clipped = table.soft_clipped();

    let (two_sided, greater) = fisher_pvalues(&raw)?;
    let (clipped_two_sided, clipped_greater) = fisher_pvalues(&clipped)?;

    Ok(ScoreRecord {
        table: *table,
        expected: raw.expected()?,
        expected_soft_clipped: clipped.expected()?,
        log_two_sided: log_pvalue(two_sided)?,
        log_greater: log_pvalue(greater)?,
        clipped_log_two_sided: log_pvalue(clipped_two_sided)?,
        clipped_log_greater: log_pvalue(clipped_greater)?,
    })
}

impl ScoreRecord {
    pub fn header(prefix: &str) -> Vec<String> {
        FIELD_NAMES.iter().map(|name| format!("{}{}", prefix, name)).collect()
    }

    /// Values in the order of [`FIELD_NAMES`]
    pub fn fields(&self) -> Vec<String> {
        let t = &self.table;
        let (e, c) = (&self.expected, &self.expected_soft_clipped);
        vec![
            t.alt_non_ref_bp_count.to_string(),
            t.alt_ref_bp_count.to_string(),
            e.alt_non_ref.to_string(),
            e.alt_ref.to_string(),
            t.alt_non_ref_soft_clipped_bp_count().to_string(),
            t.alt_ref_soft_clipped_bp_count().to_string(),
            c.alt_non_ref.to_string(),
            c.alt_ref.to_string(),
            t.alt_soft_clipped_bp_count.to_string(),
            t.alt_overlapping_aligned_segment_count.to_string(),
            t.ref_non_ref_bp_count.to_string(),
            t.ref_ref_bp_count.to_string(),
            e.ref_non_ref.to_string(),
            e.ref_ref.to_string(),
            t.ref_non_ref_soft_clipped_bp_count().to_string(),
            t.ref_ref_soft_clipped_bp_count().to_string(),
            c.ref_non_ref.to_string(),
            c.ref_ref.to_string(),
            t.ref_soft_clipped_bp_count.to_string(),
            t.ref_overlapping_aligned_segment_count.to_string(),
            self.log_two_sided.to_string(),
            self.log_greater.to_string(),
            self.clipped_log_two_sided.to_string(),
            self.clipped_log_greater.to_string(),
        ]
    }
}
