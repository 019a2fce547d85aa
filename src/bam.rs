//! htslib-backed pileup and reference providers

use crate::pileup::{
    pile_up, AlignedSegment, CigarOp, PileupColumn, PileupProvider, ReferenceProvider, DEFAULT_MAX_DEPTH,
};
use crate::{ArtifactError, ArtifactResult};
use rust_htslib::bam::record::{Aux, Cigar, Record};
use rust_htslib::bam::{IndexedReader, Read};
use rust_htslib::faidx;
use std::path::{Path, PathBuf};
use std::sync::Arc;

fn cigar_op(cigar: &Cigar) -> (CigarOp, u32) {
    match *cigar {
        Cigar::Match(n) => (CigarOp::Match, n),
        Cigar::Ins(n) => (CigarOp::Insertion, n),
        Cigar::Del(n) => (CigarOp::Deletion, n),
        Cigar::RefSkip(n) => (CigarOp::RefSkip, n),
        Cigar::SoftClip(n) => (CigarOp::SoftClip, n),
        Cigar::HardClip(n) => (CigarOp::HardClip, n),
        Cigar::Pad(n) => (CigarOp::Padding, n),
        Cigar::Equal(n) => (CigarOp::Equal, n),
        Cigar::Diff(n) => (CigarOp::Diff, n),
    }
}

/// Integer value of the `NM` tag, whatever width it was stored with
fn edit_distance(record: &Record) -> Option<i64> {
    match record.aux(b"NM") {
        Ok(Aux::U8(v)) => Some(v as i64),
        Ok(Aux::I8(v)) => Some(v as i64),
        Ok(Aux::U16(v)) => Some(v as i64),
        Ok(Aux::I16(v)) => Some(v as i64),
        Ok(Aux::U32(v)) => Some(v as i64),
        Ok(Aux::I32(v)) => Some(v as i64),
        _ => None,
    }
}

/// Convert a record into a segment, skipping the reads a default pileup
/// ignores: unmapped, secondary, QC-failed and duplicates
pub fn segment_from_record(record: &Record) -> Option<AlignedSegment> {
    if record.is_unmapped() || record.is_secondary() || record.is_quality_check_failed() || record.is_duplicate() {
        return None;
    }
    let start = u64::try_from(record.pos()).ok()?;
    let name = String::from_utf8_lossy(record.qname()).to_string();
    let cigar: Vec<(CigarOp, u32)> = record.cigar().iter().map(cigar_op).collect();

    let segment = AlignedSegment::from_cigar(&name, start, cigar, record.seq().as_bytes());
    Some(match edit_distance(record) {
        Some(nm) => segment.with_tag("NM", nm),
        None => segment,
    })
}

/// Locate the `.bai` index next to a BAM file
pub fn find_bam_index(bam_path: &Path) -> ArtifactResult<PathBuf> {
    let bai_path = bam_path.with_extension("bam.bai");
    let alt_bai_path = bam_path.with_extension("bai");

    if bai_path.exists() {
        Ok(bai_path)
    } else if alt_bai_path.exists() {
        Ok(alt_bai_path)
    } else {
        Err(ArtifactError::FileNotFound(format!(
            "BAM index file not found. Expected {} or {}",
            bai_path.display(),
            alt_bai_path.display()
        )))
    }
}

/// Pileups over an indexed BAM file
pub struct BamPileup {
    reader: IndexedReader,
    max_depth: usize,
}

impl BamPileup {
    pub fn new<P: AsRef<Path>>(bam_path: P) -> ArtifactResult<Self> {
        let bam_path = bam_path.as_ref();
        let index_path = find_bam_index(bam_path)?;
        let reader = IndexedReader::from_path_and_index(bam_path, &index_path)?;
        Ok(BamPileup {
            reader,
            max_depth: DEFAULT_MAX_DEPTH,
        })
    }

    /// Cap on the reads kept per pileup column
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    fn segments(&mut self, chrom: &str, start: u64, end: u64) -> ArtifactResult<Vec<Arc<AlignedSegment>>> {
        let tid = self
            .reader
            .header()
            .tid(chrom.as_bytes())
            .ok_or_else(|| ArtifactError::UnknownContig(chrom.to_string()))?;
        self.reader.fetch((tid, start as i64, end as i64))?;

        let mut segments = Vec::new();
        for result in self.reader.records() {
            let record = result?;
            if let Some(segment) = segment_from_record(&record) {
                segments.push(Arc::new(segment));
            }
        }
        Ok(segments)
    }
}

impl PileupProvider for BamPileup {
    fn pileup(
        &mut self,
        chrom: &str,
        start: u64,
        end: u64,
        truncate: bool,
    ) -> ArtifactResult<Vec<PileupColumn>> {
        let segments = self.segments(chrom, start, end)?;
        Ok(pile_up(&segments, start, end, truncate, self.max_depth))
    }
}

/// Reference bases from an indexed FASTA file
pub struct FastaReference {
    reader: faidx::Reader,
}

impl FastaReference {
    pub fn new<P: AsRef<Path>>(fasta_path: P) -> ArtifactResult<Self> {
        let reader = faidx::Reader::from_path(fasta_path.as_ref())?;
        Ok(FastaReference { reader })
    }
}

impl ReferenceProvider for FastaReference {
    fn fetch(&mut self, chrom: &str, start: u64, end: u64) -> ArtifactResult<String> {
        if end <= start {
            return Ok(String::new());
        }
        // faidx takes an inclusive end
        Ok(self
            .reader
            .fetch_seq_string(chrom, start as usize, (end - 1) as usize)?)
    }
}
