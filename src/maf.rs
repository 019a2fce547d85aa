//! Mutation annotation (MAF) and sample table loading

use crate::utils::open_text;
use crate::{ArtifactError, ArtifactResult, SomaticMutation};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

/// Variant classifications analysed unless every classification is requested
pub const CODING_VARIANT_CLASSIFICATIONS: [&str; 9] = [
    "Frame_Shift_Del",
    "Frame_Shift_Ins",
    "Missense_Mutation",
    "Silent",
    "Splice_Site",
    "In_Frame_Ins",
    "In_Frame_Del",
    "Nonsense_Mutation",
    "Start_Codon_Del",
];

/// Autosomes and sex chromosomes, with or without a `chr` prefix
pub fn is_canonical_chromosome(chrom: &str) -> bool {
    let name = chrom.strip_prefix("chr").unwrap_or(chrom);
    match name {
        "X" | "Y" => true,
        _ => name
            .parse::<u8>()
            .map(|n| (1..=22).contains(&n) && !name.starts_with('0'))
            .unwrap_or(false),
    }
}

/// Column indices for MAF parsing
#[derive(Debug, Clone)]
pub struct MafColumnIndices {
    pub chromosome: usize,
    pub start: usize,
    pub end: usize,
    pub reference: usize,
    pub tumor_allele: usize,
    pub variant_type: usize,
    pub variant_classification: usize,
    pub tumor_barcode: usize,
    pub normal_barcode: usize,
}

fn find_column(fields: &[&str], name: &str) -> ArtifactResult<usize> {
    fields
        .iter()
        .position(|col| col.trim().eq_ignore_ascii_case(name))
        .ok_or_else(|| ArtifactError::InvalidMutation(format!("{} column not found in MAF header", name)))
}

impl MafColumnIndices {
    pub fn from_header(fields: &[&str]) -> ArtifactResult<Self> {
        Ok(MafColumnIndices {
            chromosome: find_column(fields, "Chromosome")?,
            start: find_column(fields, "Start_position")?,
            end: find_column(fields, "End_position")?,
            reference: find_column(fields, "Reference_Allele")?,
            tumor_allele: find_column(fields, "Tumor_Seq_Allele2")?,
            variant_type: find_column(fields, "Variant_Type")?,
            variant_classification: find_column(fields, "Variant_Classification")?,
            tumor_barcode: find_column(fields, "Tumor_Sample_Barcode")?,
            normal_barcode: find_column(fields, "Matched_Norm_Sample_Barcode")?,
        })
    }
}

/// One MAF row, before filtering
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MafRecord {
    pub mutation: SomaticMutation,
    pub variant_type: String,
    pub variant_classification: String,
}

impl MafRecord {
    pub fn from_record(record: &csv::StringRecord, indices: &MafColumnIndices) -> ArtifactResult<Self> {
        let field = |i: usize| -> ArtifactResult<&str> {
            record.get(i).map(str::trim).ok_or_else(|| {
                ArtifactError::InvalidMutation(format!(
                    "not enough columns on line {}",
                    record.position().map(|p| p.line()).unwrap_or(0)
                ))
            })
        };
        let position = |i: usize| -> ArtifactResult<u64> {
            let value = field(i)?;
            value
                .parse::<u64>()
                .map_err(|_| ArtifactError::InvalidMutation(format!("Invalid position: {}", value)))
        };

        let start = position(indices.start)?;
        if start == 0 {
            return Err(ArtifactError::InvalidMutation("Start_position must be 1-based".to_string()));
        }

        let mutation = SomaticMutation::new(
            field(indices.chromosome)?.to_string(),
            start - 1,
            position(indices.end)?,
            field(indices.reference)?.to_string(),
            field(indices.tumor_allele)?.to_string(),
            field(indices.tumor_barcode)?.to_string(),
            field(indices.normal_barcode)?.to_string(),
        );

        Ok(MafRecord {
            mutation,
            variant_type: field(indices.variant_type)?.to_string(),
            variant_classification: field(indices.variant_classification)?.to_string(),
        })
    }

    /// SNPs on canonical chromosomes, coding only unless `all_variants`
    pub fn passes_filters(&self, all_variants: bool) -> bool {
        self.variant_type == "SNP"
            && is_canonical_chromosome(&self.mutation.chrom)
            && (all_variants || CODING_VARIANT_CLASSIFICATIONS.contains(&self.variant_classification.as_str()))
    }
}

/// Read every MAF row. `#` lines are comments; gzip input is detected from content.
pub fn read_maf<P: AsRef<Path>>(path: P) -> ArtifactResult<Vec<MafRecord>> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .comment(Some(b'#'))
        .flexible(true)
        .quoting(false)
        .from_reader(open_text(&path)?);

    let headers = reader.headers()?.clone();
    let header_fields: Vec<&str> = headers.iter().collect();
    let indices = MafColumnIndices::from_header(&header_fields)?;

    let mut records = Vec::new();
    for result in reader.records() {
        let record = result?;
        if record.iter().all(|f| f.trim().is_empty()) {
            continue;
        }
        records.push(MafRecord::from_record(&record, &indices)?);
    }
    Ok(records)
}

/// Filtered mutations, stably sorted by tumor then normal barcode
pub fn load_mutations<P: AsRef<Path>>(path: P, all_variants: bool) -> ArtifactResult<Vec<SomaticMutation>> {
    let records = read_maf(&path)?;
    let total = records.len();

    let mut mutations: Vec<SomaticMutation> = records
        .into_iter()
        .filter(|r| r.passes_filters(all_variants))
        .map(|r| r.mutation)
        .collect();
    mutations.sort_by(|a, b| {
        (&a.case_sample_id, &a.control_sample_id).cmp(&(&b.case_sample_id, &b.control_sample_id))
    });

    log::info!(
        "Loaded {} mutations from {} ({} filtered out)",
        mutations.len(),
        path.as_ref().display(),
        total - mutations.len()
    );
    Ok(mutations)
}

#[derive(Debug, Clone, Deserialize)]
struct SampleRow {
    sample_id: String,
    clean_bam_file_capture: String,
}

/// Sample barcode to BAM path
pub fn read_sample_table<P: AsRef<Path>>(path: P) -> ArtifactResult<HashMap<String, String>> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .from_reader(open_text(&path)?);

    let mut samples = HashMap::new();
    for result in reader.deserialize() {
        let row: SampleRow = result?;
        samples.entry(row.sample_id).or_insert(row.clean_bam_file_capture);
    }
    Ok(samples)
}

/// Mutations of one tumor/normal pair, with the BAMs to read them from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SamplePairGroup {
    pub case_sample_id: String,
    pub control_sample_id: String,
    pub case_bam: String,
    pub control_bam: String,
    pub mutations: Vec<SomaticMutation>,
}

/// Group sorted mutations by sample pair. Pairs with a barcode missing from
/// `samples` are dropped.
pub fn group_by_sample_pair(
    mutations: Vec<SomaticMutation>,
    samples: &HashMap<String, String>,
) -> Vec<SamplePairGroup> {
    let mut groups: Vec<SamplePairGroup> = Vec::new();

    for mutation in mutations {
        let (Some(case_bam), Some(control_bam)) = (
            samples.get(&mutation.case_sample_id),
            samples.get(&mutation.control_sample_id),
        ) else {
            log::debug!(
                "Dropping {} ({}/{}): sample not in table",
                mutation.locus(),
                mutation.case_sample_id,
                mutation.control_sample_id
            );
            continue;
        };

        match groups.last_mut() {
            Some(group)
                if group.case_sample_id == mutation.case_sample_id
                    && group.control_sample_id == mutation.control_sample_id =>
            {
                group.mutations.push(mutation);
            }
            _ => groups.push(SamplePairGroup {
                case_sample_id: mutation.case_sample_id.clone(),
                control_sample_id: mutation.control_sample_id.clone(),
                case_bam: case_bam.clone(),
                control_bam: control_bam.clone(),
                mutations: vec![mutation],
            }),
        }
    }

    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const HEADER: &str = "Hugo_Symbol\tChromosome\tStart_Position\tEnd_Position\tReference_Allele\tTumor_Seq_Allele1\tTumor_Seq_Allele2\tVariant_Type\tVariant_Classification\tTumor_Sample_Barcode\tMatched_Norm_Sample_Barcode";

    fn maf_content() -> String {
        let rows = [
            "TP53\t17\t7577121\t7577121\tG\tG\tA\tSNP\tMissense_Mutation\tT2\tN2",
            "KRAS\t12\t25398284\t25398284\tC\tC\tT\tSNP\tMissense_Mutation\tT1\tN1",
            "EGFR\t7\t55242465\t55242479\tGGAATTAAGAGAAGC\tGGAATTAAGAGAAGC\t-\tDEL\tIn_Frame_Del\tT1\tN1",
            "INTR\tchr1\t1000\t1000\tA\tA\tC\tSNP\tIntron\tT1\tN1",
            "ALT\tGL000220.1\t500\t500\tA\tA\tC\tSNP\tSilent\tT1\tN1",
            "BRAF\tchr7\t140453136\t140453136\tA\tA\tT\tSNP\tMissense_Mutation\tT1\tN1",
        ];
        format!("#version 2.4\n{}\n{}\n", HEADER, rows.join("\n"))
    }

    fn write_maf(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_canonical_chromosomes() {
        assert!(is_canonical_chromosome("1"));
        assert!(is_canonical_chromosome("chr22"));
        assert!(is_canonical_chromosome("chrX"));
        assert!(!is_canonical_chromosome("23"));
        assert!(!is_canonical_chromosome("chrM"));
        assert!(!is_canonical_chromosome("01"));
        assert!(!is_canonical_chromosome("GL000220.1"));
    }

    #[test]
    fn test_read_maf_converts_to_zero_based() {
        let file = write_maf(&maf_content());
        let records = read_maf(file.path()).unwrap();
        assert_eq!(records.len(), 6);

        let tp53 = &records[0].mutation;
        assert_eq!(tp53.chrom, "17");
        assert_eq!(tp53.start, 7577120);
        assert_eq!(tp53.end, 7577121);
        assert_eq!(tp53.one_based_start(), 7577121);
        assert_eq!(tp53.alt_allele, "A");
        assert_eq!(tp53.case_sample_id, "T2");
    }

    #[test]
    fn test_load_mutations_filters_and_sorts() {
        let file = write_maf(&maf_content());
        let mutations = load_mutations(file.path(), false).unwrap();
        let genes: Vec<(&str, &str)> = mutations
            .iter()
            .map(|m| (m.chrom.as_str(), m.case_sample_id.as_str()))
            .collect();
        assert_eq!(genes, vec![("12", "T1"), ("chr7", "T1"), ("17", "T2")]);

        let all = load_mutations(file.path(), true).unwrap();
        assert_eq!(all.len(), 4);
    }

    #[test]
    fn test_gzipped_maf() {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(maf_content().as_bytes()).unwrap();
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(&encoder.finish().unwrap()).unwrap();

        assert_eq!(read_maf(file.path()).unwrap().len(), 6);
    }

    #[test]
    fn test_missing_column() {
        let file = write_maf("Chromosome\tStart_position\n1\t100\n");
        assert!(matches!(read_maf(file.path()), Err(ArtifactError::InvalidMutation(_))));
    }

    #[test]
    fn test_invalid_position() {
        let content = format!("{}\nX\t1\tabc\t1\tA\tA\tC\tSNP\tSilent\tT\tN\n", HEADER);
        let file = write_maf(&content);
        assert!(matches!(read_maf(file.path()), Err(ArtifactError::InvalidMutation(_))));
    }

    #[test]
    fn test_sample_table_and_grouping() {
        let mut table = NamedTempFile::new().unwrap();
        write!(
            table,
            "sample_id\tclean_bam_file_capture\tother\nT1\t/bams/t1.bam\tx\nN1\t/bams/n1.bam\tx\nT2\t/bams/t2.bam\tx\n"
        )
        .unwrap();
        let samples = read_sample_table(table.path()).unwrap();
        assert_eq!(samples["N1"], "/bams/n1.bam");

        let maf = write_maf(&maf_content());
        let mutations = load_mutations(maf.path(), false).unwrap();
        let groups = group_by_sample_pair(mutations, &samples);

        // N2 is not listed, so the T2/N2 pair is dropped
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].case_bam, "/bams/t1.bam");
        assert_eq!(groups[0].control_bam, "/bams/n1.bam");
        assert_eq!(groups[0].mutations.len(), 2);
    }
}
