use std::collections::BTreeSet;
use std::path::Path;

use needletail::parse_fastx_file;
use rayon::prelude::*;

use crate::PipelineError;

/// A genome taking part in dereplication. The length is calculated once at
/// load time and reused for every coverage calculation.
#[derive(Debug, Clone, PartialEq)]
pub struct GenomeRecord {
    /// Base name of the FASTA file, used as the genome identifier throughout.
    pub name: String,
    pub path: String,
    pub length: u64,
}

pub fn genome_name_from_path(path: &str) -> String {
    Path::new(path)
        .file_name()
        .unwrap_or_else(|| panic!("Failed to extract file name from genome path {}", path))
        .to_string_lossy()
        .to_string()
}

/// Total number of bases across all contigs in a FASTA file.
pub fn fasta_length(fasta_path: &str) -> Result<u64, PipelineError> {
    let mut reader = parse_fastx_file(fasta_path).map_err(|e| {
        PipelineError::Configuration(format!(
            "Failed to open genome FASTA file {}: {}",
            fasta_path, e
        ))
    })?;
    let mut length = 0u64;
    while let Some(record) = reader.next() {
        let seqrec = record.map_err(|e| {
            PipelineError::Configuration(format!(
                "Failed to parse genome FASTA file {}: {}",
                fasta_path, e
            ))
        })?;
        length += seqrec.num_bases() as u64;
    }
    Ok(length)
}

/// Read each genome once, recording its name and length. Names must be
/// unique since they key every downstream table, and must not contain the
/// "_vs_" separator used in alignment artifact file names.
pub fn load_genome_records(genome_fasta_paths: &[String]) -> Result<Vec<GenomeRecord>, PipelineError> {
    if genome_fasta_paths.is_empty() {
        return Err(PipelineError::Configuration(
            "No genome FASTA files were provided".to_string(),
        ));
    }

    let records = genome_fasta_paths
        .par_iter()
        .map(|path| {
            let name = genome_name_from_path(path);
            let length = fasta_length(path)?;
            trace!("Genome {} at {} has length {}", name, path, length);
            Ok(GenomeRecord {
                name,
                path: path.clone(),
                length,
            })
        })
        .collect::<Result<Vec<_>, PipelineError>>()?;

    let mut seen_names = BTreeSet::new();
    for record in &records {
        if record.name.contains("_vs_") {
            return Err(PipelineError::Configuration(format!(
                "The genome file name '{}' contains the reserved substring '_vs_'",
                record.name
            )));
        }
        if record.length == 0 {
            return Err(PipelineError::Configuration(format!(
                "The genome {} contains no sequence",
                record.path
            )));
        }
        if !seen_names.insert(record.name.clone()) {
            return Err(PipelineError::Configuration(format!(
                "Two or more input genomes share the file name '{}'",
                record.name
            )));
        }
    }
    debug!("Read in {} genomes", records.len());
    Ok(records)
}
