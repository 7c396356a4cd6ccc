use std::collections::BTreeMap;
use std::io::BufRead;
use std::path::{Path, PathBuf};

use concurrent_queue::ConcurrentQueue;
use rayon::prelude::*;

use crate::PipelineError;

/// Identity and coverage metrics for one ordered genome pair, derived from a
/// single alignment artifact. Directional: (query, reference) and
/// (reference, query) are separate rows with separate values.
#[derive(Debug, Clone, PartialEq)]
pub struct AniRecord {
    pub query: String,
    pub reference: String,
    pub query_length: u64,
    pub reference_length: u64,
    pub alignment_length: u64,
    pub similarity_errors: u64,
    pub ani: f64,
    pub query_coverage: f64,
    pub ref_coverage: f64,
    pub alignment_coverage: f64,
}

/// Sum aligned length and similarity errors over all alignment regions in a
/// nucmer delta file. Header lines ("NUCMER" or sequence lines starting with
/// '>') are skipped; a region line is recognised by having exactly seven
/// whitespace-delimited fields, of which the first two are the reference
/// start/end coordinates and the fifth is the similarity error count.
pub fn parse_delta(path: &Path) -> Result<(u64, u64), PipelineError> {
    let file = std::fs::File::open(path)?;
    let reader = std::io::BufReader::new(file);

    let mut alignment_length = 0u64;
    let mut similarity_errors = 0u64;
    for line_result in reader.lines() {
        let line = line_result?;
        let fields: Vec<&str> = line.split_whitespace().collect();
        match fields.first() {
            None => continue,
            Some(first) => {
                if *first == "NUCMER" || first.starts_with('>') {
                    continue;
                }
            }
        }
        if fields.len() == 7 {
            let start: i64 = parse_coordinate(fields[0], path, &line)?;
            let end: i64 = parse_coordinate(fields[1], path, &line)?;
            let errors: u64 = fields[4].parse().map_err(|_| {
                PipelineError::DataIntegrity(format!(
                    "Failed to parse similarity errors in {} from line '{}'",
                    path.display(),
                    line
                ))
            })?;
            alignment_length += (end - start).unsigned_abs();
            similarity_errors += errors;
        }
    }
    Ok((alignment_length, similarity_errors))
}

fn parse_coordinate(field: &str, path: &Path, line: &str) -> Result<i64, PipelineError> {
    field.parse().map_err(|_| {
        PipelineError::DataIntegrity(format!(
            "Failed to parse alignment coordinate in {} from line '{}'",
            path.display(),
            line
        ))
    })
}

/// Convert a directory of delta files into one AniRecord per ordered pair.
/// File names are expected as <query>_vs_<reference>.delta; files which do
/// not follow that scheme or which name genomes outside `genome_lengths` are
/// skipped, since other runs may leave delta files in shared directories.
/// Pairs without an artifact are simply absent from the result. A zero
/// total alignment length yields identity 0 - a degenerate value, not an
/// error, so a failed or empty alignment isolates rather than aborts.
pub fn process_delta_dir(
    delta_dir: &Path,
    genome_lengths: &BTreeMap<String, u64>,
) -> Result<Vec<AniRecord>, PipelineError> {
    let mut delta_files: Vec<PathBuf> = std::fs::read_dir(delta_dir)?
        .collect::<Result<Vec<_>, _>>()?
        .into_iter()
        .map(|entry| entry.path())
        .filter(|path| path.extension().map(|e| e == "delta").unwrap_or(false))
        .collect();
    delta_files.sort();
    debug!(
        "Found {} delta files in {}",
        delta_files.len(),
        delta_dir.display()
    );

    let queue = ConcurrentQueue::unbounded();
    delta_files
        .par_iter()
        .try_for_each(|path| -> Result<(), PipelineError> {
            let stem = match path.file_stem() {
                Some(stem) => stem.to_string_lossy().to_string(),
                None => return Ok(()),
            };
            let pair: Vec<&str> = stem.split("_vs_").collect();
            if pair.len() != 2 {
                info!(
                    "Skipping delta file {} - name is not <query>_vs_<reference>.delta",
                    path.display()
                );
                return Ok(());
            }
            let (query, reference) = (pair[0], pair[1]);
            let (query_length, reference_length) =
                match (genome_lengths.get(query), genome_lengths.get(reference)) {
                    (Some(q), Some(r)) => (*q, *r),
                    _ => {
                        info!(
                            "Skipping delta file for pair ({}, {}) - one or both are not input genomes",
                            query, reference
                        );
                        return Ok(());
                    }
                };

            let (alignment_length, similarity_errors) = parse_delta(path)?;
            let ani = if alignment_length == 0 {
                warn!(
                    "Total alignment length reported in {} is zero",
                    path.display()
                );
                0.0
            } else {
                1.0 - similarity_errors as f64 / alignment_length as f64
            };
            let record = AniRecord {
                query: query.to_string(),
                reference: reference.to_string(),
                query_length,
                reference_length,
                alignment_length,
                similarity_errors,
                ani,
                query_coverage: alignment_length as f64 / query_length as f64,
                ref_coverage: alignment_length as f64 / reference_length as f64,
                alignment_coverage: 2.0 * alignment_length as f64
                    / (query_length + reference_length) as f64,
            };
            queue
                .push(record)
                .expect("Failed to push ANI record to queue");
            Ok(())
        })?;

    let mut records = vec![];
    while let Ok(record) = queue.pop() {
        records.push(record);
    }
    records.sort_by(|a, b| (&a.query, &a.reference).cmp(&(&b.query, &b.reference)));
    Ok(records)
}
