use std::collections::BTreeMap;
use std::path::Path;

use crate::clustering::{self, ClusteringError};
use crate::genomes::GenomeRecord;
use crate::mash::{self, SketchDistance};
use crate::sorted_pair_ani_cache::SortedPairAniCache;
use crate::PipelineError;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PreclusterMethod {
    /// Place every genome into precluster 0, so the ANI stage compares all
    /// pairs.
    Skip,
    /// Connected components of the graph whose edges are pairs with mash
    /// similarity strictly above `min_ani`.
    SimpleGraph { min_ani: f64 },
    /// Agglomerative clustering of the full mash distance matrix, cut at
    /// `cutoff`.
    Hierarchical {
        linkage_method: kodama::Method,
        cutoff: f64,
    },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PreclusterOptions {
    pub method: PreclusterMethod,
    pub sketch_size: u32,
}

pub struct PreclusterResult {
    /// Precluster id per genome, in input genome order.
    pub assignments: Vec<usize>,
    /// Every mash distance row, for reporting. Empty when preclustering was
    /// skipped.
    pub distances: Vec<SketchDistance>,
}

/// Assign each genome to a precluster using mash sketch distances. The mash
/// sketches and distance table go under `mash_folder`, the linkage tree (for
/// the hierarchical method) under `linkage_folder`.
pub fn precluster_genomes(
    genomes: &[GenomeRecord],
    mash_folder: &Path,
    linkage_folder: &Path,
    options: &PreclusterOptions,
) -> Result<PreclusterResult, PipelineError> {
    if let PreclusterMethod::Skip = options.method {
        info!(
            "Skipping preclustering, all {} genomes will be compared against each other",
            genomes.len()
        );
        return Ok(PreclusterResult {
            assignments: vec![0; genomes.len()],
            distances: vec![],
        });
    }

    let distances = mash::all_vs_all_distances(genomes, mash_folder, options.sketch_size)?;

    let assignments = match options.method {
        PreclusterMethod::Skip => unreachable!(),
        PreclusterMethod::SimpleGraph { min_ani } => {
            simple_graph_preclusters(genomes, &distances, min_ani)?
        }
        PreclusterMethod::Hierarchical {
            linkage_method,
            cutoff,
        } => hierarchical_preclusters(genomes, &distances, linkage_method, cutoff, linkage_folder)?,
    };

    let num_preclusters = assignments
        .iter()
        .collect::<std::collections::BTreeSet<_>>()
        .len();
    info!(
        "Preclustered {} genomes into {} preclusters",
        genomes.len(),
        num_preclusters
    );
    Ok(PreclusterResult {
        assignments,
        distances,
    })
}

fn genome_index_map(genomes: &[GenomeRecord]) -> BTreeMap<&str, usize> {
    genomes
        .iter()
        .enumerate()
        .map(|(i, genome)| (genome.name.as_str(), i))
        .collect()
}

fn simple_graph_preclusters(
    genomes: &[GenomeRecord],
    distances: &[SketchDistance],
    min_ani: f64,
) -> Result<Vec<usize>, PipelineError> {
    let index_of = genome_index_map(genomes);
    let mut linked_pairs = SortedPairAniCache::new();
    for sketch_distance in distances {
        let i = lookup_genome(&index_of, &sketch_distance.genome1)?;
        let j = lookup_genome(&index_of, &sketch_distance.genome2)?;
        if i == j {
            continue;
        }
        let similarity = sketch_distance.similarity();
        if similarity > min_ani {
            trace!(
                "Linking {} and {} with mash similarity {}",
                sketch_distance.genome1,
                sketch_distance.genome2,
                similarity
            );
            linked_pairs.insert((i, j), similarity);
        }
    }
    Ok(clustering::connected_components(
        genomes.len(),
        &linked_pairs,
    ))
}

fn hierarchical_preclusters(
    genomes: &[GenomeRecord],
    distances: &[SketchDistance],
    linkage_method: kodama::Method,
    cutoff: f64,
    linkage_folder: &Path,
) -> Result<Vec<usize>, PipelineError> {
    let mut sorted_names: Vec<String> = genomes.iter().map(|g| g.name.clone()).collect();
    sorted_names.sort_unstable();
    let row_of: BTreeMap<&str, usize> = sorted_names
        .iter()
        .enumerate()
        .map(|(row, name)| (name.as_str(), row))
        .collect();

    let num_genomes = sorted_names.len();
    let mut matrix = vec![vec![f64::NAN; num_genomes]; num_genomes];
    for sketch_distance in distances {
        let i = lookup_genome(&row_of, &sketch_distance.genome1)?;
        let j = lookup_genome(&row_of, &sketch_distance.genome2)?;
        matrix[i][j] = sketch_distance.distance;
    }
    for i in 0..num_genomes {
        for j in 0..num_genomes {
            if matrix[i][j].is_nan() {
                return Err(PipelineError::DataIntegrity(format!(
                    "No mash distance was reported between {} and {}",
                    sorted_names[i], sorted_names[j]
                )));
            }
        }
    }

    let (flat_clusters, tree) =
        match clustering::hierarchical_clusters(&sorted_names, matrix, linkage_method, cutoff) {
            Ok(result) => result,
            Err(ClusteringError::InvalidDistanceMatrix {
                message,
                names,
                matrix,
            }) => {
                let failed_path = linkage_folder.join("failed_mash_distance_matrix.json");
                clustering::persist_failed_matrix(&failed_path, &names, &matrix)?;
                error!(
                    "The mash distance matrix was unusable: {}. It has been written to {} for inspection.",
                    message,
                    failed_path.display()
                );
                return Err(PipelineError::DataIntegrity(message));
            }
        };
    tree.write_json(&linkage_folder.join("mash_linkage.json"))?;

    let input_index = genome_index_map(genomes);
    let mut assignments = vec![0usize; num_genomes];
    for (row, name) in sorted_names.iter().enumerate() {
        assignments[input_index[name.as_str()]] = flat_clusters[row];
    }
    Ok(assignments)
}

fn lookup_genome(index_of: &BTreeMap<&str, usize>, name: &str) -> Result<usize, PipelineError> {
    index_of.get(name).copied().ok_or_else(|| {
        PipelineError::DataIntegrity(format!(
            "Mash reported a distance for {}, which is not an input genome",
            name
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn init() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn record(name: &str) -> GenomeRecord {
        GenomeRecord {
            name: name.to_string(),
            path: format!("/data/{}", name),
            length: 1000,
        }
    }

    fn sketch_distance(genome1: &str, genome2: &str, distance: f64) -> SketchDistance {
        SketchDistance {
            genome1: genome1.to_string(),
            genome2: genome2.to_string(),
            distance,
            p_value: 0.0,
            shared_kmers: "1000/1000".to_string(),
        }
    }

    // Every ordered pair, like an all-vs-all mash dist run reports.
    fn full_table(names: &[&str], pair_distances: &[(&str, &str, f64)]) -> Vec<SketchDistance> {
        let mut rows = vec![];
        for name1 in names {
            for name2 in names {
                if name1 == name2 {
                    rows.push(sketch_distance(name1, name2, 0.0));
                    continue;
                }
                let dist = pair_distances
                    .iter()
                    .find(|(a, b, _)| (a == name1 && b == name2) || (a == name2 && b == name1))
                    .map(|(_, _, d)| *d)
                    .unwrap();
                rows.push(sketch_distance(name1, name2, dist));
            }
        }
        rows
    }

    #[test]
    fn test_skip_places_everything_in_precluster_zero() {
        init();
        let genomes = vec![record("a.fna"), record("b.fna"), record("c.fna")];
        let result = precluster_genomes(
            &genomes,
            Path::new("/nonexistent"),
            Path::new("/nonexistent"),
            &PreclusterOptions {
                method: PreclusterMethod::Skip,
                sketch_size: 1000,
            },
        )
        .unwrap();
        assert_eq!(vec![0, 0, 0], result.assignments);
        assert!(result.distances.is_empty());
    }

    #[test]
    fn test_simple_graph_preclusters() {
        init();
        let genomes = vec![record("a.fna"), record("b.fna"), record("c.fna")];
        let distances = full_table(
            &["a.fna", "b.fna", "c.fna"],
            &[
                ("a.fna", "b.fna", 0.03),
                ("a.fna", "c.fna", 0.5),
                ("b.fna", "c.fna", 0.5),
            ],
        );
        let assignments = simple_graph_preclusters(&genomes, &distances, 0.9).unwrap();
        assert_eq!(vec![0, 0, 1], assignments);
    }

    #[test]
    fn test_simple_graph_threshold_is_strict() {
        init();
        let genomes = vec![record("a.fna"), record("b.fna")];
        // similarity exactly at the threshold does not link
        let distances = full_table(&["a.fna", "b.fna"], &[("a.fna", "b.fna", 0.1)]);
        let assignments = simple_graph_preclusters(&genomes, &distances, 0.9).unwrap();
        assert_eq!(vec![0, 1], assignments);
    }

    #[test]
    fn test_simple_graph_unknown_genome_fails() {
        init();
        let genomes = vec![record("a.fna"), record("b.fna")];
        let mut distances = full_table(&["a.fna", "b.fna"], &[("a.fna", "b.fna", 0.5)]);
        distances.push(sketch_distance("mystery.fna", "a.fna", 0.01));
        match simple_graph_preclusters(&genomes, &distances, 0.9) {
            Err(PipelineError::DataIntegrity(message)) => {
                assert!(message.contains("mystery.fna"));
            }
            other => panic!("Expected a data integrity error, got {:?}", other),
        }
    }

    #[test]
    fn test_hierarchical_preclusters_map_back_to_input_order() {
        init();
        // Input order deliberately differs from sorted name order.
        let genomes = vec![record("c.fna"), record("a.fna"), record("b.fna")];
        let distances = full_table(
            &["a.fna", "b.fna", "c.fna"],
            &[
                ("a.fna", "b.fna", 0.01),
                ("a.fna", "c.fna", 0.3),
                ("b.fna", "c.fna", 0.3),
            ],
        );
        let linkage_folder = tempfile::TempDir::new().unwrap();
        let assignments = hierarchical_preclusters(
            &genomes,
            &distances,
            kodama::Method::Single,
            0.1,
            linkage_folder.path(),
        )
        .unwrap();
        // Sorted rows are a,b,c so a and b form cluster 1, c is cluster 2.
        assert_eq!(vec![2, 1, 1], assignments);
        assert!(linkage_folder.path().join("mash_linkage.json").exists());
    }

    #[test]
    fn test_hierarchical_preclusters_missing_pair_fails() {
        init();
        let genomes = vec![record("a.fna"), record("b.fna")];
        let mut distances = full_table(&["a.fna", "b.fna"], &[("a.fna", "b.fna", 0.01)]);
        distances.retain(|d| !(d.genome1 == "b.fna" && d.genome2 == "a.fna"));
        let linkage_folder = tempfile::TempDir::new().unwrap();
        match hierarchical_preclusters(
            &genomes,
            &distances,
            kodama::Method::Single,
            0.1,
            linkage_folder.path(),
        ) {
            Err(PipelineError::DataIntegrity(message)) => {
                assert!(message.contains("No mash distance was reported"));
            }
            other => panic!("Expected a data integrity error, got {:?}", other),
        }
    }
}
