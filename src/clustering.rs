use std::collections::BTreeMap;
use std::path::Path;

use disjoint::DisjointSetVec;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::sorted_pair_ani_cache::SortedPairAniCache;
use crate::PipelineError;

/// One agglomeration step. Cluster indices < number of observations are
/// leaves; index (observations + k) is the cluster formed at step k.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkageMerge {
    pub cluster1: usize,
    pub cluster2: usize,
    pub distance: f64,
    pub size: usize,
}

/// A persisted dendrogram. Immutable once built - re-cutting at a different
/// cutoff never requires recomputing distances.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkageTree {
    /// Genome names in the row order of the clustered distance matrix.
    pub names: Vec<String>,
    pub merges: Vec<LinkageMerge>,
}

impl LinkageTree {
    pub fn write_json(&self, path: &Path) -> Result<(), PipelineError> {
        let file = std::fs::File::create(path)?;
        serde_json::to_writer(std::io::BufWriter::new(file), self)
            .map_err(|e| PipelineError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?;
        debug!("Wrote linkage tree to {}", path.display());
        Ok(())
    }

    pub fn read_json(path: &Path) -> Result<LinkageTree, PipelineError> {
        let file = std::fs::File::open(path)?;
        serde_json::from_reader(std::io::BufReader::new(file))
            .map_err(|e| PipelineError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))
    }
}

#[derive(Debug, Error)]
pub enum ClusteringError {
    /// The matrix handed to hierarchical clustering was unusable. The names
    /// and matrix are carried so the caller can save them for postmortem
    /// inspection before aborting.
    #[error("{message}")]
    InvalidDistanceMatrix {
        message: String,
        names: Vec<String>,
        matrix: Vec<Vec<f64>>,
    },
}

/// Group genomes into connected components. Each key of `linked_pairs` is an
/// edge between two genome indices; values are ignored here since the caller
/// has already applied its similarity threshold when building the cache.
/// Components are labelled 0,1,2,.. ordered by their smallest member, so a
/// fixed input always yields the same labelling.
pub fn connected_components(num_genomes: usize, linked_pairs: &SortedPairAniCache) -> Vec<usize> {
    let mut sets: DisjointSetVec<usize> = DisjointSetVec::with_capacity(num_genomes);
    for i in 0..num_genomes {
        sets.push(i);
    }
    for (&(i, j), _) in linked_pairs.iter() {
        sets.join(i, j);
    }

    let mut components: Vec<Vec<usize>> = sets
        .indices()
        .sets()
        .iter()
        .map(|component| {
            let mut indices: Vec<_> = component.to_vec();
            indices.sort_unstable();
            indices
        })
        .collect();
    components.sort_unstable_by_key(|component| component[0]);

    let mut assignments = vec![0usize; num_genomes];
    for (label, component) in components.iter().enumerate() {
        for &genome_index in component {
            assignments[genome_index] = label;
        }
    }
    assignments
}

/// Agglomerative clustering of a symmetric square distance matrix, cut at
/// `cutoff` so that no flat cluster contains a merge above it. Returns the
/// 1-based flat labels (in `names` order) together with the linkage tree.
/// The matrix is validated, never repaired: asymmetry, missing values or a
/// nonzero diagonal are data-integrity failures.
pub fn hierarchical_clusters(
    names: &[String],
    matrix: Vec<Vec<f64>>,
    method: kodama::Method,
    cutoff: f64,
) -> Result<(Vec<usize>, LinkageTree), ClusteringError> {
    if let Err(message) = validate_distance_matrix(names, &matrix) {
        return Err(ClusteringError::InvalidDistanceMatrix {
            message,
            names: names.to_vec(),
            matrix,
        });
    }

    let num_genomes = names.len();
    if num_genomes <= 1 {
        let tree = LinkageTree {
            names: names.to_vec(),
            merges: vec![],
        };
        return Ok((vec![1; num_genomes], tree));
    }

    let mut condensed = Vec::with_capacity(num_genomes * (num_genomes - 1) / 2);
    for i in 0..num_genomes {
        for j in (i + 1)..num_genomes {
            condensed.push(matrix[i][j]);
        }
    }
    let dendrogram = kodama::linkage(&mut condensed, num_genomes, method);

    let tree = LinkageTree {
        names: names.to_vec(),
        merges: dendrogram
            .steps()
            .iter()
            .map(|step| LinkageMerge {
                cluster1: step.cluster1,
                cluster2: step.cluster2,
                distance: step.dissimilarity,
                size: step.size,
            })
            .collect(),
    };
    let assignments = cut_linkage_tree(&tree, cutoff);
    Ok((assignments, tree))
}

/// Flatten a linkage tree at `cutoff`: a flat cluster is the largest subtree
/// whose merges all sit at or below the cutoff. Cutting on the subtree
/// maximum rather than each node's own height keeps the criterion correct
/// for non-monotonic methods such as centroid. Labels are 1-based in order
/// of first appearance along the leaves.
pub fn cut_linkage_tree(tree: &LinkageTree, cutoff: f64) -> Vec<usize> {
    let num_leaves = tree.names.len();
    if num_leaves == 0 {
        return vec![];
    }
    let num_nodes = num_leaves + tree.merges.len();

    let mut max_height = vec![0.0f64; num_nodes];
    for (k, merge) in tree.merges.iter().enumerate() {
        max_height[num_leaves + k] = merge
            .distance
            .max(max_height[merge.cluster1])
            .max(max_height[merge.cluster2]);
    }

    let mut membership: Vec<Option<usize>> = vec![None; num_nodes];
    let mut num_groups = 0;
    for (k, merge) in tree.merges.iter().enumerate().rev() {
        let node = num_leaves + k;
        if max_height[node] <= cutoff {
            if membership[node].is_none() {
                membership[node] = Some(num_groups);
                num_groups += 1;
            }
            membership[merge.cluster1] = membership[node];
            membership[merge.cluster2] = membership[node];
        }
    }

    // Leaves never reached by a qualifying merge are singletons.
    let mut raw_groups = Vec::with_capacity(num_leaves);
    for leaf_membership in membership.into_iter().take(num_leaves) {
        match leaf_membership {
            Some(group) => raw_groups.push(group),
            None => {
                raw_groups.push(num_groups);
                num_groups += 1;
            }
        }
    }

    let mut relabel: BTreeMap<usize, usize> = BTreeMap::new();
    let mut next_label = 1usize;
    let mut assignments = Vec::with_capacity(num_leaves);
    for group in raw_groups {
        let label = *relabel.entry(group).or_insert_with(|| {
            let label = next_label;
            next_label += 1;
            label
        });
        assignments.push(label);
    }
    assignments
}

/// Save the names and matrix of a failed clustering attempt for inspection.
pub fn persist_failed_matrix(
    path: &Path,
    names: &[String],
    matrix: &[Vec<f64>],
) -> Result<(), PipelineError> {
    #[derive(Serialize)]
    struct FailedMatrix<'a> {
        names: &'a [String],
        matrix: &'a [Vec<f64>],
    }
    let file = std::fs::File::create(path)?;
    serde_json::to_writer(
        std::io::BufWriter::new(file),
        &FailedMatrix { names, matrix },
    )
    .map_err(|e| PipelineError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?;
    Ok(())
}

fn validate_distance_matrix(names: &[String], matrix: &[Vec<f64>]) -> Result<(), String> {
    let num_genomes = names.len();
    if matrix.len() != num_genomes {
        return Err(format!(
            "The distance matrix has {} rows but {} genome names were given",
            matrix.len(),
            num_genomes
        ));
    }
    for (i, row) in matrix.iter().enumerate() {
        if row.len() != num_genomes {
            return Err(format!(
                "The distance matrix is not square: row {} has {} entries, expected {}",
                i,
                row.len(),
                num_genomes
            ));
        }
    }
    for i in 0..num_genomes {
        if matrix[i][i] != 0.0 {
            return Err(format!(
                "The distance matrix has a nonzero diagonal entry {} for {}",
                matrix[i][i], names[i]
            ));
        }
        for j in (i + 1)..num_genomes {
            if matrix[i][j].is_nan() || matrix[j][i].is_nan() {
                return Err(format!(
                    "No distance is available between {} and {}",
                    names[i], names[j]
                ));
            }
            if matrix[i][j] != matrix[j][i] {
                return Err(format!(
                    "The distance matrix is not symmetric: d({0},{1}) = {2} but d({1},{0}) = {3}",
                    names[i], names[j], matrix[i][j], matrix[j][i]
                ));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn init() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn names(n: &[&str]) -> Vec<String> {
        n.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_connected_components_three_components() {
        init();
        let mut linked = SortedPairAniCache::new();
        linked.insert((0, 1), 0.95);
        linked.insert((1, 2), 0.99);
        linked.insert((3, 4), 0.92);
        assert_eq!(
            vec![0, 0, 0, 1, 1, 2],
            connected_components(6, &linked)
        );
    }

    #[test]
    fn test_connected_components_no_edges() {
        init();
        let linked = SortedPairAniCache::new();
        assert_eq!(vec![0, 1, 2], connected_components(3, &linked));
    }

    #[test]
    fn test_connected_components_insertion_order_is_irrelevant() {
        init();
        let mut linked1 = SortedPairAniCache::new();
        linked1.insert((0, 1), 0.9);
        linked1.insert((2, 3), 0.9);
        let mut linked2 = SortedPairAniCache::new();
        linked2.insert((3, 2), 0.9);
        linked2.insert((1, 0), 0.9);
        assert_eq!(
            connected_components(4, &linked1),
            connected_components(4, &linked2)
        );
    }

    #[test]
    fn test_connected_components_partition_the_genomes() {
        init();
        let mut linked = SortedPairAniCache::new();
        linked.insert((0, 4), 0.9);
        linked.insert((2, 6), 0.9);
        linked.insert((6, 1), 0.9);
        let assignments = connected_components(7, &linked);
        assert_eq!(7, assignments.len());
        let max_label = *assignments.iter().max().unwrap();
        for label in 0..=max_label {
            assert!(assignments.iter().any(|a| *a == label));
        }
    }

    #[test]
    fn test_hierarchical_single_linkage_two_pairs() {
        init();
        let matrix = vec![
            vec![0.0, 0.005, 0.3, 0.3],
            vec![0.005, 0.0, 0.3, 0.3],
            vec![0.3, 0.3, 0.0, 0.002],
            vec![0.3, 0.3, 0.002, 0.0],
        ];
        let (assignments, tree) = hierarchical_clusters(
            &names(&["a", "b", "c", "d"]),
            matrix,
            kodama::Method::Single,
            0.01,
        )
        .unwrap();
        assert_eq!(vec![1, 1, 2, 2], assignments);
        assert_eq!(3, tree.merges.len());
    }

    #[test]
    fn test_hierarchical_cutoff_extremes() {
        init();
        let matrix = vec![
            vec![0.0, 0.005, 0.3],
            vec![0.005, 0.0, 0.3],
            vec![0.3, 0.3, 0.0],
        ];
        let (all_merged, _) = hierarchical_clusters(
            &names(&["a", "b", "c"]),
            matrix.clone(),
            kodama::Method::Single,
            0.5,
        )
        .unwrap();
        assert_eq!(vec![1, 1, 1], all_merged);

        let (all_separate, _) = hierarchical_clusters(
            &names(&["a", "b", "c"]),
            matrix,
            kodama::Method::Single,
            0.001,
        )
        .unwrap();
        assert_eq!(vec![1, 2, 3], all_separate);
    }

    #[test]
    fn test_hierarchical_complete_linkage() {
        init();
        let matrix = vec![
            vec![0.0, 0.01, 0.2],
            vec![0.01, 0.0, 0.3],
            vec![0.2, 0.3, 0.0],
        ];
        let (assignments, _) = hierarchical_clusters(
            &names(&["a", "b", "c"]),
            matrix,
            kodama::Method::Complete,
            0.25,
        )
        .unwrap();
        assert_eq!(vec![1, 1, 2], assignments);
    }

    #[test]
    fn test_hierarchical_single_genome() {
        init();
        let (assignments, tree) = hierarchical_clusters(
            &names(&["a"]),
            vec![vec![0.0]],
            kodama::Method::Single,
            0.1,
        )
        .unwrap();
        assert_eq!(vec![1], assignments);
        assert!(tree.merges.is_empty());
    }

    #[test]
    fn test_asymmetric_matrix_fails_both_ways() {
        init();
        let matrix = vec![vec![0.0, 0.1], vec![0.2, 0.0]];
        let transpose = vec![vec![0.0, 0.2], vec![0.1, 0.0]];
        for m in [matrix, transpose] {
            match hierarchical_clusters(&names(&["a", "b"]), m, kodama::Method::Single, 0.1) {
                Err(ClusteringError::InvalidDistanceMatrix {
                    message, matrix, ..
                }) => {
                    assert!(message.contains("not symmetric"));
                    assert_eq!(2, matrix.len());
                }
                other => panic!("Expected an invalid matrix error, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_non_square_matrix_fails() {
        init();
        let matrix = vec![vec![0.0, 0.1], vec![0.1, 0.0], vec![0.1, 0.1]];
        assert!(
            hierarchical_clusters(&names(&["a", "b"]), matrix, kodama::Method::Single, 0.1)
                .is_err()
        );
    }

    #[test]
    fn test_missing_distance_fails() {
        init();
        let matrix = vec![vec![0.0, f64::NAN], vec![f64::NAN, 0.0]];
        match hierarchical_clusters(&names(&["a", "b"]), matrix, kodama::Method::Single, 0.1) {
            Err(ClusteringError::InvalidDistanceMatrix { message, .. }) => {
                assert!(message.contains("No distance is available"));
            }
            other => panic!("Expected an invalid matrix error, got {:?}", other),
        }
    }

    #[test]
    fn test_nonzero_diagonal_fails() {
        init();
        let matrix = vec![vec![0.0, 0.1], vec![0.1, 0.5]];
        assert!(
            hierarchical_clusters(&names(&["a", "b"]), matrix, kodama::Method::Single, 0.1)
                .is_err()
        );
    }

    #[test]
    fn test_recut_persisted_tree_matches_fresh_clustering() {
        init();
        let matrix = vec![
            vec![0.0, 0.005, 0.3, 0.3],
            vec![0.005, 0.0, 0.3, 0.3],
            vec![0.3, 0.3, 0.0, 0.002],
            vec![0.3, 0.3, 0.002, 0.0],
        ];
        let genome_names = names(&["a", "b", "c", "d"]);
        let (_, tree) = hierarchical_clusters(
            &genome_names,
            matrix.clone(),
            kodama::Method::Single,
            0.01,
        )
        .unwrap();

        let tree_file = tempfile::Builder::new()
            .suffix(".json")
            .tempfile()
            .unwrap();
        tree.write_json(tree_file.path()).unwrap();
        let reread = LinkageTree::read_json(tree_file.path()).unwrap();
        assert_eq!(tree, reread);

        for cutoff in [0.001, 0.01, 0.5] {
            let (fresh, _) = hierarchical_clusters(
                &genome_names,
                matrix.clone(),
                kodama::Method::Single,
                cutoff,
            )
            .unwrap();
            assert_eq!(fresh, cut_linkage_tree(&reread, cutoff));
        }
    }
}
