use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use crate::clustering::{self, ClusteringError};
use crate::delta::{self, AniRecord};
use crate::genomes::GenomeRecord;
use crate::nucmer::{self, AlignmentSchedulerOptions};
use crate::sorted_pair_ani_cache::SortedPairAniCache;
use crate::PipelineError;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AniClusterMethod {
    /// Dereplicate on mash preclusters alone. Selectable but not
    /// implemented; see ClusterOptions::validate.
    Skip,
    /// Connected components of the graph whose edges are directional
    /// comparisons with reference coverage strictly above the aligned
    /// fraction threshold and identity strictly above `min_ani`.
    SimpleGraph { min_ani: f64 },
    /// Agglomerative clustering of 1 - averaged identity, cut at `cutoff`.
    Hierarchical {
        linkage_method: kodama::Method,
        cutoff: f64,
    },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AniClusterOptions {
    pub method: AniClusterMethod,
    pub min_aligned_fraction: f64,
}

pub struct FineClusteringResult {
    /// Cluster label per genome in input order, formatted as
    /// "<precluster>_<cluster>". Absent after a dry run.
    pub labels: Vec<Option<String>>,
    /// Every parsed directional comparison tagged with its precluster, for
    /// reporting.
    pub ani_records: Vec<(usize, AniRecord)>,
}

/// Resolve each precluster into ANI clusters by aligning every ordered pair
/// of its members with nucmer. Preclusters are processed one after another,
/// with parallelism inside each alignment batch. Delta files for precluster
/// p go under `ani_folder`/p, linkage trees under `linkage_folder`.
pub fn cluster_within_preclusters(
    genomes: &[GenomeRecord],
    precluster_assignments: &[usize],
    ani_folder: &Path,
    linkage_folder: &Path,
    options: &AniClusterOptions,
    scheduler: &AlignmentSchedulerOptions,
) -> Result<FineClusteringResult, PipelineError> {
    let mut preclusters: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for (genome_index, precluster) in precluster_assignments.iter().enumerate() {
        preclusters
            .entry(*precluster)
            .or_default()
            .push(genome_index);
    }
    info!(
        "Running nucmer ANI clustering within {} preclusters ..",
        preclusters.len()
    );

    let mut labels: Vec<Option<String>> = vec![None; genomes.len()];
    let mut all_ani_records = vec![];

    for (precluster_id, member_indices) in &preclusters {
        if member_indices.len() == 1 {
            debug!(
                "Precluster {} is a singleton, no nucmer comparisons are needed",
                precluster_id
            );
            if !scheduler.dry_run {
                labels[member_indices[0]] = Some(format!("{}_0", precluster_id));
            }
            continue;
        }

        let members: Vec<&GenomeRecord> = member_indices.iter().map(|&i| &genomes[i]).collect();
        let delta_folder = ani_folder.join(format!("{}", precluster_id));
        std::fs::create_dir_all(&delta_folder)?;

        debug!(
            "Aligning the {} members of precluster {}",
            members.len(),
            precluster_id
        );
        let jobs = nucmer::generate_nucmer_jobs(&members, &delta_folder, &scheduler.params);
        nucmer::run_alignment_jobs(&jobs, scheduler.threads, scheduler.dry_run);
        if scheduler.dry_run {
            continue;
        }

        let genome_lengths: BTreeMap<String, u64> = members
            .iter()
            .map(|member| (member.name.clone(), member.length))
            .collect();
        let ani_records = delta::process_delta_dir(&delta_folder, &genome_lengths)?;

        let flat_clusters = cluster_one_precluster(
            &members,
            &ani_records,
            options,
            linkage_folder,
            *precluster_id,
        )?;
        for (member_position, &genome_index) in member_indices.iter().enumerate() {
            labels[genome_index] = Some(format!(
                "{}_{}",
                precluster_id, flat_clusters[member_position]
            ));
        }
        all_ani_records.extend(
            ani_records
                .into_iter()
                .map(|record| (*precluster_id, record)),
        );
    }

    if !scheduler.dry_run {
        let num_clusters = labels.iter().flatten().collect::<BTreeSet<_>>().len();
        info!(
            "Clustered {} genomes into {} ANI clusters",
            genomes.len(),
            num_clusters
        );
    }
    Ok(FineClusteringResult {
        labels,
        ani_records: all_ani_records,
    })
}

/// Flat cluster ids for one precluster's members, in member order.
fn cluster_one_precluster(
    members: &[&GenomeRecord],
    ani_records: &[AniRecord],
    options: &AniClusterOptions,
    linkage_folder: &Path,
    precluster_id: usize,
) -> Result<Vec<usize>, PipelineError> {
    match options.method {
        AniClusterMethod::Skip => Err(PipelineError::Unimplemented(
            "Sorry, clustering without the nucmer ANI stage has not been written yet".to_string(),
        )),
        AniClusterMethod::SimpleGraph { min_ani } => Ok(simple_graph_clusters(
            members,
            ani_records,
            min_ani,
            options.min_aligned_fraction,
        )),
        AniClusterMethod::Hierarchical {
            linkage_method,
            cutoff,
        } => hierarchical_ani_clusters(
            members,
            ani_records,
            linkage_method,
            cutoff,
            options.min_aligned_fraction,
            linkage_folder,
            precluster_id,
        ),
    }
}

fn member_position_map<'a>(members: &[&'a GenomeRecord]) -> BTreeMap<&'a str, usize> {
    members
        .iter()
        .enumerate()
        .map(|(position, member)| (member.name.as_str(), position))
        .collect()
}

fn simple_graph_clusters(
    members: &[&GenomeRecord],
    ani_records: &[AniRecord],
    min_ani: f64,
    min_aligned_fraction: f64,
) -> Vec<usize> {
    let position_of = member_position_map(members);
    let mut linked_pairs = SortedPairAniCache::new();
    for record in ani_records {
        let i = *position_of
            .get(record.query.as_str())
            .expect("Programming error: ANI record names a genome outside its precluster");
        let j = *position_of
            .get(record.reference.as_str())
            .expect("Programming error: ANI record names a genome outside its precluster");
        if i == j {
            continue;
        }
        if record.ref_coverage > min_aligned_fraction && record.ani > min_ani {
            trace!(
                "Linking {} and {} with ANI {} at reference coverage {}",
                record.query,
                record.reference,
                record.ani,
                record.ref_coverage
            );
            linked_pairs.insert((i, j), record.ani);
        }
    }
    clustering::connected_components(members.len(), &linked_pairs)
}

fn hierarchical_ani_clusters(
    members: &[&GenomeRecord],
    ani_records: &[AniRecord],
    linkage_method: kodama::Method,
    cutoff: f64,
    min_aligned_fraction: f64,
    linkage_folder: &Path,
    precluster_id: usize,
) -> Result<Vec<usize>, PipelineError> {
    let mut sorted_names: Vec<String> = members.iter().map(|m| m.name.clone()).collect();
    sorted_names.sort_unstable();
    let row_of: BTreeMap<&str, usize> = sorted_names
        .iter()
        .enumerate()
        .map(|(row, name)| (name.as_str(), row))
        .collect();

    // Directional identities after the coverage gate. A poorly covered
    // alignment is treated as no alignment at all.
    let mut directional: BTreeMap<(usize, usize), f64> = BTreeMap::new();
    for record in ani_records {
        let i = *row_of
            .get(record.query.as_str())
            .expect("Programming error: ANI record names a genome outside its precluster");
        let j = *row_of
            .get(record.reference.as_str())
            .expect("Programming error: ANI record names a genome outside its precluster");
        let gated_ani = if record.alignment_coverage <= min_aligned_fraction {
            0.0
        } else {
            record.ani
        };
        directional.insert((i, j), gated_ani);
    }

    let num_members = sorted_names.len();
    let mut matrix = vec![vec![0.0f64; num_members]; num_members];
    for i in 0..num_members {
        for j in (i + 1)..num_members {
            let forward = directional.get(&(i, j)).copied();
            let reverse = directional.get(&(j, i)).copied();
            if forward.is_none() || reverse.is_none() {
                // A crashed nucmer run leaves no delta file, the same as a
                // pair with nothing alignable would.
                warn!(
                    "No nucmer result between {} and {} in at least one direction, counting the missing direction as identity 0",
                    sorted_names[i], sorted_names[j]
                );
            }
            let average_ani = (forward.unwrap_or(0.0) + reverse.unwrap_or(0.0)) / 2.0;
            let distance = 1.0 - average_ani;
            matrix[i][j] = distance;
            matrix[j][i] = distance;
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
                let failed_path = linkage_folder.join(format!(
                    "failed_ani_distance_matrix_precluster_{}.json",
                    precluster_id
                ));
                clustering::persist_failed_matrix(&failed_path, &names, &matrix)?;
                error!(
                    "The ANI distance matrix for precluster {} was unusable: {}. It has been written to {} for inspection.",
                    precluster_id,
                    message,
                    failed_path.display()
                );
                return Err(PipelineError::DataIntegrity(message));
            }
        };
    tree.write_json(&linkage_folder.join(format!("ani_linkage_cluster_{}.json", precluster_id)))?;

    let position_of = member_position_map(members);
    let mut assignments = vec![0usize; num_members];
    for (row, name) in sorted_names.iter().enumerate() {
        assignments[position_of[name.as_str()]] = flat_clusters[row];
    }
    Ok(assignments)
}
