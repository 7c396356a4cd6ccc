use std::path::Path;

use crate::ani_clustering::{self, AniClusterMethod, AniClusterOptions};
use crate::delta::AniRecord;
use crate::genomes::GenomeRecord;
use crate::mash::SketchDistance;
use crate::mash_clustering::{self, PreclusterMethod, PreclusterOptions};
use crate::nucmer::AlignmentSchedulerOptions;
use crate::PipelineError;

/// Everything a clustering run needs, validated once up front so that no
/// sketching or alignment work happens on a bad configuration.
#[derive(Debug, Clone, Copy)]
pub struct ClusterOptions {
    pub precluster: PreclusterOptions,
    pub ani: AniClusterOptions,
    pub scheduler: AlignmentSchedulerOptions,
}

impl ClusterOptions {
    pub fn validate(&self) -> Result<(), PipelineError> {
        if let AniClusterMethod::Skip = self.ani.method {
            return Err(PipelineError::Unimplemented(
                "Sorry, clustering without the nucmer ANI stage has not been written yet".to_string(),
            ));
        }
        if self.scheduler.threads == 0 {
            return Err(PipelineError::Configuration(
                "The number of threads must be at least 1".to_string(),
            ));
        }
        if self.precluster.sketch_size == 0 {
            return Err(PipelineError::Configuration(
                "The mash sketch size must be at least 1".to_string(),
            ));
        }
        match self.precluster.method {
            PreclusterMethod::Skip => {}
            PreclusterMethod::SimpleGraph { min_ani } => {
                check_fraction("precluster ANI", min_ani)?;
            }
            PreclusterMethod::Hierarchical { cutoff, .. } => {
                check_fraction("precluster linkage cutoff", cutoff)?;
            }
        }
        match self.ani.method {
            AniClusterMethod::Skip => unreachable!(),
            AniClusterMethod::SimpleGraph { min_ani } => {
                check_fraction("ANI", min_ani)?;
            }
            AniClusterMethod::Hierarchical { cutoff, .. } => {
                check_fraction("cluster linkage cutoff", cutoff)?;
            }
        }
        check_fraction("minimum aligned fraction", self.ani.min_aligned_fraction)?;
        Ok(())
    }
}

fn check_fraction(name: &str, value: f64) -> Result<(), PipelineError> {
    if !(0.0..=1.0).contains(&value) {
        return Err(PipelineError::Configuration(format!(
            "The {} must be between 0 and 1, found {}",
            name, value
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenomeAssignment {
    pub genome: String,
    pub precluster: usize,
    /// "<precluster>_<cluster>", absent after a dry run.
    pub ani_cluster: Option<String>,
}

/// The tables a clustering run reports. Assignments are in input genome
/// order, comparisons carry the precluster they were made within.
pub struct ClusteringTables {
    pub assignments: Vec<GenomeAssignment>,
    pub mash_distances: Vec<SketchDistance>,
    pub ani_comparisons: Vec<(usize, AniRecord)>,
}

/// Run the two clustering stages and merge their assignments. Intermediate
/// files go under `data_folder`: mash sketches in mash/, delta files in
/// ani/<precluster>/, linkage trees in linkage/.
pub fn cluster_genomes(
    genomes: &[GenomeRecord],
    data_folder: &Path,
    options: &ClusterOptions,
) -> Result<ClusteringTables, PipelineError> {
    options.validate()?;

    let mash_folder = data_folder.join("mash");
    let ani_folder = data_folder.join("ani");
    let linkage_folder = data_folder.join("linkage");
    for folder in [&mash_folder, &ani_folder, &linkage_folder] {
        std::fs::create_dir_all(folder)?;
    }

    let precluster_result = mash_clustering::precluster_genomes(
        genomes,
        &mash_folder,
        &linkage_folder,
        &options.precluster,
    )?;

    let fine_result = ani_clustering::cluster_within_preclusters(
        genomes,
        &precluster_result.assignments,
        &ani_folder,
        &linkage_folder,
        &options.ani,
        &options.scheduler,
    )?;

    let assignments = genomes
        .iter()
        .enumerate()
        .map(|(genome_index, genome)| GenomeAssignment {
            genome: genome.name.clone(),
            precluster: precluster_result.assignments[genome_index],
            ani_cluster: fine_result.labels[genome_index].clone(),
        })
        .collect();

    Ok(ClusteringTables {
        assignments,
        mash_distances: precluster_result.distances,
        ani_comparisons: fine_result.ani_records,
    })
}
