pub mod ani_clustering;
pub mod cluster_argument_parsing;
pub mod clustering;
pub mod delta;
pub mod external_command_checker;
pub mod genomes;
pub mod mash;
pub mod mash_clustering;
pub mod nucmer;
pub mod pipeline;
pub mod sorted_pair_ani_cache;

#[macro_use]
extern crate log;
extern crate clap;
extern crate rayon;

use thiserror::Error;

/// Errors which abort a dereplication run. Zero-length alignments are
/// deliberately not errors - they are logged and folded into the metrics as
/// zero identity (see the delta module).
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("Data integrity error: {0}")]
    DataIntegrity(String),
    #[error("Unimplemented: {0}")]
    Unimplemented(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub const DEFAULT_ALIGNED_FRACTION: &str = "50";
pub const DEFAULT_ANI: &str = "99";
pub const DEFAULT_PRECLUSTER_ANI: &str = "90";
pub const DEFAULT_PRECLUSTER_METHOD: &str = "hierarchical";
pub const DEFAULT_CLUSTER_METHOD: &str = "hierarchical";
pub const DEFAULT_LINKAGE_METHOD: &str = "single";
pub const DEFAULT_PRECLUSTER_LINKAGE_CUTOFF: &str = "0.1";
pub const DEFAULT_CLUSTER_LINKAGE_CUTOFF: &str = "0.01";
pub const DEFAULT_SKETCH_SIZE: &str = "1000";
pub const DEFAULT_NUCMER_MIN_CLUSTER: &str = "65";
pub const DEFAULT_NUCMER_MAX_GAP: &str = "90";

pub const AUTHOR: &str =
    "Ben J. Woodcroft, Centre for Microbiome Research, Queensland University of Technology";
