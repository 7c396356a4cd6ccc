use std::path::Path;

use clap::*;

use bird_tool_utils::clap_utils::{
    add_clap_verbosity_flags, add_genome_specification_arguments,
    parse_list_of_genome_fasta_files, set_log_level,
};

use crate::ani_clustering::{AniClusterMethod, AniClusterOptions};
use crate::clustering::{cut_linkage_tree, LinkageTree};
use crate::external_command_checker;
use crate::genomes::{self, GenomeRecord};
use crate::mash_clustering::{PreclusterMethod, PreclusterOptions};
use crate::nucmer::{nucmer_preset, AlignmentSchedulerOptions, NucmerMethod, NucmerParams};
use crate::pipeline::{self, ClusterOptions, ClusteringTables};
use crate::PipelineError;

pub fn run_cluster_subcommand(matches: &clap::ArgMatches, program_name: &str, version: &str) {
    let m = matches.subcommand_matches("cluster").unwrap();
    set_log_level(m, true, program_name, version);

    let output_directory = m.get_one::<String>("output-directory").unwrap();
    if let Err(e) = check_for_previous_output(Path::new(output_directory), m.get_flag("overwrite"))
    {
        error!("{}", e);
        std::process::exit(1);
    }

    let options = match generate_cluster_options(m) {
        Ok(options) => options,
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };

    if !matches!(options.precluster.method, PreclusterMethod::Skip) {
        external_command_checker::check_for_mash();
    }
    if !options.scheduler.dry_run {
        external_command_checker::check_for_nucmer();
    }

    rayon::ThreadPoolBuilder::new()
        .num_threads(options.scheduler.threads)
        .build_global()
        .expect("Programming error: rayon initialised multiple times");

    let genome_fasta_files: Vec<String> =
        parse_list_of_genome_fasta_files(m, true).expect("Failed to parse genome fasta files");
    info!("Clustering {} genomes ..", genome_fasta_files.len());
    let genomes = match genomes::load_genome_records(&genome_fasta_files) {
        Ok(genomes) => genomes,
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };

    let data_folder = Path::new(output_directory).join("data");
    let tables = match pipeline::cluster_genomes(&genomes, &data_folder, &options) {
        Ok(tables) => tables,
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = write_output_tables(Path::new(output_directory), &tables, &genomes)
        .and_then(|_| write_cluster_arguments(m, Path::new(output_directory)))
    {
        error!("Failed to write output: {}", e);
        std::process::exit(1);
    }
    info!("Finished clustering genomes.");
}

pub fn run_recut_subcommand(matches: &clap::ArgMatches, program_name: &str, version: &str) {
    let m = matches.subcommand_matches("recut").unwrap();
    set_log_level(m, true, program_name, version);

    let tree_path = m.get_one::<String>("linkage-tree").unwrap();
    let cutoff = match parse_f64_arg(m, "cutoff") {
        Ok(cutoff) => cutoff,
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };

    let tree = match LinkageTree::read_json(Path::new(tree_path)) {
        Ok(tree) => tree,
        Err(e) => {
            error!("Failed to read linkage tree from {}: {}", tree_path, e);
            std::process::exit(1);
        }
    };
    info!(
        "Re-cutting a linkage tree over {} genomes at {}",
        tree.names.len(),
        cutoff
    );

    let assignments = cut_linkage_tree(&tree, cutoff);
    for (name, cluster) in tree.names.iter().zip(assignments) {
        println!("{}\t{}", name, cluster);
    }
}

/// Refuse to stomp on a previous run unless --overwrite was given.
fn check_for_previous_output(output_directory: &Path, overwrite: bool) -> Result<(), String> {
    for file in [
        "cluster_assignments.csv",
        "mash_distances.csv",
        "ani_comparisons.csv",
    ] {
        let path = output_directory.join(file);
        if path.exists() {
            if overwrite {
                warn!("Overwriting previous output file {}", path.display());
            } else {
                return Err(format!(
                    "The output file {} already exists. Use --overwrite to replace a previous run's output",
                    path.display()
                ));
            }
        }
    }
    Ok(())
}

fn generate_cluster_options(m: &clap::ArgMatches) -> Result<ClusterOptions, String> {
    let precluster_method = match m.get_one::<String>("precluster-method").unwrap().as_str() {
        "skip" => PreclusterMethod::Skip,
        "simple" => PreclusterMethod::SimpleGraph {
            min_ani: parse_percentage(m, "precluster-ani")?
                .expect("Programming error: --precluster-ani has a default value"),
        },
        "hierarchical" => PreclusterMethod::Hierarchical {
            linkage_method: parse_linkage_method(
                m.get_one::<String>("precluster-linkage-method").unwrap(),
            )?,
            cutoff: parse_f64_arg(m, "precluster-linkage-cutoff")?,
        },
        other => panic!("Unexpectedly found precluster method {}", other),
    };

    let ani_method = match m.get_one::<String>("cluster-method").unwrap().as_str() {
        "skip" => AniClusterMethod::Skip,
        "simple" => AniClusterMethod::SimpleGraph {
            min_ani: parse_percentage(m, "ani")?
                .expect("Programming error: --ani has a default value"),
        },
        "hierarchical" => AniClusterMethod::Hierarchical {
            linkage_method: parse_linkage_method(
                m.get_one::<String>("cluster-linkage-method").unwrap(),
            )?,
            cutoff: parse_f64_arg(m, "cluster-linkage-cutoff")?,
        },
        other => panic!("Unexpectedly found cluster method {}", other),
    };

    let mut nucmer_params = NucmerParams {
        min_cluster: *m.get_one::<u32>("nucmer-min-cluster").unwrap(),
        max_gap: *m.get_one::<u32>("nucmer-max-gap").unwrap(),
        no_extend: m.get_flag("nucmer-noextend"),
        method: parse_nucmer_method(m.get_one::<String>("nucmer-method").unwrap()),
    };
    if let Some(preset) = m.get_one::<String>("nucmer-preset") {
        nucmer_params =
            nucmer_preset(preset).ok_or_else(|| format!("Unknown nucmer preset '{}'", preset))?;
    }

    Ok(ClusterOptions {
        precluster: PreclusterOptions {
            method: precluster_method,
            sketch_size: *m.get_one::<u32>("sketch-size").unwrap(),
        },
        ani: AniClusterOptions {
            method: ani_method,
            min_aligned_fraction: parse_percentage(m, "min-aligned-fraction")?
                .expect("Programming error: --min-aligned-fraction has a default value"),
        },
        scheduler: AlignmentSchedulerOptions {
            params: nucmer_params,
            threads: *m.get_one::<usize>("threads").unwrap(),
            dry_run: m.get_flag("dry-run"),
        },
    })
}

/// Accept a threshold as either a percentage (1-100) or a fraction (0-1).
pub fn parse_percentage(m: &clap::ArgMatches, parameter: &str) -> Result<Option<f64>, String> {
    match m.contains_id(parameter) {
        true => {
            let value = m.get_one::<String>(parameter).unwrap();
            let mut percentage: f64 = match value.parse() {
                Ok(percentage) => percentage,
                Err(_) => {
                    return Err(format!(
                        "Invalid percentage specified for --{}: '{}'",
                        parameter, value
                    ))
                }
            };
            if (1.0..=100.0).contains(&percentage) {
                percentage /= 100.0;
            } else if !(0.0..=100.0).contains(&percentage) {
                error!("Invalid alignment percentage: '{}'", percentage);
                return Err(format!(
                    "Invalid percentage specified for --{}: '{}'",
                    parameter, percentage
                ));
            }
            debug!("Using {} {}%", parameter, percentage * 100.0);
            Ok(Some(percentage))
        }
        false => Ok(None),
    }
}

pub fn parse_linkage_method(method: &str) -> Result<kodama::Method, String> {
    match method {
        "single" => Ok(kodama::Method::Single),
        "complete" => Ok(kodama::Method::Complete),
        "average" => Ok(kodama::Method::Average),
        "weighted" => Ok(kodama::Method::Weighted),
        "ward" => Ok(kodama::Method::Ward),
        "centroid" => Ok(kodama::Method::Centroid),
        "median" => Ok(kodama::Method::Median),
        _ => Err(format!("Unknown linkage method '{}'", method)),
    }
}

fn parse_nucmer_method(method: &str) -> NucmerMethod {
    match method {
        "mum" => NucmerMethod::Mum,
        "mumreference" => NucmerMethod::MumReference,
        "maxmatch" => NucmerMethod::MaxMatch,
        other => panic!("Unexpectedly found nucmer method {}", other),
    }
}

fn parse_f64_arg(m: &clap::ArgMatches, parameter: &str) -> Result<f64, String> {
    let value = m.get_one::<String>(parameter).unwrap();
    value.parse().map_err(|_| {
        format!(
            "Failed to parse --{} value '{}' as a number",
            parameter, value
        )
    })
}

fn write_output_tables(
    output_directory: &Path,
    tables: &ClusteringTables,
    genomes: &[GenomeRecord],
) -> Result<(), PipelineError> {
    let assignments_path = output_directory.join("cluster_assignments.csv");
    let mut writer = csv_writer(&assignments_path)?;
    write_csv_record(&mut writer, ["genome", "precluster", "ani_cluster"])?;
    for assignment in &tables.assignments {
        write_csv_record(
            &mut writer,
            [
                assignment.genome.as_str(),
                &assignment.precluster.to_string(),
                assignment.ani_cluster.as_deref().unwrap_or(""),
            ],
        )?;
    }
    writer.flush()?;
    info!(
        "Wrote genome cluster assignments to {}",
        assignments_path.display()
    );

    if !tables.mash_distances.is_empty() {
        let path = output_directory.join("mash_distances.csv");
        let mut writer = csv_writer(&path)?;
        write_csv_record(
            &mut writer,
            [
                "genome1",
                "genome2",
                "distance",
                "p_value",
                "shared_kmers",
                "similarity",
            ],
        )?;
        for distance in &tables.mash_distances {
            write_csv_record(
                &mut writer,
                [
                    distance.genome1.as_str(),
                    distance.genome2.as_str(),
                    &distance.distance.to_string(),
                    &distance.p_value.to_string(),
                    distance.shared_kmers.as_str(),
                    &distance.similarity().to_string(),
                ],
            )?;
        }
        writer.flush()?;
        info!("Wrote mash distances to {}", path.display());
    }

    if !tables.ani_comparisons.is_empty() {
        let path = output_directory.join("ani_comparisons.csv");
        let mut writer = csv_writer(&path)?;
        write_csv_record(
            &mut writer,
            [
                "query",
                "reference",
                "query_length",
                "reference_length",
                "alignment_length",
                "similarity_errors",
                "ani",
                "query_coverage",
                "ref_coverage",
                "alignment_coverage",
                "precluster",
            ],
        )?;
        for (precluster, record) in &tables.ani_comparisons {
            write_csv_record(
                &mut writer,
                [
                    record.query.as_str(),
                    record.reference.as_str(),
                    &record.query_length.to_string(),
                    &record.reference_length.to_string(),
                    &record.alignment_length.to_string(),
                    &record.similarity_errors.to_string(),
                    &record.ani.to_string(),
                    &record.query_coverage.to_string(),
                    &record.ref_coverage.to_string(),
                    &record.alignment_coverage.to_string(),
                    &precluster.to_string(),
                ],
            )?;
        }
        writer.flush()?;
        info!("Wrote nucmer ANI comparisons to {}", path.display());
    }

    let genomes_path = output_directory.join("genomes.csv");
    let mut writer = csv_writer(&genomes_path)?;
    write_csv_record(&mut writer, ["name", "path", "length"])?;
    for genome in genomes {
        write_csv_record(
            &mut writer,
            [
                genome.name.as_str(),
                genome.path.as_str(),
                &genome.length.to_string(),
            ],
        )?;
    }
    writer.flush()?;
    info!("Wrote genome information to {}", genomes_path.display());

    Ok(())
}

fn csv_writer(path: &Path) -> Result<csv::Writer<std::fs::File>, PipelineError> {
    csv::Writer::from_path(path)
        .map_err(|e| PipelineError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))
}

fn write_csv_record<W: std::io::Write, const N: usize>(
    writer: &mut csv::Writer<W>,
    record: [&str; N],
) -> Result<(), PipelineError> {
    writer
        .write_record(record)
        .map_err(|e| PipelineError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))
}

// A record of the settings a run was made with, alongside its outputs.
fn write_cluster_arguments(
    m: &clap::ArgMatches,
    output_directory: &Path,
) -> Result<(), PipelineError> {
    let arguments = serde_json::json!({
        "precluster_method": m.get_one::<String>("precluster-method").unwrap(),
        "precluster_ani": m.get_one::<String>("precluster-ani").unwrap(),
        "precluster_linkage_method": m.get_one::<String>("precluster-linkage-method").unwrap(),
        "precluster_linkage_cutoff": m.get_one::<String>("precluster-linkage-cutoff").unwrap(),
        "sketch_size": m.get_one::<u32>("sketch-size").unwrap(),
        "cluster_method": m.get_one::<String>("cluster-method").unwrap(),
        "ani": m.get_one::<String>("ani").unwrap(),
        "cluster_linkage_method": m.get_one::<String>("cluster-linkage-method").unwrap(),
        "cluster_linkage_cutoff": m.get_one::<String>("cluster-linkage-cutoff").unwrap(),
        "min_aligned_fraction": m.get_one::<String>("min-aligned-fraction").unwrap(),
        "nucmer_min_cluster": m.get_one::<u32>("nucmer-min-cluster").unwrap(),
        "nucmer_max_gap": m.get_one::<u32>("nucmer-max-gap").unwrap(),
        "nucmer_noextend": m.get_flag("nucmer-noextend"),
        "nucmer_method": m.get_one::<String>("nucmer-method").unwrap(),
        "nucmer_preset": m.get_one::<String>("nucmer-preset"),
        "threads": m.get_one::<usize>("threads").unwrap(),
        "dry_run": m.get_flag("dry-run"),
    });
    let path = output_directory.join("cluster_arguments.json");
    std::fs::write(&path, serde_json::to_string_pretty(&arguments).unwrap())?;
    debug!("Logged clustering arguments to {}", path.display());
    Ok(())
}

pub fn add_cluster_subcommand(app: clap::Command) -> clap::Command {
    let mut cluster_subcommand = add_clap_verbosity_flags(Command::new("cluster"))
        .about("Cluster genome FASTA files by average nucleotide identity")
        .arg(
            Arg::new("precluster-method")
                .long("precluster-method")
                .help("Method of preclustering genomes before nucmer: 'hierarchical' to cut a dendrogram of mash distances, 'simple' to link genomes above --precluster-ani, 'skip' to compare all genome pairs with nucmer")
                .value_parser(["hierarchical", "simple", "skip"])
                .default_value(crate::DEFAULT_PRECLUSTER_METHOD),
        )
        .arg(
            Arg::new("precluster-ani")
                .long("precluster-ani")
                .help("Minimum mash ANI to link two genomes when --precluster-method simple")
                .default_value(crate::DEFAULT_PRECLUSTER_ANI),
        )
        .arg(
            Arg::new("precluster-linkage-method")
                .long("precluster-linkage-method")
                .help("Linkage method for hierarchical preclustering")
                .value_parser([
                    "single",
                    "complete",
                    "average",
                    "weighted",
                    "ward",
                    "centroid",
                    "median",
                ])
                .default_value(crate::DEFAULT_LINKAGE_METHOD),
        )
        .arg(
            Arg::new("precluster-linkage-cutoff")
                .long("precluster-linkage-cutoff")
                .help("Mash distance at which the precluster dendrogram is cut")
                .default_value(crate::DEFAULT_PRECLUSTER_LINKAGE_CUTOFF),
        )
        .arg(
            Arg::new("sketch-size")
                .long("sketch-size")
                .help("Number of kmers per mash sketch")
                .value_parser(value_parser!(u32))
                .default_value(crate::DEFAULT_SKETCH_SIZE),
        )
        .arg(
            Arg::new("cluster-method")
                .long("cluster-method")
                .help("Method of clustering genomes within each precluster: 'hierarchical' to cut a dendrogram of nucmer ANI distances, 'simple' to link genomes above --ani")
                .value_parser(["hierarchical", "simple", "skip"])
                .default_value(crate::DEFAULT_CLUSTER_METHOD),
        )
        .arg(
            Arg::new("ani")
                .long("ani")
                .help("Minimum nucmer ANI to link two genomes when --cluster-method simple")
                .default_value(crate::DEFAULT_ANI),
        )
        .arg(
            Arg::new("cluster-linkage-method")
                .long("cluster-linkage-method")
                .help("Linkage method for hierarchical ANI clustering")
                .value_parser([
                    "single",
                    "complete",
                    "average",
                    "weighted",
                    "ward",
                    "centroid",
                    "median",
                ])
                .default_value(crate::DEFAULT_LINKAGE_METHOD),
        )
        .arg(
            Arg::new("cluster-linkage-cutoff")
                .long("cluster-linkage-cutoff")
                .help("ANI distance at which each precluster's dendrogram is cut")
                .default_value(crate::DEFAULT_CLUSTER_LINKAGE_CUTOFF),
        )
        .arg(
            Arg::new("min-aligned-fraction")
                .long("min-aligned-fraction")
                .help("Pairs aligned over less than this fraction of their length are counted as unrelated")
                .default_value(crate::DEFAULT_ALIGNED_FRACTION),
        )
        .arg(
            Arg::new("nucmer-min-cluster")
                .long("nucmer-min-cluster")
                .help("nucmer -c: minimum cluster length")
                .value_parser(value_parser!(u32))
                .default_value(crate::DEFAULT_NUCMER_MIN_CLUSTER),
        )
        .arg(
            Arg::new("nucmer-max-gap")
                .long("nucmer-max-gap")
                .help("nucmer -g: maximum gap between adjacent matches in a cluster")
                .value_parser(value_parser!(u32))
                .default_value(crate::DEFAULT_NUCMER_MAX_GAP),
        )
        .arg(
            Arg::new("nucmer-noextend")
                .long("nucmer-noextend")
                .help("nucmer --noextend: do not extend alignments outward from anchor clusters")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("nucmer-method")
                .long("nucmer-method")
                .help("nucmer anchor matching strategy")
                .value_parser(["mum", "mumreference", "maxmatch"])
                .default_value("mum"),
        )
        .arg(
            Arg::new("nucmer-preset")
                .long("nucmer-preset")
                .help("Bundled nucmer settings, overriding the four nucmer arguments: 'tight' for strain-level comparisons, 'normal' for species-level")
                .value_parser(["tight", "normal"]),
        )
        .arg(
            Arg::new("output-directory")
                .short('o')
                .long("output-directory")
                .help("Folder to write cluster assignments and intermediate files to")
                .required(true),
        )
        .arg(
            Arg::new("overwrite")
                .long("overwrite")
                .help("Replace output files from a previous run")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("dry-run")
                .long("dry-run")
                .help("Print the nucmer commands which would be run instead of running them")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("threads")
                .short('t')
                .long("threads")
                .help("Number of CPU threads to use")
                .value_parser(value_parser!(usize))
                .default_value("1"),
        );

    cluster_subcommand = add_genome_specification_arguments(cluster_subcommand);

    app.subcommand(cluster_subcommand)
}

pub fn add_recut_subcommand(app: clap::Command) -> clap::Command {
    app.subcommand(
        add_clap_verbosity_flags(Command::new("recut"))
            .about("Re-cut a saved linkage tree at a different distance cutoff")
            .arg(
                Arg::new("linkage-tree")
                    .long("linkage-tree")
                    .help("Linkage tree JSON written by a previous cluster run")
                    .required(true),
            )
            .arg(
                Arg::new("cutoff")
                    .long("cutoff")
                    .help("Distance at which to cut the tree")
                    .required(true),
            ),
    )
}
