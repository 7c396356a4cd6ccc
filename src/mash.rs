use std::io::BufReader;
use std::path::{Path, PathBuf};

use bird_tool_utils::command::finish_command_safely;
use rayon::prelude::*;

use crate::genomes::{genome_name_from_path, GenomeRecord};
use crate::PipelineError;

/// One row of the all-vs-all mash distance table.
#[derive(Debug, Clone, PartialEq)]
pub struct SketchDistance {
    pub genome1: String,
    pub genome2: String,
    pub distance: f64,
    pub p_value: f64,
    pub shared_kmers: String,
}

impl SketchDistance {
    pub fn similarity(&self) -> f64 {
        1.0 - self.distance
    }
}

/// Sketch every genome, paste the sketches together and run an all-vs-all
/// `mash dist`, returning one row per ordered genome pair. Self pairs are
/// included - mash reports them with distance 0.
pub fn all_vs_all_distances(
    genomes: &[GenomeRecord],
    mash_folder: &Path,
    sketch_size: u32,
) -> Result<Vec<SketchDistance>, PipelineError> {
    let sketch_folder = mash_folder.join("sketches");
    std::fs::create_dir_all(&sketch_folder)?;

    info!("Sketching {} genomes with mash ..", genomes.len());
    let sketch_paths: Vec<PathBuf> = genomes
        .par_iter()
        .map(|genome| sketch_genome(genome, &sketch_folder, sketch_size))
        .collect();

    let pasted_sketch = paste_sketches(&sketch_paths, &mash_folder.join("ALL"));

    info!("Calculating pairwise mash distances ..");
    let distances = pairwise_distances(&pasted_sketch);
    debug!(
        "Found {} mash distance rows from {} genomes",
        distances.len(),
        genomes.len()
    );
    info!("Finished mash distance calculation.");
    Ok(distances)
}

fn sketch_genome(genome: &GenomeRecord, sketch_folder: &Path, sketch_size: u32) -> PathBuf {
    let output_prefix = sketch_folder.join(&genome.name);
    let mut cmd = std::process::Command::new("mash");
    cmd.arg("sketch")
        .arg("-s")
        .arg(format!("{}", sketch_size))
        .arg("-o")
        .arg(&output_prefix)
        .arg(&genome.path)
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped());
    debug!("Running mash sketch command: {:?}", &cmd);
    let process = cmd
        .spawn()
        .unwrap_or_else(|_| panic!("Failed to spawn {}", "mash"));
    finish_command_safely(process, "mash")
        .wait()
        .expect("Unexpected wait failure outside bird_tool_utils for mash");
    append_msh_extension(&output_prefix)
}

fn paste_sketches(sketch_paths: &[PathBuf], output_prefix: &Path) -> PathBuf {
    let mut cmd = std::process::Command::new("mash");
    cmd.arg("paste").arg(output_prefix);
    for sketch_path in sketch_paths {
        cmd.arg(sketch_path);
    }
    cmd.stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped());
    debug!("Running mash paste command: {:?}", &cmd);
    let process = cmd
        .spawn()
        .unwrap_or_else(|_| panic!("Failed to spawn {}", "mash"));
    finish_command_safely(process, "mash")
        .wait()
        .expect("Unexpected wait failure outside bird_tool_utils for mash");
    append_msh_extension(output_prefix)
}

fn pairwise_distances(pasted_sketch: &Path) -> Vec<SketchDistance> {
    let mut cmd = std::process::Command::new("mash");
    cmd.arg("dist")
        .arg(pasted_sketch)
        .arg(pasted_sketch)
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped());
    debug!("Running mash dist command: {:?}", &cmd);
    let mut process = cmd
        .spawn()
        .unwrap_or_else(|_| panic!("Failed to spawn {}", "mash"));
    let stdout = process.stdout.as_mut().unwrap();
    let stdout_reader = BufReader::new(stdout);

    let mut rdr = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .from_reader(stdout_reader);

    let mut distances = vec![];
    for record_res in rdr.records() {
        match record_res {
            Ok(record) => {
                assert!(record.len() == 5);
                let distance: f64 = record[2]
                    .parse()
                    .expect("Failed to convert mash distance to float value");
                let p_value: f64 = record[3]
                    .parse()
                    .expect("Failed to convert mash p-value to float value");
                trace!("Found mash record {:?}", record);
                distances.push(SketchDistance {
                    // mash names sketches by the paths given at sketch time
                    genome1: genome_name_from_path(&record[0]),
                    genome2: genome_name_from_path(&record[1]),
                    distance,
                    p_value,
                    shared_kmers: record[4].to_string(),
                });
            }
            Err(e) => {
                error!("Error parsing mash output: {}", e);
                std::process::exit(1);
            }
        }
    }
    finish_command_safely(process, "mash")
        .wait()
        .expect("Unexpected wait failure outside bird_tool_utils for mash");
    distances
}

// Genome names routinely contain dots, so Path::set_extension would eat part
// of the name.
fn append_msh_extension(prefix: &Path) -> PathBuf {
    let mut with_extension = prefix.to_path_buf().into_os_string();
    with_extension.push(".msh");
    PathBuf::from(with_extension)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_similarity_is_one_minus_distance() {
        let sketch_distance = SketchDistance {
            genome1: "a.fna".to_string(),
            genome2: "b.fna".to_string(),
            distance: 0.05,
            p_value: 0.0,
            shared_kmers: "700/1000".to_string(),
        };
        assert_eq!(0.95, sketch_distance.similarity());
    }

    #[test]
    fn test_append_msh_extension_keeps_dotted_names() {
        assert_eq!(
            PathBuf::from("/tmp/sketches/73.20110600_S2D.10.fna.msh"),
            append_msh_extension(Path::new("/tmp/sketches/73.20110600_S2D.10.fna"))
        );
    }
}
