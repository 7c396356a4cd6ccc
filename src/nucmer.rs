use std::path::{Path, PathBuf};

use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;

use crate::genomes::GenomeRecord;

/// Anchor matching strategy passed through to nucmer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NucmerMethod {
    Mum,
    MumReference,
    MaxMatch,
}

impl NucmerMethod {
    pub fn flag(&self) -> &'static str {
        match self {
            NucmerMethod::Mum => "--mum",
            NucmerMethod::MumReference => "--mumreference",
            NucmerMethod::MaxMatch => "--maxmatch",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NucmerParams {
    pub min_cluster: u32,
    pub max_gap: u32,
    pub no_extend: bool,
    pub method: NucmerMethod,
}

/// Bundled nucmer settings. "tight" trades sensitivity for specificity and
/// suits strain-level dereplication, "normal" suits species-level.
pub fn nucmer_preset(name: &str) -> Option<NucmerParams> {
    match name {
        "tight" => Some(NucmerParams {
            min_cluster: 65,
            max_gap: 1,
            no_extend: true,
            method: NucmerMethod::Mum,
        }),
        "normal" => Some(NucmerParams {
            min_cluster: 65,
            max_gap: 90,
            no_extend: false,
            method: NucmerMethod::Mum,
        }),
        _ => None,
    }
}

/// How a batch of nucmer comparisons is executed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AlignmentSchedulerOptions {
    pub params: NucmerParams,
    pub threads: usize,
    /// Print each command instead of running it.
    pub dry_run: bool,
}

/// A single query-vs-reference nucmer comparison, named so that the output
/// file is `<query>_vs_<reference>.delta`.
#[derive(Debug, Clone)]
pub struct NucmerJob {
    pub query_name: String,
    pub reference_name: String,
    pub query_path: String,
    pub reference_path: String,
    pub output_prefix: PathBuf,
    pub params: NucmerParams,
}

impl NucmerJob {
    pub fn delta_path(&self) -> PathBuf {
        let mut with_extension = self.output_prefix.clone().into_os_string();
        with_extension.push(".delta");
        PathBuf::from(with_extension)
    }

    /// The exact command that run() executes, as a printable string.
    pub fn command_line(&self) -> String {
        let mut parts = vec![
            "nucmer".to_string(),
            self.params.method.flag().to_string(),
            "-p".to_string(),
            format!("{}", self.output_prefix.display()),
            "-c".to_string(),
            format!("{}", self.params.min_cluster),
            "-g".to_string(),
            format!("{}", self.params.max_gap),
        ];
        if self.params.no_extend {
            parts.push("--noextend".to_string());
        }
        parts.push(self.reference_path.clone());
        parts.push(self.query_path.clone());
        parts.join(" ")
    }

    /// Run nucmer to completion. A non-zero exit is logged and tolerated, so
    /// a crashed comparison is indistinguishable from one that found no
    /// alignable regions. Downstream code treats both as zero identity.
    pub fn run(&self) {
        let mut cmd = std::process::Command::new("nucmer");
        cmd.arg(self.params.method.flag())
            .arg("-p")
            .arg(&self.output_prefix)
            .arg("-c")
            .arg(format!("{}", self.params.min_cluster))
            .arg("-g")
            .arg(format!("{}", self.params.max_gap));
        if self.params.no_extend {
            cmd.arg("--noextend");
        }
        cmd.arg(&self.reference_path)
            .arg(&self.query_path)
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null());
        debug!("Running nucmer command: {:?}", &cmd);
        let status = cmd
            .status()
            .unwrap_or_else(|_| panic!("Failed to spawn {}", "nucmer"));
        if !status.success() {
            warn!(
                "Nucmer comparison of query {} against reference {} exited with status {:?}",
                self.query_name, self.reference_name, status.code()
            );
        }
    }
}

/// Enumerate every ordered pair of members, self comparisons included, in a
/// stable (query outer, reference inner) order.
pub fn generate_nucmer_jobs(
    members: &[&GenomeRecord],
    output_folder: &Path,
    params: &NucmerParams,
) -> Vec<NucmerJob> {
    let mut jobs = Vec::with_capacity(members.len() * members.len());
    for query in members {
        for reference in members {
            let output_prefix =
                output_folder.join(format!("{}_vs_{}", query.name, reference.name));
            jobs.push(NucmerJob {
                query_name: query.name.clone(),
                reference_name: reference.name.clone(),
                query_path: query.path.clone(),
                reference_path: reference.path.clone(),
                output_prefix,
                params: *params,
            });
        }
    }
    jobs
}

/// Run a batch of nucmer jobs on a dedicated pool of num_threads workers. In
/// dry run mode the commands are printed to stdout instead, one per line, in
/// job order.
pub fn run_alignment_jobs(jobs: &[NucmerJob], num_threads: usize, dry_run: bool) {
    if dry_run {
        for job in jobs {
            println!("{}", job.command_line());
        }
        info!("Dry run: printed {} nucmer commands", jobs.len());
        return;
    }

    info!("Running {} nucmer comparisons ..", jobs.len());
    // A redrawing bar interleaves badly with debug logging.
    let progress_bar = if log_enabled!(log::Level::Info) && !log_enabled!(log::Level::Debug) {
        let bar = ProgressBar::new(jobs.len() as u64);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos:>7}/{len:7}")
                .unwrap(),
        );
        bar
    } else {
        ProgressBar::hidden()
    };

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(num_threads)
        .build()
        .expect("Programming error: failed to create nucmer thread pool");
    pool.install(|| {
        jobs.par_iter().for_each(|job| {
            job.run();
            progress_bar.inc(1);
        });
    });
    progress_bar.finish_and_clear();
    info!("Finished running nucmer comparisons.");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(name: &str, path: &str, length: u64) -> GenomeRecord {
        GenomeRecord {
            name: name.to_string(),
            path: path.to_string(),
            length,
        }
    }

    #[test]
    fn test_command_line_format() {
        let job = NucmerJob {
            query_name: "g1.fna".to_string(),
            reference_name: "g2.fna".to_string(),
            query_path: "/data/g1.fna".to_string(),
            reference_path: "/data/g2.fna".to_string(),
            output_prefix: PathBuf::from("/work/g1.fna_vs_g2.fna"),
            params: NucmerParams {
                min_cluster: 65,
                max_gap: 90,
                no_extend: false,
                method: NucmerMethod::Mum,
            },
        };
        assert_eq!(
            "nucmer --mum -p /work/g1.fna_vs_g2.fna -c 65 -g 90 /data/g2.fna /data/g1.fna",
            job.command_line()
        );
    }

    #[test]
    fn test_command_line_noextend_and_maxmatch() {
        let job = NucmerJob {
            query_name: "g1.fna".to_string(),
            reference_name: "g2.fna".to_string(),
            query_path: "/data/g1.fna".to_string(),
            reference_path: "/data/g2.fna".to_string(),
            output_prefix: PathBuf::from("/work/g1.fna_vs_g2.fna"),
            params: NucmerParams {
                min_cluster: 65,
                max_gap: 1,
                no_extend: true,
                method: NucmerMethod::MaxMatch,
            },
        };
        assert_eq!(
            "nucmer --maxmatch -p /work/g1.fna_vs_g2.fna -c 65 -g 1 --noextend /data/g2.fna /data/g1.fna",
            job.command_line()
        );
    }

    #[test]
    fn test_presets() {
        let tight = nucmer_preset("tight").unwrap();
        assert_eq!(65, tight.min_cluster);
        assert_eq!(1, tight.max_gap);
        assert!(tight.no_extend);
        assert_eq!(NucmerMethod::Mum, tight.method);

        let normal = nucmer_preset("normal").unwrap();
        assert_eq!(65, normal.min_cluster);
        assert_eq!(90, normal.max_gap);
        assert!(!normal.no_extend);
        assert_eq!(NucmerMethod::Mum, normal.method);

        assert!(nucmer_preset("loose").is_none());
    }

    #[test]
    fn test_generate_jobs_includes_self_pairs() {
        let g1 = record("a.fna", "/data/a.fna", 100);
        let g2 = record("b.fna", "/data/b.fna", 100);
        let members = vec![&g1, &g2];
        let jobs = generate_nucmer_jobs(
            &members,
            Path::new("/work"),
            &nucmer_preset("normal").unwrap(),
        );
        assert_eq!(4, jobs.len());
        let prefixes: Vec<String> = jobs
            .iter()
            .map(|j| format!("{}", j.output_prefix.display()))
            .collect();
        assert_eq!(
            vec![
                "/work/a.fna_vs_a.fna",
                "/work/a.fna_vs_b.fna",
                "/work/b.fna_vs_a.fna",
                "/work/b.fna_vs_b.fna",
            ],
            prefixes
        );
        assert_eq!(
            PathBuf::from("/work/a.fna_vs_b.fna.delta"),
            jobs[1].delta_path()
        );
        // The reference is the first positional argument.
        assert_eq!("b.fna", jobs[1].reference_name);
        assert_eq!("/data/b.fna", jobs[1].reference_path);
    }

    #[test]
    fn test_dry_run_creates_no_files() {
        let tmp = tempfile::TempDir::new().unwrap();
        let g1 = record("a.fna", "/data/a.fna", 100);
        let members = vec![&g1];
        let jobs = generate_nucmer_jobs(&members, tmp.path(), &nucmer_preset("tight").unwrap());
        run_alignment_jobs(&jobs, 1, true);
        assert_eq!(0, std::fs::read_dir(tmp.path()).unwrap().count());
    }
}
