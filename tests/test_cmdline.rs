extern crate assert_cli;

#[cfg(test)]
mod tests {
    use assert_cli::Assert;

    #[test]
    fn test_dry_run_prints_nucmer_commands() {
        let td = tempfile::TempDir::new().unwrap();
        let out = td.path().join("out");
        let out_str = out.to_str().unwrap();
        Assert::main_binary()
            .with_args(&[
                "cluster",
                "--precluster-method",
                "skip",
                "--dry-run",
                "--genome-fasta-files",
                "tests/data/set1/genome1.fna",
                "tests/data/set1/genome2.fna",
                "--output-directory",
                out_str,
            ])
            .succeeds()
            .stdout()
            .contains("nucmer --mum -p")
            .stdout()
            .contains("genome1.fna_vs_genome1.fna")
            .stdout()
            .contains("genome1.fna_vs_genome2.fna")
            .stdout()
            .contains("genome2.fna_vs_genome1.fna")
            .stdout()
            .contains("genome2.fna_vs_genome2.fna")
            .unwrap();

        assert_eq!(
            "genome,precluster,ani_cluster\n\
             genome1.fna,0,\n\
             genome2.fna,0,\n",
            std::fs::read_to_string(out.join("cluster_assignments.csv")).unwrap()
        );
        assert!(out.join("cluster_arguments.json").exists());
        // Preclustering was skipped, so there are no mash distances to report.
        assert!(!out.join("mash_distances.csv").exists());
    }

    #[test]
    fn test_skipping_ani_stage_is_not_implemented() {
        let td = tempfile::TempDir::new().unwrap();
        let out = td.path().join("out");
        Assert::main_binary()
            .with_args(&[
                "cluster",
                "--precluster-method",
                "skip",
                "--cluster-method",
                "skip",
                "--dry-run",
                "--genome-fasta-files",
                "tests/data/set1/genome1.fna",
                "tests/data/set1/genome2.fna",
                "--output-directory",
                out.to_str().unwrap(),
            ])
            .fails()
            .stderr()
            .contains("has not been written yet")
            .unwrap();
    }

    #[test]
    fn test_duplicate_genome_names_refused() {
        let td = tempfile::TempDir::new().unwrap();
        let out = td.path().join("out");
        Assert::main_binary()
            .with_args(&[
                "cluster",
                "--precluster-method",
                "skip",
                "--dry-run",
                "--genome-fasta-files",
                "tests/data/set1/genome1.fna",
                "tests/data/set2/genome1.fna",
                "--output-directory",
                out.to_str().unwrap(),
            ])
            .fails()
            .stderr()
            .contains("share the file name")
            .unwrap();
    }

    #[test]
    fn test_overwrite_protection() {
        let td = tempfile::TempDir::new().unwrap();
        let out = td.path();
        let out_str = out.to_str().unwrap();
        std::fs::write(out.join("cluster_assignments.csv"), "stale\n").unwrap();

        Assert::main_binary()
            .with_args(&[
                "cluster",
                "--precluster-method",
                "skip",
                "--dry-run",
                "--genome-fasta-files",
                "tests/data/set1/genome1.fna",
                "tests/data/set1/genome2.fna",
                "--output-directory",
                out_str,
            ])
            .fails()
            .stderr()
            .contains("already exists")
            .unwrap();

        Assert::main_binary()
            .with_args(&[
                "cluster",
                "--precluster-method",
                "skip",
                "--dry-run",
                "--overwrite",
                "--genome-fasta-files",
                "tests/data/set1/genome1.fna",
                "tests/data/set1/genome2.fna",
                "--output-directory",
                out_str,
            ])
            .succeeds()
            .stderr()
            .contains("Overwriting previous output file")
            .unwrap();

        assert!(std::fs::read_to_string(out.join("cluster_assignments.csv"))
            .unwrap()
            .starts_with("genome,precluster,ani_cluster"));
    }

    #[test]
    fn test_recut_cuts_a_saved_tree() {
        Assert::main_binary()
            .with_args(&[
                "recut",
                "--linkage-tree",
                "tests/data/recut/mash_linkage.json",
                "--cutoff",
                "0.01",
            ])
            .succeeds()
            .stdout()
            .is("\
                genome1.fna	1\n\
                genome2.fna	1\n\
                genome3.fna	2\n\
                genome4.fna	2\n")
            .unwrap();

        // A cutoff above every merge collapses the tree to one cluster.
        Assert::main_binary()
            .with_args(&[
                "recut",
                "--linkage-tree",
                "tests/data/recut/mash_linkage.json",
                "--cutoff",
                "0.5",
            ])
            .succeeds()
            .stdout()
            .is("\
                genome1.fna	1\n\
                genome2.fna	1\n\
                genome3.fna	1\n\
                genome4.fna	1\n")
            .unwrap();
    }
}
