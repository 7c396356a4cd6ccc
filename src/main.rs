extern crate corella;

extern crate clap;
use clap::*;

extern crate log;

extern crate bird_tool_utils;
use bird_tool_utils::clap_utils::*;

static PROGRAM_NAME: &str = "Corella";

fn main() {
    let app = build_cli();
    let matches = app.clone().get_matches();
    set_log_level(&matches, false, PROGRAM_NAME, crate_version!());

    match matches.subcommand_name() {
        Some("cluster") => {
            corella::cluster_argument_parsing::run_cluster_subcommand(
                &matches,
                "corella",
                crate_version!(),
            );
        }
        Some("recut") => {
            corella::cluster_argument_parsing::run_recut_subcommand(
                &matches,
                "corella",
                crate_version!(),
            );
        }
        _ => panic!("Programming error"),
    }
}

fn build_cli() -> Command {
    let mut app = add_clap_verbosity_flags(Command::new("corella"))
        .version(crate_version!())
        .author(corella::AUTHOR)
        .about("Microbial genome dereplicator using mash preclustering and nucmer ANI clustering")
        .arg_required_else_help(true);

    app = corella::cluster_argument_parsing::add_cluster_subcommand(app);
    app = corella::cluster_argument_parsing::add_recut_subcommand(app);
    return app;
}
