//! Stagehand CLI: assemble, version and deploy multi-stage pipelines.

use clap::Parser;

#[derive(Parser, Debug)]
#[command(
    name = "stagehand",
    version,
    about = "Assemble, version and deploy multi-stage pipelines onto a remote execution platform"
)]
struct Cli {
    #[command(flatten)]
    opts: stagehand::cli::GlobalOpts,

    /// Debug logging (STAGEHAND_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: stagehand::cli::Commands,
}

fn main() {
    let cli = Cli::parse();
    stagehand::logging::init_tracing(cli.verbose, cli.log_json);
    if let Err(e) = stagehand::cli::dispatch(cli.command, &cli.opts) {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}
