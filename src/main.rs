use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod cli;

#[derive(Parser)]
#[command(name = "reconcile")]
#[command(about = "Applies machine-generated task plans to a Flutter project without losing accumulated work", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(long, global = true, default_value = ".", help = "Project root")]
    root: PathBuf,

    #[arg(long, global = true, help = "Enable verbose debug output")]
    verbose: bool,

    #[arg(long, global = true, help = "Print what would be done without writing files")]
    dry_run: bool,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Print the project context digest")]
    Digest,

    #[command(about = "Validate a task plan file and print the normalized plan")]
    Validate {
        #[arg(help = "Path to the plan JSON")]
        plan: PathBuf,
        #[arg(long, help = "Prune the plan to a minimal change")]
        simplify: bool,
    },

    #[command(about = "Execute a task plan file")]
    Apply {
        #[arg(help = "Path to the plan JSON")]
        plan: PathBuf,
        #[arg(long, help = "Prune the plan to a minimal change")]
        simplify: bool,
    },

    #[command(about = "Plan and execute a task described in plain text")]
    Task {
        #[arg(help = "The task request", required = true, num_args = 1..)]
        request: Vec<String>,
        #[arg(long, help = "Prune the plan to a minimal change")]
        simplify: bool,
        #[arg(long, help = "Ask the model to sharpen step descriptions")]
        review: bool,
    },

    #[command(about = "Merge an entry point update descriptor into the entry file")]
    ReconcileEntry {
        #[arg(help = "Path to the entryPointUpdate JSON")]
        update: PathBuf,
    },

    #[command(about = "Add or update manifest dependencies")]
    AddDeps {
        #[arg(help = "Dependencies as name or name:version", required = true)]
        packages: Vec<String>,
    },

    #[command(about = "Run the structural check, with repair, over files")]
    Check {
        #[arg(help = "Project-relative file paths", required = true)]
        paths: Vec<String>,
    },

    #[command(about = "Show recently executed tasks")]
    History {
        #[arg(long, default_value_t = reconcile::task_history::DEFAULT_SUMMARY_LENGTH, help = "Number of tasks to show")]
        last: usize,
    },

    #[command(about = "Run the dev server and execute tasks read from stdin")]
    Session {
        #[arg(long, help = "Device id passed to the dev server")]
        device: Option<String>,
    },
}

fn setup_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    let config = cli::Config {
        root: cli.root,
        verbose: cli.verbose,
        dry_run: cli.dry_run,
    };

    match cli.command {
        Commands::Digest => cli::digest(&config)?,
        Commands::Validate { plan, simplify } => cli::validate_plan(&plan, simplify, &config)?,
        Commands::Apply { plan, simplify } => cli::apply(&plan, simplify, &config)?,
        Commands::Task {
            request,
            simplify,
            review,
        } => cli::task(&request.join(" "), simplify, review, &config)?,
        Commands::ReconcileEntry { update } => cli::reconcile_entry(&update, &config)?,
        Commands::AddDeps { packages } => cli::add_deps(&packages, &config)?,
        Commands::Check { paths } => cli::check(&paths, &config)?,
        Commands::History { last } => cli::history(last, &config)?,
        Commands::Session { device } => cli::session(device, &config)?,
    }

    Ok(())
}
