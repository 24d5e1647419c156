mod cmd;
mod output;
mod root;
mod wiring;

use clap::{Parser, Subcommand};
use cmd::{
    config::ConfigSubcommand, cycle::CycleSubcommand, deploy::DeploySubcommand,
    develop::DevelopArgs, verify::VerifyArgs,
};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "shipwright",
    about = "Turn a plain-language requirement into a verified, running service",
    version,
    propagate_version = true
)]
struct Cli {
    /// Project root (default: auto-detect from .shipwright/ or .git/)
    #[arg(long, global = true, env = "SHIPWRIGHT_ROOT")]
    root: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    /// Evaluate guardrails and record actions without touching the cluster
    #[arg(long, global = true, env = "SHIPWRIGHT_DRY_RUN")]
    dry_run: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize .shipwright/ in the current project
    Init,

    /// Run a development cycle from a requirement to a verified deployment
    Develop(DevelopArgs),

    /// Resume a stored cycle from its last phase
    Resume {
        /// Cycle id
        id: String,
    },

    /// Inspect stored cycles
    Cycle {
        #[command(subcommand)]
        subcommand: CycleSubcommand,
    },

    /// Inspect and remediate deployments
    Deploy {
        #[command(subcommand)]
        subcommand: DeploySubcommand,
    },

    /// Functionally verify a running service
    Verify(VerifyArgs),

    /// Inspect configuration
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = match &cli.command {
        Commands::Develop(_) | Commands::Resume { .. } => tracing::Level::INFO,
        _ => tracing::Level::WARN,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let root = root::resolve_root(cli.root.as_deref());
    let opts = wiring::GlobalOpts {
        json: cli.json,
        dry_run: cli.dry_run,
    };

    let result = match cli.command {
        Commands::Init => cmd::init::run(&root),
        Commands::Develop(args) => cmd::develop::run(&root, args, opts),
        Commands::Resume { id } => cmd::develop::resume(&root, &id, opts),
        Commands::Cycle { subcommand } => cmd::cycle::run(&root, subcommand, cli.json),
        Commands::Deploy { subcommand } => cmd::deploy::run(&root, subcommand, opts),
        Commands::Verify(args) => cmd::verify::run(&root, args, cli.json),
        Commands::Config { subcommand } => cmd::config::run(&root, subcommand, cli.json),
    };

    if let Err(e) = result {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
