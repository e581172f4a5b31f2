mod cmd;
mod output;
mod root;

use clap::{Parser, Subcommand};
use cmd::config::ConfigSubcommand;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "relay",
    about = "Delegate tasks to capability workers and gate their results through review",
    version,
    propagate_version = true
)]
struct Cli {
    /// Project root (default: auto-detect from .relay/ or .git/)
    #[arg(long, global = true, env = "RELAY_ROOT")]
    root: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize relay in the current project
    Init,

    /// Validate or print the project configuration
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },

    /// List the configured worker roster
    Workers,

    /// Run one task to completion in-process
    Run {
        /// Capability tag (frontend, backend, devops, qa, knowledge-manager)
        capability: String,
        /// Task payload; parsed as JSON when possible, otherwise used as text
        #[arg(required = true, num_args = 1..)]
        payload: Vec<String>,
        /// Skip the reviewer gate (trivial fixes, documentation-only changes)
        #[arg(long)]
        no_review: bool,
    },

    /// List journaled tasks
    Tasks,

    /// Show one journaled task with its verdict history
    Show { id: String },

    /// Start the HTTP service and progress monitor
    Serve {
        /// Port to listen on (0 = OS-assigned)
        #[arg(long, default_value = "3141")]
        port: u16,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = match &cli.command {
        Commands::Serve { .. } => tracing::Level::INFO,
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

    let result = match cli.command {
        Commands::Init => cmd::init::run(&root),
        Commands::Config { subcommand } => cmd::config::run(&root, subcommand, cli.json),
        Commands::Workers => cmd::workers::run(&root, cli.json),
        Commands::Run {
            capability,
            payload,
            no_review,
        } => cmd::run::run(&root, &capability, &payload, no_review, cli.json),
        Commands::Tasks => cmd::tasks::list(&root, cli.json),
        Commands::Show { id } => cmd::tasks::show(&root, &id, cli.json),
        Commands::Serve { port } => cmd::serve::run(&root, port),
    };

    if let Err(e) = result {
        // Print the full error chain (anyhow's alternate Display)
        eprintln!("error: {e:#}");
        let code = e
            .downcast_ref::<cmd::run::RunExit>()
            .map_or(1, cmd::run::RunExit::exit_code);
        std::process::exit(code);
    }
}
