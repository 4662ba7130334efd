use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

mod completion;
mod dispatch;
mod render;

use completion::CliCompletionShell;

#[derive(Parser, Debug)]
#[command(name = "extpack")]
#[command(about = "Extension dependency planner and installer", long_about = None)]
struct Cli {
    /// Installation prefix; defaults to $EXTPACK_PREFIX or ~/.extpack.
    #[arg(long, global = true)]
    prefix: Option<PathBuf>,
    #[arg(long, short, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the install plan without applying it.
    Plan {
        #[command(flatten)]
        target: InstallTarget,
        #[arg(long)]
        json: bool,
    },
    Install {
        #[command(flatten)]
        target: InstallTarget,
    },
    Uninstall {
        /// `<id>` or `<id>@<version>`.
        #[arg(required = true)]
        specs: Vec<String>,
        #[arg(long)]
        namespace: Option<String>,
    },
    List {
        #[arg(long)]
        namespace: Option<String>,
    },
    Search {
        needle: String,
    },
    Repository {
        #[command(subcommand)]
        command: RepositoryCommands,
    },
    Completions {
        #[arg(value_enum)]
        shell: CliCompletionShell,
    },
    Doctor,
}

#[derive(Args, Debug, Clone)]
struct InstallTarget {
    /// `<id>@<version>`.
    #[arg(required = true)]
    specs: Vec<String>,
    #[arg(long)]
    namespace: Option<String>,
    /// Also install root extensions into every existing namespace.
    #[arg(long)]
    allow_root_modifications: bool,
}

#[derive(Subcommand, Debug)]
enum RepositoryCommands {
    Add {
        name: String,
        location: String,
        #[arg(long, value_enum, default_value_t = CliRepositoryKind::Filesystem)]
        kind: CliRepositoryKind,
        /// SHA-256 of the repository key; taken from the repository when omitted.
        #[arg(long)]
        fingerprint: Option<String>,
        #[arg(long, default_value_t = 0)]
        priority: u32,
    },
    List,
    Remove {
        name: String,
    },
    Enable {
        name: String,
    },
    Disable {
        name: String,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum CliRepositoryKind {
    Filesystem,
    Http,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    dispatch::run_cli(cli)
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
