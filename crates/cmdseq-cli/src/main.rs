mod cmd;
mod output;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "cmdseq",
    about = "Onboard command sequence engine — validate, inspect, and run compiled sequence files",
    version,
    propagate_version = true
)]
struct Cli {
    /// Command dictionary YAML (opcode → mnemonic table)
    #[arg(long, global = true, env = "CMDSEQ_DICT")]
    dict: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Decode a sequence file and report the validation outcome
    Validate {
        /// Compiled sequence file
        file: PathBuf,
    },

    /// List a sequence file's records
    Inspect {
        /// Compiled sequence file
        file: PathBuf,
    },

    /// Execute a sequence file against the loopback command router
    Run {
        /// Compiled sequence file
        file: PathBuf,

        /// Return immediately after the start is accepted instead of
        /// waiting for the terminal state
        #[arg(long)]
        no_block: bool,

        /// Operator-paced mode: load only, then advance record by record
        /// on Enter
        #[arg(long)]
        manual: bool,

        /// Per-dispatch timeout in milliseconds
        #[arg(long)]
        dispatch_timeout_ms: Option<u64>,
    },
}

fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_target(false)
        .init();

    let result = match cli.command {
        Commands::Validate { ref file } => cmd::validate::run(&cli, file),
        Commands::Inspect { ref file } => cmd::inspect::run(&cli, file),
        Commands::Run {
            ref file,
            no_block,
            manual,
            dispatch_timeout_ms,
        } => cmd::run::run(&cli, file, no_block, manual, dispatch_timeout_ms),
    };

    if let Err(e) = result {
        // Print the full error chain (anyhow's alternate Display)
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}

impl Cli {
    /// Load the command dictionary named by `--dict` / `CMDSEQ_DICT`.
    fn dictionary(&self) -> anyhow::Result<cmdseq_core::CommandDictionary> {
        let path = self.dict.as_deref().ok_or_else(|| {
            anyhow::anyhow!("a command dictionary is required (--dict or CMDSEQ_DICT)")
        })?;
        Ok(cmdseq_core::CommandDictionary::load(path)?)
    }
}
