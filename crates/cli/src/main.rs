mod cmd;
mod output;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use chainbuild_lib::config::BuilderConfig;

use crate::cmd::{BuildArgs, DefinitionArgs, PublishArgs};
use crate::output::{OutputFormat, print_error};

/// chainbuild - Declarative on-chain deployment builder
#[derive(Parser)]
#[command(name = "chainbuild")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Enable verbose output
  #[arg(short, long, global = true)]
  verbose: bool,

  /// Config file (default: $CHAINBUILD_CONFIG, else chainbuild.toml in the config directory)
  #[arg(long, global = true, value_name = "PATH")]
  config: Option<PathBuf>,

  /// Output format
  #[arg(short = 'o', long, global = true, value_enum, default_value = "text")]
  output: OutputFormat,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Build a chain definition, reusing unchanged steps of the last build
  Build(BuildArgs),

  /// Show which steps a build would execute
  Plan {
    #[command(flatten)]
    definition: DefinitionArgs,

    /// Plan as if no prior build existed
    #[arg(long)]
    fresh: bool,
  },

  /// Show a bundle's steps and contracts
  Inspect {
    /// Package reference (name[:version][@preset][/chainId]) or bundle/archive file
    target: String,

    /// Chain id for references without a `/chainId` suffix
    #[arg(long)]
    chain_id: Option<u64>,
  },

  /// Compare two bundles
  Diff {
    /// Older bundle: package reference or file
    old: String,

    /// Newer bundle: package reference or file
    new: String,

    /// Chain id for references without a `/chainId` suffix
    #[arg(long)]
    chain_id: Option<u64>,
  },

  /// Write a bundle to a portable archive
  Export {
    /// Package reference or bundle file
    target: String,

    /// Archive file to write
    file: PathBuf,

    /// Chain id for references without a `/chainId` suffix
    #[arg(long)]
    chain_id: Option<u64>,
  },

  /// Restore a bundle from an archive into the local store
  Import {
    /// Archive file to read
    file: PathBuf,

    /// Record the bundle as the latest build of its package
    #[arg(long)]
    record: bool,
  },

  /// Publish a bundle to the configured registry
  Publish(PublishArgs),

  /// Resolve a published package and store its bundle locally
  Fetch {
    /// Package reference
    reference: String,

    /// Also write the bundle to this file
    #[arg(long, value_name = "FILE")]
    out: Option<PathBuf>,

    /// Write --out as an archive instead of bundle JSON
    #[arg(long, requires = "out")]
    archive: bool,
  },

  /// Remove stored objects no registry entry or recorded build needs
  Gc {
    /// Show what would be removed without removing anything
    #[arg(long)]
    dry_run: bool,
  },
}

fn init_tracing(verbose: bool) {
  let default = if verbose { "debug" } else { "warn" };
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(std::io::stderr)
    .without_time()
    .init();
}

async fn run(cli: Cli) -> Result<()> {
  let config = BuilderConfig::load(cli.config.as_deref()).context("Failed to load config")?;
  let output = cli.output;

  match cli.command {
    Commands::Build(args) => cmd::cmd_build(&config, &args, output).await,
    Commands::Plan { definition, fresh } => cmd::cmd_plan(&config, &definition, fresh, output).await,
    Commands::Inspect { target, chain_id } => cmd::cmd_inspect(&config, &target, chain_id, cli.verbose, output).await,
    Commands::Diff { old, new, chain_id } => cmd::cmd_diff(&config, &old, &new, chain_id, cli.verbose, output).await,
    Commands::Export { target, file, chain_id } => cmd::cmd_export(&config, &target, &file, chain_id, output).await,
    Commands::Import { file, record } => cmd::cmd_import(&config, &file, record, output).await,
    Commands::Publish(args) => cmd::cmd_publish(&config, &args, output).await,
    Commands::Fetch { reference, out, archive } => {
      cmd::cmd_fetch(&config, &reference, out.as_deref(), archive, output).await
    }
    Commands::Gc { dry_run } => cmd::cmd_gc(&config, dry_run, output),
  }
}

fn main() -> ExitCode {
  let cli = Cli::parse();
  init_tracing(cli.verbose);

  let result = tokio::runtime::Runtime::new()
    .context("Failed to create async runtime")
    .and_then(|rt| rt.block_on(run(cli)));

  match result {
    Ok(()) => ExitCode::SUCCESS,
    Err(err) => {
      print_error(&format!("{:#}", err));
      ExitCode::FAILURE
    }
  }
}
