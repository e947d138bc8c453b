use anyhow::Result;
use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;

use conway_bundle::build::{self, profiles::Profile};
use conway_bundle::config::{BuildConfig, Invocation, Mode, Toolchain};

#[derive(Parser)]
#[command(name = "conway-bundle")]
#[command(about = "Compiles the conway wasm crate and stages its web bundle")]
struct Cli {
    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile the crate and write the bundle for one profile
    Build {
        /// TOML config file; its directory is the project root
        #[arg(long)]
        config: Option<PathBuf>,

        /// Output layout to build
        #[arg(long, value_enum, env = "CONWAY_PROFILE")]
        profile: Option<Profile>,

        /// Cargo profile selection
        #[arg(long, value_enum)]
        mode: Option<Mode>,

        /// Entry script
        #[arg(long)]
        entry: Option<PathBuf>,

        /// Output directory
        #[arg(long)]
        out_dir: Option<PathBuf>,

        /// Path to the Rust crate directory
        #[arg(long)]
        crate_directory: Option<PathBuf>,

        /// Extra toolchain flag, repeatable; replaces the configured list
        #[arg(long = "extra-arg", allow_hyphen_values = true)]
        extra_args: Vec<String>,

        #[arg(long, value_enum)]
        toolchain: Option<Toolchain>,
    },
    /// Print the two paths a build would write
    Layout {
        #[arg(long)]
        config: Option<PathBuf>,

        #[arg(long, value_enum, env = "CONWAY_PROFILE")]
        profile: Option<Profile>,
    },
}

fn load_config(path: Option<&PathBuf>) -> Result<BuildConfig> {
    match path {
        Some(path) => BuildConfig::load(path),
        None => Ok(BuildConfig::default()),
    }
}

/// Paths given on the command line are relative to the working directory
fn from_cwd(path: PathBuf) -> Result<PathBuf> {
    Ok(std::path::absolute(path)?)
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp(None)
        .format_target(false)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Build {
            config,
            profile,
            mode,
            entry,
            out_dir,
            crate_directory,
            extra_args,
            toolchain,
        } => {
            let mut config = load_config(config.as_ref())?;
            config.apply(&Invocation { profile, mode });
            if let Some(entry) = entry {
                config.entry = from_cwd(entry)?;
            }
            if let Some(out_dir) = out_dir {
                config.out_dir = from_cwd(out_dir)?;
            }
            if let Some(crate_directory) = crate_directory {
                config.compiler.crate_directory = from_cwd(crate_directory)?;
            }
            if !extra_args.is_empty() {
                config.compiler.extra_args = extra_args;
            }
            if let Some(toolchain) = toolchain {
                config.compiler.toolchain = toolchain;
            }
            build::run(&config)?;
        }
        Commands::Layout { config, profile } => {
            let mut config = load_config(config.as_ref())?;
            config.apply(&Invocation {
                profile,
                mode: None,
            });
            let target = config.target();
            println!("{}", target.script_path().display());
            println!("{}", target.binary_path().display());
        }
    }

    Ok(())
}
