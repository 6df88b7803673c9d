//! strata command-line tool
//!
//! Front end over the module repository and the resolution driver.

mod commands;
mod config;
mod logging;
mod output;

use clap::{ArgAction, Parser, Subcommand};
use commands::link::LinkArgs;
use config::ToolConfig;
use logging::LogFormat;
use output::{resolve_color_choice, StyledOutput};
use std::path::PathBuf;
use std::process;
use strata_repo::BundlerOptions;

#[derive(Parser)]
#[command(name = "strata")]
#[command(about = "Module repository and linking toolchain", long_about = None)]
#[command(version)]
struct Cli {
    /// Raise log verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Compact, global = true)]
    log_format: LogFormat,

    /// Color output: auto, always, never
    #[arg(long, global = true)]
    color: Option<String>,

    /// Configuration file (default: ./strata.toml if present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Merge module files into one bundle file
    Bundle {
        /// Module files to merge
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
        /// Output file path
        #[arg(short, long)]
        output: PathBuf,
        /// Primary module name (defaults to the first input's primary)
        #[arg(long)]
        primary: Option<String>,
        /// Library path used to check fingerprints
        #[arg(short = 'L', long = "module-path")]
        module_path: Vec<PathBuf>,
    },

    /// List modules resolvable through library paths
    List {
        /// Library paths, highest priority first
        paths: Vec<PathBuf>,
    },

    /// Show the contents of a module file
    Info {
        /// Module or bundle file
        file: PathBuf,
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Resolve the dependencies of compiled modules and store the results
    Link {
        /// Module files to link
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
        /// Library path searched for dependencies
        #[arg(short = 'L', long = "module-path")]
        module_path: Vec<PathBuf>,
        /// Output directory for linked modules
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Version stamped onto every linked module
        #[arg(long)]
        set_version: Option<String>,
        /// Relink modules whose output is up to date
        #[arg(short, long)]
        force: bool,
    },
}

fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        eprintln!("Error: {:#}", e);
        process::exit(1);
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let config = ToolConfig::load(cli.config.as_deref())?;
    logging::init(&config.log.clone().with_verbosity(cli.verbose), cli.log_format);

    let mut out = StyledOutput::new(resolve_color_choice(cli.color.as_deref()));

    match cli.command {
        Commands::Bundle {
            inputs,
            output,
            primary,
            module_path,
        } => {
            let options = BundlerOptions {
                inputs,
                output,
                primary,
                module_path: commands::module_path(module_path, &config),
            };
            commands::bundle::execute(&mut out, options)
        }

        Commands::List { paths } => {
            let paths = if paths.is_empty() {
                config.repository.module_path.clone()
            } else {
                paths
            };
            commands::list::execute(&mut out, &paths)
        }

        Commands::Info { file, json } => commands::info::execute(&mut out, &file, json),

        Commands::Link {
            inputs,
            module_path,
            output,
            set_version,
            force,
        } => {
            let args = LinkArgs {
                inputs,
                module_path: commands::module_path(module_path, &config),
                output,
                set_version,
                force,
                color: cli.color,
            };
            commands::link::execute(&mut out, args, config.pipeline)
        }
    }
}
