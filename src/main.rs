//! dap-bridge - drive a Debug Adapter Protocol adapter from the command line
//!
//! Spawns the configured debug adapter and exposes breakpoints, execution
//! control and inspection through a small prompt language.

use std::path::PathBuf;

use clap::Parser;
use dap_bridge::commands::Commands;
use dap_bridge::common::config::Config;
use dap_bridge::common::{logging, Error};
use dap_bridge::{cli, facade, testing};

#[derive(Parser)]
#[command(name = "dap-bridge", about = "Debug Adapter Protocol bridge")]
#[command(version, long_about = None)]
struct Cli {
    /// Configuration file (TOML, or JSON by extension)
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    /// Debug-level logging on stderr
    #[arg(long, short, global = true)]
    verbose: bool,

    /// Write the full log (including DAP traffic) to this file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[tokio::main]
async fn main() {
    let args = Cli::parse();

    // Keep the guard alive so the file log is flushed on exit
    let _log = logging::init_cli(args.verbose, args.log_file.as_deref());

    let result = match Config::load(args.config.as_deref()) {
        Ok(config) => run(args.command.unwrap_or(Commands::Repl), config).await,
        Err(e) => Err(e),
    };

    if let Err(e) = result {
        cli::print_error(&e);
        std::process::exit(1);
    }
}

async fn run(command: Commands, config: Config) -> Result<(), Error> {
    match command {
        Commands::Repl => cli::run_repl(config).await,

        Commands::Exec { lines } => cli::run_exec(config, &lines).await,

        Commands::Test { paths, verbose } => {
            let mut failed = 0;
            for path in &paths {
                let result = testing::run_scenario(path, &config, verbose).await?;
                if !result.passed {
                    failed += 1;
                }
            }
            if failed > 0 {
                return Err(Error::TestAssertion(format!(
                    "{} of {} scenario(s) failed",
                    failed,
                    paths.len()
                )));
            }
            Ok(())
        }

        Commands::Config => {
            let value = facade::effective_launch_config(&config)?;
            println!("{}", serde_json::to_string_pretty(&value)?);
            Ok(())
        }
    }
}
