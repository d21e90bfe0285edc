use clap::{Parser, Subcommand};

use commands::GlobalArgs;

mod commands;
mod output;
mod tty;

use commands::{build, compare, config, lock, show};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(name = "buildreg")]
#[command(version = VERSION)]
#[command(about = "Keep a shared registry of the latest CI builds per release branch")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Record the latest upstream build of a branch in the registry
    Build(build::BuildArgs),
    /// Show registry entries
    Show(show::ShowArgs),
    /// Compare two build version strings
    Compare(compare::CompareArgs),
    /// Inspect or clear the registry lock
    Lock(lock::LockArgs),
    /// Show buildreg configuration
    Config(config::ConfigArgs),
}

fn main() -> std::process::ExitCode {
    let cli = Cli::parse();
    let global = GlobalArgs {};

    let (json_result, exit_code) = commands::run_json(cli.command, &global);

    if let Err(err) = output::print_json_result(json_result) {
        eprintln!("buildreg: {}", err.message);
        return std::process::ExitCode::from(1);
    }

    std::process::ExitCode::from(exit_code_to_u8(exit_code))
}

fn exit_code_to_u8(code: i32) -> u8 {
    if code <= 0 {
        0
    } else if code >= 255 {
        255
    } else {
        code as u8
    }
}
