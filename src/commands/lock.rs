use clap::{Args, Subcommand};
use serde::Serialize;

use buildreg::defaults;
use buildreg::lock::{self, LockStatus};
use buildreg::log_status;

use super::CmdResult;

#[derive(Args)]
pub struct LockArgs {
    #[command(subcommand)]
    command: LockCommand,
}

#[derive(Subcommand)]
enum LockCommand {
    /// Show whether the registry lock is held, and by whom for lease locks
    Status {
        /// Registry file (overrides BUILDREG_REGISTRY_PATH and config)
        #[arg(long, value_name = "PATH")]
        registry: Option<String>,
    },
    /// Remove a stale lock marker left behind by a crashed job
    Release {
        /// Registry file (overrides BUILDREG_REGISTRY_PATH and config)
        #[arg(long, value_name = "PATH")]
        registry: Option<String>,
    },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LockOutput {
    command: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    status: Option<LockStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    removed: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    marker: Option<String>,
}

pub fn run(args: LockArgs, _global: &crate::commands::GlobalArgs) -> CmdResult<LockOutput> {
    let defaults = defaults::load_defaults();

    match args.command {
        LockCommand::Status { registry } => {
            let path = defaults::resolve_registry_path(registry.as_deref(), &defaults)?;
            Ok((
                LockOutput {
                    command: "lock.status".to_string(),
                    status: Some(lock::inspect(&path)),
                    removed: None,
                    marker: None,
                },
                0,
            ))
        }
        LockCommand::Release { registry } => {
            let path = defaults::resolve_registry_path(registry.as_deref(), &defaults)?;
            let removed = lock::force_release(&path)?;
            if removed {
                log_status!("lock", "Removed {}", lock::marker_path(&path).display());
            }
            Ok((
                LockOutput {
                    command: "lock.release".to_string(),
                    status: None,
                    removed: Some(removed),
                    marker: Some(lock::marker_path(&path).display().to_string()),
                },
                0,
            ))
        }
    }
}
