use clap::Args;
use serde::Serialize;

use buildreg::defaults;
use buildreg::registry::{self, BuildRecord, Registry};

use super::CmdResult;

#[derive(Args)]
pub struct ShowArgs {
    /// Only show this branch
    pub branch: Option<String>,

    /// Registry file (overrides BUILDREG_REGISTRY_PATH and config)
    #[arg(long, value_name = "PATH")]
    pub registry: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ShowOutput {
    registry: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    branch: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    entry: Option<BuildRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    entries: Option<Registry>,
    count: usize,
}

pub fn run(args: ShowArgs, _global: &crate::commands::GlobalArgs) -> CmdResult<ShowOutput> {
    let defaults = defaults::load_defaults();
    let path = defaults::resolve_registry_path(args.registry.as_deref(), &defaults)?;
    let current = registry::load(&path)?;

    let output = match args.branch {
        Some(branch) => {
            let entry = current.get(&branch).cloned().ok_or_else(|| {
                buildreg::Error::validation_invalid_argument(
                    "branch",
                    format!("No registry entry for branch '{}'", branch),
                    Some(branch.clone()),
                    Some(current.branches().map(str::to_string).collect()),
                )
            })?;
            ShowOutput {
                registry: path.display().to_string(),
                branch: Some(branch),
                entry: Some(entry),
                entries: None,
                count: 1,
            }
        }
        None => ShowOutput {
            registry: path.display().to_string(),
            branch: None,
            entry: None,
            count: current.len(),
            entries: Some(current),
        },
    };

    Ok((output, 0))
}
