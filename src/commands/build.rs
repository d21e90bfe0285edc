use clap::Args;
use buildreg::coordinator::{UpdateCoordinator, UpdateOutcome};
use buildreg::defaults::{self, Defaults};
use buildreg::image::ImagePuller;
use buildreg::lock::{self, LockMode};
use buildreg::upstream::{BuildQuery, UpstreamClient};

use crate::commands::CmdResult;

/// Exit code when the registry was written but the lock marker is still on disk.
const EXIT_LOCK_NOT_RELEASED: i32 = 10;

#[derive(Args)]
pub struct BuildArgs {
    /// Release branch to record (e.g. quincy, reef, main)
    pub branch: String,

    /// OS type to query builds for
    #[arg(long)]
    pub os_type: Option<String>,

    /// OS version to query builds for
    #[arg(long)]
    pub os_version: Option<String>,

    /// Build architecture
    #[arg(long)]
    pub arch: Option<String>,

    /// Registry file (overrides BUILDREG_REGISTRY_PATH and config)
    #[arg(long, value_name = "PATH")]
    pub registry: Option<String>,

    /// Lock implementation: marker or lease
    #[arg(long, value_name = "MODE")]
    pub lock_mode: Option<String>,

    /// Do not pull the container image before recording the build
    #[arg(long)]
    pub skip_pull: bool,
}

pub fn run(args: BuildArgs, _global: &crate::commands::GlobalArgs) -> CmdResult<UpdateOutcome> {
    let defaults = defaults::load_defaults();
    run_with_defaults(args, &defaults)
}

fn run_with_defaults(args: BuildArgs, defaults: &Defaults) -> CmdResult<UpdateOutcome> {
    if args.branch.trim().is_empty() {
        return Err(buildreg::Error::validation_missing_argument(vec![
            "branch".to_string(),
        ]));
    }

    let registry_path = defaults::resolve_registry_path(args.registry.as_deref(), defaults)?;
    let timing = defaults.lock.timing()?;
    let mode = match args.lock_mode.as_deref() {
        Some(value) => LockMode::parse(value)?,
        None => defaults.lock.mode,
    };

    let query = query_for(&args, defaults);
    let client = UpstreamClient::new(&defaults.upstream)?;
    let puller = (!args.skip_pull).then(|| ImagePuller::from_config(&defaults.image));

    let coordinator = UpdateCoordinator::new(
        registry_path,
        lock::lock_for(mode, defaults.lock.lease_ttl()),
        timing,
    );

    let outcome = coordinator.update(&args.branch, || {
        let record = client.latest_build(&query)?;
        if let Some(puller) = &puller {
            puller.pull(&record.image_reference)?;
        }
        Ok(record)
    })?;

    let exit_code = if outcome.lock_release_error.is_some() {
        EXIT_LOCK_NOT_RELEASED
    } else {
        0
    };
    Ok((outcome, exit_code))
}

fn query_for(args: &BuildArgs, defaults: &Defaults) -> BuildQuery {
    let mut query = BuildQuery::new(&args.branch, &defaults.upstream);
    if let Some(os_type) = &args.os_type {
        query.os_type = os_type.clone();
    }
    if let Some(os_version) = &args.os_version {
        query.os_version = os_version.clone();
    }
    if let Some(arch) = &args.arch {
        query.arch = arch.clone();
    }
    query
}

#[cfg(test)]
mod tests {
    use super::*;
    use buildreg::ErrorCode;

    fn args(branch: &str) -> BuildArgs {
        BuildArgs {
            branch: branch.to_string(),
            os_type: None,
            os_version: None,
            arch: None,
            registry: Some("/tmp/buildreg-test-upstream.yaml".to_string()),
            lock_mode: None,
            skip_pull: true,
        }
    }

    #[test]
    fn flags_override_configured_query() {
        let mut a = args("reef");
        a.os_type = Some("rhel".to_string());
        a.arch = Some("aarch64".to_string());

        let query = query_for(&a, &Defaults::default());
        assert_eq!(query.branch, "reef");
        assert_eq!(query.os_type, "rhel");
        assert_eq!(query.os_version, "9");
        assert_eq!(query.arch, "aarch64");
    }

    #[test]
    fn empty_branch_is_rejected() {
        let err = run_with_defaults(args("  "), &Defaults::default()).unwrap_err();
        assert_eq!(err.code, ErrorCode::ValidationMissingArgument);
    }

    #[test]
    fn unknown_lock_mode_is_rejected_before_any_request() {
        let mut a = args("quincy");
        a.lock_mode = Some("flock".to_string());
        let err = run_with_defaults(a, &Defaults::default()).unwrap_err();
        assert_eq!(err.code, ErrorCode::ValidationInvalidArgument);
    }
}
