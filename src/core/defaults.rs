use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

use crate::error::{Error, Result};
use crate::lock::{LockMode, LockTiming};
use crate::paths;

/// Overrides the configured registry path (CLI flags still win).
pub const ENV_REGISTRY_PATH: &str = "BUILDREG_REGISTRY_PATH";

/// Root configuration structure for buildreg.json
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct BuildregConfig {
    #[serde(default)]
    pub defaults: Defaults,
}

/// All configurable defaults that can be overridden via buildreg.json
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Defaults {
    #[serde(default = "default_registry_path")]
    pub registry_path: String,

    #[serde(default)]
    pub lock: LockConfig,

    #[serde(default)]
    pub upstream: UpstreamConfig,

    #[serde(default)]
    pub image: ImageConfig,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            registry_path: default_registry_path(),
            lock: LockConfig::default(),
            upstream: UpstreamConfig::default(),
            image: ImageConfig::default(),
        }
    }
}

/// Registry lock behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockConfig {
    #[serde(default = "default_lock_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_lock_poll_interval_secs")]
    pub poll_interval_secs: u64,

    #[serde(default = "default_lock_mode")]
    pub mode: LockMode,

    /// Only used by the lease lock
    #[serde(default = "default_lease_ttl_secs")]
    pub lease_ttl_secs: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_lock_timeout_secs(),
            poll_interval_secs: default_lock_poll_interval_secs(),
            mode: default_lock_mode(),
            lease_ttl_secs: default_lease_ttl_secs(),
        }
    }
}

impl LockConfig {
    pub fn timing(&self) -> Result<LockTiming> {
        if self.poll_interval_secs == 0 {
            return Err(Error::config_invalid_value(
                "lock.poll_interval_secs",
                Some("0".to_string()),
                "poll interval must be at least one second",
            ));
        }
        Ok(LockTiming::from_secs(self.timeout_secs, self.poll_interval_secs))
    }

    pub fn lease_ttl(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.lease_ttl_secs)
    }
}

/// Build index (shaman) query defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    #[serde(default = "default_upstream_base_url")]
    pub base_url: String,

    #[serde(default = "default_os_type")]
    pub os_type: String,

    #[serde(default = "default_os_version")]
    pub os_version: String,

    #[serde(default = "default_arch")]
    pub arch: String,

    #[serde(default = "default_image_repository")]
    pub image_repository: String,

    #[serde(default = "default_upstream_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: default_upstream_base_url(),
            os_type: default_os_type(),
            os_version: default_os_version(),
            arch: default_arch(),
            image_repository: default_image_repository(),
            timeout_secs: default_upstream_timeout_secs(),
        }
    }
}

/// Container runtime used to pull build images
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageConfig {
    #[serde(default = "default_image_runtime")]
    pub runtime: String,

    #[serde(default = "default_use_sudo")]
    pub use_sudo: bool,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            runtime: default_image_runtime(),
            use_sudo: default_use_sudo(),
        }
    }
}

// =============================================================================
// Default value functions
// =============================================================================

fn default_registry_path() -> String {
    "/ceph/cephci-jenkins/latest-rhceph-container-info/upstream.yaml".to_string()
}

fn default_lock_timeout_secs() -> u64 {
    600
}

fn default_lock_poll_interval_secs() -> u64 {
    120
}

fn default_lock_mode() -> LockMode {
    LockMode::Marker
}

fn default_lease_ttl_secs() -> u64 {
    3600
}

fn default_upstream_base_url() -> String {
    "https://shaman.ceph.com/api/repos/ceph/".to_string()
}

fn default_os_type() -> String {
    "centos".to_string()
}

fn default_os_version() -> String {
    "9".to_string()
}

fn default_arch() -> String {
    "x86_64".to_string()
}

fn default_image_repository() -> String {
    "quay.ceph.io/ceph-ci/ceph".to_string()
}

fn default_upstream_timeout_secs() -> u64 {
    30
}

fn default_image_runtime() -> String {
    "podman".to_string()
}

fn default_use_sudo() -> bool {
    true
}

// =============================================================================
// Loading functions
// =============================================================================

/// Load defaults, merging file config with built-in defaults.
/// If buildreg.json is missing or invalid, silently returns built-in defaults.
pub fn load_defaults() -> Defaults {
    load_config().defaults
}

/// Load the full buildreg.json config, falling back to defaults on any error.
pub fn load_config() -> BuildregConfig {
    load_config_from_file().unwrap_or_default()
}

/// Attempt to load config from buildreg.json file.
fn load_config_from_file() -> Result<BuildregConfig> {
    let path = paths::buildreg_json()?;

    if !path.exists() {
        return Err(Error::other("buildreg.json not found"));
    }

    let content = fs::read_to_string(&path).map_err(|e| {
        Error::internal_io(e.to_string(), Some(format!("read {}", path.display())))
    })?;

    parse_config(&content, &path.display().to_string())
}

fn parse_config(content: &str, origin: &str) -> Result<BuildregConfig> {
    serde_json::from_str(content).map_err(|e| Error::config_invalid_json(origin, e))
}

/// Get the path to buildreg.json (for display purposes)
pub fn config_path() -> Result<String> {
    Ok(paths::buildreg_json()?.display().to_string())
}

/// Check if buildreg.json file exists
pub fn config_exists() -> bool {
    paths::buildreg_json()
        .map(|p| p.exists())
        .unwrap_or(false)
}

/// Pick the registry path: CLI flag, then environment, then config.
/// `~` and `$VAR` references are expanded.
pub fn resolve_registry_path(flag: Option<&str>, defaults: &Defaults) -> Result<PathBuf> {
    let from_env = std::env::var(ENV_REGISTRY_PATH).ok();
    select_registry_path(flag, from_env.as_deref(), &defaults.registry_path)
}

fn select_registry_path(
    flag: Option<&str>,
    from_env: Option<&str>,
    configured: &str,
) -> Result<PathBuf> {
    let raw = flag
        .or(from_env.filter(|v| !v.trim().is_empty()))
        .unwrap_or(configured);

    if raw.trim().is_empty() {
        return Err(Error::config_invalid_value(
            "registry_path",
            None,
            "registry path is empty",
        ));
    }

    let expanded = shellexpand::full(raw).map_err(|e| {
        Error::config_invalid_value("registry_path", Some(raw.to_string()), e.to_string())
    })?;

    Ok(PathBuf::from(expanded.as_ref()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    #[test]
    fn builtin_defaults_match_ci_layout() {
        let defaults = Defaults::default();
        assert_eq!(
            defaults.registry_path,
            "/ceph/cephci-jenkins/latest-rhceph-container-info/upstream.yaml"
        );
        assert_eq!(defaults.lock.timeout_secs, 600);
        assert_eq!(defaults.lock.poll_interval_secs, 120);
        assert_eq!(defaults.lock.mode, LockMode::Marker);
        assert_eq!(defaults.upstream.os_type, "centos");
        assert_eq!(defaults.upstream.os_version, "9");
        assert_eq!(defaults.upstream.arch, "x86_64");
        assert_eq!(defaults.upstream.timeout_secs, 30);
        assert_eq!(defaults.image.runtime, "podman");
        assert!(defaults.image.use_sudo);
    }

    #[test]
    fn partial_config_keeps_remaining_defaults() {
        let config = parse_config(
            r#"{"defaults": {"lock": {"mode": "lease", "poll_interval_secs": 5}}}"#,
            "buildreg.json",
        )
        .unwrap();

        assert_eq!(config.defaults.lock.mode, LockMode::Lease);
        assert_eq!(config.defaults.lock.poll_interval_secs, 5);
        assert_eq!(config.defaults.lock.timeout_secs, 600);
        assert_eq!(config.defaults.upstream.arch, "x86_64");
    }

    #[test]
    fn invalid_config_json_is_reported() {
        let err = parse_config("{not json", "buildreg.json").unwrap_err();
        assert_eq!(err.code, ErrorCode::ConfigInvalidJson);
        assert_eq!(err.details["path"], "buildreg.json");
    }

    #[test]
    fn zero_poll_interval_is_rejected() {
        let lock = LockConfig {
            poll_interval_secs: 0,
            ..LockConfig::default()
        };
        let err = lock.timing().unwrap_err();
        assert_eq!(err.code, ErrorCode::ConfigInvalidValue);
    }

    #[test]
    fn registry_path_precedence() {
        let configured = "/srv/upstream.yaml";
        assert_eq!(
            select_registry_path(Some("/flag.yaml"), Some("/env.yaml"), configured).unwrap(),
            PathBuf::from("/flag.yaml")
        );
        assert_eq!(
            select_registry_path(None, Some("/env.yaml"), configured).unwrap(),
            PathBuf::from("/env.yaml")
        );
        assert_eq!(
            select_registry_path(None, Some("  "), configured).unwrap(),
            PathBuf::from(configured)
        );
        assert_eq!(
            select_registry_path(None, None, configured).unwrap(),
            PathBuf::from(configured)
        );
    }

    #[test]
    fn empty_registry_path_is_rejected() {
        let err = select_registry_path(Some(""), None, "/srv/upstream.yaml").unwrap_err();
        assert_eq!(err.code, ErrorCode::ConfigInvalidValue);
    }
}
