//! The shared build registry: one YAML document mapping branch name to the
//! latest known build for that branch.
//!
//! ```yaml
//! quincy:
//!   ceph-version: 17.2.7-12
//!   composes: https://chacra.ceph.com/r/ceph/quincy/0ab1/centos/9/flavors/default/repo
//!   image: quay.ceph.io/ceph-ci/ceph:0ab1
//! ```
//!
//! A branch with a null value (`quincy:` and nothing under it) has no build
//! recorded; it is written back unchanged until that branch is updated. An
//! entry that is present but lacks one of the three keys makes the whole
//! document invalid, and nothing is written over it.
//!
//! The file is rewritten in place by [`persist`]; there is no temp-file and
//! rename step, so an interrupted write can leave it truncated.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::Path;

/// Latest published build for one branch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildRecord {
    #[serde(rename = "ceph-version")]
    pub version: String,
    #[serde(rename = "composes")]
    pub artifact_location: String,
    #[serde(rename = "image")]
    pub image_reference: String,
    /// Keys written by other tools; carried through untouched.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yml::Value>,
}

impl BuildRecord {
    pub fn new(
        version: impl Into<String>,
        artifact_location: impl Into<String>,
        image_reference: impl Into<String>,
    ) -> Self {
        Self {
            version: version.into(),
            artifact_location: artifact_location.into(),
            image_reference: image_reference.into(),
            extra: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Registry {
    entries: BTreeMap<String, Option<BuildRecord>>,
}

impl Registry {
    pub fn get(&self, branch: &str) -> Option<&BuildRecord> {
        self.entries.get(branch).and_then(Option::as_ref)
    }

    /// Branches with a recorded build.
    pub fn branches(&self) -> impl Iterator<Item = &str> {
        self.entries
            .iter()
            .filter(|(_, record)| record.is_some())
            .map(|(branch, _)| branch.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.values().filter(|record| record.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Parse registry YAML. An empty or null document is an empty registry.
pub fn parse(content: &str) -> std::result::Result<Registry, serde_yml::Error> {
    if content.trim().is_empty() {
        return Ok(Registry::default());
    }
    let parsed: Option<Registry> = serde_yml::from_str(content)?;
    Ok(parsed.unwrap_or_default())
}

/// Load the registry at `path`. A missing file is an empty registry.
pub fn load(path: &Path) -> Result<Registry> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Registry::default()),
        Err(e) => {
            return Err(Error::internal_io(
                e.to_string(),
                Some(format!("read {}", path.display())),
            ))
        }
    };

    parse(&content)
        .map_err(|e| Error::registry_invalid_format(path.display().to_string(), e.to_string()))
}

/// Return `registry` with `branch` set to `record`.
///
/// Other branches are untouched. For an existing branch the three build
/// fields are replaced and any extra keys on the old entry are kept.
pub fn upsert(mut registry: Registry, branch: &str, record: BuildRecord) -> Registry {
    match registry.entries.get_mut(branch) {
        Some(Some(existing)) => {
            existing.version = record.version;
            existing.artifact_location = record.artifact_location;
            existing.image_reference = record.image_reference;
            existing.extra.extend(record.extra);
        }
        _ => {
            registry.entries.insert(branch.to_string(), Some(record));
        }
    }
    registry
}

/// Serialize `registry` and overwrite the file at `path`.
pub fn persist(path: &Path, registry: &Registry) -> Result<()> {
    let content = serde_yml::to_string(registry).map_err(|e| {
        Error::internal_unexpected(format!("serialize registry: {}", e))
    })?;

    fs::write(path, content).map_err(|e| {
        Error::internal_io(e.to_string(), Some(format!("write {}", path.display())))
    })
}
