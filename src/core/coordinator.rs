//! Merge a freshly published build into the shared registry.
//!
//! The registry is read twice. The first read happens without the lock and
//! only decides whether a write is warranted at all, so jobs that have
//! nothing new never contend for the lock. The second read happens under
//! the lock and is the authoritative one: the candidate is compared again
//! against whatever a concurrent job may have written meanwhile, then merged
//! and persisted. Nothing but re-load, merge and persist runs while the lock
//! is held.

use crate::error::Result;
use crate::lock::{FileLock, LockGuard, LockMode, LockTiming};
use crate::registry::{self, BuildRecord};
use crate::version::{self, FlatVersion};
use serde::Serialize;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateAction {
    /// Branch had no entry; one was written.
    Created,
    /// Branch entry was replaced by a newer build.
    Updated,
    /// Candidate not newer than the registry (checked without the lock).
    Skipped,
    /// Candidate was newer on the first read, but another job stored an
    /// equal or newer build before we got the lock.
    Superseded,
}

#[derive(Debug, Clone, Serialize)]
pub struct UpdateOutcome {
    pub branch: String,
    pub action: UpdateAction,
    pub registry: String,
    pub lock_mode: LockMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous: Option<BuildRecord>,
    pub candidate: BuildRecord,
    /// Set when the registry write finished but the lock could not be released.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lock_release_error: Option<String>,
}

pub struct UpdateCoordinator {
    registry_path: PathBuf,
    lock: Box<dyn FileLock + Send + Sync>,
    timing: LockTiming,
}

impl UpdateCoordinator {
    pub fn new(
        registry_path: impl Into<PathBuf>,
        lock: Box<dyn FileLock + Send + Sync>,
        timing: LockTiming,
    ) -> Self {
        Self {
            registry_path: registry_path.into(),
            lock,
            timing,
        }
    }

    /// Fetch a candidate build for `branch` and store it if it is newer than
    /// the registry entry.
    ///
    /// `fetch_candidate` runs first and outside the lock; if it fails the
    /// registry is not touched.
    pub fn update<F>(&self, branch: &str, fetch_candidate: F) -> Result<UpdateOutcome>
    where
        F: FnOnce() -> Result<BuildRecord>,
    {
        let candidate = fetch_candidate()?;

        let current = registry::load(&self.registry_path)?;
        match current.get(branch) {
            Some(existing) if !version::is_newer(&existing.version, &candidate.version) => {
                log_status!(
                    "registry",
                    "{} {} is not newer than {}, nothing to do",
                    branch,
                    candidate.version,
                    existing.version
                );
                return Ok(self.outcome(
                    branch,
                    UpdateAction::Skipped,
                    Some(existing.clone()),
                    candidate,
                ));
            }
            Some(_) => {}
            None => {
                FlatVersion::parse(&candidate.version)?;
            }
        }

        let guard = LockGuard::acquire(self.lock.as_ref(), &self.registry_path, self.timing)?;
        let merged = self.merge_locked(branch, candidate);
        let released = guard.release();

        match (merged, released) {
            (Ok(outcome), Ok(())) => Ok(outcome),
            (Ok(mut outcome), Err(err)) => {
                log_status!("lock", "{}", err);
                outcome.lock_release_error = Some(describe_release_error(&err));
                Ok(outcome)
            }
            (Err(err), Ok(())) => Err(err),
            (Err(err), Err(release_err)) => {
                log_status!("lock", "{}", release_err);
                Err(err)
            }
        }
    }

    fn merge_locked(&self, branch: &str, candidate: BuildRecord) -> Result<UpdateOutcome> {
        let current = registry::load(&self.registry_path)?;
        let previous = current.get(branch).cloned();

        if let Some(existing) = &previous {
            if !version::is_newer(&existing.version, &candidate.version) {
                log_status!(
                    "registry",
                    "{} already at {} (written concurrently), not storing {}",
                    branch,
                    existing.version,
                    candidate.version
                );
                return Ok(self.outcome(branch, UpdateAction::Superseded, previous, candidate));
            }
        }

        let merged = registry::upsert(current, branch, candidate.clone());
        registry::persist(&self.registry_path, &merged)?;

        log_status!(
            "registry",
            "Updated build info for {}: version {}, repo {}, image {}",
            branch,
            candidate.version,
            candidate.artifact_location,
            candidate.image_reference
        );

        let action = if previous.is_some() {
            UpdateAction::Updated
        } else {
            UpdateAction::Created
        };
        Ok(self.outcome(branch, action, previous, candidate))
    }

    fn outcome(
        &self,
        branch: &str,
        action: UpdateAction,
        previous: Option<BuildRecord>,
        candidate: BuildRecord,
    ) -> UpdateOutcome {
        UpdateOutcome {
            branch: branch.to_string(),
            action,
            registry: self.registry_path.display().to_string(),
            lock_mode: self.lock.mode(),
            previous,
            candidate,
            lock_release_error: None,
        }
    }
}

fn describe_release_error(err: &crate::Error) -> String {
    match err.details.get("error").and_then(|e| e.as_str()) {
        Some(cause) => format!("{}: {}", err.message, cause),
        None => err.message.clone(),
    }
}
