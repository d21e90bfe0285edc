//! Advisory locking for files on shared storage.
//!
//! A lock on `resource` is the existence of the marker `<resource>.lock`.
//! Acquisition creates the marker only if it is absent; contenders poll at a
//! fixed interval until it disappears or the timeout runs out. Nothing else
//! is shared between holders and waiters, so this only protects cooperating
//! processes that all go through [`FileLock`].
//!
//! Two implementations:
//!
//! - [`MarkerLock`]: the bare marker. It records no owner, so any process can
//!   release it, and a marker left behind by a killed holder blocks everyone
//!   until it is removed by hand (`buildreg lock release`).
//! - [`LeaseLock`]: the marker holds a [`Lease`] (owner id, host, pid,
//!   acquisition time, TTL). Expired leases are reclaimed by waiters and only
//!   the owner may release.

use crate::error::{Error, LockTimeoutDetails, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant, SystemTime};
use uuid::Uuid;

pub const MARKER_SUFFIX: &str = ".lock";

const DEFAULT_TIMEOUT_SECS: u64 = 600;
const DEFAULT_POLL_INTERVAL_SECS: u64 = 120;

/// Marker path for a resource: the resource path with `.lock` appended.
pub fn marker_path(resource: &Path) -> PathBuf {
    let mut marker = resource.as_os_str().to_os_string();
    marker.push(MARKER_SUFFIX);
    PathBuf::from(marker)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockTiming {
    pub timeout: Duration,
    pub poll_interval: Duration,
}

impl LockTiming {
    pub fn new(timeout: Duration, poll_interval: Duration) -> Self {
        Self {
            timeout,
            poll_interval,
        }
    }

    pub fn from_secs(timeout_secs: u64, poll_interval_secs: u64) -> Self {
        Self::new(
            Duration::from_secs(timeout_secs),
            Duration::from_secs(poll_interval_secs),
        )
    }
}

impl Default for LockTiming {
    fn default() -> Self {
        Self::from_secs(DEFAULT_TIMEOUT_SECS, DEFAULT_POLL_INTERVAL_SECS)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockMode {
    Marker,
    Lease,
}

impl LockMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            LockMode::Marker => "marker",
            LockMode::Lease => "lease",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "marker" => Ok(LockMode::Marker),
            "lease" => Ok(LockMode::Lease),
            other => Err(Error::validation_invalid_argument(
                "lock_mode",
                format!("Unknown lock mode: {}", other),
                Some(other.to_string()),
                Some(vec!["marker".to_string(), "lease".to_string()]),
            )),
        }
    }
}

/// Proof of holding the lock on one resource. Consumed by release.
#[derive(Debug)]
pub struct LockHandle {
    resource: PathBuf,
    marker: PathBuf,
    owner: Option<Uuid>,
}

impl LockHandle {
    pub fn resource(&self) -> &Path {
        &self.resource
    }

    pub fn marker(&self) -> &Path {
        &self.marker
    }

    /// Lease owner id; `None` for the ownerless marker lock.
    pub fn owner(&self) -> Option<Uuid> {
        self.owner
    }
}

pub trait FileLock {
    /// Block until the lock on `resource` is held or `timing.timeout` elapses.
    fn acquire(&self, resource: &Path, timing: LockTiming) -> Result<LockHandle>;

    fn release(&self, handle: LockHandle) -> Result<()>;

    fn mode(&self) -> LockMode;
}

/// Build the lock implementation for a mode.
pub fn lock_for(mode: LockMode, lease_ttl: Duration) -> Box<dyn FileLock + Send + Sync> {
    match mode {
        LockMode::Marker => Box::new(MarkerLock::new()),
        LockMode::Lease => Box::new(LeaseLock::new(lease_ttl)),
    }
}

/// Create `marker` with `contents` if it does not exist yet.
/// Returns `Ok(false)` when someone else already holds it.
fn try_create(marker: &Path, contents: &[u8]) -> io::Result<bool> {
    create_marker_with(marker, |file| {
        file.write_all(contents)?;
        file.sync_all()
    })
}

/// Create `marker` and fill it. A marker whose contents could not be written
/// is removed again before the error is returned.
fn create_marker_with<F>(marker: &Path, fill: F) -> io::Result<bool>
where
    F: FnOnce(&mut File) -> io::Result<()>,
{
    let mut file = match OpenOptions::new().write(true).create_new(true).open(marker) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => return Ok(false),
        Err(e) => return Err(e),
    };

    if let Err(e) = fill(&mut file) {
        drop(file);
        if let Err(cleanup) = fs::remove_file(marker) {
            log_status!(
                "lock",
                "Could not remove partially written {}: {}",
                marker.display(),
                cleanup
            );
        }
        return Err(e);
    }
    Ok(true)
}

fn marker_io_error(marker: &Path, e: io::Error) -> Error {
    Error::internal_io(e.to_string(), Some(format!("create {}", marker.display())))
}

/// Run `attempt` until it yields a handle, sleeping `poll_interval` between
/// tries. Fails with a lock timeout once `timeout` has elapsed.
fn poll_until<F>(
    resource: &Path,
    marker: &Path,
    timing: LockTiming,
    mut attempt: F,
) -> Result<LockHandle>
where
    F: FnMut() -> Result<Option<LockHandle>>,
{
    let started = Instant::now();
    let mut announced = false;

    loop {
        if let Some(handle) = attempt()? {
            if announced {
                log_status!(
                    "lock",
                    "Acquired {} after {}s",
                    marker.display(),
                    started.elapsed().as_secs()
                );
            }
            return Ok(handle);
        }

        let waited = started.elapsed();
        if waited >= timing.timeout {
            return Err(Error::lock_timeout(LockTimeoutDetails {
                resource: resource.display().to_string(),
                marker: marker.display().to_string(),
                waited_secs: waited.as_secs(),
                timeout_secs: timing.timeout.as_secs(),
            }));
        }

        if !announced {
            log_status!(
                "lock",
                "{} exists, retrying every {}s for up to {}s",
                marker.display(),
                timing.poll_interval.as_secs(),
                timing.timeout.as_secs()
            );
            announced = true;
        }

        thread::sleep(timing.poll_interval.min(timing.timeout - waited));
    }
}

/// Ownerless marker-file lock.
#[derive(Debug, Default, Clone, Copy)]
pub struct MarkerLock;

impl MarkerLock {
    pub fn new() -> Self {
        Self
    }
}

impl FileLock for MarkerLock {
    fn acquire(&self, resource: &Path, timing: LockTiming) -> Result<LockHandle> {
        let marker = marker_path(resource);
        poll_until(resource, &marker, timing, || {
            let created = try_create(&marker, b"").map_err(|e| marker_io_error(&marker, e))?;
            Ok(created.then(|| LockHandle {
                resource: resource.to_path_buf(),
                marker: marker.clone(),
                owner: None,
            }))
        })
    }

    /// Delete the marker. A marker that is already gone counts as released.
    fn release(&self, handle: LockHandle) -> Result<()> {
        match fs::remove_file(&handle.marker) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::lock_release_failed(
                handle.resource.display().to_string(),
                handle.marker.display().to_string(),
                e.to_string(),
            )),
        }
    }

    fn mode(&self) -> LockMode {
        LockMode::Marker
    }
}

/// Lease record stored in the marker by [`LeaseLock`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    pub owner_id: Uuid,
    pub host: String,
    pub pid: u32,
    pub acquired_at: DateTime<Utc>,
    pub ttl_secs: u64,
}

impl Lease {
    pub fn new(ttl: Duration) -> Self {
        Self {
            owner_id: Uuid::new_v4(),
            host: std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string()),
            pid: std::process::id(),
            acquired_at: Utc::now(),
            ttl_secs: ttl.as_secs(),
        }
    }

    /// `None` when the TTL is too large to represent; such a lease never expires.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        let ttl = i64::try_from(self.ttl_secs).ok()?;
        self.acquired_at
            .checked_add_signed(chrono::Duration::try_seconds(ttl)?)
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at().is_some_and(|at| now >= at)
    }
}

fn tombstone_path(marker: &Path) -> PathBuf {
    let mut tombstone = marker.as_os_str().to_os_string();
    tombstone.push(format!(".reclaim.{}", Uuid::new_v4()));
    PathBuf::from(tombstone)
}

/// Read the lease stored in a marker, if the marker exists and holds one.
pub fn read_lease(marker: &Path) -> Option<Lease> {
    let content = fs::read_to_string(marker).ok()?;
    serde_json::from_str(&content).ok()
}

fn marker_age(marker: &Path) -> io::Result<Duration> {
    let modified = fs::metadata(marker)?.modified()?;
    Ok(SystemTime::now()
        .duration_since(modified)
        .unwrap_or_default())
}

/// Marker lock with an owner-tagged, time-bounded lease.
#[derive(Debug, Clone, Copy)]
pub struct LeaseLock {
    ttl: Duration,
}

impl LeaseLock {
    pub fn new(ttl: Duration) -> Self {
        Self { ttl }
    }

    /// Remove the marker when its lease has run out. Returns true when the
    /// marker is gone and creation should be retried right away.
    ///
    /// Markers without a readable lease (written by [`MarkerLock`] or caught
    /// mid-write) are judged by file modification time against our TTL.
    fn reclaim_if_expired(&self, marker: &Path) -> Result<bool> {
        let content = match fs::read_to_string(marker) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(true),
            Err(e) => {
                return Err(Error::internal_io(
                    e.to_string(),
                    Some(format!("read {}", marker.display())),
                ))
            }
        };

        let expired = match serde_json::from_str::<Lease>(&content) {
            Ok(lease) => lease.is_expired_at(Utc::now()),
            Err(_) => match marker_age(marker) {
                Ok(age) => age >= self.ttl,
                Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(true),
                Err(e) => {
                    return Err(Error::internal_io(
                        e.to_string(),
                        Some(format!("stat {}", marker.display())),
                    ))
                }
            },
        };

        if !expired {
            return Ok(false);
        }

        log_status!("lock", "Reclaiming expired lease {}", marker.display());
        self.reclaim(marker, &content)
    }

    /// Remove `marker` only if it still holds `judged`, the content it was
    /// found expired with.
    ///
    /// The marker is first renamed to a unique tombstone, so no other waiter
    /// can act on the same file. If the tombstone turns out to hold a newer
    /// lease (another waiter reclaimed first and took the lock), it is linked
    /// back into place and the lock counts as contended.
    fn reclaim(&self, marker: &Path, judged: &str) -> Result<bool> {
        let tombstone = tombstone_path(marker);
        match fs::rename(marker, &tombstone) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(true),
            Err(e) => {
                return Err(Error::internal_io(
                    e.to_string(),
                    Some(format!("move expired {}", marker.display())),
                ))
            }
        }

        let moved = fs::read_to_string(&tombstone).map_err(|e| {
            Error::internal_io(e.to_string(), Some(format!("read {}", tombstone.display())))
        })?;

        if moved == judged {
            fs::remove_file(&tombstone).map_err(|e| {
                Error::internal_io(
                    e.to_string(),
                    Some(format!("remove expired {}", tombstone.display())),
                )
            })?;
            return Ok(true);
        }

        // Not the lease we judged: put the holder's marker back without
        // clobbering a marker created in the meantime.
        match fs::hard_link(&tombstone, marker) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                log_status!(
                    "lock",
                    "{} was re-created while a live lease was set aside",
                    marker.display()
                );
            }
            Err(_) => {
                // No hard links on this filesystem.
                return fs::rename(&tombstone, marker).map(|()| false).map_err(|e| {
                    Error::internal_io(e.to_string(), Some(format!("restore {}", marker.display())))
                });
            }
        }
        fs::remove_file(&tombstone).map_err(|e| {
            Error::internal_io(e.to_string(), Some(format!("remove {}", tombstone.display())))
        })?;
        Ok(false)
    }

    fn try_acquire(&self, resource: &Path, marker: &Path) -> Result<Option<LockHandle>> {
        let lease = Lease::new(self.ttl);
        let contents = serde_json::to_vec_pretty(&lease)
            .map_err(|e| Error::internal_json(e.to_string(), Some("serialize lease".to_string())))?;

        let handle = || LockHandle {
            resource: resource.to_path_buf(),
            marker: marker.to_path_buf(),
            owner: Some(lease.owner_id),
        };

        if try_create(marker, &contents).map_err(|e| marker_io_error(marker, e))? {
            return Ok(Some(handle()));
        }
        if self.reclaim_if_expired(marker)?
            && try_create(marker, &contents).map_err(|e| marker_io_error(marker, e))?
        {
            return Ok(Some(handle()));
        }
        Ok(None)
    }
}

impl FileLock for LeaseLock {
    fn acquire(&self, resource: &Path, timing: LockTiming) -> Result<LockHandle> {
        let marker = marker_path(resource);
        poll_until(resource, &marker, timing, || {
            self.try_acquire(resource, &marker)
        })
    }

    /// Delete the marker only if it still carries this handle's lease.
    fn release(&self, handle: LockHandle) -> Result<()> {
        let release_error = |problem: String| {
            Error::lock_release_failed(
                handle.resource.display().to_string(),
                handle.marker.display().to_string(),
                problem,
            )
        };

        let content = fs::read_to_string(&handle.marker).map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                release_error("lease marker is missing; it was reclaimed or removed".to_string())
            } else {
                release_error(e.to_string())
            }
        })?;

        let lease: Lease = serde_json::from_str(&content)
            .map_err(|e| release_error(format!("marker does not hold a lease: {}", e)))?;

        if Some(lease.owner_id) != handle.owner {
            return Err(release_error(format!(
                "lease is held by {} (pid {} on {})",
                lease.owner_id, lease.pid, lease.host
            )));
        }

        fs::remove_file(&handle.marker).map_err(|e| release_error(e.to_string()))
    }

    fn mode(&self) -> LockMode {
        LockMode::Lease
    }
}

/// Scoped hold on a [`FileLock`].
///
/// Call [`LockGuard::release`] to observe the release result. If the guard
/// is dropped instead (early return, panic) the lock is still released and a
/// failure is only logged.
pub struct LockGuard<'a> {
    lock: &'a dyn FileLock,
    handle: Option<LockHandle>,
}

impl<'a> LockGuard<'a> {
    pub fn acquire(lock: &'a dyn FileLock, resource: &Path, timing: LockTiming) -> Result<Self> {
        let handle = lock.acquire(resource, timing)?;
        Ok(Self {
            lock,
            handle: Some(handle),
        })
    }

    pub fn handle(&self) -> Option<&LockHandle> {
        self.handle.as_ref()
    }

    pub fn release(mut self) -> Result<()> {
        match self.handle.take() {
            Some(handle) => self.lock.release(handle),
            None => Ok(()),
        }
    }
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            if let Err(err) = self.lock.release(handle) {
                log_status!("lock", "{}: {}", err, err.details);
            }
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LockStatus {
    pub resource: String,
    pub marker: String,
    pub held: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub age_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lease: Option<Lease>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lease_expired: Option<bool>,
}

/// Describe the marker for `resource` without touching it.
pub fn inspect(resource: &Path) -> LockStatus {
    let marker = marker_path(resource);
    let held = marker.exists();
    let lease = if held { read_lease(&marker) } else { None };
    let lease_expired = lease.as_ref().map(|l| l.is_expired_at(Utc::now()));

    LockStatus {
        resource: resource.display().to_string(),
        marker: marker.display().to_string(),
        held,
        age_secs: marker_age(&marker).ok().map(|age| age.as_secs()),
        lease,
        lease_expired,
    }
}

/// Remove the marker for `resource` regardless of who holds it.
/// Returns whether a marker was present.
pub fn force_release(resource: &Path) -> Result<bool> {
    let marker = marker_path(resource);
    match fs::remove_file(&marker) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(Error::lock_release_failed(
            resource.display().to_string(),
            marker.display().to_string(),
            e.to_string(),
        )),
    }
}
