//! # File I/O Module
//!
//! Handles design space snapshot files with safety features:
//! - **Atomic saves**: Write to .tmp, sync, rename to prevent corruption
//! - **File locking**: Prevent concurrent edits on shared drives
//! - **Version validation**: Ensure schema compatibility
//!
//! ## File Format
//!
//! Snapshots are saved as `.dbs` (design basis space) files containing
//! JSON. Lock files use `.dbs.lock` extension with metadata about who
//! holds the lock.
//!
//! ## Example
//!
//! ```rust,no_run
//! use basis_core::file_io::{save_space, load_space, FileLock};
//! use basis_core::space::DesignSpace;
//! use std::path::Path;
//!
//! let space = DesignSpace::new("Engineer", "25-001", "Unit 1");
//! let path = Path::new("unit1.dbs");
//!
//! // Acquire lock before saving
//! let lock = FileLock::acquire(path, "engineer@company.com").unwrap();
//!
//! // Save with atomic write
//! save_space(&space, path).unwrap();
//!
//! // Lock is released when dropped
//! drop(lock);
//! ```

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use fs2::FileExt;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::{EngineError, EngineResult};
use crate::space::{DesignSpace, SCHEMA_VERSION};

/// Lock file metadata stored in .dbs.lock files
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockInfo {
    /// User identifier (email or username)
    pub user_id: String,
    /// Machine name where lock was acquired
    pub machine: String,
    /// Process ID that holds the lock
    pub pid: u32,
    /// When the lock was acquired
    pub locked_at: DateTime<Utc>,
}

impl LockInfo {
    /// Create new lock info for the current process
    pub fn new(user_id: impl Into<String>) -> Self {
        LockInfo {
            user_id: user_id.into(),
            machine: hostname().unwrap_or_else(|| "unknown".to_string()),
            pid: std::process::id(),
            locked_at: Utc::now(),
        }
    }
}

static HOSTNAME: Lazy<Option<String>> = Lazy::new(|| {
    std::env::var("HOSTNAME")
        .ok()
        .or_else(|| std::env::var("HOST").ok())
        .or_else(|| std::env::var("COMPUTERNAME").ok())
});

/// Get the hostname of the current machine
fn hostname() -> Option<String> {
    HOSTNAME.clone()
}

/// File lock guard that releases the lock when dropped.
///
/// Uses both:
/// 1. OS-level file locking (via fs2) for process safety
/// 2. .lock file with metadata for user visibility
pub struct FileLock {
    /// Path to the main snapshot file
    space_path: PathBuf,
    /// Path to the lock file
    lock_path: PathBuf,
    /// The underlying file handle (keeps OS lock)
    _lock_file: File,
    /// Lock metadata
    pub info: LockInfo,
}

impl FileLock {
    /// Acquire an exclusive lock on a snapshot file.
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the .dbs snapshot file
    /// * `user_id` - Identifier for the user acquiring the lock
    ///
    /// # Returns
    ///
    /// * `Ok(FileLock)` - Lock acquired successfully
    /// * `Err(EngineError::FileLocked)` - Another process holds the lock
    pub fn acquire(path: &Path, user_id: impl Into<String>) -> EngineResult<Self> {
        let lock_path = lock_path_for(path);
        let info = LockInfo::new(user_id);

        // Check if lock file exists and contains valid lock info
        if lock_path.exists() {
            if let Ok(existing) = read_lock_info(&lock_path) {
                // A live lock from someone else wins; a stale one (dead
                // process, or older than a day) can be taken over
                if !is_lock_stale(&existing) {
                    return Err(EngineError::file_locked(
                        path.display().to_string(),
                        format!("{} ({})", existing.user_id, existing.machine),
                        existing.locked_at.to_rfc3339(),
                    ));
                }
            }
        }

        // Create/open the lock file
        let mut lock_file = OpenOptions::new()
            .write(true)
            .read(true)
            .create(true)
            .truncate(true)
            .open(&lock_path)
            .map_err(|e| {
                EngineError::file_error("create lock", lock_path.display().to_string(), e.to_string())
            })?;

        // Try to acquire exclusive OS-level lock (non-blocking)
        lock_file.try_lock_exclusive().map_err(|_| {
            EngineError::file_locked(
                path.display().to_string(),
                "another process".to_string(),
                "unknown".to_string(),
            )
        })?;

        // Write lock info to the file using the same handle
        let lock_json = serde_json::to_string_pretty(&info).map_err(|e| {
            EngineError::SerializationError {
                reason: e.to_string(),
            }
        })?;

        lock_file.write_all(lock_json.as_bytes()).map_err(|e| {
            EngineError::file_error("write lock", lock_path.display().to_string(), e.to_string())
        })?;

        lock_file.sync_all().map_err(|e| {
            EngineError::file_error("sync lock", lock_path.display().to_string(), e.to_string())
        })?;

        debug!(path = %path.display(), user = %info.user_id, "snapshot lock acquired");
        Ok(FileLock {
            space_path: path.to_path_buf(),
            lock_path,
            _lock_file: lock_file,
            info,
        })
    }

    /// Check if a file is locked without acquiring the lock.
    ///
    /// Returns `Some(LockInfo)` if locked, `None` if available.
    pub fn check(path: &Path) -> Option<LockInfo> {
        let lock_path = lock_path_for(path);
        if lock_path.exists() {
            if let Ok(info) = read_lock_info(&lock_path) {
                if !is_lock_stale(&info) {
                    return Some(info);
                }
            }
        }
        None
    }

    /// Get the path to the snapshot file
    pub fn space_path(&self) -> &Path {
        &self.space_path
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        // Remove the lock file
        let _ = fs::remove_file(&self.lock_path);
        // OS lock is released when _lock_file is dropped
    }
}

/// Get the lock file path for a snapshot file
fn lock_path_for(space_path: &Path) -> PathBuf {
    let mut lock_path = space_path.to_path_buf();
    let extension = lock_path
        .extension()
        .map(|e| format!("{}.lock", e.to_string_lossy()))
        .unwrap_or_else(|| "lock".to_string());
    lock_path.set_extension(extension);
    lock_path
}

/// Read lock info from a lock file
fn read_lock_info(lock_path: &Path) -> EngineResult<LockInfo> {
    let mut file = File::open(lock_path).map_err(|e| {
        EngineError::file_error("read lock", lock_path.display().to_string(), e.to_string())
    })?;

    let mut contents = String::new();
    file.read_to_string(&mut contents).map_err(|e| {
        EngineError::file_error("read lock", lock_path.display().to_string(), e.to_string())
    })?;

    serde_json::from_str(&contents).map_err(|e| EngineError::SerializationError {
        reason: e.to_string(),
    })
}

/// Check if a lock is stale (the process that created it is no longer running)
fn is_lock_stale(info: &LockInfo) -> bool {
    // Check if it's our machine
    if let Some(our_machine) = hostname() {
        if info.machine == our_machine {
            #[cfg(unix)]
            {
                if fs::metadata(format!("/proc/{}", info.pid)).is_err() {
                    return true;
                }
            }
        }
    }

    // If lock is more than 24 hours old, consider it stale
    let age = Utc::now() - info.locked_at;
    if age.num_hours() > 24 {
        return true;
    }

    false
}

/// Save a design space to a file with atomic write semantics.
///
/// The save process:
/// 1. Serialize the space to JSON
/// 2. Write to a temporary file (.tmp)
/// 3. Sync to disk (fsync)
/// 4. Rename .tmp to .dbs (atomic on most filesystems)
///
/// This prevents corruption if the process is interrupted during write.
pub fn save_space(space: &DesignSpace, path: &Path) -> EngineResult<()> {
    let json = serde_json::to_string_pretty(space).map_err(|e| EngineError::SerializationError {
        reason: e.to_string(),
    })?;

    let tmp_path = path.with_extension("dbs.tmp");

    let mut tmp_file = File::create(&tmp_path).map_err(|e| {
        EngineError::file_error("create temp file", tmp_path.display().to_string(), e.to_string())
    })?;

    tmp_file.write_all(json.as_bytes()).map_err(|e| {
        EngineError::file_error("write temp file", tmp_path.display().to_string(), e.to_string())
    })?;

    // Sync to disk
    tmp_file.sync_all().map_err(|e| {
        EngineError::file_error("sync temp file", tmp_path.display().to_string(), e.to_string())
    })?;

    // Atomic rename
    fs::rename(&tmp_path, path).map_err(|e| {
        // Clean up temp file if rename fails
        let _ = fs::remove_file(&tmp_path);
        EngineError::file_error("rename to final", path.display().to_string(), e.to_string())
    })?;

    debug!(path = %path.display(), parameters = space.parameter_count(), "snapshot saved");
    Ok(())
}

/// Load a design space from a file.
///
/// # Returns
///
/// * `Ok(DesignSpace)` - Successfully loaded snapshot
/// * `Err(EngineError::VersionMismatch)` - File version is incompatible
/// * `Err(EngineError::SerializationError)` - Invalid JSON
/// * `Err(EngineError::FileError)` - I/O error
pub fn load_space(path: &Path) -> EngineResult<DesignSpace> {
    let mut file = File::open(path).map_err(|e| {
        EngineError::file_error("open", path.display().to_string(), e.to_string())
    })?;

    let mut contents = String::new();
    file.read_to_string(&mut contents).map_err(|e| {
        EngineError::file_error("read", path.display().to_string(), e.to_string())
    })?;

    let space: DesignSpace =
        serde_json::from_str(&contents).map_err(|e| EngineError::SerializationError {
            reason: format!("Invalid JSON in {}: {}", path.display(), e),
        })?;

    validate_version(&space.meta.version)?;

    Ok(space)
}

/// Load a design space, returning whether it's read-only due to a lock.
///
/// # Returns
///
/// * `Ok((DesignSpace, None))` - Loaded successfully, no lock
/// * `Ok((DesignSpace, Some(LockInfo)))` - Loaded, but another user has the lock
pub fn load_space_with_lock_check(path: &Path) -> EngineResult<(DesignSpace, Option<LockInfo>)> {
    let space = load_space(path)?;
    let lock_info = FileLock::check(path);
    Ok((space, lock_info))
}

/// Validate that a file version is compatible with the current schema.
fn validate_version(file_version: &str) -> EngineResult<()> {
    let file_parts: Vec<u32> = file_version
        .split('.')
        .filter_map(|p| p.parse().ok())
        .collect();
    let current_parts: Vec<u32> = SCHEMA_VERSION
        .split('.')
        .filter_map(|p| p.parse().ok())
        .collect();

    if file_parts.is_empty() || current_parts.is_empty() {
        return Err(EngineError::VersionMismatch {
            file_version: file_version.to_string(),
            expected_version: SCHEMA_VERSION.to_string(),
        });
    }

    // Major version must match
    if file_parts[0] != current_parts[0] {
        return Err(EngineError::VersionMismatch {
            file_version: file_version.to_string(),
            expected_version: SCHEMA_VERSION.to_string(),
        });
    }

    // For 0.x versions, minor version must also match (breaking changes allowed)
    if current_parts[0] == 0
        && file_parts.len() > 1
        && current_parts.len() > 1
        && file_parts[1] > current_parts[1]
    {
        // File is newer than we support
        return Err(EngineError::VersionMismatch {
            file_version: file_version.to_string(),
            expected_version: SCHEMA_VERSION.to_string(),
        });
    }

    Ok(())
}
