//! Whole-directory snapshots of the live session state
//!
//! A snapshot is a directory holding a copy of the data directory plus the
//! auxiliary files (scene, settings, tolerance, version). Restoring stages a
//! full copy next to the live state first and then swaps it in with renames,
//! so a failed restore leaves the live state as it was.

use crate::error::Result;
use crate::error::SessionError;
use crate::layout::DATA_DIR;
use std::fs;
use std::path::Path;
use std::path::PathBuf;
use tracing::debug;
use tracing::warn;
use walkdir::WalkDir;

/// Copies live state into snapshot directories and back
#[derive(Debug, Clone)]
pub struct DirectorySnapshotter {
    staging_root: PathBuf,
}

impl DirectorySnapshotter {
    /// `staging_root` must live on the same filesystem as the live state
    pub fn new(staging_root: impl Into<PathBuf>) -> Self {
        Self {
            staging_root: staging_root.into(),
        }
    }

    /// Copy `data_dir` and `aux_files` into the fresh directory `dest`
    pub fn capture(&self, data_dir: &Path, aux_files: &[PathBuf], dest: &Path) -> Result<()> {
        fs::create_dir(dest)
            .map_err(|source| SessionError::io("creating snapshot directory", dest, source))?;

        let result = copy_state(data_dir, aux_files, dest);
        if result.is_err() {
            crate::layout::remove_dir_quietly(dest);
        }
        result
    }

    /// Replace `data_dir` and `aux_files` with the contents of `snapshot`
    ///
    /// Returns [`SessionError::SnapshotMissing`] without touching live state
    /// when the snapshot is absent or incomplete.
    pub fn restore(&self, snapshot: &Path, data_dir: &Path, aux_files: &[PathBuf]) -> Result<()> {
        validate_snapshot(snapshot, aux_files)?;

        fs::create_dir_all(&self.staging_root).map_err(|source| {
            SessionError::io("creating staging directory", &self.staging_root, source)
        })?;
        let stage = tempfile::Builder::new()
            .prefix("restore-")
            .tempdir_in(&self.staging_root)
            .map_err(|source| {
                SessionError::io("creating staging directory", &self.staging_root, source)
            })?;

        let staged = stage.path().join("staged");
        fs::create_dir(&staged)
            .map_err(|source| SessionError::io("creating staging directory", &staged, source))?;
        copy_state(&snapshot.join(DATA_DIR), aux_files_in(snapshot, aux_files), &staged)?;

        let backup = stage.path().join("backup");
        fs::create_dir(&backup)
            .map_err(|source| SessionError::io("creating backup directory", &backup, source))?;

        let mut targets = Vec::with_capacity(aux_files.len() + 1);
        targets.push((staged.join(DATA_DIR), data_dir.to_path_buf()));
        for live in aux_files {
            targets.push((staged.join(file_name(live)?), live.clone()));
        }

        swap_in(&targets, &backup)?;
        debug!("Restored snapshot {:?}", snapshot);
        Ok(())
    }
}

fn file_name(path: &Path) -> Result<&std::ffi::OsStr> {
    path.file_name().ok_or_else(|| SessionError::SnapshotMissing {
        path: path.to_path_buf(),
    })
}

fn aux_files_in(dir: &Path, aux_files: &[PathBuf]) -> Vec<PathBuf> {
    aux_files
        .iter()
        .filter_map(|live| live.file_name().map(|name| dir.join(name)))
        .collect()
}

fn validate_snapshot(snapshot: &Path, aux_files: &[PathBuf]) -> Result<()> {
    let missing = |path: &Path| SessionError::SnapshotMissing {
        path: path.to_path_buf(),
    };

    if !snapshot.is_dir() {
        return Err(missing(snapshot));
    }
    if !snapshot.join(DATA_DIR).is_dir() {
        return Err(missing(&snapshot.join(DATA_DIR)));
    }
    for live in aux_files {
        let captured = snapshot.join(file_name(live)?);
        if !captured.is_file() {
            return Err(missing(&captured));
        }
    }
    Ok(())
}

fn copy_state(data_dir: &Path, aux_files: impl AsRef<[PathBuf]>, dest: &Path) -> Result<()> {
    let data_dest = dest.join(DATA_DIR);
    if data_dir.is_dir() {
        copy_dir_recursive(data_dir, &data_dest)?;
    } else {
        fs::create_dir_all(&data_dest)
            .map_err(|source| SessionError::io("creating data directory", &data_dest, source))?;
    }

    for src in aux_files.as_ref() {
        let dst = dest.join(file_name(src)?);
        fs::copy(src, &dst).map_err(|source| SessionError::io("copying state file", src, source))?;
    }
    Ok(())
}

/// Recursively copy a directory
pub(crate) fn copy_dir_recursive(src: &Path, dst: &Path) -> Result<()> {
    fs::create_dir_all(dst).map_err(|source| SessionError::io("creating directory", dst, source))?;

    for entry in WalkDir::new(src).min_depth(1) {
        let entry = entry.map_err(|err| {
            let path = err.path().unwrap_or(src).to_path_buf();
            SessionError::io("reading directory", path, err.into())
        })?;
        let Ok(relative) = entry.path().strip_prefix(src) else {
            continue;
        };
        let target = dst.join(relative);

        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)
                .map_err(|source| SessionError::io("creating directory", &target, source))?;
        } else {
            fs::copy(entry.path(), &target)
                .map_err(|source| SessionError::io("copying file", entry.path(), source))?;
        }
    }

    Ok(())
}

struct SwapStep {
    live: PathBuf,
    backup: Option<PathBuf>,
    placed: bool,
}

/// Move every live path aside and rename its staged replacement into place.
/// On the first failure, completed steps are undone in reverse order.
fn swap_in(targets: &[(PathBuf, PathBuf)], backup_dir: &Path) -> Result<()> {
    let mut steps: Vec<SwapStep> = Vec::with_capacity(targets.len());

    for (index, (staged, live)) in targets.iter().enumerate() {
        let mut step = SwapStep {
            live: live.clone(),
            backup: None,
            placed: false,
        };

        if live.exists() {
            let backup = backup_dir.join(index.to_string());
            if let Err(source) = fs::rename(live, &backup) {
                roll_back(steps);
                return Err(SessionError::io("moving live state aside", live, source));
            }
            step.backup = Some(backup);
        }

        if let Err(source) = fs::rename(staged, live) {
            steps.push(step);
            roll_back(steps);
            return Err(SessionError::io("swapping in restored state", live, source));
        }
        step.placed = true;
        steps.push(step);
    }

    Ok(())
}

fn roll_back(steps: Vec<SwapStep>) {
    for step in steps.into_iter().rev() {
        if step.placed {
            let removed = if step.live.is_dir() {
                fs::remove_dir_all(&step.live)
            } else {
                fs::remove_file(&step.live)
            };
            if let Err(e) = removed {
                warn!("Rollback could not remove {:?}: {}", step.live, e);
            }
        }
        if let Some(backup) = step.backup
            && let Err(e) = fs::rename(&backup, &step.live)
        {
            warn!("Rollback could not restore {:?}: {}", step.live, e);
        }
    }
}
