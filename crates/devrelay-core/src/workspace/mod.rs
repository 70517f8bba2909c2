//! Scratch workspace allocation for a run.
//!
//! Each run gets its own directory under a configured base path so that
//! `prepare_environment` has somewhere to clone the repository and
//! `run_tests` has somewhere isolated to execute in. This is deliberately
//! thin: actual git plumbing (clone, checkout, branch management) is the
//! `VcsClient` collaborator's job, not this allocator's.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

/// Allocates and reclaims per-run scratch directories under a base path.
#[derive(Debug, Clone)]
pub struct WorkspaceAllocator {
    base_dir: PathBuf,
}

impl WorkspaceAllocator {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self { base_dir: base_dir.into() }
    }

    /// Default base directory: `$TMPDIR/devrelay/workspaces` (or
    /// `/tmp/devrelay/workspaces` when `TMPDIR` is unset).
    pub fn from_env() -> Self {
        let tmp = std::env::var("TMPDIR").unwrap_or_else(|_| "/tmp".to_string());
        Self::new(Path::new(&tmp).join("devrelay").join("workspaces"))
    }

    /// Directory name for a given run: `task-<task_id>-run-<run_id>`.
    fn run_dir_name(task_id: i64, run_id: i64) -> String {
        format!("task-{task_id}-run-{run_id}")
    }

    /// Create (or return, if it already exists) the scratch directory for
    /// a run.
    pub fn allocate(&self, task_id: i64, run_id: i64) -> Result<PathBuf> {
        let path = self.base_dir.join(Self::run_dir_name(task_id, run_id));
        std::fs::create_dir_all(&path)
            .with_context(|| format!("failed to create workspace directory {}", path.display()))?;
        Ok(path)
    }

    /// Remove a run's scratch directory and everything under it.
    pub fn reclaim(&self, task_id: i64, run_id: i64) -> Result<()> {
        let path = self.base_dir.join(Self::run_dir_name(task_id, run_id));
        if path.exists() {
            std::fs::remove_dir_all(&path)
                .with_context(|| format!("failed to remove workspace directory {}", path.display()))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_creates_directory_and_reclaim_removes_it() {
        let tmp = tempfile::tempdir().unwrap();
        let allocator = WorkspaceAllocator::new(tmp.path());

        let path = allocator.allocate(1, 2).unwrap();
        assert!(path.exists());
        assert!(path.is_dir());

        allocator.reclaim(1, 2).unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn allocate_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let allocator = WorkspaceAllocator::new(tmp.path());

        let first = allocator.allocate(1, 2).unwrap();
        let second = allocator.allocate(1, 2).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn reclaim_on_missing_directory_is_a_no_op() {
        let tmp = tempfile::tempdir().unwrap();
        let allocator = WorkspaceAllocator::new(tmp.path());
        assert!(allocator.reclaim(99, 99).is_ok());
    }
}
