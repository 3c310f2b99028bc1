//! Removal of per-job artifact directories under a configured root.
//!
//! Directories live at `<root>/<submitter id>/<job id>`. Job names are free
//! text and repeat across jobs, so only row ids name a directory. Each
//! component must still match `[A-Za-z0-9 _.-]+`, may not be a `.`/`..` path
//! token, and the resolved directory must stay strictly below the canonical
//! root. Removal is refused outright when the process runs with elevated
//! privileges.

use crate::error::ArtifactError;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use swarm_model::{JobId, SubmitterId};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Removal {
    Removed,
    Missing,
}

#[derive(Debug, Clone)]
pub struct ArtifactSweeper {
    root: PathBuf,
    elevated: bool,
}

impl ArtifactSweeper {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            elevated: running_elevated(),
        }
    }

    /// Sweeper that ignores the effective uid, for exercising removal paths
    /// from tests that run as root.
    #[cfg(test)]
    pub(crate) fn unprivileged(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            elevated: false,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn job_dir(
        &self,
        submitter_id: SubmitterId,
        job_id: JobId,
    ) -> Result<PathBuf, ArtifactError> {
        let owner = id_component("submitter", submitter_id)?;
        let job = id_component("job", job_id)?;
        Ok(self.root.join(owner).join(job))
    }

    pub fn remove_job_dir(
        &self,
        submitter_id: SubmitterId,
        job_id: JobId,
    ) -> Result<Removal, ArtifactError> {
        let dir = self.job_dir(submitter_id, job_id)?;
        if self.elevated {
            return Err(ArtifactError::Elevated);
        }

        let root = match fs::canonicalize(&self.root) {
            Ok(root) => root,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Removal::Missing),
            Err(err) => return Err(err.into()),
        };
        let metadata = match fs::symlink_metadata(&dir) {
            Ok(metadata) => metadata,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                debug!(target: "swarm::artifacts", "no such dir: {}", dir.display());
                return Ok(Removal::Missing);
            }
            Err(err) => return Err(err.into()),
        };
        if metadata.file_type().is_symlink() {
            return Err(ArtifactError::Symlink(dir.display().to_string()));
        }
        if !metadata.is_dir() {
            return Ok(Removal::Missing);
        }

        let resolved = fs::canonicalize(&dir)?;
        if resolved == root || !resolved.starts_with(&root) {
            return Err(ArtifactError::OutsideRoot(resolved.display().to_string()));
        }
        fs::remove_dir_all(&resolved)?;
        Ok(Removal::Removed)
    }
}

fn id_component(field: &'static str, id: i64) -> Result<String, ArtifactError> {
    if id <= 0 {
        return Err(ArtifactError::BadName {
            field,
            value: id.to_string(),
        });
    }
    let value = id.to_string();
    check_component(field, &value)?;
    Ok(value)
}

fn check_component(field: &'static str, value: &str) -> Result<(), ArtifactError> {
    let valid_chars = value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, ' ' | '_' | '.' | '-'));
    if value.is_empty() || !valid_chars || value == ".." || value == "." {
        return Err(ArtifactError::BadName {
            field,
            value: value.to_string(),
        });
    }
    Ok(())
}

/// True when the current process has root privileges.
#[cfg(unix)]
pub fn running_elevated() -> bool {
    nix::unistd::geteuid().is_root()
}

#[cfg(not(unix))]
pub fn running_elevated() -> bool {
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn removes_job_directory() {
        let temp = TempDir::new().expect("temp dir");
        let dir = temp.path().join("3").join("42");
        fs::create_dir_all(dir.join("logs")).expect("create dirs");
        fs::write(dir.join("logs").join("out.txt"), "ok").expect("write file");

        let outcome = ArtifactSweeper::unprivileged(temp.path())
            .remove_job_dir(3, 42)
            .expect("remove");
        assert_eq!(outcome, Removal::Removed);
        assert!(!dir.exists());
        assert!(temp.path().join("3").exists());
    }

    #[test]
    fn missing_directory_is_not_an_error() {
        let temp = TempDir::new().expect("temp dir");
        let outcome = ArtifactSweeper::unprivileged(temp.path())
            .remove_job_dir(3, 7)
            .expect("remove");
        assert_eq!(outcome, Removal::Missing);
    }

    #[test]
    fn non_positive_ids_are_refused() {
        let temp = TempDir::new().expect("temp dir");
        let sweeper = ArtifactSweeper::unprivileged(temp.path());
        for (owner, job) in [(0, 1), (1, 0), (-1, 5), (5, -2)] {
            let err = sweeper
                .remove_job_dir(owner, job)
                .expect_err("id must be refused");
            assert!(matches!(err, ArtifactError::BadName { .. }), "{owner}/{job}");
        }
    }

    #[test]
    fn component_pattern() {
        for bad in ["..", ".", "a/b", "<b>job</b>", ""] {
            assert!(check_component("job", bad).is_err(), "{bad:?}");
        }
        for good in ["42", "Nightly 42", "v1.2_rc-3"] {
            assert!(check_component("job", good).is_ok(), "{good:?}");
        }
    }

    #[test]
    fn refuses_when_elevated() {
        let temp = TempDir::new().expect("temp dir");
        let dir = temp.path().join("1").join("2");
        fs::create_dir_all(&dir).expect("create dirs");
        let sweeper = ArtifactSweeper {
            root: temp.path().to_path_buf(),
            elevated: true,
        };
        let err = sweeper.remove_job_dir(1, 2).expect_err("elevated");
        assert!(matches!(err, ArtifactError::Elevated));
        assert!(dir.exists());
    }

    #[cfg(unix)]
    #[test]
    fn refuses_symlinked_job_directory() {
        let temp = TempDir::new().expect("temp dir");
        let outside = TempDir::new().expect("outside dir");
        fs::create_dir_all(temp.path().join("1")).expect("owner dir");
        std::os::unix::fs::symlink(outside.path(), temp.path().join("1").join("2"))
            .expect("symlink");

        let err = ArtifactSweeper::unprivileged(temp.path())
            .remove_job_dir(1, 2)
            .expect_err("symlink must be refused");
        assert!(matches!(err, ArtifactError::Symlink(_)));
        assert!(outside.path().exists());
    }
}
