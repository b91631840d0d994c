//! Discovery spec files and their cleanup.

use std::fs::{self, DirBuilder};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tempfile::Builder;
use tracing::debug;

use super::PROVISION_TARGET;

#[cfg(unix)]
use std::os::unix::fs::{DirBuilderExt, PermissionsExt};

/// Creates `path` and any missing parents, world-readable on Unix.
pub(super) fn create_dir(path: &Path) -> io::Result<()> {
    let mut builder = DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    builder.mode(0o755);
    builder.create(path)
}

/// Writes the provided bytes to the path using an atomic persist step.
///
/// Data is flushed and fsync'd before the temporary file is renamed into
/// place so a host scanning the directory never reads a partial spec.
pub(super) fn atomic_write(path: &Path, contents: &[u8]) -> io::Result<()> {
    let directory = path.parent().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::NotFound,
            "spec path did not have a parent directory",
        )
    })?;

    let mut builder = Builder::new();
    builder.prefix(
        path.file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("plugin"),
    );
    #[cfg(unix)]
    builder.permissions(fs::Permissions::from_mode(0o644));

    let mut file = builder.tempfile_in(directory)?;
    file.write_all(contents)?;
    file.as_file().sync_all()?;
    file.persist(path).map_err(|error| error.error)?;
    Ok(())
}

/// Removes a discovery artifact when dropped.
///
/// Removal is best effort: a missing file is ignored and other failures are
/// only logged.
#[derive(Debug)]
pub(crate) struct SpecArtifact {
    path: PathBuf,
}

impl SpecArtifact {
    pub(crate) const fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for SpecArtifact {
    fn drop(&mut self) {
        match fs::remove_file(&self.path) {
            Ok(()) => debug!(
                target: PROVISION_TARGET,
                path = %self.path.display(),
                "removed plugin spec"
            ),
            Err(error) if error.kind() == io::ErrorKind::NotFound => {}
            Err(error) => debug!(
                target: PROVISION_TARGET,
                path = %self.path.display(),
                error = %error,
                "failed to remove plugin spec"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::{fixture, rstest};
    use tempfile::TempDir;

    use super::*;

    #[fixture]
    fn dir() -> TempDir {
        tempfile::tempdir().expect("temp dir")
    }

    #[rstest]
    fn atomic_write_replaces_existing_contents(dir: TempDir) {
        let path = dir.path().join("echo.spec");
        fs::write(&path, "tcp://127.0.0.1:1").expect("seed spec");

        atomic_write(&path, b"tcp://127.0.0.1:2").expect("write spec");

        assert_eq!(
            fs::read_to_string(&path).expect("read spec"),
            "tcp://127.0.0.1:2"
        );
        let leftovers = fs::read_dir(dir.path()).expect("list dir").count();
        assert_eq!(leftovers, 1, "temporary files should be renamed away");
    }

    #[rstest]
    fn create_dir_builds_nested_directories(dir: TempDir) {
        let nested = dir.path().join("etc").join("docker").join("plugins");
        create_dir(&nested).expect("create nested");
        create_dir(&nested).expect("create is idempotent");
        assert!(nested.is_dir());
    }

    #[rstest]
    fn artifact_removes_file_on_drop(dir: TempDir) {
        let path = dir.path().join("echo.spec");
        fs::write(&path, "tcp://127.0.0.1:1").expect("seed spec");

        let artifact = SpecArtifact::new(path.clone());
        assert_eq!(artifact.path(), path);
        drop(artifact);

        assert!(!path.exists());
    }

    #[rstest]
    fn artifact_ignores_missing_files(dir: TempDir) {
        let path = dir.path().join("never-written.spec");
        drop(SpecArtifact::new(path.clone()));
        assert!(!path.exists());
    }
}
