//! Upstream staging handoff: collected files move onto the shared
//! upstream mount, and both path views (POSIX mount and Windows UNC)
//! travel in the bus envelope so processors can pick by platform.

use std::path::{Path, PathBuf};

/// Both views of a staged file.
#[derive(Debug, Clone, PartialEq)]
pub struct StagedPaths {
    pub mounted_path: String,
    pub unc_path: String,
}

/// The upstream share as seen from this process: a mounted directory
/// plus the share name used to derive UNC paths. Mounting itself is an
/// operational concern outside this type.
#[derive(Clone)]
pub struct UpstreamStaging {
    mount_point: PathBuf,
    share: String,
}

impl UpstreamStaging {
    pub fn new(mount_point: impl Into<PathBuf>, share: impl Into<String>) -> std::io::Result<Self> {
        let mount_point = mount_point.into();
        std::fs::create_dir_all(&mount_point)?;
        Ok(Self {
            mount_point,
            share: share.into(),
        })
    }

    /// Move `file_path` onto the upstream mount as `filename`, returning
    /// both path views. Falls back to copy-and-remove when the rename
    /// crosses filesystems.
    pub fn stage(&self, file_path: &str, filename: &str) -> std::io::Result<StagedPaths> {
        let destination = self.mount_point.join(filename);
        move_file(Path::new(file_path), &destination)?;

        let staged = StagedPaths {
            mounted_path: destination.display().to_string(),
            unc_path: unc_path(&self.share, filename),
        };
        tracing::info!(
            from = file_path,
            mounted_path = %staged.mounted_path,
            unc_path = %staged.unc_path,
            "staged file upstream"
        );
        Ok(staged)
    }
}

fn move_file(from: &Path, to: &Path) -> std::io::Result<()> {
    match std::fs::rename(from, to) {
        Ok(()) => Ok(()),
        // EXDEV and friends: cross-device moves need a copy.
        Err(_) => {
            std::fs::copy(from, to)?;
            std::fs::remove_file(from)
        }
    }
}

/// Join the share and filename into a backslashed UNC path:
/// `//upstream-server/scraps` + `dump.txt` → `\\upstream-server\scraps\dump.txt`.
fn unc_path(share: &str, filename: &str) -> String {
    format!("{}\\{}", share.replace('/', "\\"), filename)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn staging_moves_the_file_and_reports_both_views() {
        let source_dir = tempfile::tempdir().unwrap();
        let mount_dir = tempfile::tempdir().unwrap();

        let source = source_dir.path().join("dump.txt");
        std::fs::write(&source, "contents").unwrap();

        let staging =
            UpstreamStaging::new(mount_dir.path(), "//upstream-server/scraps").unwrap();
        let staged = staging
            .stage(source.to_str().unwrap(), "dump.txt")
            .unwrap();

        assert!(!source.exists());
        assert_eq!(
            std::fs::read_to_string(&staged.mounted_path).unwrap(),
            "contents"
        );
        assert_eq!(staged.unc_path, r"\\upstream-server\scraps\dump.txt");
    }

    #[test]
    fn staging_a_missing_file_is_an_error() {
        let mount_dir = tempfile::tempdir().unwrap();
        let staging = UpstreamStaging::new(mount_dir.path(), "//srv/scraps").unwrap();
        assert!(staging.stage("/nonexistent/source", "f").is_err());
    }

    #[test]
    fn unc_paths_use_backslashes_throughout() {
        assert_eq!(
            unc_path("//upstream-server/scraps", "a.txt"),
            r"\\upstream-server\scraps\a.txt"
        );
    }
}
