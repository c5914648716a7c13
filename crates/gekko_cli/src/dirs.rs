use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};
use directories::ProjectDirs;

const LOG_FILENAME: &str = "gekko.log";

/// Per-user locations for data shared between runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppDirs {
    pub data_dir: PathBuf,
    pub log_dir: PathBuf,
}

impl AppDirs {
    /// Platform directories, or `override_dir` (with logs below it) when given.
    pub fn resolve(override_dir: Option<&Path>) -> Result<Self> {
        if let Some(dir) = override_dir {
            return Ok(Self::rooted_at(dir));
        }
        let project = ProjectDirs::from("", "gekko", "gekko")
            .ok_or_else(|| anyhow!("no home directory available for application data"))?;
        let state_dir = project
            .state_dir()
            .unwrap_or_else(|| project.data_local_dir());
        Ok(Self {
            data_dir: project.data_dir().to_path_buf(),
            log_dir: state_dir.join("logs"),
        })
    }

    fn rooted_at(dir: &Path) -> Self {
        Self {
            data_dir: dir.to_path_buf(),
            log_dir: dir.join("logs"),
        }
    }

    pub fn create(&self) -> io::Result<()> {
        fs::create_dir_all(&self.data_dir)?;
        fs::create_dir_all(&self.log_dir)
    }

    pub fn log_file(&self) -> PathBuf {
        self.log_dir.join(LOG_FILENAME)
    }
}

#[cfg(test)]
mod tests {
    use super::AppDirs;

    #[test]
    fn override_keeps_logs_below_data_dir() {
        let temp = tempfile::TempDir::new().unwrap();
        let dirs = AppDirs::resolve(Some(temp.path())).unwrap();
        dirs.create().unwrap();

        assert_eq!(dirs.data_dir, temp.path());
        assert!(dirs.log_dir.is_dir());
        assert_eq!(dirs.log_file(), temp.path().join("logs").join("gekko.log"));
    }
}
