//! Configuration, log and source paths

use std::path::{Path, PathBuf};

use super::{Error, Result};

/// Name used for the platform config/data directories
const APP_NAME: &str = "dap-bridge";

fn project_dirs() -> Option<directories::ProjectDirs> {
    directories::ProjectDirs::from("", "", APP_NAME)
}

/// Get the configuration directory path
///
/// Uses the directories crate for platform-appropriate locations:
/// - Linux: `~/.config/dap-bridge/`
/// - macOS: `~/Library/Application Support/dap-bridge/`
/// - Windows: `%APPDATA%\dap-bridge\`
pub fn config_dir() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.config_dir().to_path_buf())
}

/// Get the path to the configuration file
pub fn config_path() -> Option<PathBuf> {
    config_dir().map(|dir| dir.join("config.toml"))
}

/// Get the path to the log directory
pub fn log_dir() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.data_dir().join("logs"))
}

/// Resolve a user-supplied source path
///
/// A path that exists is made absolute against the working directory. A
/// relative path that does not exist is looked up under each source
/// directory in order.
pub fn resolve_source(path: &Path, source_dirs: &[PathBuf]) -> Result<PathBuf> {
    if path.exists() {
        return absolutize(path);
    }

    if path.is_relative() {
        for dir in source_dirs {
            let candidate = dir.join(path);
            if candidate.exists() {
                return absolutize(&candidate);
            }
        }
    }

    Err(Error::SourceNotFound(path.display().to_string()))
}

fn absolutize(path: &Path) -> Result<PathBuf> {
    // canonicalize collapses `./` and `..` so equal files share a registry key
    if let Ok(canonical) = std::fs::canonicalize(path) {
        return Ok(canonical);
    }
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_path_is_toml() {
        if let Some(path) = config_path() {
            assert_eq!(path.extension().and_then(|e| e.to_str()), Some("toml"));
        }
    }

    #[test]
    fn test_resolve_existing_and_source_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("demo.py");
        std::fs::write(&file, "a = 2\n").unwrap();
        let expected = std::fs::canonicalize(&file).unwrap();

        assert_eq!(resolve_source(&file, &[]).unwrap(), expected);
        assert_eq!(
            resolve_source(Path::new("demo.py"), &[dir.path().to_path_buf()]).unwrap(),
            expected
        );
    }

    #[test]
    fn test_resolve_missing() {
        let err = resolve_source(Path::new("no_such_file_here.py"), &[]).unwrap_err();
        assert!(matches!(err, Error::SourceNotFound(_)));
    }
}
