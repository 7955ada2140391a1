//! Runtime deployment into the output directory

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::config::ExportConfig;

/// Deployment errors
#[derive(Debug, Error)]
pub enum DeployError {
    #[error("Runtime file {0} not found")]
    MissingFile(PathBuf),

    #[error("Cannot overwrite {0}. Make sure the runtime is not running while exporting.")]
    Locked(PathBuf),

    #[error("Failed to deploy {path}: {reason}")]
    Io { path: PathBuf, reason: String },
}

/// Files placed by a deployment
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeployReport {
    pub files: Vec<PathBuf>,
}

/// Places runtime artifacts next to the exported data
pub trait Deployer: Send + Sync {
    fn deploy(&self, output_dir: &Path) -> Result<DeployReport, DeployError>;
}

/// Copies a fixed list of runtime files from a source directory
#[derive(Debug, Clone)]
pub struct RuntimeDeployer {
    source_dir: PathBuf,
    files: Vec<String>,
}

impl RuntimeDeployer {
    pub fn new(source_dir: impl Into<PathBuf>, files: Vec<String>) -> Self {
        Self {
            source_dir: source_dir.into(),
            files,
        }
    }

    /// Deployer for the `[runtime]` section of a config
    pub fn from_config(config: &ExportConfig) -> Self {
        Self::new(&config.runtime.source_dir, config.runtime.files.clone())
    }
}

impl Deployer for RuntimeDeployer {
    fn deploy(&self, output_dir: &Path) -> Result<DeployReport, DeployError> {
        // Check everything first so a missing file leaves the output alone
        for file in &self.files {
            let source = self.source_dir.join(file);
            if !source.is_file() {
                return Err(DeployError::MissingFile(source));
            }
        }

        let mut report = DeployReport::default();
        for file in &self.files {
            let source = self.source_dir.join(file);
            let target = output_dir.join(file);

            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent).map_err(|e| io_error(parent, e))?;
            }
            fs::copy(&source, &target).map_err(|e| io_error(&target, e))?;

            log::debug!("Deployed {:?} -> {:?}", source, target);
            report.files.push(target);
        }

        log::info!("Deployed {} runtime files to {:?}", report.files.len(), output_dir);
        Ok(report)
    }
}

/// Deployer for hosts that place the runtime themselves
#[derive(Debug, Clone, Copy, Default)]
pub struct NoDeploy;

impl Deployer for NoDeploy {
    fn deploy(&self, _output_dir: &Path) -> Result<DeployReport, DeployError> {
        Ok(DeployReport::default())
    }
}

fn io_error(path: &Path, e: io::Error) -> DeployError {
    match e.kind() {
        io::ErrorKind::PermissionDenied => DeployError::Locked(path.to_path_buf()),
        _ => DeployError::Io {
            path: path.to_path_buf(),
            reason: e.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    fn test_dirs(name: &str) -> (PathBuf, PathBuf) {
        let root = env::temp_dir().join(format!("relay_deploy_{}_{}", name, std::process::id()));
        let _ = fs::remove_dir_all(&root);
        let source = root.join("runtime");
        let output = root.join("out");
        fs::create_dir_all(&source).unwrap();
        fs::create_dir_all(&output).unwrap();
        (source, output)
    }

    #[test]
    fn test_copies_all_files() {
        let (source, output) = test_dirs("copy");
        fs::write(source.join("runner"), b"bin").unwrap();
        fs::create_dir_all(source.join("shaders")).unwrap();
        fs::write(source.join("shaders/post.glsl"), b"void main(){}").unwrap();

        let deployer = RuntimeDeployer::new(&source, vec!["runner".into(), "shaders/post.glsl".into()]);
        let report = deployer.deploy(&output).unwrap();

        assert_eq!(report.files.len(), 2);
        assert_eq!(fs::read(output.join("shaders/post.glsl")).unwrap(), b"void main(){}");

        let _ = fs::remove_dir_all(source.parent().unwrap());
    }

    #[test]
    fn test_missing_file_copies_nothing() {
        let (source, output) = test_dirs("missing");
        fs::write(source.join("runner"), b"bin").unwrap();

        let deployer = RuntimeDeployer::new(&source, vec!["runner".into(), "absent.dll".into()]);
        let err = deployer.deploy(&output).unwrap_err();

        assert!(matches!(err, DeployError::MissingFile(_)));
        assert!(!output.join("runner").exists());

        let _ = fs::remove_dir_all(source.parent().unwrap());
    }

    #[test]
    fn test_locked_message_mentions_running_runtime() {
        let err = DeployError::Locked(PathBuf::from("out/relay_runner"));
        assert!(err.to_string().contains("not running"));
    }
}
