//! Implements the `Source` trait over a local directory tree.

use crate::api::Source;
use crate::error::Res;
use crate::model::FileLocator;
use anyhow::{ensure, Context};
use std::path::{Component, Path, PathBuf};
use tracing::debug;

/// Reads input files from `<root>/<bucket>/<key>`. This is how a mounted or synced copy of the
/// object store is read.
#[derive(Debug, Clone)]
pub struct LocalSource {
    root: PathBuf,
}

impl LocalSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolves the path of `locator` under the root. Bucket names and keys that would escape the
    /// root (absolute paths or `..` components) are refused.
    pub fn path(&self, locator: &FileLocator) -> Res<PathBuf> {
        let relative = Path::new(locator.bucket()).join(locator.key());
        ensure!(
            relative
                .components()
                .all(|c| matches!(c, Component::Normal(_) | Component::CurDir)),
            "The file locator '{locator}' does not name a file under the source root"
        );
        Ok(self.root.join(relative))
    }
}

#[async_trait::async_trait]
impl Source for LocalSource {
    async fn fetch(&self, locator: &FileLocator) -> Res<Vec<u8>> {
        let path = self.path(locator)?;
        debug!("Reading {}", path.display());
        tokio::fs::read(&path)
            .await
            .with_context(|| format!("Failed to read file at {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_fetch() {
        let dir = TempDir::new().unwrap();
        let bucket = dir.path().join("raw-csv");
        std::fs::create_dir_all(bucket.join("in")).unwrap();
        std::fs::write(bucket.join("in").join("1_a_b.csv"), "hello").unwrap();

        let source = LocalSource::new(dir.path());
        let content = source
            .fetch(&FileLocator::new("raw-csv", "in/1_a_b.csv"))
            .await
            .unwrap();
        assert_eq!(content, b"hello");
    }

    #[tokio::test]
    async fn test_fetch_missing() {
        let dir = TempDir::new().unwrap();
        let source = LocalSource::new(dir.path());
        let result = source.fetch(&FileLocator::new("b", "nope.csv")).await;
        assert!(result.is_err());
    }

    #[test]
    fn test_path_refuses_escape() {
        let source = LocalSource::new("/data");
        let escaping = FileLocator::new("b", "../../etc/passwd");
        assert!(source.path(&escaping).is_err());
        assert!(source.path(&FileLocator::new("/etc", "passwd")).is_err());
        assert_eq!(
            source.path(&FileLocator::new("b", "k.csv")).unwrap(),
            PathBuf::from("/data/b/k.csv")
        );
    }
}
