//! Filesystem-backed [`CatalogStore`]: one JSON document per target.

use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tempfile::NamedTempFile;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::domain::{TargetMetadata, TestReport, TestStatus};
use crate::external::{status_for, CatalogError, CatalogResult, CatalogStore};

/// Stores `<root>/<name>.json`. Writes go through a temp file in the same
/// directory and are renamed into place.
#[derive(Debug)]
pub struct FsCatalog {
    root: PathBuf,
    // serialises read-modify-write updates
    write_lock: Mutex<()>,
}

impl FsCatalog {
    pub fn new(root: impl AsRef<Path>) -> CatalogResult<Self> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            write_lock: Mutex::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn target_path(&self, name: &str) -> CatalogResult<PathBuf> {
        let valid = !name.is_empty()
            && name != "."
            && name != ".."
            && !name.contains(['/', '\\'])
            && !name.starts_with('.');
        if !valid {
            return Err(CatalogError::InvalidName(name.to_string()));
        }
        Ok(self.root.join(format!("{name}.json")))
    }

    fn read(&self, name: &str) -> CatalogResult<Option<TargetMetadata>> {
        let path = self.target_path(name)?;
        match std::fs::read(&path) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&self, metadata: &TargetMetadata) -> CatalogResult<()> {
        let path = self.target_path(&metadata.name)?;
        let bytes = serde_json::to_vec_pretty(metadata)?;
        let mut tmp = NamedTempFile::new_in(&self.root)?;
        tmp.write_all(&bytes)?;
        tmp.flush()?;
        tmp.persist(&path).map_err(|e| e.error)?;
        debug!(target = %metadata.name, path = %path.display(), "catalog entry written");
        Ok(())
    }

    async fn update(
        &self,
        name: &str,
        apply: impl FnOnce(&mut TargetMetadata) + Send,
    ) -> CatalogResult<()> {
        let _guard = self.write_lock.lock().await;
        let mut meta = self
            .read(name)?
            .ok_or_else(|| CatalogError::NotFound(name.to_string()))?;
        apply(&mut meta);
        self.write(&meta)
    }
}

#[async_trait]
impl CatalogStore for FsCatalog {
    async fn get_target(&self, name: &str) -> CatalogResult<Option<TargetMetadata>> {
        self.read(name)
    }

    async fn put_target(&self, metadata: TargetMetadata) -> CatalogResult<()> {
        let _guard = self.write_lock.lock().await;
        self.write(&metadata)
    }

    /// Entries that cannot be read or parsed are logged and left out.
    async fn list_targets(&self) -> CatalogResult<Vec<TargetMetadata>> {
        let mut targets = Vec::new();
        for entry in std::fs::read_dir(&self.root)? {
            let path = match entry {
                Ok(entry) => entry.path(),
                Err(e) => {
                    warn!(error = %e, "skipping unreadable catalog entry");
                    continue;
                }
            };
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let parsed = std::fs::read(&path)
                .map_err(CatalogError::from)
                .and_then(|bytes| Ok(serde_json::from_slice::<TargetMetadata>(&bytes)?));
            match parsed {
                Ok(meta) => targets.push(meta),
                Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable catalog entry"),
            }
        }
        targets.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(targets)
    }

    async fn save_test_report(&self, name: &str, report: &TestReport) -> CatalogResult<()> {
        let status = status_for(report);
        let report = report.clone();
        self.update(name, move |meta| {
            meta.test_status = Some(status);
            meta.last_report = Some(report);
        })
        .await
    }

    async fn set_test_status(&self, name: &str, status: TestStatus) -> CatalogResult<()> {
        self.update(name, move |meta| meta.test_status = Some(status))
            .await
    }
}
