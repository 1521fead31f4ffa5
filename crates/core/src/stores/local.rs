use crate::error::IndexError;
use crate::index::{FlatIndex, IndexEntry, IndexManifest};
use crate::traits::VectorStore;
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, warn};

pub const DEFAULT_INDEX_DIR: &str = "faiss_index";

const MANIFEST_FILE: &str = "manifest.json";
const ENTRIES_FILE: &str = "entries.json";

/// Keeps the index in one directory, swapped in whole on every rebuild.
#[derive(Debug, Clone)]
pub struct LocalIndexStore {
    root: PathBuf,
}

impl LocalIndexStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn sibling(&self, label: &str, build: &str) -> PathBuf {
        let name = self
            .root
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| DEFAULT_INDEX_DIR.to_string());
        let parent = match self.root.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        parent.join(format!(".{name}.{label}-{build}"))
    }

    fn corrupt(&self, details: impl Into<String>) -> IndexError {
        IndexError::Corrupt {
            path: self.root.display().to_string(),
            details: details.into(),
        }
    }

    async fn write_files(dir: &Path, index: &FlatIndex) -> Result<(), IndexError> {
        fs::create_dir_all(dir).await?;
        fs::write(
            dir.join(MANIFEST_FILE),
            serde_json::to_vec_pretty(index.manifest())?,
        )
        .await?;
        fs::write(dir.join(ENTRIES_FILE), serde_json::to_vec(index.entries())?).await?;
        Ok(())
    }
}

#[async_trait]
impl VectorStore for LocalIndexStore {
    async fn exists(&self) -> bool {
        fs::metadata(self.root.join(MANIFEST_FILE)).await.is_ok()
    }

    async fn load(&self) -> Result<Option<FlatIndex>, IndexError> {
        let manifest = match fs::read(self.root.join(MANIFEST_FILE)).await {
            Ok(bytes) => bytes,
            Err(error) if error.kind() == ErrorKind::NotFound => {
                debug!(path = %self.root.display(), "no persisted index");
                return Ok(None);
            }
            Err(error) => return Err(error.into()),
        };
        let manifest: IndexManifest = serde_json::from_slice(&manifest)
            .map_err(|error| self.corrupt(format!("manifest: {error}")))?;

        let entries = match fs::read(self.root.join(ENTRIES_FILE)).await {
            Ok(bytes) => bytes,
            Err(error) if error.kind() == ErrorKind::NotFound => {
                return Err(self.corrupt("entries file is missing"));
            }
            Err(error) => return Err(error.into()),
        };
        let entries: Vec<IndexEntry> = serde_json::from_slice(&entries)
            .map_err(|error| self.corrupt(format!("entries: {error}")))?;

        FlatIndex::from_parts(manifest, entries)
            .map(Some)
            .map_err(|details| self.corrupt(details))
    }

    async fn replace(&self, index: &FlatIndex) -> Result<(), IndexError> {
        let build = index.manifest().build_id.simple().to_string();
        let staging = self.sibling("staging", &build);
        let retired = self.sibling("retired", &build);

        if let Err(error) = Self::write_files(&staging, index).await {
            let _ = fs::remove_dir_all(&staging).await;
            return Err(error);
        }

        let had_previous = match fs::rename(&self.root, &retired).await {
            Ok(()) => true,
            Err(error) if error.kind() == ErrorKind::NotFound => false,
            Err(error) => {
                let _ = fs::remove_dir_all(&staging).await;
                return Err(error.into());
            }
        };

        if let Err(error) = fs::rename(&staging, &self.root).await {
            if had_previous {
                if let Err(restore) = fs::rename(&retired, &self.root).await {
                    warn!(error = %restore, "failed to restore previous index");
                }
            }
            let _ = fs::remove_dir_all(&staging).await;
            return Err(error.into());
        }

        if had_previous {
            if let Err(error) = fs::remove_dir_all(&retired).await {
                warn!(path = %retired.display(), error = %error, "stale index left behind");
            }
        }

        info!(
            path = %self.root.display(),
            chunks = index.len(),
            build_id = %index.manifest().build_id,
            "index replaced"
        );
        Ok(())
    }
}
