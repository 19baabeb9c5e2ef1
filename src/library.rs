use std::path::PathBuf;

use chrono::Utc;
use log::{info, warn};

use crate::error::{LibraryError, Result};
use crate::files::{self, AssetFiles};
use crate::id::new_id;
use crate::store::{MetadataStore, Record};
use crate::sweep::{self, SweepReport};

/// Where a library keeps its files.
#[derive(Debug, Clone)]
pub struct LibraryPaths {
    pub audio_dir: PathBuf,
    pub cover_dir: PathBuf,
    pub metadata_path: PathBuf,
}

/// The asset library: every create/update/delete goes through here so the
/// metadata document and the files on disk move together.
pub struct Library {
    metadata: MetadataStore,
    files: AssetFiles,
}

impl Library {
    pub fn new(paths: LibraryPaths) -> Self {
        Self {
            metadata: MetadataStore::new(paths.metadata_path),
            files: AssetFiles::new(paths.audio_dir, paths.cover_dir),
        }
    }

    /// Creates the asset folders and moves an unreadable metadata document
    /// aside before the library starts serving.
    pub async fn open(paths: LibraryPaths) -> Result<Self> {
        let library = Self::new(paths);
        library.files.create_dirs().await?;
        if let Some(backup) = library.metadata.recover().await? {
            warn!("Starting with an empty library, previous metadata kept at {}", backup.display());
        }
        Ok(library)
    }

    /// The audio file is written under the writer lock so a concurrent sweep
    /// never sees it before its record exists.
    pub async fn create_asset(&self, original_name: &str, content: &[u8]) -> Result<Record> {
        let id = new_id();
        let mut write = self.metadata.begin_write().await;
        let filename = self.files.store_audio(&id, original_name, content).await?;

        let record = Record {
            id: id.clone(),
            title: files::stem_of(&filename).to_string(),
            filename,
            description: String::new(),
            cover: None,
            created_at: Utc::now(),
        };

        write.store.insert(record.clone());
        if let Err(e) = write.commit().await {
            warn!("Audio {} left without metadata: {}", record.filename, e);
            return Err(e);
        }

        info!("Successfully uploaded: {} ({})", record.filename, id);
        Ok(record)
    }

    pub async fn list_assets(&self) -> Vec<Record> {
        self.metadata.list().await
    }

    /// Audio filenames of every asset, in library order.
    pub async fn list_song_files(&self) -> Vec<String> {
        self.metadata
            .list()
            .await
            .into_iter()
            .map(|record| record.filename)
            .filter(|filename| !filename.is_empty())
            .collect()
    }

    pub async fn get_asset(&self, id: &str) -> Result<Record> {
        self.metadata
            .get(id)
            .await
            .ok_or_else(|| LibraryError::NotFound(id.to_string()))
    }

    /// Overwrites both fields; empty strings are stored as given.
    pub async fn update_asset(&self, id: &str, title: &str, description: &str) -> Result<Record> {
        let mut write = self.metadata.begin_write().await;
        let record = write
            .store
            .get_mut(id)
            .ok_or_else(|| LibraryError::NotFound(id.to_string()))?;
        record.title = title.to_string();
        record.description = description.to_string();
        let record = record.clone();
        write.commit().await?;

        info!("Updated asset {}", id);
        Ok(record)
    }

    /// Stores a new cover for `id`, removing the previous cover file when
    /// its name differs from the new one.
    pub async fn set_cover(&self, id: &str, content: &[u8], extension: &str) -> Result<Record> {
        let mut write = self.metadata.begin_write().await;
        let previous = write
            .store
            .get(id)
            .ok_or_else(|| LibraryError::NotFound(id.to_string()))?
            .cover
            .clone();

        let filename = self.files.store_cover(id, content, extension).await?;
        if let Some(old) = previous.filter(|old| *old != filename) {
            discard(self.files.delete_cover(&old).await, &old)?;
        }

        let record = match write.store.get_mut(id) {
            Some(record) => {
                record.cover = Some(filename);
                record.clone()
            }
            None => return Err(LibraryError::NotFound(id.to_string())),
        };
        write.commit().await?;

        info!("Set cover for {} to {}", id, record.cover.as_deref().unwrap_or_default());
        Ok(record)
    }

    /// Removes the audio and cover files first, then the record.
    pub async fn delete_asset(&self, id: &str) -> Result<String> {
        let mut write = self.metadata.begin_write().await;
        let record = write
            .store
            .get(id)
            .cloned()
            .ok_or_else(|| LibraryError::NotFound(id.to_string()))?;

        if !record.filename.is_empty() {
            discard(self.files.delete_audio(&record.filename).await, &record.filename)?;
        }
        if let Some(cover) = &record.cover {
            discard(self.files.delete_cover(cover).await, cover)?;
        }

        write.store.remove(id);
        write.commit().await?;

        info!("Deleted asset {} ({})", id, record.filename);
        Ok(record.id)
    }

    /// Location of the audio file behind `id`, checked to exist.
    pub async fn resolve_audio(&self, id: &str) -> Result<PathBuf> {
        let record = self.get_asset(id).await?;
        if record.filename.is_empty() {
            return Err(LibraryError::NoFileReference(id.to_string()));
        }
        let path = self.files.resolve_audio_path(&record.filename)?;
        ensure_exists(path).await
    }

    /// Location of a stored cover by its filename, checked to exist.
    pub async fn resolve_cover(&self, cover_ref: &str) -> Result<PathBuf> {
        let path = self.files.resolve_cover_path(cover_ref)?;
        ensure_exists(path).await
    }

    /// Compares the folders with the metadata; see [`sweep::sweep`].
    pub async fn sweep(&self, remove_orphans: bool) -> Result<SweepReport> {
        let write = self.metadata.begin_write().await;
        sweep::sweep(&write.store, &self.files, remove_orphans).await
    }
}

async fn ensure_exists(path: PathBuf) -> Result<PathBuf> {
    if tokio::fs::try_exists(&path).await? {
        Ok(path)
    } else {
        Err(LibraryError::FileMissingOnDisk(path.display().to_string()))
    }
}

/// A stored name that no longer resolves inside the asset folders cannot
/// point at one of our files, so there is nothing to delete for it.
fn discard(result: Result<()>, filename: &str) -> Result<()> {
    match result {
        Err(LibraryError::InvalidPath(_)) => {
            warn!("Skipping delete of invalid stored filename {:?}", filename);
            Ok(())
        }
        other => other,
    }
}
