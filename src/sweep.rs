use std::collections::HashSet;

use log::{info, warn};
use serde::Serialize;

use crate::error::Result;
use crate::files::AssetFiles;
use crate::store::Store;

/// Differences found between the asset folders and the metadata.
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct SweepReport {
    /// Audio files no record refers to.
    pub orphaned_audio: Vec<String>,
    /// Cover files no record refers to.
    pub orphaned_covers: Vec<String>,
    /// Ids whose audio or cover file is gone.
    pub dangling: Vec<String>,
    /// Whether the orphaned files were deleted.
    pub removed: bool,
}

impl SweepReport {
    pub fn is_clean(&self) -> bool {
        self.orphaned_audio.is_empty() && self.orphaned_covers.is_empty() && self.dangling.is_empty()
    }
}

/// Compares `store` with the folders. Callers hold the store's writer lock
/// so no create or delete runs while files are being compared or removed.
pub async fn sweep(store: &Store, files: &AssetFiles, remove_orphans: bool) -> Result<SweepReport> {
    let referenced_audio: HashSet<&str> = store.records().iter().map(|r| r.filename.as_str()).collect();
    let referenced_covers: HashSet<&str> = store.records().iter().filter_map(|r| r.cover.as_deref()).collect();

    let mut report = SweepReport {
        orphaned_audio: files
            .audio_files()
            .await?
            .into_iter()
            .filter(|name| !referenced_audio.contains(name.as_str()))
            .collect(),
        orphaned_covers: files
            .cover_files()
            .await?
            .into_iter()
            .filter(|name| !referenced_covers.contains(name.as_str()))
            .collect(),
        ..Default::default()
    };

    for record in store.records() {
        let audio_present = match files.resolve_audio_path(&record.filename) {
            Ok(path) => tokio::fs::try_exists(path).await?,
            Err(_) => false,
        };
        let cover_present = match &record.cover {
            Some(cover) => match files.resolve_cover_path(cover) {
                Ok(path) => tokio::fs::try_exists(path).await?,
                Err(_) => false,
            },
            None => true,
        };
        if !audio_present || !cover_present {
            warn!("Asset {} references a missing file", record.id);
            report.dangling.push(record.id.clone());
        }
    }

    if remove_orphans {
        for name in &report.orphaned_audio {
            files.delete_audio(name).await?;
        }
        for name in &report.orphaned_covers {
            files.delete_cover(name).await?;
        }
        report.removed = true;
    }

    info!(
        "Sweep: {} orphaned audio, {} orphaned covers, {} dangling{}",
        report.orphaned_audio.len(),
        report.orphaned_covers.len(),
        report.dangling.len(),
        if remove_orphans { " (orphans removed)" } else { "" }
    );
    Ok(report)
}
