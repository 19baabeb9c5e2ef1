use std::collections::HashMap;
use std::fmt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use log::{debug, error, warn};
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, MutexGuard};

use crate::error::{LibraryError, Result};

/// Metadata for one uploaded asset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Filled from the document key when missing from the body.
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub filename: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub cover: Option<String>,
    #[serde(default = "unix_epoch")]
    pub created_at: DateTime<Utc>,
}

fn unix_epoch() -> DateTime<Utc> {
    DateTime::from(std::time::SystemTime::UNIX_EPOCH)
}

/// All records, keyed by id, in document order.
///
/// Persisted as a JSON object `{ id: record, ... }`. Order is kept as read
/// from disk with new records appended, so it is not necessarily the
/// `created_at` order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Store {
    records: Vec<Record>,
}

impl Store {
    pub fn get(&self, id: &str) -> Option<&Record> {
        self.records.iter().find(|r| r.id == id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Record> {
        self.records.iter_mut().find(|r| r.id == id)
    }

    /// Inserts a record, replacing any record with the same id in place.
    pub fn insert(&mut self, record: Record) {
        match self.get_mut(&record.id) {
            Some(existing) => *existing = record,
            None => self.records.push(record),
        }
    }

    pub fn remove(&mut self, id: &str) -> Option<Record> {
        let index = self.records.iter().position(|r| r.id == id)?;
        Some(self.records.remove(index))
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn into_records(self) -> Vec<Record> {
        self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }
}

impl Serialize for Store {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.records.len()))?;
        for record in &self.records {
            map.serialize_entry(&record.id, record)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Store {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct StoreVisitor;

        impl<'de> Visitor<'de> for StoreVisitor {
            type Value = Store;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of asset id to record")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> std::result::Result<Store, A::Error> {
                let mut store = Store::default();
                let mut positions: HashMap<String, usize> = HashMap::new();
                while let Some((id, mut record)) = access.next_entry::<String, Record>()? {
                    record.id = id.clone();
                    match positions.get(&id) {
                        Some(&index) => store.records[index] = record,
                        None => {
                            positions.insert(id, store.records.len());
                            store.records.push(record);
                        }
                    }
                }
                Ok(store)
            }
        }

        deserializer.deserialize_map(StoreVisitor)
    }
}

/// The JSON document backing the [`Store`].
///
/// Every read loads the document from disk and every write rewrites it;
/// nothing is cached between calls. Writers serialize on an internal lock
/// (see [`MetadataStore::begin_write`]) and saves go through a temp file plus
/// rename, so lock-free readers never observe a half-written document.
pub struct MetadataStore {
    path: PathBuf,
    writer: Mutex<()>,
}

/// An exclusive load-modify-save session over the store.
///
/// Changes made to `store` are discarded unless [`StoreWrite::commit`] is
/// called. Other writers wait until this value is dropped.
pub struct StoreWrite<'a> {
    _guard: MutexGuard<'a, ()>,
    metadata: &'a MetadataStore,
    pub store: Store,
}

impl StoreWrite<'_> {
    pub async fn commit(self) -> Result<()> {
        self.metadata.save(&self.store).await
    }
}

impl MetadataStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            writer: Mutex::new(()),
        }
    }

    /// Reads the document. Missing or unreadable documents yield an empty store.
    pub async fn load(&self) -> Store {
        match read_document(&self.path).await {
            Ok(Some(store)) => store,
            Ok(None) => Store::default(),
            Err(e) => {
                warn!("Treating metadata at {} as empty: {}", self.path.display(), e);
                Store::default()
            }
        }
    }

    /// Pretty-prints the store and atomically replaces the document.
    pub async fn save(&self, store: &Store) -> Result<()> {
        let content = serde_json::to_string_pretty(store)
            .map_err(|e| LibraryError::PersistenceFailure(e.to_string()))?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| LibraryError::PersistenceFailure(e.to_string()))?;
        }

        let temp_path = temp_path_for(&self.path);
        let written = async {
            let mut file = tokio::fs::File::create(&temp_path).await?;
            file.write_all(content.as_bytes()).await?;
            file.sync_all().await?;
            tokio::fs::rename(&temp_path, &self.path).await
        }
        .await;

        if let Err(e) = written {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(LibraryError::PersistenceFailure(format!(
                "{}: {}",
                self.path.display(),
                e
            )));
        }

        debug!("Saved {} records to {}", store.len(), self.path.display());
        Ok(())
    }

    pub async fn get(&self, id: &str) -> Option<Record> {
        self.load().await.get(id).cloned()
    }

    pub async fn list(&self) -> Vec<Record> {
        self.load().await.into_records()
    }

    /// Takes the writer lock and loads the current document.
    pub async fn begin_write(&self) -> StoreWrite<'_> {
        let guard = self.writer.lock().await;
        let store = self.load().await;
        StoreWrite {
            _guard: guard,
            metadata: self,
            store,
        }
    }

    /// Moves an unparsable document aside so the library can start empty
    /// without losing its contents. Returns the backup location, if any.
    pub async fn recover(&self) -> Result<Option<PathBuf>> {
        let _guard = self.writer.lock().await;

        let reason = match read_document(&self.path).await {
            Ok(_) => return Ok(None),
            Err(ReadError::Io(e)) => return Err(LibraryError::PersistenceFailure(e.to_string())),
            Err(e @ ReadError::Parse(_)) => e,
        };

        let backup = backup_path_for(&self.path, Utc::now());
        tokio::fs::rename(&self.path, &backup)
            .await
            .map_err(|e| LibraryError::PersistenceFailure(e.to_string()))?;
        error!(
            "Metadata at {} is unreadable ({}), moved to {}",
            self.path.display(),
            reason,
            backup.display()
        );
        Ok(Some(backup))
    }
}

#[derive(Debug)]
enum ReadError {
    Io(std::io::Error),
    Parse(serde_json::Error),
}

impl fmt::Display for ReadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadError::Io(e) => write!(f, "read failed: {}", e),
            ReadError::Parse(e) => write!(f, "parse failed: {}", e),
        }
    }
}

async fn read_document(path: &Path) -> std::result::Result<Option<Store>, ReadError> {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(ReadError::Io(e)),
    };
    serde_json::from_str(&content).map(Some).map_err(ReadError::Parse)
}

fn temp_path_for(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

fn backup_path_for(path: &Path, at: DateTime<Utc>) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(format!(".corrupt-{}", at.timestamp()));
    path.with_file_name(name)
}
