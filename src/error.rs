use thiserror::Error;

/// Everything the asset library can report back to a caller.
#[derive(Error, Debug)]
pub enum LibraryError {
    #[error("invalid asset type: {0}")]
    InvalidAssetType(String),

    #[error("asset not found: {0}")]
    NotFound(String),

    #[error("asset {0} has no stored file")]
    NoFileReference(String),

    #[error("file missing on disk: {0}")]
    FileMissingOnDisk(String),

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("could not persist metadata: {0}")]
    PersistenceFailure(String),

    #[error("file I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl LibraryError {
    /// Stable machine-readable name, used in API error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            LibraryError::InvalidAssetType(_) => "invalid_asset_type",
            LibraryError::NotFound(_) => "not_found",
            LibraryError::NoFileReference(_) => "no_file_reference",
            LibraryError::FileMissingOnDisk(_) => "file_missing_on_disk",
            LibraryError::InvalidPath(_) => "invalid_path",
            LibraryError::PersistenceFailure(_) => "persistence_failure",
            LibraryError::Io(_) => "io",
        }
    }
}

pub type Result<T> = std::result::Result<T, LibraryError>;
