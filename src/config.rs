use std::env;
use std::path::PathBuf;

use log::LevelFilter;

use crate::library::LibraryPaths;

pub struct Config {
    pub music_path: String,
    pub cover_path: String,
    pub metadata_path: String,
    pub client_path: String,
    pub api_host: String,
    pub api_port: u16,
    pub log_level: LevelFilter,
    pub max_upload_bytes: usize,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            music_path: env::var("MUSIC_PATH").unwrap_or_else(|_| "music".to_string()),
            cover_path: env::var("COVER_PATH").unwrap_or_else(|_| "covers".to_string()),
            metadata_path: env::var("METADATA_PATH").unwrap_or_else(|_| "metadata.json".to_string()),
            client_path: env::var("CLIENT_PATH").unwrap_or_else(|_| "webgl_build".to_string()),
            api_host: env::var("API_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            // 5001 rather than 5000, which AirPlay takes on macOS
            api_port: env::var("API_PORT")
                .unwrap_or_else(|_| "5001".to_string())
                .parse()
                .unwrap_or(5001),
            log_level: env::var("LOG_LEVEL")
                .ok()
                .and_then(|level| level.parse().ok())
                .unwrap_or(LevelFilter::Info),
            max_upload_bytes: env::var("MAX_UPLOAD_BYTES")
                .ok()
                .and_then(|bytes| bytes.parse().ok())
                .unwrap_or(100 * 1024 * 1024),
        }
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.api_host, self.api_port)
    }

    pub fn library_paths(&self) -> LibraryPaths {
        LibraryPaths {
            audio_dir: PathBuf::from(&self.music_path),
            cover_dir: PathBuf::from(&self.cover_path),
            metadata_path: PathBuf::from(&self.metadata_path),
        }
    }
}
