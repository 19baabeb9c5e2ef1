use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::sync::OnceLock;

use log::{debug, info};
use regex::Regex;

use crate::error::{LibraryError, Result};

pub const AUDIO_EXTENSION: &str = "mp3";
pub const COVER_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "webp"];

const COVER_SUFFIX: &str = "_cover";
const PARTIAL_SUFFIX: &str = ".part";

/// Placement and removal of the binary files behind each record.
///
/// Audio keeps its (sanitized) upload name; covers are named
/// `<id>_cover.<ext>` so each id has a single well-known cover name.
pub struct AssetFiles {
    audio_dir: PathBuf,
    cover_dir: PathBuf,
}

impl AssetFiles {
    pub fn new(audio_dir: impl Into<PathBuf>, cover_dir: impl Into<PathBuf>) -> Self {
        Self {
            audio_dir: audio_dir.into(),
            cover_dir: cover_dir.into(),
        }
    }

    pub async fn create_dirs(&self) -> Result<()> {
        for dir in [&self.audio_dir, &self.cover_dir] {
            if !tokio::fs::try_exists(dir).await? {
                tokio::fs::create_dir_all(dir).await?;
                info!("Created folder: {}", dir.display());
            }
        }
        Ok(())
    }

    /// Writes an upload into the audio directory and returns the stored name.
    ///
    /// An existing file with the same sanitized name is overwritten. Names
    /// that sanitize to nothing usable (`曲.mp3`, `..mp3`) are stored as
    /// `<id>.mp3`.
    pub async fn store_audio(&self, id: &str, original_name: &str, content: &[u8]) -> Result<String> {
        if !is_audio_name(original_name) {
            return Err(LibraryError::InvalidAssetType(original_name.to_string()));
        }
        let filename = sanitize_filename(original_name)
            .filter(|name| is_audio_name(name) && stem_of(name) != name)
            .unwrap_or_else(|| format!("{}.{}", id, AUDIO_EXTENSION));

        let path = self.resolve_audio_path(&filename)?;
        write_replacing(&path, id, content).await?;
        debug!("Stored audio for {} at {}", id, path.display());
        Ok(filename)
    }

    /// Writes a cover image under the id-derived name and returns that name.
    pub async fn store_cover(&self, id: &str, content: &[u8], extension: &str) -> Result<String> {
        let extension = cover_extension(extension)?;
        let filename = cover_filename(id, &extension);

        let path = self.resolve_cover_path(&filename)?;
        write_replacing(&path, id, content).await?;
        debug!("Stored cover for {} at {}", id, path.display());
        Ok(filename)
    }

    pub async fn delete_audio(&self, filename: &str) -> Result<()> {
        remove_if_present(&self.resolve_audio_path(filename)?).await
    }

    pub async fn delete_cover(&self, filename: &str) -> Result<()> {
        remove_if_present(&self.resolve_cover_path(filename)?).await
    }

    pub fn resolve_audio_path(&self, filename: &str) -> Result<PathBuf> {
        contained(&self.audio_dir, filename)
    }

    pub fn resolve_cover_path(&self, filename: &str) -> Result<PathBuf> {
        contained(&self.cover_dir, filename)
    }

    /// Names of finished audio files currently in the audio directory.
    pub async fn audio_files(&self) -> Result<Vec<String>> {
        let names = list_dir(&self.audio_dir).await?;
        Ok(names.into_iter().filter(|name| is_audio_name(name)).collect())
    }

    /// Names of finished files currently in the cover directory.
    pub async fn cover_files(&self) -> Result<Vec<String>> {
        let names = list_dir(&self.cover_dir).await?;
        Ok(names.into_iter().filter(|name| !name.ends_with(PARTIAL_SUFFIX)).collect())
    }
}

/// Case-insensitive `.mp3` check.
pub fn is_audio_name(name: &str) -> bool {
    extension_of(name).is_some_and(|ext| ext.eq_ignore_ascii_case(AUDIO_EXTENSION))
}

/// Lower-cased extension of `name`, if it has one.
pub fn extension_of(name: &str) -> Option<String> {
    let (_, ext) = name.rsplit_once('.')?;
    if ext.is_empty() || ext.contains(['/', '\\']) {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

/// File stem used as the default title (`track.mp3` -> `track`).
pub fn stem_of(filename: &str) -> &str {
    match filename.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => filename,
    }
}

pub fn cover_filename(id: &str, extension: &str) -> String {
    format!("{}{}.{}", id, COVER_SUFFIX, extension)
}

fn cover_extension(extension: &str) -> Result<String> {
    let extension = extension.trim_start_matches('.').to_ascii_lowercase();
    if COVER_EXTENSIONS.contains(&extension.as_str()) {
        Ok(extension)
    } else {
        Err(LibraryError::InvalidAssetType(extension))
    }
}

/// Reduces an upload name to `[A-Za-z0-9_.-]`, the way web frameworks make
/// user supplied names safe to store: separators become whitespace, runs of
/// whitespace become `_`, anything else unsafe is dropped, and leading or
/// trailing `.`/`_` are trimmed. Returns `None` when nothing usable is left.
pub fn sanitize_filename(name: &str) -> Option<String> {
    static UNSAFE: OnceLock<Regex> = OnceLock::new();
    let unsafe_chars = UNSAFE.get_or_init(|| Regex::new(r"[^A-Za-z0-9_.-]").expect("valid pattern"));

    let spaced = name.replace(['/', '\\'], " ");
    let joined = spaced.split_whitespace().collect::<Vec<_>>().join("_");
    let cleaned = unsafe_chars.replace_all(&joined, "");
    let trimmed = cleaned.trim_matches(['.', '_']);

    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Joins `filename` onto `dir`, refusing anything but a single plain name.
fn contained(dir: &Path, filename: &str) -> Result<PathBuf> {
    let invalid = || LibraryError::InvalidPath(filename.to_string());

    if filename.is_empty() || filename.contains(['/', '\\', '\0']) {
        return Err(invalid());
    }
    let mut components = Path::new(filename).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(dir.join(filename)),
        _ => Err(invalid()),
    }
}

/// Writes to a sibling `.part` file first so readers never see a torn file.
async fn write_replacing(path: &Path, id: &str, content: &[u8]) -> Result<()> {
    let mut partial = path.as_os_str().to_os_string();
    partial.push(format!(".{}{}", id, PARTIAL_SUFFIX));
    let partial = PathBuf::from(partial);

    if let Err(e) = tokio::fs::write(&partial, content).await {
        let _ = tokio::fs::remove_file(&partial).await;
        return Err(e.into());
    }
    if let Err(e) = tokio::fs::rename(&partial, path).await {
        let _ = tokio::fs::remove_file(&partial).await;
        return Err(e.into());
    }
    Ok(())
}

async fn remove_if_present(path: &Path) -> Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {
            debug!("Removed {}", path.display());
            Ok(())
        }
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

async fn list_dir(dir: &Path) -> Result<Vec<String>> {
    let mut names = Vec::new();
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(names),
        Err(e) => return Err(e.into()),
    };
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_file() {
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
    }
    names.sort();
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn files(dir: &TempDir) -> AssetFiles {
        AssetFiles::new(dir.path().join("music"), dir.path().join("covers"))
    }

    #[test]
    fn sanitizes_like_secure_filename() {
        assert_eq!(sanitize_filename("track.mp3").as_deref(), Some("track.mp3"));
        assert_eq!(sanitize_filename("My Song  (live).mp3").as_deref(), Some("My_Song_live.mp3"));
        assert_eq!(sanitize_filename("../../a b.mp3").as_deref(), Some("a_b.mp3"));
        assert_eq!(sanitize_filename("..\\..\\evil.mp3").as_deref(), Some("evil.mp3"));
        assert_eq!(sanitize_filename("/etc/passwd").as_deref(), Some("etc_passwd"));
        assert_eq!(sanitize_filename("曲.mp3").as_deref(), Some("mp3"));
        assert_eq!(sanitize_filename("../.."), None);
        assert_eq!(sanitize_filename(""), None);
    }

    #[test]
    fn audio_check_is_case_insensitive_mp3_only() {
        assert!(is_audio_name("a.mp3"));
        assert!(is_audio_name("A.MP3"));
        assert!(!is_audio_name("a.wav"));
        assert!(!is_audio_name("mp3"));
        assert!(!is_audio_name("a.mp3.exe"));
    }

    #[test]
    fn stem_defaults() {
        assert_eq!(stem_of("track.mp3"), "track");
        assert_eq!(stem_of("a.b.mp3"), "a.b");
        assert_eq!(stem_of("noext"), "noext");
    }

    #[test]
    fn resolve_rejects_traversal() {
        let dir = TempDir::new().unwrap();
        let files = files(&dir);

        for bad in ["../secret.mp3", "..", ".", "", "/etc/passwd", "a/b.mp3", "a\\b.mp3", "./a.mp3"] {
            assert!(
                matches!(files.resolve_audio_path(bad), Err(LibraryError::InvalidPath(_))),
                "audio accepted {:?}",
                bad
            );
            assert!(
                matches!(files.resolve_cover_path(bad), Err(LibraryError::InvalidPath(_))),
                "cover accepted {:?}",
                bad
            );
        }

        let path = files.resolve_audio_path("song.mp3").unwrap();
        assert_eq!(path, dir.path().join("music").join("song.mp3"));
    }

    #[tokio::test]
    async fn store_audio_rejects_wrong_type_without_writing() {
        let dir = TempDir::new().unwrap();
        let files = files(&dir);
        files.create_dirs().await.unwrap();

        let result = files.store_audio("id", "track.wav", b"data").await;
        assert!(matches!(result, Err(LibraryError::InvalidAssetType(_))));
        assert!(files.audio_files().await.unwrap().is_empty());
        assert_eq!(std::fs::read_dir(dir.path().join("music")).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn create_dirs_is_repeatable() {
        let dir = TempDir::new().unwrap();
        let files = AssetFiles::new(dir.path().join("a").join("music"), dir.path().join("covers"));
        files.create_dirs().await.unwrap();
        files.create_dirs().await.unwrap();
        assert!(dir.path().join("a").join("music").is_dir());
        assert!(dir.path().join("covers").is_dir());
    }

    #[tokio::test]
    async fn store_audio_names_unusable_uploads_after_id() {
        let dir = TempDir::new().unwrap();
        let files = files(&dir);
        files.create_dirs().await.unwrap();

        assert_eq!(files.store_audio("abc", "曲.mp3", b"1").await.unwrap(), "abc.mp3");
        assert_eq!(files.store_audio("def", "..mp3", b"2").await.unwrap(), "def.mp3");
        assert_eq!(files.store_audio("ghi", "歌 - x.MP3", b"3").await.unwrap(), "-_x.MP3");
        assert_eq!(
            files.audio_files().await.unwrap(),
            vec!["-_x.MP3".to_string(), "abc.mp3".to_string(), "def.mp3".to_string()]
        );
    }

    #[tokio::test]
    async fn store_audio_overwrites_same_name() {
        let dir = TempDir::new().unwrap();
        let files = files(&dir);
        files.create_dirs().await.unwrap();

        let first = files.store_audio("a", "dup.mp3", b"first").await.unwrap();
        let second = files.store_audio("b", "dup.mp3", b"second").await.unwrap();
        assert_eq!(first, second);
        let path = files.resolve_audio_path(&second).unwrap();
        assert_eq!(std::fs::read(path).unwrap(), b"second");
        assert_eq!(files.audio_files().await.unwrap(), vec!["dup.mp3".to_string()]);
    }

    #[tokio::test]
    async fn store_cover_uses_id_derived_name() {
        let dir = TempDir::new().unwrap();
        let files = files(&dir);
        files.create_dirs().await.unwrap();

        let name = files.store_cover("abc", b"img", ".PNG").await.unwrap();
        assert_eq!(name, "abc_cover.png");
        assert!(dir.path().join("covers").join("abc_cover.png").exists());

        let result = files.store_cover("abc", b"img", "exe").await;
        assert!(matches!(result, Err(LibraryError::InvalidAssetType(_))));
    }

    #[tokio::test]
    async fn deleting_absent_files_is_not_an_error() {
        let dir = TempDir::new().unwrap();
        let files = files(&dir);
        files.create_dirs().await.unwrap();

        files.delete_audio("never-existed.mp3").await.unwrap();
        files.delete_cover("never-existed_cover.png").await.unwrap();

        files.store_audio("x", "gone.mp3", b"1").await.unwrap();
        files.delete_audio("gone.mp3").await.unwrap();
        files.delete_audio("gone.mp3").await.unwrap();
        assert!(!dir.path().join("music").join("gone.mp3").exists());
    }

    #[tokio::test]
    async fn delete_rejects_traversal() {
        let dir = TempDir::new().unwrap();
        let files = files(&dir);
        let result = files.delete_audio("../metadata.json").await;
        assert!(matches!(result, Err(LibraryError::InvalidPath(_))));
    }
}
