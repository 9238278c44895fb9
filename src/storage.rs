//! # Track File Storage
//!
//! Uploaded audio lives on disk under the configured storage root:
//!
//! ```text
//! {root}/tracks/user-{user_id}/{uuid}-{unix_millis}-{file_name}
//! ```
//!
//! The database stores the path relative to the root. [`Storage::resolve`]
//! refuses anything that would escape the root, so a tampered row can't be
//! used to read arbitrary files.
//!
//! This module also parses HTTP `Range` headers for partial audio responses,
//! which browsers need to seek inside `<audio>` elements.

use std::path::{Component, Path, PathBuf};

use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::{debug, warn};

use crate::error::{AppError, AppResult};

#[derive(Debug, Clone)]
pub struct Storage {
    root: PathBuf,
}

impl Storage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Write an uploaded track and return its path relative to the root.
    pub async fn save_track(&self, user_id: &str, file_name: &str, bytes: &[u8]) -> AppResult<String> {
        let folder = PathBuf::from("tracks").join(format!("user-{}", sanitize_file_name(user_id)));
        fs::create_dir_all(self.root.join(&folder)).await?;

        let server_name = format!(
            "{}-{}-{}",
            uuid::Uuid::new_v4(),
            chrono::Utc::now().timestamp_millis(),
            sanitize_file_name(file_name)
        );
        let rel = folder.join(server_name);
        let abs = self.root.join(&rel);
        fs::write(&abs, bytes).await?;

        debug!(path = %abs.display(), size = bytes.len(), "Track written to storage");
        Ok(rel.to_string_lossy().replace('\\', "/"))
    }

    /// Absolute path for a stored relative path. Rejects absolute paths and `..`.
    pub fn resolve(&self, rel: &str) -> AppResult<PathBuf> {
        let path = Path::new(rel);
        let escapes = path.components().any(|c| {
            matches!(c, Component::ParentDir | Component::RootDir | Component::Prefix(_))
        });
        if rel.is_empty() || escapes {
            return Err(AppError::Internal(format!("Refusing to access stored path '{}'", rel)));
        }
        Ok(self.root.join(path))
    }

    /// Remove a stored file. A file that is already gone is not an error.
    pub async fn delete(&self, rel: &str) -> AppResult<()> {
        let abs = self.resolve(rel)?;
        match fs::remove_file(&abs).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(path = %abs.display(), "Stored file already missing");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Best-effort removal of several files; failures are logged, not returned.
    pub async fn delete_all(&self, rels: &[String]) -> usize {
        let mut removed = 0;
        for rel in rels {
            match self.delete(rel).await {
                Ok(()) => removed += 1,
                Err(e) => warn!(path = %rel, error = %e, "Failed to delete stored file"),
            }
        }
        removed
    }

    pub async fn read(&self, rel: &str) -> AppResult<Vec<u8>> {
        let abs = self.resolve(rel)?;
        match fs::read(&abs).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(AppError::NotFound("Audio file not found".to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Size of a stored file in bytes.
    pub async fn len(&self, rel: &str) -> AppResult<u64> {
        let abs = self.resolve(rel)?;
        match fs::metadata(&abs).await {
            Ok(meta) => Ok(meta.len()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(AppError::NotFound("Audio file not found".to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Read `range` from a stored file.
    pub async fn read_range(&self, rel: &str, range: ByteRange) -> AppResult<Vec<u8>> {
        let abs = self.resolve(rel)?;
        let mut file = fs::File::open(&abs).await?;
        file.seek(std::io::SeekFrom::Start(range.start)).await?;

        let mut buf = vec![0u8; range.len() as usize];
        file.read_exact(&mut buf).await?;
        Ok(buf)
    }
}

/// Keep only the final path component and replace anything outside
/// `[A-Za-z0-9._-]` with `_`.
pub fn sanitize_file_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or("");
    let cleaned: String = base
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') { c } else { '_' })
        .collect();
    let trimmed = cleaned.trim_matches('.');
    if trimmed.is_empty() {
        "upload".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Name to store for an upload. The client extracts audio from video files
/// before uploading, so video uploads are renamed to `.mp3`.
pub fn audio_file_name(original: &str, is_video: bool) -> String {
    if !is_video {
        return original.to_string();
    }
    let stem = match original.rfind('.') {
        Some(idx) if idx > 0 => &original[..idx],
        _ => original,
    };
    format!("{}.mp3", stem)
}

/// MIME type for serving a stored track, from its extension.
pub fn guess_content_type(file_name: &str) -> &'static str {
    let ext = Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "ogg" | "oga" => "audio/ogg",
        "opus" => "audio/opus",
        "m4a" | "mp4" => "audio/mp4",
        "aac" => "audio/aac",
        "webm" => "audio/webm",
        "flac" => "audio/flac",
        _ => "application/octet-stream",
    }
}

/// An inclusive byte range within a file of known length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    /// Value for the `Content-Range` header.
    pub fn content_range(&self, total: u64) -> String {
        format!("bytes {}-{}/{}", self.start, self.end, total)
    }

    /// Parse a `Range` header against a file of `total` bytes.
    ///
    /// - `Ok(None)`: header is malformed or asks for several ranges; serve the whole file
    /// - `Ok(Some(range))`: serve `range` with 206
    /// - `Err(RangeNotSatisfiable)`: syntactically valid but outside the file; 416
    pub fn parse(header: &str, total: u64) -> AppResult<Option<ByteRange>> {
        let Some(spec) = header.trim().strip_prefix("bytes=") else {
            return Ok(None);
        };
        if spec.contains(',') {
            return Ok(None);
        }
        let Some((start, end)) = spec.trim().split_once('-') else {
            return Ok(None);
        };
        let (start, end) = (start.trim(), end.trim());

        let range = match (start.is_empty(), end.is_empty()) {
            // bytes=-N: the last N bytes
            (true, false) => {
                let Ok(suffix) = end.parse::<u64>() else { return Ok(None) };
                if suffix == 0 || total == 0 {
                    return Err(AppError::RangeNotSatisfiable(total));
                }
                ByteRange { start: total.saturating_sub(suffix), end: total - 1 }
            }
            // bytes=N-
            (false, true) => {
                let Ok(start) = start.parse::<u64>() else { return Ok(None) };
                if start >= total {
                    return Err(AppError::RangeNotSatisfiable(total));
                }
                ByteRange { start, end: total - 1 }
            }
            // bytes=N-M
            (false, false) => {
                let (Ok(start), Ok(end)) = (start.parse::<u64>(), end.parse::<u64>()) else {
                    return Ok(None);
                };
                if end < start {
                    return Ok(None);
                }
                if start >= total {
                    return Err(AppError::RangeNotSatisfiable(total));
                }
                ByteRange { start, end: end.min(total - 1) }
            }
            (true, true) => return Ok(None),
        };
        Ok(Some(range))
    }
}
