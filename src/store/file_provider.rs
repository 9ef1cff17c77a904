//! File-backed cache provider: one file per block under a base directory,
//! named `{cache_key}_{block_width}_{clamped_position}{extension}`.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::{debug, warn};

use crate::store::CacheProvider;

pub struct FileCacheProvider {
    location: PathBuf,
    extension: String,
    file_lock: Mutex<()>,
}

impl FileCacheProvider {
    pub fn new(location: impl Into<PathBuf>, extension: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            extension: extension.into(),
            file_lock: Mutex::new(()),
        }
    }

    pub fn location(&self) -> &Path {
        &self.location
    }

    fn file_path(&self, path: &str) -> PathBuf {
        self.location.join(format!("{path}{}", self.extension))
    }

    /// Walk `location` recursively and report `(clamped_position,
    /// block_width)` for every regular file whose stem matches
    /// `{cache_key}_{width}_{position}` with the given extension.
    /// Non-matching files are skipped silently.
    pub fn scan(
        location: &Path,
        extension: &str,
        cache_key: &str,
        handler: &mut impl FnMut(i32, i32),
    ) {
        let entries = match fs::read_dir(location) {
            Ok(entries) => entries,
            Err(_) => return,
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                Self::scan(&path, extension, cache_key, handler);
                continue;
            }
            if !path.is_file() {
                continue;
            }
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let Some(stem) = name.strip_suffix(extension) else {
                continue;
            };
            // Stem layout: {cache_key}_{width}_{clamped_position}; the key
            // itself contains no separators.
            let mut parts = stem.rsplitn(3, '_');
            let (Some(position_part), Some(width_part), Some(found_key)) =
                (parts.next(), parts.next(), parts.next())
            else {
                continue;
            };
            if found_key != cache_key {
                continue;
            }
            let (Ok(clamped_position), Ok(block_width)) =
                (position_part.parse::<i32>(), width_part.parse::<i32>())
            else {
                continue;
            };
            handler(clamped_position, block_width);
        }
    }
}

impl CacheProvider for FileCacheProvider {
    fn persist(&self, path: &str, bytes: &[u8]) -> bool {
        if bytes.is_empty() {
            return false;
        }
        let file = self.file_path(path);
        let _guard = self.file_lock.lock();
        if let Some(parent) = file.parent() {
            if fs::create_dir_all(parent).is_err() {
                return false;
            }
        }
        match fs::write(&file, bytes) {
            Ok(()) => {
                debug!(path, "cache block saved");
                true
            }
            Err(err) => {
                warn!(path, error = %err, "cache block save failed");
                false
            }
        }
    }

    fn provide(&self, path: &str) -> Option<Vec<u8>> {
        let file = self.file_path(path);
        if !file.exists() {
            return None;
        }
        let _guard = self.file_lock.lock();
        match fs::read(&file) {
            Ok(bytes) if bytes.is_empty() => None,
            Ok(bytes) => Some(bytes),
            Err(_) => None,
        }
    }
}
