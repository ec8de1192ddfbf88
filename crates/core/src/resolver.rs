//! Resolves the image set of a run: the supported image files directly inside one directory.

use crate::config::ImageConfig;
use crate::error::TaggerError;
use crate::models::{ImageEntry, ImageSet};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, warn};
use walkdir::WalkDir;

#[derive(Debug, Clone)]
pub struct ImageFilter {
    extensions: HashSet<String>,
    excludes: GlobSet,
}

impl ImageFilter {
    pub fn new(extensions: &[String], excludes: &[String]) -> Result<Self, TaggerError> {
        let extensions = extensions
            .iter()
            .map(|e| e.trim().trim_start_matches('.').to_lowercase())
            .filter(|e| !e.is_empty())
            .collect();
        Ok(Self {
            extensions,
            excludes: build_globset(excludes)?,
        })
    }

    pub fn from_config(cfg: &ImageConfig) -> Result<Self, TaggerError> {
        Self::new(&cfg.extensions, &cfg.exclude)
    }

    /// Extension check is case-insensitive; excludes match the file name or the full path.
    pub fn accepts(&self, path: &Path) -> bool {
        let allowed = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| self.extensions.contains(&e.to_lowercase()))
            .unwrap_or(false);
        allowed && !is_hidden(path) && !is_excluded(path, &self.excludes)
    }
}

/// Lists the accepted files directly inside `dir`, sorted by file name.
/// Subdirectories are never descended into.
pub fn resolve(dir: &Path, filter: &ImageFilter) -> Result<ImageSet, TaggerError> {
    if !dir.is_dir() {
        return Err(TaggerError::InvalidDirectory(dir.to_path_buf()));
    }

    let mut entries = Vec::new();
    for entry in WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .follow_links(true)
        .sort_by_file_name()
    {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                warn!(error = %e, "skipping unreadable directory entry");
                continue;
            }
        };

        let path = entry.path();
        if !entry.file_type().is_file() || !filter.accepts(path) {
            continue;
        }

        let Some(id) = path.file_name().and_then(|n| n.to_str()) else {
            warn!(path = ?path, "skipping file with a non UTF-8 name");
            continue;
        };

        entries.push(ImageEntry {
            id: id.to_string(),
            path: path.to_path_buf(),
        });
    }

    debug!(dir = %dir.display(), images = entries.len(), "resolved image set");
    Ok(ImageSet::new(entries))
}

fn build_globset(patterns: &[String]) -> Result<GlobSet, TaggerError> {
    let mut builder = GlobSetBuilder::new();
    for pat in patterns {
        builder.add(Glob::new(pat)?);
    }
    Ok(builder.build()?)
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|s| s.starts_with('.'))
        .unwrap_or(false)
}

fn is_excluded(path: &Path, excludes: &GlobSet) -> bool {
    excludes.is_match(path)
        || path
            .file_name()
            .map(|n| excludes.is_match(Path::new(n)))
            .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn default_filter() -> ImageFilter {
        ImageFilter::from_config(&ImageConfig::default()).unwrap()
    }

    #[test]
    fn keeps_only_supported_extensions_case_insensitively() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.JPG", "a.png", "c.jpeg", "d.gif", "notes.txt", "e.bmp", "noext"] {
            fs::write(dir.path().join(name), b"x").unwrap();
        }

        let set = resolve(dir.path(), &default_filter()).unwrap();
        assert_eq!(set.ids(), vec!["a.png", "b.JPG", "c.jpeg", "d.gif"]);
    }

    #[test]
    fn does_not_descend_into_subdirectories() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("nested.jpg")).unwrap();
        fs::create_dir(dir.path().join("more")).unwrap();
        fs::write(dir.path().join("more").join("deep.jpg"), b"x").unwrap();
        fs::write(dir.path().join("top.jpg"), b"x").unwrap();

        let set = resolve(dir.path(), &default_filter()).unwrap();
        assert_eq!(set.ids(), vec!["top.jpg"]);
    }

    #[test]
    fn folder_without_images_is_empty_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("readme.md"), b"x").unwrap();
        fs::write(dir.path().join("data.csv"), b"x").unwrap();

        let set = resolve(dir.path(), &default_filter()).unwrap();
        assert!(set.is_empty());
    }

    #[test]
    fn missing_or_file_path_is_invalid_directory() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.jpg");
        fs::write(&file, b"x").unwrap();

        assert!(matches!(
            resolve(&dir.path().join("nope"), &default_filter()),
            Err(TaggerError::InvalidDirectory(_))
        ));
        assert!(matches!(
            resolve(&file, &default_filter()),
            Err(TaggerError::InvalidDirectory(_))
        ));
    }

    #[test]
    fn hidden_and_excluded_files_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        for name in [".thumb.jpg", "keep.jpg", "draft_1.jpg"] {
            fs::write(dir.path().join(name), b"x").unwrap();
        }
        let filter = ImageFilter::new(&["jpg".to_string()], &["draft_*".to_string()]).unwrap();

        let set = resolve(dir.path(), &filter).unwrap();
        assert_eq!(set.ids(), vec!["keep.jpg"]);
    }

    #[test]
    fn extensions_accept_leading_dots() {
        let filter = ImageFilter::new(&[".PNG".to_string()], &[]).unwrap();
        assert!(filter.accepts(Path::new("/tmp/x.png")));
        assert!(!filter.accepts(Path::new("/tmp/x.jpg")));
    }
}
