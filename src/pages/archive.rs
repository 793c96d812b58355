use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::info;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::pages::fetch::PageSet;

const MAX_NAME_CHARS: usize = 100;
const FORBIDDEN: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// Turn a post title into a file stem: forbidden path characters removed,
/// at most 100 characters, surrounding whitespace trimmed.
pub fn sanitize_filename(title: &str) -> String {
    let cleaned: String = title
        .chars()
        .filter(|c| !FORBIDDEN.contains(c))
        .take(MAX_NAME_CHARS)
        .collect();
    cleaned.trim().to_string()
}

pub fn archive_path(dir: &Path, title: &str) -> PathBuf {
    dir.join(format!("{}.cbz", sanitize_filename(title)))
}

pub(crate) fn deflated() -> SimpleFileOptions {
    SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .unix_permissions(0o644)
}

/// Write `pages` into `<staging_dir>/<sanitized title>.cbz`, one entry per
/// page in ascending position. Returns `None` for an empty page set.
pub fn build_archive(pages: &PageSet, staging_dir: &Path, title: &str) -> Result<Option<PathBuf>> {
    if pages.is_empty() {
        return Ok(None);
    }

    std::fs::create_dir_all(staging_dir)
        .with_context(|| format!("Failed to create {}", staging_dir.display()))?;
    let path = archive_path(staging_dir, title);

    let file = File::create(&path).with_context(|| format!("Failed to create {}", path.display()))?;
    let mut zip = ZipWriter::new(file);
    let options = deflated();

    for page in pages.values() {
        zip.start_file(page.filename.as_str(), options)?;
        zip.write_all(&page.bytes)?;
    }
    zip.finish()?;

    info!("Archive built: {} ({} pages)", path.display(), pages.len());
    Ok(Some(path))
}
