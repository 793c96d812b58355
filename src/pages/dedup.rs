//! Area-based page filter.
//!
//! Blog posts mix the real comic pages with small banners and re-served
//! thumbnails of the same pages. Those are never byte-identical to the page
//! they duplicate, so instead of hashing we compare pixel areas against a
//! reference taken from a window of pages that is assumed to be well inside
//! the comic.

use std::fs::File;
use std::io::{Cursor, Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use image::ImageReader;
use tracing::{info, warn};
use zip::{ZipArchive, ZipWriter};

use crate::pages::archive::deflated;

/// First index (0-based, into the sorted image entries) of the reference sample.
pub const SAMPLE_START: usize = 5;
/// Exclusive end of the reference sample.
pub const SAMPLE_END: usize = 15;
/// Fraction of the reference area a page needs to be kept.
pub const THRESHOLD_RATIO: f64 = 0.85;

pub const IMAGE_EXTS: &[&str] = &[".jpg", ".jpeg", ".png", ".webp", ".bmp", ".gif"];

#[derive(Debug, Clone)]
pub struct DedupPolicy {
    pub sample_start: usize,
    pub sample_end: usize,
    pub threshold_ratio: f64,
}

impl Default for DedupPolicy {
    fn default() -> Self {
        Self {
            sample_start: SAMPLE_START,
            sample_end: SAMPLE_END,
            threshold_ratio: THRESHOLD_RATIO,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DedupReport {
    pub path: PathBuf,
    pub reference_area: u64,
    pub kept: usize,
    pub dropped: usize,
}

pub fn is_image_name(name: &str) -> bool {
    let lower = name.to_lowercase();
    IMAGE_EXTS.iter().any(|ext| lower.ends_with(ext))
}

/// Filter `src` into `final_dir`. Never fails: on any error the original
/// archive path is returned and the partial output is removed.
pub fn deduplicate(src: &Path, final_dir: &Path, policy: &DedupPolicy) -> PathBuf {
    match try_deduplicate(src, final_dir, policy) {
        Ok(Some(report)) => {
            info!(
                "Dedup {}: kept {}, dropped {} (reference area {})",
                report.path.display(),
                report.kept,
                report.dropped,
                report.reference_area
            );
            report.path
        }
        Ok(None) => src.to_path_buf(),
        Err(e) => {
            warn!("Dedup failed for {}: {:#}", src.display(), e);
            src.to_path_buf()
        }
    }
}

/// Like [`deduplicate`] but surfaces the error. `Ok(None)` means the archive
/// holds no images and was left alone.
pub fn try_deduplicate(src: &Path, final_dir: &Path, policy: &DedupPolicy) -> Result<Option<DedupReport>> {
    let file = File::open(src).with_context(|| format!("Failed to open {}", src.display()))?;
    let mut zin = ZipArchive::new(file)?;

    let mut names: Vec<String> = zin.file_names().map(str::to_string).collect();
    names.sort();
    let images: Vec<&String> = names.iter().filter(|n| is_image_name(n)).collect();
    if images.is_empty() {
        return Ok(None);
    }

    let mut reference_area = 0u64;
    for name in &images[sample_window(images.len(), policy)] {
        let data = read_entry(&mut zin, name)?;
        reference_area = reference_area.max(pixel_area(&data).with_context(|| format!("Bad image {}", name))?);
    }
    let cutoff = reference_area as f64 * policy.threshold_ratio;

    let file_name = src.file_name().context("Archive path has no file name")?;
    std::fs::create_dir_all(final_dir)
        .with_context(|| format!("Failed to create {}", final_dir.display()))?;
    let out_path = final_dir.join(file_name);
    if same_file(src, &out_path) {
        bail!("Refusing to overwrite source archive {}", src.display());
    }

    let result = rewrite(&mut zin, &names, &out_path, cutoff);
    match result {
        Ok((kept, dropped)) => Ok(Some(DedupReport {
            path: out_path,
            reference_area,
            kept,
            dropped,
        })),
        Err(e) => {
            let _ = std::fs::remove_file(&out_path);
            Err(e)
        }
    }
}

/// Indices `min(start, n) .. min(end, n)`. Empty for short archives, which
/// leaves the reference area at 0 and lets every page through.
fn sample_window(count: usize, policy: &DedupPolicy) -> std::ops::Range<usize> {
    let start = policy.sample_start.min(count);
    let end = policy.sample_end.min(count).max(start);
    start..end
}

fn rewrite(
    zin: &mut ZipArchive<File>,
    names: &[String],
    out_path: &Path,
    cutoff: f64,
) -> Result<(usize, usize)> {
    let file = File::create(out_path).with_context(|| format!("Failed to create {}", out_path.display()))?;
    let mut zout = ZipWriter::new(file);
    let options = deflated();
    let (mut kept, mut dropped) = (0usize, 0usize);

    for name in names {
        let data = read_entry(zin, name)?;
        if is_image_name(name) {
            let area = pixel_area(&data).with_context(|| format!("Bad image {}", name))?;
            if (area as f64) < cutoff {
                dropped += 1;
                continue;
            }
            kept += 1;
        }
        zout.start_file(name.as_str(), options)?;
        zout.write_all(&data)?;
    }
    zout.finish()?;
    Ok((kept, dropped))
}

fn read_entry(zin: &mut ZipArchive<File>, name: &str) -> Result<Vec<u8>> {
    let mut entry = zin.by_name(name)?;
    let mut data = Vec::with_capacity(entry.size() as usize);
    entry.read_to_end(&mut data)?;
    Ok(data)
}

/// Width × height from the image header; the format is sniffed from the
/// bytes, not taken from the entry name.
fn pixel_area(data: &[u8]) -> Result<u64> {
    let (w, h) = ImageReader::new(Cursor::new(data))
        .with_guessed_format()?
        .into_dimensions()?;
    Ok(u64::from(w) * u64::from(h))
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use image::{ImageBuffer, ImageFormat, Rgb};

    pub(crate) fn png(width: u32, height: u32) -> Vec<u8> {
        let img: ImageBuffer<Rgb<u8>, Vec<u8>> =
            ImageBuffer::from_fn(width, height, |x, y| Rgb([(x % 256) as u8, (y % 256) as u8, 0]));
        let mut bytes: Vec<u8> = Vec::new();
        img.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png).unwrap();
        bytes
    }

    fn write_archive(path: &Path, entries: &[(String, Vec<u8>)]) {
        let mut zip = ZipWriter::new(File::create(path).unwrap());
        for (name, data) in entries {
            zip.start_file(name.as_str(), deflated()).unwrap();
            zip.write_all(data).unwrap();
        }
        zip.finish().unwrap();
    }

    fn read_archive(path: &Path) -> Vec<(String, Vec<u8>)> {
        let mut zip = ZipArchive::new(File::open(path).unwrap()).unwrap();
        let mut names: Vec<String> = zip.file_names().map(str::to_string).collect();
        names.sort();
        names
            .into_iter()
            .map(|n| {
                let data = read_entry(&mut zip, &n).unwrap();
                (n, data)
            })
            .collect()
    }

    fn pages(sizes: &[(u32, u32)]) -> Vec<(String, Vec<u8>)> {
        sizes
            .iter()
            .enumerate()
            .map(|(i, &(w, h))| (format!("pag{:03}.jpg", i + 1), png(w, h)))
            .collect()
    }

    struct Dirs {
        _root: tempfile::TempDir,
        staging: PathBuf,
        final_dir: PathBuf,
    }

    fn dirs() -> Dirs {
        let root = tempfile::tempdir().unwrap();
        let staging = root.path().join("temp");
        let final_dir = root.path().join("final");
        std::fs::create_dir_all(&staging).unwrap();
        Dirs {
            _root: root,
            staging,
            final_dir,
        }
    }

    #[test]
    fn short_archive_passes_untouched() {
        let d = dirs();
        let src = d.staging.join("short.cbz");
        let entries = pages(&[(10, 10), (100, 150), (3, 3), (100, 150)]);
        write_archive(&src, &entries);

        let report = try_deduplicate(&src, &d.final_dir, &DedupPolicy::default()).unwrap().unwrap();
        assert_eq!(report.reference_area, 0);
        assert_eq!(report.dropped, 0);
        assert_eq!(read_archive(&report.path), entries);
    }

    #[test]
    fn pages_below_cutoff_are_dropped() {
        let d = dirs();
        let src = d.staging.join("comic.cbz");
        // Reference sample is pages 6..=15; the largest there is 100x150.
        let mut sizes = vec![(20, 20), (100, 150), (40, 30), (100, 150), (100, 150)];
        sizes.extend([(100, 150); 8]);
        sizes.extend([(90, 150), (50, 50)]);
        // Cutoff is 12_750: 100x128 stays, 100x127 goes.
        sizes.extend([(100, 128), (100, 127), (200, 200)]);
        let mut entries = pages(&sizes);
        entries.push(("ComicInfo.xml".to_string(), b"<ComicInfo/>".to_vec()));
        write_archive(&src, &entries);

        let report = try_deduplicate(&src, &d.final_dir, &DedupPolicy::default()).unwrap().unwrap();
        assert_eq!(report.reference_area, 15_000);
        assert_eq!(report.path, d.final_dir.join("comic.cbz"));

        let out = read_archive(&report.path);
        let names: Vec<&str> = out.iter().map(|(n, _)| n.as_str()).collect();
        assert!(names.contains(&"ComicInfo.xml"));
        for (name, data) in &entries {
            if !is_image_name(name) {
                continue;
            }
            let area = pixel_area(data).unwrap() as f64;
            assert_eq!(
                names.contains(&name.as_str()),
                area >= 15_000.0 * THRESHOLD_RATIO,
                "{name} area {area}"
            );
        }
        // pag001, pag003, pag015 (50x50) and pag017 (100x127) fall below 12_750.
        assert_eq!(report.dropped, 4);
        assert_eq!(report.kept, sizes.len() - 4);
    }

    #[test]
    fn second_pass_changes_nothing() {
        let d = dirs();
        let src = d.staging.join("twice.cbz");
        let mut sizes = vec![(10, 10); 3];
        sizes.extend([(80, 120); 14]);
        sizes.push((40, 40));
        write_archive(&src, &pages(&sizes));

        let first = try_deduplicate(&src, &d.final_dir, &DedupPolicy::default()).unwrap().unwrap();
        let again_dir = d.final_dir.join("again");
        let second = try_deduplicate(&first.path, &again_dir, &DedupPolicy::default()).unwrap().unwrap();

        assert_eq!(second.dropped, 0);
        assert_eq!(read_archive(&first.path), read_archive(&second.path));
    }

    #[test]
    fn archive_without_images_is_returned_as_is() {
        let d = dirs();
        let src = d.staging.join("notes.cbz");
        write_archive(&src, &[("readme.txt".to_string(), b"hi".to_vec())]);

        assert!(try_deduplicate(&src, &d.final_dir, &DedupPolicy::default()).unwrap().is_none());
        assert_eq!(deduplicate(&src, &d.final_dir, &DedupPolicy::default()), src);
    }

    #[test]
    fn undecodable_page_falls_back_to_source() {
        let d = dirs();
        let src = d.staging.join("broken.cbz");
        let mut entries = pages(&[(50, 50); 8]);
        entries[6].1 = b"<html>404 not found</html>".to_vec();
        write_archive(&src, &entries);

        assert!(try_deduplicate(&src, &d.final_dir, &DedupPolicy::default()).is_err());
        assert_eq!(deduplicate(&src, &d.final_dir, &DedupPolicy::default()), src);
        assert!(!d.final_dir.join("broken.cbz").exists());
    }

    #[test]
    fn missing_archive_falls_back_to_source() {
        let d = dirs();
        let src = d.staging.join("gone.cbz");
        assert_eq!(deduplicate(&src, &d.final_dir, &DedupPolicy::default()), src);
    }

    #[test]
    fn refuses_to_rewrite_in_place() {
        let d = dirs();
        let src = d.staging.join("inplace.cbz");
        write_archive(&src, &pages(&[(10, 10); 6]));
        assert!(try_deduplicate(&src, &d.staging, &DedupPolicy::default()).is_err());
        assert_eq!(read_archive(&src).len(), 6);
    }

    #[test]
    fn sample_window_bounds() {
        let p = DedupPolicy::default();
        assert_eq!(sample_window(3, &p), 3..3);
        assert_eq!(sample_window(5, &p), 5..5);
        assert_eq!(sample_window(9, &p), 5..9);
        assert_eq!(sample_window(40, &p), 5..15);
    }

    #[test]
    fn image_names_by_extension() {
        assert!(is_image_name("pag001.JPG"));
        assert!(is_image_name("cover.webp"));
        assert!(!is_image_name("ComicInfo.xml"));
        assert!(!is_image_name("jpg"));
    }
}
