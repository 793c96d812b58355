use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::pages::dedup::{self, DedupPolicy};
use crate::pages::extract::SKIP_IMAGES;
use crate::pages::fetch::{self, FetchOptions};
use crate::pages::PipelineOptions;

pub const FEED_URL: &str = "https://tippylahostess.blogspot.com/feeds/posts/default?alt=rss";
const DEFAULT_CONFIG_FILE: &str = "tippy";
const ENV_PREFIX: &str = "TIPPY";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub feed_url: String,
    pub db_path: PathBuf,
    /// Plain-text copy of the log. Empty disables it.
    pub log_file: PathBuf,
    /// Archives are staged in `<download_dir>/temp` and land in
    /// `<download_dir>/final`.
    pub download_dir: PathBuf,
    pub max_workers: usize,
    pub timeout_secs: u64,
    pub skip_images: usize,
    pub threshold_ratio: f64,
    pub sample_start: usize,
    pub sample_end: usize,
    pub cooldown_secs: u64,
    pub upload_root: String,
    pub user_agent: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            feed_url: FEED_URL.to_string(),
            db_path: PathBuf::from("data/tippy.sqlite"),
            log_file: PathBuf::from("tippy_monitor.log"),
            download_dir: PathBuf::from("Fumetti"),
            max_workers: fetch::MAX_WORKERS,
            timeout_secs: fetch::TIMEOUT.as_secs(),
            skip_images: SKIP_IMAGES,
            threshold_ratio: dedup::THRESHOLD_RATIO,
            sample_start: dedup::SAMPLE_START,
            sample_end: dedup::SAMPLE_END,
            cooldown_secs: 2,
            upload_root: "/Fumetti_Tippy".to_string(),
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36".to_string(),
        }
    }
}

impl Settings {
    /// Defaults, then `tippy.{toml,json,yaml}` (or `file`), then `TIPPY_*`
    /// environment variables.
    pub fn load(file: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        builder = match file {
            Some(path) => builder.add_source(config::File::from(path).required(true)),
            None => builder.add_source(config::File::with_name(DEFAULT_CONFIG_FILE).required(false)),
        };
        let settings = builder
            .add_source(config::Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()
            .context("Failed to read configuration")?
            .try_deserialize::<Settings>()
            .context("Invalid configuration")?;
        Ok(settings)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }

    pub fn staging_dir(&self) -> PathBuf {
        self.download_dir.join("temp")
    }

    pub fn final_dir(&self) -> PathBuf {
        self.download_dir.join("final")
    }

    pub fn log_file(&self) -> Option<&Path> {
        Some(self.log_file.as_path()).filter(|p| !p.as_os_str().is_empty())
    }

    pub fn dedup_policy(&self) -> DedupPolicy {
        DedupPolicy {
            sample_start: self.sample_start,
            sample_end: self.sample_end,
            threshold_ratio: self.threshold_ratio,
        }
    }

    pub fn pipeline(&self) -> PipelineOptions {
        PipelineOptions {
            skip_images: self.skip_images,
            fetch: FetchOptions {
                workers: self.max_workers.max(1),
                timeout: self.timeout(),
            },
            dedup: self.dedup_policy(),
            staging_dir: self.staging_dir(),
            final_dir: self.final_dir(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_pipeline_constants() {
        let s = Settings::default();
        let p = s.pipeline();
        assert_eq!(p.skip_images, 5);
        assert_eq!(p.fetch.workers, 5);
        assert_eq!(p.fetch.timeout, Duration::from_secs(15));
        assert_eq!(p.dedup.sample_start, 5);
        assert_eq!(p.dedup.sample_end, 15);
        assert!((p.dedup.threshold_ratio - 0.85).abs() < f64::EPSILON);
        assert_eq!(p.staging_dir, PathBuf::from("Fumetti/temp"));
        assert_eq!(p.final_dir, PathBuf::from("Fumetti/final"));
    }

    #[test]
    fn file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("monitor.toml");
        std::fs::write(
            &path,
            "max_workers = 8\nthreshold_ratio = 0.5\ndownload_dir = \"/srv/comics\"\nlog_file = \"\"\n",
        )
        .unwrap();

        let s = Settings::load(Some(&path)).unwrap();
        assert_eq!(s.max_workers, 8);
        assert!((s.threshold_ratio - 0.5).abs() < f64::EPSILON);
        assert_eq!(s.final_dir(), PathBuf::from("/srv/comics/final"));
        assert!(s.log_file().is_none());
        assert_eq!(s.skip_images, 5);
        assert_eq!(s.feed_url, FEED_URL);
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        assert!(Settings::load(Some(Path::new("/nonexistent/tippy.toml"))).is_err());
    }
}
