pub mod archive;
pub mod dedup;
pub mod extract;
pub mod fetch;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use tracing::{info, warn};

use crate::transport::Transport;
use dedup::DedupPolicy;
use fetch::FetchOptions;

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub skip_images: usize,
    pub fetch: FetchOptions,
    pub dedup: DedupPolicy,
    pub staging_dir: PathBuf,
    pub final_dir: PathBuf,
}

/// Where one post ended up.
#[derive(Debug, Clone, PartialEq)]
pub enum EntryOutcome {
    /// The post page itself could not be downloaded.
    PageUnreachable,
    /// The page had no image locators past the chrome.
    NoContent,
    /// Every image download failed.
    NoUsablePages,
    /// `path` is the deduplicated archive, or the staging archive when
    /// deduplication left it alone.
    Archived { path: PathBuf, staging: PathBuf },
}

/// Four-stage pipeline: page markup → locators → page set → archive →
/// filtered archive.
pub async fn process_page<T: Transport>(
    transport: &Arc<T>,
    url: &str,
    title: &str,
    options: &PipelineOptions,
) -> Result<EntryOutcome> {
    let html = match transport.get_text(url, options.fetch.timeout).await {
        Ok(html) => html,
        Err(e) => {
            warn!("Page download failed for {}: {}", url, e);
            return Ok(EntryOutcome::PageUnreachable);
        }
    };

    let locators = extract::extract_locators(&html, options.skip_images);
    if locators.is_empty() {
        info!("No images found in post: {}", title);
        return Ok(EntryOutcome::NoContent);
    }
    info!("Found {} candidate pages in {}", locators.len(), title);

    let Some(pages) = fetch::fetch_pages(Arc::clone(transport), &locators, &options.fetch).await else {
        warn!("No usable pages for {}", title);
        return Ok(EntryOutcome::NoUsablePages);
    };

    let Some(staging) = archive::build_archive(&pages, &options.staging_dir, title)? else {
        return Ok(EntryOutcome::NoUsablePages);
    };

    let path = dedup::deduplicate(&staging, &options.final_dir, &options.dedup);
    Ok(EntryOutcome::Archived { path, staging })
}
