use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::Semaphore;
use tracing::{debug, info};

use crate::error::FetchError;
use crate::transport::Transport;

pub const MAX_WORKERS: usize = 5;
pub const TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Clone)]
pub struct FetchOptions {
    pub workers: usize,
    pub timeout: Duration,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            workers: MAX_WORKERS,
            timeout: TIMEOUT,
        }
    }
}

/// One successfully downloaded page.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub position: usize,
    pub filename: String,
    pub bytes: Vec<u8>,
}

/// Pages keyed by their 1-based submission position. Positions whose fetch
/// failed are simply absent; iteration is always in ascending position.
pub type PageSet = BTreeMap<usize, FetchedPage>;

/// Archive entry name for a page position. Always `.jpg`, whatever the
/// payload really is.
pub fn page_filename(position: usize) -> String {
    format!("pag{:03}.jpg", position)
}

/// Download every locator with at most `options.workers` requests in flight.
///
/// Failures are logged and dropped. Returns `None` when nothing could be
/// downloaded at all.
pub async fn fetch_pages<T: Transport>(
    transport: Arc<T>,
    locators: &[String],
    options: &FetchOptions,
) -> Option<PageSet> {
    let total = locators.len();
    let workers = options.workers.max(1);
    let semaphore = Arc::new(Semaphore::new(workers));

    let pb = ProgressBar::new(total as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40} {pos}/{len} pages")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> "),
    );

    // Workers send (position, outcome); only this task builds the map.
    let (tx, mut rx) =
        tokio::sync::mpsc::channel::<(usize, Result<Vec<u8>, FetchError>)>(workers * 2);

    for (index, url) in locators.iter().enumerate() {
        let position = index + 1;
        let transport = Arc::clone(&transport);
        let sem = Arc::clone(&semaphore);
        let tx = tx.clone();
        let url = url.clone();
        let timeout = options.timeout;

        tokio::spawn(async move {
            let Ok(_permit) = sem.acquire().await else {
                return;
            };
            let outcome = match tokio::time::timeout(timeout, transport.get_bytes(&url, timeout)).await {
                Ok(result) => result,
                Err(_) => Err(FetchError::Timeout(timeout)),
            };
            if let Err(e) = &outcome {
                debug!("page {} failed ({}): {}", position, url, e);
            }
            let _ = tx.send((position, outcome)).await;
        });
    }

    // Drop our copy of tx so rx closes when all spawned tasks finish
    drop(tx);

    let mut pages = PageSet::new();
    let mut failed = 0usize;
    while let Some((position, outcome)) = rx.recv().await {
        match outcome {
            Ok(bytes) => {
                pages.insert(
                    position,
                    FetchedPage {
                        position,
                        filename: page_filename(position),
                        bytes,
                    },
                );
            }
            Err(_) => failed += 1,
        }
        pb.inc(1);
    }

    pb.finish_and_clear();
    info!("Fetched {} of {} pages ({} failed)", pages.len(), total, failed);

    if pages.is_empty() {
        None
    } else {
        Some(pages)
    }
}
