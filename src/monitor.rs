use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use rusqlite::Connection;
use tracing::{info, warn};

use crate::config::Settings;
use crate::db;
use crate::feed::{self, FeedEntry};
use crate::pages::{self, EntryOutcome};
use crate::transport::Transport;
use crate::upload::{self, DropboxUploader};

/// Summary of one feed check.
#[derive(Debug, Default, PartialEq)]
pub struct RunStats {
    pub candidates: usize,
    pub archived: usize,
    pub failed: usize,
}

pub struct Monitor<T> {
    transport: Arc<T>,
    settings: Settings,
    conn: Connection,
    uploader: Option<DropboxUploader>,
}

impl<T: Transport> Monitor<T> {
    pub fn new(transport: Arc<T>, settings: Settings, conn: Connection, uploader: Option<DropboxUploader>) -> Self {
        Self {
            transport,
            settings,
            conn,
            uploader,
        }
    }

    /// One pass over the feed: every dated post not seen before is turned into
    /// an archive, oldest first. An unreachable feed ends the run with nothing
    /// new.
    pub async fn check_new_posts(&self) -> Result<RunStats> {
        info!("{}", "=".repeat(50));
        info!("Checking {}", self.settings.feed_url);

        let mut seen = db::load_seen(&self.conn)?;
        let entries = match feed::fetch_feed(self.transport.as_ref(), &self.settings.feed_url, self.settings.timeout()).await {
            Ok(entries) if !entries.is_empty() => entries,
            Ok(_) => {
                info!("Feed is empty");
                return Ok(RunStats::default());
            }
            Err(e) => {
                warn!("Feed unreachable: {:#}", e);
                return Ok(RunStats::default());
            }
        };
        db::touch_last_check(&self.conn);

        let pending = pending_entries(entries, &seen);
        let mut stats = RunStats {
            candidates: pending.len(),
            ..Default::default()
        };

        for entry in pending {
            info!("New post: {}", entry.title);
            if self.process_entry(&entry).await.is_some() {
                seen.insert(entry.id.clone());
                stats.archived += 1;
                tokio::time::sleep(self.settings.cooldown()).await;
            } else {
                stats.failed += 1;
            }
        }

        info!("Session done. New archives: {}", stats.archived);
        Ok(stats)
    }

    /// Build, upload and record one post. Returns the final archive; the post
    /// is marked seen as soon as it exists, whatever the upload does.
    pub async fn process_entry(&self, entry: &FeedEntry) -> Option<PathBuf> {
        let outcome = match pages::process_page(&self.transport, &entry.link, &entry.title, &self.settings.pipeline()).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!("Failed to archive {}: {:#}", entry.title, e);
                return None;
            }
        };

        let EntryOutcome::Archived { path, staging } = outcome else {
            return None;
        };

        db::mark_seen(&self.conn, &entry.id, &entry.title, Some(&path));
        upload::upload_logged(self.uploader.as_ref(), &path, &self.settings.upload_root).await;

        if staging != path && staging.exists() {
            if let Err(e) = std::fs::remove_file(&staging) {
                warn!("Failed to remove {}: {}", staging.display(), e);
            }
        }
        Some(path)
    }
}

/// Dated, unseen entries in processing order (oldest first; feeds list newest
/// first).
pub fn pending_entries(entries: Vec<FeedEntry>, seen: &HashSet<String>) -> Vec<FeedEntry> {
    entries
        .into_iter()
        .rev()
        .filter(|e| feed::has_date(&e.title))
        .filter(|e| !seen.contains(&e.id))
        .collect()
}
