use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, Result};
use rusqlite::{Connection, OptionalExtension};
use tracing::warn;

pub fn connect(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let conn = Connection::open(path)?;
    conn.execute_batch("PRAGMA journal_mode=WAL;")?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS seen_posts (
            id         TEXT PRIMARY KEY,
            title      TEXT NOT NULL,
            archive    TEXT,
            seen_at    TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS monitor_state (
            key        TEXT PRIMARY KEY,
            value      TEXT NOT NULL
        );
        ",
    )?;
    Ok(())
}

pub fn load_seen(conn: &Connection) -> Result<HashSet<String>> {
    let mut stmt = conn.prepare("SELECT id FROM seen_posts")?;
    let ids = stmt
        .query_map([], |row| row.get(0))?
        .collect::<Result<HashSet<String>, _>>()?;
    Ok(ids)
}

/// Record a processed post. A failed write is logged and otherwise ignored;
/// the post will simply be picked up again next run.
pub fn mark_seen(conn: &Connection, id: &str, title: &str, archive: Option<&Path>) {
    let archive = archive.map(|p| p.display().to_string());
    if let Err(e) = conn.execute(
        "INSERT OR REPLACE INTO seen_posts (id, title, archive) VALUES (?1, ?2, ?3)",
        rusqlite::params![id, title, archive],
    ) {
        warn!("Failed to save seen post {}: {}", id, e);
    }
}

/// Store the time of the latest feed check. Failures are logged only.
pub fn touch_last_check(conn: &Connection) {
    let now = chrono::Local::now().to_rfc3339();
    if let Err(e) = conn.execute(
        "INSERT OR REPLACE INTO monitor_state (key, value) VALUES ('last_check', ?1)",
        rusqlite::params![now],
    ) {
        warn!("Failed to save last check time: {}", e);
    }
}

pub struct Stats {
    pub seen: usize,
    pub last_check: Option<String>,
    pub latest: Option<(String, String)>,
}

pub fn get_stats(conn: &Connection) -> Result<Stats> {
    let seen: i64 = conn.query_row("SELECT COUNT(*) FROM seen_posts", [], |r| r.get(0))?;
    let last_check = conn
        .query_row(
            "SELECT value FROM monitor_state WHERE key = 'last_check'",
            [],
            |r| r.get(0),
        )
        .optional()?;
    let latest = conn
        .query_row(
            "SELECT title, seen_at FROM seen_posts ORDER BY seen_at DESC, rowid DESC LIMIT 1",
            [],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()?;
    Ok(Stats {
        seen: seen as usize,
        last_check,
        latest,
    })
}
