use std::sync::LazyLock;
use std::time::Duration;

use anyhow::{Context, Result};
use quick_xml::events::{BytesStart, Event};
use regex::Regex;
use tracing::info;

use crate::transport::Transport;

/// Comic posts carry their publication date in the title, e.g. `21/12/2025`.
static TITLE_DATE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d{2}/\d{2}/\d{4}").unwrap());

#[derive(Debug, Clone, PartialEq)]
pub struct FeedEntry {
    pub id: String,
    pub title: String,
    pub link: String,
}

pub fn has_date(title: &str) -> bool {
    TITLE_DATE_RE.is_match(title)
}

/// Download and parse the feed. Entries come back in feed order (newest first
/// for Blogger).
pub async fn fetch_feed<T: Transport>(transport: &T, url: &str, timeout: Duration) -> Result<Vec<FeedEntry>> {
    info!("Fetching feed: {}", url);
    let xml = transport
        .get_text(url, timeout)
        .await
        .context("Failed to fetch feed")?;
    let entries = parse_feed(&xml)?;
    info!("Entries in feed: {}", entries.len());
    Ok(entries)
}

#[derive(Clone, Copy)]
enum Field {
    Id,
    Title,
    Link,
}

#[derive(Default)]
struct Partial {
    id: String,
    title: String,
    link: String,
}

impl Partial {
    fn finish(self) -> Option<FeedEntry> {
        let title = self.title.trim().to_string();
        let link = self.link.trim().to_string();
        if link.is_empty() {
            return None;
        }
        let id = match self.id.trim() {
            "" => link.clone(),
            id => id.to_string(),
        };
        Some(FeedEntry { id, title, link })
    }

    fn push(&mut self, field: Field, text: &str) {
        match field {
            Field::Id => self.id.push_str(text),
            Field::Title => self.title.push_str(text),
            Field::Link => self.link.push_str(text),
        }
    }
}

/// Parse RSS 2.0 `<item>`s (guid/title/link) and Atom `<entry>`s
/// (id/title/link@href). Entries without a link are skipped.
pub fn parse_feed(xml: &str) -> Result<Vec<FeedEntry>> {
    let mut reader = quick_xml::Reader::from_str(xml);
    let mut entries = Vec::new();
    let mut current: Option<Partial> = None;
    let mut field: Option<Field> = None;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.name().as_ref() {
                b"item" | b"entry" => current = Some(Partial::default()),
                b"guid" | b"id" if current.is_some() => field = Some(Field::Id),
                b"title" if current.is_some() => field = Some(Field::Title),
                b"link" => {
                    if let Some(entry) = current.as_mut() {
                        match link_href(&e)? {
                            Href::Missing => field = Some(Field::Link),
                            Href::Alternate(href) if entry.link.is_empty() => entry.link = href,
                            _ => {}
                        }
                    }
                }
                _ => {}
            },
            Ok(Event::Empty(e)) if e.name().as_ref() == b"link" => {
                if let (Some(entry), Href::Alternate(href)) = (current.as_mut(), link_href(&e)?) {
                    if entry.link.is_empty() {
                        entry.link = href;
                    }
                }
            }
            Ok(Event::Text(e)) => {
                if let (Some(entry), Some(f)) = (current.as_mut(), field) {
                    entry.push(f, &e.unescape()?);
                }
            }
            Ok(Event::CData(e)) => {
                if let (Some(entry), Some(f)) = (current.as_mut(), field) {
                    entry.push(f, &String::from_utf8_lossy(&e.into_inner()));
                }
            }
            Ok(Event::End(e)) => match e.name().as_ref() {
                b"item" | b"entry" => {
                    field = None;
                    if let Some(entry) = current.take().and_then(Partial::finish) {
                        entries.push(entry);
                    }
                }
                b"guid" | b"id" | b"title" | b"link" => field = None,
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(e.into()),
            _ => {}
        }
        buf.clear();
    }
    Ok(entries)
}

enum Href {
    /// RSS style `<link>url</link>`.
    Missing,
    /// Atom link to the post itself.
    Alternate(String),
    /// `rel="replies"`, `rel="self"` and friends.
    Other,
}

fn link_href(e: &BytesStart) -> Result<Href> {
    let Some(href) = e.try_get_attribute("href")? else {
        return Ok(Href::Missing);
    };
    let is_alternate = match e.try_get_attribute("rel")? {
        Some(rel) => rel.unescape_value()? == "alternate",
        None => true,
    };
    if !is_alternate {
        return Ok(Href::Other);
    }
    Ok(Href::Alternate(href.unescape_value()?.into_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::memory::MemoryTransport;

    fn fixture(name: &str) -> String {
        std::fs::read_to_string(format!("tests/fixtures/{}", name)).unwrap()
    }

    #[test]
    fn rss_items() {
        let entries = parse_feed(&fixture("feed.rss")).unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(
            entries[0],
            FeedEntry {
                id: "tag:blogger.com,1999:blog-1.post-300".into(),
                title: "Tippy la hostess 21/12/2025".into(),
                link: "https://tippylahostess.blogspot.com/2025/12/tippy-21-12.html".into(),
            }
        );
        assert_eq!(entries[1].title, "Auguri & buone feste!");
        // No guid: the link doubles as the id.
        assert_eq!(entries[2].id, entries[2].link);
    }

    #[test]
    fn atom_entries_use_alternate_link() {
        let entries = parse_feed(&fixture("feed.atom")).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].id, "tag:blogger.com,1999:blog-1.post-301");
        assert_eq!(entries[0].link, "https://tippylahostess.blogspot.com/2025/12/tippy-28-12.html");
        assert_eq!(entries[1].title, "Tippy <3 14/12/2025");
    }

    #[test]
    fn date_in_title() {
        assert!(has_date("Tippy la hostess 21/12/2025"));
        assert!(!has_date("Tippy la hostess 21-12-2025"));
        assert!(!has_date("Auguri!"));
    }

    #[test]
    fn garbage_is_an_error() {
        assert!(parse_feed("<rss><channel><item><title>x</item></rss>").is_err());
    }

    #[tokio::test]
    async fn unreachable_feed_is_an_error() {
        let transport = MemoryTransport::new();
        let result = fetch_feed(&transport, "https://feed.test/rss", Duration::from_secs(1)).await;
        assert!(result.is_err());
    }
}
