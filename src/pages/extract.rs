use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;

/// Leading unique images on a post page that belong to the blog chrome
/// (header, avatar, badges) rather than to the comic.
pub const SKIP_IMAGES: usize = 5;

static IMAGE_URL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)https?://[^\s"]+(?:jpg|jpeg|png|gif|webp)"#).unwrap());

/// Drop the query string; two locators with the same canonical form are the
/// same image.
pub fn canonical(url: &str) -> &str {
    url.split('?').next().unwrap_or(url)
}

/// Image locators in first-occurrence order, deduplicated by canonical form,
/// with the first `skip` removed. Fewer than `skip` matches gives an empty list.
pub fn extract_locators(markup: &str, skip: usize) -> Vec<String> {
    let mut seen = HashSet::new();
    IMAGE_URL_RE
        .find_iter(markup)
        .map(|m| canonical(m.as_str()))
        .filter(|url| seen.insert(*url))
        .skip(skip)
        .map(str::to_string)
        .collect()
}
