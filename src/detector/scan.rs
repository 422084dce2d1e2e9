use std::collections::BTreeSet;

use once_cell::sync::Lazy;
use regex::Regex;
use url::Url;

static MENTION_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<@[!&]?\d+>").unwrap());
static BROADCAST_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"@(?:everyone|here)\b").unwrap());
static LINK_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r#"(?i)https?://[^\s<>()\[\]"',]+"#).unwrap());
static INVITE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:discord\.gg|discord(?:app)?\.com/invite)/([A-Za-z0-9-]+)").unwrap()
});

/// User, nickname and role mentions plus `@everyone` / `@here`.
pub fn count_mentions(content: &str) -> u32 {
    (MENTION_RE.find_iter(content).count() + BROADCAST_RE.find_iter(content).count()) as u32
}

/// Share of uppercase letters, in percent. `None` when the message has fewer
/// than `min_length` letters or no uppercase at all.
pub fn capitals_percent(content: &str, min_length: usize) -> Option<u32> {
    let (letters, upper) = content
        .chars()
        .filter(|c| c.is_alphabetic())
        .fold((0usize, 0usize), |(l, u), c| (l + 1, u + c.is_uppercase() as usize));
    if letters == 0 || letters < min_length || upper == 0 {
        return None;
    }
    Some((upper * 100 / letters) as u32)
}

/// Line count of the message.
pub fn count_lines(content: &str) -> u32 {
    content.lines().count() as u32
}

/// http(s) links whose host is not allowed. An allowed host also covers its
/// subdomains.
pub fn count_links(content: &str, allowed: &BTreeSet<String>) -> u32 {
    LINK_RE
        .find_iter(content)
        .filter_map(|m| Url::parse(m.as_str()).ok())
        .filter_map(|u| u.host_str().map(str::to_ascii_lowercase))
        .filter(|host| !host_allowed(host, allowed))
        .count() as u32
}

/// Invite links whose code is not in `ignored_codes`.
pub fn count_invites(content: &str, ignored_codes: &BTreeSet<String>) -> u32 {
    INVITE_RE
        .captures_iter(content)
        .filter_map(|c| c.get(1))
        .filter(|code| !ignored_codes.contains(code.as_str()))
        .count() as u32
}

fn host_allowed(host: &str, allowed: &BTreeSet<String>) -> bool {
    let host = host.strip_prefix("www.").unwrap_or(host);
    allowed.iter().any(|a| {
        let a = a.to_ascii_lowercase();
        host == a || host.ends_with(&format!(".{}", a))
    })
}
