//! Target helpers: share-noise stripping and platform lookup.

use url::Url;

/// Query parameters added by share buttons; they do not change the target.
const NOISE_PARAMS: &[&str] = &["si", "feature"];

/// Platform display names and the host suffixes that identify them.
const PLATFORMS: &[(&str, &[&str])] = &[
    ("YouTube", &["youtube.com", "youtu.be"]),
    ("Vimeo", &["vimeo.com"]),
    ("TikTok", &["tiktok.com"]),
    ("Instagram", &["instagram.com"]),
    ("Twitter/X", &["twitter.com", "x.com"]),
    ("Reddit", &["reddit.com"]),
    ("Facebook", &["facebook.com", "fb.watch"]),
    ("Dailymotion", &["dailymotion.com"]),
    ("Twitch", &["twitch.tv"]),
    ("SoundCloud", &["soundcloud.com"]),
];

/// Trims the target and removes share-tracking query parameters.
/// Inputs that do not parse as URLs are returned trimmed but otherwise untouched.
pub fn sanitize_target(raw: &str) -> String {
    let trimmed = raw.trim();
    let Ok(mut url) = Url::parse(trimmed) else {
        return trimmed.to_string();
    };
    if url.query().is_none() {
        return url.to_string();
    }
    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| !NOISE_PARAMS.contains(&k.to_ascii_lowercase().as_str()))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if kept.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(kept);
    }
    url.to_string()
}

/// Splits pasted text into sanitized targets, one per non-blank line.
pub fn parse_targets(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(sanitize_target)
        .collect()
}

/// Platform name for a target's host, or "Other".
pub fn detect_platform(target: &str) -> &'static str {
    let Some(host) = Url::parse(target.trim())
        .ok()
        .and_then(|u| u.host_str().map(str::to_ascii_lowercase))
    else {
        return "Other";
    };
    let host = host.strip_prefix("www.").unwrap_or(&host);
    PLATFORMS
        .iter()
        .find(|(_, domains)| {
            domains
                .iter()
                .any(|d| host == *d || host.ends_with(&format!(".{}", d)))
        })
        .map(|(name, _)| *name)
        .unwrap_or("Other")
}
