//! Metadata returned by the external probe (`--dump-single-json`).

use serde_json::Value;

use crate::error::JobError;

/// Parsed probe output for one target.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaInfo {
    raw: Value,
}

/// How a target's output is laid out on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputLayout {
    SingleItem,
    Collection,
}

impl MediaInfo {
    /// Parses probe stdout. The probe prints one JSON document; anything
    /// that is not a JSON object is malformed.
    pub fn parse(stdout: &str) -> Result<Self, JobError> {
        let raw: Value = serde_json::from_str(stdout.trim())
            .map_err(|e| JobError::MalformedMetadata(e.to_string()))?;
        if !raw.is_object() {
            return Err(JobError::MalformedMetadata(
                "expected a JSON object".to_string(),
            ));
        }
        Ok(Self { raw })
    }

    pub fn raw(&self) -> &Value {
        &self.raw
    }

    pub fn is_playlist(&self) -> bool {
        self.raw.get("_type").and_then(Value::as_str) == Some("playlist")
    }

    pub fn layout(&self) -> OutputLayout {
        if self.is_playlist() {
            OutputLayout::Collection
        } else {
            OutputLayout::SingleItem
        }
    }

    pub fn title(&self) -> Option<&str> {
        self.raw.get("title").and_then(Value::as_str)
    }

    pub fn duration_secs(&self) -> Option<f64> {
        self.raw.get("duration").and_then(Value::as_f64)
    }

    /// Exact or approximate size in bytes, when the probe reports one.
    pub fn filesize(&self) -> Option<u64> {
        ["filesize", "filesize_approx"]
            .iter()
            .filter_map(|k| self.raw.get(*k))
            .find_map(|v| v.as_u64().or_else(|| v.as_f64().map(|f| f as u64)))
            .filter(|size| *size > 0)
    }

    fn entries(&self) -> &[Value] {
        self.raw
            .get("entries")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn entry_count(&self) -> usize {
        self.entries().len()
    }

    /// One-line summary for display.
    pub fn summary(&self) -> String {
        if self.is_playlist() {
            let total: f64 = self
                .entries()
                .iter()
                .filter_map(|e| e.get("duration").and_then(Value::as_f64))
                .sum();
            return format!(
                "playlist: {} ({} videos, {})",
                self.title().unwrap_or("Playlist"),
                self.entry_count(),
                format_duration(Some(total))
            );
        }
        let size = self
            .filesize()
            .map(|b| format!("{:.1} MB", b as f64 / 1024.0 / 1024.0))
            .unwrap_or_else(|| "~".to_string());
        format!(
            "{} ({}, {})",
            self.title().unwrap_or("Unknown"),
            size,
            format_duration(self.duration_secs().or(Some(0.0)))
        )
    }
}

/// `h:mm:ss` when an hour or longer, else `m:ss`; `--:--` when unknown.
pub fn format_duration(seconds: Option<f64>) -> String {
    let Some(seconds) = seconds.filter(|s| s.is_finite() && *s >= 0.0) else {
        return "--:--".to_string();
    };
    let total = seconds as u64;
    let (h, m, s) = (total / 3600, (total % 3600) / 60, total % 60);
    if h > 0 {
        format!("{}:{:02}:{:02}", h, m, s)
    } else {
        format!("{}:{:02}", m, s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_item_summary() {
        let info = MediaInfo::parse(
            r#"{"title":"Clip","duration":125,"filesize_approx":10485760}"#,
        )
        .unwrap();
        assert_eq!(info.layout(), OutputLayout::SingleItem);
        assert_eq!(info.summary(), "Clip (10.0 MB, 2:05)");
    }

    #[test]
    fn playlist_summary_sums_entry_durations() {
        let info = MediaInfo::parse(
            r#"{"_type":"playlist","title":"Mix","entries":[{"duration":3600},{"duration":61},"junk"]}"#,
        )
        .unwrap();
        assert!(info.is_playlist());
        assert_eq!(info.layout(), OutputLayout::Collection);
        assert_eq!(info.entry_count(), 3);
        assert_eq!(info.summary(), "playlist: Mix (3 videos, 1:01:01)");
    }

    #[test]
    fn missing_fields_fall_back() {
        let info = MediaInfo::parse("{}").unwrap();
        assert_eq!(info.summary(), "Unknown (~, 0:00)");
    }

    #[test]
    fn malformed_payloads_are_rejected() {
        assert!(matches!(
            MediaInfo::parse("not json"),
            Err(JobError::MalformedMetadata(_))
        ));
        assert!(matches!(
            MediaInfo::parse("[1,2]"),
            Err(JobError::MalformedMetadata(_))
        ));
        assert!(matches!(
            MediaInfo::parse(""),
            Err(JobError::MalformedMetadata(_))
        ));
    }

    #[test]
    fn duration_formatting() {
        assert_eq!(format_duration(Some(59.9)), "0:59");
        assert_eq!(format_duration(Some(3600.0)), "1:00:00");
        assert_eq!(format_duration(None), "--:--");
        assert_eq!(format_duration(Some(f64::NAN)), "--:--");
    }
}
