//! Format policy: maps a user format selection to external-process parameters.
//!
//! Selections arrive as display labels ("MP4 - 1080p", "MP3 - best", "MP4") and
//! are parsed once into [`FormatSelection`]. [`resolve`] is pure and total:
//! unknown labels fall back to an MP4 video profile capped at 1080p.

use std::fmt;
use std::str::FromStr;

use crate::job::JobKind;

/// Labels offered to users, highest quality first.
pub const FORMAT_LABELS: &[&str] = &["MP4 - 2160p", "MP4 - 1080p", "MP4 - 720p", "MP3 - best"];

/// Short labels used when no per-target resolution is chosen.
pub const SHORT_FORMAT_LABELS: &[&str] = &["MP4", "MP3"];

/// Maximum video height requested from the external fetcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Resolution {
    P720,
    #[default]
    P1080,
    P2160,
}

impl Resolution {
    pub fn height(self) -> u32 {
        match self {
            Resolution::P720 => 720,
            Resolution::P1080 => 1080,
            Resolution::P2160 => 2160,
        }
    }

    /// Finds a known height in a label; highest match wins, default when absent.
    fn from_label(label: &str) -> Self {
        if label.contains("2160") {
            Resolution::P2160
        } else if label.contains("1080") {
            Resolution::P1080
        } else if label.contains("720") {
            Resolution::P720
        } else {
            Resolution::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Container {
    #[default]
    Mp4,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AudioCodec {
    #[default]
    Mp3,
}

/// Structured format selection (container × resolution cap, or audio only).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FormatSelection {
    Video {
        container: Container,
        max_height: Resolution,
    },
    AudioOnly {
        codec: AudioCodec,
    },
}

impl Default for FormatSelection {
    fn default() -> Self {
        FormatSelection::Video {
            container: Container::Mp4,
            max_height: Resolution::P1080,
        }
    }
}

impl FormatSelection {
    /// Parses a display label. Never fails; see module docs for the fallback.
    pub fn parse(label: &str) -> Self {
        let upper = label.trim().to_ascii_uppercase();
        if upper.contains("MP3") {
            return FormatSelection::AudioOnly {
                codec: AudioCodec::Mp3,
            };
        }
        FormatSelection::Video {
            container: Container::Mp4,
            max_height: Resolution::from_label(&upper),
        }
    }

    pub fn is_audio_only(&self) -> bool {
        matches!(self, FormatSelection::AudioOnly { .. })
    }
}

impl FromStr for FormatSelection {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(FormatSelection::parse(s))
    }
}

impl fmt::Display for FormatSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FormatSelection::Video {
                container: Container::Mp4,
                max_height,
            } => write!(f, "MP4 - {}p", max_height.height()),
            FormatSelection::AudioOnly {
                codec: AudioCodec::Mp3,
            } => write!(f, "MP3 - best"),
        }
    }
}

/// Parameters for one external invocation, split by axis.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExecParams {
    /// Container/codec constraints (format selector, extraction, merge).
    pub media: Vec<String>,
    /// Auxiliary artifacts (subtitles). Empty for audio-only and metadata.
    pub auxiliary: Vec<String>,
}

impl ExecParams {
    pub fn requests_subtitles(&self) -> bool {
        self.auxiliary.iter().any(|a| a.contains("subs"))
    }

    /// Flattened argument list: auxiliary first, then media constraints.
    pub fn to_args(&self) -> Vec<String> {
        self.auxiliary
            .iter()
            .chain(self.media.iter())
            .cloned()
            .collect()
    }
}

fn args(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn video_selector(height: u32) -> String {
    format!(
        "bestvideo[ext=mp4][height<={h}]+bestaudio[ext=m4a]/best[ext=mp4][height<={h}]/best[height<={h}]/best",
        h = height
    )
}

/// Resolve a selection for a job kind into execution parameters.
pub fn resolve(selection: FormatSelection, kind: JobKind) -> ExecParams {
    match (kind, selection) {
        (JobKind::Metadata, _) => ExecParams {
            media: args(&["--dump-single-json", "--skip-download"]),
            auxiliary: Vec::new(),
        },
        (JobKind::Download, FormatSelection::AudioOnly { codec: AudioCodec::Mp3 }) => {
            ExecParams {
                media: args(&[
                    "-f",
                    "bestaudio/best",
                    "--extract-audio",
                    "--audio-format",
                    "mp3",
                    "--audio-quality",
                    "0",
                ]),
                auxiliary: Vec::new(),
            }
        }
        (
            JobKind::Download,
            FormatSelection::Video {
                container: Container::Mp4,
                max_height,
            },
        ) => ExecParams {
            media: vec![
                "-f".to_string(),
                video_selector(max_height.height()),
                "--merge-output-format".to_string(),
                "mp4".to_string(),
            ],
            auxiliary: args(&[
                "--write-auto-subs",
                "--write-subs",
                "--sub-langs",
                "en",
                "--sub-format",
                "srt",
                "--embed-subs",
            ]),
        },
    }
}

/// Convenience: parse a label and resolve it in one call.
pub fn resolve_label(label: &str, kind: JobKind) -> ExecParams {
    resolve(FormatSelection::parse(label), kind)
}
