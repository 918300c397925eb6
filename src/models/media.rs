//! Content-type classification and the per-track media info returned by the
//! transcoding service.

use serde::{Deserialize, Serialize};

/// Coarse media class of a payload, derived from its MIME type.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MediaKind {
    Audio,
    Video,
    Image,
    Other,
}

impl MediaKind {
    /// Classify a MIME type by its top-level type. Matching is case-insensitive.
    pub fn classify(content_type: &str) -> Self {
        let top_level = content_type
            .split_once('/')
            .map(|(top, _)| top.trim())
            .unwrap_or("");
        if top_level.eq_ignore_ascii_case("audio") {
            MediaKind::Audio
        } else if top_level.eq_ignore_ascii_case("video") {
            MediaKind::Video
        } else if top_level.eq_ignore_ascii_case("image") {
            MediaKind::Image
        } else {
            MediaKind::Other
        }
    }

    /// Audio and video go through the transcoding service; everything else
    /// is written to the object store as-is.
    pub fn needs_transcoding(self) -> bool {
        matches!(self, MediaKind::Audio | MediaKind::Video)
    }

    /// The system tag a record of this kind is indexed under, if any.
    pub fn tag(self) -> Option<&'static str> {
        match self {
            MediaKind::Audio => Some("audio"),
            MediaKind::Video => Some("video"),
            MediaKind::Image => Some("image"),
            MediaKind::Other => None,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct AudioInfo {
    pub sample_rate: u32,
    pub channels: u32,
    pub bits_per_sample: u8,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct VideoInfo {
    pub width: u32,
    pub height: u32,
}

/// One elementary stream found in a transcoded file.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct Track {
    pub codec: String,
    pub mime_type: String,
    pub number: u32,
    pub timescale: u32,
    pub duration: u64,
    pub bandwidth: u32,
    pub media_timescale: u32,
    pub media_duration: u64,
    pub audio: AudioInfo,
    pub video: VideoInfo,
}

impl Track {
    pub fn kind(&self) -> MediaKind {
        MediaKind::classify(&self.mime_type)
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct MediaInfo {
    pub tracks: Vec<Track>,
}
