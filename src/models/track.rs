//! Track model.

use serde::{Deserialize, Serialize};

/// A catalog track as seen by the rest of the crate.
///
/// Built either from a catalog response or from a cached row. The local-only
/// fields (`last_played`, `is_favorite`) are owned by the store and survive
/// catalog refreshes.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Track {
    /// Stable catalog identifier.
    pub id: String,

    /// Track title.
    pub title: String,

    /// Performing artist.
    pub artist: String,

    /// Duration in milliseconds.
    pub duration_ms: u64,

    /// Streamable audio URI.
    pub audio_url: String,

    /// Artwork URI.
    #[serde(default)]
    pub image_url: String,

    /// Epoch milliseconds of the last play, if ever played.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_played: Option<i64>,

    /// Whether the user marked this track as favorite.
    #[serde(default)]
    pub is_favorite: bool,
}

impl Track {
    /// Create a track with catalog metadata only.
    pub fn new<S1, S2, S3>(id: S1, title: S2, artist: S3, duration_ms: u64) -> Self
    where
        S1: Into<String>,
        S2: Into<String>,
        S3: Into<String>,
    {
        Self {
            id: id.into(),
            title: title.into(),
            artist: artist.into(),
            duration_ms,
            ..Default::default()
        }
    }

    /// Get duration formatted as MM:SS.
    pub fn duration_formatted(&self) -> String {
        format_millis(self.duration_ms)
    }

    /// Copy of this track stamped as played at `timestamp_ms`.
    pub fn played_at(&self, timestamp_ms: i64) -> Self {
        Self {
            last_played: Some(timestamp_ms),
            ..self.clone()
        }
    }
}

/// Format milliseconds as MM:SS. Minutes are not wrapped into hours.
pub fn format_millis(ms: u64) -> String {
    let total_seconds = ms / 1000;
    format!("{:02}:{:02}", total_seconds / 60, total_seconds % 60)
}
