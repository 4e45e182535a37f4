//! Playlist summary model.

use serde::{Deserialize, Serialize};

/// A featured playlist as listed by the catalog.
///
/// Read-only and never persisted.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Playlist {
    /// Catalog identifier.
    pub id: String,

    /// Playlist name.
    pub title: String,

    /// Cover image URI, when the catalog provides one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cover_url: Option<String>,

    /// Number of tracks in the playlist.
    #[serde(default)]
    pub track_count: u32,
}
