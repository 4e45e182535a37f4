//! Domain models.
//!
//! Tracks and playlist summaries as used by the repository, the playback
//! controller and the presentation layer.

pub mod playlist;
pub mod track;

pub use playlist::Playlist;
pub use track::{format_millis, Track};
