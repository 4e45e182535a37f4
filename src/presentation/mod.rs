//! UI-ready state holders.
//!
//! Each holder publishes its state through a `watch` channel and keeps a
//! background task that follows the playback session. Dropping a holder
//! aborts that task.

pub mod home;
pub mod player;

use serde::Serialize;

use crate::models::{Playlist, Track};
use crate::player::PlaybackSession;

pub use home::{HomeUiState, HomeViewModel};
pub use player::{PlayerUiState, PlayerViewModel};

/// A track row.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TrackItem {
    pub id: String,
    pub title: String,
    pub artist: String,
    /// Duration as MM:SS.
    pub duration: String,
    /// Derived from the playback session, never persisted.
    pub is_playing: bool,
    pub is_favorite: bool,
    pub image_url: String,
}

impl TrackItem {
    pub fn from_track(track: &Track, session: &PlaybackSession) -> Self {
        Self {
            id: track.id.clone(),
            title: track.title.clone(),
            artist: track.artist.clone(),
            duration: track.duration_formatted(),
            is_playing: is_now_playing(&track.id, session),
            is_favorite: track.is_favorite,
            image_url: track.image_url.clone(),
        }
    }
}

/// A featured playlist card.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PlaylistItem {
    pub id: String,
    pub title: String,
    pub cover_url: Option<String>,
    pub track_count: u32,
}

impl From<&Playlist> for PlaylistItem {
    fn from(playlist: &Playlist) -> Self {
        Self {
            id: playlist.id.clone(),
            title: playlist.title.clone(),
            cover_url: playlist.cover_url.clone(),
            track_count: playlist.track_count,
        }
    }
}

/// Whether `track_id` is the session's current track and audibly playing.
pub fn is_now_playing(track_id: &str, session: &PlaybackSession) -> bool {
    session.is_playing
        && session
            .current_track
            .as_ref()
            .is_some_and(|current| current.id == track_id)
}

/// Recompute the now-playing flag of every row. Returns whether any changed.
pub fn project_now_playing(items: &mut [TrackItem], session: &PlaybackSession) -> bool {
    let mut changed = false;
    for item in items {
        let playing = is_now_playing(&item.id, session);
        if item.is_playing != playing {
            item.is_playing = playing;
            changed = true;
        }
    }
    changed
}
