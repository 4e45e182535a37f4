//! In-process catalog used by unit tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use super::CatalogSource;
use crate::error::{JamplayError, Result};
use crate::models::{Playlist, Track};

/// Serves a fixed listing and can be switched into a failing mode.
#[derive(Debug, Default)]
pub(crate) struct FakeCatalog {
    tracks: Mutex<Vec<Track>>,
    playlists: Mutex<Vec<Playlist>>,
    failing: AtomicBool,
    track_calls: AtomicUsize,
}

impl FakeCatalog {
    pub(crate) fn with_tracks(tracks: Vec<Track>) -> Self {
        Self {
            tracks: Mutex::new(tracks),
            ..Default::default()
        }
    }

    pub(crate) fn set_tracks(&self, tracks: Vec<Track>) {
        *self.tracks.lock().unwrap() = tracks;
    }

    pub(crate) fn set_playlists(&self, playlists: Vec<Playlist>) {
        *self.playlists.lock().unwrap() = playlists;
    }

    pub(crate) fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of `fetch_tracks` calls so far.
    pub(crate) fn track_calls(&self) -> usize {
        self.track_calls.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(JamplayError::CatalogStatus {
                code: 500,
                message: "catalog unavailable".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl CatalogSource for FakeCatalog {
    async fn fetch_tracks(&self, limit: u32, offset: u32) -> Result<Vec<Track>> {
        self.track_calls.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        Ok(self
            .tracks
            .lock()
            .unwrap()
            .iter()
            .skip(offset as usize)
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn fetch_featured_playlists(&self, limit: u32) -> Result<Vec<Playlist>> {
        self.check()?;
        Ok(self
            .playlists
            .lock()
            .unwrap()
            .iter()
            .take(limit as usize)
            .cloned()
            .collect())
    }
}

/// A catalog track with a predictable audio URL.
pub(crate) fn track(id: &str) -> Track {
    Track {
        audio_url: format!("https://audio.example/{}.mp3", id),
        image_url: format!("https://img.example/{}.jpg", id),
        ..Track::new(id, format!("Title {}", id), "Artist", 200_000)
    }
}

/// Tracks with ids `"01"..="n"`, zero padded so id order matches list order.
pub(crate) fn tracks(n: usize) -> Vec<Track> {
    (1..=n).map(|i| track(&format!("{:02}", i))).collect()
}
