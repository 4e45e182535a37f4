//! Now-playing screen state.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::TrackItem;
use crate::error::Result;
use crate::models::{format_millis, Track};
use crate::player::{PlaybackController, PlaybackSession, PlaybackStatus};

/// Display-ready projection of the playback session.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlayerUiState {
    pub track: Option<TrackItem>,
    pub status: PlaybackStatus,
    pub is_playing: bool,
    /// Always within `[0, duration_ms]`.
    pub position_ms: u64,
    pub duration_ms: u64,
    pub buffered_ms: u64,
    /// Position over duration, 0.0 when the duration is unknown.
    pub progress: f32,
    pub position_text: String,
    pub duration_text: String,
    pub is_favorite: bool,
}

impl PlayerUiState {
    pub fn from_session(session: &PlaybackSession) -> Self {
        let duration_ms = session.duration_ms;
        let clamp = |ms: u64| if duration_ms > 0 { ms.min(duration_ms) } else { 0 };
        let position_ms = clamp(session.position_ms);
        let progress = if duration_ms > 0 {
            position_ms as f32 / duration_ms as f32
        } else {
            0.0
        };

        Self {
            track: session
                .current_track
                .as_ref()
                .map(|t| TrackItem::from_track(t, session)),
            status: session.status.clone(),
            is_playing: session.is_playing,
            position_ms,
            duration_ms,
            buffered_ms: clamp(session.buffered_ms),
            progress,
            position_text: format_millis(position_ms),
            duration_text: format_millis(duration_ms),
            is_favorite: session.current_track.as_ref().is_some_and(|t| t.is_favorite),
        }
    }
}

/// Drives [`PlayerUiState`] and forwards transport calls to the controller.
pub struct PlayerViewModel {
    controller: Arc<PlaybackController>,
    state: watch::Receiver<PlayerUiState>,
    observer: JoinHandle<()>,
}

impl std::fmt::Debug for PlayerViewModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlayerViewModel")
            .field("state", &*self.state.borrow())
            .finish_non_exhaustive()
    }
}

impl PlayerViewModel {
    /// Must be called inside a tokio runtime.
    pub fn new(controller: Arc<PlaybackController>) -> Self {
        let mut session = controller.subscribe();
        let initial = PlayerUiState::from_session(&session.borrow_and_update());
        let (tx, state) = watch::channel(initial);

        let observer = tokio::spawn(async move {
            while session.changed().await.is_ok() {
                let next = PlayerUiState::from_session(&session.borrow_and_update());
                tx.send_if_modified(|current| {
                    if *current == next {
                        return false;
                    }
                    *current = next;
                    true
                });
            }
        });

        Self {
            controller,
            state,
            observer,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<PlayerUiState> {
        self.state.clone()
    }

    pub fn state(&self) -> PlayerUiState {
        self.state.borrow().clone()
    }

    pub async fn play_track(&self, track: Track) -> Result<()> {
        self.controller.play(track).await
    }

    pub async fn play_queue(&self, tracks: Vec<Track>, start_index: usize) -> Result<()> {
        self.controller.play_playlist(tracks, start_index).await
    }

    pub fn toggle_playback(&self) {
        self.controller.toggle_playback();
    }

    pub fn pause(&self) {
        self.controller.pause();
    }

    pub fn resume(&self) {
        self.controller.resume();
    }

    pub fn stop(&self) {
        self.controller.stop();
    }

    pub fn seek_to(&self, position_ms: u64) {
        self.controller.seek_to(position_ms);
    }

    /// Seek to a fraction of the current duration.
    pub fn seek_to_fraction(&self, fraction: f32) {
        let duration = self.controller.session().duration_ms;
        let fraction = fraction.clamp(0.0, 1.0) as f64;
        self.controller
            .seek_to((duration as f64 * fraction).round() as u64);
    }

    pub async fn skip_next(&self) -> Result<()> {
        self.controller.skip_next().await
    }

    pub async fn skip_previous(&self) -> Result<()> {
        self.controller.skip_previous().await
    }

    pub async fn toggle_favorite(&self) -> Result<Option<bool>> {
        self.controller.toggle_favorite().await
    }
}

impl Drop for PlayerViewModel {
    fn drop(&mut self) {
        self.observer.abort();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::api::fake::{self, FakeCatalog};
    use crate::player::SilentEngine;
    use crate::repository::MusicRepository;
    use crate::store::TrackStore;

    fn view_model() -> PlayerViewModel {
        let store = Arc::new(TrackStore::open_in_memory().unwrap());
        let catalog = Arc::new(FakeCatalog::with_tracks(fake::tracks(3)));
        let repo = Arc::new(MusicRepository::new(store, catalog));
        let (engine, _rx) = SilentEngine::new();
        PlayerViewModel::new(Arc::new(PlaybackController::new(Box::new(engine), repo)))
    }

    #[test]
    fn test_from_session_clamps_position() {
        let session = PlaybackSession {
            current_track: Some(Track::new("a", "Song", "Band", 90_000)),
            position_ms: 120_000,
            duration_ms: 90_000,
            buffered_ms: 200_000,
            is_playing: true,
            status: PlaybackStatus::Playing,
            ..Default::default()
        };
        let state = PlayerUiState::from_session(&session);
        assert_eq!(state.position_ms, 90_000);
        assert_eq!(state.buffered_ms, 90_000);
        assert_eq!(state.progress, 1.0);
        assert_eq!(state.position_text, "01:30");
        assert!(state.track.unwrap().is_playing);
    }

    #[test]
    fn test_from_empty_session() {
        let state = PlayerUiState::from_session(&PlaybackSession::default());
        assert!(state.track.is_none());
        assert_eq!(state.progress, 0.0);
        assert_eq!(state.duration_text, "00:00");
        assert_eq!(state.status, PlaybackStatus::Idle);
    }

    #[tokio::test]
    async fn test_state_follows_controller() {
        let vm = view_model();
        let mut rx = vm.subscribe();

        vm.play_track(fake::track("01")).await.unwrap();
        vm.seek_to_fraction(0.5);

        let state = tokio::time::timeout(
            Duration::from_secs(1),
            rx.wait_for(|s| s.position_ms == 100_000),
        )
        .await
        .unwrap()
        .unwrap()
        .clone();
        assert_eq!(state.status, PlaybackStatus::Playing);
        assert_eq!(state.duration_text, "03:20");
        assert_eq!(state.track.unwrap().id, "01");

        vm.pause();
        tokio::time::timeout(
            Duration::from_secs(1),
            rx.wait_for(|s| s.status == PlaybackStatus::Paused),
        )
        .await
        .unwrap()
        .unwrap();
    }
}
