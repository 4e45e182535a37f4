//! Home screen state: track listing with pagination, featured playlists and
//! recent plays.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::{project_now_playing, PlaylistItem, TrackItem};
use crate::config::DEFAULT_PAGE_SIZE;
use crate::error::{JamplayError, Result};
use crate::models::Track;
use crate::player::{PlaybackController, PlaybackSession};
use crate::repository::MusicRepository;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum HomeUiState {
    #[default]
    Loading,
    Success {
        tracks: Vec<TrackItem>,
        featured_playlists: Vec<PlaylistItem>,
        recent_plays: Vec<TrackItem>,
        is_loading_more: bool,
        has_more: bool,
    },
    Error(String),
}

/// Drives [`HomeUiState`].
pub struct HomeViewModel {
    repository: Arc<MusicRepository>,
    controller: Arc<PlaybackController>,
    state: Arc<watch::Sender<HomeUiState>>,
    page_size: usize,
    /// Last page merged into the listing.
    current_page: AtomicUsize,
    /// Bumped on every reload; page results from an older listing are dropped.
    generation: AtomicU64,
    observer: JoinHandle<()>,
}

impl std::fmt::Debug for HomeViewModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HomeViewModel")
            .field("state", &*self.state.borrow())
            .field("page_size", &self.page_size)
            .field("current_page", &self.current_page)
            .finish_non_exhaustive()
    }
}

impl HomeViewModel {
    /// Create the holder and start following the playback session.
    ///
    /// Must be called inside a tokio runtime. Nothing is loaded until
    /// [`load_initial_data`](Self::load_initial_data).
    pub fn new(repository: Arc<MusicRepository>, controller: Arc<PlaybackController>) -> Self {
        Self::with_page_size(repository, controller, DEFAULT_PAGE_SIZE)
    }

    pub fn with_page_size(
        repository: Arc<MusicRepository>,
        controller: Arc<PlaybackController>,
        page_size: usize,
    ) -> Self {
        let (state, _) = watch::channel(HomeUiState::Loading);
        let state = Arc::new(state);
        let observer = tokio::spawn(follow_session(controller.subscribe(), Arc::clone(&state)));
        Self {
            repository,
            controller,
            state,
            page_size: page_size.max(1),
            current_page: AtomicUsize::new(0),
            generation: AtomicU64::new(0),
            observer,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<HomeUiState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> HomeUiState {
        self.state.borrow().clone()
    }

    /// Load featured playlists, recent plays and the first page.
    ///
    /// Only a failure to list tracks is an error. Featured playlists are
    /// network-only, so an outage leaves that row empty.
    pub async fn load_initial_data(&self) {
        self.state.send_modify(|state| {
            self.generation.fetch_add(1, Ordering::SeqCst);
            self.current_page.store(0, Ordering::SeqCst);
            *state = HomeUiState::Loading;
        });

        let featured = async {
            match self.repository.get_featured_playlists().await {
                Ok(playlists) => Ok::<_, JamplayError>(playlists),
                Err(e) => {
                    warn!("Featured playlists unavailable: {}", e);
                    Ok(Vec::new())
                }
            }
        };
        let loaded = futures_util::try_join!(
            featured,
            self.repository.get_recent_plays(),
            self.repository.get_tracks_paginated(0, self.page_size),
        );

        let next = match loaded {
            Ok((featured, recent, tracks)) => {
                let session = self.controller.session();
                debug!("Home loaded with {} tracks", tracks.len());
                HomeUiState::Success {
                    has_more: tracks.len() == self.page_size,
                    tracks: items(&tracks, &session),
                    featured_playlists: featured.iter().map(PlaylistItem::from).collect(),
                    recent_plays: items(&recent, &session),
                    is_loading_more: false,
                }
            }
            Err(e) => {
                warn!("Home load failed: {}", e);
                HomeUiState::Error(e.to_string())
            }
        };
        self.state.send_replace(next);
    }

    /// Append the next page. No-op while a load is in flight or when the
    /// listing is exhausted; on failure the page counter is left unchanged.
    /// A page that lands after a reload started is discarded.
    pub async fn load_more_tracks(&self) {
        let mut generation = 0;
        let started = self.state.send_if_modified(|state| match state {
            HomeUiState::Success {
                is_loading_more,
                has_more,
                ..
            } if !*is_loading_more && *has_more => {
                generation = self.generation.load(Ordering::SeqCst);
                *is_loading_more = true;
                true
            }
            _ => false,
        });
        if !started {
            return;
        }

        let page = self.current_page.load(Ordering::SeqCst) + 1;
        let result = self
            .repository
            .get_tracks_paginated(page, self.page_size)
            .await;

        let session = self.controller.session();
        let page_size = self.page_size;
        let applied = self.state.send_if_modified(|state| {
            if self.generation.load(Ordering::SeqCst) != generation {
                return false;
            }
            let HomeUiState::Success {
                tracks,
                is_loading_more,
                has_more,
                ..
            } = state
            else {
                return false;
            };
            *is_loading_more = false;
            match &result {
                Ok(new_tracks) => {
                    self.current_page.store(page, Ordering::SeqCst);
                    *has_more = new_tracks.len() == page_size;
                    tracks.extend(items(new_tracks, &session));
                }
                Err(e) => warn!("Loading page {} failed: {}", page, e),
            }
            true
        });
        if !applied {
            debug!("Dropping page {} loaded before a refresh", page);
        }
    }

    /// Reset pagination and reload everything.
    pub async fn refresh_data(&self) {
        self.load_initial_data().await;
    }

    /// Look up a track and start playing it. Returns false if it is unknown.
    pub async fn play_track_by_id(&self, track_id: &str) -> Result<bool> {
        match self.repository.get_track_by_id(track_id).await? {
            Some(track) => {
                self.controller.play(track).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

impl Drop for HomeViewModel {
    fn drop(&mut self) {
        self.observer.abort();
    }
}

fn items(tracks: &[Track], session: &PlaybackSession) -> Vec<TrackItem> {
    tracks
        .iter()
        .map(|t| TrackItem::from_track(t, session))
        .collect()
}

async fn follow_session(
    mut session: watch::Receiver<PlaybackSession>,
    state: Arc<watch::Sender<HomeUiState>>,
) {
    while session.changed().await.is_ok() {
        let snapshot = session.borrow_and_update().clone();
        state.send_if_modified(|state| match state {
            HomeUiState::Success {
                tracks,
                recent_plays,
                ..
            } => {
                let listing = project_now_playing(tracks, &snapshot);
                let recent = project_now_playing(recent_plays, &snapshot);
                listing || recent
            }
            _ => false,
        });
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::api::fake::{self, FakeCatalog};
    use crate::models::Playlist;
    use crate::player::SilentEngine;
    use crate::store::TrackStore;

    struct Fixture {
        home: HomeViewModel,
        catalog: Arc<FakeCatalog>,
        store: Arc<TrackStore>,
        controller: Arc<PlaybackController>,
    }

    fn fixture(tracks: usize) -> Fixture {
        let store = Arc::new(TrackStore::open_in_memory().unwrap());
        let catalog = Arc::new(FakeCatalog::with_tracks(fake::tracks(tracks)));
        catalog.set_playlists(vec![Playlist {
            id: "p1".to_string(),
            title: "Featured".to_string(),
            cover_url: None,
            track_count: 3,
        }]);
        let repo = Arc::new(MusicRepository::new(store.clone(), catalog.clone()));
        let (engine, _rx) = SilentEngine::new();
        let controller = Arc::new(PlaybackController::new(Box::new(engine), repo.clone()));
        let home = HomeViewModel::with_page_size(repo, controller.clone(), 20);
        Fixture {
            home,
            catalog,
            store,
            controller,
        }
    }

    fn listing(state: &HomeUiState) -> (usize, bool, bool) {
        match state {
            HomeUiState::Success {
                tracks,
                is_loading_more,
                has_more,
                ..
            } => (tracks.len(), *is_loading_more, *has_more),
            other => panic!("unexpected state {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_initial_load_and_pagination() {
        let f = fixture(45);
        assert_eq!(f.home.state(), HomeUiState::Loading);

        f.home.load_initial_data().await;
        assert_eq!(listing(&f.home.state()), (20, false, true));
        if let HomeUiState::Success {
            featured_playlists, ..
        } = f.home.state()
        {
            assert_eq!(featured_playlists[0].title, "Featured");
        }

        f.home.load_more_tracks().await;
        assert_eq!(listing(&f.home.state()), (40, false, true));

        f.home.load_more_tracks().await;
        assert_eq!(listing(&f.home.state()), (45, false, false));

        // Exhausted: no-op.
        f.home.load_more_tracks().await;
        assert_eq!(listing(&f.home.state()), (45, false, false));
    }

    #[tokio::test]
    async fn test_initial_load_failure_is_error_state() {
        let f = fixture(5);
        f.catalog.set_failing(true);

        f.home.load_initial_data().await;
        assert!(matches!(f.home.state(), HomeUiState::Error(_)));
    }

    #[tokio::test]
    async fn test_offline_home_serves_cached_tracks() {
        let f = fixture(5);
        f.store.upsert_catalog(&fake::tracks(5)).unwrap();
        f.catalog.set_failing(true);

        f.home.load_initial_data().await;
        let HomeUiState::Success {
            tracks,
            featured_playlists,
            has_more,
            ..
        } = f.home.state()
        else {
            panic!("expected success, got {:?}", f.home.state());
        };
        assert_eq!(tracks.len(), 5);
        assert!(featured_playlists.is_empty());
        assert!(!has_more);
    }

    #[tokio::test]
    async fn test_refresh_during_load_more_keeps_page_order() {
        let f = fixture(45);
        f.home.load_initial_data().await;

        tokio::join!(f.home.load_more_tracks(), f.home.refresh_data());
        assert_eq!(listing(&f.home.state()), (20, false, true));

        f.home.load_more_tracks().await;
        let HomeUiState::Success { tracks, .. } = f.home.state() else {
            panic!("expected success");
        };
        assert_eq!(tracks.len(), 40);
        assert_eq!(tracks[20].id, "21");
    }

    #[tokio::test]
    async fn test_load_more_failure_rolls_back() {
        let f = fixture(45);
        f.store.upsert_catalog(&fake::tracks(20)).unwrap();
        f.home.load_initial_data().await;
        assert_eq!(listing(&f.home.state()), (20, false, true));

        f.catalog.set_failing(true);
        f.home.load_more_tracks().await;
        assert_eq!(listing(&f.home.state()), (20, false, true));

        f.catalog.set_failing(false);
        f.home.load_more_tracks().await;
        let HomeUiState::Success { tracks, .. } = f.home.state() else {
            panic!("expected success");
        };
        assert_eq!(tracks.len(), 40);
        assert_eq!(tracks[20].id, "21");
    }

    #[tokio::test]
    async fn test_refresh_resets_pagination() {
        let f = fixture(45);
        f.home.load_initial_data().await;
        f.home.load_more_tracks().await;
        assert_eq!(listing(&f.home.state()).0, 40);

        f.home.refresh_data().await;
        assert_eq!(listing(&f.home.state()), (20, false, true));
    }

    #[tokio::test]
    async fn test_now_playing_follows_session() {
        let f = fixture(3);
        f.home.load_initial_data().await;
        let mut rx = f.home.subscribe();

        assert!(f.home.play_track_by_id("02").await.unwrap());
        let state = tokio::time::timeout(
            Duration::from_secs(1),
            rx.wait_for(|state| match state {
                HomeUiState::Success { tracks, .. } => tracks.iter().any(|t| t.is_playing),
                _ => false,
            }),
        )
        .await
        .unwrap()
        .unwrap()
        .clone();

        let HomeUiState::Success { tracks, .. } = state else {
            panic!("expected success");
        };
        let playing: Vec<&str> = tracks
            .iter()
            .filter(|t| t.is_playing)
            .map(|t| t.id.as_str())
            .collect();
        assert_eq!(playing, vec!["02"]);

        f.controller.pause();
        tokio::time::timeout(
            Duration::from_secs(1),
            rx.wait_for(|state| match state {
                HomeUiState::Success { tracks, .. } => tracks.iter().all(|t| !t.is_playing),
                _ => false,
            }),
        )
        .await
        .unwrap()
        .unwrap();

        assert!(!f.home.play_track_by_id("nope").await.unwrap());
    }
}
