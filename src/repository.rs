//! Cache-first music repository.
//!
//! Composes the local [`TrackStore`] with a remote [`CatalogSource`]. Reads
//! are served from the store when it has data and fall back to the catalog
//! otherwise; every successful catalog fetch is written through to the store
//! before it is returned. There is no TTL: cached data stays until the next
//! forced refresh.

use std::future::Future;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, error, info, warn};

use crate::api::{CatalogSource, JamendoApi};
use crate::config::{JamplayConfig, DEFAULT_FEATURED_LIMIT, DEFAULT_NETWORK_BATCH, RECENT_PLAYS_LIMIT};
use crate::error::{JamplayError, Result};
use crate::models::{Playlist, Track};
use crate::store::TrackStore;

/// Serve `read` unless it comes back empty; then run `fetch` and hand the
/// result to `write`, which persists it and shapes the answer.
pub async fn read_through<T, R, RFut, F, FFut, U, W, WFut>(read: R, fetch: F, write: W) -> Result<Vec<T>>
where
    R: FnOnce() -> RFut,
    RFut: Future<Output = Result<Vec<T>>>,
    F: FnOnce() -> FFut,
    FFut: Future<Output = Result<U>>,
    W: FnOnce(U) -> WFut,
    WFut: Future<Output = Result<Vec<T>>>,
{
    let cached = read().await?;
    if !cached.is_empty() {
        return Ok(cached);
    }
    let fetched = fetch().await?;
    write(fetched).await
}

/// Main repository interface.
///
/// # Example
///
/// ```rust,no_run
/// use jamplay::{JamplayConfig, MusicRepository};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let repo = MusicRepository::from_config(&JamplayConfig::from_env()?)?;
///
///     // Served from the cache when possible
///     for track in repo.get_tracks_paginated(0, 20).await? {
///         println!("{} - {}", track.artist, track.title);
///     }
///
///     // Always hits the catalog
///     let fresh = repo.fetch_tracks_from_network().await;
///     println!("Refreshed {} tracks", fresh.len());
///     Ok(())
/// }
/// ```
pub struct MusicRepository {
    store: Arc<TrackStore>,
    catalog: Arc<dyn CatalogSource>,
    network_batch: u32,
    featured_limit: u32,
    /// Last play stamp handed out; keeps stamps strictly increasing.
    last_stamp: AtomicI64,
}

impl std::fmt::Debug for MusicRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MusicRepository")
            .field("store", &self.store)
            .field("network_batch", &self.network_batch)
            .field("featured_limit", &self.featured_limit)
            .finish_non_exhaustive()
    }
}

impl MusicRepository {
    /// Create a repository over an opened store and a catalog.
    pub fn new(store: Arc<TrackStore>, catalog: Arc<dyn CatalogSource>) -> Self {
        Self {
            store,
            catalog,
            network_batch: DEFAULT_NETWORK_BATCH,
            featured_limit: DEFAULT_FEATURED_LIMIT,
            last_stamp: AtomicI64::new(0),
        }
    }

    /// Open the configured store and Jamendo client.
    pub fn from_config(config: &JamplayConfig) -> Result<Self> {
        config.validate()?;
        let store = Arc::new(TrackStore::open(&config.database_path)?);
        let catalog = Arc::new(JamendoApi::new(config)?);
        Ok(Self::new(store, catalog).with_limits(config.network_batch, config.featured_limit))
    }

    /// Override how many tracks and playlists a network fetch requests.
    pub fn with_limits(mut self, network_batch: u32, featured_limit: u32) -> Self {
        self.network_batch = network_batch;
        self.featured_limit = featured_limit;
        self
    }

    /// Run a store operation on the blocking pool.
    async fn with_store<T, F>(&self, op: F) -> Result<T>
    where
        F: FnOnce(&TrackStore) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || op(&store)).await?
    }

    /// Write catalog tracks through to the store, returning the merged rows.
    async fn persist(&self, tracks: Vec<Track>) -> Result<Vec<Track>> {
        self.with_store(move |store| store.upsert_catalog(&tracks)).await
    }

    async fn fetch_catalog(&self) -> Result<Vec<Track>> {
        self.catalog.fetch_tracks(self.network_batch, 0).await
    }

    // ==================
    // TRACK LISTINGS
    // ==================

    /// Cached tracks, or the catalog listing when the cache is empty.
    pub async fn get_tracks(&self) -> Result<Vec<Track>> {
        read_through(
            || self.with_store(|store| store.all_tracks()),
            || self.fetch_catalog(),
            |tracks| self.persist(tracks),
        )
        .await
    }

    /// One page of tracks, at most `size` long.
    ///
    /// Falls back to slicing the full catalog listing when the cached page is
    /// empty.
    pub async fn get_tracks_paginated(&self, page: usize, size: usize) -> Result<Vec<Track>> {
        if size == 0 {
            return Ok(Vec::new());
        }
        let offset = page.saturating_mul(size);

        read_through(
            || self.with_store(move |store| store.tracks_page(offset, size)),
            || self.fetch_catalog(),
            |tracks| async move {
                let merged = self.persist(tracks).await?;
                Ok::<_, JamplayError>(merged.into_iter().skip(offset).take(size).collect())
            },
        )
        .await
    }

    /// Force a catalog round trip and write the result through.
    pub async fn try_fetch_tracks_from_network(&self) -> Result<Vec<Track>> {
        let tracks = self.fetch_catalog().await?;
        let merged = self.persist(tracks).await?;
        info!("Refreshed {} tracks from the catalog", merged.len());
        Ok(merged)
    }

    /// Force a catalog round trip; failures degrade to an empty list and leave
    /// the store untouched.
    pub async fn fetch_tracks_from_network(&self) -> Vec<Track> {
        match self.try_fetch_tracks_from_network().await {
            Ok(tracks) => tracks,
            Err(e) => {
                error!("Network refresh failed: {}", e);
                Vec::new()
            }
        }
    }

    /// Whatever the store holds, without touching the network.
    pub async fn get_cached_tracks(&self) -> Result<Vec<Track>> {
        self.with_store(|store| store.all_tracks()).await
    }

    /// Look up a cached track.
    pub async fn get_track_by_id(&self, track_id: &str) -> Result<Option<Track>> {
        let id = track_id.to_string();
        self.with_store(move |store| store.track_by_id(&id)).await
    }

    /// Audio URI of a cached track.
    pub async fn get_track_url(&self, track_id: &str) -> Result<Option<String>> {
        Ok(self
            .get_track_by_id(track_id)
            .await?
            .map(|t| t.audio_url)
            .filter(|url| !url.is_empty()))
    }

    /// Track after `track_id` in id order, falling back to catalog order.
    pub async fn get_next_track(&self, track_id: &str) -> Result<Option<Track>> {
        let id = track_id.to_string();
        if let Some(track) = self.with_store(move |store| store.next_track(&id)).await? {
            return Ok(Some(track));
        }
        Ok(neighbour(&self.fetch_tracks_from_network().await, track_id, 1))
    }

    /// Track before `track_id` in id order, falling back to catalog order.
    pub async fn get_previous_track(&self, track_id: &str) -> Result<Option<Track>> {
        let id = track_id.to_string();
        if let Some(track) = self.with_store(move |store| store.previous_track(&id)).await? {
            return Ok(Some(track));
        }
        Ok(neighbour(&self.fetch_tracks_from_network().await, track_id, -1))
    }

    // ==================
    // LOCAL STATE
    // ==================

    /// Stamp `track` as played now and upsert it. Returns the stamped track.
    pub async fn add_to_recent_plays(&self, track: &Track) -> Result<Track> {
        let played = track.played_at(self.next_stamp());
        let row = played.clone();
        self.with_store(move |store| store.upsert_played(&row)).await?;
        debug!("Recorded play of {} at {:?}", played.id, played.last_played);
        Ok(played)
    }

    /// Played tracks, most recent first.
    pub async fn get_recent_plays(&self) -> Result<Vec<Track>> {
        self.with_store(|store| store.recent_plays(RECENT_PLAYS_LIMIT))
            .await
    }

    /// Flip the favorite flag of a track, back-filling it from the catalog
    /// when it is not cached. Returns the new flag.
    pub async fn toggle_favorite(&self, track_id: &str) -> Result<bool> {
        let id = track_id.to_string();
        if let Some(value) = self.with_store(move |store| store.toggle_favorite(&id)).await? {
            return Ok(value);
        }

        debug!("Track {} not cached, back-filling from catalog", track_id);
        let catalog = self.try_fetch_tracks_from_network().await?;
        if !catalog.iter().any(|t| t.id == track_id) {
            warn!("Cannot toggle favorite: track {} not in catalog", track_id);
            return Err(JamplayError::TrackNotFound(track_id.to_string()));
        }

        let id = track_id.to_string();
        self.with_store(move |store| store.toggle_favorite(&id))
            .await?
            .ok_or_else(|| JamplayError::TrackNotFound(track_id.to_string()))
    }

    /// Tracks marked as favorite.
    pub async fn get_favorite_tracks(&self) -> Result<Vec<Track>> {
        self.with_store(|store| store.favorites()).await
    }

    // ==================
    // PLAYLISTS
    // ==================

    /// Featured playlists straight from the catalog. Not cached.
    pub async fn get_featured_playlists(&self) -> Result<Vec<Playlist>> {
        self.catalog
            .fetch_featured_playlists(self.featured_limit)
            .await
    }

    fn next_stamp(&self) -> i64 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0);
        let mut last = self.last_stamp.load(Ordering::SeqCst);
        loop {
            let stamp = now.max(last + 1);
            match self
                .last_stamp
                .compare_exchange(last, stamp, Ordering::SeqCst, Ordering::SeqCst)
            {
                Ok(_) => return stamp,
                Err(actual) => last = actual,
            }
        }
    }
}

/// The track `step` positions away from `track_id` in `tracks`.
fn neighbour(tracks: &[Track], track_id: &str, step: isize) -> Option<Track> {
    let index = tracks.iter().position(|t| t.id == track_id)?;
    let target = index.checked_add_signed(step)?;
    tracks.get(target).cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::fake::{self, FakeCatalog};
    use tokio_test::{assert_err, assert_ok};

    fn setup(tracks: Vec<Track>) -> (MusicRepository, Arc<FakeCatalog>, Arc<TrackStore>) {
        let store = Arc::new(TrackStore::open_in_memory().unwrap());
        let catalog = Arc::new(FakeCatalog::with_tracks(tracks));
        let repo = MusicRepository::new(store.clone(), catalog.clone());
        (repo, catalog, store)
    }

    #[tokio::test]
    async fn test_get_tracks_populates_empty_store() {
        let (repo, catalog, store) = setup(fake::tracks(3));

        let tracks = assert_ok!(repo.get_tracks().await);
        assert_eq!(tracks.len(), 3);
        assert_eq!(catalog.track_calls(), 1);

        let stored: Vec<String> = store.all_tracks().unwrap().into_iter().map(|t| t.id).collect();
        assert_eq!(stored, vec!["01", "02", "03"]);
    }

    #[tokio::test]
    async fn test_get_tracks_serves_cache_without_network() {
        let (repo, catalog, store) = setup(fake::tracks(5));
        store.upsert_catalog(&[fake::track("cached")]).unwrap();

        let tracks = repo.get_tracks().await.unwrap();
        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].id, "cached");
        assert_eq!(catalog.track_calls(), 0);
    }

    #[tokio::test]
    async fn test_get_tracks_propagates_network_failure() {
        let (repo, catalog, store) = setup(fake::tracks(3));
        catalog.set_failing(true);

        assert_err!(repo.get_tracks().await);
        assert_eq!(store.count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_paginated_from_cache_and_network_fallback() {
        let (repo, catalog, _store) = setup(fake::tracks(5));

        // Empty store: page 1 is sliced from the full network listing.
        let page = repo.get_tracks_paginated(1, 2).await.unwrap();
        let ids: Vec<&str> = page.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["03", "04"]);
        assert_eq!(catalog.track_calls(), 1);

        // Now cached.
        let page = repo.get_tracks_paginated(2, 2).await.unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].id, "05");
        assert_eq!(catalog.track_calls(), 1);
    }

    #[tokio::test]
    async fn test_paginated_never_exceeds_size() {
        let (repo, _catalog, _store) = setup(fake::tracks(7));
        for page in 0..5 {
            assert!(repo.get_tracks_paginated(page, 3).await.unwrap().len() <= 3);
        }
        assert!(repo.get_tracks_paginated(0, 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_fetch_from_network_failure_leaves_store_unchanged() {
        let (repo, catalog, store) = setup(fake::tracks(3));
        store.upsert_catalog(&[fake::track("keep")]).unwrap();
        catalog.set_failing(true);

        assert!(repo.fetch_tracks_from_network().await.is_empty());
        let stored = store.all_tracks().unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].id, "keep");
    }

    #[tokio::test]
    async fn test_refresh_keeps_favorites() {
        let (repo, catalog, _store) = setup(fake::tracks(2));
        repo.get_tracks().await.unwrap();
        assert!(repo.toggle_favorite("01").await.unwrap());

        let mut renamed = fake::tracks(2);
        renamed[0].title = "New title".to_string();
        catalog.set_tracks(renamed);

        let refreshed = repo.fetch_tracks_from_network().await;
        assert_eq!(refreshed[0].title, "New title");
        assert!(refreshed[0].is_favorite);
    }

    #[tokio::test]
    async fn test_toggle_favorite_twice_restores_and_isolates() {
        let (repo, _catalog, store) = setup(fake::tracks(3));
        repo.get_tracks().await.unwrap();

        assert!(repo.toggle_favorite("02").await.unwrap());
        assert!(!repo.toggle_favorite("02").await.unwrap());

        for track in store.all_tracks().unwrap() {
            assert!(!track.is_favorite, "{} changed", track.id);
        }
    }

    #[tokio::test]
    async fn test_toggle_favorite_backfills_missing_track() {
        let (repo, catalog, store) = setup(fake::tracks(3));

        assert!(repo.toggle_favorite("03").await.unwrap());
        assert_eq!(catalog.track_calls(), 1);
        assert!(store.track_by_id("03").unwrap().unwrap().is_favorite);
        assert!(!store.track_by_id("01").unwrap().unwrap().is_favorite);

        assert!(matches!(
            repo.toggle_favorite("nope").await,
            Err(JamplayError::TrackNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_recent_plays_front_is_latest() {
        let (repo, _catalog, _store) = setup(fake::tracks(3));
        repo.get_tracks().await.unwrap();

        repo.add_to_recent_plays(&fake::track("01")).await.unwrap();
        repo.add_to_recent_plays(&fake::track("03")).await.unwrap();
        let played = repo.add_to_recent_plays(&fake::track("02")).await.unwrap();
        assert!(played.last_played.is_some());

        let recent = repo.get_recent_plays().await.unwrap();
        let ids: Vec<&str> = recent.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["02", "03", "01"]);
    }

    #[tokio::test]
    async fn test_recent_play_of_uncached_track_is_inserted() {
        let (repo, catalog, _store) = setup(Vec::new());
        repo.add_to_recent_plays(&fake::track("x")).await.unwrap();

        assert_eq!(repo.get_recent_plays().await.unwrap()[0].id, "x");
        assert_eq!(catalog.track_calls(), 0);
    }

    #[tokio::test]
    async fn test_next_and_previous_track() {
        let (repo, _catalog, _store) = setup(fake::tracks(3));
        repo.get_tracks().await.unwrap();

        assert_eq!(repo.get_next_track("01").await.unwrap().unwrap().id, "02");
        assert_eq!(repo.get_previous_track("02").await.unwrap().unwrap().id, "01");
        assert!(repo.get_next_track("03").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_neighbours_of_unknown_id() {
        let (repo, _catalog, _store) = setup(fake::tracks(3));
        repo.get_tracks().await.unwrap();

        assert!(repo.get_next_track("00").await.unwrap().is_none());
        assert!(repo.get_previous_track("99").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_track_url_and_featured() {
        let (repo, catalog, _store) = setup(fake::tracks(1));
        catalog.set_playlists(vec![Playlist {
            id: "p1".to_string(),
            title: "Featured".to_string(),
            cover_url: None,
            track_count: 4,
        }]);
        repo.get_tracks().await.unwrap();

        assert_eq!(
            repo.get_track_url("01").await.unwrap().as_deref(),
            Some("https://audio.example/01.mp3")
        );
        assert!(repo.get_track_url("zz").await.unwrap().is_none());
        assert_eq!(repo.get_featured_playlists().await.unwrap().len(), 1);
    }

    #[test]
    fn test_neighbour_bounds() {
        let tracks = fake::tracks(2);
        assert_eq!(neighbour(&tracks, "01", 1).unwrap().id, "02");
        assert!(neighbour(&tracks, "01", -1).is_none());
        assert!(neighbour(&tracks, "missing", 1).is_none());
    }
}
