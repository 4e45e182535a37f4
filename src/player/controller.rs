//! Playback controller: the single owner of the media engine.
//!
//! Consumers never touch the engine. They call the transport methods and
//! observe [`PlaybackSession`] snapshots through a watch channel.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::engine::{EngineEvent, EngineState, EventReceiver, MediaEngine, MediaItem, TransitionReason};
use crate::error::{JamplayError, Result};
use crate::models::Track;
use crate::repository::MusicRepository;

/// How often the event loop polls the engine clock.
const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Lifecycle of the playback session.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum PlaybackStatus {
    #[default]
    Idle,
    Loading,
    Ready,
    Playing,
    Paused,
    Ended,
    Error(String),
}

/// Observable playback state. Exactly one exists per controller.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlaybackSession {
    /// Track whose media item is active in the engine.
    pub current_track: Option<Track>,
    /// Loaded queue, in engine order.
    pub queue: Vec<Track>,
    /// Active queue index.
    pub queue_index: Option<usize>,
    /// Mirrors the engine's playing flag.
    pub is_playing: bool,
    pub position_ms: u64,
    pub duration_ms: u64,
    pub buffered_ms: u64,
    pub status: PlaybackStatus,
}

impl PlaybackSession {
    fn point_at(&mut self, index: usize) {
        self.queue_index = Some(index);
        self.current_track = self.queue.get(index).cloned();
        self.position_ms = 0;
        self.buffered_ms = 0;
        self.duration_ms = self.current_track.as_ref().map_or(0, |t| t.duration_ms);
    }

    fn resolve_status(&mut self, state: EngineState, play_when_ready: bool) {
        if matches!(self.status, PlaybackStatus::Error(_)) && state != EngineState::Idle {
            return;
        }
        self.status = match state {
            EngineState::Idle if self.current_track.is_some() => PlaybackStatus::Loading,
            EngineState::Idle => PlaybackStatus::Idle,
            EngineState::Buffering => PlaybackStatus::Loading,
            EngineState::Ended => PlaybackStatus::Ended,
            EngineState::Ready if self.is_playing => PlaybackStatus::Playing,
            EngineState::Ready if play_when_ready => PlaybackStatus::Loading,
            EngineState::Ready => match self.status {
                PlaybackStatus::Playing | PlaybackStatus::Paused => PlaybackStatus::Paused,
                _ => PlaybackStatus::Ready,
            },
        };
    }
}

/// Owns the media engine and publishes the playback session.
pub struct PlaybackController {
    engine: Mutex<Box<dyn MediaEngine>>,
    repository: Arc<MusicRepository>,
    session: watch::Sender<PlaybackSession>,
}

impl std::fmt::Debug for PlaybackController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaybackController")
            .field("session", &*self.session.borrow())
            .finish_non_exhaustive()
    }
}

impl PlaybackController {
    pub fn new(engine: Box<dyn MediaEngine>, repository: Arc<MusicRepository>) -> Self {
        let (session, _) = watch::channel(PlaybackSession::default());
        Self {
            engine: Mutex::new(engine),
            repository,
            session,
        }
    }

    /// Observe session changes.
    pub fn subscribe(&self) -> watch::Receiver<PlaybackSession> {
        self.session.subscribe()
    }

    /// Current session snapshot.
    pub fn session(&self) -> PlaybackSession {
        self.session.borrow().clone()
    }

    pub fn repository(&self) -> &Arc<MusicRepository> {
        &self.repository
    }

    fn engine(&self) -> MutexGuard<'_, Box<dyn MediaEngine>> {
        match self.engine.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("Engine mutex poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    /// Re-read the engine after a transport call.
    fn sync_from_engine(&self) {
        let engine = self.engine();
        let index = engine.current_index();
        let state = engine.state();
        let play_when_ready = engine.play_when_ready();
        let is_playing = engine.is_playing();
        let position = engine.position();
        let duration = engine.duration();
        let buffered = engine.buffered();
        drop(engine);

        self.session.send_modify(|s| {
            if index != s.queue_index {
                match index {
                    Some(i) => s.point_at(i),
                    None => {
                        s.queue_index = None;
                        s.current_track = None;
                    }
                }
            }
            s.is_playing = is_playing;
            s.position_ms = position;
            s.duration_ms = duration
                .or_else(|| s.current_track.as_ref().map(|t| t.duration_ms))
                .unwrap_or(0);
            s.buffered_ms = buffered;
            s.resolve_status(state, play_when_ready);
        });
    }

    fn fail(&self, err: &JamplayError) {
        warn!("Playback error: {}", err);
        let message = err.to_string();
        self.session.send_modify(|s| {
            s.is_playing = false;
            s.status = PlaybackStatus::Error(message);
        });
    }

    /// Play a single track.
    ///
    /// A track without an audio URI is looked up in the repository first.
    pub async fn play(&self, track: Track) -> Result<()> {
        let track = if track.audio_url.is_empty() {
            self.repository
                .get_track_by_id(&track.id)
                .await?
                .filter(|t| !t.audio_url.is_empty())
                .ok_or_else(|| JamplayError::TrackNotFound(track.id.clone()))?
        } else {
            track
        };
        self.play_playlist(vec![track], 0).await
    }

    /// Load `tracks` as the queue and start at `start_index`.
    pub async fn play_playlist(&self, tracks: Vec<Track>, start_index: usize) -> Result<()> {
        let start = tracks
            .get(start_index)
            .cloned()
            .ok_or_else(|| JamplayError::Engine(format!("no track at index {}", start_index)))?;
        info!("Playing {} - {} ({} queued)", start.artist, start.title, tracks.len());

        let items: Vec<MediaItem> = tracks.iter().map(MediaItem::from).collect();
        self.session.send_modify(|s| {
            s.queue = tracks;
            s.status = PlaybackStatus::Loading;
            s.point_at(start_index);
        });

        if let Err(e) = self.load_queue(items, start_index) {
            self.fail(&e);
            return Err(e);
        }
        self.sync_from_engine();
        self.record_play(&start).await;
        Ok(())
    }

    fn load_queue(&self, items: Vec<MediaItem>, start_index: usize) -> Result<()> {
        let mut engine = self.engine();
        engine.set_queue(items, start_index)?;
        engine.prepare()?;
        engine.set_play_when_ready(true);
        Ok(())
    }

    pub fn pause(&self) {
        self.engine().set_play_when_ready(false);
        self.sync_from_engine();
    }

    pub fn resume(&self) {
        self.engine().set_play_when_ready(true);
        self.sync_from_engine();
    }

    /// Pause when playing, otherwise resume. Restarts an ended item.
    pub fn toggle_playback(&self) {
        let session = self.session();
        if session.is_playing {
            self.pause();
            return;
        }
        if session.status == PlaybackStatus::Ended {
            self.engine().seek_to(0);
        }
        self.resume();
    }

    /// Seek within the current item, clamped to `[0, duration]`.
    pub fn seek_to(&self, position_ms: u64) {
        let fallback = self.session.borrow().current_track.as_ref().map(|t| t.duration_ms);
        {
            let mut engine = self.engine();
            let duration = engine.duration().or(fallback).unwrap_or(0);
            engine.seek_to(position_ms.min(duration));
        }
        self.sync_from_engine();
    }

    /// Advance to the next queue item. Past the end of the queue the
    /// repository's next track is played instead; without one, playback stops.
    pub async fn skip_next(&self) -> Result<()> {
        let moved = {
            let mut engine = self.engine();
            engine.has_next().then(|| engine.seek_to_next())
        };
        match moved {
            Some(Ok(())) => self.after_skip().await,
            Some(Err(e)) => {
                self.fail(&e);
                Err(e)
            }
            None => match self.adjacent_track(true).await? {
                Some(track) => self.play(track).await,
                None => {
                    debug!("No track after the current one, stopping");
                    self.stop();
                    Ok(())
                }
            },
        }
    }

    /// Go back one queue item. Before the start of the queue the repository's
    /// previous track is played instead; without one, the current item
    /// restarts from 0.
    pub async fn skip_previous(&self) -> Result<()> {
        let moved = {
            let mut engine = self.engine();
            engine.has_previous().then(|| engine.seek_to_previous())
        };
        match moved {
            Some(Ok(())) => self.after_skip().await,
            Some(Err(e)) => {
                self.fail(&e);
                Err(e)
            }
            None => match self.adjacent_track(false).await? {
                Some(track) => self.play(track).await,
                None => {
                    self.engine().seek_to(0);
                    self.sync_from_engine();
                    Ok(())
                }
            },
        }
    }

    /// Neighbour of the current track outside the loaded queue.
    async fn adjacent_track(&self, forward: bool) -> Result<Option<Track>> {
        let current = self.session.borrow().current_track.as_ref().map(|t| t.id.clone());
        let Some(id) = current else {
            return Ok(None);
        };
        if forward {
            self.repository.get_next_track(&id).await
        } else {
            self.repository.get_previous_track(&id).await
        }
    }

    async fn after_skip(&self) -> Result<()> {
        self.sync_from_engine();
        let current = self.session.borrow().current_track.clone();
        if let Some(track) = current {
            self.record_play(&track).await;
        }
        Ok(())
    }

    /// Release the queue and return to idle.
    pub fn stop(&self) {
        self.engine().stop();
        self.session.send_modify(|s| *s = PlaybackSession::default());
    }

    /// Flip the favorite flag of the current track.
    pub async fn toggle_favorite(&self) -> Result<Option<bool>> {
        let Some(id) = self.session.borrow().current_track.as_ref().map(|t| t.id.clone()) else {
            return Ok(None);
        };
        let value = self.repository.toggle_favorite(&id).await?;
        self.session.send_modify(|s| {
            for track in s.queue.iter_mut().chain(s.current_track.as_mut()) {
                if track.id == id {
                    track.is_favorite = value;
                }
            }
        });
        Ok(Some(value))
    }

    /// Apply one engine event. Returns the track the engine advanced to on
    /// its own, if any.
    pub fn handle_event(&self, event: EngineEvent) -> Option<Track> {
        let mut advanced = None;
        match event {
            EngineEvent::Progress {
                position_ms,
                duration_ms,
                buffered_ms,
            } => self.session.send_modify(|s| {
                if duration_ms > 0 {
                    s.duration_ms = duration_ms;
                }
                s.position_ms = if s.duration_ms > 0 {
                    position_ms.min(s.duration_ms)
                } else {
                    position_ms
                };
                s.buffered_ms = buffered_ms;
            }),
            EngineEvent::TrackTransition { index, reason } => {
                let applied = self.session.send_if_modified(|s| {
                    if index >= s.queue.len() {
                        return false;
                    }
                    if s.queue_index != Some(index) {
                        s.point_at(index);
                    }
                    if reason == TransitionReason::Auto {
                        advanced = s.current_track.clone();
                    }
                    true
                });
                if !applied {
                    debug!("Ignoring stale transition to item {}", index);
                }
            }
            EngineEvent::StateChanged(state) => {
                let play_when_ready = self.engine().play_when_ready();
                self.session
                    .send_modify(|s| s.resolve_status(state, play_when_ready));
            }
            EngineEvent::IsPlayingChanged(playing) => {
                let (state, play_when_ready) = {
                    let engine = self.engine();
                    (engine.state(), engine.play_when_ready())
                };
                self.session.send_modify(|s| {
                    s.is_playing = playing;
                    s.resolve_status(state, play_when_ready);
                });
            }
            EngineEvent::Error(message) => {
                self.fail(&JamplayError::Engine(message));
            }
        }
        advanced
    }

    /// Drive the session from engine events until the channel closes.
    pub async fn run(&self, mut events: EventReceiver) {
        let mut ticker = tokio::time::interval(POLL_INTERVAL);
        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(event) => {
                        if let Some(track) = self.handle_event(event) {
                            self.record_play(&track).await;
                        }
                    }
                    None => break,
                },
                _ = ticker.tick() => {
                    self.engine().poll();
                }
            }
        }
        debug!("Engine event channel closed");
    }

    async fn record_play(&self, track: &Track) {
        match self.repository.add_to_recent_plays(track).await {
            Ok(played) => self.session.send_modify(|s| {
                if let Some(current) = s.current_track.as_mut().filter(|t| t.id == played.id) {
                    current.last_played = played.last_played;
                }
            }),
            Err(e) => warn!("Failed to record play of {}: {}", track.id, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::fake::{self, FakeCatalog};
    use crate::player::engine::SilentEngine;
    use crate::store::TrackStore;

    fn setup() -> (PlaybackController, EventReceiver, Arc<MusicRepository>) {
        let store = Arc::new(TrackStore::open_in_memory().unwrap());
        let catalog = Arc::new(FakeCatalog::with_tracks(fake::tracks(3)));
        let repo = Arc::new(MusicRepository::new(store, catalog));
        let (engine, rx) = SilentEngine::new();
        (PlaybackController::new(Box::new(engine), repo.clone()), rx, repo)
    }

    fn current_id(controller: &PlaybackController) -> Option<String> {
        controller.session().current_track.map(|t| t.id)
    }

    #[tokio::test]
    async fn test_play_records_recent_play() {
        let (controller, _rx, repo) = setup();
        controller.play(fake::track("01")).await.unwrap();

        let session = controller.session();
        assert_eq!(session.status, PlaybackStatus::Playing);
        assert!(session.is_playing);
        assert_eq!(session.duration_ms, 200_000);
        assert!(session.current_track.unwrap().last_played.is_some());
        assert_eq!(repo.get_recent_plays().await.unwrap()[0].id, "01");
    }

    #[tokio::test]
    async fn test_play_unknown_track_without_uri_fails() {
        let (controller, _rx, _repo) = setup();
        let result = controller.play(Track::new("zz", "t", "a", 1)).await;
        assert!(matches!(result, Err(JamplayError::TrackNotFound(_))));
        assert_eq!(controller.session().status, PlaybackStatus::Idle);
    }

    #[tokio::test]
    async fn test_pause_resume_transitions() {
        let (controller, _rx, _repo) = setup();
        controller.play(fake::track("01")).await.unwrap();

        controller.pause();
        assert_eq!(controller.session().status, PlaybackStatus::Paused);
        assert!(!controller.session().is_playing);

        controller.resume();
        assert_eq!(controller.session().status, PlaybackStatus::Playing);

        controller.toggle_playback();
        assert_eq!(controller.session().status, PlaybackStatus::Paused);
    }

    #[tokio::test]
    async fn test_seek_stays_within_duration() {
        let (controller, _rx, _repo) = setup();
        controller.play(fake::track("01")).await.unwrap();

        controller.seek_to(10_000_000);
        assert_eq!(controller.session().position_ms, 200_000);
        controller.seek_to(0);
        assert_eq!(controller.session().position_ms, 0);
        assert_eq!(controller.session().status, PlaybackStatus::Playing);
    }

    #[tokio::test]
    async fn test_playlist_skip_scenario() {
        let (controller, _rx, _repo) = setup();
        let queue = vec![fake::track("A"), fake::track("B"), fake::track("C")];
        controller.play_playlist(queue, 1).await.unwrap();
        assert_eq!(current_id(&controller).as_deref(), Some("B"));

        controller.skip_next().await.unwrap();
        assert_eq!(current_id(&controller).as_deref(), Some("C"));

        controller.skip_previous().await.unwrap();
        controller.skip_previous().await.unwrap();
        assert_eq!(current_id(&controller).as_deref(), Some("A"));

        controller.seek_to(5_000);
        controller.skip_previous().await.unwrap();
        assert_eq!(current_id(&controller).as_deref(), Some("A"));
        assert_eq!(controller.session().position_ms, 0);
    }

    #[tokio::test]
    async fn test_skip_next_at_end_stops() {
        let (controller, _rx, _repo) = setup();
        controller.play(fake::track("03")).await.unwrap();
        controller.skip_next().await.unwrap();

        let session = controller.session();
        assert_eq!(session.status, PlaybackStatus::Idle);
        assert!(session.current_track.is_none());
    }

    #[tokio::test]
    async fn test_skip_past_single_track_uses_repository_order() {
        let (controller, _rx, repo) = setup();
        repo.get_tracks().await.unwrap();
        controller.play(fake::track("02")).await.unwrap();

        controller.skip_next().await.unwrap();
        assert_eq!(current_id(&controller).as_deref(), Some("03"));
        assert_eq!(controller.session().status, PlaybackStatus::Playing);

        controller.skip_previous().await.unwrap();
        controller.skip_previous().await.unwrap();
        assert_eq!(current_id(&controller).as_deref(), Some("01"));

        controller.seek_to(5_000);
        controller.skip_previous().await.unwrap();
        assert_eq!(current_id(&controller).as_deref(), Some("01"));
        assert_eq!(controller.session().position_ms, 0);

        let recent: Vec<String> = repo
            .get_recent_plays()
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.id)
            .collect();
        assert_eq!(recent, vec!["01", "02", "03"]);
    }

    #[tokio::test]
    async fn test_stale_transition_after_stop_is_ignored() {
        let (controller, _rx, _repo) = setup();
        let queue = vec![fake::track("A"), fake::track("B")];
        controller.play_playlist(queue, 0).await.unwrap();
        controller.stop();

        let advanced = controller.handle_event(EngineEvent::TrackTransition {
            index: 1,
            reason: TransitionReason::Auto,
        });
        assert!(advanced.is_none());
        assert_eq!(controller.session(), PlaybackSession::default());
    }

    #[tokio::test]
    async fn test_bad_start_index_surfaces_error() {
        let (controller, _rx, _repo) = setup();
        assert!(controller.play_playlist(Vec::new(), 0).await.is_err());
        assert!(controller
            .play_playlist(vec![fake::track("A")], 3)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_engine_events_drive_session() {
        let (controller, _rx, _repo) = setup();
        let queue = vec![fake::track("A"), fake::track("B")];
        controller.play_playlist(queue, 0).await.unwrap();

        let advanced = controller.handle_event(EngineEvent::TrackTransition {
            index: 1,
            reason: TransitionReason::Auto,
        });
        assert_eq!(advanced.map(|t| t.id).as_deref(), Some("B"));
        assert_eq!(current_id(&controller).as_deref(), Some("B"));

        controller.handle_event(EngineEvent::Progress {
            position_ms: 1_500,
            duration_ms: 200_000,
            buffered_ms: 9_000,
        });
        let session = controller.session();
        assert_eq!(session.position_ms, 1_500);
        assert_eq!(session.buffered_ms, 9_000);

        controller.handle_event(EngineEvent::Error("decoder failed".to_string()));
        assert!(matches!(controller.session().status, PlaybackStatus::Error(_)));
        assert!(!controller.session().is_playing);
    }

    #[tokio::test]
    async fn test_toggle_favorite_updates_current_track() {
        let (controller, _rx, repo) = setup();
        assert_eq!(controller.toggle_favorite().await.unwrap(), None);

        repo.get_tracks().await.unwrap();
        controller.play(fake::track("02")).await.unwrap();
        assert_eq!(controller.toggle_favorite().await.unwrap(), Some(true));
        assert!(controller.session().current_track.unwrap().is_favorite);
        assert_eq!(repo.get_favorite_tracks().await.unwrap()[0].id, "02");
    }
}
