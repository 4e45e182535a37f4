//! Media engine abstraction and the output-less [`SilentEngine`].

use std::time::Instant;

use tokio::sync::mpsc;
use tracing::debug;

use crate::error::{JamplayError, Result};
use crate::models::Track;

/// One entry of an engine queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaItem {
    /// Track id the item was built from.
    pub id: String,
    /// Streamable audio URI.
    pub uri: String,
    /// Duration in milliseconds, 0 if unknown.
    pub duration_ms: u64,
}

impl From<&Track> for MediaItem {
    fn from(track: &Track) -> Self {
        Self {
            id: track.id.clone(),
            uri: track.audio_url.clone(),
            duration_ms: track.duration_ms,
        }
    }
}

/// Engine lifecycle, independent of the play-when-ready flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EngineState {
    /// Nothing loaded or prepared.
    #[default]
    Idle,
    /// Preparing or fetching media.
    Buffering,
    /// Media ready; plays while play-when-ready is set.
    Ready,
    /// The last queue item finished.
    Ended,
}

/// Why the active queue index changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionReason {
    /// The previous item finished and the engine moved on by itself.
    Auto,
    /// An explicit next/previous request.
    Seek,
    /// A new queue was loaded.
    QueueChanged,
}

/// Notifications pushed by an engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    StateChanged(EngineState),
    IsPlayingChanged(bool),
    TrackTransition {
        index: usize,
        reason: TransitionReason,
    },
    Progress {
        position_ms: u64,
        duration_ms: u64,
        buffered_ms: u64,
    },
    Error(String),
}

/// Sender half handed to engines.
pub type EventSender = mpsc::UnboundedSender<EngineEvent>;

/// Receiver half consumed by the playback controller.
pub type EventReceiver = mpsc::UnboundedReceiver<EngineEvent>;

/// A queue-based media engine.
///
/// Implementations own the media pipeline and report changes through the
/// event channel they were created with. `is_playing` is authoritative: it is
/// true only while media is actually advancing.
pub trait MediaEngine: Send {
    /// Replace the queue, pointing at `start_index`. Leaves the engine idle.
    fn set_queue(&mut self, items: Vec<MediaItem>, start_index: usize) -> Result<()>;

    /// Start preparing the current item.
    fn prepare(&mut self) -> Result<()>;

    fn set_play_when_ready(&mut self, play: bool);

    fn play_when_ready(&self) -> bool;

    /// Release all items and return to [`EngineState::Idle`].
    fn stop(&mut self);

    /// Move within the current item. Positions past the end are clamped.
    fn seek_to(&mut self, position_ms: u64);

    fn seek_to_next(&mut self) -> Result<()>;

    fn seek_to_previous(&mut self) -> Result<()>;

    fn has_next(&self) -> bool;

    fn has_previous(&self) -> bool;

    fn current_index(&self) -> Option<usize>;

    fn is_playing(&self) -> bool;

    fn position(&self) -> u64;

    /// Duration of the current item, if known.
    fn duration(&self) -> Option<u64>;

    fn buffered(&self) -> u64;

    fn state(&self) -> EngineState;

    /// Advance internal clocks and emit progress. Called periodically by the
    /// controller's event loop.
    fn poll(&mut self);
}

/// Clock-driven engine that plays nothing.
///
/// Position advances with wall time while playing, items end at their
/// declared duration and the queue auto-advances. Used headless and in tests.
#[derive(Debug)]
pub struct SilentEngine {
    queue: Vec<MediaItem>,
    index: Option<usize>,
    state: EngineState,
    play_when_ready: bool,
    position_ms: u64,
    last_poll: Option<Instant>,
    events: EventSender,
}

impl SilentEngine {
    /// Create an engine and the receiver for its events.
    pub fn new() -> (Self, EventReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        let engine = Self {
            queue: Vec::new(),
            index: None,
            state: EngineState::Idle,
            play_when_ready: false,
            position_ms: 0,
            last_poll: None,
            events: tx,
        };
        (engine, rx)
    }

    fn emit(&self, event: EngineEvent) {
        // Nobody listening is fine.
        let _ = self.events.send(event);
    }

    fn current(&self) -> Option<&MediaItem> {
        self.index.and_then(|i| self.queue.get(i))
    }

    /// Apply `f`, then emit state and playing-flag changes it caused.
    fn transition<F: FnOnce(&mut Self)>(&mut self, f: F) {
        let state = self.state;
        let playing = self.is_playing();
        f(self);
        if self.state != state {
            self.emit(EngineEvent::StateChanged(self.state));
        }
        if self.is_playing() != playing {
            self.last_poll = self.is_playing().then(Instant::now);
            self.emit(EngineEvent::IsPlayingChanged(self.is_playing()));
        }
    }

    fn emit_progress(&self) {
        let duration_ms = self.duration().unwrap_or(0);
        self.emit(EngineEvent::Progress {
            position_ms: self.position_ms,
            duration_ms,
            buffered_ms: self.buffered(),
        });
    }

    fn jump(&mut self, index: usize, reason: TransitionReason) {
        self.transition(|engine| {
            engine.index = Some(index);
            engine.position_ms = 0;
            if engine.state == EngineState::Ended {
                engine.state = EngineState::Ready;
            }
        });
        self.emit(EngineEvent::TrackTransition { index, reason });
        self.emit_progress();
    }

    /// Move the clock forward by `elapsed_ms` of playback.
    ///
    /// Does nothing unless playing. Items with unknown duration never end.
    pub fn advance(&mut self, elapsed_ms: u64) {
        if !self.is_playing() {
            return;
        }
        let duration = self.duration().unwrap_or(0);
        self.position_ms = self.position_ms.saturating_add(elapsed_ms);

        if duration > 0 && self.position_ms >= duration {
            if self.has_next() {
                let next = self.index.map_or(0, |i| i + 1);
                debug!("Silent engine auto-advancing to item {}", next);
                self.jump(next, TransitionReason::Auto);
                return;
            }
            self.position_ms = duration;
            self.transition(|engine| engine.state = EngineState::Ended);
        }
        self.emit_progress();
    }
}

impl MediaEngine for SilentEngine {
    fn set_queue(&mut self, items: Vec<MediaItem>, start_index: usize) -> Result<()> {
        if start_index >= items.len() {
            return Err(JamplayError::Engine(format!(
                "start index {} out of range for {} items",
                start_index,
                items.len()
            )));
        }
        self.transition(|engine| {
            engine.queue = items;
            engine.index = Some(start_index);
            engine.position_ms = 0;
            engine.state = EngineState::Idle;
        });
        self.emit(EngineEvent::TrackTransition {
            index: start_index,
            reason: TransitionReason::QueueChanged,
        });
        Ok(())
    }

    fn prepare(&mut self) -> Result<()> {
        if self.current().is_none() {
            return Err(JamplayError::Engine("nothing to prepare".to_string()));
        }
        self.transition(|engine| engine.state = EngineState::Buffering);
        self.transition(|engine| engine.state = EngineState::Ready);
        self.emit_progress();
        Ok(())
    }

    fn set_play_when_ready(&mut self, play: bool) {
        self.transition(|engine| engine.play_when_ready = play);
    }

    fn play_when_ready(&self) -> bool {
        self.play_when_ready
    }

    fn stop(&mut self) {
        self.transition(|engine| {
            engine.queue.clear();
            engine.index = None;
            engine.position_ms = 0;
            engine.play_when_ready = false;
            engine.state = EngineState::Idle;
        });
    }

    fn seek_to(&mut self, position_ms: u64) {
        let duration = self.duration().unwrap_or(u64::MAX);
        self.transition(|engine| {
            engine.position_ms = position_ms.min(duration);
            if engine.state == EngineState::Ended && engine.position_ms < duration {
                engine.state = EngineState::Ready;
            }
        });
        self.emit_progress();
    }

    fn seek_to_next(&mut self) -> Result<()> {
        match self.index {
            Some(i) if self.has_next() => {
                self.jump(i + 1, TransitionReason::Seek);
                Ok(())
            }
            _ => Err(JamplayError::Engine("no next item".to_string())),
        }
    }

    fn seek_to_previous(&mut self) -> Result<()> {
        match self.index {
            Some(i) if i > 0 => {
                self.jump(i - 1, TransitionReason::Seek);
                Ok(())
            }
            _ => Err(JamplayError::Engine("no previous item".to_string())),
        }
    }

    fn has_next(&self) -> bool {
        self.index.is_some_and(|i| i + 1 < self.queue.len())
    }

    fn has_previous(&self) -> bool {
        self.index.is_some_and(|i| i > 0)
    }

    fn current_index(&self) -> Option<usize> {
        self.index
    }

    fn is_playing(&self) -> bool {
        self.state == EngineState::Ready && self.play_when_ready
    }

    fn position(&self) -> u64 {
        self.position_ms
    }

    fn duration(&self) -> Option<u64> {
        self.current()
            .map(|item| item.duration_ms)
            .filter(|d| *d > 0)
    }

    fn buffered(&self) -> u64 {
        match self.state {
            EngineState::Ready | EngineState::Ended => self.duration().unwrap_or(self.position_ms),
            _ => 0,
        }
    }

    fn state(&self) -> EngineState {
        self.state
    }

    fn poll(&mut self) {
        let now = Instant::now();
        if let Some(last) = self.last_poll.replace(now) {
            if self.is_playing() {
                self.advance(now.duration_since(last).as_millis() as u64);
            }
        }
    }
}
