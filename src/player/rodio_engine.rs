//! Audio output through rodio.
//!
//! The output stream is not `Send`, so it lives on a dedicated audio thread
//! that takes commands over a channel. Media is downloaded in full on the
//! tokio runtime before it is decoded. The engine reconciles both sides on
//! every [`MediaEngine::poll`].

use std::io::Cursor;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use futures_util::StreamExt;
use rodio::{Decoder, OutputStream, Sink, Source};
use tokio::runtime::Handle;
use tracing::{debug, error, info, warn};

use super::engine::{
    EngineEvent, EngineState, EventReceiver, EventSender, MediaEngine, MediaItem,
    TransitionReason,
};
use crate::error::{JamplayError, Result};

enum Command {
    Load { bytes: Vec<u8>, generation: u64 },
    Play,
    Pause,
    Seek(Duration),
    Stop,
}

/// State written by the download task and the audio thread.
#[derive(Debug, Default)]
struct Shared {
    /// Bumped on every load request; stale work is discarded.
    generation: u64,
    downloaded: u64,
    content_length: Option<u64>,
    decoded_duration: Option<Duration>,
    ready: bool,
    finished: bool,
    error: Option<String>,
}

fn lock(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    match shared.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Wall-clock position tracking, since the sink does not report one.
#[derive(Debug, Default)]
struct Playhead {
    base: Duration,
    resumed_at: Option<Instant>,
}

impl Playhead {
    fn position(&self) -> Duration {
        self.base + self.resumed_at.map_or(Duration::ZERO, |t| t.elapsed())
    }

    fn pause(&mut self) {
        self.base = self.position();
        self.resumed_at = None;
    }

    fn resume(&mut self) {
        if self.resumed_at.is_none() {
            self.resumed_at = Some(Instant::now());
        }
    }

    fn reset(&mut self, position: Duration) {
        let running = self.resumed_at.is_some();
        self.base = position;
        self.resumed_at = running.then(Instant::now);
    }
}

/// Plays queue items on the default output device.
#[derive(Debug)]
pub struct RodioEngine {
    queue: Vec<MediaItem>,
    index: Option<usize>,
    state: EngineState,
    play_when_ready: bool,
    playhead: Playhead,
    commands: Sender<Command>,
    shared: Arc<Mutex<Shared>>,
    client: reqwest::Client,
    runtime: Handle,
    events: EventSender,
}

impl RodioEngine {
    /// Open the default output device. Must be called inside a tokio runtime.
    pub fn new(client: reqwest::Client) -> Result<(Self, EventReceiver)> {
        let runtime = Handle::try_current()
            .map_err(|e| JamplayError::Engine(format!("no tokio runtime: {}", e)))?;
        let shared = Arc::new(Mutex::new(Shared::default()));
        let (commands, command_rx) = mpsc::channel();
        let (init_tx, init_rx) = mpsc::sync_channel(1);

        let thread_shared = Arc::clone(&shared);
        thread::Builder::new()
            .name("jamplay-audio".to_string())
            .spawn(move || audio_thread(command_rx, thread_shared, init_tx))?;

        init_rx
            .recv()
            .map_err(|_| JamplayError::Engine("audio thread exited".to_string()))?
            .map_err(JamplayError::Engine)?;
        info!("Opened default audio output");

        let (events, rx) = tokio::sync::mpsc::unbounded_channel();
        let engine = Self {
            queue: Vec::new(),
            index: None,
            state: EngineState::Idle,
            play_when_ready: false,
            playhead: Playhead::default(),
            commands,
            shared,
            client,
            runtime,
            events,
        };
        Ok((engine, rx))
    }

    fn emit(&self, event: EngineEvent) {
        let _ = self.events.send(event);
    }

    fn send(&self, command: Command) {
        if self.commands.send(command).is_err() {
            error!("Audio thread is gone");
        }
    }

    fn current(&self) -> Option<&MediaItem> {
        self.index.and_then(|i| self.queue.get(i))
    }

    fn transition<F: FnOnce(&mut Self)>(&mut self, f: F) {
        let state = self.state;
        let playing = self.is_playing();
        f(self);
        if self.state != state {
            self.emit(EngineEvent::StateChanged(self.state));
        }
        let now_playing = self.is_playing();
        if now_playing != playing {
            if now_playing {
                self.playhead.resume();
                self.send(Command::Play);
            } else {
                self.playhead.pause();
                self.send(Command::Pause);
            }
            self.emit(EngineEvent::IsPlayingChanged(now_playing));
        }
    }

    fn jump(&mut self, index: usize, reason: TransitionReason) -> Result<()> {
        self.index = Some(index);
        self.emit(EngineEvent::TrackTransition { index, reason });
        self.prepare()
    }

    /// Kick off the download of the current item.
    fn start_download(&mut self, item: MediaItem) {
        let generation = {
            let mut shared = lock(&self.shared);
            let next = shared.generation + 1;
            *shared = Shared {
                generation: next,
                ..Shared::default()
            };
            next
        };
        self.send(Command::Stop);

        let client = self.client.clone();
        let shared = Arc::clone(&self.shared);
        let commands = self.commands.clone();
        self.runtime.spawn(async move {
            match download(&client, &item.uri, &shared, generation).await {
                Ok(Some(bytes)) => {
                    debug!("Downloaded {} ({} bytes)", item.id, bytes.len());
                    let _ = commands.send(Command::Load { bytes, generation });
                }
                Ok(None) => debug!("Dropped stale download of {}", item.id),
                Err(e) => {
                    warn!("Download of {} failed: {}", item.id, e);
                    let mut shared = lock(&shared);
                    if shared.generation == generation {
                        shared.error = Some(e.to_string());
                    }
                }
            }
        });
    }
}

async fn download(
    client: &reqwest::Client,
    uri: &str,
    shared: &Mutex<Shared>,
    generation: u64,
) -> Result<Option<Vec<u8>>> {
    let response = client.get(uri).send().await?.error_for_status()?;
    lock(shared).content_length = response.content_length();

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        bytes.extend_from_slice(&chunk);
        let mut shared = lock(shared);
        if shared.generation != generation {
            return Ok(None);
        }
        shared.downloaded = bytes.len() as u64;
    }
    Ok(Some(bytes))
}

fn audio_thread(
    commands: Receiver<Command>,
    shared: Arc<Mutex<Shared>>,
    init: mpsc::SyncSender<std::result::Result<(), String>>,
) {
    let (_stream, handle) = match OutputStream::try_default() {
        Ok(output) => output,
        Err(e) => {
            let _ = init.send(Err(format!("no audio output: {}", e)));
            return;
        }
    };
    let _ = init.send(Ok(()));
    let mut sink: Option<Sink> = None;

    loop {
        match commands.recv_timeout(Duration::from_millis(100)) {
            Ok(Command::Load { bytes, generation }) => {
                if let Some(old) = sink.take() {
                    old.stop();
                }
                let loaded = Decoder::new(Cursor::new(bytes))
                    .map_err(|e| e.to_string())
                    .and_then(|source| {
                        let new_sink = Sink::try_new(&handle).map_err(|e| e.to_string())?;
                        new_sink.pause();
                        let duration = source.total_duration();
                        new_sink.append(source);
                        Ok((new_sink, duration))
                    });
                let mut state = lock(&shared);
                if state.generation != generation {
                    continue;
                }
                match loaded {
                    Ok((new_sink, duration)) => {
                        state.decoded_duration = duration;
                        state.ready = true;
                        sink = Some(new_sink);
                    }
                    Err(e) => state.error = Some(e),
                }
            }
            Ok(Command::Play) => {
                if let Some(s) = &sink {
                    s.play();
                }
            }
            Ok(Command::Pause) => {
                if let Some(s) = &sink {
                    s.pause();
                }
            }
            Ok(Command::Seek(position)) => {
                if let Some(s) = &sink {
                    if let Err(e) = s.try_seek(position) {
                        warn!("Seek failed: {}", e);
                    }
                }
            }
            Ok(Command::Stop) => {
                if let Some(s) = sink.take() {
                    s.stop();
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }

        if sink.as_ref().is_some_and(|s| s.empty()) {
            lock(&shared).finished = true;
        }
    }
    debug!("Audio thread stopped");
}

impl MediaEngine for RodioEngine {
    fn set_queue(&mut self, items: Vec<MediaItem>, start_index: usize) -> Result<()> {
        if start_index >= items.len() {
            return Err(JamplayError::Engine(format!(
                "start index {} out of range for {} items",
                start_index,
                items.len()
            )));
        }
        self.stop();
        self.queue = items;
        self.index = Some(start_index);
        self.emit(EngineEvent::TrackTransition {
            index: start_index,
            reason: TransitionReason::QueueChanged,
        });
        Ok(())
    }

    fn prepare(&mut self) -> Result<()> {
        let item = self
            .current()
            .cloned()
            .ok_or_else(|| JamplayError::Engine("nothing to prepare".to_string()))?;
        self.transition(|engine| {
            engine.state = EngineState::Buffering;
            engine.playhead = Playhead::default();
        });
        self.start_download(item);
        Ok(())
    }

    fn set_play_when_ready(&mut self, play: bool) {
        self.transition(|engine| engine.play_when_ready = play);
    }

    fn play_when_ready(&self) -> bool {
        self.play_when_ready
    }

    fn stop(&mut self) {
        lock(&self.shared).generation += 1;
        self.send(Command::Stop);
        self.transition(|engine| {
            engine.queue.clear();
            engine.index = None;
            engine.play_when_ready = false;
            engine.state = EngineState::Idle;
        });
        self.playhead = Playhead::default();
    }

    fn seek_to(&mut self, position_ms: u64) {
        if self.state == EngineState::Ended {
            // The sink drained; reload the item from the start.
            if let Err(e) = self.prepare() {
                self.emit(EngineEvent::Error(e.to_string()));
            }
            return;
        }
        let position_ms = self.duration().map_or(position_ms, |d| position_ms.min(d));
        let position = Duration::from_millis(position_ms);
        self.send(Command::Seek(position));
        self.playhead.reset(position);
        lock(&self.shared).finished = false;
    }

    fn seek_to_next(&mut self) -> Result<()> {
        match self.index {
            Some(i) if self.has_next() => self.jump(i + 1, TransitionReason::Seek),
            _ => Err(JamplayError::Engine("no next item".to_string())),
        }
    }

    fn seek_to_previous(&mut self) -> Result<()> {
        match self.index {
            Some(i) if i > 0 => self.jump(i - 1, TransitionReason::Seek),
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
        let position = self.playhead.position().as_millis() as u64;
        self.duration().map_or(position, |d| position.min(d))
    }

    fn duration(&self) -> Option<u64> {
        self.current()
            .map(|item| item.duration_ms)
            .filter(|d| *d > 0)
            .or_else(|| {
                lock(&self.shared)
                    .decoded_duration
                    .map(|d| d.as_millis() as u64)
            })
    }

    fn buffered(&self) -> u64 {
        let duration = self.duration().unwrap_or(0);
        let shared = lock(&self.shared);
        match shared.content_length {
            _ if shared.ready => duration,
            Some(total) if total > 0 => duration * shared.downloaded.min(total) / total,
            _ => 0,
        }
    }

    fn state(&self) -> EngineState {
        self.state
    }

    fn poll(&mut self) {
        let (ready, finished, failure) = {
            let mut shared = lock(&self.shared);
            (shared.ready, shared.finished, shared.error.take())
        };

        if let Some(message) = failure {
            self.transition(|engine| engine.state = EngineState::Idle);
            self.emit(EngineEvent::Error(message));
            return;
        }

        if self.state == EngineState::Buffering && ready {
            self.transition(|engine| engine.state = EngineState::Ready);
        } else if self.state == EngineState::Ready && finished {
            lock(&self.shared).finished = false;
            match self.index {
                Some(i) if self.has_next() => {
                    if let Err(e) = self.jump(i + 1, TransitionReason::Auto) {
                        self.emit(EngineEvent::Error(e.to_string()));
                    }
                }
                _ => self.transition(|engine| engine.state = EngineState::Ended),
            }
        }

        if self.state != EngineState::Idle {
            self.emit(EngineEvent::Progress {
                position_ms: self.position(),
                duration_ms: self.duration().unwrap_or(0),
                buffered_ms: self.buffered(),
            });
        }
    }
}
