use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, warn};
use url::Url;

use crate::config::ClientConfig;
use crate::error::{AudioError, ConfigError, PlaybackError};
use crate::summary::{PlaybackQueue, Summary};

/// The audio device. Only the scheduler drives it.
#[async_trait]
pub trait AudioOutput: Send + Sync {
    /// Loads `url` as the current source and starts playing it.
    ///
    /// The source switches as soon as the call is made. A later `play`,
    /// `pause` or `stop` supersedes a `play` still in flight, which may then
    /// resolve with an error.
    async fn play(&self, url: &Url) -> Result<(), AudioError>;

    async fn pause(&self) -> Result<(), AudioError>;

    async fn resume(&self) -> Result<(), AudioError>;

    async fn stop(&self);

    /// Hint to fetch the metadata of `url` ahead of time. Must not block.
    fn preload(&self, url: &Url) -> Result<(), AudioError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackStatus {
    Idle,
    Playing,
    Paused,
}

/// Read-only view of the scheduler state, for rendering.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackSnapshot {
    pub status: PlaybackStatus,
    pub current_index: Option<usize>,
    pub playing: bool,
    pub auto_advance: bool,
    pub queue_len: usize,
    pub current: Option<Summary>,
    /// Index of a play request still loading, if any.
    pub pending_index: Option<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackEvent {
    StateChanged(PlaybackSnapshot),
    Failed(PlaybackError),
}

struct PlaybackState {
    queue: PlaybackQueue,
    current_index: Option<usize>,
    playing: bool,
    auto_advance: bool,
    // bumped by every request that makes in-flight completions stale
    generation: u64,
    pending: Option<usize>,
    preloaded: Option<Url>,
}

impl PlaybackState {
    fn status(&self) -> PlaybackStatus {
        match (self.current_index, self.playing) {
            (None, _) => PlaybackStatus::Idle,
            (Some(_), true) => PlaybackStatus::Playing,
            (Some(_), false) => PlaybackStatus::Paused,
        }
    }

    fn snapshot(&self) -> PlaybackSnapshot {
        PlaybackSnapshot {
            status: self.status(),
            current_index: self.current_index,
            playing: self.playing,
            auto_advance: self.auto_advance,
            queue_len: self.queue.len(),
            current: self
                .current_index
                .and_then(|index| self.queue.get(index))
                .cloned(),
            pending_index: self.pending,
        }
    }

    fn go_idle(&mut self) {
        self.current_index = None;
        self.playing = false;
    }

    fn identity_at(&self, index: Option<usize>) -> Option<String> {
        index
            .and_then(|index| self.queue.get(index))
            .map(|summary| summary.identity().to_owned())
    }

    fn position_of(&self, identity: &str) -> Option<usize> {
        self.queue
            .iter()
            .position(|summary| summary.identity() == identity)
    }

    fn current_path(&self) -> String {
        self.current_index
            .and_then(|index| self.queue.get(index))
            .map(|summary| summary.audio_path.clone())
            .unwrap_or_default()
    }
}

/// Resolves a summary's relative `audio_path` to a playable URL.
pub fn resolve_audio_url(base: &Url, audio_path: &str) -> Result<Url, PlaybackError> {
    base.join(audio_path)
        .map_err(|e| PlaybackError::InvalidAssetPath {
            path: audio_path.to_owned(),
            reason: e.to_string(),
        })
}

/// Sequences playback over a date view: current item, play/pause,
/// auto-advance and look-ahead preloading of the next item.
///
/// Device calls happen outside the state lock. Each play request takes a new
/// generation; a completion whose generation is stale is discarded, so the
/// last requested item wins regardless of which load settles first.
pub struct PlaybackScheduler {
    output: Arc<dyn AudioOutput>,
    audio_base: Url,
    state: Mutex<PlaybackState>,
    events: broadcast::Sender<PlaybackEvent>,
}

impl PlaybackScheduler {
    pub fn new(output: Arc<dyn AudioOutput>, audio_base: Url) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            output,
            audio_base,
            state: Mutex::new(PlaybackState {
                queue: Vec::new(),
                current_index: None,
                playing: false,
                auto_advance: false,
                generation: 0,
                pending: None,
                preloaded: None,
            }),
            events,
        }
    }

    pub fn from_config(
        output: Arc<dyn AudioOutput>,
        config: &ClientConfig,
    ) -> Result<Self, ConfigError> {
        let mut scheduler = Self::new(output, config.api.audio_base_url()?);
        scheduler.state.get_mut().auto_advance = config.playback.auto_advance;
        Ok(scheduler)
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<PlaybackEvent> {
        self.events.subscribe()
    }

    pub async fn snapshot(&self) -> PlaybackSnapshot {
        self.state.lock().await.snapshot()
    }

    pub async fn queue(&self) -> PlaybackQueue {
        self.state.lock().await.queue.clone()
    }

    fn emit(&self, event: PlaybackEvent) {
        // no receiver is fine
        let _ = self.events.send(event);
    }

    fn emit_state(&self, snapshot: &PlaybackSnapshot) {
        self.emit(PlaybackEvent::StateChanged(snapshot.clone()));
    }

    fn fail(&self, error: PlaybackError) -> PlaybackError {
        warn!(error = %error, "playback failure");
        self.emit(PlaybackEvent::Failed(error.clone()));
        error
    }

    // Best effort; a failed preload is retried only by actually playing the item.
    fn preload_next(&self, state: &mut PlaybackState) {
        let Some(next) = state.current_index.and_then(|index| state.queue.get(index + 1)) else {
            return;
        };
        let url = match resolve_audio_url(&self.audio_base, &next.audio_path) {
            Ok(url) => url,
            Err(err) => {
                debug!(error = %err, "skipping preload");
                return;
            }
        };
        if state.preloaded.as_ref() == Some(&url) {
            return;
        }
        if let Err(err) = self.output.preload(&url) {
            debug!(%url, error = %err, "preload failed");
        }
        state.preloaded = Some(url);
    }

    /// Loads and plays `queue[index]`.
    ///
    /// Out of range indices are rejected without touching the device. On a
    /// device failure the previous state is kept. If another play was
    /// requested while this one was loading, this one's outcome is dropped
    /// and the current snapshot is returned.
    pub async fn play(&self, index: usize) -> Result<PlaybackSnapshot, PlaybackError> {
        let (generation, url, path) = {
            let mut state = self.state.lock().await;
            let len = state.queue.len();
            let Some(item) = state.queue.get(index) else {
                return Err(PlaybackError::IndexOutOfRange { index, len });
            };
            let path = item.audio_path.clone();
            let url = resolve_audio_url(&self.audio_base, &path).map_err(|e| self.fail(e))?;
            state.generation += 1;
            state.pending = Some(index);
            (state.generation, url, path)
        };

        debug!(index, %url, "loading audio");
        let result = self.output.play(&url).await;

        let mut state = self.state.lock().await;
        if state.generation != generation {
            debug!(index, "play superseded by a later request");
            // the lock is held so no newer request slips in before this
            if state.pending.is_none() {
                match state.status() {
                    PlaybackStatus::Idle => self.output.stop().await,
                    PlaybackStatus::Paused => {
                        if let Err(err) = self.output.pause().await {
                            debug!(error = %err, "pause after superseded play failed");
                        }
                    }
                    PlaybackStatus::Playing => {}
                }
            }
            return Ok(state.snapshot());
        }
        // a queue refresh may have moved the requested item
        let index = state.pending.take().unwrap_or(index);
        match result {
            Ok(()) => {
                let changed = state.current_index != Some(index);
                state.current_index = Some(index);
                state.playing = true;
                if changed {
                    self.preload_next(&mut state);
                }
                let snapshot = state.snapshot();
                drop(state);
                info!(index, path = %path, "playing");
                self.emit_state(&snapshot);
                Ok(snapshot)
            }
            Err(err) => {
                drop(state);
                Err(self.fail(PlaybackError::Asset {
                    path,
                    message: err.to_string(),
                }))
            }
        }
    }

    /// Idle starts the first item, Playing pauses, Paused resumes.
    pub async fn toggle_play_pause(&self) -> Result<PlaybackSnapshot, PlaybackError> {
        enum Action {
            Start,
            Pause(u64),
            Resume(u64),
        }

        let action = {
            let mut state = self.state.lock().await;
            if let Some(target) = state.pending.take() {
                // Loading: adopt the requested item, paused.
                state.generation += 1;
                state.current_index = Some(target);
                state.playing = false;
                self.preload_next(&mut state);
                Action::Pause(state.generation)
            } else {
                match state.status() {
                    PlaybackStatus::Idle if state.queue.is_empty() => return Ok(state.snapshot()),
                    PlaybackStatus::Idle => Action::Start,
                    PlaybackStatus::Playing => Action::Pause(state.generation),
                    PlaybackStatus::Paused => Action::Resume(state.generation),
                }
            }
        };

        match action {
            Action::Start => self.play(0).await,
            Action::Pause(generation) => {
                let result = self.output.pause().await;
                let mut state = self.state.lock().await;
                if let Err(err) = result {
                    let path = state.current_path();
                    drop(state);
                    return Err(self.fail(PlaybackError::Asset {
                        path,
                        message: err.to_string(),
                    }));
                }
                if state.generation == generation {
                    state.playing = false;
                }
                let snapshot = state.snapshot();
                drop(state);
                debug!("paused");
                self.emit_state(&snapshot);
                Ok(snapshot)
            }
            Action::Resume(generation) => {
                let result = self.output.resume().await;
                let mut state = self.state.lock().await;
                if let Err(err) = result {
                    let path = state.current_path();
                    drop(state);
                    return Err(self.fail(PlaybackError::Asset {
                        path,
                        message: err.to_string(),
                    }));
                }
                if state.generation == generation && state.current_index.is_some() {
                    state.playing = true;
                }
                let snapshot = state.snapshot();
                drop(state);
                debug!("resumed");
                self.emit_state(&snapshot);
                Ok(snapshot)
            }
        }
    }

    /// Plays the item after the latest requested one; no-op on the last item.
    pub async fn next(&self) -> Result<PlaybackSnapshot, PlaybackError> {
        let target = {
            let state = self.state.lock().await;
            let target = match state.pending.or(state.current_index) {
                Some(index) => index + 1,
                None => 0,
            };
            if target >= state.queue.len() {
                return Ok(state.snapshot());
            }
            target
        };
        self.play(target).await
    }

    /// Plays the item before the latest requested one; no-op on the first item.
    pub async fn previous(&self) -> Result<PlaybackSnapshot, PlaybackError> {
        let target = {
            let state = self.state.lock().await;
            match state.pending.or(state.current_index) {
                Some(index) if index > 0 => index - 1,
                _ => return Ok(state.snapshot()),
            }
        };
        self.play(target).await
    }

    pub async fn set_auto_advance(&self, enabled: bool) -> PlaybackSnapshot {
        let mut state = self.state.lock().await;
        state.auto_advance = enabled;
        let snapshot = state.snapshot();
        drop(state);
        self.emit_state(&snapshot);
        snapshot
    }

    /// The device finished the current asset.
    pub async fn asset_ended(&self) -> Result<PlaybackSnapshot, PlaybackError> {
        let target = {
            let mut state = self.state.lock().await;
            let Some(index) = state.current_index else {
                return Ok(state.snapshot());
            };
            if state.pending.is_some() {
                // the device is already switching to another item
                return Ok(state.snapshot());
            }
            state.playing = false;
            if state.auto_advance && index + 1 < state.queue.len() {
                index + 1
            } else {
                state.go_idle();
                let snapshot = state.snapshot();
                drop(state);
                debug!(index, "reached end of playback");
                self.emit_state(&snapshot);
                return Ok(snapshot);
            }
        };
        self.play(target).await
    }

    /// The device reported an error on the current asset. Playback stops on
    /// the current item; nothing advances.
    pub async fn asset_error(&self, message: impl Into<String>) -> PlaybackError {
        let message = message.into();
        let path = {
            let mut state = self.state.lock().await;
            // while loading, the pending play reports its own failure
            if state.pending.is_none() && state.current_index.is_some() {
                state.playing = false;
            }
            state.current_path()
        };
        self.fail(PlaybackError::Asset { path, message })
    }

    /// Swaps in a new view.
    ///
    /// The current item, or the item still loading, is followed to its new
    /// position. Playback stops and the scheduler goes idle only when that
    /// item is gone from the new view.
    pub async fn replace_queue(&self, queue: PlaybackQueue) -> PlaybackSnapshot {
        let mut state = self.state.lock().await;
        let current = state.identity_at(state.current_index);
        let requested = state.identity_at(state.pending);
        state.queue = queue;

        let mut stop = false;
        let current_index = current.and_then(|id| state.position_of(&id));
        match requested {
            Some(requested) => match state.position_of(&requested) {
                Some(index) => {
                    state.pending = Some(index);
                    state.current_index = current_index;
                    if current_index.is_none() {
                        state.playing = false;
                    }
                }
                None => {
                    // the device already left the current item for this one
                    state.generation += 1;
                    state.pending = None;
                    state.go_idle();
                    stop = true;
                }
            },
            None => match current_index {
                Some(index) => {
                    state.current_index = Some(index);
                    self.preload_next(&mut state);
                }
                None => {
                    stop = state.current_index.is_some();
                    state.go_idle();
                }
            },
        }

        if stop {
            info!("current item left the view, stopping playback");
            self.output.stop().await;
        }
        let snapshot = state.snapshot();
        drop(state);
        self.emit_state(&snapshot);
        snapshot
    }
}
