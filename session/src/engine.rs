//! The media engine seen from the controller: commands go out through
//! [`MediaEngine`], callbacks come back through an [`EngineSink`] that may be
//! called from any thread.

use tokio::{select, sync::mpsc};
use url::Url;

use crate::{
    error::EngineError,
    latest::{self, latest},
    ticks::Ticks,
};

pub type EngineResult<T> = Result<T, EngineError>;

/// States as reported by the engine itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Opening,
    Buffering,
    EsAdded,
    Playing,
    Paused,
    Stopped,
    Ended,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OpenOptions {
    pub start: Ticks,
    pub autoplay: bool,
    pub external_subtitles: Vec<Url>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EngineCommand {
    Open { url: Url, options: OpenOptions },
    Play,
    Pause,
    Stop,
    SetRate(f32),
    JumpForward(u32),
    JumpBackward(u32),
    SetAudioTrack(i32),
    SetSubtitleTrack(i32),
    SetSubtitleDelay(Ticks),
    SetSubtitleColor(Rgb),
    SetSubtitleFont(String),
    SetSubtitleSize(u32),
}

/// Implementations must not block, every command is fire and forget. The
/// effect of a command is observed through the next callback.
pub trait MediaEngine: Send {
    fn open(&mut self, url: &Url, options: &OpenOptions) -> EngineResult<()>;
    fn play(&mut self) -> EngineResult<()>;
    fn pause(&mut self) -> EngineResult<()>;
    fn stop(&mut self) -> EngineResult<()>;
    fn set_rate(&mut self, rate: f32) -> EngineResult<()>;
    fn jump_forward(&mut self, seconds: u32) -> EngineResult<()>;
    fn jump_backward(&mut self, seconds: u32) -> EngineResult<()>;
    fn set_audio_track(&mut self, index: i32) -> EngineResult<()>;
    /// -1 disables subtitles.
    fn set_subtitle_track(&mut self, index: i32) -> EngineResult<()>;
    fn set_subtitle_delay(&mut self, delay: Ticks) -> EngineResult<()>;
    fn set_subtitle_color(&mut self, color: Rgb) -> EngineResult<()>;
    fn set_subtitle_font(&mut self, font: &str) -> EngineResult<()>;
    fn set_subtitle_size(&mut self, size: u32) -> EngineResult<()>;
}

impl EngineCommand {
    pub fn apply(&self, engine: &mut dyn MediaEngine) -> EngineResult<()> {
        use EngineCommand::*;
        match self {
            Open { url, options } => engine.open(url, options),
            Play => engine.play(),
            Pause => engine.pause(),
            Stop => engine.stop(),
            SetRate(rate) => engine.set_rate(*rate),
            JumpForward(s) => engine.jump_forward(*s),
            JumpBackward(s) => engine.jump_backward(*s),
            SetAudioTrack(i) => engine.set_audio_track(*i),
            SetSubtitleTrack(i) => engine.set_subtitle_track(*i),
            SetSubtitleDelay(d) => engine.set_subtitle_delay(*d),
            SetSubtitleColor(c) => engine.set_subtitle_color(*c),
            SetSubtitleFont(f) => engine.set_subtitle_font(f),
            SetSubtitleSize(s) => engine.set_subtitle_size(*s),
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self, EngineCommand::Open { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EngineEvent {
    State(EngineState),
    Time(Ticks),
}

/// Handed to the engine. Cheap to clone and safe to call from the engine's
/// own threads, nothing here touches session state directly.
#[derive(Clone)]
pub struct EngineSink {
    states: mpsc::UnboundedSender<EngineState>,
    times: latest::Sender<i64>,
}

/// Controller side of [`EngineSink`].
pub struct EngineFeed {
    states: mpsc::UnboundedReceiver<EngineState>,
    times: latest::Receiver<i64>,
}

pub fn engine_channel() -> (EngineSink, EngineFeed) {
    let (states_tx, states_rx) = mpsc::unbounded_channel();
    let (times_tx, times_rx) = latest();
    (
        EngineSink {
            states: states_tx,
            times: times_tx,
        },
        EngineFeed {
            states: states_rx,
            times: times_rx,
        },
    )
}

impl EngineSink {
    pub fn state_changed(&self, state: EngineState) {
        if self.states.send(state).is_err() {
            log::debug!("Session is gone, dropping engine state {:?}", state);
        }
    }

    pub fn time_changed(&self, millis: i64) {
        if self.times.send(millis).is_err() {
            log::trace!("Session is gone, dropping engine time {}", millis);
        }
    }
}

impl EngineFeed {
    /// State changes are never dropped and win over time updates. Of the time
    /// updates only the newest one is kept. `None` once every sink is gone.
    pub async fn next(&mut self) -> Option<EngineEvent> {
        select! {
            biased;
            Some(state) = self.states.recv() => Some(EngineEvent::State(state)),
            Ok(millis) = self.times.recv() => Some(EngineEvent::Time(Ticks::from_millis(millis))),
            else => None,
        }
    }

    /// Drops a time update that is still waiting, it belongs to whatever the
    /// engine played before.
    pub fn discard_time(&mut self) {
        if let Some(millis) = self.times.try_recv() {
            log::debug!("Discarding stale engine time {}", millis);
        }
    }
}
