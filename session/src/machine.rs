//! The playback state machine. It is synchronous and never does any I/O,
//! every input returns the [`Effect`]s the controller has to carry out.

use std::{fmt, sync::Arc, time::Duration};

use crate::{
    config::SessionConfig,
    engine::{EngineCommand, EngineState, OpenOptions, Rgb},
    error::{ReportKind, SessionError, SessionResult},
    item::{ItemId, PlaybackItem},
    report::{Report, ReportSession},
    ticks::Ticks,
    tracks::{audio_engine_index, subtitle_engine_index, TrackSelection},
};

const ENGINE_FAILURE: &str = "Unable to perform playback";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackState {
    Initial,
    LoadingItem,
    Buffering,
    Playing,
    Paused,
    Ended,
    Stopped,
    Error(String),
}

impl PlaybackState {
    pub fn name(&self) -> &'static str {
        match self {
            PlaybackState::Initial => "initial",
            PlaybackState::LoadingItem => "loadingItem",
            PlaybackState::Buffering => "buffering",
            PlaybackState::Playing => "playing",
            PlaybackState::Paused => "paused",
            PlaybackState::Ended => "ended",
            PlaybackState::Stopped => "stopped",
            PlaybackState::Error(_) => "error",
        }
    }

    /// An item is loaded and the engine is working on it.
    pub fn is_live(&self) -> bool {
        matches!(
            self,
            PlaybackState::LoadingItem
                | PlaybackState::Buffering
                | PlaybackState::Playing
                | PlaybackState::Paused
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PlaybackState::Ended | PlaybackState::Stopped | PlaybackState::Error(_)
        )
    }
}

impl fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlaybackState::Error(msg) => write!(f, "error({msg})"),
            s => write!(f, "{}", s.name()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverlayCommand {
    Arm(Duration),
    Cancel,
    Suspend,
    Resume,
}

/// Notifications for the UI layer.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    StateChanged(PlaybackState),
    OverlayShown,
    OverlayHidden,
    ReportSent(ReportKind),
    ReportFailed { kind: ReportKind, reason: String },
    Error(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    Engine(EngineCommand),
    Report(Report),
    Overlay(OverlayCommand),
    Notify(SessionEvent),
}

pub type Effects = Vec<Effect>;

/// Everything the UI displays, derived from the machine.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub item: Option<ItemId>,
    pub state: PlaybackState,
    pub position: Ticks,
    pub duration: Ticks,
    pub progress: f64,
    pub scrubbing: bool,
    pub scrub_progress: f64,
    pub scrub_seconds: i64,
    pub tracks: TrackSelection,
    pub overlay_visible: bool,
    pub rate: f32,
    pub chapter: Option<String>,
}

#[derive(Debug, Clone, Copy)]
struct Scrub {
    progress: f64,
}

pub struct Machine {
    config: SessionConfig,
    state: PlaybackState,
    item: Option<Arc<PlaybackItem>>,
    report: Option<ReportSession>,
    engine_live: bool,
    position: Ticks,
    engine_position: Ticks,
    scrub: Option<Scrub>,
    tracks: TrackSelection,
    overlay_visible: bool,
    rate: f32,
}

fn clamp_fraction(fraction: f64) -> f64 {
    if fraction.is_nan() {
        0.0
    } else {
        fraction.clamp(0.0, 1.0)
    }
}

fn saturate_u32(x: i64) -> u32 {
    u32::try_from(x).unwrap_or(u32::MAX)
}

impl Machine {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            state: PlaybackState::Initial,
            item: None,
            report: None,
            engine_live: false,
            position: Ticks::ZERO,
            engine_position: Ticks::ZERO,
            scrub: None,
            tracks: TrackSelection::default(),
            overlay_visible: true,
            rate: 1.0,
        }
    }

    pub fn state(&self) -> &PlaybackState {
        &self.state
    }

    pub fn position(&self) -> Ticks {
        self.position
    }

    pub fn engine_position(&self) -> Ticks {
        self.engine_position
    }

    pub fn item(&self) -> Option<&Arc<PlaybackItem>> {
        self.item.as_ref()
    }

    pub fn tracks(&self) -> TrackSelection {
        self.tracks
    }

    pub fn is_scrubbing(&self) -> bool {
        self.scrub.is_some()
    }

    pub fn overlay_visible(&self) -> bool {
        self.overlay_visible
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    fn duration(&self) -> Ticks {
        self.item.as_ref().map(|i| i.duration()).unwrap_or(Ticks::ZERO)
    }

    fn progress(&self) -> f64 {
        let duration = self.duration();
        if duration <= Ticks::ZERO {
            return 0.0;
        }
        clamp_fraction(self.position.get() as f64 / duration.get() as f64)
    }

    fn scrub_progress(&self) -> f64 {
        self.scrub.map(|s| s.progress).unwrap_or_else(|| self.progress())
    }

    fn scrub_seconds(&self) -> i64 {
        (self.scrub_progress() * self.duration().seconds() as f64).floor() as i64
    }

    pub fn snapshot(&self) -> Snapshot {
        let scrub_progress = self.scrub_progress();
        Snapshot {
            item: self.item.as_ref().map(|i| i.id().clone()),
            state: self.state.clone(),
            position: self.position,
            duration: self.duration(),
            progress: self.progress(),
            scrubbing: self.is_scrubbing(),
            scrub_progress,
            scrub_seconds: self.scrub_seconds(),
            tracks: self.tracks,
            overlay_visible: self.overlay_visible,
            rate: self.rate,
            chapter: self
                .item
                .as_ref()
                .and_then(|i| i.chapters().locate(scrub_progress))
                .map(|c| c.name.clone()),
        }
    }

    fn set_state(&mut self, fx: &mut Effects, state: PlaybackState) {
        if self.state == state {
            return;
        }
        log::info!("State '{}' exited", self.state.name());
        log::info!("Entered state '{}'", state);
        if state.is_terminal() && self.scrub.take().is_some() {
            log::debug!("Abandoning scrub gesture");
        }
        self.state = state.clone();
        fx.push(Effect::Notify(SessionEvent::StateChanged(state)));
    }

    fn ignored(&self, what: &str) {
        log::debug!("State '{}' ignored {}", self.state.name(), what);
    }

    fn engine(&self, fx: &mut Effects, cmd: EngineCommand) {
        if self.engine_live {
            fx.push(Effect::Engine(cmd));
        } else {
            log::debug!("Engine is not live, not sending {:?}", cmd);
        }
    }

    fn arm(&self, fx: &mut Effects, interval: Duration) {
        fx.push(Effect::Overlay(OverlayCommand::Arm(interval)));
    }

    fn show_overlay(&mut self, fx: &mut Effects) {
        if !self.overlay_visible {
            self.overlay_visible = true;
            fx.push(Effect::Notify(SessionEvent::OverlayShown));
        }
    }

    fn hide_overlay(&mut self, fx: &mut Effects) {
        if self.overlay_visible {
            self.overlay_visible = false;
            fx.push(Effect::Notify(SessionEvent::OverlayHidden));
        }
    }

    fn send_stop_report(&mut self, fx: &mut Effects) {
        let position = self.position;
        if let Some(report) = self.report.as_mut().and_then(|r| r.stop(position)) {
            fx.push(Effect::Report(report));
        }
    }

    /// Stop report and engine stop for whatever is currently loaded.
    fn release(&mut self, fx: &mut Effects) {
        self.send_stop_report(fx);
        self.engine(fx, EngineCommand::Stop);
        self.engine_live = false;
        fx.push(Effect::Overlay(OverlayCommand::Cancel));
    }

    /// A stopped or failed session never opens anything again.
    pub fn load(&mut self, item: Arc<PlaybackItem>) -> Effects {
        let mut fx = Effects::new();

        if matches!(self.state, PlaybackState::Stopped | PlaybackState::Error(_)) {
            self.ignored("load");
            return fx;
        }

        if let Some(current) = &self.item {
            if current.id() == item.id() && self.state.is_live() {
                log::debug!("Item '{}' is already loaded, ignoring load", item.id());
                return fx;
            }
        }

        if self.state != PlaybackState::Initial {
            log::info!("Replacing the current item with '{}'", item.id());
            self.release(&mut fx);
        }

        let start = item.start();
        let mut report = ReportSession::new(item.id().clone());
        if let Some(r) = report.start(start) {
            fx.push(Effect::Report(r));
        }

        self.report = Some(report);
        self.position = start;
        self.engine_position = start;
        self.scrub = None;
        self.rate = 1.0;
        self.tracks = TrackSelection {
            audio: (!item.audio().is_empty()).then_some(0),
            subtitle: None,
        };
        self.engine_live = true;
        self.engine(
            &mut fx,
            EngineCommand::Open {
                url: item.url().clone(),
                options: OpenOptions {
                    start,
                    autoplay: true,
                    external_subtitles: item.external_subtitle_urls(),
                },
            },
        );
        self.item = Some(item);
        self.set_state(&mut fx, PlaybackState::LoadingItem);
        self.show_overlay(&mut fx);
        fx
    }

    pub fn engine_state(&mut self, state: EngineState) -> Effects {
        match state {
            EngineState::Opening | EngineState::Buffering | EngineState::EsAdded => {
                self.engine_buffering()
            }
            EngineState::Playing => self.engine_playing(),
            EngineState::Paused => self.engine_paused(),
            EngineState::Ended | EngineState::Stopped => self.engine_ended(),
            EngineState::Error => self.engine_error(ENGINE_FAILURE),
        }
    }

    pub fn engine_buffering(&mut self) -> Effects {
        let mut fx = Effects::new();
        match self.state {
            PlaybackState::LoadingItem => self.set_state(&mut fx, PlaybackState::Buffering),
            _ => self.ignored("engineBuffering"),
        }
        fx
    }

    pub fn engine_playing(&mut self) -> Effects {
        let mut fx = Effects::new();
        match self.state {
            PlaybackState::Buffering | PlaybackState::Paused => {
                self.set_state(&mut fx, PlaybackState::Playing);
                self.arm(&mut fx, self.config.overlay_short);
            }
            _ => self.ignored("enginePlaying"),
        }
        fx
    }

    pub fn engine_paused(&mut self) -> Effects {
        let mut fx = Effects::new();
        match self.state {
            PlaybackState::Playing => {
                self.set_state(&mut fx, PlaybackState::Paused);
                self.arm(&mut fx, self.config.overlay_long);
            }
            _ => self.ignored("enginePaused"),
        }
        fx
    }

    pub fn engine_ended(&mut self) -> Effects {
        let mut fx = Effects::new();
        match self.state {
            PlaybackState::Playing | PlaybackState::Buffering | PlaybackState::Paused => {
                self.send_stop_report(&mut fx);
                self.set_state(&mut fx, PlaybackState::Ended);
            }
            _ => self.ignored("engineEnded"),
        }
        fx
    }

    /// Terminal for the session, the engine gets no further commands.
    pub fn engine_error(&mut self, message: impl Into<String>) -> Effects {
        let mut fx = Effects::new();
        let message = message.into();
        match self.state {
            PlaybackState::Stopped | PlaybackState::Error(_) => {
                self.ignored("engineError");
                return fx;
            }
            _ => (),
        }

        log::error!("Engine failed: {}", message);
        self.send_stop_report(&mut fx);
        self.engine_live = false;
        fx.push(Effect::Overlay(OverlayCommand::Cancel));
        self.set_state(&mut fx, PlaybackState::Error(message.clone()));
        self.show_overlay(&mut fx);
        fx.push(Effect::Notify(SessionEvent::Error(message)));
        fx
    }

    /// An engine command was rejected right away.
    pub fn engine_failed(&mut self, error: SessionError) -> Effects {
        self.engine_error(error.to_string())
    }

    pub fn engine_time(&mut self, ticks: Ticks) -> Effects {
        let mut fx = Effects::new();
        // Until the engine reports on the new item its times may be left over
        // from the previous one.
        if !self.state.is_live() || self.state == PlaybackState::LoadingItem {
            self.ignored("engine time");
            return fx;
        }

        self.engine_position = ticks;
        if self.is_scrubbing() {
            return fx;
        }

        let ticks = ticks.clamp(Ticks::ZERO, self.duration().max(Ticks::ZERO));
        if ticks.abs_diff(self.position) >= self.config.position_hysteresis.get() as u64 {
            self.position = ticks;
            if self.state == PlaybackState::Buffering {
                log::debug!("Engine time is moving, playing");
                fx.extend(self.engine_playing());
            }
        }
        fx
    }

    pub fn toggle(&mut self) -> Effects {
        let mut fx = Effects::new();
        match self.state {
            PlaybackState::Playing => {
                self.engine(&mut fx, EngineCommand::Pause);
                self.set_state(&mut fx, PlaybackState::Paused);
                self.arm(&mut fx, self.config.overlay_long);
            }
            PlaybackState::Paused => {
                self.engine(&mut fx, EngineCommand::Play);
                self.set_state(&mut fx, PlaybackState::Playing);
                self.arm(&mut fx, self.config.overlay_short);
            }
            _ => self.ignored("userToggle"),
        }
        fx
    }

    pub fn close(&mut self) -> Effects {
        let mut fx = Effects::new();
        match self.state {
            PlaybackState::Stopped => self.ignored("userClose"),
            _ => {
                self.release(&mut fx);
                self.set_state(&mut fx, PlaybackState::Stopped);
            }
        }
        fx
    }

    pub fn begin_scrub(&mut self) -> Effects {
        let mut fx = Effects::new();
        if !self.state.is_live() || self.is_scrubbing() {
            self.ignored("beginScrub");
            return fx;
        }
        self.scrub = Some(Scrub {
            progress: self.progress(),
        });
        fx.push(Effect::Overlay(OverlayCommand::Cancel));
        self.show_overlay(&mut fx);
        fx
    }

    pub fn set_scrub_progress(&mut self, progress: f64) -> Effects {
        match self.scrub.as_mut() {
            Some(scrub) => scrub.progress = clamp_fraction(progress),
            None => self.ignored("scrub progress"),
        }
        Effects::new()
    }

    /// Seeks relative to where the engine is. The engine's absolute seek is
    /// not reliable below a second.
    pub fn end_scrub(&mut self) -> Effects {
        let mut fx = Effects::new();
        let Some(scrub) = self.scrub.take() else {
            self.ignored("endScrub");
            return fx;
        };

        let duration_seconds = self.duration().seconds();
        let target = (scrub.progress * duration_seconds as f64).round() as i64;
        let offset = target - self.engine_position.seconds();
        log::debug!(
            "Scrubbed to {}s, engine at {}s",
            target,
            self.engine_position.seconds()
        );

        if offset > 0 {
            self.engine(&mut fx, EngineCommand::JumpForward(saturate_u32(offset)));
        } else if offset < 0 {
            self.engine(&mut fx, EngineCommand::JumpBackward(saturate_u32(-offset)));
        }

        self.position = Ticks::from_seconds(target);
        self.arm(&mut fx, self.config.overlay_short);
        fx
    }

    pub fn select_audio(&mut self, logical: usize) -> SessionResult<Effects> {
        let item = self.item.as_ref().ok_or(SessionError::NoItem)?;
        let index = audio_engine_index(item.audio(), logical)?;
        let mut fx = Effects::new();
        self.tracks.audio = Some(logical);
        if self.state.is_live() {
            self.engine(&mut fx, EngineCommand::SetAudioTrack(index));
        }
        Ok(fx)
    }

    pub fn select_subtitle(&mut self, logical: Option<usize>) -> SessionResult<Effects> {
        let item = self.item.as_ref().ok_or(SessionError::NoItem)?;
        let index = subtitle_engine_index(item.audio().len(), item.subtitles(), logical)?;
        let mut fx = Effects::new();
        self.tracks.subtitle = logical;
        if self.state.is_live() {
            self.engine(&mut fx, EngineCommand::SetSubtitleTrack(index));
        }
        Ok(fx)
    }

    pub fn toggle_subtitles(&mut self) -> SessionResult<Effects> {
        let item = self.item.as_ref().ok_or(SessionError::NoItem)?;
        let has_subtitles = !item.subtitles().is_empty();
        match self.tracks.subtitle {
            Some(_) => self.select_subtitle(None),
            None if has_subtitles => self.select_subtitle(Some(0)),
            None => Ok(Effects::new()),
        }
    }

    pub fn set_rate(&mut self, rate: f32) -> SessionResult<Effects> {
        if !rate.is_finite() || rate <= 0.0 {
            return Err(SessionError::InvalidRate(rate));
        }
        if self.item.is_none() {
            return Err(SessionError::NoItem);
        }
        let mut fx = Effects::new();
        self.rate = rate;
        if self.state.is_live() {
            self.engine(&mut fx, EngineCommand::SetRate(rate));
        }
        Ok(fx)
    }

    fn jump(&mut self, cmd: EngineCommand, name: &str) -> Effects {
        let mut fx = Effects::new();
        match self.state {
            PlaybackState::Buffering | PlaybackState::Playing | PlaybackState::Paused
                if !self.is_scrubbing() =>
            {
                self.engine(&mut fx, cmd);
                self.show_overlay(&mut fx);
                self.arm(&mut fx, self.config.overlay_short);
            }
            _ => self.ignored(name),
        }
        fx
    }

    pub fn jump_forward(&mut self) -> Effects {
        let seconds = saturate_u32(self.config.jump_forward.as_secs() as i64);
        self.jump(EngineCommand::JumpForward(seconds), "jumpForward")
    }

    pub fn jump_backward(&mut self) -> Effects {
        let seconds = saturate_u32(self.config.jump_backward.as_secs() as i64);
        self.jump(EngineCommand::JumpBackward(seconds), "jumpBackward")
    }

    fn style(&mut self, cmd: EngineCommand) -> Effects {
        let mut fx = Effects::new();
        if self.state.is_live() {
            self.engine(&mut fx, cmd);
        } else {
            self.ignored("subtitle style");
        }
        fx
    }

    pub fn set_subtitle_delay(&mut self, delay: Ticks) -> Effects {
        self.style(EngineCommand::SetSubtitleDelay(delay))
    }

    pub fn set_subtitle_color(&mut self, color: Rgb) -> Effects {
        self.style(EngineCommand::SetSubtitleColor(color))
    }

    pub fn set_subtitle_font(&mut self, font: String) -> Effects {
        self.style(EngineCommand::SetSubtitleFont(font))
    }

    pub fn set_subtitle_size(&mut self, size: u32) -> Effects {
        self.style(EngineCommand::SetSubtitleSize(size))
    }

    /// Generic tap on the video surface.
    pub fn tap(&mut self) -> Effects {
        let mut fx = Effects::new();
        if self.state == PlaybackState::Stopped {
            self.ignored("tap");
            return fx;
        }
        if self.overlay_visible {
            self.hide_overlay(&mut fx);
            fx.push(Effect::Overlay(OverlayCommand::Cancel));
        } else {
            self.show_overlay(&mut fx);
            if !self.is_scrubbing() {
                self.arm(&mut fx, self.config.overlay_short);
            }
        }
        fx
    }

    pub fn overlay_fired(&mut self) -> Effects {
        let mut fx = Effects::new();
        if self.is_scrubbing() {
            self.ignored("overlay timer");
            return fx;
        }
        self.hide_overlay(&mut fx);
        fx
    }

    pub fn open_menu(&mut self) -> Effects {
        vec![Effect::Overlay(OverlayCommand::Suspend)]
    }

    pub fn close_menu(&mut self) -> Effects {
        vec![Effect::Overlay(OverlayCommand::Resume)]
    }

    pub fn heartbeat(&mut self) -> Effects {
        let mut fx = Effects::new();
        let paused = match self.state {
            PlaybackState::Playing => false,
            PlaybackState::Paused => true,
            _ => return fx,
        };
        if self.is_scrubbing() {
            return fx;
        }
        let position = self.position;
        if let Some(report) = self.report.as_mut().and_then(|r| r.progress(position, paused)) {
            fx.push(Effect::Report(report));
        }
        fx
    }
}
