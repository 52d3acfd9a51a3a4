//! A media engine that plays nothing but behaves like one: it buffers, plays
//! at the requested rate, jumps and ends, reporting all of it through the
//! session's [`EngineSink`] from its own thread.

use std::{
    sync::mpsc::{self, Receiver, RecvTimeoutError, Sender},
    thread,
    time::Instant,
};

use session::{
    engine::{EngineCommand, EngineResult, OpenOptions, Rgb},
    EngineError, EngineSink, EngineState, MediaEngine, Ticks,
};
use url::Url;

use crate::config::EngineConfig;

pub struct SimulatedEngine {
    tx: Sender<EngineCommand>,
    schemes: Vec<String>,
}

impl SimulatedEngine {
    /// `length` is how long every opened media pretends to be.
    pub fn spawn(sink: EngineSink, conf: EngineConfig, length: Ticks) -> Self {
        let (tx, rx) = mpsc::channel();
        let schemes = conf.schemes.clone();
        thread::spawn(move || Playback::new(sink, conf, length).run(rx));
        Self { tx, schemes }
    }

    fn send(&self, cmd: EngineCommand) -> EngineResult<()> {
        self.tx.send(cmd).map_err(|_| EngineError::Exited)
    }
}

impl MediaEngine for SimulatedEngine {
    fn open(&mut self, url: &Url, options: &OpenOptions) -> EngineResult<()> {
        if !self.schemes.iter().any(|s| s == url.scheme()) {
            return Err(EngineError::Open(format!(
                "unsupported url scheme '{}'",
                url.scheme()
            )));
        }
        self.send(EngineCommand::Open {
            url: url.clone(),
            options: options.clone(),
        })
    }

    fn play(&mut self) -> EngineResult<()> {
        self.send(EngineCommand::Play)
    }

    fn pause(&mut self) -> EngineResult<()> {
        self.send(EngineCommand::Pause)
    }

    fn stop(&mut self) -> EngineResult<()> {
        self.send(EngineCommand::Stop)
    }

    fn set_rate(&mut self, rate: f32) -> EngineResult<()> {
        self.send(EngineCommand::SetRate(rate))
    }

    fn jump_forward(&mut self, seconds: u32) -> EngineResult<()> {
        self.send(EngineCommand::JumpForward(seconds))
    }

    fn jump_backward(&mut self, seconds: u32) -> EngineResult<()> {
        self.send(EngineCommand::JumpBackward(seconds))
    }

    fn set_audio_track(&mut self, index: i32) -> EngineResult<()> {
        self.send(EngineCommand::SetAudioTrack(index))
    }

    fn set_subtitle_track(&mut self, index: i32) -> EngineResult<()> {
        self.send(EngineCommand::SetSubtitleTrack(index))
    }

    fn set_subtitle_delay(&mut self, delay: Ticks) -> EngineResult<()> {
        self.send(EngineCommand::SetSubtitleDelay(delay))
    }

    fn set_subtitle_color(&mut self, color: Rgb) -> EngineResult<()> {
        self.send(EngineCommand::SetSubtitleColor(color))
    }

    fn set_subtitle_font(&mut self, font: &str) -> EngineResult<()> {
        self.send(EngineCommand::SetSubtitleFont(font.to_string()))
    }

    fn set_subtitle_size(&mut self, size: u32) -> EngineResult<()> {
        self.send(EngineCommand::SetSubtitleSize(size))
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Phase {
    Idle,
    Buffering { until: Instant, autoplay: bool },
    Playing,
    Paused,
    Ended,
}

/// Lives on the engine thread.
struct Playback {
    sink: EngineSink,
    conf: EngineConfig,
    length_ms: f64,
    phase: Phase,
    position_ms: f64,
    rate: f32,
    last: Instant,
}

impl Playback {
    fn new(sink: EngineSink, conf: EngineConfig, length: Ticks) -> Self {
        Self {
            sink,
            conf,
            length_ms: length.millis().max(0) as f64,
            phase: Phase::Idle,
            position_ms: 0.0,
            rate: 1.0,
            last: Instant::now(),
        }
    }

    fn run(mut self, rx: Receiver<EngineCommand>) {
        log::debug!("Engine thread started");
        loop {
            match rx.recv_timeout(self.conf.tick()) {
                Ok(cmd) => {
                    let now = Instant::now();
                    self.advance(now);
                    self.command(cmd, now);
                }
                Err(RecvTimeoutError::Timeout) => self.advance(Instant::now()),
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        log::debug!("Engine thread shutting down");
    }

    fn enter(&mut self, phase: Phase) {
        self.phase = phase;
        let state = match phase {
            Phase::Idle => EngineState::Stopped,
            Phase::Buffering { .. } => EngineState::Buffering,
            Phase::Playing => EngineState::Playing,
            Phase::Paused => EngineState::Paused,
            Phase::Ended => EngineState::Ended,
        };
        log::trace!("Engine is now {:?}", state);
        self.sink.state_changed(state);
    }

    fn report_time(&self) {
        self.sink.time_changed(self.position_ms as i64);
    }

    fn seek(&mut self, ms: f64) {
        self.position_ms = ms.clamp(0.0, self.length_ms);
        self.report_time();
    }

    fn advance(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last);
        self.last = now;

        match self.phase {
            Phase::Buffering { until, autoplay } if now >= until => {
                self.enter(if autoplay {
                    Phase::Playing
                } else {
                    Phase::Paused
                });
            }
            Phase::Playing => {
                self.position_ms += elapsed.as_secs_f64() * 1000.0 * self.rate as f64;
                if self.position_ms >= self.length_ms {
                    self.position_ms = self.length_ms;
                    self.report_time();
                    self.enter(Phase::Ended);
                } else {
                    self.report_time();
                }
            }
            _ => (),
        }
    }

    fn command(&mut self, cmd: EngineCommand, now: Instant) {
        match cmd {
            EngineCommand::Open { url, options } => {
                log::info!("Opening {} at {}", url, options.start);
                for sub in &options.external_subtitles {
                    log::debug!("Adding external subtitle {}", sub);
                }
                self.rate = 1.0;
                self.position_ms = options.start.millis() as f64;
                self.sink.state_changed(EngineState::Opening);
                self.report_time();
                self.enter(Phase::Buffering {
                    until: now + self.conf.buffering(),
                    autoplay: options.autoplay,
                });
            }
            EngineCommand::Play => match self.phase {
                Phase::Paused => self.enter(Phase::Playing),
                Phase::Ended => {
                    self.seek(0.0);
                    self.enter(Phase::Playing);
                }
                _ => log::debug!("Engine ignored play while {:?}", self.phase),
            },
            EngineCommand::Pause => match self.phase {
                Phase::Playing => self.enter(Phase::Paused),
                _ => log::debug!("Engine ignored pause while {:?}", self.phase),
            },
            EngineCommand::Stop => {
                if self.phase != Phase::Idle {
                    self.enter(Phase::Idle);
                }
            }
            EngineCommand::SetRate(rate) => self.rate = rate,
            EngineCommand::JumpForward(s) => self.seek(self.position_ms + s as f64 * 1000.0),
            EngineCommand::JumpBackward(s) => self.seek(self.position_ms - s as f64 * 1000.0),
            EngineCommand::SetSubtitleTrack(-1) => log::info!("Subtitles off"),
            cmd => log::info!("Engine applied {:?}", cmd),
        }
    }
}
