//! Line based remote control on stdin.

use std::{io, str::FromStr, thread};

use anyhow::Context;
use session::{
    engine::Rgb, PlaybackState, SessionControls, SessionError, SessionResult, Snapshot, Ticks,
};
use tokio::{
    select,
    sync::{mpsc, watch},
};
use tokio_util::sync::CancellationToken;

const HELP: &str = "\
p               toggle play/pause
seek FRACTION   scrub to a fraction of the item, 0 to 1
ff, rew         jump forward or backward
audio N         select audio stream N
sub N|off       select subtitle stream N or turn them off
cc              toggle subtitles
rate X          playback rate
delay MS        subtitle delay
size N          subtitle size
font NAME       subtitle font
color R G B     subtitle color
tap             show or hide the overlay
menu, unmenu    hold or release the overlay
status          print where playback is
close           stop playback
quit            close and exit";

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Toggle,
    Close,
    Seek(f64),
    Forward,
    Backward,
    Audio(usize),
    Subtitle(Option<usize>),
    Captions,
    Rate(f32),
    Delay(i64),
    Size(u32),
    Font(String),
    Color(Rgb),
    Tap,
    Menu,
    Unmenu,
    Status,
    Help,
    Quit,
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum ParseError {
    #[error("empty line")]
    Empty,
    #[error("unknown command '{0}', try 'help'")]
    Unknown(String),
    #[error("'{0}' expects {1}")]
    Argument(&'static str, &'static str),
}

fn arg<T: FromStr>(rest: &[&str], name: &'static str, what: &'static str) -> Result<T, ParseError> {
    match rest {
        [x] => x.parse().map_err(|_| ParseError::Argument(name, what)),
        _ => Err(ParseError::Argument(name, what)),
    }
}

impl FromStr for Command {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut words = s.split_whitespace();
        let Some(cmd) = words.next() else {
            return Err(ParseError::Empty);
        };
        let rest: Vec<&str> = words.collect();

        let c = match cmd {
            "p" | "play" | "pause" | "toggle" => Command::Toggle,
            "close" | "stop" => Command::Close,
            "seek" => Command::Seek(arg(&rest, "seek", "a fraction between 0 and 1")?),
            "ff" | "forward" => Command::Forward,
            "rew" | "back" => Command::Backward,
            "audio" => Command::Audio(arg(&rest, "audio", "a stream number")?),
            "sub" => match rest.as_slice() {
                ["off"] => Command::Subtitle(None),
                _ => Command::Subtitle(Some(arg(&rest, "sub", "a stream number or 'off'")?)),
            },
            "cc" => Command::Captions,
            "rate" => Command::Rate(arg(&rest, "rate", "a number")?),
            "delay" => Command::Delay(arg(&rest, "delay", "milliseconds")?),
            "size" => Command::Size(arg(&rest, "size", "a number")?),
            "font" if !rest.is_empty() => Command::Font(rest.join(" ")),
            "font" => return Err(ParseError::Argument("font", "a font name")),
            "color" => match rest.as_slice() {
                [r, g, b] => {
                    let channel = |x: &str| {
                        x.parse::<u8>()
                            .map_err(|_| ParseError::Argument("color", "three numbers 0-255"))
                    };
                    Command::Color(Rgb {
                        r: channel(r)?,
                        g: channel(g)?,
                        b: channel(b)?,
                    })
                }
                _ => return Err(ParseError::Argument("color", "three numbers 0-255")),
            },
            "tap" => Command::Tap,
            "menu" => Command::Menu,
            "unmenu" => Command::Unmenu,
            "s" | "status" => Command::Status,
            "?" | "help" => Command::Help,
            "q" | "quit" | "exit" => Command::Quit,
            other => return Err(ParseError::Unknown(other.to_string())),
        };
        Ok(c)
    }
}

impl Command {
    async fn run(
        self,
        ctl: &SessionControls,
        snapshots: &watch::Receiver<Snapshot>,
    ) -> SessionResult<()> {
        match self {
            Command::Toggle => ctl.toggle_playback().await,
            Command::Close => ctl.close().await,
            Command::Seek(fraction) => {
                ctl.begin_scrub().await?;
                ctl.set_scrub_progress(fraction).await?;
                ctl.end_scrub().await
            }
            Command::Forward => ctl.jump_forward().await,
            Command::Backward => ctl.jump_backward().await,
            Command::Audio(i) => ctl.select_audio(i).await,
            Command::Subtitle(i) => ctl.select_subtitle(i).await,
            Command::Captions => ctl.toggle_subtitles().await,
            Command::Rate(r) => ctl.set_rate(r).await,
            Command::Delay(ms) => ctl.set_subtitle_delay(Ticks::from_millis(ms)).await,
            Command::Size(s) => ctl.set_subtitle_size(s).await,
            Command::Font(f) => ctl.set_subtitle_font(f).await,
            Command::Color(c) => ctl.set_subtitle_color(c).await,
            Command::Tap => ctl.tap().await,
            Command::Menu => ctl.open_menu().await,
            Command::Unmenu => ctl.close_menu().await,
            Command::Status => {
                println!("{}", status_line(&snapshots.borrow()));
                Ok(())
            }
            Command::Help => {
                println!("{HELP}");
                Ok(())
            }
            Command::Quit => Ok(()),
        }
    }
}

pub fn status_line(snap: &Snapshot) -> String {
    let mut line = format!("{} {} / {}", snap.state, snap.position, snap.duration);
    if snap.scrubbing {
        line += &format!(" (scrubbing to {})", Ticks::from_seconds(snap.scrub_seconds));
    }
    if let Some(chapter) = &snap.chapter {
        line += &format!(" [{chapter}]");
    }
    if let Some(audio) = snap.tracks.audio {
        line += &format!(" audio {audio}");
    }
    match snap.tracks.subtitle {
        Some(sub) => line += &format!(" sub {sub}"),
        None => line += " sub off",
    }
    if snap.rate != 1.0 {
        line += &format!(" {}x", snap.rate);
    }
    if snap.overlay_visible && snap.state != PlaybackState::Stopped {
        line += " *";
    }
    line
}

/// Stdin is read on its own thread, a blocked read must not keep the runtime
/// from shutting down.
fn stdin_lines() -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(16);
    thread::spawn(move || {
        for line in io::stdin().lines() {
            match line {
                Ok(line) => {
                    if tx.blocking_send(line).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    log::error!("Failed to read stdin: {}", e);
                    break;
                }
            }
        }
        log::debug!("Stdin thread shutting down");
    });
    rx
}

pub async fn console_actor(
    ctl: SessionControls,
    snapshots: watch::Receiver<Snapshot>,
    canceltoken: CancellationToken,
) -> anyhow::Result<()> {
    let mut lines = stdin_lines();

    loop {
        let line = select! {
            _ = canceltoken.cancelled() => break,
            line = lines.recv() => match line {
                Some(line) => line,
                None => {
                    log::info!("Stdin closed");
                    break;
                }
            },
        };

        let cmd = match line.parse::<Command>() {
            Ok(Command::Quit) => break,
            Ok(cmd) => cmd,
            Err(ParseError::Empty) => continue,
            Err(e) => {
                println!("{e}");
                continue;
            }
        };

        log::debug!("Console command {:?}", cmd);
        match cmd.run(&ctl, &snapshots).await {
            Ok(()) => (),
            Err(e @ SessionError::SessionClosed) => {
                return Err(e).context("running a console command")
            }
            Err(e) => println!("{e}"),
        }
    }

    log::debug!("Console exited");
    Ok(())
}
