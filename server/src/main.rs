mod config;
mod console;
mod engine_sim;
mod reporter;
mod signal;

use std::{
    fs,
    path::{Path, PathBuf},
    process::ExitCode,
    sync::Arc,
};

use anyhow::Context;
use clap::Parser;
use futures_util::future::maybe_done;
use session::{
    engine_channel, spawn_session, ItemDescriptor, PlaybackItem, PlaybackState, SessionEvent,
    SessionHandle,
};
use tokio::{select, spawn, task::JoinError};
use tokio_util::sync::CancellationToken;

use crate::{
    console::console_actor, engine_sim::SimulatedEngine, reporter::LogReporter,
    signal::signal_received,
};

/// Plays one item on a simulated engine, controlled from stdin.
#[derive(Parser)]
#[command(version)]
struct Args {
    /// Item descriptor in TOML
    item: PathBuf,
    /// Use this config file instead of the one in the config dir
    #[arg(short, long)]
    config: Option<PathBuf>,
}

fn init_logger() {
    use log::LevelFilter;
    use systemd_journal_logger::{connected_to_journal, JournalLog};

    const TARGETS: [&str; 2] = [config::PROGNAME, "session"];

    fn install_systemd_logger() -> bool {
        struct FilteringJournalLog(JournalLog);
        impl log::Log for FilteringJournalLog {
            fn enabled(&self, metadata: &log::Metadata) -> bool {
                log::Log::enabled(&self.0, metadata)
            }

            fn log(&self, record: &log::Record) {
                if self.enabled(record.metadata())
                    && TARGETS.iter().any(|t| record.target().starts_with(t))
                {
                    log::Log::log(&self.0, record);
                }
            }

            fn flush(&self) {
                log::Log::flush(&self.0)
            }
        }

        let logger = match JournalLog::new() {
            Ok(logger) => logger,
            Err(e) => {
                eprintln!("Failed to create the systemd logger: {e:?}");
                return false;
            }
        };

        log::set_max_level(LevelFilter::Trace);
        log::set_boxed_logger(Box::new(FilteringJournalLog(logger)))
            .expect("no logger should have been set yet");
        true
    }

    fn install_stdout_logger() {
        use fern::colors::{Color, ColoredLevelConfig};

        let colors = ColoredLevelConfig::new()
            .info(Color::Green)
            .debug(Color::Blue)
            .trace(Color::BrightBlack);

        let mut dispatch = fern::Dispatch::new().level(LevelFilter::Off);
        for target in TARGETS {
            dispatch = dispatch.level_for(target, LevelFilter::Trace);
        }
        dispatch
            .format(move |out, message, record| {
                out.finish(format_args!(
                    "{} {} [{}] {}",
                    chrono::Local::now().format("%H:%M:%S%.3f"),
                    colors.color(record.level()),
                    record.target(),
                    message
                ))
            })
            .chain(std::io::stdout())
            .apply()
            .expect("no logger should have been set yet");
    }

    if !connected_to_journal() || !install_systemd_logger() {
        install_stdout_logger();
    }
}

fn log_actor_error(res: Result<anyhow::Result<()>, JoinError>, name: &str) {
    match res {
        Err(je) => log::error!("Actor '{}' join error: {}", name, je),
        Ok(Err(ae)) => log::error!("Actor '{}' errored with: {:?}", name, ae),
        Ok(Ok(())) => (),
    }
}

fn read_item(path: &Path) -> anyhow::Result<PlaybackItem> {
    let conts =
        fs::read_to_string(path).with_context(|| format!("reading item file at {:?}", path))?;
    let desc: ItemDescriptor = toml::from_str(&conts).context("parsing item file as TOML")?;
    PlaybackItem::new(desc).context("validating the item")
}

/// Resolves when playback can't go on by itself anymore.
async fn follow_events(handle: &mut SessionHandle) {
    while let Some(event) = handle.next_event().await {
        match event {
            SessionEvent::StateChanged(state) => {
                log::info!("Playback is {}", state);
                if matches!(state, PlaybackState::Ended | PlaybackState::Error(_)) {
                    return;
                }
            }
            SessionEvent::Error(msg) => log::error!("Playback failed: {}", msg),
            SessionEvent::ReportFailed { kind, reason } => {
                log::warn!("The server did not get the {} report: {}", kind, reason)
            }
            ev => log::trace!("Session event {:?}", ev),
        }
    }
}

#[tokio::main]
async fn async_main(item: PlaybackItem) -> ExitCode {
    let (sink, feed) = engine_channel();
    let engine = SimulatedEngine::spawn(sink, config::engine().clone(), item.duration());
    let mut handle = spawn_session(
        Box::new(engine),
        feed,
        Arc::new(LogReporter),
        config::session().clone(),
    );
    let controls = handle.controls().clone();

    if let Err(e) = controls.load(Arc::new(item)).await {
        log::error!("Failed to load the item: {}", e);
        handle.shutdown().await;
        return ExitCode::FAILURE;
    }

    let canceltoken = CancellationToken::new();
    let console = maybe_done(spawn(console_actor(
        controls.clone(),
        handle.watch(),
        canceltoken.child_token(),
    )));
    tokio::pin!(console);

    select! {
        sig = signal_received() => log::info!("Terminating due to {}", sig),
        _ = &mut console => log::info!("Console exited"),
        _ = follow_events(&mut handle) => log::info!("Playback is over"),
    }

    log::info!("Cancelling the console...");
    canceltoken.cancel();

    if let Err(e) = controls.close().await {
        log::warn!("Could not close the session: {}", e);
    }
    let failed = matches!(handle.snapshot().state, PlaybackState::Error(_));
    handle.shutdown().await;

    console.as_mut().await;
    log_actor_error(
        console.as_mut().take_output().expect("value not taken"),
        "console",
    );

    log::info!("Goodbye");
    if failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logger();
    log::info!("Welcome");

    if let Err(e) = config::init_config(args.config.as_deref()) {
        log::error!("Failed to read config: {:?}", e);
        return ExitCode::FAILURE;
    }

    let item = match read_item(&args.item) {
        Ok(item) => item,
        Err(e) => {
            log::error!("Failed to read the item: {:?}", e);
            return ExitCode::FAILURE;
        }
    };

    async_main(item)
}
