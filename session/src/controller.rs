//! The UI-affine side of a session. One task owns the [`Machine`], every
//! intent, engine callback and timer is funneled through it and every effect
//! is executed from it.

use std::{collections::VecDeque, sync::Arc};

use tokio::{
    select,
    sync::{mpsc, oneshot, watch},
    task::{JoinHandle, JoinSet},
    time::{interval_at, Instant, Interval, MissedTickBehavior},
};
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::{
    config::SessionConfig,
    engine::{EngineCommand, EngineEvent, EngineFeed, MediaEngine, Rgb},
    error::{EngineError, ReportError, ReportKind, SessionError, SessionResult},
    item::PlaybackItem,
    machine::{Effect, Effects, Machine, OverlayCommand, PlaybackState, SessionEvent, Snapshot},
    overlay::OverlayTimer,
    report::{Report, ReportClient},
    ticks::Ticks,
};

const CHANNEL_SIZE: usize = 1024;

type Responder = oneshot::Sender<SessionResult<()>>;
type IntentSnd = mpsc::Sender<(Intent, Responder)>;
type IntentRcv = mpsc::Receiver<(Intent, Responder)>;
type ReportOutcome = Result<ReportKind, ReportError>;

#[derive(Debug)]
enum Intent {
    Load(Arc<PlaybackItem>),
    TogglePlayback,
    Close,
    BeginScrub,
    SetScrubProgress(f64),
    EndScrub,
    SelectAudio(usize),
    SelectSubtitle(Option<usize>),
    ToggleSubtitles,
    SetRate(f32),
    JumpForward,
    JumpBackward,
    SubtitleDelay(Ticks),
    SubtitleColor(Rgb),
    SubtitleFont(String),
    SubtitleSize(u32),
    Tap,
    OpenMenu,
    CloseMenu,
}

/// Sends intents to a running session. Every call resolves once the intent
/// has been applied.
#[derive(Clone)]
pub struct SessionControls {
    tx: IntentSnd,
}

impl SessionControls {
    async fn request(&self, intent: Intent) -> SessionResult<()> {
        let (tx, rx) = oneshot::channel();
        if self.tx.send((intent, tx)).await.is_err() {
            return Err(SessionError::SessionClosed);
        }
        rx.await.unwrap_or(Err(SessionError::SessionClosed))
    }

    /// Loading the item that is already playing does nothing, loading another
    /// one replaces it.
    pub async fn load(&self, item: Arc<PlaybackItem>) -> SessionResult<()> {
        self.request(Intent::Load(item)).await
    }

    pub async fn toggle_playback(&self) -> SessionResult<()> {
        self.request(Intent::TogglePlayback).await
    }

    pub async fn close(&self) -> SessionResult<()> {
        self.request(Intent::Close).await
    }

    pub async fn begin_scrub(&self) -> SessionResult<()> {
        self.request(Intent::BeginScrub).await
    }

    pub async fn set_scrub_progress(&self, progress: f64) -> SessionResult<()> {
        self.request(Intent::SetScrubProgress(progress)).await
    }

    pub async fn end_scrub(&self) -> SessionResult<()> {
        self.request(Intent::EndScrub).await
    }

    pub async fn select_audio(&self, logical: usize) -> SessionResult<()> {
        self.request(Intent::SelectAudio(logical)).await
    }

    /// `None` turns subtitles off.
    pub async fn select_subtitle(&self, logical: Option<usize>) -> SessionResult<()> {
        self.request(Intent::SelectSubtitle(logical)).await
    }

    pub async fn toggle_subtitles(&self) -> SessionResult<()> {
        self.request(Intent::ToggleSubtitles).await
    }

    pub async fn set_rate(&self, rate: f32) -> SessionResult<()> {
        self.request(Intent::SetRate(rate)).await
    }

    pub async fn jump_forward(&self) -> SessionResult<()> {
        self.request(Intent::JumpForward).await
    }

    pub async fn jump_backward(&self) -> SessionResult<()> {
        self.request(Intent::JumpBackward).await
    }

    pub async fn set_subtitle_delay(&self, delay: Ticks) -> SessionResult<()> {
        self.request(Intent::SubtitleDelay(delay)).await
    }

    pub async fn set_subtitle_color(&self, color: Rgb) -> SessionResult<()> {
        self.request(Intent::SubtitleColor(color)).await
    }

    pub async fn set_subtitle_font(&self, font: impl Into<String>) -> SessionResult<()> {
        self.request(Intent::SubtitleFont(font.into())).await
    }

    pub async fn set_subtitle_size(&self, size: u32) -> SessionResult<()> {
        self.request(Intent::SubtitleSize(size)).await
    }

    pub async fn tap(&self) -> SessionResult<()> {
        self.request(Intent::Tap).await
    }

    pub async fn open_menu(&self) -> SessionResult<()> {
        self.request(Intent::OpenMenu).await
    }

    pub async fn close_menu(&self) -> SessionResult<()> {
        self.request(Intent::CloseMenu).await
    }
}

/// Owner of a running session. Dropping it cancels the session, use
/// [`SessionHandle::shutdown`] to also wait for the last reports.
pub struct SessionHandle {
    controls: SessionControls,
    snapshots: watch::Receiver<Snapshot>,
    events: mpsc::UnboundedReceiver<SessionEvent>,
    guard: DropGuard,
    task: JoinHandle<()>,
}

impl SessionHandle {
    pub fn controls(&self) -> &SessionControls {
        &self.controls
    }

    pub fn snapshot(&self) -> Snapshot {
        self.snapshots.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<Snapshot> {
        self.snapshots.clone()
    }

    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        self.events.recv().await
    }

    pub fn try_next_event(&mut self) -> Option<SessionEvent> {
        self.events.try_recv().ok()
    }

    /// Closes the session if needed and waits until every stop report has
    /// been delivered.
    pub async fn shutdown(self) {
        let SessionHandle { guard, task, .. } = self;
        drop(guard);
        if let Err(e) = task.await {
            log::error!("Session task join error: {}", e);
        }
    }
}

pub fn spawn_session(
    engine: Box<dyn MediaEngine>,
    feed: EngineFeed,
    reporter: Arc<dyn ReportClient>,
    config: SessionConfig,
) -> SessionHandle {
    let (intent_tx, intent_rx) = mpsc::channel(CHANNEL_SIZE);
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let (delivery_tx, delivery_rx) = mpsc::unbounded_channel();
    let (outcome_tx, outcome_rx) = mpsc::unbounded_channel();

    let overlay = OverlayTimer::new(config.overlay_short);
    let machine = Machine::new(config);
    let (snapshot_tx, snapshot_rx) = watch::channel(machine.snapshot());

    let delivery = tokio::spawn(deliver_reports(
        delivery_rx,
        Arc::clone(&reporter),
        outcome_tx,
    ));

    let ctrl = Controller {
        machine,
        engine,
        feed,
        engine_attached: true,
        reporter,
        overlay,
        heartbeat: None,
        heartbeats: JoinSet::new(),
        delivery: Some(delivery_tx),
        snapshots: snapshot_tx,
        events: event_tx,
    };

    let token = CancellationToken::new();
    let task = tokio::spawn(ctrl.run(intent_rx, outcome_rx, delivery, token.clone()));

    SessionHandle {
        controls: SessionControls { tx: intent_tx },
        snapshots: snapshot_rx,
        events: event_rx,
        guard: token.drop_guard(),
        task,
    }
}

/// Start and stop reports go out one at a time in the order they were made,
/// and are never cancelled.
async fn deliver_reports(
    mut rx: mpsc::UnboundedReceiver<Report>,
    client: Arc<dyn ReportClient>,
    outcomes: mpsc::UnboundedSender<ReportOutcome>,
) {
    while let Some(report) = rx.recv().await {
        let kind = report.kind();
        log::debug!("Sending {} report at {}", kind, report.ticks());
        let res = report.deliver(client.as_ref()).await.map(|_| kind);
        outcomes.send(res).ok();
    }
    log::debug!("Report delivery shutting down");
}

async fn next_tick(heartbeat: &mut Option<Interval>) {
    match heartbeat {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

fn engine_failure(cmd: &EngineCommand, e: EngineError) -> SessionError {
    match e {
        EngineError::Open(msg) | EngineError::Runtime(msg) if cmd.is_open() => {
            SessionError::EngineOpenFailure(msg)
        }
        e => e.into(),
    }
}

struct Controller {
    machine: Machine,
    engine: Box<dyn MediaEngine>,
    feed: EngineFeed,
    engine_attached: bool,
    reporter: Arc<dyn ReportClient>,
    overlay: OverlayTimer,
    heartbeat: Option<Interval>,
    heartbeats: JoinSet<ReportOutcome>,
    delivery: Option<mpsc::UnboundedSender<Report>>,
    snapshots: watch::Sender<Snapshot>,
    events: mpsc::UnboundedSender<SessionEvent>,
}

impl Controller {
    async fn run(
        mut self,
        mut intents: IntentRcv,
        mut outcomes: mpsc::UnboundedReceiver<ReportOutcome>,
        delivery: JoinHandle<()>,
        token: CancellationToken,
    ) {
        log::info!("Session started");

        loop {
            select! {
                biased;
                _ = token.cancelled() => {
                    log::debug!("Session cancelled");
                    break;
                }
                msg = intents.recv() => match msg {
                    Some((intent, resp)) => {
                        let res = self.intent(intent);
                        self.publish();
                        resp.send(res).ok();
                        continue;
                    }
                    None => {
                        log::debug!("Every session handle is gone");
                        break;
                    }
                },
                ev = self.feed.next(), if self.engine_attached => self.engine_event(ev),
                _ = self.overlay.fired() => {
                    let fx = self.machine.overlay_fired();
                    self.apply(fx);
                }
                Some(outcome) = outcomes.recv() => self.report_outcome(outcome),
                Some(joined) = self.heartbeats.join_next() => match joined {
                    Ok(outcome) => self.report_outcome(outcome),
                    Err(e) if e.is_cancelled() => log::trace!("Heartbeat report cancelled"),
                    Err(e) => log::error!("Heartbeat report task failed: {}", e),
                },
                _ = next_tick(&mut self.heartbeat) => {
                    let fx = self.machine.heartbeat();
                    self.apply(fx);
                }
            }
            self.publish();
        }

        let fx = self.machine.close();
        self.apply(fx);
        self.publish();
        self.overlay.cancel();
        self.heartbeats.abort_all();

        log::debug!("Waiting for the last reports");
        drop(self.delivery.take());
        if let Err(e) = delivery.await {
            log::error!("Report delivery join error: {}", e);
        }
        while let Ok(outcome) = outcomes.try_recv() {
            self.report_outcome(outcome);
        }

        log::info!("Session exited");
    }

    fn intent(&mut self, intent: Intent) -> SessionResult<()> {
        match &intent {
            Intent::SetScrubProgress(_) => log::trace!("Intent {:?}", intent),
            _ => log::debug!("Intent {:?}", intent),
        }

        let m = &mut self.machine;
        let res = match intent {
            Intent::Load(item) => Ok(m.load(item)),
            Intent::TogglePlayback => Ok(m.toggle()),
            Intent::Close => Ok(m.close()),
            Intent::BeginScrub => Ok(m.begin_scrub()),
            Intent::SetScrubProgress(p) => Ok(m.set_scrub_progress(p)),
            Intent::EndScrub => Ok(m.end_scrub()),
            Intent::SelectAudio(i) => m.select_audio(i),
            Intent::SelectSubtitle(i) => m.select_subtitle(i),
            Intent::ToggleSubtitles => m.toggle_subtitles(),
            Intent::SetRate(r) => m.set_rate(r),
            Intent::JumpForward => Ok(m.jump_forward()),
            Intent::JumpBackward => Ok(m.jump_backward()),
            Intent::SubtitleDelay(d) => Ok(m.set_subtitle_delay(d)),
            Intent::SubtitleColor(c) => Ok(m.set_subtitle_color(c)),
            Intent::SubtitleFont(f) => Ok(m.set_subtitle_font(f)),
            Intent::SubtitleSize(s) => Ok(m.set_subtitle_size(s)),
            Intent::Tap => Ok(m.tap()),
            Intent::OpenMenu => Ok(m.open_menu()),
            Intent::CloseMenu => Ok(m.close_menu()),
        };

        match res {
            Ok(fx) => {
                self.apply(fx);
                Ok(())
            }
            Err(e) => {
                log::warn!("Rejected intent: {}", e);
                Err(e)
            }
        }
    }

    fn engine_event(&mut self, ev: Option<EngineEvent>) {
        let fx = match ev {
            Some(EngineEvent::State(state)) => {
                log::debug!("Engine reported {:?}", state);
                self.machine.engine_state(state)
            }
            Some(EngineEvent::Time(ticks)) => self.machine.engine_time(ticks),
            None => {
                log::warn!("The engine stopped sending callbacks");
                self.engine_attached = false;
                if self.machine.state().is_live() {
                    self.machine.engine_failed(EngineError::Exited.into())
                } else {
                    Effects::new()
                }
            }
        };
        self.apply(fx);
    }

    fn apply(&mut self, fx: Effects) {
        let mut queue = VecDeque::from(fx);
        while let Some(effect) = queue.pop_front() {
            match effect {
                Effect::Engine(cmd) => {
                    if matches!(self.machine.state(), PlaybackState::Error(_)) {
                        log::debug!("Dropping {:?}, the engine failed", cmd);
                        continue;
                    }
                    log::debug!("Engine command {:?}", cmd);
                    if cmd.is_open() {
                        self.feed.discard_time();
                    }
                    if let Err(e) = cmd.apply(self.engine.as_mut()) {
                        log::error!("Engine command {:?} failed: {}", cmd, e);
                        queue.extend(self.machine.engine_failed(engine_failure(&cmd, e)));
                    }
                }
                Effect::Report(report) => self.send_report(report),
                Effect::Overlay(cmd) => self.overlay_command(cmd),
                Effect::Notify(event) => self.notify(event),
            }
        }
    }

    fn overlay_command(&mut self, cmd: OverlayCommand) {
        match cmd {
            OverlayCommand::Arm(interval) => self.overlay.arm(interval),
            OverlayCommand::Cancel => self.overlay.cancel(),
            OverlayCommand::Suspend => self.overlay.suspend(),
            OverlayCommand::Resume => self.overlay.resume(),
        }
    }

    fn send_report(&mut self, report: Report) {
        if report.kind() == ReportKind::Progress {
            let client = Arc::clone(&self.reporter);
            self.heartbeats.spawn(async move {
                let kind = report.kind();
                report.deliver(client.as_ref()).await.map(|_| kind)
            });
            return;
        }

        match &self.delivery {
            Some(tx) if tx.send(report).is_ok() => (),
            _ => log::error!("Report delivery is not running, report lost"),
        }
    }

    fn report_outcome(&mut self, outcome: ReportOutcome) {
        let event = match outcome {
            Ok(kind) => {
                log::debug!("Delivered {} report", kind);
                SessionEvent::ReportSent(kind)
            }
            Err(e) => {
                log::warn!("{}", e);
                SessionEvent::ReportFailed {
                    kind: e.kind,
                    reason: e.reason,
                }
            }
        };
        self.notify(event);
    }

    fn notify(&mut self, event: SessionEvent) {
        if let SessionEvent::StateChanged(state) = &event {
            self.heartbeat_for(state);
        }
        if self.events.send(event).is_err() {
            log::trace!("Nobody listens to session events");
        }
    }

    fn heartbeat_for(&mut self, state: &PlaybackState) {
        match state {
            PlaybackState::Playing | PlaybackState::Paused => {
                let Some(period) = self.machine.config().heartbeat else {
                    return;
                };
                if self.heartbeat.is_none() {
                    log::debug!("Starting heartbeat every {:?}", period);
                    let mut interval = interval_at(Instant::now() + period, period);
                    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
                    self.heartbeat = Some(interval);
                }
            }
            _ => {
                if self.heartbeat.take().is_some() {
                    log::debug!("Stopping heartbeat");
                }
                if !self.heartbeats.is_empty() {
                    log::debug!("Cancelling {} heartbeat reports", self.heartbeats.len());
                    self.heartbeats.abort_all();
                }
            }
        }
    }

    fn publish(&self) {
        let snapshot = self.machine.snapshot();
        self.snapshots.send_if_modified(|current| {
            if *current == snapshot {
                false
            } else {
                *current = snapshot;
                true
            }
        });
    }
}

#[cfg(test)]
mod test {
    use std::{sync::Mutex, time::Duration};

    use async_trait::async_trait;
    use tokio::time::{sleep, timeout};
    use url::Url;

    use super::*;
    use crate::{
        engine::{engine_channel, EngineResult, EngineSink, EngineState, OpenOptions},
        item::{test::descriptor, ItemId},
    };

    struct Recorder<T>(Arc<Mutex<Vec<T>>>);

    impl<T> Clone for Recorder<T> {
        fn clone(&self) -> Self {
            Self(Arc::clone(&self.0))
        }
    }

    impl<T: Clone> Recorder<T> {
        fn new() -> Self {
            Self(Arc::new(Mutex::new(Vec::new())))
        }

        fn push(&self, x: T) {
            self.0.lock().unwrap().push(x);
        }

        fn all(&self) -> Vec<T> {
            self.0.lock().unwrap().clone()
        }
    }

    struct MockEngine {
        calls: Recorder<EngineCommand>,
        fail_open: bool,
    }

    impl MockEngine {
        fn record(&self, cmd: EngineCommand) -> EngineResult<()> {
            self.calls.push(cmd);
            Ok(())
        }
    }

    impl MediaEngine for MockEngine {
        fn open(&mut self, url: &Url, options: &OpenOptions) -> EngineResult<()> {
            if self.fail_open {
                return Err(EngineError::Open("unsupported container".into()));
            }
            self.record(EngineCommand::Open {
                url: url.clone(),
                options: options.clone(),
            })
        }

        fn play(&mut self) -> EngineResult<()> {
            self.record(EngineCommand::Play)
        }

        fn pause(&mut self) -> EngineResult<()> {
            self.record(EngineCommand::Pause)
        }

        fn stop(&mut self) -> EngineResult<()> {
            self.record(EngineCommand::Stop)
        }

        fn set_rate(&mut self, rate: f32) -> EngineResult<()> {
            self.record(EngineCommand::SetRate(rate))
        }

        fn jump_forward(&mut self, seconds: u32) -> EngineResult<()> {
            self.record(EngineCommand::JumpForward(seconds))
        }

        fn jump_backward(&mut self, seconds: u32) -> EngineResult<()> {
            self.record(EngineCommand::JumpBackward(seconds))
        }

        fn set_audio_track(&mut self, index: i32) -> EngineResult<()> {
            self.record(EngineCommand::SetAudioTrack(index))
        }

        fn set_subtitle_track(&mut self, index: i32) -> EngineResult<()> {
            self.record(EngineCommand::SetSubtitleTrack(index))
        }

        fn set_subtitle_delay(&mut self, delay: Ticks) -> EngineResult<()> {
            self.record(EngineCommand::SetSubtitleDelay(delay))
        }

        fn set_subtitle_color(&mut self, color: Rgb) -> EngineResult<()> {
            self.record(EngineCommand::SetSubtitleColor(color))
        }

        fn set_subtitle_font(&mut self, font: &str) -> EngineResult<()> {
            self.record(EngineCommand::SetSubtitleFont(font.to_string()))
        }

        fn set_subtitle_size(&mut self, size: u32) -> EngineResult<()> {
            self.record(EngineCommand::SetSubtitleSize(size))
        }
    }

    #[derive(Clone)]
    struct MockReporter {
        reports: Recorder<Report>,
        fail: Option<ReportKind>,
        delay: Duration,
    }

    impl MockReporter {
        fn new() -> Self {
            Self {
                reports: Recorder::new(),
                fail: None,
                delay: Duration::ZERO,
            }
        }

        async fn handle(&self, report: Report) -> Result<(), ReportError> {
            sleep(self.delay).await;
            let kind = report.kind();
            self.reports.push(report);
            match self.fail {
                Some(k) if k == kind => Err(ReportError::new(kind, "server unavailable")),
                _ => Ok(()),
            }
        }
    }

    #[async_trait]
    impl ReportClient for MockReporter {
        async fn send_playback_start(
            &self,
            item: &ItemId,
            start: Ticks,
        ) -> Result<(), ReportError> {
            self.handle(Report::Start {
                item: item.clone(),
                ticks: start,
            })
            .await
        }

        async fn send_playback_stop(&self, item: &ItemId, ticks: Ticks) -> Result<(), ReportError> {
            self.handle(Report::Stop {
                item: item.clone(),
                ticks,
            })
            .await
        }

        async fn send_playback_progress(
            &self,
            item: &ItemId,
            ticks: Ticks,
            paused: bool,
        ) -> Result<(), ReportError> {
            self.handle(Report::Progress {
                item: item.clone(),
                ticks,
                paused,
            })
            .await
        }
    }

    struct Fixture {
        handle: SessionHandle,
        ctl: SessionControls,
        sink: EngineSink,
        engine: Recorder<EngineCommand>,
        reports: Recorder<Report>,
    }

    fn fixture_with(config: SessionConfig, reporter: MockReporter, fail_open: bool) -> Fixture {
        let (sink, feed) = engine_channel();
        let engine = Recorder::new();
        let reports = reporter.reports.clone();
        let handle = spawn_session(
            Box::new(MockEngine {
                calls: engine.clone(),
                fail_open,
            }),
            feed,
            Arc::new(reporter),
            config,
        );
        Fixture {
            ctl: handle.controls().clone(),
            handle,
            sink,
            engine,
            reports,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(SessionConfig::default(), MockReporter::new(), false)
    }

    fn item(id: &str) -> Arc<PlaybackItem> {
        Arc::new(PlaybackItem::new(descriptor(id, 3600)).unwrap())
    }

    async fn wait_until(handle: &SessionHandle, pred: impl Fn(&Snapshot) -> bool) {
        let mut rx = handle.watch();
        timeout(Duration::from_secs(60), rx.wait_for(|s| pred(s)))
            .await
            .expect("snapshot never matched")
            .unwrap();
    }

    async fn play(f: &Fixture, id: &str) {
        f.ctl.load(item(id)).await.unwrap();
        f.sink.state_changed(EngineState::Buffering);
        f.sink.state_changed(EngineState::Playing);
        wait_until(&f.handle, |s| s.state == PlaybackState::Playing).await;
    }

    async fn event_matching(
        handle: &mut SessionHandle,
        pred: impl Fn(&SessionEvent) -> bool,
    ) -> SessionEvent {
        timeout(Duration::from_secs(60), async {
            loop {
                match handle.next_event().await {
                    Some(ev) if pred(&ev) => return ev,
                    Some(_) => continue,
                    None => panic!("event stream ended"),
                }
            }
        })
        .await
        .expect("event never came")
    }

    #[tokio::test(start_paused = true)]
    async fn load_play_close() {
        let f = fixture();
        f.ctl.load(item("movie")).await.unwrap();
        assert_eq!(PlaybackState::LoadingItem, f.handle.snapshot().state);

        f.sink.state_changed(EngineState::Buffering);
        f.sink.state_changed(EngineState::Playing);
        wait_until(&f.handle, |s| s.state == PlaybackState::Playing).await;

        f.sink.time_changed(125_000);
        wait_until(&f.handle, |s| s.position == Ticks::from_seconds(125)).await;

        f.ctl.toggle_playback().await.unwrap();
        assert_eq!(PlaybackState::Paused, f.handle.snapshot().state);
        f.ctl.toggle_playback().await.unwrap();
        f.ctl.close().await.unwrap();
        assert_eq!(PlaybackState::Stopped, f.handle.snapshot().state);

        let Fixture {
            handle,
            engine,
            reports,
            ..
        } = f;
        handle.shutdown().await;

        let id = ItemId::new("movie");
        assert_eq!(
            vec![
                Report::Start {
                    item: id.clone(),
                    ticks: Ticks::ZERO
                },
                Report::Stop {
                    item: id,
                    ticks: Ticks::from_seconds(125)
                },
            ],
            reports.all()
        );

        let calls = engine.all();
        assert_eq!(4, calls.len());
        assert!(calls[0].is_open());
        assert_eq!(
            vec![EngineCommand::Pause, EngineCommand::Play, EngineCommand::Stop],
            calls[1..]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn engine_callbacks_from_another_thread() {
        let f = fixture();
        f.ctl.load(item("a")).await.unwrap();
        let sink = f.sink.clone();
        std::thread::spawn(move || {
            sink.state_changed(EngineState::Opening);
            for ms in (0..=10_000).step_by(250) {
                sink.time_changed(ms);
            }
        })
        .join()
        .unwrap();

        wait_until(&f.handle, |s| s.position == Ticks::from_seconds(10)).await;
        assert_eq!(PlaybackState::Playing, f.handle.snapshot().state);
    }

    #[tokio::test(start_paused = true)]
    async fn scrub_through_handle() {
        let f = fixture();
        play(&f, "a").await;
        f.sink.time_changed(100_000);
        wait_until(&f.handle, |s| s.position == Ticks::from_seconds(100)).await;

        f.ctl.begin_scrub().await.unwrap();
        f.sink.time_changed(101_000);
        sleep(Duration::from_millis(10)).await;
        f.ctl.set_scrub_progress(0.5).await.unwrap();
        let snap = f.handle.snapshot();
        assert!(snap.scrubbing);
        assert_eq!(1800, snap.scrub_seconds);
        assert_eq!(Ticks::from_seconds(100), snap.position);

        f.ctl.end_scrub().await.unwrap();
        assert_eq!(
            Some(&EngineCommand::JumpForward(1699)),
            f.engine.all().last()
        );
        f.sink.time_changed(1_800_000);
        wait_until(&f.handle, |s| s.position == Ticks::from_seconds(1800)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_selections_reach_the_caller() {
        let f = fixture();
        assert_eq!(Err(SessionError::NoItem), f.ctl.select_audio(0).await);

        play(&f, "a").await;
        assert!(matches!(
            f.ctl.select_subtitle(Some(9)).await,
            Err(SessionError::InvalidTrackSelection(_))
        ));
        assert!(matches!(
            f.ctl.set_rate(-1.0).await,
            Err(SessionError::InvalidRate(_))
        ));

        f.ctl.select_subtitle(Some(4)).await.unwrap();
        assert_eq!(
            Some(&EngineCommand::SetSubtitleTrack(7)),
            f.engine.all().last()
        );
        assert_eq!(Some(4), f.handle.snapshot().tracks.subtitle);
    }

    #[tokio::test(start_paused = true)]
    async fn open_failure_is_terminal() {
        let mut f = fixture_with(SessionConfig::default(), MockReporter::new(), true);
        f.ctl.load(item("a")).await.unwrap();

        let ev = event_matching(&mut f.handle, |e| matches!(e, SessionEvent::Error(_))).await;
        assert!(matches!(ev, SessionEvent::Error(msg) if msg.contains("unsupported container")));
        assert!(matches!(f.handle.snapshot().state, PlaybackState::Error(_)));

        f.ctl.toggle_playback().await.unwrap();
        f.ctl.close().await.unwrap();

        let Fixture {
            handle,
            engine,
            reports,
            ..
        } = f;
        handle.shutdown().await;
        assert!(engine.all().is_empty());
        let kinds: Vec<_> = reports.all().iter().map(|r| r.kind()).collect();
        assert_eq!(vec![ReportKind::Start, ReportKind::Stop], kinds);
    }

    #[tokio::test(start_paused = true)]
    async fn report_failure_keeps_playing() {
        let mut reporter = MockReporter::new();
        reporter.fail = Some(ReportKind::Start);
        let mut f = fixture_with(SessionConfig::default(), reporter, false);
        play(&f, "a").await;

        let ev = event_matching(&mut f.handle, |e| {
            matches!(e, SessionEvent::ReportFailed { .. })
        })
        .await;
        assert_eq!(
            SessionEvent::ReportFailed {
                kind: ReportKind::Start,
                reason: "server unavailable".to_string()
            },
            ev
        );
        assert_eq!(PlaybackState::Playing, f.handle.snapshot().state);
    }

    #[tokio::test(start_paused = true)]
    async fn overlay_dismiss() {
        let f = fixture();
        play(&f, "a").await;
        assert!(f.handle.snapshot().overlay_visible);
        sleep(Duration::from_millis(2500)).await;
        assert!(!f.handle.snapshot().overlay_visible);

        f.ctl.tap().await.unwrap();
        assert!(f.handle.snapshot().overlay_visible);
        f.ctl.open_menu().await.unwrap();
        f.ctl.open_menu().await.unwrap();
        sleep(Duration::from_secs(10)).await;
        f.ctl.close_menu().await.unwrap();
        sleep(Duration::from_secs(10)).await;
        assert!(f.handle.snapshot().overlay_visible);

        f.ctl.close_menu().await.unwrap();
        sleep(Duration::from_millis(2500)).await;
        assert!(!f.handle.snapshot().overlay_visible);
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeat_while_playing() {
        let config = SessionConfig {
            heartbeat: Some(Duration::from_secs(1)),
            ..SessionConfig::default()
        };
        let f = fixture_with(config, MockReporter::new(), false);
        play(&f, "a").await;
        f.sink.time_changed(5_000);
        wait_until(&f.handle, |s| s.position == Ticks::from_seconds(5)).await;

        sleep(Duration::from_millis(2500)).await;
        let progress = |r: &Recorder<Report>| {
            r.all()
                .iter()
                .filter(|r| r.kind() == ReportKind::Progress)
                .count()
        };
        assert_eq!(1, progress(&f.reports));

        f.ctl.close().await.unwrap();
        f.sink.time_changed(9_000);
        sleep(Duration::from_secs(5)).await;
        assert_eq!(1, progress(&f.reports));

        let Fixture { handle, reports, .. } = f;
        handle.shutdown().await;
        let kinds: Vec<_> = reports.all().iter().map(|r| r.kind()).collect();
        assert_eq!(
            vec![ReportKind::Start, ReportKind::Progress, ReportKind::Stop],
            kinds
        );
    }

    #[tokio::test(start_paused = true)]
    async fn close_cancels_heartbeat_but_not_stop() {
        let config = SessionConfig {
            heartbeat: Some(Duration::from_secs(1)),
            ..SessionConfig::default()
        };
        let mut reporter = MockReporter::new();
        reporter.delay = Duration::from_secs(3);
        let f = fixture_with(config, reporter, false);
        play(&f, "a").await;
        f.sink.time_changed(5_000);
        wait_until(&f.handle, |s| s.position == Ticks::from_seconds(5)).await;

        sleep(Duration::from_millis(1500)).await;
        f.ctl.close().await.unwrap();

        let Fixture { handle, reports, .. } = f;
        handle.shutdown().await;
        assert_eq!(
            vec![
                Report::Start {
                    item: ItemId::new("a"),
                    ticks: Ticks::ZERO
                },
                Report::Stop {
                    item: ItemId::new("a"),
                    ticks: Ticks::from_seconds(5)
                },
            ],
            reports.all()
        );
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_closes_and_waits() {
        let mut reporter = MockReporter::new();
        reporter.delay = Duration::from_secs(5);
        let f = fixture_with(SessionConfig::default(), reporter, false);
        play(&f, "a").await;

        let Fixture {
            handle,
            ctl,
            engine,
            reports,
            ..
        } = f;
        handle.shutdown().await;
        assert_eq!(2, reports.all().len());
        assert_eq!(ReportKind::Stop, reports.all()[1].kind());
        assert_eq!(Some(&EngineCommand::Stop), engine.all().last());
        assert_eq!(Err(SessionError::SessionClosed), ctl.toggle_playback().await);
    }

    #[tokio::test(start_paused = true)]
    async fn replacing_item() {
        let f = fixture();
        play(&f, "a").await;
        f.ctl.load(item("b")).await.unwrap();
        f.ctl.load(item("b")).await.unwrap();
        assert_eq!(Some(ItemId::new("b")), f.handle.snapshot().item);

        let Fixture {
            handle,
            engine,
            reports,
            ..
        } = f;
        handle.shutdown().await;

        let calls = engine.all();
        assert!(calls[0].is_open());
        assert_eq!(EngineCommand::Stop, calls[1]);
        assert!(calls[2].is_open());

        let reports = reports.all();
        assert_eq!(4, reports.len());
        assert_eq!(
            Report::Stop {
                item: ItemId::new("a"),
                ticks: Ticks::ZERO
            },
            reports[1]
        );
        assert_eq!(
            Report::Start {
                item: ItemId::new("b"),
                ticks: Ticks::ZERO
            },
            reports[2]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn replaced_item_ignores_leftover_time() {
        let f = fixture();
        play(&f, "a").await;
        f.sink.time_changed(1_800_000);
        f.ctl.load(item("b")).await.unwrap();
        f.sink.state_changed(EngineState::Buffering);
        wait_until(&f.handle, |s| s.state == PlaybackState::Buffering).await;
        sleep(Duration::from_millis(10)).await;
        assert_eq!(Ticks::ZERO, f.handle.snapshot().position);
        assert_eq!(PlaybackState::Buffering, f.handle.snapshot().state);

        f.ctl.close().await.unwrap();
        let Fixture { handle, reports, .. } = f;
        handle.shutdown().await;
        assert_eq!(
            Some(&Report::Stop {
                item: ItemId::new("b"),
                ticks: Ticks::ZERO
            }),
            reports.all().last()
        );
    }

    #[tokio::test(start_paused = true)]
    async fn no_load_after_open_failure() {
        let f = fixture_with(SessionConfig::default(), MockReporter::new(), true);
        f.ctl.load(item("a")).await.unwrap();
        wait_until(&f.handle, |s| matches!(s.state, PlaybackState::Error(_))).await;
        f.ctl.load(item("a")).await.unwrap();
        assert!(matches!(f.handle.snapshot().state, PlaybackState::Error(_)));

        let Fixture {
            handle,
            engine,
            reports,
            ..
        } = f;
        handle.shutdown().await;
        assert!(engine.all().is_empty());
        let kinds: Vec<_> = reports.all().iter().map(|r| r.kind()).collect();
        assert_eq!(vec![ReportKind::Start, ReportKind::Stop], kinds);
    }

    #[tokio::test(start_paused = true)]
    async fn no_load_after_engine_went_away() {
        let f = fixture();
        play(&f, "a").await;
        let Fixture {
            handle,
            sink,
            engine,
            ctl,
            ..
        } = f;
        drop(sink);
        wait_until(&handle, |s| matches!(s.state, PlaybackState::Error(_))).await;
        ctl.load(item("b")).await.unwrap();
        assert_eq!(Some(ItemId::new("a")), handle.snapshot().item);
        handle.shutdown().await;
        assert_eq!(1, engine.all().len());
    }

    #[tokio::test(start_paused = true)]
    async fn no_load_after_close() {
        let f = fixture();
        play(&f, "a").await;
        f.ctl.close().await.unwrap();
        f.ctl.load(item("b")).await.unwrap();
        assert_eq!(PlaybackState::Stopped, f.handle.snapshot().state);

        let Fixture {
            handle,
            engine,
            reports,
            ..
        } = f;
        handle.shutdown().await;
        let calls = engine.all();
        assert_eq!(2, calls.len());
        assert!(calls[0].is_open());
        assert_eq!(EngineCommand::Stop, calls[1]);
        assert_eq!(2, reports.all().len());
    }

    #[tokio::test(start_paused = true)]
    async fn engine_going_away_is_an_error() {
        let f = fixture();
        play(&f, "a").await;
        let Fixture { handle, sink, .. } = f;
        drop(sink);
        wait_until(&handle, |s| matches!(s.state, PlaybackState::Error(_))).await;
        handle.shutdown().await;
    }
}
