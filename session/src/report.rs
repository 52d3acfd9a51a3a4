use async_trait::async_trait;

use crate::{
    error::{ReportError, ReportKind},
    item::ItemId,
    ticks::Ticks,
};

/// Server side of the playback reports.
#[async_trait]
pub trait ReportClient: Send + Sync {
    async fn send_playback_start(&self, item: &ItemId, start: Ticks) -> Result<(), ReportError>;

    async fn send_playback_stop(&self, item: &ItemId, ticks: Ticks) -> Result<(), ReportError>;

    async fn send_playback_progress(
        &self,
        _item: &ItemId,
        _ticks: Ticks,
        _paused: bool,
    ) -> Result<(), ReportError> {
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Report {
    Start { item: ItemId, ticks: Ticks },
    Progress { item: ItemId, ticks: Ticks, paused: bool },
    Stop { item: ItemId, ticks: Ticks },
}

impl Report {
    pub fn kind(&self) -> ReportKind {
        match self {
            Report::Start { .. } => ReportKind::Start,
            Report::Progress { .. } => ReportKind::Progress,
            Report::Stop { .. } => ReportKind::Stop,
        }
    }

    pub fn ticks(&self) -> Ticks {
        match self {
            Report::Start { ticks, .. }
            | Report::Progress { ticks, .. }
            | Report::Stop { ticks, .. } => *ticks,
        }
    }

    pub async fn deliver(&self, client: &dyn ReportClient) -> Result<(), ReportError> {
        match self {
            Report::Start { item, ticks } => client.send_playback_start(item, *ticks).await,
            Report::Progress {
                item,
                ticks,
                paused,
            } => client.send_playback_progress(item, *ticks, *paused).await,
            Report::Stop { item, ticks } => client.send_playback_stop(item, *ticks).await,
        }
    }
}

/// Bookkeeping of the reports for one item. Guarantees at most one start and
/// at most one stop, the stop only after a start, and progress only between
/// them.
#[derive(Debug)]
pub struct ReportSession {
    item: ItemId,
    started: bool,
    stopped: bool,
    last_reported: Option<Ticks>,
}

impl ReportSession {
    pub fn new(item: ItemId) -> Self {
        Self {
            item,
            started: false,
            stopped: false,
            last_reported: None,
        }
    }

    pub fn start(&mut self, at: Ticks) -> Option<Report> {
        if self.started {
            log::debug!("Start report for '{}' already sent", self.item);
            return None;
        }
        self.started = true;
        self.last_reported = Some(at);
        Some(Report::Start {
            item: self.item.clone(),
            ticks: at,
        })
    }

    pub fn progress(&mut self, at: Ticks, paused: bool) -> Option<Report> {
        if !self.started || self.stopped || self.last_reported == Some(at) {
            return None;
        }
        self.last_reported = Some(at);
        Some(Report::Progress {
            item: self.item.clone(),
            ticks: at,
            paused,
        })
    }

    pub fn stop(&mut self, at: Ticks) -> Option<Report> {
        if !self.started || self.stopped {
            return None;
        }
        self.stopped = true;
        self.last_reported = Some(at);
        Some(Report::Stop {
            item: self.item.clone(),
            ticks: at,
        })
    }
}
