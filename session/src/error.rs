use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReportKind {
    Start,
    Progress,
    Stop,
}

impl fmt::Display for ReportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ReportKind::Start => "start",
            ReportKind::Progress => "progress",
            ReportKind::Stop => "stop",
        };
        write!(f, "{name}")
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("engine failed to open media: {0}")]
    Open(String),
    #[error("engine error: {0}")]
    Runtime(String),
    #[error("engine is not running anymore")]
    Exited,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("failed to deliver {kind} report: {reason}")]
pub struct ReportError {
    pub kind: ReportKind,
    pub reason: String,
}

impl ReportError {
    pub fn new(kind: ReportKind, reason: impl ToString) -> Self {
        Self {
            kind,
            reason: reason.to_string(),
        }
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum SessionError {
    #[error("engine failed to open the item: {0}")]
    EngineOpenFailure(String),
    #[error("engine runtime error: {0}")]
    EngineRuntimeError(String),
    #[error(transparent)]
    ReportDeliveryFailure(#[from] ReportError),
    #[error("invalid chapter data: {0}")]
    InvalidChapterData(String),
    #[error("invalid track selection: {0}")]
    InvalidTrackSelection(String),
    #[error("invalid playback rate: {0}")]
    InvalidRate(f32),
    #[error("no item is loaded")]
    NoItem,
    #[error("the session is not running anymore")]
    SessionClosed,
}

impl From<EngineError> for SessionError {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::Open(msg) => Self::EngineOpenFailure(msg),
            EngineError::Runtime(msg) => Self::EngineRuntimeError(msg),
            EngineError::Exited => {
                Self::EngineRuntimeError("engine is not running anymore".to_string())
            }
        }
    }
}

pub type SessionResult<T> = Result<T, SessionError>;
