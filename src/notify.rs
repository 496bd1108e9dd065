//! Progress notices published while a run advances.
//!
//! Publishing is fire-and-forget: sinks swallow their own failures so a
//! broken observer can never change a run's outcome.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::workflow::RunId;
use crate::{mlog, mlog_debug, mlog_error};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeKind {
    Info,
    Success,
    Error,
}

impl std::fmt::Display for NoticeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NoticeKind::Info => write!(f, "info"),
            NoticeKind::Success => write!(f, "success"),
            NoticeKind::Error => write!(f, "error"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notice {
    pub kind: NoticeKind,
    pub content: String,
    pub at: DateTime<Utc>,
}

impl Notice {
    pub fn new(kind: NoticeKind, content: impl Into<String>) -> Self {
        Self {
            kind,
            content: content.into(),
            at: Utc::now(),
        }
    }

    pub fn info(content: impl Into<String>) -> Self {
        Self::new(NoticeKind::Info, content)
    }

    pub fn success(content: impl Into<String>) -> Self {
        Self::new(NoticeKind::Success, content)
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self::new(NoticeKind::Error, content)
    }
}

/// Receives progress notices for a run.
pub trait NotificationSink: Send + Sync {
    fn publish(&self, run_id: RunId, notice: &Notice);
}

/// Writes notices to the log file.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

impl NotificationSink for LogSink {
    fn publish(&self, run_id: RunId, notice: &Notice) {
        match notice.kind {
            NoticeKind::Error => mlog_error!("[notice] run={} {}", run_id.short(), notice.content),
            _ => mlog!(
                "[notice] run={} {}: {}",
                run_id.short(),
                notice.kind,
                notice.content
            ),
        }
    }
}

/// A notice tagged with its run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunNotice {
    pub run_id: RunId,
    pub notice: Notice,
}

/// Forwards notices to a bounded channel.
///
/// Uses `try_send`: when the receiver is full or gone the notice is dropped.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<RunNotice>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<RunNotice>) -> Self {
        Self { tx }
    }

    /// A sink and the receiver for its notices.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<RunNotice>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(tx), rx)
    }
}

impl NotificationSink for ChannelSink {
    fn publish(&self, run_id: RunId, notice: &Notice) {
        let event = RunNotice {
            run_id,
            notice: notice.clone(),
        };
        if let Err(e) = self.tx.try_send(event) {
            mlog_debug!("[notice] dropped for run {}: {}", run_id.short(), e);
        }
    }
}

/// Discards every notice.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl NotificationSink for NullSink {
    fn publish(&self, _run_id: RunId, _notice: &Notice) {}
}
