//! Per-table progress: state machine, events and sinks.
//!
//! A [`ProgressReporter`] owns one table's [`TransferProgress`] and publishes a
//! [`ProgressEvent`] to a [`ProgressSink`] after every accepted change. Sinks
//! never block and never fail the caller; the [`aggregator`] on the other end
//! of a [`ChannelSink`] turns the event stream into display updates.

pub mod aggregator;

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::ErrorKind;

pub use aggregator::{DisplayChange, LedgerEntry, ProgressAggregator, ProgressDisplay, ProgressLedger};

/// Lifecycle phase of one table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Queued,
    Counting,
    Transferring,
    Skipped,
    Done,
    Failed,
}

impl Phase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Skipped | Phase::Done | Phase::Failed)
    }

    /// Allowed moves:
    /// `Queued -> {Skipped, Counting, Failed}`, `Counting -> {Transferring, Failed}`,
    /// `Transferring -> {Done, Failed}`. Terminal phases never change.
    pub fn can_transition_to(self, next: Phase) -> bool {
        matches!(
            (self, next),
            (Phase::Queued, Phase::Skipped)
                | (Phase::Queued, Phase::Counting)
                | (Phase::Queued, Phase::Failed)
                | (Phase::Counting, Phase::Transferring)
                | (Phase::Counting, Phase::Failed)
                | (Phase::Transferring, Phase::Done)
                | (Phase::Transferring, Phase::Failed)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Queued => "queued",
            Phase::Counting => "counting",
            Phase::Transferring => "transferring",
            Phase::Skipped => "skipped",
            Phase::Done => "done",
            Phase::Failed => "failed",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Rejected phase change.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid progress transition for {key}: {from} -> {to}")]
pub struct InvalidTransition {
    pub key: String,
    pub from: Phase,
    pub to: Phase,
}

/// Progress of one table.
///
/// `total_units` is fixed when `Transferring` begins; `completed_units` only
/// grows and never exceeds `total_units`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferProgress {
    pub table_key: String,
    pub phase: Phase,
    pub total_units: u64,
    pub completed_units: u64,
    /// Set only when `phase == Failed`.
    pub last_error: Option<ErrorKind>,
    /// Read/write retries taken so far.
    pub retries: u32,
}

impl TransferProgress {
    pub fn new(table_key: impl Into<String>) -> Self {
        Self {
            table_key: table_key.into(),
            phase: Phase::Queued,
            total_units: 0,
            completed_units: 0,
            last_error: None,
            retries: 0,
        }
    }

    fn transition(&mut self, next: Phase) -> Result<(), InvalidTransition> {
        if !self.phase.can_transition_to(next) {
            return Err(InvalidTransition {
                key: self.table_key.clone(),
                from: self.phase,
                to: next,
            });
        }
        self.phase = next;
        Ok(())
    }

    pub fn begin_counting(&mut self) -> Result<(), InvalidTransition> {
        self.transition(Phase::Counting)
    }

    pub fn begin_transfer(&mut self, total_units: u64) -> Result<(), InvalidTransition> {
        self.transition(Phase::Transferring)?;
        self.total_units = total_units;
        Ok(())
    }

    /// Add written rows. Returns the number of rows that did not fit under
    /// `total_units` (rows inserted into the source after it was counted).
    pub fn advance(&mut self, rows: u64) -> Result<u64, InvalidTransition> {
        if self.phase != Phase::Transferring {
            return Err(InvalidTransition {
                key: self.table_key.clone(),
                from: self.phase,
                to: Phase::Transferring,
            });
        }
        let room = self.total_units - self.completed_units;
        let applied = rows.min(room);
        self.completed_units += applied;
        Ok(rows - applied)
    }

    pub fn complete(&mut self) -> Result<(), InvalidTransition> {
        self.transition(Phase::Done)
    }

    pub fn skip(&mut self) -> Result<(), InvalidTransition> {
        self.transition(Phase::Skipped)
    }

    pub fn fail(&mut self, kind: ErrorKind) -> Result<(), InvalidTransition> {
        self.transition(Phase::Failed)?;
        self.last_error = Some(kind);
        Ok(())
    }
}

/// One progress observation: `(table_key, phase, completed_units, total_units)`
/// plus the error kind of a failed table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub table_key: String,
    pub phase: Phase,
    pub completed_units: u64,
    pub total_units: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorKind>,
}

impl From<&TransferProgress> for ProgressEvent {
    fn from(p: &TransferProgress) -> Self {
        Self {
            table_key: p.table_key.clone(),
            phase: p.phase,
            completed_units: p.completed_units,
            total_units: p.total_units,
            error: p.last_error,
        }
    }
}

/// Receives progress events. Must not block and must not fail.
pub trait ProgressSink: Send + Sync {
    fn publish(&self, event: ProgressEvent);
}

/// Forwards events over an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<ProgressEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ProgressEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl ProgressSink for ChannelSink {
    fn publish(&self, event: ProgressEvent) {
        // Receiver gone means nobody is watching; the transfer carries on.
        let _ = self.tx.send(event);
    }
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

impl ProgressSink for NoopSink {
    fn publish(&self, _event: ProgressEvent) {}
}

/// Drives one table's progress and publishes every accepted change.
pub struct ProgressReporter {
    progress: TransferProgress,
    sink: Arc<dyn ProgressSink>,
}

impl ProgressReporter {
    pub fn new(table_key: impl Into<String>, sink: Arc<dyn ProgressSink>) -> Self {
        Self {
            progress: TransferProgress::new(table_key),
            sink,
        }
    }

    pub fn progress(&self) -> &TransferProgress {
        &self.progress
    }

    fn apply(&mut self, change: impl FnOnce(&mut TransferProgress) -> Result<(), InvalidTransition>) {
        match change(&mut self.progress) {
            Ok(()) => self.sink.publish(ProgressEvent::from(&self.progress)),
            Err(e) => warn!("{}", e),
        }
    }

    /// Publish the current (initial) state.
    pub fn announce(&self) {
        self.sink.publish(ProgressEvent::from(&self.progress));
    }

    pub fn counting(&mut self) {
        self.apply(TransferProgress::begin_counting);
    }

    pub fn transferring(&mut self, total_units: u64) {
        self.apply(|p| p.begin_transfer(total_units));
    }

    pub fn advance(&mut self, rows: u64) {
        match self.progress.advance(rows) {
            Ok(overflow) => {
                if overflow > 0 {
                    debug!(
                        "{}: {} rows beyond the initial count of {}",
                        self.progress.table_key, overflow, self.progress.total_units
                    );
                }
                self.sink.publish(ProgressEvent::from(&self.progress));
            }
            Err(e) => warn!("{}", e),
        }
    }

    /// Count a retry. Not published; retries show up in the table outcome.
    pub fn retried(&mut self) {
        self.progress.retries += 1;
    }

    pub fn done(&mut self) {
        self.apply(TransferProgress::complete);
    }

    pub fn skipped(&mut self) {
        self.apply(TransferProgress::skip);
    }

    pub fn failed(&mut self, kind: ErrorKind) {
        self.apply(|p| p.fail(kind));
    }
}
