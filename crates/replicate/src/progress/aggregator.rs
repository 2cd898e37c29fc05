//! Turns the progress event stream into display updates.

use std::collections::{BTreeMap, HashMap};
use std::io;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use super::{Phase, ProgressEvent};
use crate::error::ErrorKind;

/// A single change to the rendered indicators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "change", rename_all = "snake_case")]
pub enum DisplayChange {
    /// First event for a key: create its queued indicator.
    Added { key: String, phase: Phase },
    /// Queued indicator changes label (queued -> counting).
    Relabeled { key: String, phase: Phase },
    /// Queued indicator is swapped for a transfer bar of `total` rows.
    Replaced { key: String, total: u64 },
    /// Transfer bar moves.
    Advanced { key: String, completed: u64, total: u64 },
    /// Key reached a terminal phase; its indicator goes away.
    Removed {
        key: String,
        phase: Phase,
        completed: u64,
        total: u64,
        error: Option<ErrorKind>,
    },
}

/// Renders indicator changes. Errors are swallowed by the aggregator.
pub trait ProgressDisplay: Send {
    fn apply(&mut self, change: &DisplayChange) -> io::Result<()>;

    /// Called once after the last event.
    fn finish(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Terminal state of one table as seen by the aggregator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LedgerEntry {
    pub phase: Phase,
    pub completed_units: u64,
    pub total_units: u64,
    pub error: Option<ErrorKind>,
}

/// Terminal phases per table key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProgressLedger {
    pub tables: BTreeMap<String, LedgerEntry>,
}

impl ProgressLedger {
    pub fn terminal_count(&self) -> usize {
        self.tables.len()
    }

    pub fn phase_of(&self, key: &str) -> Option<Phase> {
        self.tables.get(key).map(|e| e.phase)
    }

    pub fn count(&self, phase: Phase) -> usize {
        self.tables.values().filter(|e| e.phase == phase).count()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Indicator {
    Queued,
    Transfer,
}

/// Consumes progress events and drives a [`ProgressDisplay`].
pub struct ProgressAggregator<D: ProgressDisplay> {
    display: D,
    active: HashMap<String, Indicator>,
    ledger: ProgressLedger,
    display_errors: u64,
}

impl<D: ProgressDisplay + 'static> ProgressAggregator<D> {
    /// Run an aggregator over `rx` until every sender is dropped.
    pub fn spawn(rx: mpsc::UnboundedReceiver<ProgressEvent>, display: D) -> JoinHandle<ProgressLedger> {
        tokio::spawn(async move { ProgressAggregator::new(display).run(rx).await })
    }
}

impl<D: ProgressDisplay> ProgressAggregator<D> {
    pub fn new(display: D) -> Self {
        Self {
            display,
            active: HashMap::new(),
            ledger: ProgressLedger::default(),
            display_errors: 0,
        }
    }

    pub async fn run(mut self, mut rx: mpsc::UnboundedReceiver<ProgressEvent>) -> ProgressLedger {
        while let Some(event) = rx.recv().await {
            self.handle(event);
        }
        self.finish()
    }

    /// Apply one event.
    pub fn handle(&mut self, event: ProgressEvent) {
        // Late events for a finished key are ignored.
        if self.ledger.tables.contains_key(&event.table_key) {
            return;
        }

        let key = event.table_key;
        let current = self.active.get(&key).copied();

        if event.phase.is_terminal() {
            if current.is_none() {
                self.render(DisplayChange::Added {
                    key: key.clone(),
                    phase: event.phase,
                });
            }
            self.active.remove(&key);
            self.render(DisplayChange::Removed {
                key: key.clone(),
                phase: event.phase,
                completed: event.completed_units,
                total: event.total_units,
                error: event.error,
            });
            self.ledger.tables.insert(
                key,
                LedgerEntry {
                    phase: event.phase,
                    completed_units: event.completed_units,
                    total_units: event.total_units,
                    error: event.error,
                },
            );
            return;
        }

        match (event.phase, current) {
            (Phase::Transferring, Some(Indicator::Transfer)) => {
                self.render(DisplayChange::Advanced {
                    key,
                    completed: event.completed_units,
                    total: event.total_units,
                });
            }
            (Phase::Transferring, existing) => {
                if existing.is_none() {
                    self.render(DisplayChange::Added {
                        key: key.clone(),
                        phase: Phase::Transferring,
                    });
                }
                self.render(DisplayChange::Replaced {
                    key: key.clone(),
                    total: event.total_units,
                });
                if event.completed_units > 0 {
                    self.render(DisplayChange::Advanced {
                        key: key.clone(),
                        completed: event.completed_units,
                        total: event.total_units,
                    });
                }
                self.active.insert(key, Indicator::Transfer);
            }
            (phase, None) => {
                self.render(DisplayChange::Added {
                    key: key.clone(),
                    phase,
                });
                self.active.insert(key, Indicator::Queued);
            }
            (phase, Some(_)) => {
                self.render(DisplayChange::Relabeled { key, phase });
            }
        }
    }

    /// Finish the display and return the ledger.
    pub fn finish(mut self) -> ProgressLedger {
        if let Err(e) = self.display.finish() {
            self.display_errors += 1;
            debug!("Progress display finish failed: {}", e);
        }
        if self.display_errors > 0 {
            debug!("{} progress display updates failed", self.display_errors);
        }
        self.ledger
    }

    pub fn ledger(&self) -> &ProgressLedger {
        &self.ledger
    }

    fn render(&mut self, change: DisplayChange) {
        if let Err(e) = self.display.apply(&change) {
            if self.display_errors == 0 {
                debug!("Progress display update failed: {}", e);
            }
            self.display_errors += 1;
        }
    }
}
