//! Terminal renderings of table progress, plus a log writer that keeps
//! log lines from tearing through the progress bars.

use std::collections::HashMap;
use std::io::{self, Write};

use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use replicate::{DisplayChange, Phase, ProgressDisplay};
use tracing_subscriber::fmt::MakeWriter;

/// Progress output selected on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ProgressFormat {
    /// One bar per active table on stderr
    Bars,
    /// JSON lines on stderr
    Json,
    /// No progress output
    #[value(name = "none")]
    Off,
}

/// One spinner per queued table, swapped for a bar once rows start moving.
pub struct BarDisplay {
    multi: MultiProgress,
    indicators: HashMap<String, ProgressBar>,
    queued_style: ProgressStyle,
    transfer_style: ProgressStyle,
}

impl BarDisplay {
    pub fn new(multi: MultiProgress) -> Self {
        let queued_style = ProgressStyle::with_template("{spinner} {prefix:.bold} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner());
        let transfer_style = ProgressStyle::with_template(
            "[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} ({percent}%) {prefix}",
        )
        .map(|s| s.progress_chars("##-"))
        .unwrap_or_else(|_| ProgressStyle::default_bar());

        Self {
            multi,
            indicators: HashMap::new(),
            queued_style,
            transfer_style,
        }
    }

    fn remove(&mut self, key: &str) {
        if let Some(bar) = self.indicators.remove(key) {
            bar.finish_and_clear();
            self.multi.remove(&bar);
        }
    }
}

impl ProgressDisplay for BarDisplay {
    fn apply(&mut self, change: &DisplayChange) -> io::Result<()> {
        match change {
            DisplayChange::Added { key, phase } => {
                let spinner = self.multi.add(ProgressBar::new_spinner());
                spinner.set_style(self.queued_style.clone());
                spinner.set_prefix(key.clone());
                spinner.set_message(phase.as_str());
                self.indicators.insert(key.clone(), spinner);
            }
            DisplayChange::Relabeled { key, phase } => {
                if let Some(spinner) = self.indicators.get(key) {
                    spinner.set_message(phase.as_str());
                }
            }
            DisplayChange::Replaced { key, total } => {
                let bar = ProgressBar::new(*total);
                let bar = match self.indicators.get(key) {
                    Some(old) => self.multi.insert_after(old, bar),
                    None => self.multi.add(bar),
                };
                bar.set_style(self.transfer_style.clone());
                bar.set_prefix(key.clone());
                self.remove(key);
                self.indicators.insert(key.clone(), bar);
            }
            DisplayChange::Advanced { key, completed, .. } => {
                if let Some(bar) = self.indicators.get(key) {
                    bar.set_position(*completed);
                }
            }
            DisplayChange::Removed {
                key,
                phase,
                completed,
                error,
                ..
            } => {
                self.remove(key);
                let line = match (phase, error) {
                    (Phase::Failed, Some(kind)) => {
                        format!("{:>8} {} ({}, {} rows copied)", phase, key, kind, completed)
                    }
                    (Phase::Done, _) => format!("{:>8} {} ({} rows)", phase, key, completed),
                    _ => format!("{:>8} {}", phase, key),
                };
                self.multi.println(line)?;
            }
        }
        Ok(())
    }

    fn finish(&mut self) -> io::Result<()> {
        self.indicators.clear();
        self.multi.clear()
    }
}

/// Writes each display change as one JSON line.
pub struct JsonLinesDisplay<W: Write + Send> {
    out: W,
}

impl<W: Write + Send> JsonLinesDisplay<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }
}

impl<W: Write + Send> ProgressDisplay for JsonLinesDisplay<W> {
    fn apply(&mut self, change: &DisplayChange) -> io::Result<()> {
        serde_json::to_writer(&mut self.out, change)?;
        self.out.write_all(b"\n")
    }

    fn finish(&mut self) -> io::Result<()> {
        self.out.flush()
    }
}

/// The display picked by `--progress-format`.
pub enum CliDisplay {
    Bars(BarDisplay),
    Json(JsonLinesDisplay<io::Stderr>),
}

impl ProgressDisplay for CliDisplay {
    fn apply(&mut self, change: &DisplayChange) -> io::Result<()> {
        match self {
            CliDisplay::Bars(d) => d.apply(change),
            CliDisplay::Json(d) => d.apply(change),
        }
    }

    fn finish(&mut self) -> io::Result<()> {
        match self {
            CliDisplay::Bars(d) => d.finish(),
            CliDisplay::Json(d) => d.finish(),
        }
    }
}

/// A shared bar container drawing to stderr.
pub fn multi_progress() -> MultiProgress {
    MultiProgress::with_draw_target(ProgressDrawTarget::stderr())
}

/// `MakeWriter` for tracing that writes to stderr, hiding the progress bars
/// while each line is written.
#[derive(Clone, Default)]
pub struct SuspendingWriter {
    multi: Option<MultiProgress>,
}

impl SuspendingWriter {
    pub fn new(multi: Option<MultiProgress>) -> Self {
        Self { multi }
    }
}

pub struct SuspendedStderr {
    multi: Option<MultiProgress>,
}

impl Write for SuspendedStderr {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match &self.multi {
            Some(multi) => multi.suspend(|| io::stderr().write(buf)),
            None => io::stderr().write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stderr().flush()
    }
}

impl<'a> MakeWriter<'a> for SuspendingWriter {
    type Writer = SuspendedStderr;

    fn make_writer(&'a self) -> Self::Writer {
        SuspendedStderr {
            multi: self.multi.clone(),
        }
    }
}
