use std::error::Error as StdError;
use std::fmt;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::EtlError;

use super::source::ReaderKind;

/// Severity classification used for observer callbacks and alerting thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ReadSeverity {
    /// Informational event.
    Info,
    /// Warning-level event (non-fatal).
    Warning,
    /// Error-level event (read failed).
    Error,
    /// Critical error (unreachable file or database).
    Critical,
}

/// Context about a read attempt.
#[derive(Debug, Clone)]
pub struct ReadContext {
    /// Display form of the source descriptor (passwords masked).
    pub source: String,
    /// Reader selected for the source, if dispatch got that far.
    pub kind: Option<ReaderKind>,
}

/// Minimal stats reported on a successful read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadStats {
    /// Total rows read, summed across sheets.
    pub rows: usize,
    /// Number of tables (sheets) read.
    pub tables: usize,
}

/// Observer interface for read outcomes.
///
/// Implementors can record metrics, logs, or trigger alerts.
pub trait ReadObserver: Send + Sync {
    /// Called when a read succeeds.
    fn on_success(&self, _ctx: &ReadContext, _stats: ReadStats) {}

    /// Called when a read fails.
    fn on_failure(&self, _ctx: &ReadContext, _severity: ReadSeverity, _error: &EtlError) {}

    /// Called when a read failure meets an alert threshold.
    ///
    /// Default behavior forwards to [`Self::on_failure`].
    fn on_alert(&self, ctx: &ReadContext, severity: ReadSeverity, error: &EtlError) {
        self.on_failure(ctx, severity, error)
    }
}

/// An observer that fans out callbacks to a list of observers.
#[derive(Default)]
pub struct CompositeObserver {
    observers: Vec<Arc<dyn ReadObserver>>,
}

impl CompositeObserver {
    pub fn new(observers: Vec<Arc<dyn ReadObserver>>) -> Self {
        Self { observers }
    }
}

impl fmt::Debug for CompositeObserver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompositeObserver")
            .field("observers_len", &self.observers.len())
            .finish()
    }
}

impl ReadObserver for CompositeObserver {
    fn on_success(&self, ctx: &ReadContext, stats: ReadStats) {
        for o in &self.observers {
            o.on_success(ctx, stats);
        }
    }

    fn on_failure(&self, ctx: &ReadContext, severity: ReadSeverity, error: &EtlError) {
        for o in &self.observers {
            o.on_failure(ctx, severity, error);
        }
    }

    fn on_alert(&self, ctx: &ReadContext, severity: ReadSeverity, error: &EtlError) {
        for o in &self.observers {
            o.on_alert(ctx, severity, error);
        }
    }
}

fn kind_label(kind: Option<ReaderKind>) -> String {
    kind.map_or_else(|| "unknown".to_string(), |k| k.to_string())
}

/// Forwards read events to the `log` facade.
#[derive(Debug, Default)]
pub struct LogObserver;

impl ReadObserver for LogObserver {
    fn on_success(&self, ctx: &ReadContext, stats: ReadStats) {
        log::info!(
            "[read][ok] kind={} source={} rows={} tables={}",
            kind_label(ctx.kind),
            ctx.source,
            stats.rows,
            stats.tables
        );
    }

    fn on_failure(&self, ctx: &ReadContext, severity: ReadSeverity, error: &EtlError) {
        log::warn!(
            "[read][{:?}] kind={} source={} err={}",
            severity,
            kind_label(ctx.kind),
            ctx.source,
            error
        );
    }

    fn on_alert(&self, ctx: &ReadContext, severity: ReadSeverity, error: &EtlError) {
        log::error!(
            "[ALERT][read][{:?}] kind={} source={} err={}",
            severity,
            kind_label(ctx.kind),
            ctx.source,
            error
        );
    }
}

/// Appends read events to a local log file.
#[derive(Debug)]
pub struct FileObserver {
    path: PathBuf,
    lock: Mutex<()>,
    write_failed: AtomicBool,
}

impl FileObserver {
    /// Create a file observer that appends events to `path`.
    ///
    /// Writes never fail the read; the first failure to open or write the file is logged.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            lock: Mutex::new(()),
            write_failed: AtomicBool::new(false),
        }
    }

    /// `true` once a write to the event file failed.
    pub fn has_failed(&self) -> bool {
        self.write_failed.load(Ordering::Relaxed)
    }

    fn append_line(&self, line: &str) {
        let _guard = self.lock.lock().ok();
        let written = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .and_then(|mut f| {
                writeln!(f, "{} {line}", chrono::Local::now().format("%Y-%m-%d %H:%M:%S"))
            });
        if let Err(e) = written {
            if !self.write_failed.swap(true, Ordering::Relaxed) {
                log::warn!("cannot write read events to {}: {e}", self.path.display());
            }
        }
    }
}

impl ReadObserver for FileObserver {
    fn on_success(&self, ctx: &ReadContext, stats: ReadStats) {
        self.append_line(&format!(
            "ok kind={} source={} rows={} tables={}",
            kind_label(ctx.kind),
            ctx.source,
            stats.rows,
            stats.tables
        ));
    }

    fn on_failure(&self, ctx: &ReadContext, severity: ReadSeverity, error: &EtlError) {
        self.append_line(&format!(
            "fail severity={severity:?} kind={} source={} err={error}",
            kind_label(ctx.kind),
            ctx.source
        ));
    }

    fn on_alert(&self, ctx: &ReadContext, severity: ReadSeverity, error: &EtlError) {
        self.append_line(&format!(
            "ALERT severity={severity:?} kind={} source={} err={error}",
            kind_label(ctx.kind),
            ctx.source
        ));
    }
}

/// Classify a read failure.
///
/// Unreachable files and databases are `Critical`, everything else is an `Error`.
pub fn severity_for_error(e: &EtlError) -> ReadSeverity {
    if e.is_infrastructure() || error_chain_contains_io(e) {
        ReadSeverity::Critical
    } else {
        ReadSeverity::Error
    }
}

fn error_chain_contains_io(e: &(dyn StdError + 'static)) -> bool {
    let mut cur: Option<&(dyn StdError + 'static)> = Some(e);
    while let Some(err) = cur {
        if err.is::<std::io::Error>() {
            return true;
        }
        cur = err.source();
    }
    false
}
