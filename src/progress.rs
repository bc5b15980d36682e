//! Progress UI (spinner) for export runs.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use exporter_core::export::{ExportEvent, ExportObserver, TracingObserver};
use indicatif::{ProgressBar, ProgressStyle};

/// Spinner is shown only on an interactive, non-quiet stderr.
pub(crate) fn should_use_spinner(stderr_is_terminal: bool, quiet: bool, no_progress: bool) -> bool {
    stderr_is_terminal && !quiet && !no_progress
}

/// Observer that keeps a spinner message current and forwards to tracing.
pub(crate) struct ProgressObserver {
    spinner: ProgressBar,
    total: AtomicUsize,
    done: AtomicUsize,
    in_flight: AtomicUsize,
    logs: TracingObserver,
}

impl ProgressObserver {
    pub(crate) fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::with_template("{spinner} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        spinner.enable_steady_tick(Duration::from_millis(100));
        Self::with_bar(spinner)
    }

    fn with_bar(spinner: ProgressBar) -> Self {
        Self {
            spinner,
            total: AtomicUsize::new(0),
            done: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            logs: TracingObserver,
        }
    }

    pub(crate) fn finish(&self) {
        self.spinner.finish_and_clear();
    }

    fn message(&self) -> String {
        format!(
            "[{}/{}] Exporting logs ({} in flight)...",
            self.done.load(Ordering::SeqCst),
            self.total.load(Ordering::SeqCst),
            self.in_flight.load(Ordering::SeqCst)
        )
    }
}

impl ExportObserver for ProgressObserver {
    fn on_event(&self, event: &ExportEvent) {
        match event {
            ExportEvent::Listed { total } => self.total.store(*total, Ordering::SeqCst),
            ExportEvent::RetrievalStarted { .. } => {
                self.in_flight.fetch_add(1, Ordering::SeqCst);
            }
            ExportEvent::RetrievalFinished { .. } => {
                let _ = self
                    .in_flight
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
            }
            ExportEvent::TaskFinished { .. } => {
                self.done.fetch_add(1, Ordering::SeqCst);
            }
            ExportEvent::RetryPassStarted { pending } => {
                self.spinner
                    .set_message(format!("Retrying {pending} failed log(s)..."));
            }
            _ => {}
        }
        if !matches!(event, ExportEvent::RetryPassStarted { .. }) {
            self.spinner.set_message(self.message());
        }
        self.spinner.suspend(|| self.logs.on_event(event));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_use_spinner() {
        assert!(should_use_spinner(true, false, false));
        assert!(!should_use_spinner(false, false, false));
        assert!(!should_use_spinner(true, true, false));
        assert!(!should_use_spinner(true, false, true));
    }

    #[test]
    fn test_progress_observer_counts() {
        let observer = ProgressObserver::with_bar(ProgressBar::hidden());
        observer.on_event(&ExportEvent::Listed { total: 2 });
        observer.on_event(&ExportEvent::RetrievalStarted { id: "a".into() });
        assert_eq!(observer.message(), "[0/2] Exporting logs (1 in flight)...");

        observer.on_event(&ExportEvent::RetrievalFinished { id: "a".into() });
        observer.on_event(&ExportEvent::RetrievalFinished { id: "a".into() });
        observer.on_event(&ExportEvent::TaskFinished {
            id: "a".into(),
            outcome: exporter_core::export::OutcomeKind::Success,
        });
        assert_eq!(observer.message(), "[1/2] Exporting logs (0 in flight)...");
        observer.finish();
    }
}
