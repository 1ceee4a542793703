use crate::app::{ChangeNotifier, DocFinder, RequestError};
use crate::core::error::{Error, Result};
use crate::indexing::scanner::ScanPolicy;
use notify_debouncer_full::{
    new_debouncer,
    notify::{RecursiveMode, Watcher},
    DebounceEventResult, DebouncedEvent,
};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Quiet period before a burst of events is delivered
const DEBOUNCE: Duration = Duration::from_secs(2);

/// How long to wait before retrying a batch that arrived during a job
const RETRY_INTERVAL: Duration = Duration::from_secs(5);

/// Watches the configured roots and runs a smart rescan when matching files
/// change. Events that arrive while a job is running are retried once it ends.
#[derive(Debug, Clone)]
pub struct FileWatcher {
    debounce: Duration,
    retry_interval: Duration,
}

impl Default for FileWatcher {
    fn default() -> Self {
        Self {
            debounce: DEBOUNCE,
            retry_interval: RETRY_INTERVAL,
        }
    }
}

impl FileWatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    pub fn with_retry_interval(mut self, retry_interval: Duration) -> Self {
        self.retry_interval = retry_interval;
        self
    }
}

impl ChangeNotifier for FileWatcher {
    fn start_watching(&self, app: DocFinder) -> Result<()> {
        let roots: Vec<PathBuf> = app
            .config()
            .roots
            .iter()
            .filter_map(|root| match root.canonicalize() {
                Ok(root) => Some(root),
                Err(e) => {
                    warn!(root = %root.display(), error = %e, "Not watching missing root");
                    None
                }
            })
            .collect();
        let policy = app.config().policy.clone();
        let debounce = self.debounce;
        let retry_interval = self.retry_interval;

        // The debouncer lives on the watch thread; setup errors come back here.
        let (ready_tx, ready_rx) = mpsc::channel();
        thread::Builder::new()
            .name("docfinder-watch".to_string())
            .spawn(move || {
                let (tx, rx) = mpsc::channel();
                let debouncer = new_debouncer(debounce, None, move |result: DebounceEventResult| {
                    match result {
                        Ok(events) => {
                            let _ = tx.send(events);
                        }
                        Err(errors) => {
                            for error in errors {
                                warn!(error = %error, "File watch error");
                            }
                        }
                    }
                });
                let mut debouncer = match debouncer {
                    Ok(debouncer) => debouncer,
                    Err(e) => {
                        let _ = ready_tx.send(Err(watch_error("Failed to create file watcher", e)));
                        return;
                    }
                };

                for root in &roots {
                    if let Err(e) = debouncer.watcher().watch(root, RecursiveMode::Recursive) {
                        let _ = ready_tx.send(Err(watch_error("Failed to watch directory", e)));
                        return;
                    }
                    info!(root = %root.display(), "Watching for changes");
                }
                let _ = ready_tx.send(Ok(()));

                process_events(&app, rx, &roots, &policy, retry_interval);
                drop(debouncer);
            })?;

        ready_rx.recv().map_err(|_| {
            Error::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "File watcher thread exited during setup",
            ))
        })?
    }
}

fn watch_error(context: &str, e: impl std::fmt::Display) -> Error {
    Error::Io(std::io::Error::new(
        std::io::ErrorKind::Other,
        format!("{}: {}", context, e),
    ))
}

/// Turn event batches into rescans until the event channel closes
fn process_events(
    app: &DocFinder,
    rx: Receiver<Vec<DebouncedEvent>>,
    roots: &[PathBuf],
    policy: &ScanPolicy,
    retry_interval: Duration,
) {
    let mut dirty = false;

    loop {
        let batch = if dirty {
            match rx.recv_timeout(retry_interval) {
                Ok(events) => Some(events),
                Err(RecvTimeoutError::Timeout) => None,
                Err(RecvTimeoutError::Disconnected) => break,
            }
        } else {
            match rx.recv() {
                Ok(events) => Some(events),
                Err(_) => break,
            }
        };

        if let Some(events) = batch {
            let relevant = events
                .iter()
                .flat_map(|event| event.paths.iter())
                .filter(|path| is_relevant(roots, policy, path))
                .count();
            debug!(events = events.len(), relevant, "File events");
            dirty |= relevant > 0;
        }

        if dirty {
            dirty = !rescan(app);
        }
    }

    debug!("File watch channel closed");
}

/// Run a smart rescan to completion. Returns false when it should be retried.
fn rescan(app: &DocFinder) -> bool {
    match app.trigger_smart_rescan() {
        Ok(handle) => {
            let state = handle.wait();
            info!(status = %state.status, indexed = state.indexed, "Rescan after file changes");
            true
        }
        Err(RequestError::AlreadyRunning(running)) => {
            debug!(step = %running.step, "Job running, rescan deferred");
            false
        }
        Err(e) => {
            warn!(error = %e, "Rescan after file changes rejected");
            true
        }
    }
}

/// True for a changed path the index may care about: an allow-listed file,
/// or a directory or removed entry that could have held one, below a root
/// and outside the deny-list.
pub fn is_relevant(roots: &[PathBuf], policy: &ScanPolicy, path: &Path) -> bool {
    roots
        .iter()
        .filter(|root| path.starts_with(root))
        .any(|root| {
            let relative = path.strip_prefix(root).unwrap_or(path);
            if policy.is_excluded(relative) {
                return false;
            }
            policy.allows_extension(path) || path.is_dir() || !path.exists()
        })
}
