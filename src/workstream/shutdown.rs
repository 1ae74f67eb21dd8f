//! Shared shutdown state for all long-running activities
//!
//! Shutdown is cooperative: activities poll [`ShutdownController::is_shutdown`]
//! between units of work, and every unit of work is time-bounded so the flag
//! is observed promptly. The first recorded cause wins; later causes are
//! logged and dropped.

use crate::workstream::error::WorkstreamError;
use log::{debug, error};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tokio::sync::broadcast;

pub(crate) struct ShutdownController {
    requested: AtomicBool,
    cause: Mutex<Option<WorkstreamError>>,
    notify: broadcast::Sender<()>,
}

impl ShutdownController {
    pub fn new() -> Self {
        let (notify, _) = broadcast::channel(1);
        Self {
            requested: AtomicBool::new(false),
            cause: Mutex::new(None),
            notify,
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    /// Request shutdown, recording `cause` if it is the first one
    pub fn request(&self, cause: Option<WorkstreamError>) {
        if let Some(err) = cause {
            let mut slot = self.cause.lock().expect("shutdown cause lock poisoned");
            match slot.as_ref() {
                None => {
                    error!("shutdown requested: {}", err);
                    *slot = Some(err);
                }
                Some(first) => {
                    debug!("suppressing secondary shutdown cause {} (first: {})", err, first)
                }
            }
        }
        self.requested.store(true, Ordering::SeqCst);
        // No receivers just means nobody is waiting yet
        let _ = self.notify.send(());
    }

    /// First recorded cause, if the shutdown was an error
    pub fn cause(&self) -> Option<WorkstreamError> {
        self.cause
            .lock()
            .expect("shutdown cause lock poisoned")
            .clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.notify.subscribe()
    }

    /// Wait until shutdown has been requested
    pub async fn wait(&self) {
        if self.is_shutdown() {
            return;
        }
        let mut rx = self.subscribe();
        if self.is_shutdown() {
            return;
        }
        let _ = rx.recv().await;
    }
}

impl Default for ShutdownController {
    fn default() -> Self {
        Self::new()
    }
}
