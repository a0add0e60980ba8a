//! Coalescing background writer for the configuration store.
//!
//! Requests only raise a pending flag and wake the task. The task waits out
//! the window, then writes the latest snapshot once, no matter how many
//! requests arrived meanwhile. A write mutex keeps at most one write in
//! flight, including writes forced by [`Persister::write_now`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::{Mutex, Notify};
use tokio_util::sync::CancellationToken;

use super::ConfigMap;
use super::backend::ConfigBackend;

/// Something the persister can take snapshots from.
pub(crate) trait SnapshotSource: Send + Sync + 'static {
    fn snapshot(&self) -> ConfigMap;
    fn backend(&self) -> Arc<dyn ConfigBackend>;
}

pub(crate) struct Persister {
    pending: AtomicBool,
    wake: Notify,
    write_lock: Mutex<()>,
    window: Duration,
    shutdown: CancellationToken,
}

impl Persister {
    pub(crate) fn new(window: Duration) -> Self {
        Self {
            pending: AtomicBool::new(false),
            wake: Notify::new(),
            write_lock: Mutex::new(()),
            window,
            shutdown: CancellationToken::new(),
        }
    }

    pub(crate) fn request(&self) {
        self.pending.store(true, Ordering::SeqCst);
        self.wake.notify_one();
    }

    pub(crate) fn is_pending(&self) -> bool {
        self.pending.load(Ordering::SeqCst)
    }

    pub(crate) fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub(crate) async fn run<S: SnapshotSource>(self: Arc<Self>, source: Weak<S>) {
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = self.wake.notified() => {}
            }
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.window) => {}
            }
            let Some(source) = source.upgrade() else {
                break;
            };
            self.write_now(source.as_ref()).await;
        }
        tracing::debug!("config persist task stopped");
    }

    /// Write the current snapshot if a persist is pending. Failures are logged.
    pub(crate) async fn write_now<S: SnapshotSource>(&self, source: &S) {
        let _guard = self.write_lock.lock().await;
        if !self.pending.swap(false, Ordering::SeqCst) {
            return;
        }
        let snapshot = source.snapshot();
        let keys = snapshot.len();
        let backend = source.backend();
        match tokio::task::spawn_blocking(move || backend.save(&snapshot)).await {
            Ok(Ok(())) => tracing::debug!(keys, "config saved"),
            Ok(Err(error)) => tracing::error!(
                %error,
                "failed at saving config file, please ensure it is writable"
            ),
            Err(error) => tracing::error!(%error, "config save task panicked"),
        }
    }
}
