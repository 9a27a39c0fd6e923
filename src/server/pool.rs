//! Worker pool supervision.
//!
//! A fixed number of worker tasks share one listener and accept
//! concurrently. The supervisor watches worker exits and respawns
//! replacements until the shutdown token fires, so a crashed or
//! panicked worker never shrinks the pool.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::connection::serve_connection;
use super::{InitFn, ServerShared};
use crate::transport::Listener;

/// Pause after a failed accept before retrying.
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// How long workers get to observe the shutdown token before the
/// supervisor aborts them.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

/// Supervisor over the worker tasks.
///
/// Workers resolve to their slot number so the supervisor can report
/// which one went down.
pub(crate) struct WorkerPool {
    workers: JoinSet<usize>,
    cancel: CancellationToken,
    next_slot: usize,
}

impl WorkerPool {
    pub(crate) fn new(cancel: CancellationToken) -> Self {
        Self {
            workers: JoinSet::new(),
            cancel,
            next_slot: 0,
        }
    }

    /// Spawn `count` workers and supervise them until cancellation.
    ///
    /// `make_worker` builds the future for a given slot; it is called
    /// again each time a worker has to be replaced. On cancellation the
    /// workers get a grace window to finish their own teardown; any
    /// still running after that are aborted.
    pub(crate) async fn run<F, Fut>(&mut self, count: usize, mut make_worker: F)
    where
        F: FnMut(usize) -> Fut,
        Fut: Future<Output = usize> + Send + 'static,
    {
        for slot in 0..count {
            self.workers.spawn(make_worker(slot));
        }
        self.next_slot = count;

        loop {
            let exited = tokio::select! {
                _ = self.cancel.cancelled() => break,
                exited = self.workers.join_next() => exited,
            };
            let Some(exited) = exited else { break };
            if self.cancel.is_cancelled() {
                break;
            }

            match exited {
                Ok(slot) => {
                    warn!(slot, "worker exited, restarting");
                    self.workers.spawn(make_worker(slot));
                }
                Err(e) => {
                    let slot = self.next_slot;
                    self.next_slot += 1;
                    warn!(error = %e, slot, "worker crashed, restarting");
                    self.workers.spawn(make_worker(slot));
                }
            }
        }

        let drained = tokio::time::timeout(SHUTDOWN_GRACE, async {
            while self.workers.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!("workers did not stop within the grace window, aborting");
        }
        self.workers.shutdown().await;
    }
}

/// Body of one worker: accept connections and serve each in its own task.
///
/// Returns the worker's slot number on exit. Connection tasks belong to
/// the worker's own `JoinSet`, so a panicking handler takes down one
/// connection, not the worker.
pub(crate) async fn worker_loop<S>(
    slot: usize,
    listener: Arc<Listener>,
    shared: Arc<ServerShared<S>>,
    cancel: CancellationToken,
    worker_init: Option<Arc<InitFn<S>>>,
) -> usize
where
    S: Send + Sync + 'static,
{
    if let Some(init) = worker_init {
        if let Err(e) = init(&shared.data) {
            warn!(slot, error = %e, "worker init failed");
            return slot;
        }
    }
    debug!(slot, "worker started");

    let mut connections: JoinSet<()> = JoinSet::new();
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!(slot, peer = %peer, "accepted connection");
                    let shared = Arc::clone(&shared);
                    connections.spawn(async move {
                        serve_connection(stream, peer, &shared).await;
                    });
                }
                Err(e) => {
                    warn!(slot, error = %e, "accept failed");
                    tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
                }
            },
            finished = connections.join_next(), if !connections.is_empty() => {
                if let Some(Err(e)) = finished {
                    if e.is_panic() {
                        warn!(slot, "connection task panicked");
                    }
                }
            }
        }
    }

    // Hard shutdown: in-flight connections are aborted, not drained.
    connections.shutdown().await;
    debug!(slot, "worker stopped");
    slot
}
