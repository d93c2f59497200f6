//! Bounded worker pool used for both the table level and the partition level.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{MigrateError, Result};

/// How long stopped tasks get to hand back their results before they are
/// aborted.
const STOP_GRACE: Duration = Duration::from_secs(30);

/// Everything a pool handed back from [`WorkerPool::join`].
pub struct JoinOutcome<T> {
    /// One entry per task that returned, in completion order.
    pub results: Vec<Result<T>>,
    /// Why the pool stopped early, if it did.
    pub interrupted: Option<MigrateError>,
}

impl<T> JoinOutcome<T> {
    pub fn is_interrupted(&self) -> bool {
        self.interrupted.is_some()
    }
}

enum Next<T> {
    Joined(Option<std::result::Result<Result<T>, JoinError>>),
    TimedOut,
    Cancelled,
}

/// A fixed-size pool of tasks.
///
/// Every submitted future is spawned immediately but only starts its work
/// once it holds one of `size` permits. `join` waits for all of them.
///
/// Work that should wind down early watches [`WorkerPool::stop_token`]; the
/// pool fires it on timeout or cancellation and then collects what the tasks
/// return.
pub struct WorkerPool<T> {
    name: String,
    size: usize,
    permits: Arc<Semaphore>,
    stop: CancellationToken,
    tasks: JoinSet<Result<T>>,
}

impl<T: Send + 'static> WorkerPool<T> {
    pub fn new(name: impl Into<String>, size: usize) -> Self {
        let size = size.max(1);
        Self {
            name: name.into(),
            size,
            permits: Arc::new(Semaphore::new(size)),
            stop: CancellationToken::new(),
            tasks: JoinSet::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Number of submitted tasks that have not been joined.
    pub fn pending(&self) -> usize {
        self.tasks.len()
    }

    /// Fired when `join` gives up waiting.
    pub fn stop_token(&self) -> CancellationToken {
        self.stop.clone()
    }

    /// Spawn `work`. Tasks still waiting for a slot when the pool stops never
    /// start and yield `Err(Cancelled)`.
    pub fn submit<F>(&mut self, work: F)
    where
        F: Future<Output = T> + Send + 'static,
    {
        let permits = self.permits.clone();
        let stop = self.stop.clone();
        let name = self.name.clone();
        self.tasks.spawn(async move {
            let _permit = tokio::select! {
                biased;
                _ = stop.cancelled() => return Err(MigrateError::Cancelled),
                permit = permits.acquire_owned() => permit
                    .map_err(|e| MigrateError::pool(e, format!("acquiring slot in {}", name)))?,
            };
            Ok(work.await)
        });
    }

    /// Wait for every task.
    ///
    /// A task that panicked yields `Err(WorkerPanicked)`. If `timeout`
    /// elapses or `cancel` fires first, the stop token is fired and running
    /// tasks get a grace period to return what they have; the outcome then
    /// carries `Timeout` or `Cancelled` next to every result collected.
    pub async fn join(
        mut self,
        timeout: Option<Duration>,
        cancel: Option<&CancellationToken>,
    ) -> JoinOutcome<T> {
        let deadline = timeout.map(|t| tokio::time::Instant::now() + t);
        let mut results = Vec::with_capacity(self.tasks.len());

        let interrupted = loop {
            let joined = async {
                match deadline {
                    Some(d) => match tokio::time::timeout_at(d, self.tasks.join_next()).await {
                        Ok(entry) => Next::Joined(entry),
                        Err(_) => Next::TimedOut,
                    },
                    None => Next::Joined(self.tasks.join_next().await),
                }
            };
            let cancelled = async {
                match cancel {
                    Some(token) => token.cancelled().await,
                    None => std::future::pending().await,
                }
            };

            let next = tokio::select! {
                next = joined => next,
                _ = cancelled => Next::Cancelled,
            };

            match next {
                Next::Joined(Some(entry)) => results.push(self.unpack(entry)),
                Next::Joined(None) => break None,
                Next::TimedOut => {
                    let after = timeout.unwrap_or_default();
                    warn!(
                        "{}: timed out after {:?}, stopping {} tasks",
                        self.name,
                        after,
                        self.tasks.len()
                    );
                    break Some(MigrateError::timeout(self.name.clone(), after));
                }
                Next::Cancelled => {
                    warn!("{}: cancelled, stopping {} tasks", self.name, self.tasks.len());
                    break Some(MigrateError::Cancelled);
                }
            }
        };

        if interrupted.is_some() {
            self.drain(&mut results).await;
        }
        debug!("{}: {} tasks returned", self.name, results.len());
        JoinOutcome {
            results,
            interrupted,
        }
    }

    /// Fire the stop token and collect whatever the tasks hand back.
    async fn drain(&mut self, results: &mut Vec<Result<T>>) {
        self.stop.cancel();
        let grace = tokio::time::Instant::now() + STOP_GRACE;
        loop {
            match tokio::time::timeout_at(grace, self.tasks.join_next()).await {
                Ok(Some(entry)) => results.push(self.unpack(entry)),
                Ok(None) => return,
                Err(_) => {
                    warn!(
                        "{}: {} tasks ignored the stop request, aborting",
                        self.name,
                        self.tasks.len()
                    );
                    self.tasks.shutdown().await;
                    return;
                }
            }
        }
    }

    fn unpack(&self, entry: std::result::Result<Result<T>, JoinError>) -> Result<T> {
        entry.unwrap_or_else(|e| {
            Err(MigrateError::WorkerPanicked {
                pool: self.name.clone(),
                message: e.to_string(),
            })
        })
    }
}
