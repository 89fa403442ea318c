use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;

use rayon::prelude::*;

use crate::error::PoolError;

/// Worker count used by the loading, upload and validation pipelines.
pub const DEFAULT_WORKERS: usize = 10;

#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// A bounded set of workers draining a shared work queue.
///
/// Items are pulled from the input iterator as workers become free. Every
/// finished item is sent on a result channel; the first failing item cancels
/// the run, so items not yet started are skipped. [`TaskGroup::run`] returns
/// only after every worker has stopped and all sent results were drained.
pub struct TaskGroup {
    pool: rayon::ThreadPool,
}

impl TaskGroup {
    /// Start a group with `workers` threads.
    ///
    /// # Errors
    ///
    /// Returns an error when the thread pool cannot be created.
    pub fn new(workers: usize) -> Result<Self, PoolError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers.max(1))
            .thread_name(|index| format!("stackline-worker-{index}"))
            .build()
            .map_err(|source| PoolError::Build { source })?;
        Ok(Self { pool })
    }

    /// Run `work` over every item, returning results in completion order.
    ///
    /// # Errors
    ///
    /// Returns the first error delivered by a worker.
    pub fn run<I, T, R, E, F>(&self, items: I, work: F) -> Result<Vec<R>, E>
    where
        I: IntoIterator<Item = T>,
        I::IntoIter: Send,
        T: Send,
        R: Send,
        E: Send,
        F: Fn(T) -> Result<R, E> + Sync + Send,
    {
        let cancel = CancelToken::default();
        let (sender, receiver) = mpsc::channel::<Result<R, E>>();

        let items = items.into_iter();
        self.pool.install(|| {
            // Err(()) only signals early termination to rayon.
            let _ = items
                .par_bridge()
                .try_for_each_with(sender, |sender, item| {
                    if cancel.is_cancelled() {
                        return Err(());
                    }

                    let result = work(item);
                    let failed = result.is_err();
                    if failed {
                        cancel.cancel();
                    }

                    sender.send(result).map_err(|_| ())?;
                    if failed { Err(()) } else { Ok(()) }
                });
        });

        let mut results = Vec::new();
        for result in receiver {
            results.push(result?);
        }
        Ok(results)
    }
}
