//! Coordination of a dynamic set of concurrently running tasks.
//!
//! A [`TaskGroup`] spawns futures onto the tokio runtime, counts how many are
//! still running and remembers the first error one of them reported. An
//! optional filter sees every error before it is captured and may replace or
//! suppress it.

use std::future::Future;
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::watch;
use tracing::trace;

type ErrorFilter<E> = Arc<dyn Fn(E) -> Option<E> + Send + Sync>;

struct Shared<E> {
    /// Number of outstanding tasks
    outstanding: watch::Sender<usize>,
    /// First unfiltered error since the group was last idle
    first_error: Mutex<Option<E>>,
    /// Optional error filter
    filter: RwLock<Option<ErrorFilter<E>>>,
}

/// Group of concurrently running tasks with first-error capture.
///
/// `run` may be called from many tasks at once. `wait` must only race with
/// `run` while at least one task of the group stays active for the whole race
/// window; otherwise a task started right after the count reached zero may
/// or may not be waited for.
pub struct TaskGroup<E> {
    shared: Arc<Shared<E>>,
}

impl<E> TaskGroup<E>
where
    E: Send + 'static,
{
    /// Create an idle group
    pub fn new() -> Self {
        let (outstanding, _) = watch::channel(0usize);
        Self {
            shared: Arc::new(Shared {
                outstanding,
                first_error: Mutex::new(None),
                filter: RwLock::new(None),
            }),
        }
    }

    /// Spawn a task as part of the group
    pub fn run<F>(&self, task: F)
    where
        F: Future<Output = Result<(), E>> + Send + 'static,
    {
        let shared = Arc::clone(&self.shared);
        shared.outstanding.send_modify(|count| {
            if *count == 0 {
                *lock(&shared.first_error) = None;
            }
            *count += 1;
        });

        // Built before spawning so a task dropped unpolled still decrements.
        let guard = Completion(shared);
        tokio::spawn(async move {
            if let Err(err) = task.await {
                guard.record(err);
            }
        });
    }

    /// Wait until every task has finished and return the first captured error
    pub async fn wait(&self) -> Result<(), E> {
        let mut outstanding = self.shared.outstanding.subscribe();
        // The sender lives in `shared`, so the channel cannot close here.
        let _ = outstanding.wait_for(|count| *count == 0).await;

        match lock(&self.shared.first_error).take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Install a filter applied to every error a task reports
    pub fn on_error<F>(&self, filter: F)
    where
        F: Fn(E) -> Option<E> + Send + Sync + 'static,
    {
        let mut slot = match self.shared.filter.write() {
            Ok(slot) => slot,
            Err(poisoned) => poisoned.into_inner(),
        };
        *slot = Some(Arc::new(filter));
    }

    /// Number of tasks still running
    pub fn outstanding(&self) -> usize {
        *self.shared.outstanding.borrow()
    }
}

impl<E> Clone for TaskGroup<E> {
    /// The clone shares the same group
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<E> Default for TaskGroup<E>
where
    E: Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Decrements the outstanding count when a task ends, including by panic or
/// by the runtime dropping it.
struct Completion<E>(Arc<Shared<E>>);

impl<E> Completion<E> {
    fn record(&self, err: E) {
        let filter = match self.0.filter.read() {
            Ok(slot) => slot.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };

        let err = match filter {
            Some(filter) => filter(err),
            None => Some(err),
        };

        if let Some(err) = err {
            let mut first = lock(&self.0.first_error);
            if first.is_none() {
                *first = Some(err);
            } else {
                trace!("Dropping task error, an earlier one was already captured");
            }
        }
    }
}

impl<E> Drop for Completion<E> {
    fn drop(&mut self) {
        self.0.outstanding.send_modify(|count| *count -= 1);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
