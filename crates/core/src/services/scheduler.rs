//! Bounded worker pool running one independent task per bytecode unit.

use std::any::Any;
use std::collections::{BTreeMap, BTreeSet};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;
use std::time::Instant;

use rayon::{ThreadPool, ThreadPoolBuilder};

use crate::error::{RunError, TransformError};

/// Results keyed by entry name, so the output never depends on completion order.
#[derive(Debug)]
pub struct Batch<R> {
    pub results: BTreeMap<String, Result<R, TransformError>>,
    /// The deadline elapsed before every task reported back.
    pub timed_out: bool,
}

pub struct Scheduler {
    pool: ThreadPool,
    workers: usize,
    queue_capacity: usize,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("workers", &self.workers)
            .field("queue_capacity", &self.queue_capacity)
            .finish()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

type Reply<R> = (String, Result<R, TransformError>);

impl Scheduler {
    pub fn new(workers: usize, queue_capacity: usize) -> Result<Self, RunError> {
        let workers = workers.max(1);
        let pool = ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("unravel-worker-{i}"))
            .build()
            .map_err(|e| RunError::Pool(e.to_string()))?;
        Ok(Self { pool, workers, queue_capacity })
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Run `task` on every `(name, input)` pair.
    ///
    /// Items are pulled lazily; at most `workers + queue_capacity` are in flight, and
    /// submission blocks until a slot frees up. Names must be unique. Once `deadline`
    /// passes, every unfinished or not yet submitted item resolves to
    /// [`TransformError::Timeout`] and abandoned tasks skip their work.
    pub fn run<I, T, R, F>(&self, items: I, deadline: Instant, task: F) -> Batch<R>
    where
        I: IntoIterator<Item = (String, T)>,
        T: Send + 'static,
        R: Send + 'static,
        F: Fn(&str, T) -> Result<R, TransformError> + Send + Sync + 'static,
    {
        let task = Arc::new(task);
        let cancel = Arc::new(AtomicBool::new(false));
        let (tx, rx) = mpsc::channel::<Reply<R>>();
        let limit = self.workers + self.queue_capacity;
        let mut in_flight = BTreeSet::new();
        let mut results = BTreeMap::new();
        let mut timed_out = false;

        for (name, input) in items {
            while !timed_out && in_flight.len() >= limit {
                timed_out = !wait_one(&rx, deadline, &mut in_flight, &mut results);
            }
            if timed_out {
                results.insert(name, Err(TransformError::Timeout));
                continue;
            }
            in_flight.insert(name.clone());
            let (tx, task, cancel) = (tx.clone(), Arc::clone(&task), Arc::clone(&cancel));
            self.pool.spawn(move || {
                let outcome = if cancel.load(Ordering::Relaxed) {
                    Err(TransformError::Timeout)
                } else {
                    panic::catch_unwind(AssertUnwindSafe(|| task(&name, input))).unwrap_or_else(
                        |payload| Err(TransformError::Panicked(panic_message(&*payload))),
                    )
                };
                // The coordinator may have stopped listening after the deadline.
                let _ = tx.send((name, outcome));
            });
        }
        drop(tx);

        while !timed_out && !in_flight.is_empty() {
            timed_out = !wait_one(&rx, deadline, &mut in_flight, &mut results);
        }
        if timed_out {
            cancel.store(true, Ordering::Relaxed);
            for name in in_flight {
                results.insert(name, Err(TransformError::Timeout));
            }
        }
        Batch { results, timed_out }
    }
}

/// Block for one reply. Returns `false` once the deadline has passed.
fn wait_one<R>(
    rx: &Receiver<Reply<R>>,
    deadline: Instant,
    in_flight: &mut BTreeSet<String>,
    results: &mut BTreeMap<String, Result<R, TransformError>>,
) -> bool {
    let remaining = deadline.saturating_duration_since(Instant::now());
    match rx.recv_timeout(remaining) {
        Ok((name, outcome)) => {
            in_flight.remove(&name);
            results.insert(name, outcome);
            true
        }
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn collects_results_by_name() {
        let scheduler = Scheduler::new(3, 1).unwrap();
        let items = (0..20).map(|i| (format!("u{i:02}"), i));
        let batch = scheduler.run(items, Instant::now() + Duration::from_secs(30), |_, i: u32| {
            Ok(i * 2)
        });
        assert!(!batch.timed_out);
        assert_eq!(batch.results.len(), 20);
        assert_eq!(batch.results["u07"], Ok(14));
    }

    #[test]
    fn panics_are_isolated() {
        let scheduler = Scheduler::new(2, 0).unwrap();
        let items = vec![("ok".to_string(), false), ("boom".to_string(), true)];
        let batch = scheduler.run(items, Instant::now() + Duration::from_secs(30), |_, p: bool| {
            if p {
                panic!("bad unit");
            }
            Ok(())
        });
        assert_eq!(batch.results["ok"], Ok(()));
        assert_eq!(batch.results["boom"], Err(TransformError::Panicked("bad unit".into())));
    }

    #[test]
    fn deadline_turns_stragglers_into_timeouts() {
        let scheduler = Scheduler::new(1, 0).unwrap();
        let items = (0..3).map(|i| (format!("u{i}"), i));
        let batch = scheduler.run(items, Instant::now() + Duration::from_millis(50), |_, _: u32| {
            std::thread::sleep(Duration::from_millis(400));
            Ok(())
        });
        assert!(batch.timed_out);
        assert!(batch.results.values().all(|r| *r == Err(TransformError::Timeout)));
        assert_eq!(batch.results.len(), 3);
    }
}
