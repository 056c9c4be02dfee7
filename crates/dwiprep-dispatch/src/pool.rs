//! Bounded local dispatcher: at most K subjects in flight.
//!
//! K worker tasks run on a dedicated rayon pool of K threads and claim
//! subjects from a [`WorkQueue`] in list order. A subject's failure (error
//! or panic) is recorded and the worker moves on to the next subject.

use std::any::Any;
use std::fmt::Display;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use dwiprep_core::{ProgressContext, WorkQueue, is_shutdown_requested};
use indicatif::ProgressBar;

use crate::error::DispatchError;

/// Outcome of a batch.
#[derive(Debug, Default)]
pub struct BatchSummary {
    pub total: usize,
    /// Subjects that finished successfully, in completion order
    pub completed: Vec<String>,
    /// Subjects that failed, with the error message
    pub failed: Vec<(String, String)>,
    /// Subjects never started (shutdown requested)
    pub skipped: Vec<String>,
    pub elapsed: Duration,
}

impl BatchSummary {
    pub fn all_succeeded(&self) -> bool {
        self.failed.is_empty() && self.skipped.is_empty()
    }

    pub fn log(&self) {
        log::info!("=== Batch Summary ===");
        log::info!(
            "Subjects: {}/{} completed ({} failed, {} not started)",
            self.completed.len(),
            self.total,
            self.failed.len(),
            self.skipped.len()
        );
        for (subject, error) in &self.failed {
            log::error!("[{subject}] {error}");
        }
        log::info!("Time: {:.1} min", self.elapsed.as_secs_f64() / 60.0);
    }
}

/// Runs a per-subject job over a list with bounded parallelism.
#[derive(Debug, Clone, Copy)]
pub struct Dispatcher {
    max_parallel: usize,
}

impl Dispatcher {
    pub fn new(max_parallel: usize) -> Self {
        Self {
            max_parallel: max_parallel.max(1),
        }
    }

    pub fn max_parallel(&self) -> usize {
        self.max_parallel
    }

    /// Process every subject with `job`, never more than K at once.
    ///
    /// Subjects are started in list order. Once shutdown is requested no
    /// new subject is started; those left over are reported as skipped.
    pub fn run<T, E, F>(
        &self,
        subjects: &[T],
        progress: &ProgressContext,
        job: F,
    ) -> Result<BatchSummary, DispatchError>
    where
        T: Display + Sync,
        E: Display,
        F: Fn(&T, &ProgressBar) -> Result<(), E> + Sync,
    {
        let start = Instant::now();
        let workers = self.max_parallel.min(subjects.len()).max(1);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("dwiprep-worker-{i}"))
            .build()
            .map_err(DispatchError::Pool)?;

        log::info!(
            "Processing {} subjects with {} workers",
            subjects.len(),
            workers
        );

        let queue = WorkQueue::new(subjects.iter().collect::<Vec<_>>());
        let overall = progress.batch_bar(subjects.len());
        let completed = Mutex::new(Vec::new());
        let failed = Mutex::new(Vec::new());

        pool.scope(|s| {
            for _ in 0..workers {
                s.spawn(|_| {
                    loop {
                        if is_shutdown_requested() {
                            break;
                        }
                        let Some(&subject) = queue.next() else {
                            break;
                        };
                        let name = subject.to_string();
                        let pb = progress.subject_line(&name);
                        log::info!("[{name}] starting");

                        let result = panic::catch_unwind(AssertUnwindSafe(|| job(subject, &pb)));
                        pb.finish_and_clear();
                        overall.inc(1);

                        match result {
                            Ok(Ok(())) => {
                                log::info!("[{name}] done");
                                lock(&completed).push(name);
                            }
                            Ok(Err(e)) => {
                                log::error!("[{name}] failed: {e}");
                                lock(&failed).push((name, e.to_string()));
                            }
                            Err(payload) => {
                                let msg = format!("panicked: {}", panic_message(payload.as_ref()));
                                log::error!("[{name}] {msg}");
                                lock(&failed).push((name, msg));
                            }
                        }
                    }
                });
            }
        });
        overall.finish_and_clear();

        let skipped: Vec<String> = queue.unclaimed().iter().map(|s| s.to_string()).collect();
        if !skipped.is_empty() {
            log::warn!("shutdown requested: {} subjects not started", skipped.len());
        }

        Ok(BatchSummary {
            total: subjects.len(),
            completed: completed.into_inner().unwrap_or_else(PoisonError::into_inner),
            failed: failed.into_inner().unwrap_or_else(PoisonError::into_inner),
            skipped,
            elapsed: start.elapsed(),
        })
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "unknown panic"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_list_is_noop() {
        let summary = Dispatcher::new(2)
            .run(&Vec::<String>::new(), &ProgressContext::hidden(), |_, _| {
                Ok::<(), String>(())
            })
            .unwrap();
        assert_eq!(summary.total, 0);
        assert!(summary.all_succeeded());
    }

    #[test]
    fn zero_parallelism_becomes_one() {
        assert_eq!(Dispatcher::new(0).max_parallel(), 1);
    }

    #[test]
    fn single_worker_preserves_order() {
        let subjects: Vec<String> = (1..=5).map(|i| format!("sub-{i:02}")).collect();
        let summary = Dispatcher::new(1)
            .run(&subjects, &ProgressContext::hidden(), |_, _| Ok::<(), String>(()))
            .unwrap();
        assert_eq!(summary.completed, subjects);
    }

    #[test]
    fn errors_and_panics_are_contained() {
        let subjects = vec!["ok-1", "err", "boom", "ok-2"];
        let summary = Dispatcher::new(2)
            .run(&subjects, &ProgressContext::hidden(), |s, _| match *s {
                "err" => Err("stage fit_tensor failed".to_string()),
                "boom" => panic!("worker exploded"),
                _ => Ok(()),
            })
            .unwrap();

        let mut completed = summary.completed.clone();
        completed.sort();
        assert_eq!(completed, vec!["ok-1", "ok-2"]);
        assert_eq!(summary.failed.len(), 2);
        let boom = summary.failed.iter().find(|(s, _)| s == "boom").unwrap();
        assert!(boom.1.contains("worker exploded"));
        assert!(!summary.all_succeeded());
    }

    #[test]
    fn panic_payloads() {
        let p: Box<dyn Any + Send> = Box::new("static");
        assert_eq!(panic_message(p.as_ref()), "static");
        let p: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(p.as_ref()), "owned");
        let p: Box<dyn Any + Send> = Box::new(42);
        assert_eq!(panic_message(p.as_ref()), "unknown panic");
    }
}
