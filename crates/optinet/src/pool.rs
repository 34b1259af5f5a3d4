// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Bounded worker pool with one queue per fan-out tier.
//!
//! Polling fans out three levels deep (devices, telemetry groups, ports).
//! Each level gets its own fixed set of worker threads so a task on one tier
//! can wait on tasks of the tier below without starving it. Tasks on the
//! lowest tier never submit work.
//!
//! ```text
//! Device tier  -- poll one device --------+
//!   Group tier -- one telemetry group ----+--> blocking NETCONF calls
//!     Entity tier -- one port ------------+
//! ```

use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::{Mutex, RwLock};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::thread::{self, JoinHandle};
use thiserror::Error;

/// A unit of work submitted to [`WorkerPool::run_all`].
pub type Task<R> = Box<dyn FnOnce() -> R + Send + 'static>;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Fan-out level a task belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Device,
    Group,
    Entity,
}

impl Tier {
    pub const ALL: [Tier; 3] = [Tier::Device, Tier::Group, Tier::Entity];

    fn index(self) -> usize {
        match self {
            Tier::Device => 0,
            Tier::Group => 1,
            Tier::Entity => 2,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Tier::Device => "device",
            Tier::Group => "group",
            Tier::Entity => "entity",
        }
    }
}

/// Worker threads per tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSizes {
    pub device: usize,
    pub group: usize,
    pub entity: usize,
}

impl Default for PoolSizes {
    fn default() -> Self {
        Self {
            device: 32,
            group: 32,
            entity: 64,
        }
    }
}

impl PoolSizes {
    fn of(&self, tier: Tier) -> usize {
        match tier {
            Tier::Device => self.device,
            Tier::Group => self.group,
            Tier::Entity => self.entity,
        }
        .max(1)
    }
}

/// Why a task produced no result.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TaskError {
    #[error("task panicked: {0}")]
    Panicked(String),

    #[error("worker pool is shut down")]
    Rejected,
}

/// Fixed-size, three-tier thread pool.
pub struct WorkerPool {
    queues: RwLock<Option<Vec<Sender<Job>>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    sizes: PoolSizes,
}

impl WorkerPool {
    /// Spawn every worker thread up front.
    pub fn new(sizes: PoolSizes) -> std::io::Result<Self> {
        let mut queues = Vec::with_capacity(Tier::ALL.len());
        let mut workers = Vec::new();

        for tier in Tier::ALL {
            let (tx, rx) = channel::unbounded::<Job>();
            for i in 0..sizes.of(tier) {
                let rx = rx.clone();
                let handle = thread::Builder::new()
                    .name(format!("optinet-{}-{}", tier.name(), i))
                    .spawn(move || worker_loop(rx))?;
                workers.push(handle);
            }
            queues.push(tx);
        }

        tracing::debug!(
            device = sizes.device,
            group = sizes.group,
            entity = sizes.entity,
            "worker pool started"
        );

        Ok(Self {
            queues: RwLock::new(Some(queues)),
            workers: Mutex::new(workers),
            sizes,
        })
    }

    pub fn sizes(&self) -> PoolSizes {
        self.sizes
    }

    pub fn is_shut_down(&self) -> bool {
        self.queues.read().is_none()
    }

    /// Run `tasks` on `tier`, at most `limit` of them in flight at once, and
    /// wait for all of them.
    ///
    /// Outcomes are returned in task order. A panicking task yields
    /// [`TaskError::Panicked`] and never affects its siblings.
    pub fn run_all<R: Send + 'static>(
        &self,
        tier: Tier,
        tasks: Vec<Task<R>>,
        limit: usize,
    ) -> Vec<Result<R, TaskError>> {
        let total = tasks.len();
        let mut results: Vec<Option<Result<R, TaskError>>> = (0..total).map(|_| None).collect();
        if total == 0 {
            return Vec::new();
        }

        let Some(queue) = self
            .queues
            .read()
            .as_ref()
            .map(|q| q[tier.index()].clone())
        else {
            return (0..total).map(|_| Err(TaskError::Rejected)).collect();
        };

        let (done_tx, done_rx) = channel::unbounded::<(usize, Result<R, TaskError>)>();
        let mut pending = tasks.into_iter().enumerate();
        let mut in_flight = 0usize;
        let limit = limit.max(1);

        loop {
            while in_flight < limit {
                let Some((idx, task)) = pending.next() else {
                    break;
                };
                let done = done_tx.clone();
                let job: Job = Box::new(move || {
                    let outcome = panic::catch_unwind(AssertUnwindSafe(task))
                        .map_err(|payload| TaskError::Panicked(panic_message(payload.as_ref())));
                    let _ = done.send((idx, outcome));
                });
                if queue.send(job).is_err() {
                    results[idx] = Some(Err(TaskError::Rejected));
                    continue;
                }
                in_flight += 1;
            }

            if in_flight == 0 {
                break;
            }
            match done_rx.recv() {
                Ok((idx, outcome)) => {
                    results[idx] = Some(outcome);
                    in_flight -= 1;
                }
                Err(_) => break,
            }
        }

        results
            .into_iter()
            .map(|r| r.unwrap_or(Err(TaskError::Rejected)))
            .collect()
    }

    /// Stop accepting work, let queued jobs finish, and join every worker.
    ///
    /// Idempotent. When called from one of the pool's own workers that worker
    /// is left to exit on its own.
    pub fn shutdown(&self) {
        if self.queues.write().take().is_none() {
            return;
        }
        let me = thread::current().id();
        let workers: Vec<JoinHandle<()>> = self.workers.lock().drain(..).collect();
        for handle in workers {
            if handle.thread().id() == me {
                continue;
            }
            if handle.join().is_err() {
                tracing::warn!("worker thread exited abnormally");
            }
        }
        tracing::debug!("worker pool stopped");
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(rx: Receiver<Job>) {
    while let Ok(job) = rx.recv() {
        job();
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    fn small() -> WorkerPool {
        WorkerPool::new(PoolSizes {
            device: 2,
            group: 4,
            entity: 8,
        })
        .unwrap()
    }

    #[test]
    fn test_results_in_task_order() {
        let pool = small();
        let tasks: Vec<Task<usize>> = (0..20usize)
            .map(|i| {
                Box::new(move || {
                    thread::sleep(Duration::from_millis((20 - i) as u64));
                    i * 10
                }) as Task<usize>
            })
            .collect();
        let out = pool.run_all(Tier::Entity, tasks, 8);
        let values: Vec<usize> = out.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(values, (0..20usize).map(|i| i * 10).collect::<Vec<_>>());
    }

    #[test]
    fn test_panic_is_isolated() {
        let pool = small();
        let tasks: Vec<Task<u32>> = vec![
            Box::new(|| 1u32),
            Box::new(|| -> u32 { panic!("port 4103 exploded") }),
            Box::new(|| 3u32),
        ];
        let out = pool.run_all(Tier::Group, tasks, 4);
        assert_eq!(out[0], Ok(1));
        assert_eq!(out[1], Err(TaskError::Panicked("port 4103 exploded".into())));
        assert_eq!(out[2], Ok(3));

        // workers survive the panic
        let again = pool.run_all(Tier::Group, vec![Box::new(|| 7u32) as Task<u32>], 1);
        assert_eq!(again, vec![Ok(7)]);
    }

    #[test]
    fn test_limit_caps_in_flight() {
        let pool = small();
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let tasks: Vec<Task<()>> = (0..12)
            .map(|_| {
                let active = active.clone();
                let peak = peak.clone();
                Box::new(move || {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    thread::sleep(Duration::from_millis(10));
                    active.fetch_sub(1, Ordering::SeqCst);
                }) as Task<()>
            })
            .collect();
        pool.run_all(Tier::Entity, tasks, 3);
        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert!(peak.load(Ordering::SeqCst) >= 1);
    }

    #[test]
    fn test_runs_concurrently() {
        let pool = small();
        let started = Instant::now();
        let tasks: Vec<Task<()>> = (0..8)
            .map(|_| Box::new(|| thread::sleep(Duration::from_millis(100))) as Task<()>)
            .collect();
        pool.run_all(Tier::Entity, tasks, 8);
        assert!(started.elapsed() < Duration::from_millis(400));
    }

    #[test]
    fn test_nested_tiers() {
        let pool = Arc::new(small());
        let inner = pool.clone();
        let tasks: Vec<Task<usize>> = (0..2)
            .map(|_| {
                let pool = inner.clone();
                Box::new(move || {
                    let ports: Vec<Task<usize>> =
                        (0..5usize).map(|p| Box::new(move || p) as Task<usize>).collect();
                    pool.run_all(Tier::Entity, ports, 2)
                        .into_iter()
                        .filter_map(Result::ok)
                        .sum()
                }) as Task<usize>
            })
            .collect();
        let out = pool.run_all(Tier::Device, tasks, 2);
        assert_eq!(out, vec![Ok(10), Ok(10)]);
        drop(inner);
    }

    #[test]
    fn test_shutdown_rejects() {
        let pool = small();
        pool.shutdown();
        pool.shutdown();
        assert!(pool.is_shut_down());
        let out = pool.run_all(Tier::Device, vec![Box::new(|| 1) as Task<i32>], 1);
        assert_eq!(out, vec![Err(TaskError::Rejected)]);
        assert!(pool.run_all::<i32>(Tier::Device, Vec::new(), 1).is_empty());
    }
}
