//! Worker pool (spec.md §5), grounded on the teacher's own reach for
//! `rayon` to parallelize hot loops (`src/bin/cawlr.rs`'s
//! `ThreadPoolBuilder::new().num_threads(n).build_global()`).
//!
//! The spec's `enqueue`/`sync(n)` shape is a manual task queue plus
//! completion barrier; `rayon::ThreadPool::install` with a scoped
//! `par_iter` gives the same fan-out-then-barrier semantics without
//! hand-rolling the counter and condvar (REDESIGN FLAG, spec.md §9).

use rayon::prelude::*;

/// A dedicated thread pool sized independently of the global rayon pool,
/// so a trainer and a concurrent CV fold don't contend for the same
/// threads.
pub struct WorkerPool {
    pool: rayon::ThreadPool,
}

impl WorkerPool {
    pub fn new(num_threads: usize) -> Self {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(num_threads.max(1))
            .build()
            .expect("failed to build worker thread pool");
        Self { pool }
    }

    pub fn thread_number(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Split `0..len` into `self.thread_number()` contiguous ranges, run
    /// `f(start, end)` on each in parallel, and wait for all of them
    /// (spec.md §5's single fan-out-then-`sync` barrier).
    pub fn run_partitioned(&self, len: usize, f: impl Fn(usize, usize) + Sync) {
        if len == 0 {
            return;
        }
        let n = self.thread_number().min(len).max(1);
        self.pool.install(|| {
            (0..n).into_par_iter().for_each(|i| {
                let start = partition_start(len, n, i);
                let end = partition_start(len, n, i + 1);
                if end > start {
                    f(start, end);
                }
            });
        });
    }

    /// Same partitioning as [`Self::run_partitioned`], but collects one
    /// `T` per partition instead of relying on side effects — used by
    /// `Loss::evaluate`/metric accumulation, where each partition reduces
    /// to a partial sum that the driver then folds together.
    pub fn map_partitioned<T: Send>(&self, len: usize, f: impl Fn(usize, usize) -> T + Sync) -> Vec<T> {
        if len == 0 {
            return Vec::new();
        }
        let n = self.thread_number().min(len).max(1);
        self.pool.install(|| {
            (0..n)
                .into_par_iter()
                .map(|i| {
                    let start = partition_start(len, n, i);
                    let end = partition_start(len, n, i + 1);
                    f(start, end)
                })
                .collect()
        })
    }
}

/// Start offset of partition `i` of `n` over `[0, len)`, distributing the
/// remainder across the first partitions (spec.md §5 "deterministic
/// partition").
fn partition_start(len: usize, n: usize, i: usize) -> usize {
    let base = len / n;
    let rem = len % n;
    i * base + i.min(rem)
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn partitions_cover_every_index_exactly_once() {
        let len = 37;
        let n = 4;
        let mut covered = vec![0u8; len];
        for i in 0..n {
            let start = partition_start(len, n, i);
            let end = partition_start(len, n, i + 1);
            for slot in covered.iter_mut().take(end).skip(start) {
                *slot += 1;
            }
        }
        assert!(covered.iter().all(|&c| c == 1));
    }

    #[test]
    fn run_partitioned_visits_every_item() {
        let pool = WorkerPool::new(3);
        let seen = AtomicUsize::new(0);
        pool.run_partitioned(100, |start, end| {
            seen.fetch_add(end - start, Ordering::Relaxed);
        });
        assert_eq!(seen.load(Ordering::Relaxed), 100);
    }

    #[test]
    fn run_partitioned_handles_empty_input() {
        let pool = WorkerPool::new(2);
        pool.run_partitioned(0, |_, _| panic!("must not be called"));
    }

    #[test]
    fn map_partitioned_sums_match_sequential() {
        let pool = WorkerPool::new(4);
        let data: Vec<i64> = (0..50).collect();
        let partials = pool.map_partitioned(data.len(), |start, end| data[start..end].iter().sum::<i64>());
        let total: i64 = partials.into_iter().sum();
        assert_eq!(total, data.iter().sum::<i64>());
    }
}
