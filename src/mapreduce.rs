//! Map and fold user functions over every block of an iterator.
//!
//! Both operations run either on the iterator itself, block by block, or on
//! `n` shards from [`ChunkIterator::generate_workers`] spread over a rayon
//! pool. Shard results are always combined in shard order, so a parallel
//! run returns what the sequential run returns, provided the user functions
//! don't depend on which shard they run in.
//!
//! ```no_run
//! use chunkwise::{Accumulate, ChunkIterator, MemoryStore, Workers};
//!
//! # fn main() -> anyhow::Result<()> {
//! # let mut it = ChunkIterator::builder(MemoryStore::new()).file("a").groups("g").build()?;
//! // Rows per block, in block order
//! let sizes = it.map(|block, _| block.len(), Workers::Count(4))?;
//!
//! // Total rows; `+=` is used when no operator is given
//! let total = it.accumulate(|block, _| block.len(), Accumulate::add_assign(), Workers::Count(4))?;
//! # Ok(())
//! # }
//! ```

use crate::iterator::ChunkIterator;
use crate::store::RowStore;
use crate::table::Table;
use anyhow::{Context, Result};
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::fmt;
use std::ops::AddAssign;
use std::sync::Arc;
use tracing::debug;

/// Where map/accumulate work runs.
#[derive(Clone, Default)]
pub enum Workers {
    /// On the calling thread, over the iterator itself.
    #[default]
    Sequential,
    /// On a dedicated pool of `n` threads, over `n` shards.
    Count(usize),
    /// On an existing pool, over `n` shards.
    Pool(Arc<ThreadPool>, usize),
}

impl Workers {
    /// One shard per logical CPU.
    #[must_use]
    pub fn auto() -> Self {
        Self::Count(num_cpus::get().max(1))
    }
}

impl From<usize> for Workers {
    fn from(n: usize) -> Self {
        Self::Count(n)
    }
}

impl fmt::Debug for Workers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sequential => f.write_str("Sequential"),
            Self::Count(n) => f.debug_tuple("Count").field(n).finish(),
            Self::Pool(pool, n) => f
                .debug_struct("Pool")
                .field("threads", &pool.current_num_threads())
                .field("shards", n)
                .finish(),
        }
    }
}

type FoldFn<A, B> = Arc<dyn Fn(A, B) -> Result<A> + Send + Sync>;
type SeedFn<A, B> = Arc<dyn Fn(B) -> Result<A> + Send + Sync>;

/// How [`ChunkIterator::accumulate`] folds block results of type `B` into an
/// accumulator of type `A`, and how it merges shard accumulators.
///
/// The operator can update the accumulator in place or return a new one.
/// Without an initial value the first block result becomes the accumulator,
/// which needs `A == B`. Without a merge function shard accumulators are
/// merged with the operator.
pub struct Accumulate<A, B = A> {
    operator: FoldFn<A, B>,
    merge: FoldFn<A, A>,
    seed: Option<SeedFn<A, B>>,
    init: Option<A>,
}

impl<A: AddAssign + 'static> Accumulate<A> {
    /// Fold with `acc += addend`.
    #[must_use]
    pub fn add_assign() -> Self {
        Self::in_place(|acc: &mut A, addend| *acc += addend)
    }
}

impl<A: 'static> Accumulate<A> {
    fn same_type(operator: FoldFn<A, A>) -> Self {
        Self {
            merge: Arc::clone(&operator),
            operator,
            seed: Some(Arc::new(Ok::<A, anyhow::Error>)),
            init: None,
        }
    }

    /// Operator that updates the accumulator in place.
    pub fn in_place(op: impl Fn(&mut A, A) + Send + Sync + 'static) -> Self {
        Self::same_type(Arc::new(move |mut acc, addend| {
            op(&mut acc, addend);
            Ok(acc)
        }))
    }

    /// Fallible in-place operator.
    pub fn try_in_place(op: impl Fn(&mut A, A) -> Result<()> + Send + Sync + 'static) -> Self {
        Self::same_type(Arc::new(move |mut acc, addend| {
            op(&mut acc, addend)?;
            Ok(acc)
        }))
    }

    /// Operator that returns the next accumulator.
    pub fn returning(op: impl Fn(A, A) -> A + Send + Sync + 'static) -> Self {
        Self::same_type(Arc::new(move |acc, addend| Ok(op(acc, addend))))
    }
}

impl<A: 'static, B: 'static> Accumulate<A, B> {
    /// Fold block results of another type into `init`. Shard accumulators
    /// are merged in place with `merge`.
    pub fn fold_into(
        init: A,
        op: impl Fn(&mut A, B) -> Result<()> + Send + Sync + 'static,
        merge: impl Fn(&mut A, A) -> Result<()> + Send + Sync + 'static,
    ) -> Self {
        Self {
            operator: Arc::new(move |mut acc, addend| {
                op(&mut acc, addend)?;
                Ok(acc)
            }),
            merge: Arc::new(move |mut acc, other| {
                merge(&mut acc, other)?;
                Ok(acc)
            }),
            seed: None,
            init: Some(init),
        }
    }

    /// Start every shard from a copy of `init`.
    #[must_use]
    pub fn init(mut self, init: A) -> Self {
        self.init = Some(init);
        self
    }

    #[must_use]
    pub fn merge_in_place(mut self, merge: impl Fn(&mut A, A) + Send + Sync + 'static) -> Self {
        self.merge = Arc::new(move |mut acc, other| {
            merge(&mut acc, other);
            Ok(acc)
        });
        self
    }

    #[must_use]
    pub fn merge_returning(mut self, merge: impl Fn(A, A) -> A + Send + Sync + 'static) -> Self {
        self.merge = Arc::new(move |acc, other| Ok(merge(acc, other)));
        self
    }

    fn step(&self, acc: Option<A>, addend: B) -> Result<Option<A>> {
        match (acc, &self.seed) {
            (Some(acc), _) => (self.operator)(acc, addend).map(Some),
            (None, Some(seed)) => seed(addend).map(Some),
            // Only reachable without an init, which `fold_into` always sets.
            (None, None) => Ok(None),
        }
    }
}

impl<S: RowStore> ChunkIterator<S> {
    /// Apply `f` to every block and collect the results in block order.
    ///
    /// # Errors
    /// Fails on store errors or when the worker pool can't be built.
    pub fn map<R, F>(&mut self, f: F, workers: impl Into<Workers>) -> Result<Vec<R>>
    where
        R: Send,
        F: Fn(&Table, &ChunkIterator<S>) -> R + Sync,
    {
        self.try_map(|block, it| Ok(f(block, it)), workers)
    }

    /// [`map`](Self::map) with a fallible function; the first error wins.
    ///
    /// # Errors
    /// Fails when `f` fails, on store errors, or when the worker pool can't
    /// be built.
    pub fn try_map<R, F>(&mut self, f: F, workers: impl Into<Workers>) -> Result<Vec<R>>
    where
        R: Send,
        F: Fn(&Table, &ChunkIterator<S>) -> Result<R> + Sync,
    {
        let shards = self.run_sharded(workers.into(), |it| {
            it.rewind();
            let mut out = Vec::new();
            while it.next_block()?.is_some() {
                out.push(f(it.buffer(), &*it)?);
            }
            Ok(out)
        })?;
        Ok(shards.into_iter().flatten().collect())
    }

    /// Fold `f` over every block. `None` when there were no blocks and no
    /// initial value.
    ///
    /// With workers, every shard starts from its own copy of the initial
    /// value and the shard results are merged in shard order.
    ///
    /// # Errors
    /// Fails on store errors, when the operator fails, or when the worker
    /// pool can't be built.
    pub fn accumulate<A, B, F>(
        &mut self,
        f: F,
        acc: Accumulate<A, B>,
        workers: impl Into<Workers>,
    ) -> Result<Option<A>>
    where
        A: Clone + Send + Sync + 'static,
        B: 'static,
        F: Fn(&Table, &ChunkIterator<S>) -> B + Sync,
    {
        self.try_accumulate(|block, it| Ok(f(block, it)), acc, workers)
    }

    /// [`accumulate`](Self::accumulate) with a fallible function.
    ///
    /// # Errors
    /// Fails when `f` or the operator fails, on store errors, or when the
    /// worker pool can't be built.
    pub fn try_accumulate<A, B, F>(
        &mut self,
        f: F,
        acc: Accumulate<A, B>,
        workers: impl Into<Workers>,
    ) -> Result<Option<A>>
    where
        A: Clone + Send + Sync + 'static,
        B: 'static,
        F: Fn(&Table, &ChunkIterator<S>) -> Result<B> + Sync,
    {
        let partials = self.run_sharded(workers.into(), |it| {
            it.rewind();
            let mut total = acc.init.clone();
            while it.next_block()?.is_some() {
                let addend = f(it.buffer(), &*it)?;
                total = acc.step(total, addend)?;
            }
            Ok(total)
        })?;

        let mut merged: Option<A> = None;
        for partial in partials {
            merged = match (merged, partial) {
                (Some(a), Some(b)) => Some((acc.merge)(a, b)?),
                (a, b) => a.or(b),
            };
        }
        Ok(merged)
    }

    /// Run `job` on this iterator, or on one shard per worker; results come
    /// back in shard order.
    pub(crate) fn run_sharded<T, J>(&mut self, workers: Workers, job: J) -> Result<Vec<T>>
    where
        T: Send,
        J: Fn(&mut ChunkIterator<S>) -> Result<T> + Sync,
    {
        let (pool, n) = match workers {
            Workers::Sequential => return Ok(vec![job(self)?]),
            Workers::Pool(pool, n) => (pool, n),
            Workers::Count(n) => {
                let shards = self.generate_workers(n)?;
                let pool = ThreadPoolBuilder::new()
                    .num_threads(n)
                    .build()
                    .context("build worker pool")?;
                debug!(threads = n, "built worker pool");
                return run_on(&pool, shards, &job);
            }
        };
        let shards = self.generate_workers(n)?;
        run_on(&pool, shards, &job)
    }
}

fn run_on<S, T, J>(pool: &ThreadPool, shards: Vec<ChunkIterator<S>>, job: &J) -> Result<Vec<T>>
where
    S: RowStore,
    T: Send,
    J: Fn(&mut ChunkIterator<S>) -> Result<T> + Sync,
{
    pool.install(|| {
        shards
            .into_par_iter() // one shard per task, collected in shard order
            .map(|mut it| job(&mut it))
            .collect::<Result<Vec<_>>>()
    })
}
