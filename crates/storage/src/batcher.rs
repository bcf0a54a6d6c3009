//! Write batching.
//!
//! Statements accumulate until the pending count reaches the threshold, at
//! which point they are committed as one transaction. A failed batch is
//! dropped as a whole and never retried.

use crate::statement::Statement;
use std::time::Instant;
use tracing::{debug, warn};

/// Executes one batch atomically: either every statement is applied or none.
pub trait BatchExecutor {
    fn execute_batch(&mut self, batch: &[Statement]) -> rusqlite::Result<()>;
}

/// A batch that failed to commit.
#[derive(Debug)]
pub struct BatchFailure {
    /// Statements dropped, including any not yet queued from the same call.
    pub statements: usize,
    /// Catalog entries whose rows were dropped with the batch.
    pub discarded_fields: Vec<String>,
    pub source: rusqlite::Error,
}

/// Running totals of committed and failed batches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchStats {
    pub statements_committed: u64,
    pub batches_committed: u64,
    pub batches_failed: u64,
}

/// Accumulates statements and commits them in bounded transactions.
#[derive(Debug)]
pub struct CommandBatcher {
    pending: Vec<Statement>,
    threshold: usize,
    stats: BatchStats,
}

impl CommandBatcher {
    /// A batcher flushing every `threshold` statements (at least one).
    pub fn new(threshold: usize) -> Self {
        Self {
            pending: Vec::new(),
            threshold: threshold.max(1),
            stats: BatchStats::default(),
        }
    }

    /// Number of statements waiting to be committed.
    pub fn size(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    pub fn stats(&self) -> BatchStats {
        self.stats
    }

    /// Queue statements, flushing each time the pending count reaches the
    /// threshold.
    ///
    /// If a flush fails, the statements of this call that were not queued
    /// yet are dropped too and counted in the failure.
    pub fn enqueue<E, I>(&mut self, statements: I, executor: &mut E) -> Result<(), BatchFailure>
    where
        E: BatchExecutor,
        I: IntoIterator<Item = Statement>,
    {
        let mut statements = statements.into_iter();
        while let Some(statement) = statements.next() {
            self.pending.push(statement);
            if self.pending.len() >= self.threshold {
                if let Err(mut failure) = self.flush(executor) {
                    for rest in statements.by_ref() {
                        if let Some(identifier) = rest.registered_field() {
                            failure.discarded_fields.push(identifier.to_string());
                        }
                        failure.statements += 1;
                    }
                    return Err(failure);
                }
            }
        }
        Ok(())
    }

    /// Commit everything pending as one transaction.
    ///
    /// Returns the number of statements committed. The queue is empty
    /// afterwards whether or not the commit succeeded.
    pub fn flush<E: BatchExecutor>(&mut self, executor: &mut E) -> Result<usize, BatchFailure> {
        if self.pending.is_empty() {
            return Ok(0);
        }

        let batch = std::mem::take(&mut self.pending);
        let started = Instant::now();
        match executor.execute_batch(&batch) {
            Ok(()) => {
                self.stats.statements_committed += batch.len() as u64;
                self.stats.batches_committed += 1;
                debug!(
                    statements = batch.len(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "batch committed"
                );
                Ok(batch.len())
            }
            Err(source) => {
                self.stats.batches_failed += 1;
                warn!(statements = batch.len(), error = %source, "batch rolled back");
                Err(BatchFailure {
                    statements: batch.len(),
                    discarded_fields: batch
                        .iter()
                        .filter_map(Statement::registered_field)
                        .map(str::to_string)
                        .collect(),
                    source,
                })
            }
        }
    }

    /// Drop everything pending without committing. Returns the number of
    /// statements dropped.
    pub fn discard(&mut self) -> usize {
        let dropped = self.pending.len();
        self.pending.clear();
        dropped
    }
}
