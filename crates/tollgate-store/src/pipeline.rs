//! Pipelined multi-command execution with per-command failure reporting.
//!
//! A pipeline sends every command in one round trip. It is **not** a
//! transaction: commands apply independently, a failure in one never stops
//! the others, and nothing is rolled back. Callers that need all-or-nothing
//! behavior must inspect [`PipelineOutcome::failed_indices`] and compensate.

use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::DynStore;
use crate::command::{Command, Reply};
use crate::error::StoreError;

/// An ordered batch of commands.
#[derive(Debug, Clone, Default)]
pub struct Pipeline {
    commands: Vec<Command>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a command, returning its index in the outcome.
    pub fn push(&mut self, command: Command) -> usize {
        self.commands.push(command);
        self.commands.len() - 1
    }

    /// Builder-style variant of [`push`](Self::push).
    pub fn with(mut self, command: Command) -> Self {
        self.commands.push(command);
        self
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }
}

impl FromIterator<Command> for Pipeline {
    fn from_iter<I: IntoIterator<Item = Command>>(iter: I) -> Self {
        Self {
            commands: iter.into_iter().collect(),
        }
    }
}

/// Result of executing a [`Pipeline`].
///
/// `results[i]` and `errors[i]` describe command `i`; exactly one of them is
/// `Some`. `success` is `true` only when no command failed.
#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    pub success: bool,
    pub results: Vec<Option<Reply>>,
    pub errors: Vec<Option<StoreError>>,
    pub elapsed: Duration,
}

impl PipelineOutcome {
    fn from_replies(replies: Vec<Result<Reply, StoreError>>, elapsed: Duration) -> Self {
        let mut results = Vec::with_capacity(replies.len());
        let mut errors = Vec::with_capacity(replies.len());
        for reply in replies {
            match reply {
                Ok(r) => {
                    results.push(Some(r));
                    errors.push(None);
                }
                Err(e) => {
                    results.push(None);
                    errors.push(Some(e));
                }
            }
        }
        Self {
            success: errors.iter().all(Option::is_none),
            results,
            errors,
            elapsed,
        }
    }

    /// Every command failed with the same batch-level error.
    fn batch_failure(count: usize, error: StoreError, elapsed: Duration) -> Self {
        Self {
            success: count == 0,
            results: vec![None; count],
            errors: vec![Some(error); count],
            elapsed,
        }
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.elapsed.as_millis() as u64
    }

    /// Indices of the commands that failed, in ascending order.
    pub fn failed_indices(&self) -> Vec<usize> {
        self.errors
            .iter()
            .enumerate()
            .filter_map(|(i, e)| e.as_ref().map(|_| i))
            .collect()
    }

    pub fn first_error(&self) -> Option<&StoreError> {
        self.errors.iter().flatten().next()
    }

    /// Returns the reply of command `index`, or its error.
    pub fn reply(&self, index: usize) -> Result<&Reply, StoreError> {
        match (self.results.get(index), self.errors.get(index)) {
            (Some(Some(reply)), _) => Ok(reply),
            (_, Some(Some(error))) => Err(error.clone()),
            _ => Err(StoreError::protocol(format!(
                "no reply at pipeline index {index}"
            ))),
        }
    }

    /// Takes ownership of the reply of command `index`.
    pub fn take(&mut self, index: usize) -> Result<Reply, StoreError> {
        if let Some(Some(error)) = self.errors.get(index) {
            return Err(error.clone());
        }
        self.results
            .get_mut(index)
            .and_then(Option::take)
            .ok_or_else(|| StoreError::protocol(format!("no reply at pipeline index {index}")))
    }
}

/// Runs pipelines against a store.
#[derive(Clone)]
pub struct PipelineExecutor {
    store: DynStore,
}

impl PipelineExecutor {
    pub fn new(store: DynStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &DynStore {
        &self.store
    }

    /// Executes all commands in one round trip.
    ///
    /// Never fails as a whole: a batch-level error (connection refused,
    /// timeout) is reported as the error of every command.
    pub async fn execute(&self, pipeline: Pipeline) -> PipelineOutcome {
        let count = pipeline.len();
        if count == 0 {
            return PipelineOutcome::from_replies(Vec::new(), Duration::ZERO);
        }

        let started = Instant::now();
        let outcome = match self.store.execute(pipeline.commands).await {
            Ok(replies) if replies.len() == count => {
                PipelineOutcome::from_replies(replies, started.elapsed())
            }
            Ok(replies) => PipelineOutcome::batch_failure(
                count,
                StoreError::protocol(format!(
                    "pipeline returned {} replies for {count} commands",
                    replies.len()
                )),
                started.elapsed(),
            ),
            Err(e) => PipelineOutcome::batch_failure(count, e, started.elapsed()),
        };

        if outcome.success {
            debug!(
                commands = count,
                elapsed_ms = outcome.elapsed_ms(),
                "pipeline executed"
            );
        } else {
            warn!(
                commands = count,
                failed = ?outcome.failed_indices(),
                error = ?outcome.first_error(),
                "pipeline completed with failures"
            );
        }

        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::KeyValueStore;
    use async_trait::async_trait;
    use std::sync::Arc;

    /// Fails every INCR, echoes every other command as OK.
    struct PickyStore;

    #[async_trait]
    impl KeyValueStore for PickyStore {
        fn backend_name(&self) -> &'static str {
            "picky"
        }

        async fn execute(
            &self,
            commands: Vec<Command>,
        ) -> crate::StoreResult<Vec<crate::StoreResult<Reply>>> {
            Ok(commands
                .iter()
                .map(|c| match c {
                    Command::Incr { .. } => Err(StoreError::wrong_type()),
                    _ => Ok(Reply::Ok),
                })
                .collect())
        }
    }

    struct DownStore;

    #[async_trait]
    impl KeyValueStore for DownStore {
        fn backend_name(&self) -> &'static str {
            "down"
        }

        async fn execute(
            &self,
            _commands: Vec<Command>,
        ) -> crate::StoreResult<Vec<crate::StoreResult<Reply>>> {
            Err(StoreError::connection("refused"))
        }
    }

    #[tokio::test]
    async fn test_per_command_failure_is_isolated() {
        let executor = PipelineExecutor::new(Arc::new(PickyStore));
        let pipeline = Pipeline::new()
            .with(Command::set("a", "1"))
            .with(Command::incr("b"))
            .with(Command::set("c", "3"));

        let outcome = executor.execute(pipeline).await;
        assert!(!outcome.success);
        assert_eq!(outcome.len(), 3);
        assert_eq!(outcome.failed_indices(), vec![1]);
        assert!(outcome.reply(0).is_ok());
        assert!(outcome.reply(2).is_ok());
    }

    #[tokio::test]
    async fn test_batch_failure_marks_every_command() {
        let executor = PipelineExecutor::new(Arc::new(DownStore));
        let pipeline: Pipeline = vec![Command::get("a"), Command::get("b")]
            .into_iter()
            .collect();

        let outcome = executor.execute(pipeline).await;
        assert!(!outcome.success);
        assert_eq!(outcome.failed_indices(), vec![0, 1]);
        assert!(outcome.first_error().unwrap().is_transient());
    }

    #[tokio::test]
    async fn test_empty_pipeline_succeeds() {
        let executor = PipelineExecutor::new(Arc::new(DownStore));
        let outcome = executor.execute(Pipeline::new()).await;
        assert!(outcome.success);
        assert!(outcome.is_empty());
    }
}
