//! Ordered migration queue and serial runner

use crate::error::OperationError;
use crate::log::{Logger, TracingLogger};
use crate::migration::operation::{MigrationOperation, OperationHandle, OperationStatus};
use crate::{Error, Result};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Aggregate result of one [`MigrationManager::migrate`] call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationResult {
    /// Every operation in the window finished without error
    Success {
        /// Version of the last operation that finished without error
        version: Option<u32>,
        /// Keys migrated across all operations
        count: usize,
        /// Sum of per-operation run times
        time: Duration,
    },
    /// One or more operations reported an error; the rest still ran
    Failure {
        /// `(description, error)` for each failed operation, in queue order
        errors: Vec<(String, OperationError)>,
        /// Version of the last operation that finished without error
        version: Option<u32>,
        /// Keys migrated across all operations
        count: usize,
        /// Sum of per-operation run times
        time: Duration,
    },
}

impl MigrationResult {
    /// Whether no operation reported an error
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// Version of the last operation that finished without error
    pub fn version(&self) -> Option<u32> {
        match self {
            Self::Success { version, .. } | Self::Failure { version, .. } => *version,
        }
    }

    /// Keys migrated across all operations
    pub fn count(&self) -> usize {
        match self {
            Self::Success { count, .. } | Self::Failure { count, .. } => *count,
        }
    }

    /// Sum of per-operation run times
    pub fn time(&self) -> Duration {
        match self {
            Self::Success { time, .. } | Self::Failure { time, .. } => *time,
        }
    }

    /// Failed operations; empty on success
    pub fn errors(&self) -> &[(String, OperationError)] {
        match self {
            Self::Success { .. } => &[],
            Self::Failure { errors, .. } => errors,
        }
    }
}

/// Manages the ordered migration queue.
///
/// Operations run strictly one at a time in queue order; later operations
/// may rely on keys rewritten by earlier ones. A failing operation does not
/// stop the operations after it.
///
/// The queue stays locked while a window runs. Cancellation and status
/// queries go through a separate list of operation handles, so they answer
/// while a run is in progress.
pub struct MigrationManager {
    operations: Arc<Mutex<Vec<MigrationOperation>>>,
    handles: Mutex<Vec<OperationHandle>>,
    logger: Arc<dyn Logger>,
}

impl Default for MigrationManager {
    fn default() -> Self {
        Self::new(Arc::new(TracingLogger))
    }
}

impl MigrationManager {
    /// Create an empty manager
    pub fn new(logger: Arc<dyn Logger>) -> Self {
        Self {
            operations: Arc::new(Mutex::new(Vec::new())),
            handles: Mutex::new(Vec::new()),
            logger,
        }
    }

    /// Append an operation.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidOperation`] if its version is not greater than the
    /// last appended version; the queue is left unchanged.
    pub fn add_migration_operation(&self, operation: MigrationOperation) -> Result<()> {
        let mut operations = self.lock();
        if let Some(last) = operations.last() {
            if operation.version() <= last.version() {
                return Err(Error::invalid_operation(format!(
                    "migration version {} must be greater than {}",
                    operation.version(),
                    last.version()
                )));
            }
        }
        self.logger.debug(&format!(
            "queued migration {} '{}'",
            operation.version(),
            operation.name()
        ));
        self.lock_handles().push(operation.handle());
        operations.push(operation);
        Ok(())
    }

    /// Run every `Ready` operation with `from <= version <= to` on the
    /// calling thread and aggregate the outcome.
    pub fn migrate_blocking(&self, from: u32, to: u32) -> MigrationResult {
        let mut operations = self.lock();
        run_window(&mut operations, from, to, self.logger.as_ref())
    }

    /// Run the window on a dedicated worker thread.
    ///
    /// `completion` is called exactly once, after the last selected
    /// operation has finished. Concurrent calls are serialised: the queue
    /// lock is held for the whole run. [`cancel_operation`](Self::cancel_operation)
    /// and [`status`](Self::status) do not take that lock.
    ///
    /// # Errors
    ///
    /// [`Error::Fatal`] if the worker thread cannot be spawned; `completion`
    /// is not called in that case.
    pub fn migrate<F>(&self, from: u32, to: u32, completion: F) -> Result<JoinHandle<()>>
    where
        F: FnOnce(MigrationResult) + Send + 'static,
    {
        let operations = Arc::clone(&self.operations);
        let logger = Arc::clone(&self.logger);
        thread::Builder::new()
            .name("keyshelf-migration".to_string())
            .spawn(move || {
                let result = {
                    let mut operations = operations.lock().unwrap_or_else(PoisonError::into_inner);
                    run_window(&mut operations, from, to, logger.as_ref())
                };
                completion(result);
            })
            .map_err(|e| Error::fatal("spawn_migration_worker", e.to_string()))
    }

    /// Cancel a queued operation that has not started.
    ///
    /// Does not wait for a running window: a later operation can be
    /// cancelled while an earlier one is still executing.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidOperation`] if no operation has this version or it is
    /// no longer `Ready`.
    pub fn cancel_operation(&self, version: u32) -> Result<()> {
        let handles = self.lock_handles();
        let operation = handles
            .iter()
            .find(|handle| handle.version() == version)
            .ok_or_else(|| Error::invalid_operation(format!("no migration with version {version}")))?;
        if operation.cancel() {
            Ok(())
        } else {
            Err(Error::invalid_operation(format!(
                "migration {version} is {:?} and cannot be cancelled",
                operation.status()
            )))
        }
    }

    /// Drop every queued operation
    pub fn reset(&self) {
        let mut operations = self.lock();
        self.lock_handles().clear();
        operations.clear();
    }

    /// Number of queued operations
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether the queue is empty
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Version of the last appended operation
    pub fn last_version(&self) -> Option<u32> {
        self.lock().last().map(MigrationOperation::version)
    }

    /// Status of the queued operation with this version; does not wait for
    /// a running window
    pub fn status(&self, version: u32) -> Option<OperationStatus> {
        self.lock_handles()
            .iter()
            .find(|handle| handle.version() == version)
            .map(OperationHandle::status)
    }

    fn lock(&self) -> MutexGuard<'_, Vec<MigrationOperation>> {
        self.operations.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // Always taken after `operations` when both are held.
    fn lock_handles(&self) -> MutexGuard<'_, Vec<OperationHandle>> {
        self.handles.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn run_window(
    operations: &mut [MigrationOperation],
    from: u32,
    to: u32,
    logger: &dyn Logger,
) -> MigrationResult {
    let mut version = None;
    let mut count = 0;
    let mut time = Duration::ZERO;
    let mut errors = Vec::new();

    for operation in operations
        .iter_mut()
        .filter(|op| (from..=to).contains(&op.version()))
    {
        if operation.status() != OperationStatus::Ready {
            logger.debug(&format!(
                "skipping migration {} ({:?})",
                operation.version(),
                operation.status()
            ));
            continue;
        }

        let outcome = operation.run();
        if outcome.status != OperationStatus::Finished {
            continue;
        }

        count += outcome.migrated_count;
        time += outcome.elapsed;
        match outcome.error {
            None => version = Some(outcome.version),
            Some(error) => errors.push((operation.description().to_string(), error)),
        }
    }

    if errors.is_empty() {
        logger.info(&format!(
            "migrations {from}..={to} finished: {count} keys in {time:?}"
        ));
        MigrationResult::Success { version, count, time }
    } else {
        logger.error(&format!(
            "migrations {from}..={to} finished with {} failures: {count} keys in {time:?}",
            errors.len()
        ));
        MigrationResult::Failure {
            errors,
            version,
            count,
            time,
        }
    }
}
