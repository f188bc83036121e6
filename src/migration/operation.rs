//! A single versioned attribute migration

use crate::attribute::AttributeSet;
use crate::error::{KeyStoreError, KeyStoreResult, OperationError};
use crate::log::Logger;
use crate::storage::KeyStore;
use crate::{Error, Result};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, SystemTime};

/// Lifecycle state of a migration operation
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OperationStatus {
    /// Registered, not yet started; the only state that can be cancelled
    Ready,
    /// Currently running against the keystore
    Executing,
    /// Cancelled before it started; never runs
    Cancelled,
    /// Ran to completion, successfully or with an error
    Finished,
}

#[derive(Debug)]
struct OperationState {
    status: OperationStatus,
    error: Option<OperationError>,
}

/// Shared view of an operation's status and error.
///
/// Handles are cheap to clone and stay valid after the operation has been
/// moved into a [`MigrationManager`](super::MigrationManager), so callers
/// can attach them as dependencies or cancel a queued operation.
#[derive(Clone)]
pub struct OperationHandle {
    version: u32,
    state: Arc<Mutex<OperationState>>,
}

impl OperationHandle {
    fn new(version: u32) -> Self {
        Self {
            version,
            state: Arc::new(Mutex::new(OperationState {
                status: OperationStatus::Ready,
                error: None,
            })),
        }
    }

    /// Version of the operation this handle refers to
    pub fn version(&self) -> u32 {
        self.version
    }

    /// Current lifecycle state
    pub fn status(&self) -> OperationStatus {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).status
    }

    /// Error recorded on the operation, if any
    pub fn error(&self) -> Option<OperationError> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).error.clone()
    }

    /// Cancel the operation. Only succeeds while it is still `Ready`.
    pub fn cancel(&self) -> bool {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.status == OperationStatus::Ready {
            state.status = OperationStatus::Cancelled;
            true
        } else {
            false
        }
    }

    fn begin(&self) -> bool {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.status == OperationStatus::Ready {
            state.status = OperationStatus::Executing;
            true
        } else {
            false
        }
    }

    /// Record an error without changing status; the first error wins.
    fn record_error(&self, error: OperationError) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.error.is_none() {
            state.error = Some(error);
        }
    }

    /// Move to `Finished`. Returns false if the operation was already
    /// finished or cancelled.
    fn finish(&self, error: Option<OperationError>) -> bool {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if matches!(state.status, OperationStatus::Finished | OperationStatus::Cancelled) {
            return false;
        }
        if state.error.is_none() {
            state.error = error;
        }
        state.status = OperationStatus::Finished;
        true
    }
}

impl fmt::Debug for OperationHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("OperationHandle")
            .field("version", &self.version)
            .field("status", &state.status)
            .field("error", &state.error)
            .finish()
    }
}

/// Something a migration operation can be made to wait on.
///
/// Only migration operations are valid dependencies. Other implementors
/// return `None`, and attaching them marks the dependant with
/// [`OperationError::InvalidDependency`].
pub trait Dependency {
    /// The migration behind this dependency, if it is one
    fn migration_handle(&self) -> Option<OperationHandle>;
}

impl Dependency for OperationHandle {
    fn migration_handle(&self) -> Option<OperationHandle> {
        Some(self.clone())
    }
}

/// What a single run of an operation produced
#[derive(Debug, Clone)]
pub struct OperationOutcome {
    /// Operation version
    pub version: u32,
    /// State after the run (`Finished`, or `Cancelled` if it never started)
    pub status: OperationStatus,
    /// Keys whose attributes were written
    pub migrated_count: usize,
    /// Error recorded on the operation
    pub error: Option<OperationError>,
    /// Time between start and finish
    pub elapsed: Duration,
}

/// Applies `updates` to every key matching `search_filter`.
///
/// Only the part of `updates` a key does not already have is written, so
/// running an operation again over already-migrated keys writes nothing.
pub struct MigrationOperation {
    version: u32,
    name: String,
    description: String,
    keystore: Arc<dyn KeyStore>,
    logger: Arc<dyn Logger>,
    search_filter: AttributeSet,
    updates: AttributeSet,
    dependencies: Vec<OperationHandle>,
    handle: OperationHandle,
    start_time: Option<SystemTime>,
    finish_time: Option<SystemTime>,
    migrated_count: usize,
}

impl MigrationOperation {
    /// Create an operation in the `Ready` state.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidOperation`] if `version` is zero or `updates` is empty.
    pub fn new<N: Into<String>, D: Into<String>>(
        version: u32,
        name: N,
        description: D,
        keystore: Arc<dyn KeyStore>,
        logger: Arc<dyn Logger>,
        search_filter: AttributeSet,
        updates: AttributeSet,
    ) -> Result<Self> {
        if version == 0 {
            return Err(Error::invalid_operation("migration version must be greater than zero"));
        }
        if updates.is_empty() {
            return Err(Error::invalid_operation(format!(
                "migration {version} has no attribute updates"
            )));
        }

        Ok(Self {
            version,
            name: name.into(),
            description: description.into(),
            keystore,
            logger,
            search_filter,
            updates,
            dependencies: Vec::new(),
            handle: OperationHandle::new(version),
            start_time: None,
            finish_time: None,
            migrated_count: 0,
        })
    }

    /// Version number
    pub fn version(&self) -> u32 {
        self.version
    }

    /// Short name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Human-readable description, used in failure reports
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Filter selecting the keys to migrate
    pub fn search_filter(&self) -> &AttributeSet {
        &self.search_filter
    }

    /// Target attribute values
    pub fn updates(&self) -> &AttributeSet {
        &self.updates
    }

    /// Number of keys written by the last run
    pub fn migrated_count(&self) -> usize {
        self.migrated_count
    }

    /// When the run started
    pub fn start_time(&self) -> Option<SystemTime> {
        self.start_time
    }

    /// When the run finished
    pub fn finish_time(&self) -> Option<SystemTime> {
        self.finish_time
    }

    /// `finish_time - start_time`, zero if the operation has not finished
    pub fn elapsed(&self) -> Duration {
        match (self.start_time, self.finish_time) {
            (Some(start), Some(finish)) => finish.duration_since(start).unwrap_or_default(),
            _ => Duration::ZERO,
        }
    }

    /// Shared handle for dependency wiring and cancellation
    pub fn handle(&self) -> OperationHandle {
        self.handle.clone()
    }

    /// Current lifecycle state
    pub fn status(&self) -> OperationStatus {
        self.handle.status()
    }

    /// Error recorded on this operation, if any
    pub fn error(&self) -> Option<OperationError> {
        self.handle.error()
    }

    /// Cancel before the manager starts this operation
    pub fn cancel(&self) -> bool {
        self.handle.cancel()
    }

    /// Make this operation wait on `dependency`.
    ///
    /// Attaching anything that is not a migration operation sets this
    /// operation's error to [`OperationError::InvalidDependency`], which
    /// makes it fail its preconditions.
    pub fn add_dependency(&mut self, dependency: &dyn Dependency) {
        match dependency.migration_handle() {
            Some(handle) => self.dependencies.push(handle),
            None => {
                self.logger.warn(&format!(
                    "migration {} given a non-migration dependency",
                    self.version
                ));
                self.handle.record_error(OperationError::InvalidDependency);
            }
        }
    }

    /// Whether the operation may run: it has updates, carries no error, and
    /// none of its dependencies reported an error.
    pub fn evaluate_preconditions(&self) -> bool {
        if self.updates.is_empty() || self.handle.error().is_some() {
            return false;
        }
        self.dependencies.iter().all(|dep| dep.error().is_none())
    }

    /// Run the operation if it is `Ready`.
    ///
    /// Keystore failures are recorded on the operation, never returned.
    /// Operations that are not `Ready` are left untouched.
    ///
    /// When preconditions fail the operation goes straight to `Finished`
    /// with [`OperationError::PreconditionFailure`], unless an error was
    /// already recorded: an operation given a non-migration dependency
    /// keeps [`OperationError::InvalidDependency`], the more specific cause.
    pub fn run(&mut self) -> OperationOutcome {
        if self.status() != OperationStatus::Ready {
            return self.outcome();
        }

        self.start_time = Some(SystemTime::now());
        self.migrated_count = 0;

        if !self.evaluate_preconditions() {
            self.logger.warn(&format!(
                "migration {} '{}' preconditions not met",
                self.version, self.name
            ));
            self.done(Some(OperationError::PreconditionFailure));
            return self.outcome();
        }

        if !self.handle.begin() {
            return self.outcome();
        }

        self.logger.debug(&format!("migration {} '{}' started", self.version, self.name));
        let error = self
            .migrate_matching_keys()
            .err()
            .map(OperationError::UnhandledKeyStoreError);
        if let Some(e) = &error {
            self.logger.error(&format!("migration {} '{}' failed: {}", self.version, self.name, e));
        }
        self.done(error);
        self.outcome()
    }

    fn migrate_matching_keys(&mut self) -> KeyStoreResult<()> {
        let matching = self.keystore.get_attributes_for_keys(&self.search_filter)?;
        for current in &matching {
            let delta = self.updates.subtract(current);
            if delta.is_empty() {
                continue;
            }

            let (name, key_type) = match (current.name(), current.key_type()) {
                (Some(name), Some(key_type)) => (name, key_type),
                _ => {
                    return Err(KeyStoreError::InvalidRecord {
                        reason: "matched key has no Name or Type".to_string(),
                    })
                }
            };
            self.keystore.update_key_attributes(&delta, name, key_type)?;
            self.migrated_count += 1;
        }
        Ok(())
    }

    fn done(&mut self, error: Option<OperationError>) {
        if self.handle.finish(error) {
            self.finish_time = Some(SystemTime::now());
            self.logger.debug(&format!(
                "migration {} '{}' finished, {} keys migrated",
                self.version, self.name, self.migrated_count
            ));
        }
    }

    fn outcome(&self) -> OperationOutcome {
        OperationOutcome {
            version: self.version,
            status: self.status(),
            migrated_count: self.migrated_count,
            error: self.error(),
            elapsed: self.elapsed(),
        }
    }
}

impl Dependency for MigrationOperation {
    fn migration_handle(&self) -> Option<OperationHandle> {
        Some(self.handle())
    }
}

impl fmt::Debug for MigrationOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MigrationOperation")
            .field("version", &self.version)
            .field("name", &self.name)
            .field("description", &self.description)
            .field("search_filter", &self.search_filter)
            .field("updates", &self.updates)
            .field("status", &self.status())
            .field("migrated_count", &self.migrated_count)
            .finish()
    }
}
