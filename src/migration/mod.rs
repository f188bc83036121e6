//! Versioned keystore attribute migrations
//!
//! This module handles:
//! - Describing a migration as a search filter plus an attribute patch
//! - Enforcing strictly increasing migration versions
//! - Running a version window serially and aggregating the outcome
//!
//! The manager keeps no state across restarts. Callers persist the version
//! from a [`MigrationResult`] and pass it as the lower bound next time.

pub mod manager;
pub mod operation;

pub use manager::{MigrationManager, MigrationResult};
pub use operation::{
    Dependency, MigrationOperation, OperationHandle, OperationOutcome, OperationStatus,
};
