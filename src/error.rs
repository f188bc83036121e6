//! Error types for rust-keyshelf

use std::fmt;
use thiserror::Error;

/// Custom `Result` type
pub type Result<T> = std::result::Result<T, Error>;

/// `Result` type returned by [`KeyStore`](crate::storage::KeyStore) implementations
pub type KeyStoreResult<T> = std::result::Result<T, KeyStoreError>;

/// Error codes for programmatic handling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// Migration operation rejected (ordering, empty updates, unknown version)
    InvalidOperation,
    /// Empty password
    InvalidPassword,
    /// No keys to archive or save
    ArchiveEmpty,
    /// Envelope field missing or malformed
    InvalidArchiveData,
    /// Decrypted payload is not a key record array
    MalformedKeySetData,
    /// Record carries an unknown attribute kind
    InvalidKeyAttribute,
    /// Archive format version is not supported
    VersionMismatch,
    /// Key identity already present in the keystore
    DuplicateKey,
    /// Operation could not run
    PreconditionFailure,
    /// Operation depends on something that is not a migration
    InvalidDependency,
    /// Keystore failure surfaced through a migration
    UnhandledKeyStoreError,
    /// Key not present in the keystore
    KeyNotFound,
    /// Record rejected by the keystore
    InvalidRecord,
    /// Cryptographic operation failed
    CryptoFailure,
    /// Storage backend error
    StorageFailure,
    /// Unexpected condition
    Fatal,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let code = match self {
            Self::InvalidOperation => "INVALID_OPERATION",
            Self::InvalidPassword => "INVALID_PASSWORD",
            Self::ArchiveEmpty => "ARCHIVE_EMPTY",
            Self::InvalidArchiveData => "INVALID_ARCHIVE_DATA",
            Self::MalformedKeySetData => "MALFORMED_KEY_SET_DATA",
            Self::InvalidKeyAttribute => "INVALID_KEY_ATTRIBUTE",
            Self::VersionMismatch => "VERSION_MISMATCH",
            Self::DuplicateKey => "DUPLICATE_KEY",
            Self::PreconditionFailure => "PRECONDITION_FAILURE",
            Self::InvalidDependency => "INVALID_DEPENDENCY",
            Self::UnhandledKeyStoreError => "UNHANDLED_KEYSTORE_ERROR",
            Self::KeyNotFound => "KEY_NOT_FOUND",
            Self::InvalidRecord => "INVALID_RECORD",
            Self::CryptoFailure => "CRYPTO_FAILURE",
            Self::StorageFailure => "STORAGE_FAILURE",
            Self::Fatal => "FATAL",
        };
        f.write_str(code)
    }
}

/// Failures reported by a [`KeyStore`](crate::storage::KeyStore)
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyStoreError {
    /// A key with the same namespace, name and type already exists
    #[error("duplicate key: {name}")]
    DuplicateKey {
        /// Name of the conflicting key
        name: String,
    },

    /// No key with the requested identity
    #[error("key not found: {name}")]
    KeyNotFound {
        /// Name of the missing key
        name: String,
    },

    /// A record is missing identity attributes
    #[error("invalid key record: {reason}")]
    InvalidRecord {
        /// What is wrong with the record
        reason: String,
    },

    /// Key derivation, IV generation or encryption failed
    #[error("cryptographic error during {operation}: {message}")]
    Crypto {
        /// The operation that was being performed
        operation: String,
        /// Detailed error message
        message: String,
    },

    /// Backend storage failure
    #[error("storage error during {operation}: {message}")]
    Storage {
        /// The operation that was being performed
        operation: String,
        /// Detailed error message
        message: String,
    },
}

impl KeyStoreError {
    /// Get the error code for programmatic handling
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::DuplicateKey { .. } => ErrorCode::DuplicateKey,
            Self::KeyNotFound { .. } => ErrorCode::KeyNotFound,
            Self::InvalidRecord { .. } => ErrorCode::InvalidRecord,
            Self::Crypto { .. } => ErrorCode::CryptoFailure,
            Self::Storage { .. } => ErrorCode::StorageFailure,
        }
    }

    /// Create a crypto error with context
    pub fn crypto(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Crypto {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Create a storage error with context
    pub fn storage(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Storage {
            operation: operation.into(),
            message: message.into(),
        }
    }
}

/// Error recorded on a migration operation.
///
/// Operations report these rather than returning them; the manager collects
/// them into [`MigrationResult::Failure`](crate::migration::MigrationResult).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OperationError {
    /// The operation was not runnable when dispatched
    #[error("migration precondition failed")]
    PreconditionFailure,

    /// A dependency that is not a migration operation was attached
    #[error("migration depends on a non-migration operation")]
    InvalidDependency,

    /// The keystore failed while the operation was running
    #[error("unhandled keystore error: {0}")]
    UnhandledKeyStoreError(#[source] KeyStoreError),
}

impl OperationError {
    /// Get the error code for programmatic handling
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::PreconditionFailure => ErrorCode::PreconditionFailure,
            Self::InvalidDependency => ErrorCode::InvalidDependency,
            Self::UnhandledKeyStoreError(_) => ErrorCode::UnhandledKeyStoreError,
        }
    }
}

/// `rust-keyshelf` error type
#[derive(Debug, Error)]
pub enum Error {
    /// Migration operation rejected at construction or registration
    #[error("invalid migration operation: {reason}")]
    InvalidOperation {
        /// Why the operation was rejected
        reason: String,
    },

    /// The archive password is empty
    #[error("invalid password")]
    InvalidPassword,

    /// There are no keys to archive or save
    #[error("archive contains no keys")]
    ArchiveEmpty,

    /// A required envelope field is missing or malformed
    #[error("invalid archive data: field '{field}' missing or malformed")]
    InvalidArchiveData {
        /// Envelope field name
        field: String,
    },

    /// The decrypted payload is not a JSON array of key records
    #[error("malformed key set data: {reason}")]
    MalformedKeySetData {
        /// Detailed reason
        reason: String,
    },

    /// A decrypted record carries an attribute this crate does not know
    #[error("invalid key attribute: {attribute}")]
    InvalidKeyAttribute {
        /// The unrecognised attribute name
        attribute: String,
    },

    /// Archive was written by an incompatible format version
    #[error("archive version mismatch: found {found}, expected {expected}")]
    VersionMismatch {
        /// Version found in the envelope
        found: u64,
        /// Version this implementation reads and writes
        expected: u32,
    },

    /// The keystore already holds a key with the same identity
    #[error("duplicate key: {name}")]
    DuplicateKey {
        /// Name of the conflicting key
        name: String,
    },

    /// Unexpected failure (keystore, cryptography, serialization)
    #[error("fatal error during {operation}: {message}")]
    Fatal {
        /// The operation that was being performed
        operation: String,
        /// Detailed error message
        message: String,
    },
}

impl Error {
    /// Get the error code for programmatic handling
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidOperation { .. } => ErrorCode::InvalidOperation,
            Self::InvalidPassword => ErrorCode::InvalidPassword,
            Self::ArchiveEmpty => ErrorCode::ArchiveEmpty,
            Self::InvalidArchiveData { .. } => ErrorCode::InvalidArchiveData,
            Self::MalformedKeySetData { .. } => ErrorCode::MalformedKeySetData,
            Self::InvalidKeyAttribute { .. } => ErrorCode::InvalidKeyAttribute,
            Self::VersionMismatch { .. } => ErrorCode::VersionMismatch,
            Self::DuplicateKey { .. } => ErrorCode::DuplicateKey,
            Self::Fatal { .. } => ErrorCode::Fatal,
        }
    }

    /// Create an invalid-operation error
    pub fn invalid_operation<S: Into<String>>(reason: S) -> Self {
        Self::InvalidOperation {
            reason: reason.into(),
        }
    }

    /// Create an invalid-archive-data error for an envelope field
    pub fn invalid_archive_data<S: Into<String>>(field: S) -> Self {
        Self::InvalidArchiveData {
            field: field.into(),
        }
    }

    /// Create a malformed key set error
    pub fn malformed<S: Into<String>>(reason: S) -> Self {
        Self::MalformedKeySetData {
            reason: reason.into(),
        }
    }

    /// Create a fatal error with context
    pub fn fatal(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Fatal {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Wrap a keystore failure as a fatal error
    pub fn keystore<S: Into<String>>(operation: S, source: &KeyStoreError) -> Self {
        Self::Fatal {
            operation: operation.into(),
            message: source.to_string(),
        }
    }

    /// Check if the caller can correct this error by changing its input
    pub fn is_validation(&self) -> bool {
        !matches!(self, Self::Fatal { .. })
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Fatal { .. })
    }
}
