//! rust-keyshelf: keystore attribute migrations and portable key archives
//!
//! This crate sits on top of a secure keystore (anything implementing
//! [`storage::KeyStore`]) and provides two independent services:
//!
//! - [`migration`]: ordered, versioned attribute migrations applied to the
//!   keys matching a search filter, run serially by a [`MigrationManager`].
//! - [`archive`]: a password-encrypted, versioned JSON archive of the
//!   keystore contents for backup, restore and device transfer.
//!
//! Both talk to the keystore only through the trait, and neither depends on
//! the other. Callers that run a migration and a restore against the same
//! keystore must serialise them.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub mod archive;
pub mod attribute;
pub mod crypto;
pub mod error;
pub mod key;
pub mod log;
pub mod migration;
pub mod storage;

pub use archive::SecureKeyArchive;
pub use attribute::{AttributeKind, AttributeSet, AttributeValue, KeyRecord};
pub use error::{Error, ErrorCode, KeyStoreError, OperationError, Result};
pub use migration::{MigrationManager, MigrationOperation, MigrationResult};
pub use storage::{KeyStore, MemoryKeyStore};

/// The kind of key material a keystore record holds
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum KeyType {
    /// Symmetric secret key
    Symmetric,
    /// Private half of an asymmetric key pair
    Private,
    /// Public half of an asymmetric key pair
    Public,
    /// Stored password or passphrase
    Password,
}

impl KeyType {
    /// Name used for this type in archived key records
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Symmetric => "Symmetric",
            Self::Private => "Private",
            Self::Public => "Public",
            Self::Password => "Password",
        }
    }
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KeyType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "Symmetric" => Ok(Self::Symmetric),
            "Private" => Ok(Self::Private),
            "Public" => Ok(Self::Public),
            "Password" => Ok(Self::Password),
            other => Err(Error::malformed(format!("unknown key type '{other}'"))),
        }
    }
}

/// Ciphers available for archive payload encryption
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Algorithm {
    /// AES-256-GCM AEAD
    Aes256Gcm,
    /// ChaCha20-Poly1305 AEAD
    ChaCha20Poly1305,
}

impl Algorithm {
    /// Get the key size in bytes for the algorithm
    pub const fn key_size(&self) -> usize {
        match self {
            Self::Aes256Gcm | Self::ChaCha20Poly1305 => 32,
        }
    }

    /// Get the IV (nonce) size in bytes for the algorithm
    pub const fn iv_size(&self) -> usize {
        match self {
            Self::Aes256Gcm | Self::ChaCha20Poly1305 => 12,
        }
    }
}
