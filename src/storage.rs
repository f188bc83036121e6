//! Keystore capability trait and an in-memory implementation
//!
//! The secure keystore itself (platform keychain, HSM, ...) lives outside
//! this crate. Migrations and archives only see the [`KeyStore`] trait.

use crate::attribute::{AttributeKind, AttributeSet, AttributeValue, KeyRecord};
use crate::crypto::{random_bytes, CryptoConfig, PasswordKdf, RuntimeAead, AEAD};
use crate::error::{KeyStoreError, KeyStoreResult};
use crate::key::SecretKey;
use crate::KeyType;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

/// Trait for keystore backends.
///
/// Keys are identified by `(namespace, name, type)`. The crypto methods have
/// default implementations driven by [`crypto_config`](Self::crypto_config);
/// backends with hardware-held keys can override them.
pub trait KeyStore: Send + Sync {
    /// The namespace this keystore is currently scoped to
    fn namespace(&self) -> &str;

    /// Every key record, across all namespaces
    fn export_all_keys(&self) -> KeyStoreResult<Vec<KeyRecord>>;

    /// Attributes of every key in [`namespace`](Self::namespace) matching
    /// `filter`; the same scope [`update_key_attributes`](Self::update_key_attributes)
    /// can address
    fn get_attributes_for_keys(&self, filter: &AttributeSet) -> KeyStoreResult<Vec<AttributeSet>>;

    /// Patch the attributes of the key `(namespace(), name, key_type)`
    fn update_key_attributes(
        &self,
        updates: &AttributeSet,
        name: &str,
        key_type: KeyType,
    ) -> KeyStoreResult<()>;

    /// Delete every key
    fn remove_all_keys(&self) -> KeyStoreResult<()>;

    /// Add keys; an identity clash fails with [`KeyStoreError::DuplicateKey`]
    fn import_keys(&self, keys: &[KeyRecord]) -> KeyStoreResult<()>;

    /// Crypto parameters for archive protection
    fn crypto_config(&self) -> CryptoConfig {
        CryptoConfig::default()
    }

    /// Derive a symmetric key from a password with a fresh salt.
    ///
    /// Returns `(key, salt, rounds)`.
    fn create_symmetric_key_from_password(
        &self,
        password: &str,
    ) -> KeyStoreResult<(SecretKey, Vec<u8>, u32)> {
        let config = self.crypto_config();
        PasswordKdf::new(config.kdf, config.algorithm).derive_new(password.as_bytes(), config.salt_len)
    }

    /// Re-derive a symmetric key from a password, salt and round count
    fn derive_symmetric_key_from_password(
        &self,
        password: &str,
        salt: &[u8],
        rounds: u32,
    ) -> KeyStoreResult<SecretKey> {
        let config = self.crypto_config();
        PasswordKdf::new(config.kdf, config.algorithm).derive(password.as_bytes(), salt, rounds)
    }

    /// Length of IVs used with [`encrypt_with_symmetric_key`](Self::encrypt_with_symmetric_key)
    fn iv_len(&self) -> usize {
        self.crypto_config().algorithm.iv_size()
    }

    /// Fresh random IV
    fn create_iv(&self) -> KeyStoreResult<Vec<u8>> {
        random_bytes(self.iv_len())
    }

    /// Encrypt `data` under `key` and `iv`
    fn encrypt_with_symmetric_key(
        &self,
        key: &SecretKey,
        data: &[u8],
        iv: &[u8],
    ) -> KeyStoreResult<Vec<u8>> {
        RuntimeAead.encrypt(key, iv, data, &[])
    }

    /// Decrypt `data` under `key` and `iv`
    fn decrypt_with_symmetric_key(
        &self,
        key: &SecretKey,
        data: &[u8],
        iv: &[u8],
    ) -> KeyStoreResult<Vec<u8>> {
        RuntimeAead.decrypt(key, iv, data, &[])
    }
}

/// Identity of a stored key
#[derive(Debug, Clone, PartialEq, Eq)]
struct KeyIdentity {
    namespace: String,
    name: String,
    key_type: KeyType,
}

impl KeyIdentity {
    fn of(record: &AttributeSet) -> Option<Self> {
        Some(Self {
            namespace: record.namespace()?.to_string(),
            name: record.name()?.to_string(),
            key_type: record.key_type()?,
        })
    }
}

/// In-memory key store (for testing/development)
pub struct MemoryKeyStore {
    namespace: String,
    config: CryptoConfig,
    keys: Arc<RwLock<Vec<KeyRecord>>>,
    fail_next_update: AtomicBool,
}

impl MemoryKeyStore {
    /// Create a new in-memory store scoped to `namespace`
    pub fn new<S: Into<String>>(namespace: S) -> Self {
        Self::with_config(namespace, CryptoConfig::default())
    }

    /// Create a store with explicit crypto parameters
    pub fn with_config<S: Into<String>>(namespace: S, config: CryptoConfig) -> Self {
        Self {
            namespace: namespace.into(),
            config,
            keys: Arc::new(RwLock::new(Vec::new())),
            fail_next_update: AtomicBool::new(false),
        }
    }

    /// Add one key in the store's namespace
    pub fn insert_key<S: Into<String>>(
        &self,
        name: S,
        key_type: KeyType,
        data: &[u8],
        synchronizable: bool,
    ) -> KeyStoreResult<()> {
        let record = AttributeSet::new()
            .with(AttributeValue::Namespace(self.namespace.clone()))
            .with(AttributeValue::Name(name.into()))
            .with(AttributeValue::Type(key_type))
            .with(AttributeValue::Synchronizable(synchronizable))
            .with(AttributeValue::data(data));
        self.import_keys(&[record])
    }

    /// Number of stored keys
    pub fn len(&self) -> usize {
        self.keys.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Whether the store holds no keys
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Make the next [`update_key_attributes`](KeyStore::update_key_attributes)
    /// call fail with a storage error
    pub fn fail_next_update(&self) {
        self.fail_next_update.store(true, Ordering::SeqCst);
    }

    fn with_namespace(&self, record: &KeyRecord) -> KeyRecord {
        let mut record = record.clone();
        if !record.contains(AttributeKind::Namespace) {
            record.insert(AttributeValue::Namespace(self.namespace.clone()));
        }
        record
    }
}

impl KeyStore for MemoryKeyStore {
    fn namespace(&self) -> &str {
        &self.namespace
    }

    fn export_all_keys(&self) -> KeyStoreResult<Vec<KeyRecord>> {
        Ok(self.keys.read().unwrap_or_else(PoisonError::into_inner).clone())
    }

    fn get_attributes_for_keys(&self, filter: &AttributeSet) -> KeyStoreResult<Vec<AttributeSet>> {
        let keys = self.keys.read().unwrap_or_else(PoisonError::into_inner);
        Ok(keys
            .iter()
            .filter(|record| record.namespace() == Some(self.namespace.as_str()))
            .filter(|record| record.matches(filter))
            .cloned()
            .collect())
    }

    fn update_key_attributes(
        &self,
        updates: &AttributeSet,
        name: &str,
        key_type: KeyType,
    ) -> KeyStoreResult<()> {
        if self.fail_next_update.swap(false, Ordering::SeqCst) {
            return Err(KeyStoreError::storage("update_key_attributes", "injected failure"));
        }

        let target = KeyIdentity {
            namespace: self.namespace.clone(),
            name: name.to_string(),
            key_type,
        };

        let mut keys = self.keys.write().unwrap_or_else(PoisonError::into_inner);
        let index = keys
            .iter()
            .position(|record| KeyIdentity::of(record).as_ref() == Some(&target))
            .ok_or_else(|| KeyStoreError::KeyNotFound { name: name.to_string() })?;

        let mut patched = keys[index].clone();
        patched.apply(updates);
        let identity = KeyIdentity::of(&patched).ok_or_else(|| KeyStoreError::InvalidRecord {
            reason: format!("update would strip identity from '{name}'"),
        })?;
        let clash = keys
            .iter()
            .enumerate()
            .any(|(i, record)| i != index && KeyIdentity::of(record).as_ref() == Some(&identity));
        if clash {
            return Err(KeyStoreError::DuplicateKey { name: identity.name });
        }

        keys[index] = patched;
        Ok(())
    }

    fn remove_all_keys(&self) -> KeyStoreResult<()> {
        self.keys.write().unwrap_or_else(PoisonError::into_inner).clear();
        Ok(())
    }

    fn import_keys(&self, records: &[KeyRecord]) -> KeyStoreResult<()> {
        let mut keys = self.keys.write().unwrap_or_else(PoisonError::into_inner);

        let mut staged: Vec<KeyRecord> = Vec::with_capacity(records.len());
        let mut identities: Vec<KeyIdentity> = keys.iter().filter_map(KeyIdentity::of).collect();
        for record in records {
            let record = self.with_namespace(record);
            let identity = KeyIdentity::of(&record).ok_or_else(|| KeyStoreError::InvalidRecord {
                reason: "record needs Name and Type".to_string(),
            })?;
            if identities.contains(&identity) {
                return Err(KeyStoreError::DuplicateKey { name: identity.name });
            }
            identities.push(identity);
            staged.push(record);
        }

        keys.extend(staged);
        Ok(())
    }

    fn crypto_config(&self) -> CryptoConfig {
        self.config.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KdfParams;

    fn store() -> MemoryKeyStore {
        let config = CryptoConfig {
            kdf: KdfParams::fast(),
            ..CryptoConfig::default()
        };
        MemoryKeyStore::with_config("app", config)
    }

    #[test]
    fn test_insert_and_export() {
        let store = store();
        store.insert_key("a", KeyType::Symmetric, &[1; 32], false).unwrap();
        store.insert_key("a", KeyType::Private, &[2; 32], false).unwrap();

        let keys = store.export_all_keys().unwrap();
        assert_eq!(keys.len(), 2);
        assert_eq!(keys[0].namespace(), Some("app"));
        assert_eq!(keys[1].data(), Some(&[2u8; 32][..]));
    }

    #[test]
    fn test_import_rejects_duplicates_atomically() {
        let store = store();
        store.insert_key("a", KeyType::Symmetric, &[1; 32], false).unwrap();

        let fresh = AttributeSet::new()
            .with(AttributeValue::Name("b".into()))
            .with(AttributeValue::Type(KeyType::Symmetric));
        let clash = AttributeSet::new()
            .with(AttributeValue::Name("a".into()))
            .with(AttributeValue::Type(KeyType::Symmetric));

        let err = store.import_keys(&[fresh, clash]).unwrap_err();
        assert_eq!(err, KeyStoreError::DuplicateKey { name: "a".into() });
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_import_requires_identity() {
        let store = store();
        let nameless = AttributeSet::new().with(AttributeValue::Type(KeyType::Public));
        assert!(matches!(
            store.import_keys(&[nameless]),
            Err(KeyStoreError::InvalidRecord { .. })
        ));
    }

    #[test]
    fn test_filter_and_update() {
        let store = store();
        store.insert_key("a", KeyType::Symmetric, &[1; 32], false).unwrap();
        store.insert_key("b", KeyType::Private, &[2; 32], false).unwrap();

        let filter = AttributeSet::new().with(AttributeValue::Type(KeyType::Private));
        let found = store.get_attributes_for_keys(&filter).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name(), Some("b"));

        let updates = AttributeSet::new().with(AttributeValue::Synchronizable(true));
        store.update_key_attributes(&updates, "b", KeyType::Private).unwrap();
        let found = store.get_attributes_for_keys(&filter).unwrap();
        assert_eq!(found[0].synchronizable(), Some(true));

        assert_eq!(
            store.update_key_attributes(&updates, "missing", KeyType::Private),
            Err(KeyStoreError::KeyNotFound { name: "missing".into() })
        );
    }

    #[test]
    fn test_filter_is_scoped_to_namespace() {
        let store = store();
        store.insert_key("mine", KeyType::Private, &[1; 32], false).unwrap();
        let foreign = AttributeSet::new()
            .with(AttributeValue::Namespace("other".into()))
            .with(AttributeValue::Name("foreign".into()))
            .with(AttributeValue::Type(KeyType::Private));
        store.import_keys(&[foreign]).unwrap();

        let filter = AttributeSet::new().with(AttributeValue::Type(KeyType::Private));
        let found = store.get_attributes_for_keys(&filter).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name(), Some("mine"));
        assert_eq!(store.export_all_keys().unwrap().len(), 2);
    }

    #[test]
    fn test_update_cannot_collide() {
        let store = store();
        store.insert_key("a", KeyType::Symmetric, &[1; 32], false).unwrap();
        store.insert_key("b", KeyType::Symmetric, &[2; 32], false).unwrap();

        let rename = AttributeSet::new().with(AttributeValue::Name("a".into()));
        assert!(matches!(
            store.update_key_attributes(&rename, "b", KeyType::Symmetric),
            Err(KeyStoreError::DuplicateKey { .. })
        ));
    }

    #[test]
    fn test_injected_update_failure_fires_once() {
        let store = store();
        store.insert_key("a", KeyType::Symmetric, &[1; 32], false).unwrap();
        store.fail_next_update();

        let updates = AttributeSet::new().with(AttributeValue::Synchronizable(true));
        assert!(matches!(
            store.update_key_attributes(&updates, "a", KeyType::Symmetric),
            Err(KeyStoreError::Storage { .. })
        ));
        assert!(store.update_key_attributes(&updates, "a", KeyType::Symmetric).is_ok());
    }

    #[test]
    fn test_default_crypto_roundtrip() {
        let store = store();
        let (key, salt, rounds) = store.create_symmetric_key_from_password("pw").unwrap();
        let iv = store.create_iv().unwrap();
        assert_eq!(iv.len(), 12);

        let ciphertext = store.encrypt_with_symmetric_key(&key, b"payload", &iv).unwrap();
        let rederived = store.derive_symmetric_key_from_password("pw", &salt, rounds).unwrap();
        let plaintext = store.decrypt_with_symmetric_key(&rederived, &ciphertext, &iv).unwrap();
        assert_eq!(plaintext, b"payload");
    }

    #[test]
    fn test_remove_all_keys() {
        let store = store();
        store.insert_key("a", KeyType::Symmetric, &[1; 32], false).unwrap();
        store.remove_all_keys().unwrap();
        assert!(store.is_empty());
    }
}
