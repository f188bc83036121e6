//! Password-encrypted, versioned key archives
//!
//! An archive is a JSON envelope:
//!
//! ```text
//! {
//!   "Version": 2,
//!   "MetaInfo": { "<string>": "<string>" },
//!   "Salt": "<base64>",
//!   "Rounds": <integer>,
//!   "IV": "<base64>",
//!   "Keys": "<base64 of the encrypted JSON array of key records>"
//! }
//! ```
//!
//! `MetaInfo` is stored in the clear so it can be shown before the password
//! is known. Everything else about the keys is inside `Keys`.

use crate::attribute::{AttributeSet, AttributeValue, KeyRecord};
use crate::error::KeyStoreError;
use crate::key::SecretKey;
use crate::log::Logger;
use crate::storage::KeyStore;
use crate::{Error, KeyType, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use zeroize::Zeroizing;

/// Current version of the archive format
pub const ARCHIVE_FORMAT_VERSION: u32 = 2;

/// Top-level envelope keys this implementation understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum EnvelopeField {
    Version,
    Keys,
    Salt,
    Rounds,
    IV,
    MetaInfo,
}

impl EnvelopeField {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "Version" => Some(Self::Version),
            "Keys" => Some(Self::Keys),
            "Salt" => Some(Self::Salt),
            "Rounds" => Some(Self::Rounds),
            "IV" => Some(Self::IV),
            "MetaInfo" => Some(Self::MetaInfo),
            _ => None,
        }
    }

    const fn as_str(&self) -> &'static str {
        match self {
            Self::Version => "Version",
            Self::Keys => "Keys",
            Self::Salt => "Salt",
            Self::Rounds => "Rounds",
            Self::IV => "IV",
            Self::MetaInfo => "MetaInfo",
        }
    }
}

#[derive(Serialize)]
struct Envelope<'a> {
    #[serde(rename = "Version")]
    version: u32,
    #[serde(rename = "MetaInfo")]
    meta_info: &'a BTreeMap<String, String>,
    #[serde(rename = "Salt")]
    salt: String,
    #[serde(rename = "Rounds")]
    rounds: u32,
    #[serde(rename = "IV")]
    iv: String,
    #[serde(rename = "Keys")]
    keys: String,
}

/// IV tried once when a payload does not decrypt to key records.
///
/// Some platform crypto stacks could not round-trip an all-zero IV and
/// silently substituted this pattern when writing archives.
pub fn fallback_iv(len: usize) -> Vec<u8> {
    let mut iv = vec![0u8; len];
    if let Some(b) = iv.get_mut(0) {
        *b = 0x10;
    }
    if let Some(b) = iv.get_mut(4) {
        *b = 0x01;
    }
    iv
}

/// Export and import of keystore contents as a password-encrypted archive.
///
/// Not safe to use from several threads at once; `archive`, `unarchive`
/// and `save_keys` mutate or read the held state without locking.
pub struct SecureKeyArchive {
    keystore: Arc<dyn KeyStore>,
    logger: Arc<dyn Logger>,
    keys: Vec<KeyRecord>,
    excluded_keys: BTreeSet<String>,
    meta_info: BTreeMap<String, String>,
    namespaces: BTreeSet<String>,
    fixed_iv: Option<Vec<u8>>,
    decryption_iv: Option<Vec<u8>>,
    envelope: Option<BTreeMap<EnvelopeField, Value>>,
}

impl SecureKeyArchive {
    /// Create an empty archive for exporting from `keystore`
    pub fn new(keystore: Arc<dyn KeyStore>, logger: Arc<dyn Logger>) -> Self {
        Self {
            keystore,
            logger,
            keys: Vec::new(),
            excluded_keys: BTreeSet::new(),
            meta_info: BTreeMap::new(),
            namespaces: BTreeSet::new(),
            fixed_iv: None,
            decryption_iv: None,
            envelope: None,
        }
    }

    /// Wrap previously produced archive bytes for importing.
    ///
    /// Returns `None` if `data` is not a JSON object. Unknown top-level
    /// fields are dropped. `MetaInfo` is readable immediately.
    pub fn from_archive_data(
        keystore: Arc<dyn KeyStore>,
        logger: Arc<dyn Logger>,
        data: &[u8],
    ) -> Option<Self> {
        let object = match serde_json::from_slice::<Value>(data) {
            Ok(Value::Object(object)) => object,
            Ok(_) => {
                logger.warn("archive data is not a JSON object");
                return None;
            }
            Err(e) => {
                logger.warn(&format!("archive data is not valid JSON: {e}"));
                return None;
            }
        };

        let envelope: BTreeMap<EnvelopeField, Value> = object
            .into_iter()
            .filter_map(|(name, value)| EnvelopeField::from_name(&name).map(|field| (field, value)))
            .collect();

        let meta_info = match envelope.get(&EnvelopeField::MetaInfo) {
            Some(Value::Object(info)) => info
                .iter()
                .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                .collect(),
            _ => BTreeMap::new(),
        };

        let mut archive = Self::new(keystore, logger);
        archive.meta_info = meta_info;
        archive.envelope = Some(envelope);
        Some(archive)
    }

    /// Names skipped when loading, archiving and saving
    pub fn set_excluded_keys<I, S>(&mut self, names: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.excluded_keys = names.into_iter().map(Into::into).collect();
    }

    /// Metadata written in the clear alongside the encrypted keys
    pub fn set_meta_info(&mut self, meta_info: BTreeMap<String, String>) {
        self.meta_info = meta_info;
    }

    /// Use a fixed IV for the next [`archive`](Self::archive) instead of a
    /// fresh random one. Intended for deterministic tests.
    pub fn set_iv(&mut self, iv: Vec<u8>) {
        self.fixed_iv = Some(iv);
    }

    /// Append a record without reading the keystore
    pub fn add_key(&mut self, record: KeyRecord) {
        if let Some(namespace) = record.namespace().filter(|ns| !ns.is_empty()) {
            self.namespaces.insert(namespace.to_string());
        }
        self.keys.push(record);
    }

    /// Records currently held
    pub fn keys(&self) -> &[KeyRecord] {
        &self.keys
    }

    /// Non-empty namespaces seen in the held records
    pub fn namespaces(&self) -> &BTreeSet<String> {
        &self.namespaces
    }

    /// Clear-text archive metadata
    pub fn meta_info(&self) -> &BTreeMap<String, String> {
        &self.meta_info
    }

    /// Names excluded from load, archive and save
    pub fn excluded_keys(&self) -> &BTreeSet<String> {
        &self.excluded_keys
    }

    /// `Version` of the held envelope, if there is one and it is an integer
    pub fn archive_version(&self) -> Option<u64> {
        self.envelope
            .as_ref()
            .and_then(|envelope| envelope.get(&EnvelopeField::Version))
            .and_then(Value::as_u64)
    }

    /// IV that decrypted the held archive: its `IV` field, the zero IV of a
    /// legacy archive, or the fallback pattern. Never reused by
    /// [`archive`](Self::archive).
    pub fn decryption_iv(&self) -> Option<&[u8]> {
        self.decryption_iv.as_deref()
    }

    /// Whether encrypted archive bytes are held
    pub fn has_archive_data(&self) -> bool {
        self.envelope.is_some()
    }

    fn is_excluded(&self, record: &KeyRecord) -> bool {
        record
            .name()
            .is_some_and(|name| self.excluded_keys.contains(name))
    }

    /// Append every non-excluded keystore record.
    ///
    /// # Errors
    ///
    /// [`Error::Fatal`] if the keystore cannot export; nothing is appended.
    pub fn load_keys(&mut self) -> Result<()> {
        let records = self
            .keystore
            .export_all_keys()
            .map_err(|e| Error::keystore("export_all_keys", &e))?;

        let total = records.len();
        let mut loaded = 0;
        for record in records {
            if self.is_excluded(&record) {
                continue;
            }
            self.add_key(record);
            loaded += 1;
        }

        self.logger.info(&format!(
            "loaded {loaded} of {total} keys from namespace '{}'",
            self.keystore.namespace()
        ));
        Ok(())
    }

    /// Encrypt the held keys under `password`.
    ///
    /// # Errors
    ///
    /// - [`Error::ArchiveEmpty`] if no keys are held
    /// - [`Error::InvalidPassword`] if `password` is empty
    /// - [`Error::Fatal`] on any key derivation, encryption or encoding failure
    pub fn archive(&self, password: &str) -> Result<Vec<u8>> {
        if self.keys.is_empty() {
            return Err(Error::ArchiveEmpty);
        }
        if password.is_empty() {
            return Err(Error::InvalidPassword);
        }

        let records: Vec<Value> = self
            .keys
            .iter()
            .filter(|record| !self.is_excluded(record))
            .map(AttributeSet::to_json)
            .collect();
        let count = records.len();
        let plaintext = Zeroizing::new(
            serde_json::to_vec(&Value::Array(records))
                .map_err(|e| Error::fatal("serialize_keys", e.to_string()))?,
        );

        let (key, salt, rounds) = self
            .keystore
            .create_symmetric_key_from_password(password)
            .map_err(|e| Error::keystore("derive_key", &e))?;
        let iv = match &self.fixed_iv {
            Some(iv) => iv.clone(),
            None => self
                .keystore
                .create_iv()
                .map_err(|e| Error::keystore("create_iv", &e))?,
        };
        let ciphertext = self
            .keystore
            .encrypt_with_symmetric_key(&key, &plaintext, &iv)
            .map_err(|e| Error::keystore("encrypt_keys", &e))?;

        let envelope = Envelope {
            version: ARCHIVE_FORMAT_VERSION,
            meta_info: &self.meta_info,
            salt: STANDARD.encode(&salt),
            rounds,
            iv: STANDARD.encode(&iv),
            keys: STANDARD.encode(&ciphertext),
        };
        let bytes = serde_json::to_vec(&envelope)
            .map_err(|e| Error::fatal("serialize_envelope", e.to_string()))?;

        self.logger.info(&format!("archived {count} keys"));
        Ok(bytes)
    }

    /// Decrypt the held archive bytes with `password`, replacing the held
    /// keys on success.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidPassword`] if `password` is empty
    /// - [`Error::InvalidArchiveData`] if no archive is held, or `Version`,
    ///   `Salt`, `Rounds`, `Keys` or `IV` is missing or malformed
    /// - [`Error::VersionMismatch`] if `Version` is not [`ARCHIVE_FORMAT_VERSION`]
    /// - [`Error::MalformedKeySetData`] if the payload does not decrypt to an
    ///   array of records (including a wrong password)
    /// - [`Error::InvalidKeyAttribute`] if a record carries an unknown attribute
    /// - [`Error::Fatal`] if key derivation fails
    pub fn unarchive(&mut self, password: &str) -> Result<()> {
        if password.is_empty() {
            return Err(Error::InvalidPassword);
        }
        let envelope = self
            .envelope
            .as_ref()
            .ok_or_else(|| Error::invalid_archive_data("archive data"))?;

        let version = envelope
            .get(&EnvelopeField::Version)
            .and_then(Value::as_u64)
            .ok_or_else(|| Error::invalid_archive_data(EnvelopeField::Version.as_str()))?;
        if version != u64::from(ARCHIVE_FORMAT_VERSION) {
            return Err(Error::VersionMismatch {
                found: version,
                expected: ARCHIVE_FORMAT_VERSION,
            });
        }

        let salt = decode_field(envelope, EnvelopeField::Salt)?
            .ok_or_else(|| Error::invalid_archive_data(EnvelopeField::Salt.as_str()))?;
        let rounds = envelope
            .get(&EnvelopeField::Rounds)
            .and_then(Value::as_u64)
            .and_then(|rounds| u32::try_from(rounds).ok())
            .ok_or_else(|| Error::invalid_archive_data(EnvelopeField::Rounds.as_str()))?;
        let ciphertext = decode_field(envelope, EnvelopeField::Keys)?
            .ok_or_else(|| Error::invalid_archive_data(EnvelopeField::Keys.as_str()))?;
        let iv = match decode_field(envelope, EnvelopeField::IV)? {
            Some(iv) => iv,
            None => {
                self.logger.debug("archive has no IV, using zero IV");
                vec![0u8; self.keystore.iv_len()]
            }
        };

        let key = self
            .keystore
            .derive_symmetric_key_from_password(password, &salt, rounds)
            .map_err(|e| Error::keystore("derive_key", &e))?;

        let (records, iv) = match self.decrypt_records(&key, &ciphertext, &iv) {
            Some(records) => (records, iv),
            None => {
                let fallback = fallback_iv(iv.len());
                self.logger
                    .warn("archive keys did not decrypt, retrying with fallback IV");
                match self.decrypt_records(&key, &ciphertext, &fallback) {
                    Some(records) => (records, fallback),
                    None => {
                        self.logger.error("archive keys could not be decrypted");
                        return Err(Error::malformed(
                            "keys did not decrypt to a JSON array of records",
                        ));
                    }
                }
            }
        };

        let keys = records
            .iter()
            .map(AttributeSet::from_json)
            .collect::<Result<Vec<_>>>()?;

        self.keys.clear();
        self.namespaces.clear();
        for record in keys {
            self.add_key(record);
        }
        self.decryption_iv = Some(iv);

        self.logger
            .info(&format!("unarchived {} keys", self.keys.len()));
        Ok(())
    }

    /// One decryption attempt. `None` unless the payload decrypts to a JSON
    /// array whose elements are all objects.
    fn decrypt_records(
        &self,
        key: &SecretKey,
        ciphertext: &[u8],
        iv: &[u8],
    ) -> Option<Vec<Map<String, Value>>> {
        let plaintext = Zeroizing::new(
            self.keystore
                .decrypt_with_symmetric_key(key, ciphertext, iv)
                .ok()?,
        );
        match serde_json::from_slice::<Value>(&plaintext).ok()? {
            Value::Array(items) => items
                .into_iter()
                .map(|item| match item {
                    Value::Object(record) => Some(record),
                    _ => None,
                })
                .collect(),
            _ => None,
        }
    }

    /// Replace every keystore key with the held, non-excluded keys.
    ///
    /// # Errors
    ///
    /// - [`Error::ArchiveEmpty`] if no keys are held
    /// - [`Error::DuplicateKey`] if two held keys share an identity; the
    ///   keystore is not touched
    /// - [`Error::Fatal`] on any other keystore failure
    pub fn save_keys(&self) -> Result<()> {
        if self.keys.is_empty() {
            return Err(Error::ArchiveEmpty);
        }

        let records: Vec<KeyRecord> = self
            .keys
            .iter()
            .filter(|record| !self.is_excluded(record))
            .cloned()
            .collect();
        self.check_unique(&records)?;

        self.keystore
            .remove_all_keys()
            .map_err(|e| Error::keystore("remove_all_keys", &e))?;
        self.keystore.import_keys(&records).map_err(|e| match e {
            KeyStoreError::DuplicateKey { name } => Error::DuplicateKey { name },
            other => Error::keystore("import_keys", &other),
        })?;

        self.logger
            .info(&format!("restored {} keys into keystore", records.len()));
        Ok(())
    }

    /// Reject records that would clash with each other on import, before
    /// anything is deleted. Records without a namespace land in the
    /// keystore's.
    fn check_unique(&self, records: &[KeyRecord]) -> Result<()> {
        let default_namespace = self.keystore.namespace();
        let mut seen = BTreeSet::new();
        for record in records {
            let (Some(name), Some(key_type)) = (record.name(), record.key_type()) else {
                continue;
            };
            let namespace = record.namespace().unwrap_or(default_namespace);
            if !seen.insert((namespace, name, key_type)) {
                self.logger
                    .error(&format!("archive holds key '{name}' twice, keystore left untouched"));
                return Err(Error::DuplicateKey {
                    name: name.to_string(),
                });
            }
        }
        Ok(())
    }

    fn find_key(&self, name: &str, key_type: KeyType) -> Option<&KeyRecord> {
        let namespace = self.keystore.namespace();
        self.keys.iter().find(|record| {
            record.name() == Some(name)
                && record.key_type() == Some(key_type)
                && record.namespace() == Some(namespace)
        })
    }

    /// Whether a held record has this name and type in the keystore's namespace
    pub fn contains_key(&self, name: &str, key_type: KeyType) -> bool {
        self.find_key(name, key_type).is_some()
    }

    /// Key material of the held record with this name and type in the
    /// keystore's namespace
    pub fn get_key_data(&self, name: &str, key_type: KeyType) -> Option<&[u8]> {
        self.find_key(name, key_type).and_then(AttributeSet::data)
    }

    /// Drop held keys and archive bytes
    pub fn reset(&mut self) {
        self.keys.clear();
        self.namespaces.clear();
        self.envelope = None;
        self.fixed_iv = None;
        self.decryption_iv = None;
    }
}

/// Base64 field of the envelope: `Ok(None)` if absent, an error if present
/// but not a base64 string.
fn decode_field(
    envelope: &BTreeMap<EnvelopeField, Value>,
    field: EnvelopeField,
) -> Result<Option<Vec<u8>>> {
    match envelope.get(&field) {
        None => Ok(None),
        Some(Value::String(encoded)) => STANDARD
            .decode(encoded)
            .map(Some)
            .map_err(|_| Error::invalid_archive_data(field.as_str())),
        Some(_) => Err(Error::invalid_archive_data(field.as_str())),
    }
}

impl fmt::Debug for SecureKeyArchive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecureKeyArchive")
            .field("namespace", &self.keystore.namespace())
            .field("keys", &self.keys.len())
            .field("excluded_keys", &self.excluded_keys)
            .field("meta_info", &self.meta_info)
            .field("namespaces", &self.namespaces)
            .field("has_archive_data", &self.envelope.is_some())
            .finish()
    }
}

/// Build a minimal key record
pub fn key_record(namespace: &str, name: &str, key_type: KeyType, data: &[u8]) -> KeyRecord {
    AttributeSet::new()
        .with(AttributeValue::Namespace(namespace.to_string()))
        .with(AttributeValue::Name(name.to_string()))
        .with(AttributeValue::Type(key_type))
        .with(AttributeValue::data(data.to_vec()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{CryptoConfig, KdfParams};
    use crate::log::{MemoryLogger, NoOpLogger};
    use crate::MemoryKeyStore;

    fn store() -> Arc<MemoryKeyStore> {
        let config = CryptoConfig {
            kdf: KdfParams::fast(),
            ..CryptoConfig::default()
        };
        let store = MemoryKeyStore::with_config("app", config);
        store.insert_key("signing", KeyType::Private, &[1; 32], true).unwrap();
        store.insert_key("signing", KeyType::Public, &[2; 32], true).unwrap();
        store.insert_key("session", KeyType::Symmetric, &[3; 32], false).unwrap();
        Arc::new(store)
    }

    fn loaded(store: &Arc<MemoryKeyStore>) -> SecureKeyArchive {
        let mut archive = SecureKeyArchive::new(store.clone(), Arc::new(NoOpLogger));
        archive.load_keys().unwrap();
        archive
    }

    #[test]
    fn test_load_keys_skips_excluded() {
        let store = store();
        let mut archive = SecureKeyArchive::new(store.clone(), Arc::new(NoOpLogger));
        archive.set_excluded_keys(["session"]);
        archive.load_keys().unwrap();

        assert_eq!(archive.keys().len(), 2);
        assert!(archive.contains_key("signing", KeyType::Private));
        assert!(!archive.contains_key("session", KeyType::Symmetric));
        assert_eq!(archive.namespaces().iter().collect::<Vec<_>>(), vec!["app"]);
    }

    #[test]
    fn test_archive_requires_keys_and_password() {
        let store = store();
        let empty = SecureKeyArchive::new(store.clone(), Arc::new(NoOpLogger));
        assert!(matches!(empty.archive("pw"), Err(Error::ArchiveEmpty)));

        let archive = loaded(&store);
        assert!(matches!(archive.archive(""), Err(Error::InvalidPassword)));
    }

    #[test]
    fn test_envelope_layout() {
        let store = store();
        let mut archive = loaded(&store);
        archive.set_meta_info(BTreeMap::from([("device".to_string(), "laptop".to_string())]));
        archive.set_iv(vec![7; 12]);

        let bytes = archive.archive("hunter2").unwrap();
        let envelope: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(envelope["Version"], 2);
        assert_eq!(envelope["MetaInfo"]["device"], "laptop");
        assert_eq!(envelope["Rounds"], 1);
        assert_eq!(envelope["IV"], STANDARD.encode([7u8; 12]));
        assert!(envelope["Salt"].is_string());
        assert!(envelope["Keys"].is_string());
    }

    #[test]
    fn test_roundtrip() {
        let store = store();
        let bytes = loaded(&store).archive("hunter2").unwrap();

        let mut restored =
            SecureKeyArchive::from_archive_data(store.clone(), Arc::new(NoOpLogger), &bytes).unwrap();
        assert!(restored.has_archive_data());
        assert_eq!(restored.archive_version(), Some(2));
        restored.unarchive("hunter2").unwrap();

        assert_eq!(restored.keys(), store.export_all_keys().unwrap().as_slice());
        assert_eq!(restored.get_key_data("session", KeyType::Symmetric), Some(&[3u8; 32][..]));
    }

    #[test]
    fn test_wrong_password_is_malformed() {
        let store = store();
        let bytes = loaded(&store).archive("hunter2").unwrap();
        let logger = Arc::new(MemoryLogger::new());
        let mut restored =
            SecureKeyArchive::from_archive_data(store, logger.clone(), &bytes).unwrap();

        let err = restored.unarchive("hunter3").unwrap_err();
        assert!(matches!(err, Error::MalformedKeySetData { .. }));
        assert!(restored.keys().is_empty());
        assert!(logger.contains("fallback IV"));
    }

    #[test]
    fn test_missing_or_malformed_fields() {
        let store = store();
        for (data, expected) in [
            (r#"{"Salt":"AA==","Rounds":1,"Keys":"AA=="}"#, "Version"),
            (r#"{"Version":"2","Salt":"AA==","Rounds":1,"Keys":"AA=="}"#, "Version"),
            (r#"{"Version":2,"Rounds":1,"Keys":"AA=="}"#, "Salt"),
            (r#"{"Version":2,"Salt":"not base64!","Rounds":1,"Keys":"AA=="}"#, "Salt"),
            (r#"{"Version":2,"Salt":"AA==","Keys":"AA=="}"#, "Rounds"),
            (r#"{"Version":2,"Salt":"AA==","Rounds":-1,"Keys":"AA=="}"#, "Rounds"),
            (r#"{"Version":2,"Salt":"AA==","Rounds":1}"#, "Keys"),
            (r#"{"Version":2,"Salt":"AA==","Rounds":1,"Keys":"AA==","IV":7}"#, "IV"),
        ] {
            let mut archive = SecureKeyArchive::from_archive_data(
                store.clone(),
                Arc::new(NoOpLogger),
                data.as_bytes(),
            )
            .unwrap();
            match archive.unarchive("pw") {
                Err(Error::InvalidArchiveData { field }) => assert_eq!(field, expected, "{data}"),
                other => panic!("unexpected result {other:?} for {data}"),
            }
        }
    }

    #[test]
    fn test_version_checked_before_password_is_used() {
        let data = br#"{"Version":3,"Salt":"AA==","Rounds":1,"Keys":"AA=="}"#;
        let mut archive =
            SecureKeyArchive::from_archive_data(store(), Arc::new(NoOpLogger), data).unwrap();
        assert!(matches!(
            archive.unarchive("anything"),
            Err(Error::VersionMismatch { found: 3, expected: 2 })
        ));
        assert!(matches!(archive.unarchive(""), Err(Error::InvalidPassword)));
    }

    #[test]
    fn test_unknown_fields_dropped_and_meta_info_readable() {
        let data = br#"{"Version":2,"MetaInfo":{"owner":"alice"},"Extra":true}"#;
        let archive =
            SecureKeyArchive::from_archive_data(store(), Arc::new(NoOpLogger), data).unwrap();
        assert_eq!(archive.meta_info().get("owner").map(String::as_str), Some("alice"));
        assert_eq!(archive.archive_version(), Some(2));
    }

    #[test]
    fn test_not_json_is_none() {
        assert!(SecureKeyArchive::from_archive_data(store(), Arc::new(NoOpLogger), b"nope").is_none());
        assert!(SecureKeyArchive::from_archive_data(store(), Arc::new(NoOpLogger), b"[1,2]").is_none());
    }

    #[test]
    fn test_save_keys_replaces_keystore() {
        let source = store();
        let bytes = loaded(&source).archive("pw").unwrap();

        let target = Arc::new(MemoryKeyStore::with_config(
            "app",
            CryptoConfig {
                kdf: KdfParams::fast(),
                ..CryptoConfig::default()
            },
        ));
        target.insert_key("stale", KeyType::Password, b"old", false).unwrap();

        let mut archive =
            SecureKeyArchive::from_archive_data(target.clone(), Arc::new(NoOpLogger), &bytes).unwrap();
        archive.unarchive("pw").unwrap();
        archive.save_keys().unwrap();

        assert_eq!(target.export_all_keys().unwrap(), source.export_all_keys().unwrap());
    }

    #[test]
    fn test_save_keys_duplicate() {
        let store = store();
        let mut archive = loaded(&store);
        archive.add_key(key_record("app", "signing", KeyType::Private, &[9; 32]));

        let before = store.export_all_keys().unwrap();
        let err = archive.save_keys().unwrap_err();
        assert!(matches!(err, Error::DuplicateKey { ref name } if name == "signing"));
        assert_eq!(store.export_all_keys().unwrap(), before);
    }

    #[test]
    fn test_save_keys_duplicate_without_namespace() {
        let store = store();
        let mut archive = SecureKeyArchive::new(store.clone(), Arc::new(NoOpLogger));
        archive.add_key(key_record("app", "x", KeyType::Private, &[1; 32]));
        let mut bare = key_record("app", "x", KeyType::Private, &[2; 32]);
        bare.remove(crate::attribute::AttributeKind::Namespace);
        archive.add_key(bare);

        assert!(matches!(archive.save_keys(), Err(Error::DuplicateKey { .. })));
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn test_save_empty_archive() {
        let archive = SecureKeyArchive::new(store(), Arc::new(NoOpLogger));
        assert!(matches!(archive.save_keys(), Err(Error::ArchiveEmpty)));
    }

    #[test]
    fn test_reset() {
        let store = store();
        let bytes = loaded(&store).archive("pw").unwrap();
        let mut archive =
            SecureKeyArchive::from_archive_data(store, Arc::new(NoOpLogger), &bytes).unwrap();
        archive.unarchive("pw").unwrap();

        archive.reset();
        assert!(archive.keys().is_empty());
        assert!(archive.namespaces().is_empty());
        assert!(!archive.has_archive_data());
        assert!(matches!(
            archive.unarchive("pw"),
            Err(Error::InvalidArchiveData { .. })
        ));
    }

    #[test]
    fn test_fallback_iv_pattern() {
        let iv = fallback_iv(12);
        assert_eq!(iv[0], 0x10);
        assert_eq!(iv[4], 0x01);
        assert_eq!(iv.iter().filter(|b| **b != 0).count(), 2);
        assert_eq!(fallback_iv(3), vec![0x10, 0, 0]);
    }
}
