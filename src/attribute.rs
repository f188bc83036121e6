//! Key attributes and attribute sets
//!
//! An [`AttributeSet`] is used three ways: as a search filter, as an update
//! patch, and as the full description of a stored key (a [`KeyRecord`]).

use crate::{Error, KeyType, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use zeroize::Zeroizing;

/// A key record as exported from, or imported into, a keystore
pub type KeyRecord = AttributeSet;

/// Addresses one property of a key
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AttributeKind {
    /// Namespace the key lives in
    Namespace,
    /// Name of the key within its namespace
    Name,
    /// Kind of key material
    Type,
    /// Whether the key syncs across devices
    Synchronizable,
    /// Raw key material
    Data,
}

impl AttributeKind {
    /// Every attribute kind, in record order
    pub const ALL: [AttributeKind; 5] = [
        Self::Namespace,
        Self::Name,
        Self::Type,
        Self::Synchronizable,
        Self::Data,
    ];

    /// Field name used in archived key records
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Namespace => "Namespace",
            Self::Name => "Name",
            Self::Type => "Type",
            Self::Synchronizable => "Synchronizable",
            Self::Data => "Data",
        }
    }
}

impl fmt::Display for AttributeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AttributeKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| Error::InvalidKeyAttribute {
                attribute: s.to_string(),
            })
    }
}

/// The value of a single attribute, tagged by kind
#[derive(Clone, PartialEq, Eq)]
pub enum AttributeValue {
    /// See [`AttributeKind::Namespace`]
    Namespace(String),
    /// See [`AttributeKind::Name`]
    Name(String),
    /// See [`AttributeKind::Type`]
    Type(KeyType),
    /// See [`AttributeKind::Synchronizable`]
    Synchronizable(bool),
    /// See [`AttributeKind::Data`]; zeroed on drop
    Data(Zeroizing<Vec<u8>>),
}

impl AttributeValue {
    /// Convenience constructor for key material
    pub fn data(bytes: impl Into<Vec<u8>>) -> Self {
        Self::Data(Zeroizing::new(bytes.into()))
    }

    /// The kind this value belongs to
    pub const fn kind(&self) -> AttributeKind {
        match self {
            Self::Namespace(_) => AttributeKind::Namespace,
            Self::Name(_) => AttributeKind::Name,
            Self::Type(_) => AttributeKind::Type,
            Self::Synchronizable(_) => AttributeKind::Synchronizable,
            Self::Data(_) => AttributeKind::Data,
        }
    }

    fn to_json(&self) -> Value {
        match self {
            Self::Namespace(s) | Self::Name(s) => Value::String(s.clone()),
            Self::Type(t) => Value::String(t.as_str().to_string()),
            Self::Synchronizable(b) => Value::Bool(*b),
            Self::Data(bytes) => Value::String(STANDARD.encode(bytes.as_slice())),
        }
    }

    fn from_json(kind: AttributeKind, value: &Value) -> Result<Self> {
        let malformed = || Error::malformed(format!("attribute '{kind}' has the wrong type"));
        match kind {
            AttributeKind::Namespace => Ok(Self::Namespace(value.as_str().ok_or_else(malformed)?.to_string())),
            AttributeKind::Name => Ok(Self::Name(value.as_str().ok_or_else(malformed)?.to_string())),
            AttributeKind::Type => Ok(Self::Type(value.as_str().ok_or_else(malformed)?.parse()?)),
            AttributeKind::Synchronizable => Ok(Self::Synchronizable(value.as_bool().ok_or_else(malformed)?)),
            AttributeKind::Data => {
                let encoded = value.as_str().ok_or_else(malformed)?;
                let bytes = STANDARD
                    .decode(encoded)
                    .map_err(|e| Error::malformed(format!("attribute 'Data' is not base64: {e}")))?;
                Ok(Self::data(bytes))
            }
        }
    }
}

impl fmt::Debug for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Namespace(s) => f.debug_tuple("Namespace").field(s).finish(),
            Self::Name(s) => f.debug_tuple("Name").field(s).finish(),
            Self::Type(t) => f.debug_tuple("Type").field(t).finish(),
            Self::Synchronizable(b) => f.debug_tuple("Synchronizable").field(b).finish(),
            Self::Data(_) => f.debug_tuple("Data").field(&"[REDACTED]").finish(),
        }
    }
}

/// A mapping from attribute kind to value.
///
/// At most one value is held per kind; inserting a value replaces any
/// previous value of the same kind.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AttributeSet {
    attributes: BTreeMap<AttributeKind, AttributeValue>,
}

impl AttributeSet {
    /// Create an empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    pub fn with(mut self, value: AttributeValue) -> Self {
        self.insert(value);
        self
    }

    /// Insert a value, returning the previous value of the same kind
    pub fn insert(&mut self, value: AttributeValue) -> Option<AttributeValue> {
        self.attributes.insert(value.kind(), value)
    }

    /// Remove the value of a kind
    pub fn remove(&mut self, kind: AttributeKind) -> Option<AttributeValue> {
        self.attributes.remove(&kind)
    }

    /// Get the value of a kind
    pub fn get(&self, kind: AttributeKind) -> Option<&AttributeValue> {
        self.attributes.get(&kind)
    }

    /// Whether a value of this kind is present
    pub fn contains(&self, kind: AttributeKind) -> bool {
        self.attributes.contains_key(&kind)
    }

    /// Number of attributes held
    pub fn count(&self) -> usize {
        self.attributes.len()
    }

    /// Whether the set is empty
    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }

    /// Iterate over the values, ordered by kind
    pub fn iter(&self) -> impl Iterator<Item = &AttributeValue> {
        self.attributes.values()
    }

    /// The pairs of `self` not already present with an equal value in `other`.
    ///
    /// `updates.subtract(&current)` is the delta that still has to be written
    /// for a key to reach the target state; an empty result means the key is
    /// already migrated.
    pub fn subtract(&self, other: &AttributeSet) -> AttributeSet {
        let attributes = self
            .attributes
            .iter()
            .filter(|(kind, value)| other.get(**kind) != Some(*value))
            .map(|(kind, value)| (*kind, value.clone()))
            .collect();
        AttributeSet { attributes }
    }

    /// Whether every pair in `filter` is present with an equal value in `self`
    pub fn matches(&self, filter: &AttributeSet) -> bool {
        filter.subtract(self).is_empty()
    }

    /// Overwrite `self` with every value in `patch`
    pub fn apply(&mut self, patch: &AttributeSet) {
        for value in patch.iter() {
            self.insert(value.clone());
        }
    }

    /// The `Namespace` attribute, if present
    pub fn namespace(&self) -> Option<&str> {
        match self.get(AttributeKind::Namespace) {
            Some(AttributeValue::Namespace(ns)) => Some(ns),
            _ => None,
        }
    }

    /// The `Name` attribute, if present
    pub fn name(&self) -> Option<&str> {
        match self.get(AttributeKind::Name) {
            Some(AttributeValue::Name(name)) => Some(name),
            _ => None,
        }
    }

    /// The `Type` attribute, if present
    pub fn key_type(&self) -> Option<KeyType> {
        match self.get(AttributeKind::Type) {
            Some(AttributeValue::Type(t)) => Some(*t),
            _ => None,
        }
    }

    /// The `Synchronizable` attribute, if present
    pub fn synchronizable(&self) -> Option<bool> {
        match self.get(AttributeKind::Synchronizable) {
            Some(AttributeValue::Synchronizable(b)) => Some(*b),
            _ => None,
        }
    }

    /// The `Data` attribute, if present
    pub fn data(&self) -> Option<&[u8]> {
        match self.get(AttributeKind::Data) {
            Some(AttributeValue::Data(bytes)) => Some(bytes.as_slice()),
            _ => None,
        }
    }

    /// Encode as a JSON object keyed by attribute name, `Data` as base64
    pub fn to_json(&self) -> Value {
        let object: Map<String, Value> = self
            .attributes
            .iter()
            .map(|(kind, value)| (kind.as_str().to_string(), value.to_json()))
            .collect();
        Value::Object(object)
    }

    /// Decode a JSON object produced by [`to_json`](Self::to_json).
    ///
    /// Unknown attribute names fail with [`Error::InvalidKeyAttribute`];
    /// values of the wrong JSON type fail with [`Error::MalformedKeySetData`].
    pub fn from_json(object: &Map<String, Value>) -> Result<Self> {
        let mut set = AttributeSet::new();
        for (name, value) in object {
            let kind: AttributeKind = name.parse()?;
            set.insert(AttributeValue::from_json(kind, value)?);
        }
        Ok(set)
    }
}

impl FromIterator<AttributeValue> for AttributeSet {
    fn from_iter<I: IntoIterator<Item = AttributeValue>>(iter: I) -> Self {
        let mut set = AttributeSet::new();
        for value in iter {
            set.insert(value);
        }
        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record() -> AttributeSet {
        AttributeSet::new()
            .with(AttributeValue::Namespace("app".into()))
            .with(AttributeValue::Name("signing".into()))
            .with(AttributeValue::Type(KeyType::Private))
            .with(AttributeValue::Synchronizable(false))
            .with(AttributeValue::data(vec![1, 2, 3]))
    }

    #[test]
    fn test_subtract_drops_equal_pairs() {
        let updates = AttributeSet::new()
            .with(AttributeValue::Synchronizable(true))
            .with(AttributeValue::Namespace("app".into()));

        let delta = updates.subtract(&record());
        assert_eq!(delta.count(), 1);
        assert_eq!(delta.synchronizable(), Some(true));

        let mut migrated = record();
        migrated.apply(&delta);
        assert!(updates.subtract(&migrated).is_empty());
    }

    #[test]
    fn test_subtract_keeps_missing_kinds() {
        let updates = AttributeSet::new().with(AttributeValue::Synchronizable(true));
        let empty = AttributeSet::new();
        assert_eq!(updates.subtract(&empty), updates);
        assert!(empty.subtract(&updates).is_empty());
    }

    #[test]
    fn test_matches_filter() {
        let filter = AttributeSet::new()
            .with(AttributeValue::Type(KeyType::Private))
            .with(AttributeValue::Synchronizable(false));
        assert!(record().matches(&filter));
        assert!(record().matches(&AttributeSet::new()));

        let other = AttributeSet::new().with(AttributeValue::Type(KeyType::Public));
        assert!(!record().matches(&other));
    }

    #[test]
    fn test_insert_replaces_same_kind() {
        let mut set = AttributeSet::new().with(AttributeValue::Name("a".into()));
        let previous = set.insert(AttributeValue::Name("b".into()));
        assert_eq!(previous, Some(AttributeValue::Name("a".into())));
        assert_eq!(set.count(), 1);
        assert_eq!(set.name(), Some("b"));
    }

    #[test]
    fn test_json_record_codec() {
        let value = record().to_json();
        assert_eq!(value["Name"], json!("signing"));
        assert_eq!(value["Type"], json!("Private"));
        assert_eq!(value["Data"], json!("AQID"));

        let decoded = AttributeSet::from_json(value.as_object().unwrap()).unwrap();
        assert_eq!(decoded, record());
    }

    #[test]
    fn test_json_rejects_unknown_attribute() {
        let value = json!({"Name": "k", "Label": "x"});
        let err = AttributeSet::from_json(value.as_object().unwrap()).unwrap_err();
        assert!(matches!(err, Error::InvalidKeyAttribute { ref attribute } if attribute == "Label"));
    }

    #[test]
    fn test_json_rejects_wrong_value_type() {
        let value = json!({"Synchronizable": "yes"});
        let err = AttributeSet::from_json(value.as_object().unwrap()).unwrap_err();
        assert!(matches!(err, Error::MalformedKeySetData { .. }));
    }

    #[test]
    fn test_debug_redacts_data() {
        let debug = format!("{:?}", record());
        assert!(debug.contains("REDACTED"));
        assert!(!debug.contains("[1, 2, 3]"));
    }
}
