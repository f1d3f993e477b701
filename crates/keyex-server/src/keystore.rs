//! The read-only table of private keys, indexed by virtual host and key kind.
use std::collections::{BTreeMap, HashMap};

use keyex_keys::{KeyKind, KeyRecord};

/// A set of keys with at most one key per [`KeyKind`].
#[derive(Debug, Default)]
pub struct KeySet(BTreeMap<KeyKind, KeyRecord>);

impl KeySet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Files `record` under its own kind, returning the key it replaces.
    pub fn insert(&mut self, record: KeyRecord) -> Option<KeyRecord> {
        self.0.insert(record.kind(), record)
    }

    pub fn get(&self, kind: KeyKind) -> Option<&KeyRecord> {
        self.0.get(&kind)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl IntoIterator for KeySet {
    type IntoIter = std::collections::btree_map::IntoValues<KeyKind, KeyRecord>;
    type Item = KeyRecord;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_values()
    }
}

/// Maps virtual host names to their keys, plus one default set which is used
/// when no virtual host matches.
///
/// The store is assembled once with a [`KeyStoreBuilder`] before any listener
/// is started. Afterwards it is never mutated, so it can be shared between all
/// concurrent requests without any locking.
///
/// ```
/// use keyex_server::keystore::KeyStore;
/// use keyex_keys::KeyKind;
///
/// let store = KeyStore::builder().build();
/// assert!(store.lookup("example.com", KeyKind::Rsa).is_none());
/// ```
#[derive(Debug, Default)]
pub struct KeyStore {
    default: KeySet,
    virtual_hosts: HashMap<String, KeySet>,
}

impl KeyStore {
    pub fn builder() -> KeyStoreBuilder {
        KeyStoreBuilder::default()
    }

    /// Resolves the key for the `(virtual_host, kind)` pair.
    ///
    /// Specificity is per pair, not per host: a known virtual host without a
    /// key of the requested kind falls back to the default set, exactly like an
    /// unknown or empty virtual host does.
    pub fn lookup(&self, virtual_host: &str, kind: KeyKind) -> Option<&KeyRecord> {
        let host_key = (!virtual_host.is_empty())
            .then(|| self.virtual_hosts.get(virtual_host))
            .flatten()
            .and_then(|keys| keys.get(kind));

        host_key.or_else(|| self.default.get(kind))
    }

    pub fn default_keys(&self) -> &KeySet {
        &self.default
    }

    pub fn virtual_hosts(&self) -> impl Iterator<Item = (&str, &KeySet)> {
        self.virtual_hosts
            .iter()
            .map(|(name, keys)| (name.as_str(), keys))
    }

    pub fn is_empty(&self) -> bool {
        self.default.is_empty() && self.virtual_hosts.values().all(KeySet::is_empty)
    }
}

#[derive(Debug, Default)]
pub struct KeyStoreBuilder {
    default: KeySet,
    virtual_hosts: HashMap<String, KeySet>,
}

impl KeyStoreBuilder {
    /// Adds `record` to the default key set.
    pub fn default_key(mut self, record: KeyRecord) -> Self {
        self.default.insert(record);
        self
    }

    /// Adds `record` to the key set of `virtual_host`.
    pub fn virtual_host_key(mut self, virtual_host: impl Into<String>, record: KeyRecord) -> Self {
        self.virtual_hosts
            .entry(virtual_host.into())
            .or_default()
            .insert(record);
        self
    }

    pub fn build(self) -> KeyStore {
        KeyStore {
            default: self.default,
            virtual_hosts: self.virtual_hosts,
        }
    }
}
