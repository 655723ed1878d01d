use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::ops::Deref;
use std::sync::Arc;

/// The Store holds two independent namespaces: flat string keys and hashes of fields. Each one
/// sits behind its own reader/writer lock, held only for the duration of a single map operation.
/// Cloning a Store is cheap and yields a handle to the same underlying tables.
#[derive(Clone, Default)]
pub struct Store {
    inner: Arc<InnerStore>,
}

impl Store {
    pub fn new() -> Store {
        Self::default()
    }
}

impl Deref for Store {
    type Target = InnerStore;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

// Keys, hash names and fields are arbitrary bytes, like RESP bulk strings.
type Key = Bytes;
type Hash = HashMap<Bytes, Bytes>;

#[derive(Default)]
pub struct InnerStore {
    strings: RwLock<HashMap<Key, Bytes>>,
    hashes: RwLock<HashMap<Key, Hash>>,
}

impl InnerStore {
    pub fn set(&self, key: impl Into<Key>, value: Bytes) {
        self.strings.write().insert(key.into(), value);
    }

    pub fn get(&self, key: impl AsRef<[u8]>) -> Option<Bytes> {
        self.strings.read().get(key.as_ref()).cloned()
    }

    /// Sets `field` in the hash stored at `key`, creating the hash first if needed. A hash is
    /// never removed once created.
    pub fn hset(&self, key: impl Into<Key>, field: impl Into<Bytes>, value: Bytes) {
        self.hashes
            .write()
            .entry(key.into())
            .or_default()
            .insert(field.into(), value);
    }

    pub fn hget(&self, key: impl AsRef<[u8]>, field: impl AsRef<[u8]>) -> Option<Bytes> {
        self.hashes
            .read()
            .get(key.as_ref())
            .and_then(|hash| hash.get(field.as_ref()))
            .cloned()
    }

    /// Returns every field/value pair of the hash, in no particular order, or `None` if no hash
    /// was ever created under `key`.
    pub fn hgetall(&self, key: impl AsRef<[u8]>) -> Option<Vec<(Bytes, Bytes)>> {
        self.hashes.read().get(key.as_ref()).map(|hash| {
            hash.iter()
                .map(|(field, value)| (field.clone(), value.clone()))
                .collect()
        })
    }

    pub fn len(&self) -> usize {
        self.strings.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn hash_count(&self) -> usize {
        self.hashes.read().len()
    }
}
