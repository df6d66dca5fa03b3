//! The required key-value store contract and an in-memory
//! reference implementation used by tests and examples.

use std::{
    collections::HashMap,
    sync::{Mutex, RwLock},
};

use crate::{err_at, fid::Fid, Error, Result};

/// Collaborator trait for the durable key-value store this crate pages
/// fragments through.
///
/// Implementations must provide ACID semantics per key: a successful `put`
/// is durable and readers never observe a torn value. Ordering across
/// distinct keys is unconstrained.
pub trait Store {
    /// Test whether `key` is present.
    fn exists(&self, key: &Fid) -> Result<bool>;
    /// Fetch the bytes stored under `key`, if any.
    fn get(&self, key: &Fid) -> Result<Option<Vec<u8>>>;
    /// Durably write `value` under `key`. Atomic: never partially succeeds.
    fn put(&self, key: &Fid, value: Vec<u8>) -> Result<()>;

    /// Fetch the bytes published under an application-chosen stable name
    /// (by convention `"root"`), used to publish the current tree root.
    fn get_named(&self, name: &str) -> Result<Option<Vec<u8>>>;
    /// Publish `value` under a stable name.
    fn put_named(&self, name: &str, value: Vec<u8>) -> Result<()>;
}

/// In-memory [`Store`], backed by a `Mutex`-guarded hash map.
///
/// Useful for tests, examples, and as documentation of the contract, but
/// it is not a durable store and must not be mistaken for one.
#[derive(Default)]
pub struct MemStore {
    fragments: RwLock<HashMap<Fid, Vec<u8>>>,
    names: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemStore {
    pub fn new() -> MemStore {
        MemStore::default()
    }

    /// Number of fragments currently held. Useful in tests asserting
    /// content-addressing idempotence.
    pub fn len(&self) -> usize {
        self.fragments.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Store for MemStore {
    fn exists(&self, key: &Fid) -> Result<bool> {
        Ok(self.fragments.read().unwrap().contains_key(key))
    }

    fn get(&self, key: &Fid) -> Result<Option<Vec<u8>>> {
        Ok(self.fragments.read().unwrap().get(key).cloned())
    }

    fn put(&self, key: &Fid, value: Vec<u8>) -> Result<()> {
        self.fragments.write().unwrap().insert(*key, value);
        Ok(())
    }

    fn get_named(&self, name: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.names.lock().unwrap().get(name).cloned())
    }

    fn put_named(&self, name: &str, value: Vec<u8>) -> Result<()> {
        self.names.lock().unwrap().insert(name.to_string(), value);
        Ok(())
    }
}

/// Helper used by fragment-layer callers to surface a missing reference as
/// the `StoreInconsistent` error kind.
pub(crate) fn missing_fragment<T>(key: &Fid) -> Result<T> {
    log::warn!("store-inconsistency: no fragment backing reference {:?}", key);
    err_at!(StoreInconsistent, msg: "no fragment backing reference {:?}", key)
}
