//! In-memory store and ref table for tests and ephemeral vaults

use super::{ObjectStore, RefTable};
use crate::model::{content_hash, Hash, Object, ObjectKind};
use crate::{Error, Result};
use parking_lot::RwLock;
use std::collections::HashMap;

/// Objects kept as encoded bodies, decoded and verified on every read
#[derive(Default)]
pub struct MemoryStore {
    objects: RwLock<HashMap<Hash, (ObjectKind, Vec<u8>)>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn object_count(&self) -> usize {
        self.objects.read().len()
    }

    #[cfg(test)]
    pub(crate) fn tamper(&self, hash: &Hash, body: Vec<u8>) {
        if let Some(entry) = self.objects.write().get_mut(hash) {
            entry.1 = body;
        }
    }
}

impl ObjectStore for MemoryStore {
    fn get(&self, hash: &Hash) -> Result<Object> {
        let objects = self.objects.read();
        let (kind, body) = objects.get(hash).ok_or(Error::ObjectNotFound(*hash))?;
        Object::decode_verified(hash, *kind, body)
    }

    fn put(&self, object: &Object) -> Result<Hash> {
        let kind = object.kind();
        let body = object.encode()?;
        let hash = content_hash(kind, &body);
        self.objects.write().entry(hash).or_insert((kind, body));
        Ok(hash)
    }

    fn contains(&self, hash: &Hash) -> Result<bool> {
        Ok(self.objects.read().contains_key(hash))
    }
}

#[derive(Default)]
pub struct MemoryRefTable {
    refs: RwLock<HashMap<String, Hash>>,
}

impl MemoryRefTable {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RefTable for MemoryRefTable {
    fn read(&self, name: &str) -> Result<Option<Hash>> {
        Ok(self.refs.read().get(name).copied())
    }

    fn compare_and_swap(&self, name: &str, expected: Option<Hash>, new: Hash) -> Result<bool> {
        let mut refs = self.refs.write();
        if refs.get(name).copied() != expected {
            return Ok(false);
        }
        refs.insert(name.to_string(), new);
        Ok(true)
    }

    fn delete(&self, name: &str) -> Result<bool> {
        Ok(self.refs.write().remove(name).is_some())
    }

    fn list(&self) -> Result<Vec<(String, Hash)>> {
        let mut refs: Vec<_> = self
            .refs
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect();
        refs.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(refs)
    }
}
