use std::{
    collections::HashMap,
    io::{self, Cursor},
};

use async_trait::async_trait;
use tokio::{io::AsyncReadExt, sync::RwLock};

use crate::{object::ObjId, storage};

/// Storage kept entirely in memory.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    objects: RwLock<HashMap<ObjId, Vec<u8>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn remove(&self, key: &ObjId) -> Option<Vec<u8>> {
        self.objects.write().await.remove(key)
    }

    /// Replaces the stored bytes of `key` without going through the
    /// datastore.
    pub async fn overwrite(&self, key: &ObjId, bytes: Vec<u8>) {
        self.objects.write().await.insert(*key, bytes);
    }

    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.objects.read().await.is_empty()
    }
}

#[async_trait]
impl storage::Storage for MemoryStorage {
    async fn get(&self, key: &ObjId) -> io::Result<storage::StreamReader> {
        let bytes = self
            .objects
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| storage::not_found(key))?;

        Ok(Box::new(Cursor::new(bytes)))
    }

    async fn put(&self, key: &ObjId, mut reader: storage::StreamReader, len: u64) -> io::Result<()> {
        let mut buffer = Vec::with_capacity(len as usize);
        reader.read_to_end(&mut buffer).await?;

        self.objects.write().await.insert(*key, buffer);

        Ok(())
    }

    async fn contains(&self, key: &ObjId) -> io::Result<bool> {
        Ok(self.objects.read().await.contains_key(key))
    }
}
