use std::{
    fmt,
    io::{self, Cursor},
    sync::Arc,
};

use tokio::io::AsyncReadExt;
use tracing::{instrument, warn};

use crate::{
    compress::{self, Compression},
    config::RepoConfig,
    crypto::{self, PrivateKey, PublicKey},
    error::{Error, Result},
    object::ObjId,
    storage::Storage,
};

/// Reads and writes objects, applying the repository's compression and
/// encryption settings and checking content addresses on the way out.
pub struct Datastore {
    local: Option<Arc<dyn Storage>>,
    remote: Arc<dyn Storage>,
    compression: Compression,
    public_key: Option<PublicKey>,
}

impl fmt::Debug for Datastore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Datastore")
            .field("local", &self.local.is_some())
            .field("compression", &self.compression)
            .field("encrypted", &self.public_key.is_some())
            .finish()
    }
}

impl Datastore {
    pub fn new(remote: Arc<dyn Storage>, config: &RepoConfig) -> Self {
        Datastore {
            local: None,
            remote,
            compression: config.compression,
            public_key: config.public_key(),
        }
    }

    /// Adds a store that is consulted before the remote one on reads.
    pub fn with_local(mut self, local: Arc<dyn Storage>) -> Self {
        self.local = Some(local);
        self
    }

    pub fn is_encrypted(&self) -> bool {
        self.public_key.is_some()
    }

    /// Stores `payload` under its content address. Objects that are already
    /// present are not written again.
    #[instrument(level = "debug", skip(self, payload), fields(len = payload.len()), ret, err)]
    pub async fn put_object(&self, payload: &[u8]) -> Result<ObjId> {
        let objid = ObjId::of(payload);
        if self.remote.contains(&objid).await? {
            return Ok(objid);
        }

        let compressed = compress::compress(self.compression, payload)?;
        let stored = match &self.public_key {
            Some(public_key) => crypto::seal(public_key, &compressed, objid.as_bytes())
                .map_err(io::Error::other)?,
            None => compressed,
        };

        let len = stored.len() as u64;
        self.remote
            .put(&objid, Box::new(Cursor::new(stored)), len)
            .await?;

        Ok(objid)
    }

    /// Fetches the payload of `objid`.
    ///
    /// The local store is tried first. A local copy that is missing or does
    /// not open, decompress and hash back to `objid` is passed over with a
    /// warning, and the remote copy is used instead.
    ///
    /// Fails with [`Error::CorruptedRepository`] when the remote copy is
    /// missing or damaged in the same ways, and with [`Error::KeyRequired`]
    /// when the repository is encrypted and no key was given.
    #[instrument(level = "debug", skip(self, objid, key), fields(objid = %objid), err(level = "debug"))]
    pub async fn get_object(&self, objid: &ObjId, key: Option<&PrivateKey>) -> Result<Vec<u8>> {
        if self.is_encrypted() && key.is_none() {
            return Err(Error::KeyRequired(*objid));
        }

        if let Some(local) = &self.local {
            match read_all(local.as_ref(), objid).await {
                Ok(stored) => match self.unpack(objid, stored, key) {
                    Ok(payload) => return Ok(payload),
                    Err(e) => warn!(%objid, "local copy unusable, trying remote: {e}"),
                },
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => warn!(%objid, "local store read failed, trying remote: {e}"),
            }
        }

        let stored = read_all(self.remote.as_ref(), objid)
            .await
            .map_err(|e| match e.kind() {
                io::ErrorKind::NotFound => {
                    Error::corrupted(*objid, "not found in local cache or remote store")
                }
                _ => Error::corrupted(*objid, e),
            })?;

        self.unpack(objid, stored, key)
    }

    /// Opens the seal, decompresses and checks the content address.
    fn unpack(&self, objid: &ObjId, stored: Vec<u8>, key: Option<&PrivateKey>) -> Result<Vec<u8>> {
        let compressed = match (&self.public_key, key) {
            (None, _) => stored,
            (Some(_), None) => return Err(Error::KeyRequired(*objid)),
            (Some(_), Some(key)) => crypto::open(key, &stored, objid.as_bytes())
                .map_err(|e| Error::corrupted(*objid, e))?,
        };

        let payload =
            compress::decompress(&compressed).map_err(|e| Error::corrupted(*objid, e))?;

        let actual = ObjId::of(&payload);
        if actual != *objid {
            return Err(Error::corrupted(
                *objid,
                format!("content hashes to {actual}"),
            ));
        }

        Ok(payload)
    }
}

async fn read_all(storage: &dyn Storage, objid: &ObjId) -> io::Result<Vec<u8>> {
    let mut reader = storage.get(objid).await?;
    let mut buffer = Vec::new();
    reader.read_to_end(&mut buffer).await?;
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::EncryptionConfig, storage::MemoryStorage};

    fn plain(storage: Arc<MemoryStorage>) -> Datastore {
        Datastore::new(storage, &RepoConfig::default())
    }

    #[tokio::test]
    async fn put_then_get() {
        let storage = Arc::new(MemoryStorage::new());
        let datastore = plain(storage.clone());

        let objid = datastore.put_object(b"payload bytes").await.unwrap();
        assert_eq!(objid, ObjId::of(b"payload bytes"));
        assert_eq!(
            datastore.get_object(&objid, None).await.unwrap(),
            b"payload bytes"
        );

        datastore.put_object(b"payload bytes").await.unwrap();
        assert_eq!(storage.len().await, 1);
    }

    #[tokio::test]
    async fn missing_object_is_corruption() {
        let datastore = plain(Arc::new(MemoryStorage::new()));
        let err = datastore
            .get_object(&ObjId::of(b"absent"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::CorruptedRepository { .. }));
    }

    #[tokio::test]
    async fn tampered_bytes_are_corruption() {
        let storage = Arc::new(MemoryStorage::new());
        let datastore = plain(storage.clone());
        let objid = datastore.put_object(b"original").await.unwrap();

        let tampered = compress::compress(Compression::None, b"replaced").unwrap();
        storage.overwrite(&objid, tampered).await;

        let err = datastore.get_object(&objid, None).await.unwrap_err();
        assert!(matches!(err, Error::CorruptedRepository { .. }));

        storage.overwrite(&objid, vec![0x7f, 1, 2, 3]).await;
        let err = datastore.get_object(&objid, None).await.unwrap_err();
        assert!(matches!(err, Error::CorruptedRepository { .. }));
    }

    #[tokio::test]
    async fn encrypted_round_trip() {
        let key = PrivateKey::generate();
        let config = RepoConfig {
            compression: Compression::Zstd,
            encryption: Some(EncryptionConfig {
                public_key: key.public_key(),
            }),
        };
        let storage = Arc::new(MemoryStorage::new());
        let datastore = Datastore::new(storage.clone(), &config);
        assert!(datastore.is_encrypted());

        let objid = datastore.put_object(b"confidential").await.unwrap();
        assert_eq!(
            datastore.get_object(&objid, Some(&key)).await.unwrap(),
            b"confidential"
        );

        assert!(matches!(
            datastore.get_object(&objid, None).await,
            Err(Error::KeyRequired(id)) if id == objid
        ));
        assert!(matches!(
            datastore
                .get_object(&objid, Some(&PrivateKey::generate()))
                .await,
            Err(Error::CorruptedRepository { .. })
        ));
    }

    #[tokio::test]
    async fn local_store_is_preferred() {
        let local = Arc::new(MemoryStorage::new());
        let remote = Arc::new(MemoryStorage::new());
        let datastore = plain(remote.clone()).with_local(local.clone());

        let objid = datastore.put_object(b"shared").await.unwrap();
        assert!(local.is_empty().await);

        // Readable from the remote fallback.
        assert_eq!(datastore.get_object(&objid, None).await.unwrap(), b"shared");

        // Once the local copy exists, the remote is not consulted.
        let stored = remote.remove(&objid).await.unwrap();
        local.overwrite(&objid, stored).await;
        assert_eq!(datastore.get_object(&objid, None).await.unwrap(), b"shared");
    }

    #[tokio::test]
    async fn damaged_local_copy_falls_back_to_remote() {
        let local = Arc::new(MemoryStorage::new());
        let remote = Arc::new(MemoryStorage::new());
        let datastore = plain(remote.clone()).with_local(local.clone());

        let objid = datastore.put_object(b"intact remotely").await.unwrap();
        local
            .overwrite(&objid, b"\x00stale local bytes".to_vec())
            .await;

        assert_eq!(
            datastore.get_object(&objid, None).await.unwrap(),
            b"intact remotely"
        );

        // Undecompressable local bytes are passed over the same way.
        local.overwrite(&objid, vec![0x7f, 0, 0]).await;
        assert_eq!(
            datastore.get_object(&objid, None).await.unwrap(),
            b"intact remotely"
        );

        // Damaged in both places is repository corruption.
        remote
            .overwrite(&objid, b"\x00damaged remote".to_vec())
            .await;
        assert!(matches!(
            datastore.get_object(&objid, None).await,
            Err(Error::CorruptedRepository { objid: id, .. }) if id == objid
        ));
    }

    #[tokio::test]
    async fn encrypted_local_copy_falls_back_to_remote() {
        let key = PrivateKey::generate();
        let config = RepoConfig {
            encryption: Some(EncryptionConfig {
                public_key: key.public_key(),
            }),
            ..RepoConfig::default()
        };
        let local = Arc::new(MemoryStorage::new());
        let remote = Arc::new(MemoryStorage::new());
        let datastore = Datastore::new(remote.clone(), &config).with_local(local.clone());

        let objid = datastore.put_object(b"sealed").await.unwrap();
        local.overwrite(&objid, vec![0u8; 80]).await;

        assert_eq!(
            datastore.get_object(&objid, Some(&key)).await.unwrap(),
            b"sealed"
        );
    }
}
